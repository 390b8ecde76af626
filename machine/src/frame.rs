//! Physical page-frame identity, shared between `machine` (which maps
//! frames into an [`AddressSpace`](crate::address_space::AddressSpace)) and
//! `heap` (which allocates them). Kept as a bare dense index rather than a
//! pointer, per `spec.md` §9: "all cross-references are indices, never
//! pointers."

/// A physical page-frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);
