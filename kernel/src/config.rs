/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Boot-time configuration. The teacher selects behavior through Cargo
//! features (`rpi3`/`rpi4`/`qemu`/`jtag`, picking a board at compile
//! time); there is no physical board to select here, so the analogous
//! axis is a small set of resource ceilings fixed at boot instead, the
//! same role the teacher's `DMA_HEAP_START`/`DMA_HEAP_END`-style constants
//! play as defaults for a value that's configurable in principle but
//! fixed in practice.

/// Resource ceilings `KernelContext::new` enforces for the lifetime of the
/// kernel instance. Exceeding either one surfaces as `SyscallError::NoMem`
/// at the call site that would have exceeded it — the stable taxonomy
/// (`spec.md` §6/§7) has no dedicated "too many automata" code, and
/// running out of automaton table slots or buffer slots is, from a
/// caller's point of view, indistinguishable from running out of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub max_automata: usize,
    pub max_buffers_per_automaton: usize,
    pub page_size: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            max_automata: 4096,
            max_buffers_per_automaton: 256,
            page_size: crate::loader::PAGE_SIZE as usize,
        }
    }
}
