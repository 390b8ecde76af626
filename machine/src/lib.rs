/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The thin machine interface consumed by the Lily kernel core (`kernel`
//! crate). `spec.md` §1 draws the line here: CPU/MMU mechanics, physical
//! frame mapping and I/O ports belong to this crate; scheduling, binding,
//! and buffer bookkeeping do not. A hosted simulation of every trait here
//! lets the kernel core run and be tested without real hardware, per the
//! design note in `spec.md` §9 about a testable, hosted kernel context.

#[macro_use]
pub mod macros;

pub mod address_space;
pub mod console;
pub mod cpu;
pub mod frame;
pub mod ports;
pub mod sync;

pub use address_space::{AddressSpace, SimAddressSpace, VirtualRange};
pub use cpu::{Cpu, SimCpu};
pub use frame::FrameId;
pub use ports::{PortIo, SimPorts};
