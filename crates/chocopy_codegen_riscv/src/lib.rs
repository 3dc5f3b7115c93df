//! RISC-V backend for ChocoPy: register allocation for virtual-register
//! streams and textual assembly emission.

pub mod asm;
pub mod regalloc;

pub use asm::{emit_asm, render};
pub use regalloc::{allocate, Allocation, Location};
