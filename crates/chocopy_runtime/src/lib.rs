//! Reference machine for generated ChocoPy programs: executes instruction
//! records directly, with physical registers or an unbounded virtual
//! register file.

mod machine;

pub use machine::*;
