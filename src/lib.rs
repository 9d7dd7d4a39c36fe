//! Assembler and interpreter for the Little Man Computer.

pub mod memory;
pub mod processor;
