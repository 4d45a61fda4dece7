//! A dynamic binary translation core for an x86 PC emulator.
//!
//! The decoder expands x86 instructions into runs of [`code::Microcode`]
//! words. [`graph`] turns a run into a dependency graph, and [`jit`] compiles
//! the graph into a [`jit::Procedure`] that computes every value, performs
//! every side effect in order, and only then writes back changed state. If a
//! fault interrupts it, a handler commits exactly the state of the last whole
//! instruction. Procedures are cached per CPU [`cpu::Mode`].
//!
//! [`driver`] finds and runs the block for the current instruction pointer,
//! and keeps a trace of what ran.

pub mod util;

pub mod code;

pub mod cpu;

pub mod error;

pub mod config;

pub mod graph;

pub mod jit;

pub mod driver;

#[cfg(test)]
pub mod mock;
