use std::fmt::{Debug};
use std::sync::{Arc};

use crate::cpu::{Fault, Mode, Processor};

/// Why a [`CodeBlock`] stopped before completing normally.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// A processor exception. The state committed is that at the start of
    /// the faulting instruction, and `retired` instructions completed.
    Fault {fault: Fault, retired: u32},
    /// The block completed, and left the CPU in a different operating mode.
    ModeSwitch,
    /// The block is stale. Execute the replacement in its place.
    Replace(Arc<dyn CodeBlock>),
}

/// Something the execution driver can run: a compiled [`Procedure`] or a
/// host-provided block that interprets the instructions.
///
/// [`Procedure`]: super::Procedure
pub trait CodeBlock: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// The mode in which the block expects to run.
    fn mode(&self) -> Mode;

    /// The number of x86 instructions covered.
    fn x86_count(&self) -> u32;

    /// The number of x86 bytes covered.
    fn x86_length(&self) -> u32;

    /// Runs the block against `cpu`. Returns the number of instructions
    /// executed.
    fn execute(&self, cpu: &mut dyn Processor) -> Result<u32, Interrupt>;
}
