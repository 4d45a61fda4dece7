//! Finds the [`CodeBlock`] for the current instruction pointer, runs it, and
//! routes what happens to the [`Processor`].

use std::fmt::{Debug};
use std::sync::{Arc};

use tracing::{trace, warn};

use crate::config::{Config};
use crate::cpu::{Fault, Mode, Processor, SubMode};
use crate::error::{DecodeError};
use crate::jit::{CodeBlock, Interrupt};

mod trace;
pub use trace::{TraceRing};

mod region;
pub use region::{Decoder, Fallback, LazyRegion};

/// The number of page faults [`Driver::decode_block_at()`] will deliver
/// while fetching one block before giving up.
pub const MAX_FAULT_RETRIES: usize = 8;

/// The number of [`Interrupt::Replace`]s [`Driver::execute()`] will follow
/// in one step.
pub const MAX_REPLACEMENTS: usize = 8;

/// The address space in which code was looked up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Space {
    Linear,
    Physical,
}

impl Space {
    pub fn of(cpu: &dyn Processor) -> Self {
        if cpu.is_protected_mode() { Space::Linear } else { Space::Physical }
    }
}

/// The result of [`CodeMemory::lookup()`].
pub enum Lookup<'a> {
    /// The address is `offset` bytes into `region`.
    Code { region: &'a mut dyn CodeRegion, offset: u32 },
    /// The address is not backed by memory that can hold decoded code.
    NotCode,
    /// Resolving the address raised a page fault.
    PageFault(Fault),
}

/// The memory subsystem, as seen by the [`Driver`].
pub trait CodeMemory {
    fn lookup(&mut self, space: Space, address: u32) -> Lookup<'_>;
}

/// A piece of memory that can hold decoded code. Yields a block for each
/// sub-mode, compiling or interpreting as it sees fit.
pub trait CodeRegion {
    fn real_procedure(&mut self, offset: u32) -> Arc<dyn CodeBlock>;

    fn protected_procedure(&mut self, offset: u32, size_32: bool) -> Arc<dyn CodeBlock>;

    fn virtual8086_procedure(&mut self, offset: u32) -> Arc<dyn CodeBlock>;
}

/// Observes the [`Driver`]. Called synchronously, so must be quick.
pub trait Listener {
    fn code_block_decoded(&mut self, address: u32, space: Space, block: &Arc<dyn CodeBlock>);

    fn code_block_executed(&mut self, address: u32, space: Space, block: &Arc<dyn CodeBlock>);
}

//-----------------------------------------------------------------------------

/// Decodes and executes one [`CodeBlock`] at a time, keeping counters and a
/// [`TraceRing`] of what ran.
pub struct Driver<M> {
    memory: M,
    trace: TraceRing,
    /// The total `x86_count()` of the blocks executed.
    instructions: u64,
    /// The total `x86_count()` of the blocks decoded.
    decoded: u64,
    listener: Option<Box<dyn Listener>>,
}

impl<M: Debug> Debug for Driver<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("memory", &self.memory)
            .field("trace_length", &self.trace.len())
            .field("instructions", &self.instructions)
            .field("decoded", &self.decoded)
            .finish()
    }
}

impl<M: CodeMemory> Driver<M> {
    pub fn new(config: &Config, memory: M) -> Self {
        Driver {
            memory,
            trace: TraceRing::new(config.trace_capacity),
            instructions: 0,
            decoded: 0,
            listener: None,
        }
    }

    pub fn memory(&self) -> &M { &self.memory }

    pub fn memory_mut(&mut self) -> &mut M { &mut self.memory }

    pub fn set_listener(&mut self, listener: Option<Box<dyn Listener>>) {
        self.listener = listener;
    }

    /// Returns the block that starts at `address` in the current sub-mode.
    ///
    /// In protected mode, a page fault while looking up the address is
    /// delivered to `cpu`, and the lookup is retried at the new instruction
    /// pointer, up to [`MAX_FAULT_RETRIES`] times.
    pub fn decode_block_at(
        &mut self,
        cpu: &mut dyn Processor,
        address: u32,
    ) -> Result<Arc<dyn CodeBlock>, DecodeError> {
        let mut address = address;
        for _ in 0..=MAX_FAULT_RETRIES {
            let space = Space::of(cpu);
            let block = match self.memory.lookup(space, address) {
                Lookup::Code {region, offset} => match cpu.sub_mode() {
                    SubMode::Real => region.real_procedure(offset),
                    SubMode::Protected16 => region.protected_procedure(offset, false),
                    SubMode::Protected32 => region.protected_procedure(offset, true),
                    SubMode::Virtual8086 => region.virtual8086_procedure(offset),
                },
                Lookup::NotCode => {
                    warn!(address, ?space, "no code at address");
                    return Err(DecodeError::NotCode {address});
                },
                Lookup::PageFault(fault) => {
                    if space != Space::Linear {
                        return Err(DecodeError::UnexpectedPageFault {address, fault});
                    }
                    cpu.handle_protected_fault(fault);
                    address = cpu.instruction_pointer();
                    continue;
                },
            };
            self.decoded += block.x86_count() as u64;
            if let Some(listener) = self.listener.as_mut() {
                listener.code_block_decoded(address, space, &block);
            }
            return Ok(block);
        }
        warn!(address, retries = MAX_FAULT_RETRIES, "page fault loop while fetching code");
        Err(DecodeError::FaultLoop {address, retries: MAX_FAULT_RETRIES})
    }

    /// Runs the block at the instruction pointer of `cpu`, then delivers its
    /// fault or processes interrupts in the mode of the block. Returns the
    /// block that ran.
    pub fn execute(&mut self, cpu: &mut dyn Processor) -> Result<Arc<dyn CodeBlock>, DecodeError> {
        let address = cpu.instruction_pointer();
        let mut block = self.decode_block_at(cpu, address)?;
        let mut replacements = 0;
        loop {
            match block.execute(cpu) {
                Ok(count) => {
                    process_interrupts(cpu, block.mode(), count);
                },
                Err(Interrupt::Fault {fault, retired}) => {
                    trace!(name = block.name(), %fault, retired, "fault");
                    handle_fault(cpu, block.mode(), fault);
                },
                Err(Interrupt::ModeSwitch) => {
                    trace!(name = block.name(), "mode switch");
                },
                Err(Interrupt::Replace(next)) => {
                    if replacements < MAX_REPLACEMENTS {
                        replacements += 1;
                        trace!(old = block.name(), new = next.name(), "replaced");
                        block = next;
                        continue;
                    }
                    warn!(name = block.name(), replacements, "too many replacements");
                },
            }
            break;
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.code_block_executed(address, Space::of(cpu), &block);
        }
        trace!(address, name = block.name(), "executed");
        self.trace.record(address, block.clone());
        self.instructions += block.x86_count() as u64;
        Ok(block)
    }

    /// Forgets the trace and zeroes the counters.
    pub fn reset(&mut self) {
        self.trace.reset();
        self.instructions = 0;
        self.decoded = 0;
    }

    /// The address at which the block in trace row `row` ran.
    pub fn block_address(&self, row: usize) -> Option<u32> { self.trace.address(row) }

    pub fn trace_block_at(&self, row: usize) -> Option<Arc<dyn CodeBlock>> {
        self.trace.block(row).cloned()
    }

    pub fn row_for_index(&self, index: u64) -> Option<usize> { self.trace.row_for_index(index) }

    pub fn index_number_for_row(&self, row: usize) -> u64 { self.trace.index_number_for_row(row) }

    pub fn trace_length(&self) -> usize { self.trace.len() }

    pub fn maximum_trace(&self) -> usize { self.trace.capacity() }

    pub fn executed_block_count(&self) -> u64 { self.trace.executed() }

    pub fn instruction_count(&self) -> u64 { self.instructions }

    pub fn decoded_count(&self) -> u64 { self.decoded }
}

fn handle_fault(cpu: &mut dyn Processor, mode: Mode, fault: Fault) {
    match mode {
        Mode::Real => cpu.handle_real_fault(fault),
        Mode::Protected => cpu.handle_protected_fault(fault),
        Mode::Virtual8086 => cpu.handle_virtual8086_fault(fault),
    }
}

fn process_interrupts(cpu: &mut dyn Processor, mode: Mode, count: u32) {
    match mode {
        Mode::Real => cpu.process_real_interrupts(count),
        Mode::Protected => cpu.process_protected_interrupts(count),
        Mode::Virtual8086 => cpu.process_virtual8086_interrupts(count),
    }
}

//-----------------------------------------------------------------------------
