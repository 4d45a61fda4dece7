//! The interface to the processor model, which is outside this crate.

use thiserror::{Error};

use crate::code::{Element, Width};

/// A CPU operating mode. Each mode has its own emission rules, its own fault
/// recovery path, and its own namespace in the procedure cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    Real,
    Protected,
    Virtual8086,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Real, Mode::Protected, Mode::Virtual8086];

    /// The prefix of the names of procedures compiled for this mode.
    pub fn prefix(self) -> &'static str {
        match self {
            Mode::Real => "FAST_RM_",
            Mode::Protected => "FAST_PM_",
            Mode::Virtual8086 => "FAST_VM_",
        }
    }

    /// Adjusts `fault` to what this mode delivers. Real mode exceptions do
    /// not push an error code.
    pub fn translate(self, fault: Fault) -> Fault {
        match self {
            Mode::Real => Fault {error_code: None, ..fault},
            Mode::Protected | Mode::Virtual8086 => fault,
        }
    }
}

/// A [`Mode`] refined by the default operand size of the code segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SubMode {
    Real,
    Protected16,
    Protected32,
    Virtual8086,
}

impl SubMode {
    pub fn mode(self) -> Mode {
        match self {
            SubMode::Real => Mode::Real,
            SubMode::Protected16 | SubMode::Protected32 => Mode::Protected,
            SubMode::Virtual8086 => Mode::Virtual8086,
        }
    }
}

//-----------------------------------------------------------------------------

/// x86 exception vectors that compiled code can raise.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Vector {
    DivideError = 0,
    InvalidOpcode = 6,
    SegmentNotPresent = 11,
    StackSegment = 12,
    GeneralProtection = 13,
    PageFault = 14,
}

/// A processor exception raised while executing a procedure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Error)]
#[error("{vector:?} fault (error code {error_code:?})")]
pub struct Fault {
    pub vector: Vector,
    pub error_code: Option<u32>,
}

impl Fault {
    pub fn new(vector: Vector) -> Self {
        Fault {vector, error_code: None}
    }

    pub fn with_code(vector: Vector, error_code: u32) -> Self {
        Fault {vector, error_code: Some(error_code)}
    }

    pub fn divide_error() -> Self { Self::new(Vector::DivideError) }

    pub fn general_protection(error_code: u32) -> Self {
        Self::with_code(Vector::GeneralProtection, error_code)
    }
}

//-----------------------------------------------------------------------------

/// The processor register, flag and memory model.
///
/// A compiled procedure reads [`Element`]s through [`get()`] when it needs
/// their values on entry, and writes back the changed ones through [`set()`]
/// after it has computed all of them.
///
/// [`get()`]: Self::get
/// [`set()`]: Self::set
pub trait Processor {
    /// Returns the current value of a persistent `element`.
    fn get(&self, element: Element) -> u32;

    /// Replaces the value of a persistent `element`. Setting
    /// [`Element::InterruptFlag`] also arms the one-instruction delay before
    /// interrupts are recognised.
    fn set(&mut self, element: Element, value: u32);

    /// The address of the next instruction, as used to look up code.
    fn instruction_pointer(&self) -> u32;

    fn is_protected_mode(&self) -> bool;

    fn is_virtual8086_mode(&self) -> bool;

    /// Whether the code segment defaults to 32-bit operands.
    fn is_default_size_32(&self) -> bool;

    /// Returns the [`SubMode`] in which the next instruction runs.
    fn sub_mode(&self) -> SubMode {
        if !self.is_protected_mode() {
            SubMode::Real
        } else if self.is_virtual8086_mode() {
            SubMode::Virtual8086
        } else if self.is_default_size_32() {
            SubMode::Protected32
        } else {
            SubMode::Protected16
        }
    }

    /// Reads `width` bytes at `offset` in the segment selected by `segment`.
    fn read_memory(&mut self, segment: u32, offset: u32, width: Width) -> Result<u32, Fault>;

    /// Writes `width` bytes at `offset` in the segment selected by `segment`.
    fn write_memory(&mut self, segment: u32, offset: u32, width: Width, value: u32) -> Result<(), Fault>;

    /// Checks that `selector` may be loaded into `segment` in protected mode,
    /// and returns the value to store.
    fn load_segment(&mut self, segment: Element, selector: u32) -> Result<u32, Fault>;

    fn read_port(&mut self, port: u16) -> u8;

    fn write_port(&mut self, port: u16, value: u8);

    fn halt(&mut self);

    /// Writes control register 0. Returns `true` if the write changed the
    /// operating mode.
    fn set_cr0(&mut self, value: u32) -> bool;

    fn handle_real_fault(&mut self, fault: Fault);

    fn handle_protected_fault(&mut self, fault: Fault);

    fn handle_virtual8086_fault(&mut self, fault: Fault);

    /// Called after a procedure completes, with the number of instructions
    /// it executed.
    fn process_real_interrupts(&mut self, instructions: u32);

    fn process_protected_interrupts(&mut self, instructions: u32);

    fn process_virtual8086_interrupts(&mut self, instructions: u32);
}

//-----------------------------------------------------------------------------
