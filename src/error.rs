use thiserror::Error;

use crate::code::{Element, Microcode};
use crate::cpu::{Fault, Mode};

/// Why a microcode run could not be compiled. None of these is retried: the
/// caller falls back to interpreting the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("instruction source yielded no instructions")]
    Empty,
    #[error("unknown microcode {word:#x} in instruction {x86_index}")]
    UnknownMicrocode { word: u32, x86_index: u32 },
    #[error("{microcode:?} in instruction {x86_index} is missing its immediate")]
    MissingImmediate { microcode: Microcode, x86_index: u32 },
    #[error("no {mode:?} mode emission rule for {microcode:?}")]
    Unsupported { mode: Mode, microcode: Microcode },
    #[error("{microcode:?} reads {element:?} before it is defined")]
    UndefinedOperand { microcode: Microcode, element: Element },
    #[error("{microcode:?} can switch mode but is not in the last instruction")]
    ModeSwitchNotLast { microcode: Microcode },
    #[error("procedure rejected by verifier: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// Why no code block could be found for an instruction pointer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("address {address:#x} is not backed by decoded code")]
    NotCode { address: u32 },
    #[error("{fault} while fetching code at {address:#x} outside protected mode")]
    UnexpectedPageFault { address: u32, fault: Fault },
    #[error("gave up fetching code after {retries} faults, last at {address:#x}")]
    FaultLoop { address: u32, retries: usize },
}
