/// The default for [`Config::max_instructions`].
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 1000;

/// The default for [`Config::trace_capacity`].
pub const DEFAULT_TRACE_CAPACITY: usize = 5000;

/// The tunable parameters of the translation core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// The largest number of x86 instructions compiled into one procedure.
    /// Can be changed later with [`Compiler::set_max_instructions()`].
    ///
    /// [`Compiler::set_max_instructions()`]: crate::jit::Compiler::set_max_instructions
    pub max_instructions: usize,
    /// The number of rows in the driver's execution trace.
    pub trace_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}
