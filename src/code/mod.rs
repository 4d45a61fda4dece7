/*!
 * The microcode instruction set. The decoder expands each x86 instruction
 * into a short run of microcode words, and this crate compiles runs of them
 * into [`Procedure`]s.
 *
 * Every microcode reads some [`Element`]s and defines others. What exactly
 * it does in each CPU [`Mode`] is given by its emission [`rules()`]: one
 * [`Target`] per element it defines, each computing a [`Fragment`] of the
 * current definitions of its [`Operand`]s.
 *
 * All values are 32-bit. Flags are `0` or `1`. Segment registers hold
 * selectors; the CPU model resolves them when memory is accessed.
 *
 * [`Procedure`]: crate::jit::Procedure
 * [`Mode`]: crate::cpu::Mode
 */

use std::fmt::{self, Debug, Formatter};

mod element;
pub use element::{Element, REGISTERS, PROCESSOR_ELEMENT_COUNT, POPABLE_ELEMENT_COUNT, ELEMENT_COUNT};

mod fragment;
pub use fragment::{Fragment, Signal};

mod rules;
pub use rules::{Operand, Target, rules};

mod source;
pub use source::{InstructionSource, ArraySource};

/// The number of bytes transferred by a memory access.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum Width {
    One = 0,
    Two = 1,
    Four = 2,
}

impl Width {
    pub fn bytes(self) -> u32 { 1 << (self as usize) }

    /// Truncates `value` to this width.
    pub fn mask(self, value: u32) -> u32 {
        match self {
            Width::One => value & 0xFF,
            Width::Two => value & 0xFFFF,
            Width::Four => value,
        }
    }
}

//-----------------------------------------------------------------------------

macro_rules! microcodes {
    ($($name:ident = $value:literal, $text:literal;)*) => {
        /// One primitive operation inside the expansion of an x86 instruction.
        ///
        /// The integer encodings are what the decoder emits, and what the
        /// procedure cache hashes.
        #[derive(Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Microcode {
            $($name = $value,)*
        }

        impl Microcode {
            /// Every microcode, in encoding order.
            pub const ALL: &'static [Microcode] = &[$(Microcode::$name,)*];

            /// The conventional upper-case name, e.g. `LOAD0_EAX`.
            pub fn name(self) -> &'static str {
                match self {
                    $(Microcode::$name => $text,)*
                }
            }
        }

        impl TryFrom<u32> for Microcode {
            type Error = u32;

            /// Returns the unrecognised word on failure.
            fn try_from(word: u32) -> Result<Self, u32> {
                match word {
                    $($value => Ok(Microcode::$name),)*
                    _ => Err(word),
                }
            }
        }
    }
}

microcodes! {
    Load0Eax = 0, "LOAD0_EAX";
    Load0Ecx = 1, "LOAD0_ECX";
    Load0Edx = 2, "LOAD0_EDX";
    Load0Ebx = 3, "LOAD0_EBX";
    Load0Esp = 4, "LOAD0_ESP";
    Load0Ebp = 5, "LOAD0_EBP";
    Load0Esi = 6, "LOAD0_ESI";
    Load0Edi = 7, "LOAD0_EDI";
    Load1Eax = 8, "LOAD1_EAX";
    Load1Ecx = 9, "LOAD1_ECX";
    Load1Edx = 10, "LOAD1_EDX";
    Load1Ebx = 11, "LOAD1_EBX";
    Load1Esp = 12, "LOAD1_ESP";
    Load1Ebp = 13, "LOAD1_EBP";
    Load1Esi = 14, "LOAD1_ESI";
    Load1Edi = 15, "LOAD1_EDI";
    Store0Eax = 16, "STORE0_EAX";
    Store0Ecx = 17, "STORE0_ECX";
    Store0Edx = 18, "STORE0_EDX";
    Store0Ebx = 19, "STORE0_EBX";
    Store0Esp = 20, "STORE0_ESP";
    Store0Ebp = 21, "STORE0_EBP";
    Store0Esi = 22, "STORE0_ESI";
    Store0Edi = 23, "STORE0_EDI";
    Load0Id = 24, "LOAD0_ID";
    Load1Id = 25, "LOAD1_ID";
    Load2Id = 26, "LOAD2_ID";
    MemReset = 30, "MEM_RESET";
    AddrId = 31, "ADDR_ID";
    AddrEbx = 32, "ADDR_EBX";
    AddrEbp = 33, "ADDR_EBP";
    AddrEsi = 34, "ADDR_ESI";
    AddrEdi = 35, "ADDR_EDI";
    LoadSegEs = 36, "LOAD_SEG_ES";
    LoadSegCs = 37, "LOAD_SEG_CS";
    LoadSegSs = 38, "LOAD_SEG_SS";
    LoadSegDs = 39, "LOAD_SEG_DS";
    Load0MemByte = 40, "LOAD0_MEM_BYTE";
    Load0MemWord = 41, "LOAD0_MEM_WORD";
    Load0MemDword = 42, "LOAD0_MEM_DWORD";
    Store0MemByte = 43, "STORE0_MEM_BYTE";
    Store0MemWord = 44, "STORE0_MEM_WORD";
    Store0MemDword = 45, "STORE0_MEM_DWORD";
    Store0Es = 46, "STORE0_ES";
    Store0Ss = 47, "STORE0_SS";
    Store0Ds = 48, "STORE0_DS";
    Add = 50, "ADD";
    Sub = 51, "SUB";
    And = 52, "AND";
    Or = 53, "OR";
    Xor = 54, "XOR";
    Inc = 55, "INC";
    Dec = 56, "DEC";
    Neg = 57, "NEG";
    Not = 58, "NOT";
    Shl = 59, "SHL";
    Shr = 60, "SHR";
    Sar = 61, "SAR";
    Div = 62, "DIV";
    AddFlags = 70, "ADD_FLAGS";
    SubFlags = 71, "SUB_FLAGS";
    LogicFlags = 72, "LOGIC_FLAGS";
    IncFlags = 73, "INC_FLAGS";
    Clc = 80, "CLC";
    Stc = 81, "STC";
    Cmc = 82, "CMC";
    Cld = 83, "CLD";
    Std = 84, "STD";
    Cli = 85, "CLI";
    Sti = 86, "STI";
    EipUpdate = 90, "EIP_UPDATE";
    JumpRel = 91, "JUMP_REL";
    JumpZero = 92, "JUMP_ZERO";
    JumpNotZero = 93, "JUMP_NOT_ZERO";
    PushO32 = 100, "PUSH_O32";
    PopO32 = 101, "POP_O32";
    InByte = 110, "IN_BYTE";
    OutByte = 111, "OUT_BYTE";
    Hlt = 120, "HLT";
    Store0Cr0 = 121, "STORE0_CR0";
    Cpuid = 130, "CPUID";
    RepMovsb = 131, "REP_MOVSB";
}

impl Microcode {
    /// Whether the microcode is followed by an immediate word in the same
    /// instruction.
    pub fn has_immediate(self) -> bool {
        use Microcode::*;
        matches!(self,
            Load0Id | Load1Id | Load2Id | AddrId | JumpRel | JumpZero | JumpNotZero
        )
    }
}

impl Debug for Microcode {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.write_str(self.name())
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn encodings_round_trip() {
        for &m in Microcode::ALL {
            assert_eq!(Microcode::try_from(m as u32), Ok(m));
        }
        assert_eq!(Microcode::try_from(27), Err(27));
        assert_eq!(Microcode::try_from(0xFFFF_FFFF), Err(0xFFFF_FFFF));
    }

    #[test]
    fn names() {
        assert_eq!(Microcode::Load0Eax.name(), "LOAD0_EAX");
        assert_eq!(format!("{:?}", Microcode::Store0Cr0), "STORE0_CR0");
        assert!(Microcode::AddrId.has_immediate());
        assert!(!Microcode::Add.has_immediate());
    }

    #[test]
    fn widths() {
        assert_eq!(Width::Two.bytes(), 2);
        assert_eq!(Width::One.mask(0x1234), 0x34);
        assert_eq!(Width::Four.mask(0x1234_5678), 0x1234_5678);
    }
}
