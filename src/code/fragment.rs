use crate::cpu::{Processor, Fault};
use super::{Element, Width};

/// The ways in which a [`Fragment`] can fail to produce a value normally.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The operation raised a processor exception. It had no effect.
    Fault(Fault),
    /// The operation took effect, and changed the CPU operating mode.
    ModeSwitch,
}

impl From<Fault> for Signal {
    fn from(fault: Fault) -> Self { Signal::Fault(fault) }
}

/// A primitive computation. A [`Target`] applies one to the values of its
/// [`Operand`]s to obtain the new value of its [`Element`].
///
/// Fragments that exist for their side-effects return `0`.
///
/// [`Target`]: super::Target
/// [`Operand`]: super::Operand
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Fragment {
    Identity,
    Zero,
    One,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Inc,
    Dec,
    Neg,
    Not,
    Shl,
    Shr,
    Sar,
    /// Toggles a flag.
    Complement,
    /// Truncates to a 16-bit selector.
    Selector,
    /// `(eip + length) mod 2^16`.
    Advance16,
    /// `eip + length + displacement`.
    Jump,
    /// `(eip + length + displacement) mod 2^16`.
    Jump16,
    /// `[flag, eip, length, displacement]`. Jumps if `flag` equals `taken`.
    Branch {taken: bool, wide: bool},
    Minus4,
    Plus4,
    /// `[a, b, result]` of an addition.
    CarryAdd,
    /// `[a, b, result]` of a subtraction.
    CarrySub,
    OverflowAdd,
    OverflowSub,
    /// `[a, b, result]` of either an addition or a subtraction.
    AuxiliaryCarry,
    ZeroResult,
    SignResult,
    ParityResult,
    OverflowInc,
    AuxiliaryInc,
    DivQuotient,
    DivRemainder,
    /// `[segment, offset]`.
    Load(Width),
    /// `[segment, offset, value]`.
    Store(Width),
    /// `[ss, esp, value]`. Stores `value` just below `esp`.
    PushStore,
    /// Validates a selector being loaded into a segment register.
    LoadSegment(Element),
    /// `[cpl, iopl]`. Yields `value` if `cpl <= iopl`.
    IoplCheck {value: bool},
    /// `[iopl]`. Yields `value` if `iopl == 3`.
    Vm86IoplCheck {value: bool},
    /// `[port]`.
    PortIn,
    /// `[cpl, iopl, port]`.
    PortInChecked,
    /// `[port, value]`.
    PortOut,
    /// `[cpl, iopl, port, value]`.
    PortOutChecked,
    Halt,
    /// `[cpl]`.
    HaltChecked,
    SetCr0,
}

use Fragment::*;

fn iopl_allows(cpl: u32, iopl: u32) -> Result<(), Fault> {
    if cpl <= iopl { Ok(()) } else { Err(Fault::general_protection(0)) }
}

impl Fragment {
    /// The number of values consumed.
    pub fn arity(self) -> usize {
        match self {
            Zero | One | Halt => 0,
            Identity | Inc | Dec | Neg | Not | Complement | Selector | Minus4 | Plus4 |
            ZeroResult | SignResult | ParityResult | OverflowInc | AuxiliaryInc |
            LoadSegment(_) | Vm86IoplCheck {..} | PortIn | HaltChecked | SetCr0 => 1,
            Add | Sub | And | Or | Xor | Shl | Shr | Sar | Advance16 |
            DivQuotient | DivRemainder | Load(_) | IoplCheck {..} | PortOut => 2,
            Jump | Jump16 | CarryAdd | CarrySub | OverflowAdd | OverflowSub |
            AuxiliaryCarry | Store(_) | PushStore | PortInChecked => 3,
            Branch {..} | PortOutChecked => 4,
        }
    }

    /// Applies this fragment to `args`, which must contain
    /// [`arity()`](Self::arity) values.
    pub fn apply(self, cpu: &mut dyn Processor, args: &[u32]) -> Result<u32, Signal> {
        debug_assert_eq!(args.len(), self.arity());
        let a = |i: usize| args[i];
        Ok(match self {
            Identity => a(0),
            Zero => 0,
            One => 1,
            Add => a(0).wrapping_add(a(1)),
            Sub => a(0).wrapping_sub(a(1)),
            And => a(0) & a(1),
            Or => a(0) | a(1),
            Xor => a(0) ^ a(1),
            Inc => a(0).wrapping_add(1),
            Dec => a(0).wrapping_sub(1),
            Neg => a(0).wrapping_neg(),
            Not => !a(0),
            Shl => a(0) << (a(1) & 31),
            Shr => a(0) >> (a(1) & 31),
            Sar => ((a(0) as i32) >> (a(1) & 31)) as u32,
            Complement => a(0) ^ 1,
            Selector => a(0) & 0xFFFF,
            Advance16 => a(0).wrapping_add(a(1)) & 0xFFFF,
            Jump => a(0).wrapping_add(a(1)).wrapping_add(a(2)),
            Jump16 => a(0).wrapping_add(a(1)).wrapping_add(a(2)) & 0xFFFF,
            Branch {taken, wide} => {
                let mut eip = a(1).wrapping_add(a(2));
                if (a(0) != 0) == taken { eip = eip.wrapping_add(a(3)); }
                if wide { eip } else { eip & 0xFFFF }
            },
            Minus4 => a(0).wrapping_sub(4),
            Plus4 => a(0).wrapping_add(4),
            CarryAdd => (a(2) < a(0)) as u32,
            CarrySub => (a(0) < a(1)) as u32,
            OverflowAdd => ((a(0) ^ a(2)) & (a(1) ^ a(2))) >> 31,
            OverflowSub => ((a(0) ^ a(1)) & (a(0) ^ a(2))) >> 31,
            AuxiliaryCarry => ((a(0) ^ a(1) ^ a(2)) >> 4) & 1,
            ZeroResult => (a(0) == 0) as u32,
            SignResult => a(0) >> 31,
            ParityResult => ((a(0) as u8).count_ones() % 2 == 0) as u32,
            OverflowInc => (a(0) == 0x8000_0000) as u32,
            AuxiliaryInc => ((a(0) & 0xF) == 0) as u32,
            DivQuotient => a(0).checked_div(a(1)).ok_or_else(Fault::divide_error)?,
            DivRemainder => a(0).checked_rem(a(1)).ok_or_else(Fault::divide_error)?,
            Load(width) => cpu.read_memory(a(0), a(1), width)?,
            Store(width) => {
                cpu.write_memory(a(0), a(1), width, width.mask(a(2)))?;
                0
            },
            PushStore => {
                cpu.write_memory(a(0), a(1).wrapping_sub(4), Width::Four, a(2))?;
                0
            },
            LoadSegment(segment) => cpu.load_segment(segment, a(0) & 0xFFFF)?,
            IoplCheck {value} => {
                iopl_allows(a(0), a(1))?;
                value as u32
            },
            Vm86IoplCheck {value} => {
                if a(0) != 3 { return Err(Fault::general_protection(0).into()); }
                value as u32
            },
            PortIn => cpu.read_port(a(0) as u16) as u32,
            PortInChecked => {
                iopl_allows(a(0), a(1))?;
                cpu.read_port(a(2) as u16) as u32
            },
            PortOut => {
                cpu.write_port(a(0) as u16, a(1) as u8);
                0
            },
            PortOutChecked => {
                iopl_allows(a(0), a(1))?;
                cpu.write_port(a(2) as u16, a(3) as u8);
                0
            },
            Halt => {
                cpu.halt();
                0
            },
            HaltChecked => {
                if a(0) != 0 { return Err(Fault::general_protection(0).into()); }
                cpu.halt();
                0
            },
            SetCr0 => {
                if cpu.set_cr0(a(0)) { return Err(Signal::ModeSwitch); }
                0
            },
        })
    }
}

//-----------------------------------------------------------------------------
