use std::fmt::{self, Debug, Formatter};

use crate::util::{AsUsize};

/// Names one piece of CPU state that microcode reads or writes.
///
/// The numbering is stable. Elements below [`PROCESSOR_ELEMENT_COUNT`] are
/// persistent: they have a value on entry to a procedure. [`Element::Reg0`]
/// to [`Element::Seg0`] are transient operands that exist only while a run
/// is being compiled, and the last three are sentinels that only ever
/// receive side-effects.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Element {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
    Eip = 8,
    CarryFlag = 9,
    ParityFlag = 10,
    AuxiliaryCarryFlag = 11,
    ZeroFlag = 12,
    SignFlag = 13,
    TrapFlag = 14,
    InterruptFlag = 15,
    DirectionFlag = 16,
    OverflowFlag = 17,
    Iopl = 18,
    NestedTaskFlag = 19,
    ResumeFlag = 20,
    Virtual8086Flag = 21,
    AlignmentCheckFlag = 22,
    VirtualInterruptFlag = 23,
    VirtualInterruptPendingFlag = 24,
    IdFlag = 25,
    Es = 26,
    Cs = 27,
    Ss = 28,
    Ds = 29,
    Fs = 30,
    Gs = 31,
    Idtr = 32,
    Gdtr = 33,
    Ldtr = 34,
    Tss = 35,
    Cpl = 36,
    IoPorts = 37,
    Cpu = 38,
    Addr0 = 39,
    Reg0 = 40,
    Reg1 = 41,
    Reg2 = 42,
    Seg0 = 43,
    MemoryWrite = 44,
    IoPortWrite = 45,
    ExecuteCount = 46,
}

use Element::*;

/// The number of elements that have a value on entry to a procedure.
pub const PROCESSOR_ELEMENT_COUNT: usize = 40;

/// The number of elements that can be read by microcode.
pub const POPABLE_ELEMENT_COUNT: usize = 44;

/// The total number of elements.
pub const ELEMENT_COUNT: usize = 47;

/// The general-purpose registers, in encoding order.
pub const REGISTERS: [Element; 8] = [Eax, Ecx, Edx, Ebx, Esp, Ebp, Esi, Edi];

impl Element {
    /// All elements, in numbering order.
    pub const ALL: [Element; ELEMENT_COUNT] = [
        Eax, Ecx, Edx, Ebx, Esp, Ebp, Esi, Edi, Eip,
        CarryFlag, ParityFlag, AuxiliaryCarryFlag, ZeroFlag, SignFlag,
        TrapFlag, InterruptFlag, DirectionFlag, OverflowFlag, Iopl,
        NestedTaskFlag, ResumeFlag, Virtual8086Flag, AlignmentCheckFlag,
        VirtualInterruptFlag, VirtualInterruptPendingFlag, IdFlag,
        Es, Cs, Ss, Ds, Fs, Gs, Idtr, Gdtr, Ldtr, Tss, Cpl, IoPorts, Cpu, Addr0,
        Reg0, Reg1, Reg2, Seg0,
        MemoryWrite, IoPortWrite, ExecuteCount,
    ];

    /// Returns the element numbered `index`, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Whether the element has a value on entry to a procedure.
    pub fn is_persistent(self) -> bool {
        (self as usize) < PROCESSOR_ELEMENT_COUNT
    }

    /// Whether the element is an operand that only exists during compilation.
    pub fn is_transient(self) -> bool {
        !self.is_persistent() && (self as usize) < POPABLE_ELEMENT_COUNT
    }

    /// Whether the element is a sentinel, which only receives side-effects.
    pub fn is_sentinel(self) -> bool {
        (self as usize) >= POPABLE_ELEMENT_COUNT
    }

    /// Whether a changed value of this element is written back to the CPU.
    /// The I/O port array, the CPU itself and the address scratch register
    /// are readable but never stored.
    pub fn is_committed(self) -> bool {
        self.is_persistent() && !matches!(self, IoPorts | Cpu | Addr0)
    }

    /// Whether the CPU model supplies the value on entry. The remaining
    /// persistent elements read as zero.
    pub fn is_readable(self) -> bool {
        self.is_committed()
    }
}

impl AsUsize for Element {
    fn as_usize(self) -> usize { self as usize }
}

impl Debug for Element {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.write_str(match self {
            Eax => "EAX", Ecx => "ECX", Edx => "EDX", Ebx => "EBX",
            Esp => "ESP", Ebp => "EBP", Esi => "ESI", Edi => "EDI",
            Eip => "EIP",
            CarryFlag => "CF", ParityFlag => "PF", AuxiliaryCarryFlag => "AF",
            ZeroFlag => "ZF", SignFlag => "SF", TrapFlag => "TF",
            InterruptFlag => "IF", DirectionFlag => "DF", OverflowFlag => "OF",
            Iopl => "IOPL", NestedTaskFlag => "NT", ResumeFlag => "RF",
            Virtual8086Flag => "VM", AlignmentCheckFlag => "AC",
            VirtualInterruptFlag => "VIF", VirtualInterruptPendingFlag => "VIP",
            IdFlag => "ID",
            Es => "ES", Cs => "CS", Ss => "SS", Ds => "DS", Fs => "FS", Gs => "GS",
            Idtr => "IDTR", Gdtr => "GDTR", Ldtr => "LDTR", Tss => "TSS",
            Cpl => "CPL", IoPorts => "IOPORTS", Cpu => "CPU", Addr0 => "ADDR0",
            Reg0 => "REG0", Reg1 => "REG1", Reg2 => "REG2", Seg0 => "SEG0",
            MemoryWrite => "MEMORYWRITE", IoPortWrite => "IOPORTWRITE",
            ExecuteCount => "EXECUTECOUNT",
        })
    }
}

//-----------------------------------------------------------------------------
