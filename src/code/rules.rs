use crate::cpu::{Mode};
use super::{Element, Fragment, Microcode, Width, REGISTERS};
use Element::*;
use Fragment::*;

/// A value read by a [`Target`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The current definition of an [`Element`].
    Element(Element),
    /// The immediate word that follows the microcode.
    Immediate,
    /// The number of bytes executed since [`Element::Eip`] was last defined,
    /// up to the end of the current instruction.
    X86Length,
}

use Operand::{Element as E, Immediate as IMM, X86Length as LEN};

/// How a microcode defines one [`Element`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Target {
    pub element: Element,
    pub inputs: &'static [Operand],
    pub fragment: Fragment,
    /// The fragment must run even if the value it defines is never used.
    pub has_effect: bool,
    /// The fragment can raise a processor exception.
    pub can_fault: bool,
    /// The fragment can change the CPU operating mode.
    pub switches_mode: bool,
}

impl Target {
    const fn pure(element: Element, inputs: &'static [Operand], fragment: Fragment) -> Self {
        Target {element, inputs, fragment, has_effect: false, can_fault: false, switches_mode: false}
    }

    const fn effect(element: Element, inputs: &'static [Operand], fragment: Fragment) -> Self {
        Target {has_effect: true, ..Self::pure(element, inputs, fragment)}
    }

    const fn faulting(element: Element, inputs: &'static [Operand], fragment: Fragment) -> Self {
        Target {can_fault: true, ..Self::pure(element, inputs, fragment)}
    }

    const fn faults(self) -> Self {
        Target {can_fault: true, ..self}
    }

    const fn switches_mode(self) -> Self {
        Target {switches_mode: true, ..self}
    }

    /// Whether the fragment must be evaluated at its place in program
    /// order, relative to other such fragments.
    pub fn is_ordered(&self) -> bool {
        self.has_effect || self.can_fault
    }
}

//-----------------------------------------------------------------------------

const REGISTER_INPUTS: [&[Operand]; 8] = [
    &[E(Eax)], &[E(Ecx)], &[E(Edx)], &[E(Ebx)],
    &[E(Esp)], &[E(Ebp)], &[E(Esi)], &[E(Edi)],
];

const REG0: &[Operand] = &[E(Reg0)];
const REG0_REG1: &[Operand] = &[E(Reg0), E(Reg1)];
/// The first operand, the second operand and the result of an ALU operation.
const ALU: &[Operand] = &[E(Reg2), E(Reg1), E(Reg0)];
const MEMORY: &[Operand] = &[E(Seg0), E(Addr0)];
const MEMORY_STORE: &[Operand] = &[E(Seg0), E(Addr0), E(Reg0)];
const PRIVILEGE: &[Operand] = &[E(Cpl), E(Iopl)];

/// Binary ALU operations leave the result in `REG0` and the first operand in
/// `REG2` for the flag microcodes that follow.
fn binary(fragment: Fragment) -> Vec<Target> {
    vec![
        Target::pure(Reg0, REG0_REG1, fragment),
        Target::pure(Reg2, REG0, Identity),
    ]
}

fn unary(fragment: Fragment) -> Vec<Target> {
    vec![
        Target::pure(Reg0, REG0, fragment),
        Target::pure(Reg2, REG0, Identity),
    ]
}

fn result_flags(mut targets: Vec<Target>) -> Vec<Target> {
    targets.push(Target::pure(ZeroFlag, REG0, ZeroResult));
    targets.push(Target::pure(SignFlag, REG0, SignResult));
    targets.push(Target::pure(ParityFlag, REG0, ParityResult));
    targets
}

fn interrupt_flag(mode: Mode, value: bool) -> Target {
    match mode {
        Mode::Real => Target::pure(InterruptFlag, &[], if value { One } else { Zero }),
        Mode::Protected => Target::faulting(InterruptFlag, PRIVILEGE, IoplCheck {value}),
        Mode::Virtual8086 => Target::faulting(InterruptFlag, &[E(Iopl)], Vm86IoplCheck {value}),
    }
}

/// Returns the [`Target`]s that define what `microcode` does in `mode`, or
/// `None` if it cannot be compiled in that mode.
///
/// All inputs of all targets are read before any target is defined.
pub fn rules(mode: Mode, microcode: Microcode) -> Option<Vec<Target>> {
    use Microcode as M;
    let wide = mode == Mode::Protected;
    Some(match microcode {
        M::Load0Eax | M::Load0Ecx | M::Load0Edx | M::Load0Ebx |
        M::Load0Esp | M::Load0Ebp | M::Load0Esi | M::Load0Edi |
        M::Load1Eax | M::Load1Ecx | M::Load1Edx | M::Load1Ebx |
        M::Load1Esp | M::Load1Ebp | M::Load1Esi | M::Load1Edi |
        M::Store0Eax | M::Store0Ecx | M::Store0Edx | M::Store0Ebx |
        M::Store0Esp | M::Store0Ebp | M::Store0Esi | M::Store0Edi => {
            // Encoded as `8 * kind + register`.
            let encoding = microcode as usize;
            let r = encoding % 8;
            vec![match encoding / 8 {
                0 => Target::pure(Reg0, REGISTER_INPUTS[r], Identity),
                1 => Target::pure(Reg1, REGISTER_INPUTS[r], Identity),
                _ => Target::pure(REGISTERS[r], REG0, Identity),
            }]
        },
        M::Load0Id => vec![Target::pure(Reg0, &[IMM], Identity)],
        M::Load1Id => vec![Target::pure(Reg1, &[IMM], Identity)],
        M::Load2Id => vec![Target::pure(Reg2, &[IMM], Identity)],
        M::MemReset => vec![Target::pure(Addr0, &[], Zero)],
        M::AddrId => vec![Target::pure(Addr0, &[E(Addr0), IMM], Add)],
        M::AddrEbx => vec![Target::pure(Addr0, &[E(Addr0), E(Ebx)], Add)],
        M::AddrEbp => vec![Target::pure(Addr0, &[E(Addr0), E(Ebp)], Add)],
        M::AddrEsi => vec![Target::pure(Addr0, &[E(Addr0), E(Esi)], Add)],
        M::AddrEdi => vec![Target::pure(Addr0, &[E(Addr0), E(Edi)], Add)],
        M::LoadSegEs => vec![Target::pure(Seg0, &[E(Es)], Identity)],
        M::LoadSegCs => vec![Target::pure(Seg0, &[E(Cs)], Identity)],
        M::LoadSegSs => vec![Target::pure(Seg0, &[E(Ss)], Identity)],
        M::LoadSegDs => vec![Target::pure(Seg0, &[E(Ds)], Identity)],
        M::Load0MemByte => vec![Target::faulting(Reg0, MEMORY, Load(Width::One))],
        M::Load0MemWord => vec![Target::faulting(Reg0, MEMORY, Load(Width::Two))],
        M::Load0MemDword => vec![Target::faulting(Reg0, MEMORY, Load(Width::Four))],
        M::Store0MemByte => vec![Target::effect(MemoryWrite, MEMORY_STORE, Store(Width::One)).faults()],
        M::Store0MemWord => vec![Target::effect(MemoryWrite, MEMORY_STORE, Store(Width::Two)).faults()],
        M::Store0MemDword => vec![Target::effect(MemoryWrite, MEMORY_STORE, Store(Width::Four)).faults()],
        M::Store0Es | M::Store0Ss | M::Store0Ds => {
            let segment = match microcode { M::Store0Es => Es, M::Store0Ss => Ss, _ => Ds };
            vec![if mode == Mode::Protected {
                Target::faulting(segment, REG0, LoadSegment(segment))
            } else {
                Target::pure(segment, REG0, Selector)
            }]
        },
        M::Add => binary(Add),
        M::Sub => binary(Sub),
        M::And => binary(And),
        M::Or => binary(Or),
        M::Xor => binary(Xor),
        M::Shl => binary(Shl),
        M::Shr => binary(Shr),
        M::Sar => binary(Sar),
        M::Inc => unary(Inc),
        M::Dec => unary(Dec),
        M::Neg => unary(Neg),
        M::Not => vec![Target::pure(Reg0, REG0, Not)],
        M::Div => vec![
            Target::faulting(Reg0, REG0_REG1, DivQuotient),
            Target::faulting(Reg1, REG0_REG1, DivRemainder),
        ],
        M::AddFlags => result_flags(vec![
            Target::pure(CarryFlag, ALU, CarryAdd),
            Target::pure(OverflowFlag, ALU, OverflowAdd),
            Target::pure(AuxiliaryCarryFlag, ALU, AuxiliaryCarry),
        ]),
        M::SubFlags => result_flags(vec![
            Target::pure(CarryFlag, ALU, CarrySub),
            Target::pure(OverflowFlag, ALU, OverflowSub),
            Target::pure(AuxiliaryCarryFlag, ALU, AuxiliaryCarry),
        ]),
        M::LogicFlags => result_flags(vec![
            Target::pure(CarryFlag, &[], Zero),
            Target::pure(OverflowFlag, &[], Zero),
            Target::pure(AuxiliaryCarryFlag, &[], Zero),
        ]),
        M::IncFlags => result_flags(vec![
            Target::pure(OverflowFlag, REG0, OverflowInc),
            Target::pure(AuxiliaryCarryFlag, REG0, AuxiliaryInc),
        ]),
        M::Clc => vec![Target::pure(CarryFlag, &[], Zero)],
        M::Stc => vec![Target::pure(CarryFlag, &[], One)],
        M::Cmc => vec![Target::pure(CarryFlag, &[E(CarryFlag)], Complement)],
        M::Cld => vec![Target::pure(DirectionFlag, &[], Zero)],
        M::Std => vec![Target::pure(DirectionFlag, &[], One)],
        M::Cli => vec![interrupt_flag(mode, false)],
        M::Sti => vec![interrupt_flag(mode, true)],
        M::EipUpdate => vec![Target::pure(Eip, &[E(Eip), LEN], if wide { Add } else { Advance16 })],
        M::JumpRel => vec![Target::pure(Eip, &[E(Eip), LEN, IMM], if wide { Jump } else { Jump16 })],
        M::JumpZero => vec![
            Target::pure(Eip, &[E(ZeroFlag), E(Eip), LEN, IMM], Branch {taken: true, wide}),
        ],
        M::JumpNotZero => vec![
            Target::pure(Eip, &[E(ZeroFlag), E(Eip), LEN, IMM], Branch {taken: false, wide}),
        ],
        M::PushO32 => vec![
            Target::pure(Esp, &[E(Esp)], Minus4),
            Target::effect(MemoryWrite, &[E(Ss), E(Esp), E(Reg0)], PushStore).faults(),
        ],
        M::PopO32 => vec![
            Target::faulting(Reg0, &[E(Ss), E(Esp)], Load(Width::Four)),
            Target::pure(Esp, &[E(Esp)], Plus4),
        ],
        M::InByte => vec![match mode {
            Mode::Protected => Target::effect(Reg0, &[E(Cpl), E(Iopl), E(Reg0)], PortInChecked).faults(),
            _ => Target::effect(Reg0, REG0, PortIn),
        }],
        M::OutByte => vec![match mode {
            Mode::Protected => Target::effect(
                IoPortWrite, &[E(Cpl), E(Iopl), E(Reg0), E(Reg1)], PortOutChecked,
            ).faults(),
            _ => Target::effect(IoPortWrite, REG0_REG1, PortOut),
        }],
        M::Hlt => match mode {
            Mode::Real => vec![Target::effect(ExecuteCount, &[], Halt)],
            Mode::Protected => vec![Target::effect(ExecuteCount, &[E(Cpl)], HaltChecked).faults()],
            Mode::Virtual8086 => return None,
        },
        M::Store0Cr0 => match mode {
            Mode::Virtual8086 => return None,
            _ => vec![Target::effect(Cpu, REG0, SetCr0).switches_mode()],
        },
        M::Cpuid | M::RepMovsb => return None,
    })
}

//-----------------------------------------------------------------------------
