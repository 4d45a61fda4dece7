//! Test doubles: a simple CPU model, and a reference interpreter that runs
//! microcodes one at a time.

use crate::code::{Element, Operand, Signal, Width, ELEMENT_COUNT, PROCESSOR_ELEMENT_COUNT, rules};
use crate::cpu::{Fault, Mode, Processor};
use crate::graph::{Run};
use crate::jit::{CodeBlock, Interrupt};

/// The size of [`MockCpu::memory`].
pub const MEMORY_SIZE: usize = 0x2_0000;

/// A register file, a small flat memory addressed as `(segment << 4) +
/// offset`, and logs of everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCpu {
    pub elements: [u32; PROCESSOR_ELEMENT_COUNT],
    pub memory: Vec<u8>,
    /// `(port, value)` for each port write.
    pub port_writes: Vec<(u16, u8)>,
    pub halted: bool,
    pub cr0: u32,
    pub size_32: bool,
    /// Every fault delivered, with the mode of the handler that received it.
    pub faults: Vec<(Mode, Fault)>,
    /// The argument of every interrupt hook call.
    pub interrupts: Vec<(Mode, u32)>,
}

impl MockCpu {
    pub fn new() -> Self {
        MockCpu {
            elements: [0; PROCESSOR_ELEMENT_COUNT],
            memory: vec![0; MEMORY_SIZE],
            port_writes: Vec::new(),
            halted: false,
            cr0: 0,
            size_32: false,
            faults: Vec::new(),
            interrupts: Vec::new(),
        }
    }

    fn address(&self, segment: u32, offset: u32, width: Width) -> Result<usize, Fault> {
        let address = (segment << 4).wrapping_add(offset) as usize;
        if address + width.bytes() as usize > self.memory.len() {
            return Err(Fault::general_protection(0));
        }
        Ok(address)
    }
}

impl Processor for MockCpu {
    fn get(&self, element: Element) -> u32 { self.elements[element as usize] }

    fn set(&mut self, element: Element, value: u32) { self.elements[element as usize] = value; }

    fn instruction_pointer(&self) -> u32 { self.elements[Element::Eip as usize] }

    fn is_protected_mode(&self) -> bool { self.cr0 & 1 != 0 }

    fn is_virtual8086_mode(&self) -> bool { self.elements[Element::Virtual8086Flag as usize] != 0 }

    fn is_default_size_32(&self) -> bool { self.size_32 }

    fn read_memory(&mut self, segment: u32, offset: u32, width: Width) -> Result<u32, Fault> {
        let address = self.address(segment, offset, width)?;
        let bytes = &self.memory[address..][..width.bytes() as usize];
        Ok(bytes.iter().rev().fold(0, |value, &b| (value << 8) | b as u32))
    }

    fn write_memory(&mut self, segment: u32, offset: u32, width: Width, value: u32) -> Result<(), Fault> {
        let address = self.address(segment, offset, width)?;
        for i in 0..width.bytes() as usize {
            self.memory[address + i] = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    fn load_segment(&mut self, segment: Element, selector: u32) -> Result<u32, Fault> {
        use crate::cpu::{Vector};
        if selector == 0 && segment == Element::Ss {
            return Err(Fault::with_code(Vector::StackSegment, 0));
        }
        if selector & 4 != 0 {
            return Err(Fault::with_code(Vector::SegmentNotPresent, selector & !3));
        }
        Ok(selector)
    }

    fn read_port(&mut self, port: u16) -> u8 { port as u8 ^ 0x5A }

    fn write_port(&mut self, port: u16, value: u8) { self.port_writes.push((port, value)); }

    fn halt(&mut self) { self.halted = true; }

    fn set_cr0(&mut self, value: u32) -> bool {
        let switched = (self.cr0 ^ value) & 1 != 0;
        self.cr0 = value;
        switched
    }

    fn handle_real_fault(&mut self, fault: Fault) { self.faults.push((Mode::Real, fault)); }

    fn handle_protected_fault(&mut self, fault: Fault) { self.faults.push((Mode::Protected, fault)); }

    fn handle_virtual8086_fault(&mut self, fault: Fault) { self.faults.push((Mode::Virtual8086, fault)); }

    fn process_real_interrupts(&mut self, instructions: u32) {
        self.interrupts.push((Mode::Real, instructions));
    }

    fn process_protected_interrupts(&mut self, instructions: u32) {
        self.interrupts.push((Mode::Protected, instructions));
    }

    fn process_virtual8086_interrupts(&mut self, instructions: u32) {
        self.interrupts.push((Mode::Virtual8086, instructions));
    }
}

//-----------------------------------------------------------------------------

/// Runs `run` on `cpu` one microcode at a time, with the same observable
/// behaviour as a compiled procedure. Panics if a microcode has no rule.
pub fn interpret(mode: Mode, cpu: &mut MockCpu, run: &Run) -> Result<u32, Interrupt> {
    let mut values = [0u32; ELEMENT_COUNT];
    let mut written = [false; ELEMENT_COUNT];
    for &e in Element::ALL.iter().filter(|e| e.is_readable()) {
        values[e as usize] = cpu.get(e);
    }
    let wrap = |eip: u32| if mode == Mode::Protected { eip } else { eip & 0xFFFF };
    let mut eip_synced = 0u32;
    let mut end_of_previous = 0u32;
    let mut x86_index = 0;
    let mut start = (values, written, 0u32);
    let mut switched = false;
    for node in run.nodes() {
        if node.x86_index != x86_index {
            x86_index = node.x86_index;
            start = (values, written, end_of_previous.wrapping_sub(eip_synced));
        }
        let microcode = node.microcode().expect("unknown microcode");
        let targets = rules(mode, microcode).expect("no rule");
        let mut results = Vec::new();
        for target in &targets {
            let args: Vec<u32> = target.inputs.iter().map(|&operand| match operand {
                Operand::Element(e) => values[e as usize],
                Operand::Immediate => node.immediate.expect("no immediate"),
                Operand::X86Length => node.x86_position.wrapping_sub(eip_synced),
            }).collect();
            let value = match target.fragment.apply(cpu, &args) {
                Ok(value) => value,
                Err(Signal::ModeSwitch) => { switched = true; 0 },
                Err(Signal::Fault(fault)) => {
                    let (mut values, mut written, lag) = start;
                    let eip = Element::Eip as usize;
                    if lag != 0 {
                        values[eip] = wrap(values[eip].wrapping_add(lag));
                        written[eip] = true;
                    }
                    commit(cpu, &values, &written);
                    return Err(Interrupt::Fault {fault: mode.translate(fault), retired: node.x86_index - 1});
                },
            };
            results.push((target.element, value));
        }
        for (element, value) in results {
            values[element as usize] = value;
            written[element as usize] = true;
            if element == Element::Eip { eip_synced = node.x86_position; }
        }
        end_of_previous = node.x86_position;
    }
    commit(cpu, &values, &written);
    if switched { Err(Interrupt::ModeSwitch) } else { Ok(run.x86_count()) }
}

fn commit(cpu: &mut MockCpu, values: &[u32; ELEMENT_COUNT], written: &[bool; ELEMENT_COUNT]) {
    for &e in Element::ALL.iter().filter(|e| e.is_committed()) {
        if written[e as usize] { cpu.set(e, values[e as usize]); }
    }
}

/// A [`CodeBlock`] that stands for one already-interpreted instruction of
/// `length` bytes: running it just advances EIP.
#[derive(Debug)]
pub struct FixedBlock {
    pub name: String,
    pub mode: Mode,
    pub length: u32,
}

impl FixedBlock {
    pub fn new(name: &str, mode: Mode, length: u32) -> Self {
        FixedBlock {name: name.into(), mode, length}
    }
}

impl CodeBlock for FixedBlock {
    fn name(&self) -> &str { &self.name }
    fn mode(&self) -> Mode { self.mode }
    fn x86_count(&self) -> u32 { 1 }
    fn x86_length(&self) -> u32 { self.length }

    fn execute(&self, cpu: &mut dyn Processor) -> Result<u32, Interrupt> {
        let eip = cpu.get(Element::Eip).wrapping_add(self.length);
        cpu.set(Element::Eip, eip);
        Ok(1)
    }
}

/// Describes the outcome of running a block, so that two can be compared.
pub fn outcome(result: &Result<u32, Interrupt>) -> String {
    match result {
        Ok(n) => format!("Ok({})", n),
        Err(Interrupt::Fault {fault, retired}) => format!("Fault({:?}, {})", fault, retired),
        Err(Interrupt::ModeSwitch) => "ModeSwitch".into(),
        Err(Interrupt::Replace(block)) => format!("Replace({})", block.name()),
    }
}
