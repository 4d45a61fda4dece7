use std::fmt::{self, Debug, Formatter};

use tracing::{trace};

use crate::code::{Element, Fragment, Signal};
use crate::cpu::{Fault, Mode, Processor};
use crate::error::{CompileError, Result};
use crate::graph::{Run};
use super::{CodeBlock, Interrupt, HandlerEntry, Body};

/// The largest number of ops, slots or stack entries a [`Procedure`] may use.
pub const LIMIT: usize = 0xFFFF;

/// A storage location for a value that is used more than once.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slot(pub usize);

impl Debug for Slot {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One op of a compiled [`Procedure`]. Ops manipulate a stack of values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Code {
    /// Push the current value of a persistent [`Element`].
    Read(Element),
    /// Push a constant.
    Constant(u32),
    /// Pop the arguments of a [`Fragment`], and push its result.
    Apply(Fragment),
    /// Copy the top of the stack into a [`Slot`], without popping it.
    Save(Slot),
    /// Push the value of a [`Slot`].
    Restore(Slot),
    /// Pop and forget a value.
    Discard,
    /// Pop a value and store it in an [`Element`].
    Commit(Element),
    /// Finish successfully.
    Return,
    /// Finish a handler by re-raising the pending fault.
    Rethrow {retired: u32},
}

//-----------------------------------------------------------------------------

/// Follows the stack depth through the ops from `start` up to and including
/// the next `Return` (if `main`) or `Rethrow`. Returns the index after the
/// last op and the largest depth reached.
fn simulate(code: &[Code], start: usize, slots: usize, main: bool) -> Result<(usize, usize)> {
    let reject = |pc: usize, what: &str| Err(CompileError::Rejected(format!("{} at {}", what, pc)));
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    let mut pc = start;
    loop {
        let Some(&op) = code.get(pc) else { return reject(pc, "ran off the end") };
        let (pops, pushes) = match op {
            Code::Read(element) => {
                if !element.is_readable() { return reject(pc, "unreadable element"); }
                (0, 1)
            },
            Code::Constant(_) => (0, 1),
            Code::Apply(fragment) => (fragment.arity(), 1),
            Code::Save(Slot(s)) | Code::Restore(Slot(s)) if s >= slots => {
                return reject(pc, "slot out of range");
            },
            Code::Save(_) => (1, 1),
            Code::Restore(_) => (0, 1),
            Code::Discard => (1, 0),
            Code::Commit(element) => {
                if !element.is_committed() { return reject(pc, "uncommittable element"); }
                (1, 0)
            },
            Code::Return | Code::Rethrow {..} => {
                if matches!(op, Code::Return) != main { return reject(pc, "wrong terminator"); }
                if depth != 0 { return reject(pc, "values left on the stack"); }
                return Ok((pc + 1, max_depth));
            },
        };
        if depth < pops { return reject(pc, "stack underflow"); }
        depth = depth - pops + pushes;
        max_depth = max_depth.max(depth);
        pc += 1;
    }
}

/// Checks that `code` cannot misbehave when executed, and returns the stack
/// size it needs.
///
/// The main code runs from index `0` to the first `Return`. The handler
/// bodies follow it, one after another, each ending in a `Rethrow`.
pub fn verify(code: &[Code], handlers: &[HandlerEntry], slots: usize) -> Result<usize> {
    if code.len() > LIMIT { return Err(CompileError::Rejected(format!("{} ops", code.len()))); }
    if slots > LIMIT { return Err(CompileError::Rejected(format!("{} slots", slots))); }
    let (main_end, mut max_stack) = simulate(code, 0, slots, true)?;
    let mut previous_end = 0;
    for h in handlers {
        if !(previous_end <= h.start && h.start < h.end && h.end <= main_end) {
            return Err(CompileError::Rejected(format!("bad handler range {}..{}", h.start, h.end)));
        }
        previous_end = h.end;
    }
    let mut targets: Vec<usize> = handlers.iter().map(|h| h.target).collect();
    targets.sort_unstable();
    targets.dedup();
    let mut end = main_end;
    for target in targets {
        if target != end {
            return Err(CompileError::Rejected(format!("handler at {} does not follow {}", target, end)));
        }
        let (body_end, depth) = simulate(code, target, slots, false)?;
        end = body_end;
        max_stack = max_stack.max(depth);
    }
    if end != code.len() {
        return Err(CompileError::Rejected(format!("unreachable ops from {}", end)));
    }
    if max_stack > LIMIT { return Err(CompileError::Rejected(format!("stack of {}", max_stack))); }
    Ok(max_stack)
}

//-----------------------------------------------------------------------------

/// How a stretch of interpretation stopped.
enum Stop {
    Return,
    Rethrow(u32),
    /// A [`Fragment`] raised a fault. Includes the index of its op.
    Fault(Fault, usize),
}

/// The cached, executable translation of one [`Run`] in one [`Mode`].
pub struct Procedure {
    name: String,
    mode: Mode,
    microcodes: Box<[u32]>,
    positions: Box<[u32]>,
    hash: i32,
    x86_count: u32,
    x86_length: u32,
    code: Box<[Code]>,
    handlers: Box<[HandlerEntry]>,
    slots: usize,
    max_stack: usize,
}

impl Procedure {
    /// Verifies `body` and wraps it up.
    pub fn new(name: String, mode: Mode, run: &Run, body: Body) -> Result<Self> {
        let max_stack = verify(&body.code, &body.handlers, body.slots)?;
        Ok(Procedure {
            name,
            mode,
            microcodes: run.microcodes().into(),
            positions: run.positions().into(),
            hash: run.hash(),
            x86_count: run.x86_count(),
            x86_length: run.x86_length(),
            code: body.code.into(),
            handlers: body.handlers.into(),
            slots: body.slots,
            max_stack,
        })
    }

    pub(super) fn set_name(&mut self, name: String) { self.name = name; }

    pub fn hash(&self) -> i32 { self.hash }

    pub fn microcodes(&self) -> &[u32] { &self.microcodes }

    pub fn positions(&self) -> &[u32] { &self.positions }

    pub fn code(&self) -> &[Code] { &self.code }

    pub fn handlers(&self) -> &[HandlerEntry] { &self.handlers }

    pub fn slots(&self) -> usize { self.slots }

    pub fn max_stack(&self) -> usize { self.max_stack }

    /// Whether this procedure was compiled from exactly `run`.
    pub fn matches(&self, run: &Run) -> bool {
        run.matches(&self.microcodes, &self.positions)
    }

    fn interpret(
        &self,
        cpu: &mut dyn Processor,
        mut pc: usize,
        stack: &mut Vec<u32>,
        slots: &mut [u32],
        switched: &mut bool,
    ) -> Stop {
        loop {
            let op = self.code[pc];
            match op {
                Code::Read(element) => stack.push(cpu.get(element)),
                Code::Constant(value) => stack.push(value),
                Code::Apply(fragment) => {
                    let base = stack.len() - fragment.arity();
                    let result = fragment.apply(cpu, &stack[base..]);
                    stack.truncate(base);
                    match result {
                        Ok(value) => stack.push(value),
                        Err(Signal::ModeSwitch) => {
                            *switched = true;
                            stack.push(0);
                        },
                        Err(Signal::Fault(fault)) => return Stop::Fault(fault, pc),
                    }
                },
                Code::Save(Slot(s)) => {
                    if let Some(&value) = stack.last() { slots[s] = value; }
                },
                Code::Restore(Slot(s)) => stack.push(slots[s]),
                Code::Discard => { stack.pop(); },
                Code::Commit(element) => {
                    if let Some(value) = stack.pop() { cpu.set(element, value); }
                },
                Code::Return => return Stop::Return,
                Code::Rethrow {retired} => return Stop::Rethrow(retired),
            }
            pc += 1;
        }
    }

    /// Returns the handler protecting the op at `pc`, if any.
    pub fn handler_for(&self, pc: usize) -> Option<&HandlerEntry> {
        self.handlers.iter().find(|h| h.start <= pc && pc < h.end)
    }

    /// Runs the procedure, which must have been verified.
    pub fn run(&self, cpu: &mut dyn Processor) -> std::result::Result<u32, Interrupt> {
        let mut stack = Vec::with_capacity(self.max_stack);
        let mut slots = vec![0u32; self.slots];
        let mut switched = false;
        match self.interpret(cpu, 0, &mut stack, &mut slots, &mut switched) {
            Stop::Return if switched => Err(Interrupt::ModeSwitch),
            Stop::Return | Stop::Rethrow(_) => Ok(self.x86_count),
            Stop::Fault(fault, pc) => {
                let fault = self.mode.translate(fault);
                trace!(procedure = %self.name, ?fault, pc, "fault");
                let retired = match self.handler_for(pc) {
                    None => 0,
                    Some(handler) => {
                        stack.clear();
                        match self.interpret(cpu, handler.target, &mut stack, &mut slots, &mut switched) {
                            Stop::Rethrow(retired) => retired,
                            _ => handler.retired,
                        }
                    },
                };
                Err(Interrupt::Fault {fault, retired})
            },
        }
    }
}

impl CodeBlock for Procedure {
    fn name(&self) -> &str { &self.name }

    fn mode(&self) -> Mode { self.mode }

    fn x86_count(&self) -> u32 { self.x86_count }

    fn x86_length(&self) -> u32 { self.x86_length }

    fn execute(&self, cpu: &mut dyn Processor) -> std::result::Result<u32, Interrupt> {
        self.run(cpu)
    }
}

impl Debug for Procedure {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "{} ({:?}, {} instructions, {} bytes, {} slots, stack {})",
            self.name, self.mode, self.x86_count, self.x86_length, self.slots, self.max_stack,
        )?;
        for (pc, op) in self.code.iter().enumerate() {
            writeln!(f, "  {:4}: {:?}", pc, op)?;
        }
        for h in self.handlers.iter() {
            writeln!(f, "  handler {}..{} -> {} (retired {})", h.start, h.end, h.target, h.retired)?;
        }
        write!(f, "  microcodes {:?}", self.microcodes)
    }
}

//-----------------------------------------------------------------------------
