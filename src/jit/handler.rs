use crate::code::{Element, Fragment};
use crate::cpu::{Mode};
use crate::error::{CompileError, Result};
use crate::graph::{Boundary, Node};
use super::{Code};
use super::codegen::{Emitter};

/// One entry of a [`Procedure`]'s handler table. If an op in `start..end`
/// faults, execution continues at `target`.
///
/// [`Procedure`]: super::Procedure
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HandlerEntry {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    /// The number of instructions that completed before the protected one.
    pub retired: u32,
}

impl<'a> Emitter<'a> {
    /// Emits code to push the value of `root` without relying on the main
    /// code having reached any particular point, except that the ordered
    /// [`Node`]s `root` depends on have run and saved their values.
    fn emit_fresh(&mut self, root: Node) -> Result<()> {
        let graph = self.graph;
        let dataflow = &graph.dataflow;
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                self.emit_apply(node)?;
                continue;
            }
            if dataflow.is_ordered(node) {
                let slot = self.slot[node].ok_or_else(|| CompileError::Rejected(
                    format!("handler needs {:?}, which has no slot", node),
                ))?;
                self.code.push(Code::Restore(slot));
                continue;
            }
            if self.emit_leaf(node) { continue; }
            stack.push((node, true));
            stack.extend(dataflow.ins(node).iter().rev().map(|&input| (input, false)));
        }
        Ok(())
    }

    /// Emits the handler body for `boundary`, and returns its table entry.
    /// Returns `None` if none of the nodes it protects were emitted.
    ///
    /// The body commits the state at the start of the faulting instruction,
    /// then re-raises the fault.
    pub fn emit_handler(&mut self, boundary: &Boundary) -> Result<Option<HandlerEntry>> {
        let covered: Vec<usize> = boundary.nodes.iter().filter_map(|&n| self.apply_at[n]).collect();
        let (start, end) = match (covered.iter().min(), covered.iter().max()) {
            (Some(&first), Some(&last)) => (first, last + 1),
            _ => return Ok(None),
        };
        let target = self.code.len();
        let mut state = boundary.snapshot.clone();
        if boundary.eip_lag != 0 && !state.iter().any(|&(e, _)| e == Element::Eip) {
            state.push((Element::Eip, boundary.eip));
            state.sort_by_key(|&(e, _)| e as usize);
        }
        for &(element, node) in &state {
            self.emit_fresh(node)?;
            if element == Element::Eip && boundary.eip_lag != 0 {
                self.code.push(Code::Constant(boundary.eip_lag));
                self.code.push(Code::Apply(match self.graph.mode {
                    Mode::Protected => Fragment::Add,
                    Mode::Real | Mode::Virtual8086 => Fragment::Advance16,
                }));
            }
        }
        for &(element, _) in state.iter().rev() {
            self.code.push(Code::Commit(element));
        }
        let retired = boundary.x86_index - 1;
        self.code.push(Code::Rethrow {retired});
        Ok(Some(HandlerEntry {start, end, target, retired}))
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::code::{ArraySource, Microcode as M};
    use crate::graph::{Graph, Run};
    use crate::jit::{Body, generate, verify};

    fn w(m: M) -> u32 { m as u32 }

    fn body(mode: Mode, instructions: &[(u32, &[u32])]) -> Body {
        let mut source = ArraySource::from_instructions(instructions);
        let run = Run::build(&mut source, 1000).unwrap();
        let graph = Graph::build(mode, &run).unwrap();
        generate(&graph).unwrap()
    }

    #[test]
    fn one_handler_per_faulting_instruction() {
        // inc eax; mov ebx, [0x10]; dec ecx
        let body = body(Mode::Real, &[
            (1, &[w(M::Load0Eax), w(M::Inc), w(M::Store0Eax), w(M::EipUpdate)]),
            (4, &[w(M::MemReset), w(M::AddrId), 0x10, w(M::LoadSegDs),
                  w(M::Load0MemDword), w(M::Store0Ebx), w(M::EipUpdate)]),
            (1, &[w(M::Load0Ecx), w(M::Dec), w(M::Store0Ecx), w(M::EipUpdate)]),
        ]);
        assert!(verify(&body.code, &body.handlers, body.slots).is_ok());
        assert_eq!(body.handlers.len(), 1);
        let h = body.handlers[0];
        assert_eq!(h.retired, 1);
        assert_eq!(h.end, h.start + 1);
        assert!(matches!(body.code[h.start], Code::Apply(Fragment::Load(_))));
        // The handler commits EAX and EIP, as they were after instruction 1.
        let commits: Vec<Element> = body.code[h.target..].iter().filter_map(|op| match op {
            Code::Commit(e) => Some(*e),
            _ => None,
        }).collect();
        assert_eq!(commits, vec![Element::Eip, Element::Eax]);
        assert_eq!(body.code.last(), Some(&Code::Rethrow {retired: 1}));
    }

    #[test]
    fn eip_lag_is_added() {
        // Two instructions without an EIP update, then a faulting one.
        let body = body(Mode::Protected, &[
            (2, &[w(M::Clc)]),
            (3, &[w(M::Stc)]),
            (1, &[w(M::Cli)]),
        ]);
        let h = body.handlers[0];
        assert_eq!(h.retired, 2);
        assert_eq!(&body.code[h.target..], &[
            Code::Read(Element::Eip),
            Code::Constant(5),
            Code::Apply(Fragment::Add),
            Code::Apply(Fragment::One),
            Code::Commit(Element::CarryFlag),
            Code::Commit(Element::Eip),
            Code::Rethrow {retired: 2},
        ]);
    }

    #[test]
    fn handlers_restore_ordered_values() {
        // pop eax; mov [0x20], ecx
        let body = body(Mode::Real, &[
            (1, &[w(M::PopO32), w(M::Store0Eax)]),
            (4, &[w(M::Load0Ecx), w(M::MemReset), w(M::AddrId), 0x20, w(M::LoadSegDs), w(M::Store0MemDword)]),
        ]);
        assert_eq!(body.handlers.len(), 2);
        let second = body.handlers[1];
        assert!(body.code[second.target..].iter().any(|op| matches!(op, Code::Restore(_))));
        assert!(verify(&body.code, &body.handlers, body.slots).is_ok());
    }
}
