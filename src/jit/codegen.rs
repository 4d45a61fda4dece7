use crate::error::{CompileError, Result};
use crate::graph::{Graph, Kind, Node};
use crate::util::{ArrayMap};
use super::{Code, Slot, HandlerEntry};

/// The output of code generation, before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub code: Vec<Code>,
    pub handlers: Vec<HandlerEntry>,
    pub slots: usize,
}

fn inconsistent<T>(what: &str, node: Node) -> Result<T> {
    Err(CompileError::Rejected(format!("{} {:?}", what, node)))
}

//-----------------------------------------------------------------------------

/// The code generator's working state for one [`Graph`].
pub(super) struct Emitter<'a> {
    pub graph: &'a Graph,
    pub code: Vec<Code>,
    /// Whether each [`Node`] must be kept in a [`Slot`].
    needs_slot: ArrayMap<Node, bool>,
    /// The [`Slot`] assigned to each [`Node`], once it has been emitted.
    pub slot: ArrayMap<Node, Option<Slot>>,
    /// Whether each [`Node`] has been emitted in the main code.
    done: ArrayMap<Node, bool>,
    /// The index of the `Apply` op of each ordered [`Node`].
    pub apply_at: ArrayMap<Node, Option<usize>>,
    num_slots: usize,
}

impl<'a> Emitter<'a> {
    /// Counts uses, and decides which [`Node`]s need [`Slot`]s.
    pub fn new(graph: &'a Graph) -> Self {
        let dataflow = &graph.dataflow;
        let n = dataflow.len();
        // Find the nodes reachable from the main code, and count their uses.
        let mut uses: ArrayMap<Node, usize> = ArrayMap::new(n);
        let mut reached: ArrayMap<Node, bool> = ArrayMap::new(n);
        let mut stack: Vec<Node> = graph.ordered.clone();
        for &(_, node) in &graph.sinks {
            uses[node] += 1;
            stack.push(node);
        }
        while let Some(node) = stack.pop() {
            if reached[node] { continue; }
            reached[node] = true;
            for &input in dataflow.ins(node) {
                uses[input] += 1;
                stack.push(input);
            }
        }
        // Find the ordered nodes that handlers need.
        let mut referenced: ArrayMap<Node, bool> = ArrayMap::new(n);
        let mut stack: Vec<Node> = Vec::new();
        for boundary in &graph.boundaries {
            stack.extend(boundary.snapshot.iter().map(|&(_, node)| node));
            stack.push(boundary.eip);
        }
        while let Some(node) = stack.pop() {
            if referenced[node] { continue; }
            referenced[node] = true;
            if !dataflow.is_ordered(node) { stack.extend(dataflow.ins(node)); }
        }
        let mut needs_slot: ArrayMap<Node, bool> = ArrayMap::new(n);
        for node in dataflow.all_nodes() {
            needs_slot[node] = if dataflow.is_ordered(node) {
                uses[node] >= 1 || referenced[node]
            } else {
                uses[node] >= 2
            };
        }
        Emitter {
            graph,
            code: Vec::new(),
            needs_slot,
            slot: ArrayMap::new(n),
            done: ArrayMap::new(n),
            apply_at: ArrayMap::new(n),
            num_slots: 0,
        }
    }

    /// Emits the op that pushes a leaf [`Node`], or returns `false` if `node`
    /// is not a leaf.
    pub fn emit_leaf(&mut self, node: Node) -> bool {
        match self.graph.dataflow.kind(node) {
            Kind::Entry(element) if element.is_readable() => self.code.push(Code::Read(element)),
            Kind::Entry(_) => self.code.push(Code::Constant(0)),
            Kind::Constant(value) => self.code.push(Code::Constant(value)),
            Kind::Op {..} => return false,
        }
        true
    }

    /// Emits the op for an `Op` [`Node`] whose inputs are on the stack.
    pub fn emit_apply(&mut self, node: Node) -> Result<()> {
        match self.graph.dataflow.kind(node) {
            Kind::Op {fragment, ..} => {
                self.code.push(Code::Apply(fragment));
                Ok(())
            },
            _ => inconsistent("not an op", node),
        }
    }

    /// Records that `node`, now on top of the stack, has been computed.
    fn finish(&mut self, node: Node) {
        self.done[node] = true;
        if self.needs_slot[node] {
            let slot = Slot(self.num_slots);
            self.num_slots += 1;
            self.slot[node] = Some(slot);
            self.code.push(Code::Save(slot));
        }
    }

    /// Emits code to push the value of `root` in the main code. Values that
    /// have already been computed are restored from their [`Slot`]s.
    fn emit(&mut self, root: Node) -> Result<()> {
        let graph = self.graph;
        let dataflow = &graph.dataflow;
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                if dataflow.is_ordered(node) { self.apply_at[node] = Some(self.code.len()); }
                self.emit_apply(node)?;
                self.finish(node);
                continue;
            }
            if self.done[node] {
                match self.slot[node] {
                    Some(slot) => { self.code.push(Code::Restore(slot)); },
                    None => return inconsistent("reused without a slot", node),
                }
                continue;
            }
            if dataflow.is_ordered(node) && node != root {
                return inconsistent("ordered node used before it ran", node);
            }
            if self.emit_leaf(node) {
                self.finish(node);
                continue;
            }
            stack.push((node, true));
            stack.extend(dataflow.ins(node).iter().rev().map(|&input| (input, false)));
        }
        Ok(())
    }

    /// Emits the main code: every ordered [`Node`] in order, then the sinks.
    fn emit_main(&mut self) -> Result<()> {
        let graph = self.graph;
        for &node in &graph.ordered {
            self.emit(node)?;
            self.code.push(Code::Discard);
        }
        for &(_, node) in &graph.sinks {
            self.emit(node)?;
        }
        for &(element, _) in graph.sinks.iter().rev() {
            self.code.push(Code::Commit(element));
        }
        self.code.push(Code::Return);
        Ok(())
    }
}

/// Generates code for `graph`: the main code, followed by one handler body
/// per [`Boundary`].
///
/// [`Boundary`]: crate::graph::Boundary
pub fn generate(graph: &Graph) -> Result<Body> {
    let mut emitter = Emitter::new(graph);
    emitter.emit_main()?;
    let mut handlers = Vec::new();
    for boundary in &graph.boundaries {
        if let Some(entry) = emitter.emit_handler(boundary)? {
            handlers.push(entry);
        }
    }
    Ok(Body {code: emitter.code, handlers, slots: emitter.num_slots})
}
