use std::fmt::{self, Debug, Formatter};

use crate::code::{Element, Fragment, Microcode, Target};
use crate::util::{AsUsize, CommaSeparated};

//-----------------------------------------------------------------------------

/// A node in a [`Dataflow`] graph. Represents one definition of one
/// [`Element`], and the value it computes.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Node(usize);

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "Node({})", self.0)
    }
}

impl AsUsize for Node {
    fn as_usize(self) -> usize { self.0 }
}

/// What a [`Node`] computes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    /// The value of a persistent [`Element`] on entry to the procedure.
    Entry(Element),
    /// A value known at compile time: an immediate or an x86 length.
    Constant(u32),
    /// A [`Target`] of a microcode.
    Op {microcode: Microcode, element: Element, fragment: Fragment},
}

//-----------------------------------------------------------------------------

/// Helper for `<Dataflow as Debug>::fmt()`. Represents a Node.
struct NodeAdapter<'a> {
    dataflow: &'a Dataflow,
    node: Node,
}

impl<'a> Debug for NodeAdapter<'a> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:?} <- {:?} ({:?})",
            self.node,
            self.dataflow.kind(self.node),
            CommaSeparated(|| self.dataflow.ins(self.node)),
        )?;
        if self.dataflow.has_effect(self.node) { f.write_str(" effect")?; }
        if self.dataflow.can_fault(self.node) { f.write_str(" faults")?; }
        Ok(())
    }
}

//-----------------------------------------------------------------------------

/// The information remembered about a [`Node`].
#[derive(Debug, Clone)]
struct Info {
    kind: Kind,
    has_effect: bool,
    can_fault: bool,
    switches_mode: bool,
    /// The instruction that defined the node. `0` for entry values.
    x86_index: u32,
    /// The index in [`Dataflow::ins`] of the first input of the `Node`.
    start_in: usize,
    /// The number of inputs of the `Node`.
    num_ins: usize,
}

/// The dependency graph of one microcode run. The nodes are [`Node`]s, in
/// the order they were created. Every node's inputs were created before it,
/// so the graph is acyclic.
#[derive(Clone, Default)]
pub struct Dataflow {
    /// One per [`Node`].
    nodes: Vec<Info>,
    /// One per input. Connects the input to the [`Node`] that computes it.
    ins: Vec<Node>,
}

impl Dataflow {
    pub fn new() -> Self {
        Dataflow {nodes: Vec::new(), ins: Vec::new()}
    }

    /// Returns the [`Info`] about `node`.
    fn info(&self, node: Node) -> &Info {
        &self.nodes[node.as_usize()]
    }

    pub fn kind(&self, node: Node) -> Kind {
        self.info(node).kind
    }

    /// Returns the [`Node`]s which compute the inputs of `node`.
    pub fn ins(&self, node: Node) -> &[Node] {
        let info = self.info(node);
        &self.ins[info.start_in..][..info.num_ins]
    }

    /// Whether `node` must be evaluated even if its value is never used.
    pub fn has_effect(&self, node: Node) -> bool { self.info(node).has_effect }

    pub fn can_fault(&self, node: Node) -> bool { self.info(node).can_fault }

    pub fn switches_mode(&self, node: Node) -> bool { self.info(node).switches_mode }

    /// Whether `node` must be evaluated in program order relative to the
    /// other ordered nodes.
    pub fn is_ordered(&self, node: Node) -> bool {
        let info = self.info(node);
        info.has_effect || info.can_fault
    }

    /// The 1-based index of the instruction that defined `node`.
    pub fn x86_index(&self, node: Node) -> u32 { self.info(node).x86_index }

    fn push(&mut self, info: Info, ins: &[Node]) -> Node {
        let node = Node(self.nodes.len());
        for &in_ in ins { assert!(in_ < node); }
        self.ins.extend(ins);
        self.nodes.push(info);
        node
    }

    /// Constructs the [`Node`] representing the value of `element` on entry.
    pub fn add_entry(&mut self, element: Element) -> Node {
        assert!(element.is_persistent());
        let start_in = self.ins.len();
        self.push(Info {
            kind: Kind::Entry(element),
            has_effect: false,
            can_fault: false,
            switches_mode: false,
            x86_index: 0,
            start_in,
            num_ins: 0,
        }, &[])
    }

    /// Constructs a [`Node`] representing the compile-time constant `value`.
    pub fn add_constant(&mut self, value: u32, x86_index: u32) -> Node {
        let start_in = self.ins.len();
        self.push(Info {
            kind: Kind::Constant(value),
            has_effect: false,
            can_fault: false,
            switches_mode: false,
            x86_index,
            start_in,
            num_ins: 0,
        }, &[])
    }

    /// Constructs a [`Node`] representing `target` of `microcode` applied to
    /// `ins`.
    pub fn add_op(&mut self, microcode: Microcode, target: &Target, x86_index: u32, ins: &[Node]) -> Node {
        assert_eq!(ins.len(), target.fragment.arity());
        let start_in = self.ins.len();
        self.push(Info {
            kind: Kind::Op {microcode, element: target.element, fragment: target.fragment},
            has_effect: target.has_effect,
            can_fault: target.can_fault,
            switches_mode: target.switches_mode,
            x86_index,
            start_in,
            num_ins: ins.len(),
        }, ins)
    }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Returns all [`Node`]s in the order they were added.
    pub fn all_nodes(&self) -> impl Iterator<Item=Node> {
        (0..self.nodes.len()).map(Node)
    }
}

impl Debug for Dataflow {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.write_str("Dataflow")?;
        f.debug_list().entries(self.all_nodes().map(
            |n| NodeAdapter {dataflow: self, node: n}
        )).finish()
    }
}

//-----------------------------------------------------------------------------
