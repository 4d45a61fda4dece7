//! Turns a stream of microcodes into a dependency graph.
//!
//! [`Run`] records the microcodes of a run of x86 instructions. [`Graph`]
//! walks the run once and builds a [`Dataflow`] in which every [`Node`] is
//! one definition of one [`Element`](crate::code::Element). Effects and
//! faults are kept in program order, and every instruction that can
//! fault gets a [`Boundary`] describing the state to restore.

mod node;
pub use node::{MicrocodeNode, Run};

mod dataflow;
pub use dataflow::{Dataflow, Node, Kind};

mod builder;
pub use builder::{Graph, Boundary};
