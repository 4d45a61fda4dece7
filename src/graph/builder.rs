use crate::code::{Element, Operand, ELEMENT_COUNT, rules};
use crate::cpu::{Mode};
use crate::error::{CompileError, Result};
use crate::util::{ArrayMap};
use super::{Dataflow, Node, Run};

/// The state that is already committed when an instruction faults: the
/// definitions current at the start of the instruction.
///
/// One `Boundary` is opened per instruction that contains a fault-capable
/// node, and it protects exactly the fault-capable nodes of that instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// The 1-based index of the instruction.
    pub x86_index: u32,
    /// The x86 byte offset of the start of the instruction.
    pub x86_position: u32,
    /// The definitions of committed elements that differ from their entry
    /// values at the start of the instruction, in element order.
    pub snapshot: Vec<(Element, Node)>,
    /// The definition of [`Element::Eip`] at the start of the instruction.
    pub eip: Node,
    /// The number of bytes executed between the point `eip` was defined and
    /// the start of the instruction.
    pub eip_lag: u32,
    /// The fault-capable nodes of the instruction, in order.
    pub nodes: Vec<Node>,
}

/// A [`Dataflow`] graph of a [`Run`], with the information needed to
/// generate code for it.
#[derive(Debug, Clone)]
pub struct Graph {
    pub mode: Mode,
    pub dataflow: Dataflow,
    /// The nodes that have effects or can fault, in program order.
    pub ordered: Vec<Node>,
    /// The final definitions of the committed elements that differ from their
    /// entry values, in element order.
    pub sinks: Vec<(Element, Node)>,
    /// One per instruction that can fault, in order.
    pub boundaries: Vec<Boundary>,
}

/// The definitions of all [`Element`]s at some point in a [`Run`].
type Definitions = ArrayMap<Element, Option<Node>>;

/// The definitions of committed elements that differ from `entry`.
fn changed(current: &Definitions, entry: &Definitions) -> Vec<(Element, Node)> {
    Element::ALL.iter()
        .filter(|e| e.is_committed())
        .filter_map(|&e| match current[e] {
            Some(node) if current[e] != entry[e] => Some((e, node)),
            _ => None,
        })
        .collect()
}

impl Graph {
    /// Walks `run` once, in order, building a [`Node`] for each target of
    /// each microcode.
    pub fn build(mode: Mode, run: &Run) -> Result<Self> {
        let mut dataflow = Dataflow::new();
        let mut current: Definitions = ArrayMap::new(ELEMENT_COUNT);
        let entry_eip = dataflow.add_entry(Element::Eip);
        current[Element::Eip] = Some(entry_eip);
        for &e in Element::ALL.iter().filter(|&&e| e.is_persistent() && e != Element::Eip) {
            current[e] = Some(dataflow.add_entry(e));
        }
        let entry = current.clone();
        let mut ordered = Vec::new();
        let mut boundaries: Vec<Boundary> = Vec::new();
        // Where `EIP` was last defined.
        let mut eip_synced = 0u32;
        // The state at the start of the current instruction.
        let mut start = (0u32, 0u32, current.clone(), entry_eip, 0u32);
        let mut end_of_previous = 0u32;
        for node in run.nodes() {
            if node.x86_index != start.0 {
                let eip = current[Element::Eip].unwrap_or(entry_eip);
                start = (
                    node.x86_index,
                    end_of_previous,
                    current.clone(),
                    eip,
                    end_of_previous.wrapping_sub(eip_synced),
                );
            }
            let microcode = node.microcode()?;
            let targets = rules(mode, microcode).ok_or(CompileError::Unsupported {mode, microcode})?;
            let mut defined = Vec::with_capacity(targets.len());
            for target in &targets {
                let mut ins = Vec::with_capacity(target.inputs.len());
                for &operand in target.inputs {
                    ins.push(match operand {
                        Operand::Element(element) => current[element]
                            .ok_or(CompileError::UndefinedOperand {microcode, element})?,
                        Operand::Immediate => {
                            let value = node.immediate.ok_or(CompileError::MissingImmediate {
                                microcode,
                                x86_index: node.x86_index,
                            })?;
                            dataflow.add_constant(value, node.x86_index)
                        },
                        Operand::X86Length => dataflow.add_constant(
                            node.x86_position.wrapping_sub(eip_synced),
                            node.x86_index,
                        ),
                    });
                }
                let n = dataflow.add_op(microcode, target, node.x86_index, &ins);
                if dataflow.switches_mode(n) && node.x86_index != run.x86_count() {
                    return Err(CompileError::ModeSwitchNotLast {microcode});
                }
                if target.is_ordered() { ordered.push(n); }
                if target.can_fault {
                    if boundaries.last().map_or(true, |b| b.x86_index != node.x86_index) {
                        let (x86_index, x86_position, ref definitions, eip, eip_lag) = start;
                        boundaries.push(Boundary {
                            x86_index,
                            x86_position,
                            snapshot: changed(definitions, &entry),
                            eip,
                            eip_lag,
                            nodes: Vec::new(),
                        });
                    }
                    if let Some(boundary) = boundaries.last_mut() { boundary.nodes.push(n); }
                }
                defined.push((target.element, n));
            }
            for (element, n) in defined {
                current[element] = Some(n);
                if element == Element::Eip { eip_synced = node.x86_position; }
            }
            end_of_previous = node.x86_position;
        }
        let sinks = changed(&current, &entry);
        Ok(Graph {mode, dataflow, ordered, sinks, boundaries})
    }
}

//-----------------------------------------------------------------------------
