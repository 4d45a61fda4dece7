use std::fmt::{self, Debug, Formatter};

use crate::code::{InstructionSource, Microcode};
use crate::error::{CompileError, Result};
use crate::util::{CommaSeparated};

/// One microcode occurrence in a run, with its place in the x86 code.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct MicrocodeNode {
    /// The microcode word, which might not be a known [`Microcode`].
    pub word: u32,
    /// The word that follows, if the microcode takes an immediate and the
    /// instruction has one.
    pub immediate: Option<u32>,
    /// The x86 byte offset of the end of the instruction, relative to the
    /// start of the run.
    pub x86_position: u32,
    /// The 1-based index of the instruction in the run.
    pub x86_index: u32,
}

impl MicrocodeNode {
    pub fn microcode(&self) -> Result<Microcode> {
        Microcode::try_from(self.word).map_err(|word| CompileError::UnknownMicrocode {
            word,
            x86_index: self.x86_index,
        })
    }
}

impl Debug for MicrocodeNode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match Microcode::try_from(self.word) {
            Ok(m) => write!(f, "{:?}", m)?,
            Err(word) => write!(f, "{:#x}", word)?,
        }
        if let Some(immediate) = self.immediate { write!(f, " {:#x}", immediate)?; }
        write!(f, " @{}#{}", self.x86_position, self.x86_index)
    }
}

//-----------------------------------------------------------------------------

/// A contiguous run of decoded instructions, flattened into
/// [`MicrocodeNode`]s. Also remembers the exact words and position table,
/// which identify the run in the procedure cache.
#[derive(Clone, PartialEq, Eq)]
pub struct Run {
    nodes: Box<[MicrocodeNode]>,
    microcodes: Box<[u32]>,
    positions: Box<[u32]>,
}

impl Run {
    /// Reads at most `limit` instructions from `source`, after rewinding it.
    ///
    /// Fails only if there are no microcodes at all.
    pub fn build(source: &mut dyn InstructionSource, limit: usize) -> Result<Self> {
        source.reset();
        let mut nodes = Vec::new();
        let mut microcodes = Vec::new();
        let mut positions = Vec::new();
        let mut position = 0u32;
        let mut x86_index = 0u32;
        while (x86_index as usize) < limit.max(1) && source.next() {
            position = position.wrapping_add(source.x86_length());
            x86_index += 1;
            let length = source.length();
            let mut read = 0;
            while read < length {
                let word = source.microcode();
                read += 1;
                microcodes.push(word);
                positions.push(position);
                let mut immediate = None;
                if matches!(Microcode::try_from(word), Ok(m) if m.has_immediate()) && read < length {
                    let value = source.microcode();
                    read += 1;
                    microcodes.push(value);
                    positions.push(position);
                    immediate = Some(value);
                }
                nodes.push(MicrocodeNode {word, immediate, x86_position: position, x86_index});
            }
        }
        if nodes.is_empty() { return Err(CompileError::Empty); }
        Ok(Run {
            nodes: nodes.into(),
            microcodes: microcodes.into(),
            positions: positions.into(),
        })
    }

    pub fn nodes(&self) -> &[MicrocodeNode] { &self.nodes }

    /// The raw words, including immediates.
    pub fn microcodes(&self) -> &[u32] { &self.microcodes }

    /// One entry per word of [`microcodes()`](Self::microcodes).
    pub fn positions(&self) -> &[u32] { &self.positions }

    /// The number of x86 instructions covered.
    pub fn x86_count(&self) -> u32 {
        self.nodes.last().map_or(0, |n| n.x86_index)
    }

    /// The number of x86 bytes covered.
    pub fn x86_length(&self) -> u32 {
        self.nodes.last().map_or(0, |n| n.x86_position)
    }

    /// A cheap filter for the procedure cache. It depends only on the words,
    /// so equal hashes do not imply equal runs.
    pub fn hash(&self) -> i32 {
        self.microcodes.iter().fold(0i32, |hash, &word| {
            hash.wrapping_mul(31).wrapping_add(word as i32)
        })
    }

    /// Whether this run has exactly the given words and position table.
    pub fn matches(&self, microcodes: &[u32], positions: &[u32]) -> bool {
        *self.microcodes == *microcodes && *self.positions == *positions
    }
}

impl Debug for Run {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Run[{:?}]", CommaSeparated(|| self.nodes.iter()))
    }
}

//-----------------------------------------------------------------------------
