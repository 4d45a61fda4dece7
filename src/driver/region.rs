use std::sync::{Arc};

use indexmap::{IndexMap};

use crate::code::{InstructionSource};
use crate::cpu::{SubMode};
use crate::jit::{CodeBlock, Compiler};
use super::{CodeRegion};

/// Provides the microcode for the instructions starting at a given offset.
pub trait Decoder {
    fn decode(&mut self, sub_mode: SubMode, offset: u32) -> Box<dyn InstructionSource>;
}

/// Provides a block that interprets the instructions starting at a given
/// offset. Used when they cannot be compiled.
pub trait Fallback {
    fn interpreted(&mut self, sub_mode: SubMode, offset: u32) -> Arc<dyn CodeBlock>;
}

/// A [`CodeRegion`] that compiles blocks when they are first asked for, and
/// remembers them until [`invalidate()`](Self::invalidate) is called.
#[derive(Debug)]
pub struct LazyRegion<D, F> {
    compiler: Arc<Compiler>,
    decoder: D,
    fallback: F,
    blocks: IndexMap<(SubMode, u32), Arc<dyn CodeBlock>>,
}

impl<D: Decoder, F: Fallback> LazyRegion<D, F> {
    pub fn new(compiler: Arc<Compiler>, decoder: D, fallback: F) -> Self {
        LazyRegion {compiler, decoder, fallback, blocks: IndexMap::new()}
    }

    /// Forgets all blocks, e.g. because the memory has been written.
    pub fn invalidate(&mut self) { self.blocks.clear(); }

    /// The number of blocks remembered.
    pub fn len(&self) -> usize { self.blocks.len() }

    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

    fn block(&mut self, sub_mode: SubMode, offset: u32) -> Arc<dyn CodeBlock> {
        if let Some(block) = self.blocks.get(&(sub_mode, offset)) {
            return block.clone();
        }
        let mut source = self.decoder.decode(sub_mode, offset);
        let block: Arc<dyn CodeBlock> = match self.compiler.get(sub_mode.mode(), &mut *source) {
            Some(procedure) => procedure,
            None => self.fallback.interpreted(sub_mode, offset),
        };
        self.blocks.insert((sub_mode, offset), block.clone());
        block
    }
}

impl<D: Decoder, F: Fallback> CodeRegion for LazyRegion<D, F> {
    fn real_procedure(&mut self, offset: u32) -> Arc<dyn CodeBlock> {
        self.block(SubMode::Real, offset)
    }

    fn protected_procedure(&mut self, offset: u32, size_32: bool) -> Arc<dyn CodeBlock> {
        let sub_mode = if size_32 { SubMode::Protected32 } else { SubMode::Protected16 };
        self.block(sub_mode, offset)
    }

    fn virtual8086_procedure(&mut self, offset: u32) -> Arc<dyn CodeBlock> {
        self.block(SubMode::Virtual8086, offset)
    }
}

//-----------------------------------------------------------------------------
