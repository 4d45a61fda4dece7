use std::sync::{Arc};

use crate::jit::{CodeBlock};

/// A fixed number of rows recording the most recently executed blocks and
/// the addresses at which they ran.
///
/// Rows are numbered from the oldest surviving entry. Indices number every
/// block ever recorded, from zero.
#[derive(Debug)]
pub struct TraceRing {
    blocks: Box<[Option<Arc<dyn CodeBlock>>]>,
    addresses: Box<[u32]>,
    /// The number of blocks ever recorded.
    executed: u64,
}

impl TraceRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        TraceRing {
            blocks: (0..capacity).map(|_| None).collect(),
            addresses: vec![0; capacity].into(),
            executed: 0,
        }
    }

    pub fn capacity(&self) -> usize { self.blocks.len() }

    pub fn executed(&self) -> u64 { self.executed }

    fn is_wrapped(&self) -> bool { self.executed > self.capacity() as u64 }

    /// The number of rows in use.
    pub fn len(&self) -> usize {
        if self.is_wrapped() { self.capacity() } else { self.executed as usize }
    }

    pub fn is_empty(&self) -> bool { self.executed == 0 }

    pub fn record(&mut self, address: u32, block: Arc<dyn CodeBlock>) {
        let i = (self.executed % self.capacity() as u64) as usize;
        self.blocks[i] = Some(block);
        self.addresses[i] = address;
        self.executed += 1;
    }

    pub fn reset(&mut self) {
        for block in self.blocks.iter_mut() { *block = None; }
        self.executed = 0;
    }

    /// Converts a row number to an index into the arrays.
    fn physical(&self, row: usize) -> Option<usize> {
        if row >= self.len() { return None; }
        if !self.is_wrapped() { return Some(row); }
        let capacity = self.capacity();
        Some((row + (self.executed % capacity as u64) as usize) % capacity)
    }

    pub fn address(&self, row: usize) -> Option<u32> {
        self.physical(row).map(|i| self.addresses[i])
    }

    pub fn block(&self, row: usize) -> Option<&Arc<dyn CodeBlock>> {
        self.physical(row).and_then(|i| self.blocks[i].as_ref())
    }

    /// Returns the row holding the block with the given index, or `None` if
    /// it has been overwritten or not recorded yet.
    pub fn row_for_index(&self, index: u64) -> Option<usize> {
        if !self.is_wrapped() {
            return if index < self.executed { Some(index as usize) } else { None };
        }
        let offset = self.executed.checked_sub(index + 1)?;
        let capacity = self.capacity() as u64;
        if offset >= capacity { return None; }
        Some((capacity - 1 - offset) as usize)
    }

    /// Returns the index of the block in `row`.
    pub fn index_number_for_row(&self, row: usize) -> u64 {
        if !self.is_wrapped() { return row as u64; }
        self.executed - self.capacity() as u64 + row as u64
    }
}

//-----------------------------------------------------------------------------
