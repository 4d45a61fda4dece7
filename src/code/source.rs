/// A rewindable stream of decoded instructions, each expanded into microcode
/// words. This is what the decoder gives the compiler.
pub trait InstructionSource {
    /// Rewinds to before the first instruction.
    fn reset(&mut self);

    /// Advances to the next instruction. Returns `false` if there are none.
    fn next(&mut self) -> bool;

    /// The number of microcode words in the current instruction.
    fn length(&self) -> usize;

    /// The number of x86 bytes in the current instruction.
    fn x86_length(&self) -> u32;

    /// Returns the next microcode word of the current instruction.
    fn microcode(&mut self) -> u32;
}

impl<'a, S: InstructionSource + ?Sized> InstructionSource for &'a mut S {
    fn reset(&mut self) { (**self).reset() }
    fn next(&mut self) -> bool { (**self).next() }
    fn length(&self) -> usize { (**self).length() }
    fn x86_length(&self) -> u32 { (**self).x86_length() }
    fn microcode(&mut self) -> u32 { (**self).microcode() }
}

//-----------------------------------------------------------------------------

/// Replays a stored microcode sequence together with its position table, in
/// which each word is tagged with the x86 byte offset of the end of its
/// instruction. A change of position marks an instruction boundary.
#[derive(Debug, Clone)]
pub struct ArraySource {
    microcodes: Box<[u32]>,
    positions: Box<[u32]>,
    /// The index of the first word of the current instruction.
    start: usize,
    /// The index just after the last word of the current instruction.
    end: usize,
    /// The index of the next word to be read.
    read: usize,
    /// The position of the end of the previous instruction.
    previous: u32,
}

impl ArraySource {
    pub fn new(microcodes: impl Into<Box<[u32]>>, positions: impl Into<Box<[u32]>>) -> Self {
        let microcodes = microcodes.into();
        let positions = positions.into();
        assert_eq!(microcodes.len(), positions.len());
        ArraySource {microcodes, positions, start: 0, end: 0, read: 0, previous: 0}
    }

    /// Constructs an `ArraySource` from `(x86_length, words)` pairs.
    pub fn from_instructions(instructions: &[(u32, &[u32])]) -> Self {
        let mut microcodes = Vec::new();
        let mut positions = Vec::new();
        let mut position = 0u32;
        for &(x86_length, words) in instructions {
            position = position.wrapping_add(x86_length);
            microcodes.extend_from_slice(words);
            positions.extend(words.iter().map(|_| position));
        }
        Self::new(microcodes, positions)
    }

    pub fn microcodes(&self) -> &[u32] { &self.microcodes }

    pub fn positions(&self) -> &[u32] { &self.positions }
}

impl InstructionSource for ArraySource {
    fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.read = 0;
        self.previous = 0;
    }

    fn next(&mut self) -> bool {
        if self.end >= self.microcodes.len() { return false; }
        if self.end > self.start { self.previous = self.positions[self.start]; }
        self.start = self.end;
        let position = self.positions[self.start];
        self.end = self.positions[self.start..].iter()
            .position(|&p| p != position)
            .map_or(self.positions.len(), |n| self.start + n);
        self.read = self.start;
        true
    }

    fn length(&self) -> usize { self.end - self.start }

    fn x86_length(&self) -> u32 {
        self.positions.get(self.start).map_or(0, |&p| p.wrapping_sub(self.previous))
    }

    fn microcode(&mut self) -> u32 {
        let word = self.microcodes[self.read];
        self.read += 1;
        word
    }
}

//-----------------------------------------------------------------------------
