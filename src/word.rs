// Stack word: 32 big-endian bytes regardless of host byte order.

use std::fmt;

use primitive_types::U256;

pub const WORD_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C, align(32))]
pub struct Word([u8; WORD_SIZE]);

impl Word {
    pub const ZERO: Word = Word([0u8; WORD_SIZE]);

    pub const fn from_bytes(bytes: [u8; WORD_SIZE]) -> Self {
        Word(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; WORD_SIZE] {
        &self.0
    }

    /// Builds the word for a `width`-byte immediate. When the code ended
    /// early `bytes` is shorter than `width` and the missing low-order bytes
    /// stay zero.
    pub fn from_immediate(bytes: &[u8], width: usize) -> Self {
        debug_assert!(width <= WORD_SIZE && bytes.len() <= width);
        let mut word = Word::ZERO;
        let start = WORD_SIZE - width;
        word.0[start..start + bytes.len()].copy_from_slice(bytes);
        word
    }

    pub fn to_u256(&self) -> U256 {
        let mut limbs = [0u64; 4];
        for (i, chunk) in self.0.chunks_exact(8).enumerate() {
            let mut limb = [0u8; 8];
            limb.copy_from_slice(chunk);
            // U256 keeps its least significant limb first.
            limbs[3 - i] = u64::from_be_bytes(limb);
        }
        U256(limbs)
    }

    pub fn from_u256(value: U256) -> Self {
        let mut word = Word::ZERO;
        for (i, chunk) in word.0.chunks_exact_mut(8).enumerate() {
            chunk.copy_from_slice(&value.0[3 - i].to_be_bytes());
        }
        word
    }

    pub fn clear(&mut self) {
        self.0 = [0u8; WORD_SIZE];
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    // Narrow writes leave the upper bytes untouched; callers write into a
    // zeroed word.

    pub fn set_u8(&mut self, value: u8) {
        self.0[WORD_SIZE - 1] = value;
    }

    pub fn set_u32(&mut self, value: u32) {
        self.0[WORD_SIZE - 4..].copy_from_slice(&value.to_be_bytes());
    }

    pub fn set_u64(&mut self, value: u64) {
        self.0[WORD_SIZE - 8..].copy_from_slice(&value.to_be_bytes());
    }

    pub fn low_u32(&self) -> u32 {
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&self.0[WORD_SIZE - 4..]);
        u32::from_be_bytes(tail)
    }

    pub fn low_u64(&self) -> u64 {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[WORD_SIZE - 8..]);
        u64::from_be_bytes(tail)
    }

    /// True when no bit above the low 32 is set.
    pub fn fits_u32(&self) -> bool {
        self.0[..WORD_SIZE - 4].iter().all(|b| *b == 0)
    }
}

impl From<U256> for Word {
    fn from(value: U256) -> Self {
        Word::from_u256(value)
    }
}

impl From<Word> for U256 {
    fn from(word: Word) -> Self {
        word.to_u256()
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word(0x{:x})", self.to_u256())
    }
}
