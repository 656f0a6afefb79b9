// JUMPDEST pcs -> labels, lowered into 2^k buckets keyed by the low k bits.

use std::collections::BTreeMap;

use crate::compiler::Label;

pub const DEFAULT_BUCKET_BITS: u8 = 7;
pub const MAX_BUCKET_BITS: u8 = 16;

#[derive(Debug, Default)]
pub struct JumpResolver {
    destinations: BTreeMap<u32, Label>,
}

impl JumpResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pc: u32, label: Label) {
        self.destinations.insert(pc, label);
    }

    pub fn lower(self, bucket_bits: u8) -> JumpTable {
        let bits = bucket_bits.min(MAX_BUCKET_BITS);
        let mask = (1u32 << bits) - 1;
        let mut buckets: Vec<Vec<(u32, Label)>> = vec![Vec::new(); 1usize << bits];
        for (pc, label) in self.destinations {
            buckets[(pc & mask) as usize].push((pc, label));
        }
        JumpTable {
            mask,
            buckets: buckets.into_iter().map(Vec::into_boxed_slice).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JumpTable {
    mask: u32,
    buckets: Box<[Box<[(u32, Label)]>]>,
}

impl JumpTable {
    pub fn resolve(&self, candidate: u32) -> Option<Label> {
        self.buckets[(candidate & self.mask) as usize]
            .iter()
            .find(|(pc, _)| *pc == candidate)
            .map(|(_, label)| *label)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
