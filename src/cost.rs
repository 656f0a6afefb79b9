use std::collections::BTreeMap;

use crate::operation::{decode, JitError};

/// Block start pc -> summed gas cost of every instruction up to (but not
/// including) the next block boundary.
pub type BlockCosts = BTreeMap<usize, u64>;

pub fn analyze(code: &[u8]) -> Result<BlockCosts, JitError> {
    let mut costs = BlockCosts::new();
    let mut block_start = 0usize;
    let mut acc = 0u64;
    for op in decode(code) {
        let op = op?;
        if op.operation.is_block_boundary && op.pc != block_start {
            costs.insert(block_start, acc);
            block_start = op.pc;
            acc = 0;
        }
        acc = acc.saturating_add(op.operation.gas_cost);
    }
    if acc > 0 {
        costs.insert(block_start, acc);
    }
    Ok(costs)
}
