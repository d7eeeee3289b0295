// Coverage folder: collapses a set of executed line numbers down to the
// set of block checksums they touch. Pure and stateless, same shape as the
// teacher's `filter_executed_blocks_rust`, generalized to return checksums
// rather than `Block`s -- callers never need the block objects themselves,
// only their fingerprints.

use std::collections::BTreeSet;

use crate::types::{Block, BlockChecksum};

/// Every block with at least one executed line contributes its checksum to
/// the result. A block with zero executed lines contributes nothing, even
/// if it was parsed -- "touched" means "ran", not "exists".
pub fn fold(blocks: &[Block], executed_lines: &BTreeSet<usize>) -> BTreeSet<BlockChecksum> {
    blocks
        .iter()
        .filter(|block| {
            executed_lines
                .range(block.start_line..=block.end_line)
                .next()
                .is_some()
        })
        .map(|block| block.checksum.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockKind;

    fn block(name: &str, start: usize, end: usize, checksum: &str) -> Block {
        Block {
            kind: BlockKind::Function,
            name: name.to_string(),
            start_line: start,
            end_line: end,
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn untouched_block_contributes_nothing() {
        let blocks = vec![block("f", 1, 5, "aaa"), block("g", 6, 10, "bbb")];
        let executed: BTreeSet<usize> = [1, 2, 3].into_iter().collect();
        let folded = fold(&blocks, &executed);
        assert_eq!(folded, ["aaa".to_string()].into_iter().collect());
    }

    #[test]
    fn single_line_hit_is_enough_to_include_whole_block() {
        let blocks = vec![block("f", 1, 100, "aaa")];
        let executed: BTreeSet<usize> = [57].into_iter().collect();
        assert_eq!(fold(&blocks, &executed).len(), 1);
    }

    #[test]
    fn no_executed_lines_yields_empty_set() {
        let blocks = vec![block("f", 1, 5, "aaa")];
        assert!(fold(&blocks, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn overlapping_blocks_each_contribute_independently() {
        let blocks = vec![block("outer", 1, 10, "aaa"), block("inner", 3, 4, "bbb")];
        let executed: BTreeSet<usize> = [3].into_iter().collect();
        let folded = fold(&blocks, &executed);
        assert_eq!(folded.len(), 2);
    }
}
