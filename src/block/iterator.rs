use std::sync::Arc;

use super::{partition_point, Block};
use crate::error::Result;
use crate::iterators::{IteratorType, StorageIterator};

/// Cursor over a block's entries, optionally bounded to an index range
/// and filtered to versions visible at `max_tranc_id` (zero disables
/// the filter, which also keeps every version visible to compaction).
pub struct BlockIterator {
    block: Arc<Block>,
    idx: usize,
    end_idx: usize,
    max_tranc_id: u64,
}

impl BlockIterator {
    pub fn new(block: Arc<Block>, idx: usize, max_tranc_id: u64) -> Self {
        let end_idx = block.len();
        let mut iter = Self {
            block,
            idx,
            end_idx,
            max_tranc_id,
        };
        iter.skip_invisible();
        iter
    }

    /// Bounded cursor over `[start, end)`, as produced by a predicate
    /// range search.
    pub fn new_range(block: Arc<Block>, start: usize, end: usize, max_tranc_id: u64) -> Self {
        debug_assert!(start <= end && end <= block.len());
        let mut iter = Self {
            block,
            idx: start,
            end_idx: end,
            max_tranc_id,
        };
        iter.skip_invisible();
        iter
    }

    /// Seek to the first visible entry with key >= `key`.
    pub fn create_and_seek_to_key(block: Arc<Block>, key: &[u8], max_tranc_id: u64) -> Self {
        let idx = partition_point(block.len(), |i| block.key_at(i) < key);
        Self::new(block, idx, max_tranc_id)
    }

    fn skip_invisible(&mut self) {
        if self.max_tranc_id == 0 {
            return;
        }
        while self.idx < self.end_idx && self.block.tranc_id_at(self.idx) > self.max_tranc_id {
            self.idx += 1;
        }
    }
}

/// Same block, same cursor position.
impl PartialEq for BlockIterator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block) && self.idx == other.idx
    }
}

impl Eq for BlockIterator {}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        self.block.entry_at(self.idx).0
    }

    fn value(&self) -> &[u8] {
        self.block.entry_at(self.idx).1
    }

    fn tranc_id(&self) -> u64 {
        self.block.entry_at(self.idx).2
    }

    fn is_valid(&self) -> bool {
        self.idx < self.end_idx
    }

    fn next(&mut self) -> Result<()> {
        self.idx += 1;
        self.skip_invisible();
        Ok(())
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Arc<Block> {
        let mut block = Block::new(4096);
        assert!(block.append(b"a", b"1", 9, false));
        assert!(block.append(b"a", b"0", 2, false));
        assert!(block.append(b"b", b"2", 5, false));
        assert!(block.append(b"c", b"3", 1, false));
        Arc::new(block)
    }

    #[test]
    fn test_full_scan() {
        let mut iter = BlockIterator::new(sample_block(), 0, 0);
        let mut seen = Vec::new();
        while iter.is_valid() {
            seen.push((iter.key().to_vec(), iter.tranc_id()));
            iter.next().unwrap();
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), 9),
                (b"a".to_vec(), 2),
                (b"b".to_vec(), 5),
                (b"c".to_vec(), 1),
            ]
        );
        assert!(iter.is_end());
    }

    #[test]
    fn test_seek_and_visibility() {
        let mut iter = BlockIterator::create_and_seek_to_key(sample_block(), b"a", 4);
        // the tranc 9 version of "a" is invisible at snapshot 4
        assert_eq!(iter.key(), b"a");
        assert_eq!(iter.tranc_id(), 2);
        iter.next().unwrap();
        // "b" at tranc 5 is invisible too
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn test_seek_past_end() {
        let iter = BlockIterator::create_and_seek_to_key(sample_block(), b"zzz", 0);
        assert!(!iter.is_valid());
    }
}
