use std::sync::Arc;

use super::SsTable;
use crate::block::iterator::BlockIterator;
use crate::error::Result;
use crate::iterators::{IteratorType, StorageIterator};

/// Cursor over a whole SST: the index of the current block plus a
/// cursor inside it. Exhausting a block loads the next one; the
/// iterator has ended once no block cursor remains or the block index
/// has run past the last block.
pub struct SsTableIterator {
    table: Arc<SsTable>,
    block_iter: Option<BlockIterator>,
    block_idx: usize,
    max_tranc_id: u64,
}

impl SsTableIterator {
    pub fn create_and_seek_to_first(table: Arc<SsTable>, max_tranc_id: u64) -> Result<Self> {
        let mut iter = Self {
            table,
            block_iter: None,
            block_idx: 0,
            max_tranc_id,
        };
        iter.seek_to_block(0)?;
        iter.move_until_valid()?;
        Ok(iter)
    }

    pub fn create_and_seek_to_key(
        table: Arc<SsTable>,
        key: &[u8],
        max_tranc_id: u64,
    ) -> Result<Self> {
        let block_idx = table.find_block_idx(key);
        let mut iter = Self {
            table,
            block_iter: None,
            block_idx,
            max_tranc_id,
        };
        if block_idx < iter.table.num_of_blocks() {
            let block = iter.table.read_block(block_idx)?;
            iter.block_iter = Some(BlockIterator::create_and_seek_to_key(
                block,
                key,
                max_tranc_id,
            ));
        }
        iter.move_until_valid()?;
        Ok(iter)
    }

    fn seek_to_block(&mut self, block_idx: usize) -> Result<()> {
        self.block_idx = block_idx;
        self.block_iter = if block_idx < self.table.num_of_blocks() {
            let block = self.table.read_block(block_idx)?;
            Some(BlockIterator::new(block, 0, self.max_tranc_id))
        } else {
            None
        };
        Ok(())
    }

    /// Roll over empty or exhausted block cursors until one is live.
    fn move_until_valid(&mut self) -> Result<()> {
        while let Some(block_iter) = &self.block_iter {
            if block_iter.is_valid() {
                break;
            }
            if self.block_idx + 1 >= self.table.num_of_blocks() {
                self.block_iter = None;
                break;
            }
            self.seek_to_block(self.block_idx + 1)?;
        }
        Ok(())
    }

}

/// Same table, same block, same in-block cursor.
impl PartialEq for SsTableIterator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.table, &other.table)
            && self.block_idx == other.block_idx
            && self.block_iter == other.block_iter
    }
}

impl Eq for SsTableIterator {}

impl StorageIterator for SsTableIterator {
    fn key(&self) -> &[u8] {
        self.block_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().unwrap().value()
    }

    fn tranc_id(&self) -> u64 {
        self.block_iter.as_ref().unwrap().tranc_id()
    }

    fn is_valid(&self) -> bool {
        self.block_iter
            .as_ref()
            .map(|iter| iter.is_valid())
            .unwrap_or(false)
    }

    fn is_end(&self) -> bool {
        self.block_iter.is_none() || self.block_idx >= self.table.num_of_blocks()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(block_iter) = &mut self.block_iter {
            block_iter.next()?;
        }
        self.move_until_valid()
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::Sst
    }
}
