use std::sync::Arc;

use super::{IteratorType, StorageIterator};
use crate::error::Result;
use crate::table::iterator::SsTableIterator;
use crate::table::SsTable;

/// Ordered pass over a sequence of SSTs whose key ranges do not
/// overlap, i.e. a level >= 1. Only one SST iterator is open at a time;
/// exhausting it rolls over to the next table.
pub struct SstConcatIterator {
    current: Option<SsTableIterator>,
    next_sst_idx: usize,
    sstables: Vec<Arc<SsTable>>,
    max_tranc_id: u64,
}

impl SstConcatIterator {
    fn check_sst_valid(sstables: &[Arc<SsTable>]) {
        for pair in sstables.windows(2) {
            debug_assert!(pair[0].last_key() < pair[1].first_key());
        }
    }

    pub fn create_and_seek_to_first(
        sstables: Vec<Arc<SsTable>>,
        max_tranc_id: u64,
    ) -> Result<Self> {
        Self::check_sst_valid(&sstables);
        let mut iter = Self {
            current: None,
            next_sst_idx: 0,
            sstables,
            max_tranc_id,
        };
        iter.move_until_valid()?;
        Ok(iter)
    }

    pub fn create_and_seek_to_key(
        sstables: Vec<Arc<SsTable>>,
        key: &[u8],
        max_tranc_id: u64,
    ) -> Result<Self> {
        Self::check_sst_valid(&sstables);
        let idx = crate::block::partition_point(sstables.len(), |i| {
            sstables[i].last_key().as_ref() < key
        });
        let mut iter = Self {
            current: None,
            next_sst_idx: idx,
            sstables,
            max_tranc_id,
        };
        if idx < iter.sstables.len() {
            iter.current = Some(SsTableIterator::create_and_seek_to_key(
                iter.sstables[idx].clone(),
                key,
                max_tranc_id,
            )?);
            iter.next_sst_idx = idx + 1;
        }
        iter.move_until_valid()?;
        Ok(iter)
    }

    /// Open successive SSTs until one yields a live entry.
    fn move_until_valid(&mut self) -> Result<()> {
        loop {
            if let Some(current) = &self.current {
                if current.is_valid() {
                    break;
                }
            }
            if self.next_sst_idx >= self.sstables.len() {
                self.current = None;
                break;
            }
            self.current = Some(SsTableIterator::create_and_seek_to_first(
                self.sstables[self.next_sst_idx].clone(),
                self.max_tranc_id,
            )?);
            self.next_sst_idx += 1;
        }
        Ok(())
    }
}

impl StorageIterator for SstConcatIterator {
    fn key(&self) -> &[u8] {
        self.current.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().unwrap().value()
    }

    fn tranc_id(&self) -> u64 {
        self.current.as_ref().unwrap().tranc_id()
    }

    fn is_valid(&self) -> bool {
        self.current
            .as_ref()
            .map(|iter| iter.is_valid())
            .unwrap_or(false)
    }

    fn next(&mut self) -> Result<()> {
        if let Some(current) = &mut self.current {
            current.next()?;
        }
        self.move_until_valid()
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::SstConcat
    }
}
