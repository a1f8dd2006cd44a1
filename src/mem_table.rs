use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::block::cache::BlockCache;
use crate::error::{Error, Result};
use crate::iterators::heap_iterator::{HeapIterator, SearchItem};
use crate::iterators::StorageIterator;
use crate::skiplist::SkipList;
use crate::table::builder::SsTableBuilder;
use crate::table::SsTable;

/// The in-memory write buffer: one mutable skip list plus a FIFO of
/// frozen ones awaiting flush (newest at the front).
///
/// Two locks guard the two halves. Whenever both are taken, the frozen
/// lock comes first; every path here and in the transaction layer
/// follows that order.
pub struct MemTable {
    frozen: RwLock<VecDeque<Arc<SkipList>>>,
    active: RwLock<SkipList>,
    frozen_bytes: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            frozen: RwLock::new(VecDeque::new()),
            active: RwLock::new(SkipList::new()),
            frozen_bytes: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8], tranc_id: u64) {
        self.active.write().put(key, value, tranc_id);
    }

    /// One lock acquisition for the whole batch.
    pub fn put_batch(&self, entries: &[(Bytes, Bytes)], tranc_id: u64) {
        let mut active = self.active.write();
        for (key, value) in entries {
            active.put(key, value, tranc_id);
        }
    }

    /// A remove is a put of the empty tombstone.
    pub fn remove(&self, key: &[u8], tranc_id: u64) {
        self.active.write().put(key, b"", tranc_id);
    }

    pub fn remove_batch(&self, keys: &[Bytes], tranc_id: u64) {
        let mut active = self.active.write();
        for key in keys {
            active.put(key, b"", tranc_id);
        }
    }

    /// Newest visible record for `key`: the active list first, then the
    /// frozen lists newest-first. An empty value is a live tombstone;
    /// the caller decides what absence means.
    pub fn get(&self, key: &[u8], tranc_id: u64) -> Option<(Bytes, u64)> {
        let frozen = self.frozen.read();
        let active = self.active.read();
        if let Some(found) = active.get(key, tranc_id) {
            return Some(found);
        }
        for list in frozen.iter() {
            if let Some(found) = list.get(key, tranc_id) {
                return Some(found);
            }
        }
        None
    }

    /// Atomically retire the active list to the frozen queue and
    /// install a fresh one. A no-op while the active list is empty.
    pub fn freeze(&self) {
        let mut frozen = self.frozen.write();
        let mut active = self.active.write();
        if active.is_empty() {
            return;
        }
        self.frozen_bytes
            .fetch_add(active.size_bytes(), Ordering::Relaxed);
        let retired = std::mem::take(&mut *active);
        frozen.push_front(Arc::new(retired));
    }

    /// Pop the oldest frozen list (freezing the active one first when
    /// the queue is empty) and build it into an SST. Both locks stay
    /// held for the duration so readers never observe the gap between
    /// popping and installing the table.
    pub fn flush_last(
        &self,
        mut builder: SsTableBuilder,
        path: impl AsRef<Path>,
        sst_id: usize,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Arc<SsTable>> {
        let mut frozen = self.frozen.write();
        let mut active = self.active.write();
        if frozen.is_empty() {
            if active.is_empty() {
                return Err(Error::EmptySst);
            }
            self.frozen_bytes
                .fetch_add(active.size_bytes(), Ordering::Relaxed);
            let retired = std::mem::take(&mut *active);
            frozen.push_front(Arc::new(retired));
        }

        let oldest = frozen.back().expect("frozen queue cannot be empty here");
        for (key, value, tranc_id) in oldest.flush() {
            builder.add(&key, &value, tranc_id);
        }
        let sst = Arc::new(builder.build(sst_id, block_cache, path)?);

        let flushed = frozen.pop_back().unwrap();
        self.frozen_bytes
            .fetch_sub(flushed.size_bytes(), Ordering::Relaxed);
        Ok(sst)
    }

    /// Merge the matching range of every list into one heap iterator.
    /// Table rank is the source priority: 0 for the active list, then
    /// the frozen lists newest-first.
    pub fn iter_predicate(
        &self,
        tranc_id: u64,
        predicate: &dyn Fn(&[u8]) -> i32,
    ) -> HeapIterator {
        let frozen = self.frozen.read();
        let active = self.active.read();
        let mut items = Vec::new();
        let mut collect = |list: &SkipList, rank: i64| -> Result<()> {
            if let Some(mut iter) = list.iter_predicate(tranc_id, predicate) {
                while iter.is_valid() {
                    items.push(SearchItem {
                        key: Bytes::copy_from_slice(iter.key()),
                        value: Bytes::copy_from_slice(iter.value()),
                        tranc_id: iter.tranc_id(),
                        level: 0,
                        idx: rank,
                    });
                    iter.next()?;
                }
            }
            Ok(())
        };
        // skip list iteration cannot fail; unwrap keeps the closure tidy
        collect(&active, 0).unwrap();
        for (rank, list) in frozen.iter().enumerate() {
            collect(list, rank as i64 + 1).unwrap();
        }
        // tombstones stay in: they must shadow older values that live
        // in the SSTs, on the far side of the fusing merge
        HeapIterator::new_with_tombstones(items, tranc_id)
    }

    /// Active bytes only, the trigger for freezing.
    pub fn cur_size(&self) -> usize {
        self.active.read().size_bytes()
    }

    /// Active + frozen bytes, the trigger for flushing.
    pub fn total_size(&self) -> usize {
        self.cur_size() + self.frozen_bytes.load(Ordering::Relaxed)
    }

    pub fn frozen_count(&self) -> usize {
        self.frozen.read().len()
    }

    pub fn clear(&self) {
        let mut frozen = self.frozen.write();
        let mut active = self.active.write();
        frozen.clear();
        active.clear();
        self.frozen_bytes.store(0, Ordering::Relaxed);
    }

    /// Exclusive hold over both halves, for commit-time conflict checks
    /// that must stay atomic with the staged writes being applied.
    pub(crate) fn write_guard(&self) -> MemTableWriteGuard<'_> {
        let frozen = self.frozen.write();
        let active = self.active.write();
        MemTableWriteGuard { frozen, active }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct MemTableWriteGuard<'a> {
    frozen: RwLockWriteGuard<'a, VecDeque<Arc<SkipList>>>,
    active: RwLockWriteGuard<'a, SkipList>,
}

impl MemTableWriteGuard<'_> {
    /// Version of the newest record for `key` anywhere in memory.
    pub(crate) fn newest_version_of(&self, key: &[u8]) -> Option<u64> {
        if let Some((_, tranc_id)) = self.active.get(key, 0) {
            return Some(tranc_id);
        }
        for list in self.frozen.iter() {
            if let Some((_, tranc_id)) = list.get(key, 0) {
                return Some(tranc_id);
            }
        }
        None
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8], tranc_id: u64) {
        self.active.put(key, value, tranc_id);
    }
}
