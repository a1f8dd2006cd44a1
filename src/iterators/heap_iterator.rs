use std::cmp::Reverse;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::error::Result;
use crate::iterators::{IteratorType, StorageIterator};

/// One entry pulled from a memtable list or an SST, tagged with where it
/// came from. `level` is the LSM level (0 for memtable lists and L0) and
/// `idx` the source priority inside that level: more recent sources get
/// smaller values, which is why L0 SST ids are negated by the caller:
/// the newest (largest) id must win ties.
#[derive(Clone, Debug)]
pub struct SearchItem {
    pub key: Bytes,
    pub value: Bytes,
    pub tranc_id: u64,
    pub level: usize,
    pub idx: i64,
}

impl Ord for SearchItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.tranc_id.cmp(&self.tranc_id))
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for SearchItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SearchItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for SearchItem {}

/// N-way fusion over tagged items. For each key only the winning item
/// (smallest in the `(key, -tranc_id, level, idx)` order) is emitted;
/// the losers are discarded on advance, so consecutive outputs carry
/// strictly increasing keys.
///
/// On the read path the constructor also normalizes the front: versions
/// above `max_tranc_id` are invisible, and a key whose winning visible
/// version is a tombstone disappears entirely. Compaction instead keeps
/// tombstone winners, since deeper levels may still hold older values
/// the tombstone has to shadow.
pub struct HeapIterator {
    items: BinaryHeap<Reverse<SearchItem>>,
    max_tranc_id: u64,
    keep_tombstones: bool,
}

impl HeapIterator {
    pub fn new(items: Vec<SearchItem>, max_tranc_id: u64) -> Self {
        let mut iter = Self {
            items: items.into_iter().map(Reverse).collect(),
            max_tranc_id,
            keep_tombstones: false,
        };
        iter.normalize();
        iter
    }

    /// Tombstone-preserving variant: winners are still deduplicated and
    /// visibility-filtered, but a tombstone winner is emitted instead of
    /// swallowing its key. Compaction sources need this (deeper levels
    /// may hold older values the tombstone shadows), and so does the
    /// memtable side of a fused scan, where the shadowed values live in
    /// a different iterator entirely.
    pub fn new_with_tombstones(items: Vec<SearchItem>, max_tranc_id: u64) -> Self {
        let mut iter = Self {
            items: items.into_iter().map(Reverse).collect(),
            max_tranc_id,
            keep_tombstones: true,
        };
        iter.normalize();
        iter
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pop until a visible, live winner sits on top (or nothing does).
    fn normalize(&mut self) {
        while let Some(Reverse(top)) = self.items.peek() {
            if self.max_tranc_id != 0 && top.tranc_id > self.max_tranc_id {
                self.items.pop();
                continue;
            }
            if top.value.is_empty() && !self.keep_tombstones {
                let deleted = top.key.clone();
                while self
                    .items
                    .peek()
                    .is_some_and(|Reverse(item)| item.key == deleted)
                {
                    self.items.pop();
                }
                continue;
            }
            break;
        }
    }

    fn top(&self) -> &SearchItem {
        let Reverse(item) = self.items.peek().expect("heap iterator past the end");
        item
    }
}

impl StorageIterator for HeapIterator {
    fn key(&self) -> &[u8] {
        &self.top().key
    }

    fn value(&self) -> &[u8] {
        &self.top().value
    }

    fn tranc_id(&self) -> u64 {
        self.top().tranc_id
    }

    fn is_valid(&self) -> bool {
        !self.items.is_empty()
    }

    fn next(&mut self) -> Result<()> {
        let Some(Reverse(current)) = self.items.pop() else {
            return Ok(());
        };
        // losers of the current key are discarded wholesale
        while self
            .items
            .peek()
            .is_some_and(|Reverse(item)| item.key == current.key)
        {
            self.items.pop();
        }
        self.normalize();
        Ok(())
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::Heap
    }
}
