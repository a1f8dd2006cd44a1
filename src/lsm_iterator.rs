use crate::error::Result;
use crate::iterators::heap_iterator::HeapIterator;
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::iterators::{IteratorType, StorageIterator};

type LsmIteratorInner = TwoMergeIterator<HeapIterator, HeapIterator>;

/// The engine's outward-facing scan cursor: the memtable heap fused
/// with the SST heap, with tombstoned keys filtered out after the
/// fusion. Filtering must happen here and not inside the memtable heap,
/// because a memtable tombstone has to survive long enough to shadow
/// the older on-disk value on the other side of the merge.
pub struct LsmIterator {
    inner: LsmIteratorInner,
}

impl LsmIterator {
    pub(crate) fn new(inner: LsmIteratorInner) -> Result<Self> {
        let mut iter = Self { inner };
        iter.move_to_non_delete()?;
        Ok(iter)
    }

    fn move_to_non_delete(&mut self) -> Result<()> {
        while self.inner.is_valid() && self.inner.value().is_empty() {
            self.inner.next()?;
        }
        Ok(())
    }
}

impl StorageIterator for LsmIterator {
    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn tranc_id(&self) -> u64 {
        self.inner.tranc_id()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()?;
        self.move_to_non_delete()
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::Lsm
    }
}
