use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::LsmEngine;
use crate::error::Result;
use crate::iterators::concat_iterator::SstConcatIterator;
use crate::iterators::heap_iterator::{HeapIterator, SearchItem};
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::iterators::StorageIterator;
use crate::table::iterator::SsTableIterator;
use crate::table::SsTable;

impl LsmEngine {
    /// Merge every SST at `src_level` with `src_level + 1`, replacing
    /// both with a fresh non-overlapping run at the lower level. When
    /// the destination itself is over budget it is compacted first, so
    /// the merge below never lands on an oversized level.
    ///
    /// The swap is atomic for readers: old tables answer queries until
    /// the level index flips under the write lock, and their files are
    /// unlinked only afterwards.
    pub fn full_compact(&self, src_level: usize) -> Result<()> {
        let dst_level = src_level + 1;
        let dst_over_budget = {
            let state = self.state.read();
            state
                .levels
                .get(&dst_level)
                .is_some_and(|ids| ids.len() >= self.options.level_size_ratio)
        };
        if dst_over_budget {
            self.full_compact(dst_level)?;
        }

        let (src_handles, dst_handles) = {
            let state = self.state.read();
            let src: Vec<Arc<SsTable>> = if src_level == 0 {
                state.l0.iter().map(|id| state.sstables[id].clone()).collect()
            } else {
                state
                    .levels
                    .get(&src_level)
                    .map(|ids| ids.iter().map(|id| state.sstables[id].clone()).collect())
                    .unwrap_or_default()
            };
            let dst: Vec<Arc<SsTable>> = state
                .levels
                .get(&dst_level)
                .map(|ids| ids.iter().map(|id| state.sstables[id].clone()).collect())
                .unwrap_or_default();
            (src, dst)
        };
        if src_handles.is_empty() {
            return Ok(());
        }

        // tombstones may only be dropped when nothing deeper could still
        // hold an older value for the key
        let bottom_level = {
            let state = self.state.read();
            !state
                .levels
                .range(dst_level + 1..)
                .any(|(_, ids)| !ids.is_empty())
        };

        debug!(
            src_level,
            dst_level,
            src = src_handles.len(),
            dst = dst_handles.len(),
            bottom_level,
            "compaction started"
        );

        let target_size = self.target_sst_size(dst_level);
        let new_ssts = if src_level == 0 {
            // L0 overlaps itself, so its side is a heap merge
            let mut items = Vec::new();
            for sst in &src_handles {
                let mut iter = SsTableIterator::create_and_seek_to_first(sst.clone(), 0)?;
                while iter.is_valid() {
                    items.push(SearchItem {
                        key: bytes::Bytes::copy_from_slice(iter.key()),
                        value: bytes::Bytes::copy_from_slice(iter.value()),
                        tranc_id: iter.tranc_id(),
                        level: 0,
                        idx: -(sst.sst_id() as i64),
                    });
                    iter.next()?;
                }
            }
            let src_iter = HeapIterator::new_with_tombstones(items, 0);
            let dst_iter = SstConcatIterator::create_and_seek_to_first(dst_handles.clone(), 0)?;
            let merged = TwoMergeIterator::create(src_iter, dst_iter)?;
            self.gen_ssts_from_iter(merged, target_size, bottom_level)?
        } else {
            let src_iter = SstConcatIterator::create_and_seek_to_first(src_handles.clone(), 0)?;
            let dst_iter = SstConcatIterator::create_and_seek_to_first(dst_handles.clone(), 0)?;
            let merged = TwoMergeIterator::create(src_iter, dst_iter)?;
            self.gen_ssts_from_iter(merged, target_size, bottom_level)?
        };

        let old_ids: Vec<usize> = src_handles
            .iter()
            .chain(dst_handles.iter())
            .map(|sst| sst.sst_id())
            .collect();
        let new_ids: Vec<usize> = new_ssts.iter().map(|sst| sst.sst_id()).collect();

        {
            let mut state = self.state.write();
            for id in &old_ids {
                state.sstables.remove(id);
            }
            if src_level == 0 {
                state.l0.clear();
            } else {
                state.levels.remove(&src_level);
            }
            for sst in new_ssts {
                state.sstables.insert(sst.sst_id(), sst);
            }
            if new_ids.is_empty() {
                state.levels.remove(&dst_level);
            } else {
                state.levels.insert(dst_level, new_ids.clone());
            }
        }
        for id in &old_ids {
            std::fs::remove_file(self.path_of_sst(*id))?;
        }

        info!(src_level, dst_level, old = old_ids.len(), new = new_ids.len(), "compaction done");
        Ok(())
    }

    /// Byte budget of one SST at `level`.
    fn target_sst_size(&self, level: usize) -> usize {
        self.options.memtable_size_limit * self.options.level_size_ratio.pow(level as u32)
    }

    /// Drain a merged iterator into builders, sealing a new SST each
    /// time the running size passes `target_size`. An SST is never cut
    /// between two versions of one key, which keeps level runs strictly
    /// non-overlapping.
    pub(crate) fn gen_ssts_from_iter(
        &self,
        mut iter: impl StorageIterator,
        target_size: usize,
        drop_tombstones: bool,
    ) -> Result<Vec<Arc<SsTable>>> {
        let mut new_ssts = Vec::new();
        let mut builder: Option<crate::table::builder::SsTableBuilder> = None;
        let mut last_key: Vec<u8> = Vec::new();

        while iter.is_valid() {
            if drop_tombstones && iter.value().is_empty() {
                iter.next()?;
                continue;
            }
            let same_as_last_key = iter.key() == last_key.as_slice();
            if let Some(inner) = &builder {
                if inner.estimated_size() >= target_size && !same_as_last_key {
                    let sst_id = self.alloc_sst_id();
                    let sealed = builder.take().unwrap().build(
                        sst_id,
                        Some(self.block_cache()),
                        self.path_of_sst(sst_id),
                    )?;
                    new_ssts.push(Arc::new(sealed));
                }
            }
            let inner = builder.get_or_insert_with(|| self.new_builder());
            inner.add(iter.key(), iter.value(), iter.tranc_id());
            if !same_as_last_key {
                last_key.clear();
                last_key.extend_from_slice(iter.key());
            }
            iter.next()?;
        }

        if let Some(builder) = builder {
            let sst_id = self.alloc_sst_id();
            let sealed = builder.build(sst_id, Some(self.block_cache()), self.path_of_sst(sst_id))?;
            new_ssts.push(Arc::new(sealed));
        }
        Ok(new_ssts)
    }
}
