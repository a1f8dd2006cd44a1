use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::block::cache::BlockCache;
use crate::block::partition_point;
use crate::error::Result;
use crate::file::FileObject;
use crate::iterators::heap_iterator::{HeapIterator, SearchItem};
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::lsm_iterator::LsmIterator;
use crate::manifest::Manifest;
use crate::mem_table::MemTable;
use crate::options::LsmOptions;
use crate::table::builder::SsTableBuilder;
use crate::table::SsTable;

/// Which SSTs live where. L0 is newest-first and may overlap itself;
/// levels >= 1 are non-overlapping and ordered by first key, which is
/// also build order.
pub(crate) struct LevelState {
    pub(crate) l0: Vec<usize>,
    pub(crate) levels: BTreeMap<usize, Vec<usize>>,
    pub(crate) sstables: HashMap<usize, Arc<SsTable>>,
}

impl LevelState {
    fn new() -> Self {
        Self {
            l0: Vec::new(),
            levels: BTreeMap::new(),
            sstables: HashMap::new(),
        }
    }
}

/// The storage engine proper: memtable, level index, block cache and
/// data directory. Every operation takes an explicit `tranc_id`; zero
/// means non-transactional (read the newest, write without a version).
pub struct LsmEngine {
    pub(crate) memtable: MemTable,
    pub(crate) state: RwLock<LevelState>,
    block_cache: Arc<BlockCache>,
    path: PathBuf,
    pub(crate) options: Arc<LsmOptions>,
    next_sst_id: AtomicUsize,
    manifest: Arc<Manifest>,
}

fn path_of_sst_static(path: &Path, sst_id: usize) -> PathBuf {
    path.join(format!("sst_{sst_id:04}"))
}

impl LsmEngine {
    /// Open a data directory: create it if missing, otherwise register
    /// every `sst_NNNN` file at level 0, newest id first.
    pub fn open(path: impl AsRef<Path>, options: LsmOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let manifest = Arc::new(Manifest::open(&path)?);
        let block_cache = Arc::new(BlockCache::new(
            options.block_cache_capacity,
            options.block_cache_k,
        ));

        let mut state = LevelState::new();
        let mut max_sst_id = None;
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(id_str) = file_name.to_string_lossy().strip_prefix("sst_").map(String::from)
            else {
                continue;
            };
            let Ok(sst_id) = id_str.parse::<usize>() else {
                continue;
            };
            let file = FileObject::open(&entry.path())?;
            let sst = Arc::new(SsTable::open(sst_id, Some(block_cache.clone()), file)?);
            state.sstables.insert(sst_id, sst);
            state.l0.push(sst_id);
            max_sst_id = Some(max_sst_id.unwrap_or(0).max(sst_id));
        }
        state.l0.sort_unstable_by(|a, b| b.cmp(a));
        if !state.l0.is_empty() {
            info!(ssts = state.l0.len(), dir = %path.display(), "loaded data directory");
        }

        Ok(Self {
            memtable: MemTable::new(),
            state: RwLock::new(state),
            block_cache,
            path,
            options: Arc::new(options),
            next_sst_id: AtomicUsize::new(max_sst_id.map_or(0, |id| id + 1)),
            manifest,
        })
    }

    pub(crate) fn path_of_sst(&self, sst_id: usize) -> PathBuf {
        path_of_sst_static(&self.path, sst_id)
    }

    pub(crate) fn alloc_sst_id(&self) -> usize {
        self.next_sst_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn new_builder(&self) -> SsTableBuilder {
        if self.options.enable_bloom {
            SsTableBuilder::with_bloom(
                self.options.block_capacity,
                self.options.bloom_expected_entries,
                self.options.bloom_false_positive_rate,
            )
        } else {
            SsTableBuilder::new(self.options.block_capacity)
        }
    }

    pub fn manifest(&self) -> Arc<Manifest> {
        self.manifest.clone()
    }

    pub fn block_cache(&self) -> Arc<BlockCache> {
        self.block_cache.clone()
    }

    /* ------------------------- write path ------------------------- */

    pub fn put(&self, key: &[u8], value: &[u8], tranc_id: u64) -> Result<()> {
        assert!(!key.is_empty(), "key must not be empty");
        self.memtable.put(key, value, tranc_id);
        self.try_flush()
    }

    pub fn put_batch(&self, entries: &[(Bytes, Bytes)], tranc_id: u64) -> Result<()> {
        self.memtable.put_batch(entries, tranc_id);
        self.try_flush()
    }

    /// Deletion is an empty-valued tombstone at `tranc_id`.
    pub fn remove(&self, key: &[u8], tranc_id: u64) -> Result<()> {
        assert!(!key.is_empty(), "key must not be empty");
        self.memtable.remove(key, tranc_id);
        self.try_flush()
    }

    pub fn remove_batch(&self, keys: &[Bytes], tranc_id: u64) -> Result<()> {
        self.memtable.remove_batch(keys, tranc_id);
        self.try_flush()
    }

    fn try_flush(&self) -> Result<()> {
        if self.memtable.total_size() >= self.options.memtable_size_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Move the oldest memtable list into a fresh L0 SST. When L0 has
    /// hit its file limit, compact it away first.
    pub fn flush(&self) -> Result<()> {
        if self.memtable.total_size() == 0 {
            return Ok(());
        }
        let l0_count = self.state.read().l0.len();
        if l0_count >= self.options.level0_file_limit {
            self.full_compact(0)?;
        }

        let sst_id = self.alloc_sst_id();
        let sst = self.memtable.flush_last(
            self.new_builder(),
            self.path_of_sst(sst_id),
            sst_id,
            Some(self.block_cache.clone()),
        )?;
        self.manifest.advance_max_flushed(sst.max_tranc_id())?;
        debug!(
            sst_id,
            bytes = sst.table_size(),
            max_tranc_id = sst.max_tranc_id(),
            "flushed memtable to L0"
        );

        let mut state = self.state.write();
        state.sstables.insert(sst_id, sst);
        state.l0.insert(0, sst_id);
        Ok(())
    }

    /* ------------------------- read path -------------------------- */

    /// Newest record visible at `tranc_id`: memtable, then L0 newest
    /// first, then each deeper level. A visible tombstone means the key
    /// is gone.
    pub fn get(&self, key: &[u8], tranc_id: u64) -> Result<Option<(Bytes, u64)>> {
        let found = match self.memtable.get(key, tranc_id) {
            Some(found) => Some(found),
            None => self.get_from_ssts(key, tranc_id)?,
        };
        // an empty value is a visible tombstone: the key is gone
        Ok(found.filter(|(value, _)| !value.is_empty()))
    }

    /// Newest visible record in the SSTs alone, tombstones included.
    /// Also the commit-time conflict probe, which needs the version of
    /// whatever is newest regardless of liveness.
    pub(crate) fn get_from_ssts(&self, key: &[u8], tranc_id: u64) -> Result<Option<(Bytes, u64)>> {
        let (l0_handles, leveled_handles) = self.snapshot_handles();

        for sst in &l0_handles {
            if let Some(found) = sst.get(key, tranc_id)? {
                return Ok(Some(found));
            }
        }

        for (_, handles) in &leveled_handles {
            // non-overlapping: at most one SST per level can hold the key
            let idx = partition_point(handles.len(), |i| handles[i].last_key().as_ref() < key);
            if idx >= handles.len() || handles[idx].first_key().as_ref() > key {
                continue;
            }
            if let Some(found) = handles[idx].get(key, tranc_id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Scan the contiguous key run matching a monotone predicate,
    /// fusing the memtable (priority) with every SST through a heap.
    pub fn iter_predicate<F>(&self, tranc_id: u64, predicate: F) -> Result<LsmIterator>
    where
        F: Fn(&[u8]) -> i32,
    {
        let mem_iter = self.memtable.iter_predicate(tranc_id, &predicate);

        let (l0_handles, leveled_handles) = self.snapshot_handles();
        let mut items = Vec::new();
        for sst in &l0_handles {
            // newer L0 tables carry larger ids; negating makes them win
            for (key, value, entry_tranc_id) in sst.predicate_entries(&predicate)? {
                items.push(SearchItem {
                    key,
                    value,
                    tranc_id: entry_tranc_id,
                    level: 0,
                    idx: -(sst.sst_id() as i64),
                });
            }
        }
        for (level, handles) in &leveled_handles {
            for sst in handles {
                for (key, value, entry_tranc_id) in sst.predicate_entries(&predicate)? {
                    items.push(SearchItem {
                        key,
                        value,
                        tranc_id: entry_tranc_id,
                        level: *level,
                        idx: sst.sst_id() as i64,
                    });
                }
            }
        }
        LsmIterator::new(TwoMergeIterator::create(
            mem_iter,
            HeapIterator::new(items, tranc_id),
        )?)
    }

    /// Clone the SST handles out of the level index so reads never hold
    /// the state lock across file I/O.
    #[allow(clippy::type_complexity)]
    fn snapshot_handles(&self) -> (Vec<Arc<SsTable>>, Vec<(usize, Vec<Arc<SsTable>>)>) {
        let state = self.state.read();
        let l0 = state
            .l0
            .iter()
            .map(|id| state.sstables[id].clone())
            .collect();
        let leveled = state
            .levels
            .iter()
            .map(|(level, ids)| {
                (
                    *level,
                    ids.iter().map(|id| state.sstables[id].clone()).collect(),
                )
            })
            .collect();
        (l0, leveled)
    }

    /* ------------------------- maintenance ------------------------ */

    /// Drop everything: memtable contents, the level index, and the SST
    /// files on disk.
    pub fn clear(&self) -> Result<()> {
        self.memtable.clear();
        let ids: Vec<usize> = {
            let mut state = self.state.write();
            let ids = state.sstables.keys().copied().collect();
            state.l0.clear();
            state.levels.clear();
            state.sstables.clear();
            ids
        };
        for sst_id in ids {
            std::fs::remove_file(self.path_of_sst(sst_id))?;
        }
        Ok(())
    }

    pub fn total_mem_size(&self) -> usize {
        self.memtable.total_size()
    }
}

impl Drop for LsmEngine {
    /// Drain the memtable so nothing committed lives only in memory,
    /// then leave the watermarks on disk.
    fn drop(&mut self) {
        while self.memtable.total_size() > 0 {
            if let Err(e) = self.flush() {
                error!(error = %e, "flush on shutdown failed");
                break;
            }
        }
        if let Err(e) = self.manifest.sync() {
            error!(error = %e, "manifest sync on shutdown failed");
        }
    }
}
