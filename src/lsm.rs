use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::engine::LsmEngine;
use crate::error::Result;
use crate::lsm_iterator::LsmIterator;
use crate::mvcc::txn::{IsolationLevel, Transaction};
use crate::mvcc::TxnManager;
use crate::options::LsmOptions;
use crate::wal::record::OpType;
use crate::wal::Wal;

/// The public face of the store: owns the engine and the transaction
/// manager, replays the WAL on startup, and vends transaction handles.
pub struct Lsm {
    engine: Arc<LsmEngine>,
    manager: Arc<TxnManager>,
}

impl Lsm {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(dir, LsmOptions::default())
    }

    pub fn open_with_options(dir: impl AsRef<Path>, options: LsmOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let wal_buffer_records = options.wal_buffer_records;
        let wal_segment_limit = options.wal_segment_limit;
        let engine = Arc::new(LsmEngine::open(dir, options)?);
        let manifest = engine.manifest();

        // replay transactions that finished after the last flush but
        // never reached an SST
        let buckets = Wal::recover(dir, manifest.max_flushed_tranc_id())?;
        let mut max_seen_tranc_id = 0;
        let mut replayed = 0usize;
        for (tranc_id, records) in buckets {
            max_seen_tranc_id = max_seen_tranc_id.max(tranc_id);
            if !records.iter().any(|r| r.op == OpType::Commit) {
                warn!(tranc_id, "skipping transaction that was in flight at crash");
                continue;
            }
            for record in &records {
                match record.op {
                    OpType::Put => engine.put(&record.key, &record.value, tranc_id)?,
                    OpType::Delete => engine.remove(&record.key, tranc_id)?,
                    OpType::Create | OpType::Commit | OpType::Rollback => {}
                }
            }
            manifest.advance_max_finished(tranc_id)?;
            replayed += 1;
        }
        if replayed > 0 {
            info!(replayed, "wal recovery replayed committed transactions");
        }
        manifest.bump_next_tranc_id(max_seen_tranc_id)?;

        // recovered state lives in the memtable now; retire the old
        // segments and start the log over
        Wal::cleanup(dir)?;
        let wal = Wal::create(dir, wal_buffer_records, wal_segment_limit)?;
        let manager = TxnManager::new(engine.clone(), wal);

        Ok(Self { engine, manager })
    }

    pub fn begin_transaction(&self, isolation: IsolationLevel) -> Result<Transaction> {
        self.manager.new_tranc(isolation)
    }

    pub fn engine(&self) -> &Arc<LsmEngine> {
        &self.engine
    }

    /* ---------- non-transactional passthroughs (tranc id 0) ---------- */

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.engine.put(key, value, 0)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.engine.get(key, 0)?.map(|(value, _)| value))
    }

    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.engine.remove(key, 0)
    }

    pub fn iter_predicate<F>(&self, predicate: F) -> Result<LsmIterator>
    where
        F: Fn(&[u8]) -> i32,
    {
        self.engine.iter_predicate(0, predicate)
    }

    pub fn flush(&self) -> Result<()> {
        self.engine.flush()
    }
}
