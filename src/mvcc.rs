pub mod txn;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::LsmEngine;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::wal::record::Record;
use crate::wal::Wal;

use self::txn::{IsolationLevel, Transaction};

/// Hands out monotonic transaction ids and owns the WAL handle and the
/// watermark manifest. One mutex serializes allocation; the watermarks
/// themselves persist through the manifest's own lock.
pub struct TxnManager {
    engine: Arc<LsmEngine>,
    wal: Wal,
    manifest: Arc<Manifest>,
    lock: Mutex<()>,
}

impl TxnManager {
    pub(crate) fn new(engine: Arc<LsmEngine>, wal: Wal) -> Arc<Self> {
        let manifest = engine.manifest();
        Arc::new(Self {
            engine,
            wal,
            manifest,
            lock: Mutex::new(()),
        })
    }

    /// Allocate the next tranc id and build a context around it. The
    /// context journals a synthetic `Create` as its first operation.
    pub fn new_tranc(self: &Arc<Self>, isolation: IsolationLevel) -> Result<Transaction> {
        let _guard = self.lock.lock();
        let tranc_id = self.manifest.alloc_tranc_id()?;
        debug!(tranc_id, ?isolation, "transaction started");
        Ok(Transaction::new(
            tranc_id,
            isolation,
            self.engine.clone(),
            self.clone(),
        ))
    }

    pub(crate) fn write_to_wal(&self, records: &[Record]) -> Result<()> {
        self.wal.log(records, true)
    }

    /// A transaction finished, by commit or rollback.
    pub(crate) fn finish(&self, tranc_id: u64) -> Result<()> {
        self.manifest.advance_max_finished(tranc_id)
    }

    pub(crate) fn max_flushed_tranc_id(&self) -> u64 {
        self.manifest.max_flushed_tranc_id()
    }
}
