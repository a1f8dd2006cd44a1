use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::engine::LsmEngine;
use crate::error::Result;
use crate::mvcc::TxnManager;
use crate::wal::record::Record;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Writes go straight to the engine; reads see the newest state.
    ReadUncommitted,
    /// Writes stage locally; reads see the snapshot at this tranc id.
    ReadCommitted,
    /// Like ReadCommitted, plus reads are pinned on first access and a
    /// commit-time conflict check rejects write-write races.
    RepeatableRead,
    /// Same machinery as RepeatableRead in this engine; there is no
    /// predicate locking beyond the version conflict check.
    Serializable,
}

/// One transaction context. The handle itself is not thread-safe: it
/// lives on a single thread, the engine below it does the cross-thread
/// work.
///
/// The full operation journal (starting with a synthetic `Create`) is
/// what reaches the WAL at commit; staged writes reach the engine only
/// after the journal is durable.
pub struct Transaction {
    tranc_id: u64,
    isolation: IsolationLevel,
    engine: Arc<LsmEngine>,
    manager: Arc<TxnManager>,
    operations: Vec<Record>,
    /// Pre-images for ReadUncommitted undo: value and version, or None
    /// when the key did not exist before this transaction touched it.
    rollback_map: HashMap<Bytes, Option<(Bytes, u64)>>,
    /// Pinned first reads for RepeatableRead and Serializable.
    read_map: HashMap<Bytes, Option<(Bytes, u64)>>,
    /// Staged writes for every level above ReadUncommitted. An empty
    /// value is a staged delete.
    write_map: HashMap<Bytes, Bytes>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(
        tranc_id: u64,
        isolation: IsolationLevel,
        engine: Arc<LsmEngine>,
        manager: Arc<TxnManager>,
    ) -> Self {
        Self {
            tranc_id,
            isolation,
            engine,
            manager,
            operations: vec![Record::create(tranc_id)],
            rollback_map: HashMap::new(),
            read_map: HashMap::new(),
            write_map: HashMap::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.tranc_id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!self.finished, "transaction already finished");
        self.operations.push(Record::put(self.tranc_id, key, value));

        if self.isolation == IsolationLevel::ReadUncommitted {
            // first touch captures the pre-image for abort
            if !self.rollback_map.contains_key(key) {
                let previous = self.engine.get(key, 0)?;
                self.rollback_map
                    .insert(Bytes::copy_from_slice(key), previous);
            }
            return self.engine.put(key, value, self.tranc_id);
        }
        self.write_map
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        Ok(())
    }

    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        assert!(!self.finished, "transaction already finished");
        self.operations.push(Record::delete(self.tranc_id, key));

        if self.isolation == IsolationLevel::ReadUncommitted {
            if !self.rollback_map.contains_key(key) {
                let previous = self.engine.get(key, 0)?;
                self.rollback_map
                    .insert(Bytes::copy_from_slice(key), previous);
            }
            return self.engine.remove(key, self.tranc_id);
        }
        self.write_map
            .insert(Bytes::copy_from_slice(key), Bytes::new());
        Ok(())
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        assert!(!self.finished, "transaction already finished");

        if self.isolation != IsolationLevel::ReadUncommitted {
            if let Some(staged) = self.write_map.get(key) {
                if staged.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(staged.clone()));
            }
        }

        match self.isolation {
            IsolationLevel::ReadUncommitted => {
                Ok(self.engine.get(key, 0)?.map(|(value, _)| value))
            }
            IsolationLevel::ReadCommitted => Ok(self
                .engine
                .get(key, self.tranc_id)?
                .map(|(value, _)| value)),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                if let Some(pinned) = self.read_map.get(key) {
                    return Ok(pinned.as_ref().map(|(value, _)| value.clone()));
                }
                let found = self.engine.get(key, self.tranc_id)?;
                self.read_map
                    .insert(Bytes::copy_from_slice(key), found.clone());
                Ok(found.map(|(value, _)| value))
            }
        }
    }

    /// Make the transaction durable and visible. Returns `Ok(false)`
    /// when the conflict check loses: some staged key already has a
    /// newer committed version, and the transaction has rolled back.
    pub fn commit(&mut self) -> Result<bool> {
        assert!(!self.finished, "transaction already finished");

        if self.isolation == IsolationLevel::ReadUncommitted {
            // writes were applied all along; only the journal remains
            self.operations.push(Record::commit(self.tranc_id));
            self.manager.write_to_wal(&self.operations)?;
            self.manager.finish(self.tranc_id)?;
            self.finished = true;
            return Ok(true);
        }

        let check_conflicts = matches!(
            self.isolation,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        );

        // exclusive hold across check and apply: nothing may commit a
        // competing version in between
        let mut guard = self.engine.memtable.write_guard();

        if check_conflicts {
            for key in self.write_map.keys() {
                let newest = match guard.newest_version_of(key) {
                    Some(version) => Some(version),
                    None if self.tranc_id < self.manager.max_flushed_tranc_id() => self
                        .engine
                        .get_from_ssts(key, 0)?
                        .map(|(_, version)| version),
                    None => None,
                };
                if newest.is_some_and(|version| version > self.tranc_id) {
                    drop(guard);
                    debug!(tranc_id = self.tranc_id, "commit conflict, rolling back");
                    self.operations.push(Record::rollback(self.tranc_id));
                    self.manager.write_to_wal(&self.operations)?;
                    self.manager.finish(self.tranc_id)?;
                    self.finished = true;
                    return Ok(false);
                }
            }
        }

        self.operations.push(Record::commit(self.tranc_id));
        // journal first: the writes below must never outlive a lost log
        self.manager.write_to_wal(&self.operations)?;
        for (key, value) in &self.write_map {
            guard.put(key, value, self.tranc_id);
        }
        drop(guard);

        self.manager.finish(self.tranc_id)?;
        self.finished = true;
        Ok(true)
    }

    /// Throw the transaction away. ReadUncommitted restores every
    /// touched key from its recorded pre-image; the staging levels just
    /// drop their maps.
    pub fn abort(&mut self) -> Result<()> {
        assert!(!self.finished, "transaction already finished");
        self.abort_inner()
    }

    fn abort_inner(&mut self) -> Result<()> {
        if self.isolation == IsolationLevel::ReadUncommitted {
            for (key, previous) in std::mem::take(&mut self.rollback_map) {
                match previous {
                    Some((value, version)) => self.engine.put(&key, &value, version)?,
                    None => self.engine.remove(&key, self.tranc_id)?,
                }
            }
        } else {
            self.write_map.clear();
            self.read_map.clear();
        }
        self.operations.push(Record::rollback(self.tranc_id));
        self.manager.write_to_wal(&self.operations)?;
        self.manager.finish(self.tranc_id)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction {
    /// A handle dropped mid-flight aborts, so ReadUncommitted writes
    /// never leak past a forgotten commit.
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.abort_inner() {
                warn!(tranc_id = self.tranc_id, error = %e, "abort on drop failed");
            }
        }
    }
}
