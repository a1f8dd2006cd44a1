use bytes::Bytes;
use tempfile::tempdir;

use crate::lsm::Lsm;
use crate::manifest::Manifest;
use crate::mvcc::txn::IsolationLevel;
use crate::options::LsmOptions;

fn open_store(dir: &std::path::Path) -> Lsm {
    Lsm::open_with_options(dir, LsmOptions::small_for_tests()).unwrap()
}

/// Dropping the store flushes on shutdown; leaking it is the closest
/// thing to pulling the plug mid-run.
fn crash(store: Lsm) {
    std::mem::forget(store);
}

#[test]
fn test_committed_transaction_survives_crash() {
    super::common::init_tracing();
    let dir = tempdir().unwrap();
    {
        let store = open_store(dir.path());
        let mut t = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        t.put(b"k1", b"v1").unwrap();
        assert!(t.commit().unwrap());
        crash(store);
    }

    let store = open_store(dir.path());
    assert_eq!(store.get(b"k1").unwrap(), Some(Bytes::from_static(b"v1")));
}

#[test]
fn test_uncommitted_transaction_is_not_replayed() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(dir.path());
        let mut committed = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        committed.put(b"keep", b"v").unwrap();
        assert!(committed.commit().unwrap());

        // rolled back: its journal carries no Commit record
        let mut aborted = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        aborted.put(b"discard", b"v").unwrap();
        aborted.abort().unwrap();
        crash(store);
    }

    let store = open_store(dir.path());
    assert_eq!(store.get(b"keep").unwrap(), Some(Bytes::from_static(b"v")));
    assert!(store.get(b"discard").unwrap().is_none());
}

#[test]
fn test_recovery_skips_flushed_transactions() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(dir.path());
        let mut t = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        t.put(b"flushed", b"v1").unwrap();
        assert!(t.commit().unwrap());
        store.flush().unwrap();

        let mut t = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        t.put(b"memory", b"v2").unwrap();
        assert!(t.commit().unwrap());
        crash(store);
    }

    let store = open_store(dir.path());
    // both reads work: one from the SST, one replayed from the WAL
    assert_eq!(
        store.get(b"flushed").unwrap(),
        Some(Bytes::from_static(b"v1"))
    );
    assert_eq!(
        store.get(b"memory").unwrap(),
        Some(Bytes::from_static(b"v2"))
    );
}

#[test]
fn test_replayed_deletes_apply() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(dir.path());
        store.put(b"k", b"v").unwrap();
        store.flush().unwrap();

        let mut t = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        t.remove(b"k").unwrap();
        assert!(t.commit().unwrap());
        crash(store);
    }

    let store = open_store(dir.path());
    assert!(store.get(b"k").unwrap().is_none());
}

#[test]
fn test_old_segments_replaced_after_recovery() {
    let dir = tempdir().unwrap();
    {
        let mut options = LsmOptions::small_for_tests();
        // tiny segments: every few commits roll the log
        options.wal_segment_limit = 128;
        let store = Lsm::open_with_options(dir.path(), options).unwrap();
        for i in 0..20 {
            let mut t = store
                .begin_transaction(IsolationLevel::ReadCommitted)
                .unwrap();
            t.put(format!("k{i}").as_bytes(), b"v").unwrap();
            assert!(t.commit().unwrap());
        }
        let segments = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("wal.")
            })
            .count();
        assert!(segments > 1);
        crash(store);
    }
    {
        let _store = open_store(dir.path());
        // recovery replaced every old segment with a fresh wal.0
        let segments: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("wal."))
            .collect();
        assert_eq!(segments, vec!["wal.0".to_string()]);
    }
}

#[test]
fn test_tranc_ids_continue_after_recovery() {
    let dir = tempdir().unwrap();
    let last_id = {
        let store = open_store(dir.path());
        let mut t = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        t.put(b"k", b"v").unwrap();
        assert!(t.commit().unwrap());
        let id = t.id();
        crash(store);
        id
    };

    let store = open_store(dir.path());
    let t = store
        .begin_transaction(IsolationLevel::ReadCommitted)
        .unwrap();
    assert!(t.id() > last_id);
}

#[test]
fn test_manifest_watermarks_after_clean_shutdown() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(dir.path());
        let mut t = store
            .begin_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        t.put(b"k", b"v").unwrap();
        assert!(t.commit().unwrap());
        store.flush().unwrap();
        // clean drop: engine drains and syncs the manifest
    }
    let manifest = Manifest::open(dir.path()).unwrap();
    assert!(manifest.max_flushed_tranc_id() >= 1);
    assert!(manifest.max_finished_tranc_id() >= 1);
}
