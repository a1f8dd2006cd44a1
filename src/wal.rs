pub mod record;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::file::FileObject;
use crate::wal::record::Record;

const WAL_PREFIX: &str = "wal.";

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{WAL_PREFIX}{seq}"))
}

/// Append-only transaction journal: a directory of `wal.<seq>` segments
/// with monotonically increasing seq. Records are buffered in memory
/// and hit the disk (append + fsync) once the buffer fills or a commit
/// forces them out; a segment past its size limit is rolled.
pub struct Wal {
    inner: Mutex<WalInner>,
    buffer_records: usize,
    segment_limit: usize,
}

struct WalInner {
    dir: PathBuf,
    seq: u64,
    file: FileObject,
    buffer: Vec<Record>,
}

impl Wal {
    /// Start a fresh log at `wal.0`. The caller is responsible for
    /// having cleared out any previous segments first.
    pub fn create(dir: &Path, buffer_records: usize, segment_limit: usize) -> Result<Self> {
        let path = segment_path(dir, 0);
        let file = FileObject::open_rw(&path)?;
        info!(path = %path.display(), "wal segment opened");
        Ok(Self {
            inner: Mutex::new(WalInner {
                dir: dir.to_path_buf(),
                seq: 0,
                file,
                buffer: Vec::new(),
            }),
            buffer_records,
            segment_limit,
        })
    }

    /// Buffer `records`; encode, append and fsync everything buffered
    /// once the buffer is full or `force` is set.
    pub fn log(&self, records: &[Record], force: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.buffer.extend_from_slice(records);
        if inner.buffer.len() < self.buffer_records && !force {
            return Ok(());
        }
        self.flush_buffer(&mut inner)
    }

    /// Force out whatever is buffered.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.buffer.is_empty() {
            return Ok(());
        }
        self.flush_buffer(&mut inner)
    }

    fn flush_buffer(&self, inner: &mut WalInner) -> Result<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::new();
        for record in inner.buffer.drain(..) {
            record.encode_into(&mut encoded);
        }
        inner.file.append(&encoded)?;
        inner.file.sync()?;

        if inner.file.size() > self.segment_limit as u64 {
            inner.seq += 1;
            let path = segment_path(&inner.dir, inner.seq);
            inner.file = FileObject::open_rw(&path)?;
            debug!(path = %path.display(), "wal segment rolled");
        }
        Ok(())
    }

    /// Read every segment in seq order and bucket the records of
    /// transactions newer than `max_flushed_tranc_id`. The caller
    /// decides which buckets actually committed.
    pub fn recover(dir: &Path, max_flushed_tranc_id: u64) -> Result<BTreeMap<u64, Vec<Record>>> {
        let mut buckets: BTreeMap<u64, Vec<Record>> = BTreeMap::new();
        if !dir.exists() {
            return Ok(buckets);
        }
        let mut segments = Self::segment_files(dir)?;
        segments.sort_by_key(|(seq, _)| *seq);

        for (seq, path) in segments {
            let file = FileObject::open(&path)?;
            let raw = file.read(0, file.size())?;
            let records = Record::decode_all(&raw)?;
            debug!(seq, records = records.len(), "wal segment scanned");
            for record in records {
                if record.tranc_id > max_flushed_tranc_id {
                    buckets.entry(record.tranc_id).or_default().push(record);
                }
            }
        }
        Ok(buckets)
    }

    /// Delete every `wal.<seq>` file in `dir`, after recovery replay.
    pub fn cleanup(dir: &Path) -> Result<()> {
        for (seq, path) in Self::segment_files(dir)? {
            std::fs::remove_file(&path)?;
            debug!(seq, "old wal segment removed");
        }
        Ok(())
    }

    fn segment_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(seq_str) = name.strip_prefix(WAL_PREFIX) else {
                continue;
            };
            match seq_str.parse::<u64>() {
                Ok(seq) => segments.push((seq, entry.path())),
                Err(_) => {
                    warn!(file = %name, "ignoring file with wal prefix but no numeric seq");
                }
            }
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::record::OpType;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_buffers_until_forced() {
        let dir = tempdir().unwrap();
        let wal = Wal::create(dir.path(), 128, 1 << 20).unwrap();
        wal.log(&[Record::put(1, b"k", b"v")], false).unwrap();
        // nothing recoverable yet: still buffered
        assert!(Wal::recover(dir.path(), 0).unwrap().is_empty());

        wal.log(&[Record::commit(1)], true).unwrap();
        let buckets = Wal::recover(dir.path(), 0).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[&1].len(), 2);
        assert_eq!(buckets[&1][1].op, OpType::Commit);
    }

    #[test]
    fn test_buffer_threshold() {
        let dir = tempdir().unwrap();
        let wal = Wal::create(dir.path(), 4, 1 << 20).unwrap();
        for i in 0..3 {
            wal.log(&[Record::put(i + 1, b"k", b"v")], false).unwrap();
        }
        assert!(Wal::recover(dir.path(), 0).unwrap().is_empty());
        // fourth record fills the buffer and everything lands on disk
        wal.log(&[Record::put(4, b"k", b"v")], false).unwrap();
        assert_eq!(Wal::recover(dir.path(), 0).unwrap().len(), 4);
    }

    #[test]
    fn test_segment_rotation_and_ordered_recovery() {
        let dir = tempdir().unwrap();
        // tiny segment limit: every forced write rolls the file
        let wal = Wal::create(dir.path(), 128, 64).unwrap();
        for i in 0..20u64 {
            let records = vec![
                Record::put(i + 1, format!("k{i}").as_bytes(), b"v"),
                Record::commit(i + 1),
            ];
            wal.log(&records, true).unwrap();
        }
        let segments: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("wal.")
            })
            .collect();
        assert!(segments.len() > 1);

        let buckets = Wal::recover(dir.path(), 0).unwrap();
        assert_eq!(buckets.len(), 20);
        // per-transaction order is preserved
        for (tranc_id, records) in buckets {
            assert_eq!(records[0].op, OpType::Put);
            assert_eq!(records[1].op, OpType::Commit);
            assert_eq!(records[0].tranc_id, tranc_id);
        }
    }

    #[test]
    fn test_recover_filters_flushed() {
        let dir = tempdir().unwrap();
        let wal = Wal::create(dir.path(), 1, 1 << 20).unwrap();
        for id in 1..=6u64 {
            wal.log(&[Record::commit(id)], true).unwrap();
        }
        let buckets = Wal::recover(dir.path(), 4).unwrap();
        assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn test_cleanup() {
        let dir = tempdir().unwrap();
        let wal = Wal::create(dir.path(), 1, 64).unwrap();
        for id in 1..=10u64 {
            wal.log(&[Record::commit(id)], true).unwrap();
        }
        drop(wal);
        Wal::cleanup(dir.path()).unwrap();
        assert!(Wal::recover(dir.path(), 0).unwrap().is_empty());
    }
}
