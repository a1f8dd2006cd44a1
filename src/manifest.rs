use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::file::FileObject;

pub const TRANC_ID_FILE: &str = "tranc_id";

/// Path of the manifest inside a data directory.
pub fn tranc_id_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TRANC_ID_FILE)
}

/// The transaction watermark file: three u64 words (little-endian):
/// the next tranc id to hand out, the largest id already flushed into
/// an SST, and the largest id that finished (committed or rolled back).
/// Every update goes through the single mutex and is written back
/// immediately.
pub struct Manifest {
    inner: Mutex<ManifestInner>,
}

struct ManifestInner {
    file: FileObject,
    next_tranc_id: u64,
    max_flushed_tranc_id: u64,
    max_finished_tranc_id: u64,
}

impl ManifestInner {
    fn persist(&mut self) -> Result<()> {
        self.file.write_u64(0, self.next_tranc_id)?;
        self.file.write_u64(8, self.max_flushed_tranc_id)?;
        self.file.write_u64(16, self.max_finished_tranc_id)?;
        self.file.sync()
    }
}

impl Manifest {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = tranc_id_path(data_dir);
        let exists = path.exists();
        let file = FileObject::open_rw(&path)?;
        let mut inner = if exists {
            if file.size() < 24 {
                return Err(Error::corruption("tranc_id file", "shorter than 24 bytes"));
            }
            ManifestInner {
                next_tranc_id: file.read_u64(0)?,
                max_flushed_tranc_id: file.read_u64(8)?,
                max_finished_tranc_id: file.read_u64(16)?,
                file,
            }
        } else {
            ManifestInner {
                file,
                next_tranc_id: 1,
                max_flushed_tranc_id: 0,
                max_finished_tranc_id: 0,
            }
        };
        if !exists {
            inner.persist()?;
        }
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    pub fn alloc_tranc_id(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let id = inner.next_tranc_id;
        inner.next_tranc_id += 1;
        inner.persist()?;
        Ok(id)
    }

    /// Make sure the next allocation is above `floor` (recovery replay
    /// re-seeds this from the ids seen in the WAL).
    pub fn bump_next_tranc_id(&self, floor: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.next_tranc_id <= floor {
            inner.next_tranc_id = floor + 1;
            inner.persist()?;
        }
        Ok(())
    }

    pub fn max_flushed_tranc_id(&self) -> u64 {
        self.inner.lock().max_flushed_tranc_id
    }

    pub fn max_finished_tranc_id(&self) -> u64 {
        self.inner.lock().max_finished_tranc_id
    }

    pub fn advance_max_flushed(&self, tranc_id: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if tranc_id > inner.max_flushed_tranc_id {
            inner.max_flushed_tranc_id = tranc_id;
            inner.persist()?;
        }
        Ok(())
    }

    pub fn advance_max_finished(&self, tranc_id: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if tranc_id > inner.max_finished_tranc_id {
            inner.max_finished_tranc_id = tranc_id;
            inner.persist()?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_then_reload() {
        let dir = tempdir().unwrap();
        {
            let manifest = Manifest::open(dir.path()).unwrap();
            assert_eq!(manifest.alloc_tranc_id().unwrap(), 1);
            assert_eq!(manifest.alloc_tranc_id().unwrap(), 2);
            manifest.advance_max_flushed(2).unwrap();
            manifest.advance_max_finished(1).unwrap();
        }
        let manifest = Manifest::open(dir.path()).unwrap();
        assert_eq!(manifest.max_flushed_tranc_id(), 2);
        assert_eq!(manifest.max_finished_tranc_id(), 1);
        assert_eq!(manifest.alloc_tranc_id().unwrap(), 3);
    }

    #[test]
    fn test_watermarks_never_regress() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        manifest.advance_max_flushed(9).unwrap();
        manifest.advance_max_flushed(4).unwrap();
        assert_eq!(manifest.max_flushed_tranc_id(), 9);
    }

    #[test]
    fn test_bump_next() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        manifest.bump_next_tranc_id(10).unwrap();
        assert_eq!(manifest.alloc_tranc_id().unwrap(), 11);
        manifest.bump_next_tranc_id(5).unwrap();
        assert_eq!(manifest.alloc_tranc_id().unwrap(), 12);
    }

    #[test]
    fn test_truncated_file_is_corruption() {
        let dir = tempdir().unwrap();
        std::fs::write(tranc_id_path(dir.path()), [0u8; 10]).unwrap();
        assert!(Manifest::open(dir.path()).is_err());
    }
}
