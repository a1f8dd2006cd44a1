use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A file handle with positional reads, fixed-width word access and
/// append. SSTs use the create/read path, the WAL and the manifest use
/// the read-write path.
pub struct FileObject {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileObject {
    /// Write `data` as the whole file content, fsync it, and reopen the
    /// result read-only.
    pub fn create(path: &Path, data: Vec<u8>) -> Result<Self> {
        std::fs::write(path, &data)?;
        File::open(path)?.sync_all()?;
        Ok(Self {
            file: File::options().read(true).write(false).open(path)?,
            path: path.to_path_buf(),
            size: data.len() as u64,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options().read(true).write(false).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Open (creating if absent) for positional reads and writes.
    pub fn open_rw(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut data = vec![0; len as usize];
        self.file.read_exact_at(&mut data[..], offset)?;
        Ok(data)
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.file.write_all_at(&value.to_le_bytes(), offset)?;
        self.size = self.size.max(offset + 8);
        Ok(())
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all_at(data, self.size)?;
        self.size += data.len() as u64;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file from disk, consuming the handle.
    pub fn delete(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        let file = FileObject::create(&path, b"hello world".to_vec()).unwrap();
        assert_eq!(file.size(), 11);
        assert_eq!(file.read(6, 5).unwrap(), b"world");
    }

    #[test]
    fn test_append_and_words() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        let mut file = FileObject::open_rw(&path).unwrap();
        file.append(b"abc").unwrap();
        file.append(b"def").unwrap();
        file.sync().unwrap();
        assert_eq!(file.read(0, 6).unwrap(), b"abcdef");

        file.write_u64(8, 42).unwrap();
        assert_eq!(file.read_u64(8).unwrap(), 42);
        assert_eq!(file.size(), 16);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone");
        let file = FileObject::create(&path, vec![1, 2, 3]).unwrap();
        file.delete().unwrap();
        assert!(!path.exists());
    }
}
