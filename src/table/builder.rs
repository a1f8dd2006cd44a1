use std::path::Path;
use std::sync::Arc;

use bytes::{BufMut, Bytes};

use super::{BlockMeta, SsTable};
use crate::block::cache::BlockCache;
use crate::block::Block;
use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::file::FileObject;

/// Accumulates sorted `(key, value, tranc_id)` entries into blocks and
/// writes the finished SST in one atomic create + fsync.
///
/// Repeated versions of one key are force-appended into the current
/// block: a key's versions never straddle a block boundary.
pub struct SsTableBuilder {
    block: Block,
    block_capacity: usize,
    data: Vec<u8>,
    pub(crate) meta: Vec<BlockMeta>,
    bloom: Option<BloomFilter>,
    last_key: Bytes,
    min_tranc_id: u64,
    max_tranc_id: u64,
}

impl SsTableBuilder {
    pub fn new(block_capacity: usize) -> Self {
        Self {
            block: Block::new(block_capacity),
            block_capacity,
            data: Vec::new(),
            meta: Vec::new(),
            bloom: None,
            last_key: Bytes::new(),
            min_tranc_id: u64::MAX,
            max_tranc_id: 0,
        }
    }

    pub fn with_bloom(block_capacity: usize, expected_entries: usize, fpr: f64) -> Self {
        let mut builder = Self::new(block_capacity);
        builder.bloom = Some(BloomFilter::new(expected_entries, fpr));
        builder
    }

    pub fn add(&mut self, key: &[u8], value: &[u8], tranc_id: u64) {
        self.min_tranc_id = self.min_tranc_id.min(tranc_id);
        self.max_tranc_id = self.max_tranc_id.max(tranc_id);
        if let Some(bloom) = &mut self.bloom {
            bloom.add(key);
        }

        let same_key = self.last_key == key;
        if !self.block.append(key, value, tranc_id, same_key) {
            self.finish_block();
            let added = self.block.append(key, value, tranc_id, true);
            debug_assert!(added);
        }
        if !same_key {
            self.last_key = Bytes::copy_from_slice(key);
        }
    }

    /// Bytes the SST would roughly occupy right now; used by compaction
    /// to decide when to roll to a new file.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.block.cur_size()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty() && self.block.is_empty()
    }

    /// Seal the pending block: encode it, append its crc32, record its
    /// meta entry.
    fn finish_block(&mut self) {
        if self.block.is_empty() {
            return;
        }
        let sealed = std::mem::replace(&mut self.block, Block::new(self.block_capacity));
        let encoded = sealed.encode();
        self.meta.push(BlockMeta {
            offset: self.data.len(),
            first_key: Bytes::copy_from_slice(sealed.first_key()),
            last_key: Bytes::copy_from_slice(sealed.last_key()),
        });
        let checksum = crc32fast::hash(&encoded);
        self.data.extend(encoded);
        self.data.put_u32_le(checksum);
    }

    /// Assemble and persist:
    /// blocks ‖ meta (+hash) ‖ bloom ‖ trailer. Refuses an empty build.
    pub fn build(
        mut self,
        id: usize,
        block_cache: Option<Arc<BlockCache>>,
        path: impl AsRef<Path>,
    ) -> Result<SsTable> {
        self.finish_block();
        if self.meta.is_empty() {
            return Err(Error::EmptySst);
        }

        let mut buf = self.data;
        let meta_offset = buf.len();
        BlockMeta::encode_block_meta(&self.meta, &mut buf);
        let bloom_offset = buf.len();
        if let Some(bloom) = &self.bloom {
            bloom.encode(&mut buf);
        }
        buf.put_u32_le(meta_offset as u32);
        buf.put_u32_le(bloom_offset as u32);
        let min_tranc_id = if self.min_tranc_id == u64::MAX {
            0
        } else {
            self.min_tranc_id
        };
        buf.put_u64_le(min_tranc_id);
        buf.put_u64_le(self.max_tranc_id);

        let file = FileObject::create(path.as_ref(), buf)?;
        Ok(SsTable {
            file,
            first_key: self.meta.first().unwrap().first_key.clone(),
            last_key: self.meta.last().unwrap().last_key.clone(),
            block_meta: self.meta,
            block_meta_offset: meta_offset,
            id,
            block_cache,
            bloom: self.bloom,
            min_tranc_id,
            max_tranc_id: self.max_tranc_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sst_0000");
        let mut builder = SsTableBuilder::with_bloom(256, 128, 0.01);
        for i in 0..100 {
            builder.add(format!("key_{i:03}").as_bytes(), b"value", 7);
        }
        let sst = builder.build(0, None, &path).unwrap();
        assert!(sst.num_of_blocks() > 1);
        assert_eq!(sst.first_key().as_ref(), b"key_000");
        assert_eq!(sst.last_key().as_ref(), b"key_099");

        let reopened = SsTable::open(0, None, FileObject::open(&path).unwrap()).unwrap();
        assert_eq!(reopened.num_of_blocks(), sst.num_of_blocks());
        assert_eq!(reopened.min_tranc_id(), 7);
        assert_eq!(reopened.max_tranc_id(), 7);
        let (value, tranc_id) = reopened.get(b"key_050", 0).unwrap().unwrap();
        assert_eq!(value.as_ref(), b"value");
        assert_eq!(tranc_id, 7);
        assert!(reopened.get(b"key_999", 0).unwrap().is_none());
    }

    #[test]
    fn test_same_key_versions_share_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sst_0001");
        // tiny blocks so the version run must be force-appended
        let mut builder = SsTableBuilder::new(64);
        builder.add(b"j", b"x", 1);
        for t in (1..40u64).rev() {
            builder.add(b"k", format!("v{t}").as_bytes(), t);
        }
        let sst = builder.build(1, None, &path).unwrap();
        for meta in &sst.block_meta {
            // "k" never spans two blocks
            if meta.first_key.as_ref() == b"k" {
                assert_eq!(meta.last_key.as_ref(), b"k");
            }
        }
        let (value, tranc_id) = sst.get(b"k", 20).unwrap().unwrap();
        assert_eq!(value.as_ref(), b"v20");
        assert_eq!(tranc_id, 20);
    }

    #[test]
    fn test_empty_build_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sst_0002");
        let builder = SsTableBuilder::new(4096);
        assert!(matches!(
            builder.build(2, None, &path),
            Err(Error::EmptySst)
        ));
    }

    #[test]
    fn test_without_bloom() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sst_0003");
        let mut builder = SsTableBuilder::new(4096);
        builder.add(b"a", b"1", 0);
        let sst = builder.build(3, None, &path).unwrap();
        assert!(sst.bloom.is_none());

        let reopened = SsTable::open(3, None, FileObject::open(&path).unwrap()).unwrap();
        assert!(reopened.bloom.is_none());
        assert!(reopened.get(b"a", 0).unwrap().is_some());
    }
}
