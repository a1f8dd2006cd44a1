pub mod builder;
pub mod iterator;

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};

use crate::block::cache::BlockCache;
use crate::block::iterator::BlockIterator;
use crate::block::{partition_point, Block};
use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::file::FileObject;
use crate::iterators::StorageIterator;

/// Fixed trailer: meta_offset u32 | bloom_offset u32 | min_tranc_id u64
/// | max_tranc_id u64, little-endian.
pub(crate) const TRAILER_SIZE: u64 = 4 + 4 + 8 + 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    /// Byte offset of the block inside the SST file.
    pub(crate) offset: usize,
    pub(crate) first_key: Bytes,
    pub(crate) last_key: Bytes,
}

impl BlockMeta {
    /// `num u32 | { offset u32, first_key_len u16, first_key,
    /// last_key_len u16, last_key }* | hash32`, little-endian.
    pub fn encode_block_meta(block_meta: &[BlockMeta], buf: &mut Vec<u8>) {
        let original_len = buf.len();
        buf.put_u32_le(block_meta.len() as u32);
        for meta in block_meta {
            buf.put_u32_le(meta.offset as u32);
            buf.put_u16_le(meta.first_key.len() as u16);
            buf.put_slice(&meta.first_key);
            buf.put_u16_le(meta.last_key.len() as u16);
            buf.put_slice(&meta.last_key);
        }
        let hash = crc32fast::hash(&buf[original_len..]);
        buf.put_u32_le(hash);
    }

    pub fn decode_block_meta(mut buf: &[u8]) -> Result<Vec<BlockMeta>> {
        if buf.len() < 8 {
            return Err(Error::corruption("sst meta", "region truncated"));
        }
        let checksum = crc32fast::hash(&buf[..buf.len() - 4]);
        let stored = u32::from_le_bytes(buf[buf.len() - 4..].try_into().unwrap());
        if checksum != stored {
            return Err(Error::corruption("sst meta", "checksum mismatch"));
        }
        buf = &buf[..buf.len() - 4];

        let num = buf.get_u32_le() as usize;
        let mut block_meta = Vec::with_capacity(num);
        for _ in 0..num {
            if buf.remaining() < 6 {
                return Err(Error::corruption("sst meta", "entry truncated"));
            }
            let offset = buf.get_u32_le() as usize;
            let first_key_len = buf.get_u16_le() as usize;
            if buf.remaining() < first_key_len + 2 {
                return Err(Error::corruption("sst meta", "first key truncated"));
            }
            let first_key = buf.copy_to_bytes(first_key_len);
            let last_key_len = buf.get_u16_le() as usize;
            if buf.remaining() < last_key_len {
                return Err(Error::corruption("sst meta", "last key truncated"));
            }
            let last_key = buf.copy_to_bytes(last_key_len);
            block_meta.push(BlockMeta {
                offset,
                first_key,
                last_key,
            });
        }
        Ok(block_meta)
    }
}

/// An immutable sorted table on disk: blocks (each followed by a crc32),
/// the meta index, an optional bloom filter, and the trailer.
pub struct SsTable {
    pub(crate) file: FileObject,
    pub(crate) block_meta: Vec<BlockMeta>,
    pub(crate) block_meta_offset: usize,
    id: usize,
    block_cache: Option<Arc<BlockCache>>,
    first_key: Bytes,
    last_key: Bytes,
    pub(crate) bloom: Option<BloomFilter>,
    min_tranc_id: u64,
    max_tranc_id: u64,
}

impl SsTable {
    /// Open an SST file: read the trailer, validate and load the meta
    /// region, and decode the bloom filter when one is present (the
    /// bloom region is empty exactly when `bloom_offset` abuts the
    /// trailer).
    pub fn open(id: usize, block_cache: Option<Arc<BlockCache>>, file: FileObject) -> Result<Self> {
        let len = file.size();
        if len < TRAILER_SIZE {
            return Err(Error::corruption("sst", "file smaller than trailer"));
        }
        let trailer = file.read(len - TRAILER_SIZE, TRAILER_SIZE)?;
        let mut trailer = &trailer[..];
        let block_meta_offset = trailer.get_u32_le() as u64;
        let bloom_offset = trailer.get_u32_le() as u64;
        let min_tranc_id = trailer.get_u64_le();
        let max_tranc_id = trailer.get_u64_le();

        if block_meta_offset > bloom_offset || bloom_offset + TRAILER_SIZE > len {
            return Err(Error::corruption("sst", "trailer offsets out of bounds"));
        }

        let bloom = if bloom_offset + TRAILER_SIZE < len {
            let raw_bloom = file.read(bloom_offset, len - TRAILER_SIZE - bloom_offset)?;
            Some(BloomFilter::decode(&raw_bloom)?)
        } else {
            None
        };

        let raw_meta = file.read(block_meta_offset, bloom_offset - block_meta_offset)?;
        let block_meta = BlockMeta::decode_block_meta(&raw_meta)?;
        if block_meta.is_empty() {
            return Err(Error::corruption("sst", "no blocks"));
        }

        Ok(Self {
            file,
            first_key: block_meta.first().unwrap().first_key.clone(),
            last_key: block_meta.last().unwrap().last_key.clone(),
            block_meta,
            block_meta_offset: block_meta_offset as usize,
            id,
            block_cache,
            bloom,
            min_tranc_id,
            max_tranc_id,
        })
    }

    /// Read one block, through the cache when it is attached.
    pub fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        assert!(block_idx < self.num_of_blocks(), "block index out of range");
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.get(self.id, block_idx) {
                return Ok(block);
            }
        }
        let start = self.block_meta[block_idx].offset as u64;
        let end = self
            .block_meta
            .get(block_idx + 1)
            .map(|meta| meta.offset)
            .unwrap_or(self.block_meta_offset) as u64;
        let raw = self.file.read(start, end - start)?;
        let block = Arc::new(Block::decode(&raw, true)?);
        if let Some(cache) = &self.block_cache {
            cache.put(self.id, block_idx, block.clone());
        }
        Ok(block)
    }

    /// Index of the first block whose key range may hold `key`;
    /// `num_of_blocks()` when every block ends before it.
    pub fn find_block_idx(&self, key: &[u8]) -> usize {
        partition_point(self.block_meta.len(), |i| {
            self.block_meta[i].last_key.as_ref() < key
        })
    }

    /// Point lookup with MVCC visibility. Quick-rejects through the
    /// key range, the tranc range and the bloom filter before touching
    /// any block.
    pub fn get(&self, key: &[u8], tranc_id: u64) -> Result<Option<(Bytes, u64)>> {
        if key < self.first_key.as_ref() || key > self.last_key.as_ref() {
            return Ok(None);
        }
        if tranc_id != 0 && self.min_tranc_id > tranc_id {
            // every version here is newer than the snapshot
            return Ok(None);
        }
        if let Some(bloom) = &self.bloom {
            if !bloom.may_contain(key) {
                return Ok(None);
            }
        }
        let block_idx = self.find_block_idx(key);
        if block_idx >= self.num_of_blocks() {
            return Ok(None);
        }
        let block = self.read_block(block_idx)?;
        Ok(block.get(key, tranc_id).map(|idx| {
            let (_, value, entry_tranc_id) = block.entry_at(idx);
            (Bytes::copy_from_slice(value), entry_tranc_id)
        }))
    }

    /// Every entry whose key matches a monotone predicate, in order.
    /// Visibility is left to the consuming heap.
    pub fn predicate_entries(
        &self,
        predicate: &dyn Fn(&[u8]) -> i32,
    ) -> Result<Vec<(Bytes, Bytes, u64)>> {
        let mut entries = Vec::new();
        let start = partition_point(self.block_meta.len(), |i| {
            predicate(&self.block_meta[i].last_key) > 0
        });
        for block_idx in start..self.num_of_blocks() {
            if predicate(&self.block_meta[block_idx].first_key) < 0 {
                break;
            }
            let block = self.read_block(block_idx)?;
            if let Some((lo, hi)) = block.predicate_range(predicate) {
                let mut iter = BlockIterator::new_range(block.clone(), lo, hi, 0);
                while iter.is_valid() {
                    entries.push((
                        Bytes::copy_from_slice(iter.key()),
                        Bytes::copy_from_slice(iter.value()),
                        iter.tranc_id(),
                    ));
                    iter.next()?;
                }
            }
        }
        Ok(entries)
    }

    pub fn first_key(&self) -> &Bytes {
        &self.first_key
    }

    pub fn last_key(&self) -> &Bytes {
        &self.last_key
    }

    pub fn num_of_blocks(&self) -> usize {
        self.block_meta.len()
    }

    pub fn table_size(&self) -> u64 {
        self.file.size()
    }

    pub fn sst_id(&self) -> usize {
        self.id
    }

    pub fn min_tranc_id(&self) -> u64 {
        self.min_tranc_id
    }

    pub fn max_tranc_id(&self) -> u64 {
        self.max_tranc_id
    }
}
