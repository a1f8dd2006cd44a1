use bytes::BufMut;

use crate::error::{Error, Result};

pub mod cache;
pub mod iterator;

pub(crate) const SIZEOF_U16: usize = std::mem::size_of::<u16>();
pub(crate) const SIZEOF_U64: usize = std::mem::size_of::<u64>();

/// A sorted run of `(key, value, tranc_id)` entries plus a trailing
/// offset vector and entry count. Entries are ordered by
/// (key ascending, tranc_id descending); equal-key versions are always
/// adjacent. Capacity is a soft target: a forced append may exceed it so
/// that every version of one key stays in the same block.
///
/// Entry wire format (little-endian):
/// `key_len u16 | key | value_len u16 | value | tranc_id u64`
pub struct Block {
    pub(crate) data: Vec<u8>,
    pub(crate) offsets: Vec<u16>,
    capacity: usize,
}

impl Block {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Current encoded size: payload + offset vector + count word.
    pub fn cur_size(&self) -> usize {
        self.data.len() + self.offsets.len() * SIZEOF_U16 + SIZEOF_U16
    }

    /// Append an entry at the tail. Refuses (returning `false`) when the
    /// block is non-empty, `force` is unset, and the entry would push the
    /// encoded size past capacity.
    pub fn append(&mut self, key: &[u8], value: &[u8], tranc_id: u64, force: bool) -> bool {
        assert!(!key.is_empty(), "key must not be empty");
        let entry_size = SIZEOF_U16 + key.len() + SIZEOF_U16 + value.len() + SIZEOF_U64;
        if !force && !self.is_empty() && self.cur_size() + entry_size + SIZEOF_U16 > self.capacity {
            return false;
        }
        self.offsets.push(self.data.len() as u16);
        self.data.put_u16_le(key.len() as u16);
        self.data.put_slice(key);
        self.data.put_u16_le(value.len() as u16);
        self.data.put_slice(value);
        self.data.put_u64_le(tranc_id);
        true
    }

    /// `data | offsets (u16 le each) | count (u16 le)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.data.clone();
        for offset in &self.offsets {
            buf.put_u16_le(*offset);
        }
        buf.put_u16_le(self.offsets.len() as u16);
        buf
    }

    /// Inverse of `encode`. With `with_hash`, the last four bytes are a
    /// crc32 over the payload and must validate.
    pub fn decode(encoded: &[u8], with_hash: bool) -> Result<Self> {
        let payload = if with_hash {
            if encoded.len() < 4 {
                return Err(Error::corruption("block", "too small for hash"));
            }
            let (payload, hash_raw) = encoded.split_at(encoded.len() - 4);
            let hash = u32::from_le_bytes(hash_raw.try_into().unwrap());
            if crc32fast::hash(payload) != hash {
                return Err(Error::corruption("block", "content hash mismatch"));
            }
            payload
        } else {
            encoded
        };

        if payload.len() < SIZEOF_U16 {
            return Err(Error::corruption("block", "missing entry count"));
        }
        let count =
            u16::from_le_bytes(payload[payload.len() - SIZEOF_U16..].try_into().unwrap()) as usize;
        let offsets_len = count * SIZEOF_U16;
        if payload.len() < SIZEOF_U16 + offsets_len {
            return Err(Error::corruption("block", "offset vector truncated"));
        }
        let data_end = payload.len() - SIZEOF_U16 - offsets_len;
        let offsets: Vec<u16> = payload[data_end..payload.len() - SIZEOF_U16]
            .chunks(SIZEOF_U16)
            .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
            .collect();
        for &offset in &offsets {
            if offset as usize >= data_end {
                return Err(Error::corruption("block", "entry offset out of bounds"));
            }
        }
        let data = payload[..data_end].to_vec();
        let capacity = data_end + offsets_len + SIZEOF_U16;
        Ok(Self {
            data,
            offsets,
            capacity,
        })
    }

    /// Borrow the entry at `idx`. Panics when `idx` is past the end;
    /// callers index through `len()` or a search result.
    pub(crate) fn entry_at(&self, idx: usize) -> (&[u8], &[u8], u64) {
        let offset = self.offsets[idx] as usize;
        let key_len = u16::from_le_bytes(self.data[offset..offset + 2].try_into().unwrap()) as usize;
        let key_start = offset + 2;
        let value_len_at = key_start + key_len;
        let value_len =
            u16::from_le_bytes(self.data[value_len_at..value_len_at + 2].try_into().unwrap())
                as usize;
        let value_start = value_len_at + 2;
        let tranc_at = value_start + value_len;
        let tranc_id =
            u64::from_le_bytes(self.data[tranc_at..tranc_at + 8].try_into().unwrap());
        (
            &self.data[key_start..key_start + key_len],
            &self.data[value_start..value_start + value_len],
            tranc_id,
        )
    }

    pub(crate) fn key_at(&self, idx: usize) -> &[u8] {
        self.entry_at(idx).0
    }

    pub(crate) fn tranc_id_at(&self, idx: usize) -> u64 {
        self.entry_at(idx).2
    }

    pub fn first_key(&self) -> &[u8] {
        self.key_at(0)
    }

    pub fn last_key(&self) -> &[u8] {
        self.key_at(self.len() - 1)
    }

    /// Index of the first entry for `key` visible at `tranc_id`
    /// (largest version `<= tranc_id`, or the newest when `tranc_id` is
    /// zero). The raw landing point of the key search is the newest
    /// version; invisible ones are walked over inside the equal-key run.
    pub fn get(&self, key: &[u8], tranc_id: u64) -> Option<usize> {
        let mut idx = partition_point(self.len(), |i| self.key_at(i) < key);
        if idx >= self.len() || self.key_at(idx) != key {
            return None;
        }
        if tranc_id == 0 {
            return Some(idx);
        }
        while idx < self.len() && self.key_at(idx) == key && self.tranc_id_at(idx) > tranc_id {
            idx += 1;
        }
        if idx < self.len() && self.key_at(idx) == key {
            Some(idx)
        } else {
            None
        }
    }

    /// Half-open index range of the entries whose key matches a
    /// monotone predicate: `0` match, `> 0` target lies to the right,
    /// `< 0` target lies to the left. The match set must be contiguous
    /// over the sorted keys.
    pub fn predicate_range(&self, predicate: &dyn Fn(&[u8]) -> i32) -> Option<(usize, usize)> {
        let start = partition_point(self.len(), |i| predicate(self.key_at(i)) > 0);
        if start >= self.len() || predicate(self.key_at(start)) != 0 {
            return None;
        }
        let end = partition_point(self.len(), |i| predicate(self.key_at(i)) >= 0);
        Some((start, end))
    }
}

/// First index in `0..n` for which `pred` flips to false; `pred` must be
/// monotone (true prefix, false suffix).
pub(crate) fn partition_point(n: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
