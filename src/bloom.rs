use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Probabilistic membership filter over the keys of one SST.
///
/// Double hashing: `h_i(key) = h1(key) + i * h2(key) (mod num_bits)`,
/// where `h1` is the 64-bit farmhash fingerprint of the key and `h2`
/// the fingerprint of the key with a fixed salt appended.
pub struct BloomFilter {
    expected_elements: u64,
    false_positive_rate: f64,
    num_bits: u64,
    num_hashes: u64,
    bits: Vec<u8>,
}

const SALT: &[u8] = b"salt";

fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = farmhash::fingerprint64(key);
    let mut salted = Vec::with_capacity(key.len() + SALT.len());
    salted.extend_from_slice(key);
    salted.extend_from_slice(SALT);
    let h2 = farmhash::fingerprint64(&salted);
    (h1, h2)
}

impl BloomFilter {
    pub fn new(expected_elements: usize, false_positive_rate: f64) -> Self {
        let n = expected_elements.max(1) as f64;
        let num_bits = (-(n * false_positive_rate.ln()) / std::f64::consts::LN_2.powi(2)).ceil();
        let num_bits = (num_bits as u64).max(64);
        let num_hashes = ((num_bits as f64 / n) * std::f64::consts::LN_2).round() as u64;
        let num_hashes = num_hashes.clamp(1, 30);
        Self {
            expected_elements: expected_elements as u64,
            false_positive_rate,
            num_bits,
            num_hashes,
            bits: vec![0; num_bits.div_ceil(8) as usize],
        }
    }

    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2))) % self.num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2))) % self.num_bits;
            if self.bits[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.expected_elements);
        buf.put_f64_le(self.false_positive_rate);
        buf.put_u64_le(self.num_bits);
        buf.put_u64_le(self.num_hashes);
        buf.extend_from_slice(&self.bits);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < 32 {
            return Err(Error::corruption("bloom filter", "header truncated"));
        }
        let expected_elements = buf.get_u64_le();
        let false_positive_rate = buf.get_f64_le();
        let num_bits = buf.get_u64_le();
        let num_hashes = buf.get_u64_le();
        let num_bytes = num_bits.div_ceil(8) as usize;
        if num_bits == 0 || num_hashes == 0 || buf.remaining() < num_bytes {
            return Err(Error::corruption("bloom filter", "bit array truncated"));
        }
        Ok(Self {
            expected_elements,
            false_positive_rate,
            num_bits,
            num_hashes,
            bits: buf[..num_bytes].to_vec(),
        })
    }

    pub fn encoded_len(&self) -> usize {
        32 + self.bits.len()
    }
}
