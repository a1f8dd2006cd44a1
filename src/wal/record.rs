use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};

/// What one WAL record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
    Create = 0,
    Put = 1,
    Delete = 2,
    Commit = 3,
    Rollback = 4,
}

impl OpType {
    fn from_u8(raw: u8) -> Result<Self> {
        Ok(match raw {
            0 => OpType::Create,
            1 => OpType::Put,
            2 => OpType::Delete,
            3 => OpType::Commit,
            4 => OpType::Rollback,
            other => {
                return Err(Error::corruption(
                    "wal record",
                    format!("unknown op type {other}"),
                ))
            }
        })
    }
}

/// One operation of one transaction, as journaled.
///
/// Wire format (little-endian):
/// `record_len u16 | tranc_id u64 | op_type u8 |`
/// `[key_len u16 | key]` for Put and Delete, `[value_len u16 | value]`
/// for Put. `record_len` covers the whole record including itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub tranc_id: u64,
    pub op: OpType,
    pub key: Bytes,
    pub value: Bytes,
}

const HEADER_LEN: usize = 2 + 8 + 1;

impl Record {
    pub fn create(tranc_id: u64) -> Self {
        Self {
            tranc_id,
            op: OpType::Create,
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn put(tranc_id: u64, key: &[u8], value: &[u8]) -> Self {
        Self {
            tranc_id,
            op: OpType::Put,
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        }
    }

    pub fn delete(tranc_id: u64, key: &[u8]) -> Self {
        Self {
            tranc_id,
            op: OpType::Delete,
            key: Bytes::copy_from_slice(key),
            value: Bytes::new(),
        }
    }

    pub fn commit(tranc_id: u64) -> Self {
        Self {
            tranc_id,
            op: OpType::Commit,
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn rollback(tranc_id: u64) -> Self {
        Self {
            tranc_id,
            op: OpType::Rollback,
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self.op {
            OpType::Put => HEADER_LEN + 2 + self.key.len() + 2 + self.value.len(),
            OpType::Delete => HEADER_LEN + 2 + self.key.len(),
            OpType::Create | OpType::Commit | OpType::Rollback => HEADER_LEN,
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.encoded_len() as u16);
        buf.put_u64_le(self.tranc_id);
        buf.put_u8(self.op as u8);
        match self.op {
            OpType::Put => {
                buf.put_u16_le(self.key.len() as u16);
                buf.put_slice(&self.key);
                buf.put_u16_le(self.value.len() as u16);
                buf.put_slice(&self.value);
            }
            OpType::Delete => {
                buf.put_u16_le(self.key.len() as u16);
                buf.put_slice(&self.key);
            }
            OpType::Create | OpType::Commit | OpType::Rollback => {}
        }
    }

    /// Decode a whole segment's worth of records. Any truncation or
    /// length inconsistency poisons the segment.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            if rest.len() < HEADER_LEN {
                return Err(Error::corruption("wal record", "header truncated"));
            }
            let record_len = (&rest[..2]).get_u16_le() as usize;
            if record_len < HEADER_LEN || record_len > rest.len() {
                return Err(Error::corruption(
                    "wal record",
                    format!("bad record length {record_len}"),
                ));
            }
            let mut body = &rest[2..record_len];
            let tranc_id = body.get_u64_le();
            let op = OpType::from_u8(body.get_u8())?;
            let mut record = Record {
                tranc_id,
                op,
                key: Bytes::new(),
                value: Bytes::new(),
            };
            match op {
                OpType::Put | OpType::Delete => {
                    if body.remaining() < 2 {
                        return Err(Error::corruption("wal record", "key length truncated"));
                    }
                    let key_len = body.get_u16_le() as usize;
                    if body.remaining() < key_len {
                        return Err(Error::corruption("wal record", "key truncated"));
                    }
                    record.key = body.copy_to_bytes(key_len);
                    if op == OpType::Put {
                        if body.remaining() < 2 {
                            return Err(Error::corruption(
                                "wal record",
                                "value length truncated",
                            ));
                        }
                        let value_len = body.get_u16_le() as usize;
                        if body.remaining() < value_len {
                            return Err(Error::corruption("wal record", "value truncated"));
                        }
                        record.value = body.copy_to_bytes(value_len);
                    }
                }
                OpType::Create | OpType::Commit | OpType::Rollback => {}
            }
            if body.has_remaining() {
                return Err(Error::corruption("wal record", "trailing bytes in record"));
            }
            records.push(record);
            rest = &rest[record_len..];
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_ops() {
        let records = vec![
            Record::create(7),
            Record::put(7, b"key", b"value"),
            Record::delete(7, b"gone"),
            Record::commit(7),
            Record::rollback(8),
        ];
        let mut buf = Vec::new();
        for record in &records {
            record.encode_into(&mut buf);
        }
        let decoded = Record::decode_all(&buf).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_empty_value_put() {
        let record = Record::put(1, b"k", b"");
        let mut buf = Vec::new();
        record.encode_into(&mut buf);
        assert_eq!(Record::decode_all(&buf).unwrap(), vec![record]);
    }

    #[test]
    fn test_truncated_segment() {
        let mut buf = Vec::new();
        Record::put(1, b"key", b"value").encode_into(&mut buf);
        buf.truncate(buf.len() - 2);
        assert!(Record::decode_all(&buf).is_err());
    }

    #[test]
    fn test_unknown_op() {
        let mut buf = Vec::new();
        Record::commit(1).encode_into(&mut buf);
        buf[10] = 0xee;
        assert!(Record::decode_all(&buf).is_err());
    }
}
