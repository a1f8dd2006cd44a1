use super::{IteratorType, StorageIterator};
use crate::error::Result;

/// Fusion of exactly two sorted streams with A taking priority: when
/// both sides are live on the same key, B is advanced past it before
/// the choice is made, so A's version shadows B's.
///
/// Used to put memtable output in front of SST output, and compaction
/// sources in front of their destination level.
pub struct TwoMergeIterator<A: StorageIterator, B: StorageIterator> {
    a: A,
    b: B,
    choose_a: bool,
}

impl<A: StorageIterator, B: StorageIterator> TwoMergeIterator<A, B> {
    pub fn create(a: A, b: B) -> Result<Self> {
        let mut iter = Self {
            a,
            b,
            choose_a: false,
        };
        iter.skip_b()?;
        iter.choose_a = iter.choose_a_now();
        Ok(iter)
    }

    fn choose_a_now(&self) -> bool {
        if !self.a.is_valid() {
            return false;
        }
        if !self.b.is_valid() {
            return true;
        }
        self.a.key() < self.b.key()
    }

    /// Advance B over every entry sharing A's current key.
    fn skip_b(&mut self) -> Result<()> {
        while self.a.is_valid() && self.b.is_valid() && self.b.key() == self.a.key() {
            self.b.next()?;
        }
        Ok(())
    }
}

impl<A: StorageIterator, B: StorageIterator> StorageIterator for TwoMergeIterator<A, B> {
    fn key(&self) -> &[u8] {
        if self.choose_a {
            self.a.key()
        } else {
            self.b.key()
        }
    }

    fn value(&self) -> &[u8] {
        if self.choose_a {
            self.a.value()
        } else {
            self.b.value()
        }
    }

    fn tranc_id(&self) -> u64 {
        if self.choose_a {
            self.a.tranc_id()
        } else {
            self.b.tranc_id()
        }
    }

    fn is_valid(&self) -> bool {
        if self.choose_a {
            self.a.is_valid()
        } else {
            self.b.is_valid()
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.choose_a {
            self.a.next()?;
        } else {
            self.b.next()?;
        }
        self.skip_b()?;
        self.choose_a = self.choose_a_now();
        Ok(())
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::TwoMerge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterators::heap_iterator::{HeapIterator, SearchItem};
    use bytes::Bytes;

    fn heap(entries: &[(&str, &str, u64)]) -> HeapIterator {
        HeapIterator::new(
            entries
                .iter()
                .enumerate()
                .map(|(i, (k, v, t))| SearchItem {
                    key: Bytes::copy_from_slice(k.as_bytes()),
                    value: Bytes::copy_from_slice(v.as_bytes()),
                    tranc_id: *t,
                    level: 0,
                    idx: i as i64,
                })
                .collect(),
            0,
        )
    }

    fn drain(mut iter: impl StorageIterator) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while iter.is_valid() {
            out.push((
                String::from_utf8(iter.key().to_vec()).unwrap(),
                String::from_utf8(iter.value().to_vec()).unwrap(),
            ));
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_a_shadows_b() {
        let a = heap(&[("a", "mem", 2), ("c", "mem", 2)]);
        let b = heap(&[("a", "sst", 1), ("b", "sst", 1), ("c", "sst", 1)]);
        let merged = TwoMergeIterator::create(a, b).unwrap();
        assert_eq!(
            drain(merged),
            vec![
                ("a".into(), "mem".into()),
                ("b".into(), "sst".into()),
                ("c".into(), "mem".into()),
            ]
        );
    }

    #[test]
    fn test_one_side_empty() {
        let a = heap(&[]);
        let b = heap(&[("x", "1", 0), ("y", "2", 0)]);
        assert_eq!(
            drain(TwoMergeIterator::create(a, b).unwrap()),
            vec![("x".into(), "1".into()), ("y".into(), "2".into())]
        );

        let a = heap(&[("x", "1", 0)]);
        let b = heap(&[]);
        assert_eq!(
            drain(TwoMergeIterator::create(a, b).unwrap()),
            vec![("x".into(), "1".into())]
        );
    }
}
