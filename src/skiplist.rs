use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::iterators::{IteratorType, StorageIterator};

pub(crate) const MAX_LEVEL: usize = 16;
const NIL: usize = usize::MAX;

/// Probabilistic ordered index with MVCC duplicate keys.
///
/// Nodes with equal keys coexist and are ordered by tranc_id
/// descending, so the newest version of a key is reached first. When a
/// write carries tranc_id zero (MVCC disabled) an equal-key put
/// overwrites in place instead.
///
/// Nodes live in an arena; forward links own their successors by index
/// and backward links are plain non-owning indices, valid exactly as
/// long as the list itself. All mutation is serialized by the memtable
/// lock above this type.
pub struct SkipList {
    nodes: Vec<Node>,
    max_level: usize,
    current_level: usize,
    size_bytes: usize,
    rng: StdRng,
}

struct Node {
    key: Bytes,
    value: Bytes,
    tranc_id: u64,
    forward: Vec<usize>,
    backward: Vec<usize>,
}

impl Node {
    fn head(max_level: usize) -> Self {
        Self {
            key: Bytes::new(),
            value: Bytes::new(),
            tranc_id: 0,
            forward: vec![NIL; max_level],
            backward: vec![NIL; max_level],
        }
    }
}

impl SkipList {
    pub fn new() -> Self {
        Self::with_max_level(MAX_LEVEL)
    }

    pub fn with_max_level(max_level: usize) -> Self {
        assert!(max_level >= 1);
        Self {
            nodes: vec![Node::head(max_level)],
            max_level,
            current_level: 1,
            size_bytes: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Coin-flip level draw: each extra level has probability 1/2.
    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < self.max_level && self.rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Strict ordering predicate: does `idx` sort before the slot of
    /// `(key, tranc_id)`? With `tranc_id` zero the bound is the newest
    /// version, so only the key decides.
    fn precedes(&self, idx: usize, key: &[u8], tranc_id: u64) -> bool {
        let node = &self.nodes[idx];
        match node.key.as_ref().cmp(key) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => tranc_id != 0 && node.tranc_id > tranc_id,
        }
    }

    /// Predecessors of the `(key, tranc_id)` slot at every level.
    fn find_update(&self, key: &[u8], tranc_id: u64) -> Vec<usize> {
        let mut update = vec![0; self.max_level];
        let mut cur = 0;
        for level in (0..self.current_level).rev() {
            loop {
                let next = self.nodes[cur].forward[level];
                if next != NIL && self.precedes(next, key, tranc_id) {
                    cur = next;
                } else {
                    break;
                }
            }
            update[level] = cur;
        }
        update
    }

    pub fn put(&mut self, key: &[u8], value: &[u8], tranc_id: u64) {
        let update = self.find_update(key, tranc_id);
        let candidate = self.nodes[update[0]].forward[0];
        if candidate != NIL {
            let node = &self.nodes[candidate];
            // MVCC disabled: overwrite the newest version in place.
            // Same (key, tranc_id): a version rewrite, also in place.
            if node.key == key && (tranc_id == 0 || node.tranc_id == tranc_id) {
                self.size_bytes = self.size_bytes + value.len() - node.value.len();
                self.nodes[candidate].value = Bytes::copy_from_slice(value);
                return;
            }
        }

        let level = self.random_level();
        let mut update = update;
        if level > self.current_level {
            for slot in update.iter_mut().take(level).skip(self.current_level) {
                *slot = 0;
            }
            self.current_level = level;
        }

        let new_idx = self.nodes.len();
        self.nodes.push(Node {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
            tranc_id,
            forward: vec![NIL; level],
            backward: vec![NIL; level],
        });
        for lvl in 0..level {
            let prev = update[lvl];
            let next = self.nodes[prev].forward[lvl];
            self.nodes[new_idx].forward[lvl] = next;
            self.nodes[new_idx].backward[lvl] = prev;
            self.nodes[prev].forward[lvl] = new_idx;
            if next != NIL {
                self.nodes[next].backward[lvl] = new_idx;
            }
        }
        self.size_bytes += key.len() + value.len();
    }

    /// Newest version of `key` visible at `tranc_id` (any version when
    /// zero). The value may be the empty tombstone; absence means no
    /// visible version exists at all.
    pub fn get(&self, key: &[u8], tranc_id: u64) -> Option<(Bytes, u64)> {
        let mut cur = 0;
        for level in (0..self.current_level).rev() {
            loop {
                let next = self.nodes[cur].forward[level];
                if next != NIL && self.nodes[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
        }
        let mut idx = self.nodes[cur].forward[0];
        if tranc_id != 0 {
            while idx != NIL && self.nodes[idx].key == key && self.nodes[idx].tranc_id > tranc_id {
                idx = self.nodes[idx].forward[0];
            }
        }
        if idx != NIL && self.nodes[idx].key == key {
            let node = &self.nodes[idx];
            Some((node.value.clone(), node.tranc_id))
        } else {
            None
        }
    }

    /// In-order cursor over every version, for SST construction and
    /// debugging.
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            cur: self.nodes[0].forward[0],
            end: NIL,
            max_tranc_id: 0,
        }
    }

    /// Drain the list in order into `(key, value, tranc_id)` triples.
    /// The clones are reference-counted, not byte copies.
    pub fn flush(&self) -> Vec<(Bytes, Bytes, u64)> {
        let mut out = Vec::new();
        let mut idx = self.nodes[0].forward[0];
        while idx != NIL {
            let node = &self.nodes[idx];
            out.push((node.key.clone(), node.value.clone(), node.tranc_id));
            idx = node.forward[0];
        }
        out
    }

    /// Cursor over the contiguous run of keys matching a monotone
    /// predicate (`0` match, `> 0` run lies right of the key, `< 0` left
    /// of it). High-level forward links reach the run, backward links
    /// then pull the start left over equal-predicate neighbours.
    pub fn iter_predicate(
        &self,
        max_tranc_id: u64,
        predicate: &dyn Fn(&[u8]) -> i32,
    ) -> Option<SkipListIterator<'_>> {
        let mut cur = 0;
        for level in (0..self.current_level).rev() {
            loop {
                let next = self.nodes[cur].forward[level];
                if next != NIL && predicate(&self.nodes[next].key) > 0 {
                    cur = next;
                } else {
                    break;
                }
            }
        }
        let mut first = self.nodes[cur].forward[0];
        if first == NIL || predicate(&self.nodes[first].key) != 0 {
            return None;
        }
        loop {
            let prev = self.nodes[first].backward[0];
            if prev == NIL || prev == 0 || predicate(&self.nodes[prev].key) != 0 {
                break;
            }
            first = prev;
        }
        let mut end = first;
        while end != NIL && predicate(&self.nodes[end].key) == 0 {
            end = self.nodes[end].forward[0];
        }
        Some(SkipListIterator {
            list: self,
            cur: first,
            end,
            max_tranc_id,
        })
    }

    /// Sum of live `|key| + |value|` bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].forward[0] == NIL
    }

    pub fn clear(&mut self) {
        let max_level = self.max_level;
        self.nodes.clear();
        self.nodes.push(Node::head(max_level));
        self.current_level = 1;
        self.size_bytes = 0;
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Half-open cursor over `[cur, end)` nodes at level zero.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    cur: usize,
    end: usize,
    max_tranc_id: u64,
}

impl SkipListIterator<'_> {
    fn skip_invisible(&mut self) {
        if self.max_tranc_id == 0 {
            return;
        }
        while self.cur != self.end && self.list.nodes[self.cur].tranc_id > self.max_tranc_id {
            self.cur = self.list.nodes[self.cur].forward[0];
        }
    }
}

impl StorageIterator for SkipListIterator<'_> {
    fn key(&self) -> &[u8] {
        &self.list.nodes[self.cur].key
    }

    fn value(&self) -> &[u8] {
        &self.list.nodes[self.cur].value
    }

    fn tranc_id(&self) -> u64 {
        self.list.nodes[self.cur].tranc_id
    }

    fn is_valid(&self) -> bool {
        self.cur != self.end
    }

    fn next(&mut self) -> Result<()> {
        if self.cur != self.end {
            self.cur = self.list.nodes[self.cur].forward[0];
            self.skip_invisible();
        }
        Ok(())
    }

    fn iter_type(&self) -> IteratorType {
        IteratorType::SkipList
    }
}
