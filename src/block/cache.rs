use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Block;

/// Cache key: which block of which SST.
type CacheKey = (usize, usize);

const NIL: usize = usize::MAX;

/// LRU-K cache for decoded blocks.
///
/// Entries live on one of two intrusive lists: `less_k` while their
/// access count is below K, `ge_k` once it reaches K. A hit moves the
/// entry to the head of its list (promoting across lists at the K
/// threshold); eviction takes the tail of `less_k` first, so blocks
/// touched fewer than K times make room before the established ones.
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    k: usize,
}

struct CacheNode {
    key: CacheKey,
    block: Arc<Block>,
    access_count: usize,
    prev: usize,
    next: usize,
    in_ge_k: bool,
}

#[derive(Clone, Copy)]
struct ListEnds {
    head: usize,
    tail: usize,
}

impl ListEnds {
    fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
        }
    }
}

struct CacheInner {
    nodes: Vec<CacheNode>,
    free: Vec<usize>,
    map: HashMap<CacheKey, usize>,
    less_k: ListEnds,
    ge_k: ListEnds,
    hits: u64,
    total: u64,
}

impl CacheInner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next, in_ge) = {
            let node = &self.nodes[idx];
            (node.prev, node.next, node.in_ge_k)
        };
        let list = if in_ge { &mut self.ge_k } else { &mut self.less_k };
        if prev == NIL {
            list.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            list.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
    }

    fn push_front(&mut self, idx: usize, in_ge: bool) {
        let list = if in_ge { &mut self.ge_k } else { &mut self.less_k };
        let old_head = list.head;
        list.head = idx;
        if old_head == NIL {
            list.tail = idx;
        }
        {
            let node = &mut self.nodes[idx];
            node.prev = NIL;
            node.next = old_head;
            node.in_ge_k = in_ge;
        }
        if old_head != NIL {
            self.nodes[old_head].prev = idx;
        }
    }

    /// Bump the access count and reposition: head of the current list,
    /// crossing into `ge_k` once the count reaches K.
    fn touch(&mut self, idx: usize, k: usize) {
        self.nodes[idx].access_count += 1;
        let promote = self.nodes[idx].in_ge_k || self.nodes[idx].access_count >= k;
        self.unlink(idx);
        self.push_front(idx, promote);
    }

    fn evict_one(&mut self) {
        let victim = if self.less_k.tail != NIL {
            self.less_k.tail
        } else if self.ge_k.tail != NIL {
            self.ge_k.tail
        } else {
            return;
        };
        self.unlink(victim);
        self.map.remove(&self.nodes[victim].key);
        self.free.push(victim);
    }
}

impl BlockCache {
    pub fn new(capacity: usize, k: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                nodes: Vec::new(),
                free: Vec::new(),
                map: HashMap::new(),
                less_k: ListEnds::new(),
                ge_k: ListEnds::new(),
                hits: 0,
                total: 0,
            }),
            capacity,
            k: k.max(1),
        }
    }

    pub fn get(&self, sst_id: usize, block_idx: usize) -> Option<Arc<Block>> {
        let mut inner = self.inner.lock();
        inner.total += 1;
        let idx = match inner.map.get(&(sst_id, block_idx)) {
            Some(&idx) => idx,
            None => return None,
        };
        inner.hits += 1;
        inner.touch(idx, self.k);
        Some(inner.nodes[idx].block.clone())
    }

    pub fn put(&self, sst_id: usize, block_idx: usize, block: Arc<Block>) {
        if self.capacity == 0 {
            return;
        }
        let key = (sst_id, block_idx);
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.map.get(&key) {
            // blocks are immutable, so this only refreshes the handle
            inner.nodes[idx].block = block;
            inner.touch(idx, self.k);
            return;
        }
        if inner.map.len() >= self.capacity {
            inner.evict_one();
        }
        let node = CacheNode {
            key,
            block,
            access_count: 1,
            prev: NIL,
            next: NIL,
            in_ge_k: false,
        };
        let idx = match inner.free.pop() {
            Some(slot) => {
                inner.nodes[slot] = node;
                slot
            }
            None => {
                inner.nodes.push(node);
                inner.nodes.len() - 1
            }
        };
        inner.push_front(idx, false);
        inner.map.insert(key, idx);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.total == 0 {
            0.0
        } else {
            inner.hits as f64 / inner.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: u64) -> Arc<Block> {
        let mut b = Block::new(4096);
        assert!(b.append(b"k", b"v", tag, false));
        Arc::new(b)
    }

    #[test]
    fn test_put_get() {
        let cache = BlockCache::new(4, 2);
        let b = block(1);
        cache.put(1, 0, b.clone());
        let got = cache.get(1, 0).unwrap();
        assert_eq!(got.entry_at(0), b.entry_at(0));
        assert!(cache.get(1, 1).is_none());
    }

    #[test]
    fn test_eviction_prefers_cold_entries() {
        let cache = BlockCache::new(2, 2);
        cache.put(0, 0, block(0));
        cache.put(0, 1, block(1));
        // two hits push (0, 0) into the >= K list
        cache.get(0, 0).unwrap();
        cache.get(0, 0).unwrap();
        // inserting a third entry evicts from the < K list: (0, 1)
        cache.put(0, 2, block(2));
        assert!(cache.get(0, 0).is_some());
        assert!(cache.get(0, 1).is_none());
        assert!(cache.get(0, 2).is_some());
    }

    #[test]
    fn test_eviction_falls_back_to_hot_list() {
        let cache = BlockCache::new(2, 2);
        cache.put(0, 0, block(0));
        cache.put(0, 1, block(1));
        for _ in 0..2 {
            cache.get(0, 0).unwrap();
            cache.get(0, 1).unwrap();
        }
        // both entries are hot; eviction must still make room
        cache.put(0, 2, block(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(0, 2).is_some());
    }

    #[test]
    fn test_hit_rate() {
        let cache = BlockCache::new(4, 2);
        assert_eq!(cache.hit_rate(), 0.0);
        cache.put(0, 0, block(0));
        cache.get(0, 0).unwrap();
        assert!(cache.get(9, 9).is_none());
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
