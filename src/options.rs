/// Tunables for the engine. Every knob here is fixed at construction;
/// nothing is re-read after `open`.
#[derive(Clone, Debug)]
pub struct LsmOptions {
    /// Soft byte target for one block. A block may exceed it when all
    /// versions of a key must stay co-resident.
    pub block_capacity: usize,
    /// Total memtable bytes (active + frozen) that trigger a flush.
    pub memtable_size_limit: usize,
    /// Number of L0 SSTs that triggers compaction into L1.
    pub level0_file_limit: usize,
    /// Growth factor between levels; level L targets
    /// `memtable_size_limit * level_size_ratio^L` bytes.
    pub level_size_ratio: usize,
    /// Block cache capacity in blocks.
    pub block_cache_capacity: usize,
    /// LRU-K promotion threshold of the block cache.
    pub block_cache_k: usize,
    /// Attach a bloom filter to every built SST.
    pub enable_bloom: bool,
    /// Expected number of keys per SST, used to size the bloom filter.
    pub bloom_expected_entries: usize,
    pub bloom_false_positive_rate: f64,
    /// Number of WAL records buffered before an append + fsync.
    pub wal_buffer_records: usize,
    /// Byte size past which the active WAL segment is rolled.
    pub wal_segment_limit: usize,
}

impl Default for LsmOptions {
    fn default() -> Self {
        Self {
            block_capacity: 4 * 1024,
            memtable_size_limit: 64 * 1024 * 1024,
            level0_file_limit: 4,
            level_size_ratio: 4,
            block_cache_capacity: 1024,
            block_cache_k: 2,
            enable_bloom: true,
            bloom_expected_entries: 65536,
            bloom_false_positive_rate: 0.01,
            wal_buffer_records: 128,
            wal_segment_limit: 4 * 1024 * 1024,
        }
    }
}

impl LsmOptions {
    /// Small limits so tests can exercise freeze, flush and compaction
    /// with a few kilobytes of data.
    pub fn small_for_tests() -> Self {
        Self {
            block_capacity: 4 * 1024,
            memtable_size_limit: 16 * 1024,
            level0_file_limit: 4,
            level_size_ratio: 4,
            block_cache_capacity: 256,
            block_cache_k: 2,
            enable_bloom: true,
            bloom_expected_entries: 4096,
            bloom_false_positive_rate: 0.01,
            wal_buffer_records: 128,
            wal_segment_limit: 64 * 1024,
        }
    }
}
