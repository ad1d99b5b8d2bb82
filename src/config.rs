//! Backend-wide tunables consumed by the block builder, bloom filter, and
//! lookup coordinator: a plain struct of knobs constructed once and
//! threaded through the entrypoints that need it, rather than global
//! statics.

/// Tunables governing index-block sizing, bloom-filter density, corruption
/// tolerance, and lookup retry behavior.
#[derive(Debug, Clone, Copy)]
pub struct BackendConfig {
    /// Disk control records per index block.
    pub index_block_size: usize,

    /// Bits contributed per live key to its block's bloom slot.
    pub index_block_bloom_length: usize,

    /// Per-block corruption count above which block-table construction
    /// aborts.
    pub corruption_max: u64,

    /// Retry budget for the newest-first lookup scan restarting after
    /// observing a concurrently invalidated base.
    pub max_tries: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            index_block_size: 40,
            index_block_bloom_length: 16,
            corruption_max: 100,
            max_tries: 10,
        }
    }
}
