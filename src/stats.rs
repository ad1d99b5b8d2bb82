//! Statistics counters the core emits.
//!
//! [`LookupStat`] accumulates per-lookup counters locally (the same way the
//! C source accumulates a local `struct eblob_disk_search_stat` across one
//! `disk_index_lookup` call before folding it into the backend-wide
//! totals), then [`StatsSink::record_lookup`] folds it into whatever
//! long-lived sink the caller provides. [`InMemoryStats`] is a minimal
//! sink used by tests and benchmarks; a real deployment would swap in
//! whatever metrics/stats aggregation system it already uses — that
//! subsystem is external to this core.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-lookup counters accumulated across one [`crate::lookup::disk_index_lookup`] call.
#[derive(Debug, Default, Clone, Copy)]
pub struct LookupStat {
    /// Number of bases visited (including ones that triggered a restart).
    pub loops: u64,
    /// Bases skipped because they have no sorted index yet.
    pub no_sort: u64,
    /// Times the two-level searcher was invoked.
    pub search_on_disk: u64,
    /// Times the bloom filter rejected a candidate block.
    pub bloom_null: u64,
    /// Times the block-range search found a containing block.
    pub found_index_block: u64,
    /// Times the block-range search found no containing block.
    pub no_block: u64,
    /// Times the intra-block binary search was attempted.
    pub bsearch_reached: u64,
    /// Times the intra-block binary search found a matching key.
    pub bsearch_found: u64,
    /// Extra records scanned during the linear expansion over an
    /// equal-key run.
    pub additional_reads: u64,
}

/// Destination for the named counters this core emits.
///
/// Implementors must be safe to call concurrently from multiple lookup
/// threads.
pub trait StatsSink: Send + Sync {
    /// Record the current size, in bytes, of a base's bloom filter.
    fn set_bloom_size(&self, value: u64);

    /// Record the current size, in bytes, of a base's block table.
    fn set_index_blocks_size(&self, value: u64);

    /// Add to the running count of removed (tombstoned) records observed
    /// while building a block table.
    fn add_records_removed(&self, n: u64);

    /// Add to the running total of on-disk bytes occupied by removed
    /// records.
    fn add_removed_size(&self, n: u64);

    /// Add to the running count of structurally invalid records skipped
    /// while building a block table.
    fn add_index_corrupted_entries(&self, n: u64);

    /// Fold a completed lookup's local counters into this sink's totals.
    fn record_lookup(&self, stat: &LookupStat);
}

/// A simple in-process [`StatsSink`] backed by atomics.
///
/// Counters are live atomics rather than a point-in-time snapshot, since
/// they are updated from concurrent lookup threads; [`InMemoryStats::snapshot`]
/// gives callers a consistent-enough point-in-time readout for tests and
/// diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    bloom_size: AtomicU64,
    index_blocks_size: AtomicU64,
    records_removed: AtomicU64,
    removed_size: AtomicU64,
    index_corrupted_entries: AtomicU64,
    loops: AtomicU64,
    no_sort: AtomicU64,
    search_on_disk: AtomicU64,
    bloom_null: AtomicU64,
    found_index_block: AtomicU64,
    no_block: AtomicU64,
    bsearch_reached: AtomicU64,
    bsearch_found: AtomicU64,
    additional_reads: AtomicU64,
}

impl InMemoryStats {
    /// Creates a zeroed stats sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of a few representative counters, for
    /// tests and diagnostics.
    pub fn snapshot(&self) -> InMemoryStatsSnapshot {
        InMemoryStatsSnapshot {
            bloom_size: self.bloom_size.load(Ordering::Relaxed),
            index_blocks_size: self.index_blocks_size.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
            removed_size: self.removed_size.load(Ordering::Relaxed),
            index_corrupted_entries: self.index_corrupted_entries.load(Ordering::Relaxed),
            loops: self.loops.load(Ordering::Relaxed),
            no_sort: self.no_sort.load(Ordering::Relaxed),
            search_on_disk: self.search_on_disk.load(Ordering::Relaxed),
            bloom_null: self.bloom_null.load(Ordering::Relaxed),
            found_index_block: self.found_index_block.load(Ordering::Relaxed),
            no_block: self.no_block.load(Ordering::Relaxed),
            bsearch_reached: self.bsearch_reached.load(Ordering::Relaxed),
            bsearch_found: self.bsearch_found.load(Ordering::Relaxed),
            additional_reads: self.additional_reads.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time readout of [`InMemoryStats`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryStatsSnapshot {
    pub bloom_size: u64,
    pub index_blocks_size: u64,
    pub records_removed: u64,
    pub removed_size: u64,
    pub index_corrupted_entries: u64,
    pub loops: u64,
    pub no_sort: u64,
    pub search_on_disk: u64,
    pub bloom_null: u64,
    pub found_index_block: u64,
    pub no_block: u64,
    pub bsearch_reached: u64,
    pub bsearch_found: u64,
    pub additional_reads: u64,
}

impl StatsSink for InMemoryStats {
    fn set_bloom_size(&self, value: u64) {
        self.bloom_size.store(value, Ordering::Relaxed);
    }

    fn set_index_blocks_size(&self, value: u64) {
        self.index_blocks_size.store(value, Ordering::Relaxed);
    }

    fn add_records_removed(&self, n: u64) {
        self.records_removed.fetch_add(n, Ordering::Relaxed);
    }

    fn add_removed_size(&self, n: u64) {
        self.removed_size.fetch_add(n, Ordering::Relaxed);
    }

    fn add_index_corrupted_entries(&self, n: u64) {
        self.index_corrupted_entries.fetch_add(n, Ordering::Relaxed);
    }

    fn record_lookup(&self, stat: &LookupStat) {
        self.loops.fetch_add(stat.loops, Ordering::Relaxed);
        self.no_sort.fetch_add(stat.no_sort, Ordering::Relaxed);
        self.search_on_disk
            .fetch_add(stat.search_on_disk, Ordering::Relaxed);
        self.bloom_null.fetch_add(stat.bloom_null, Ordering::Relaxed);
        self.found_index_block
            .fetch_add(stat.found_index_block, Ordering::Relaxed);
        self.no_block.fetch_add(stat.no_block, Ordering::Relaxed);
        self.bsearch_reached
            .fetch_add(stat.bsearch_reached, Ordering::Relaxed);
        self.bsearch_found
            .fetch_add(stat.bsearch_found, Ordering::Relaxed);
        self.additional_reads
            .fetch_add(stat.additional_reads, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_lookup_accumulates_across_calls() {
        let sink = InMemoryStats::new();
        let mut stat = LookupStat::default();
        stat.loops = 3;
        stat.bloom_null = 1;
        sink.record_lookup(&stat);
        sink.record_lookup(&stat);
        let snap = sink.snapshot();
        assert_eq!(snap.loops, 6);
        assert_eq!(snap.bloom_null, 2);
    }

    #[test]
    fn setters_overwrite_rather_than_accumulate() {
        let sink = InMemoryStats::new();
        sink.set_bloom_size(10);
        sink.set_bloom_size(5);
        assert_eq!(sink.snapshot().bloom_size, 5);
    }
}
