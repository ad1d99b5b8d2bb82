//! Lookup coordinator (`disk_index_lookup`): scans bases newest-first,
//! holds each one across the search, and restarts on concurrent
//! invalidation.

use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use crate::bctl::{BaseHold, Bctl};
use crate::config::BackendConfig;
use crate::error::LookupError;
use crate::key::Key;
use crate::search::find_on_disk;
use crate::stats::{LookupStat, StatsSink};

/// The in-memory list of a backend's bases, ordered by recency. Bases are
/// returned newest-first by [`BaseRegistry::newest_first`]; `push` appends
/// a newer base.
#[derive(Default)]
pub struct BaseRegistry {
    /// Newest base last in insertion order; iteration below reverses.
    bases: RwLock<Vec<Arc<Bctl>>>,
}

impl BaseRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a base as the newest.
    pub fn push(&self, bctl: Arc<Bctl>) {
        self.bases.write().unwrap_or_else(|e| e.into_inner()).push(bctl);
    }

    /// Snapshot of all bases, newest first.
    pub fn newest_first(&self) -> Vec<Arc<Bctl>> {
        let mut v = self
            .bases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        v.reverse();
        v
    }
}

/// Result of a successful lookup: `{ base_ref, data_offset, index_offset,
/// size }`, with `base_ref` modeled as an RAII hold guard (see
/// [`crate::bctl::BaseHold`]) instead of a raw, release-before-return
/// pointer. The caller may read `data_offset`/`size` and look the payload
/// up in the base's data file for as long as this value is alive; once
/// dropped, the base is again eligible for destructive background
/// operations if no other hold remains.
pub struct ResultDescriptor {
    base_ref: BaseHold,
    /// Offset of the payload in the base's data file.
    pub data_offset: u64,
    /// Offset of the matched DC within the sorted index.
    pub index_offset: u64,
    /// Length of the payload, in bytes.
    pub size: u64,
}

impl ResultDescriptor {
    /// The base this result was found in. Borrowing it does not extend
    /// its lifetime beyond this descriptor's own.
    pub fn base(&self) -> &Arc<Bctl> {
        self.base_ref.bctl()
    }
}

/// The canonical acceptability callback: accept any DC whose `REMOVED`
/// bit is unset.
fn accept_live(dc: &crate::record::DiskControl) -> bool {
    !dc.is_removed()
}

/// Looks up `key` across `registry`'s bases, newest to oldest.
///
/// For each base, holds it, skips it if invalidated (restarting the whole
/// scan up to `config.max_tries` times) or if it has no published sorted
/// index yet, otherwise delegates to the two-level searcher. Returns the
/// first hit; `None` on exhaustive miss.
pub fn disk_index_lookup(
    registry: &BaseRegistry,
    key: &Key,
    config: &BackendConfig,
    stats: &dyn StatsSink,
) -> Result<Option<ResultDescriptor>, LookupError> {
    let mut stat = LookupStat::default();
    let mut tries = 0usize;

    'restart: loop {
        let bases = registry.newest_first();
        for bctl in &bases {
            stat.loops += 1;
            let hold = bctl.hold();

            if !bctl.is_valid() {
                drop(hold);
                tries += 1;
                if tries >= config.max_tries {
                    warn!("lookup retry budget exhausted, base list invalidated repeatedly");
                    stats.record_lookup(&stat);
                    return Err(LookupError::Deadlock);
                }
                trace!(tries, "base invalidated mid-scan, restarting lookup");
                continue 'restart;
            }

            if !bctl.has_sorted_index() {
                stat.no_sort += 1;
                drop(hold);
                continue;
            }

            stat.search_on_disk += 1;
            let hit = bctl.with_block_table(|table| {
                bctl.with_sorted_bytes(|sorted| {
                    find_on_disk(table, sorted, key, &accept_live, &mut stat)
                })
            });

            match hit.flatten().flatten() {
                Some(hit) => {
                    stats.record_lookup(&stat);
                    return Ok(Some(ResultDescriptor {
                        base_ref: hold,
                        data_offset: hit.dc.position,
                        index_offset: hit.offset,
                        size: hit.dc.data_size,
                    }));
                }
                None => {
                    drop(hold);
                }
            }
        }

        stats.record_lookup(&stat);
        return Ok(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockTable;
    use crate::record::{DiskControl, REMOVED};
    use crate::stats::InMemoryStats;

    fn dc_bytes(key: &[u8], flags: u64, position: u64) -> Vec<u8> {
        DiskControl {
            key: Key::from_slice_padded(key),
            flags,
            position,
            data_size: 5,
            disk_size: 5,
        }
        .to_bytes()
        .to_vec()
    }

    fn base_with(index: u64, records: &[(&[u8], u64, u64)], config: &BackendConfig) -> Arc<Bctl> {
        let mut data = Vec::new();
        for (key, flags, position) in records {
            data.extend(dc_bytes(key, *flags, *position));
        }
        let bctl = Arc::new(Bctl::new(index));
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, config, &stats).unwrap();
        bctl.publish_block_table(table);
        bctl.publish_sorted_index(crate::bctl::SortedIndex {
            mmap: map_bytes(&data),
        });
        bctl
    }

    fn map_bytes(data: &[u8]) -> memmap2::Mmap {
        let mut f = tempfile::tempfile().unwrap();
        use std::io::Write;
        f.write_all(data).unwrap();
        unsafe { memmap2::Mmap::map(&f).unwrap() }
    }

    fn config() -> BackendConfig {
        BackendConfig {
            index_block_size: 4,
            index_block_bloom_length: 16,
            corruption_max: 100,
            max_tries: 10,
        }
    }

    #[test]
    fn finds_live_key_in_single_base() {
        let registry = BaseRegistry::new();
        registry.push(base_with(0, &[(b"a", 0, 1), (b"b", 0, 2)], &config()));
        let stats = InMemoryStats::new();
        let result = disk_index_lookup(&registry, &Key::from_slice_padded(b"b"), &config(), &stats)
            .unwrap()
            .unwrap();
        assert_eq!(result.data_offset, 2);
    }

    #[test]
    fn newest_base_wins_on_duplicate_live_key() {
        let registry = BaseRegistry::new();
        registry.push(base_with(0, &[(b"k", 0, 100)], &config())); // older
        registry.push(base_with(1, &[(b"k", 0, 200)], &config())); // newer
        let stats = InMemoryStats::new();
        let result = disk_index_lookup(&registry, &Key::from_slice_padded(b"k"), &config(), &stats)
            .unwrap()
            .unwrap();
        assert_eq!(result.data_offset, 200);
    }

    #[test]
    fn tombstone_in_newer_base_masks_older_live_value() {
        let registry = BaseRegistry::new();
        registry.push(base_with(0, &[(b"k", 0, 100)], &config())); // older, live
        registry.push(base_with(1, &[(b"k", REMOVED, 0)], &config())); // newer, removed
        let stats = InMemoryStats::new();
        let result =
            disk_index_lookup(&registry, &Key::from_slice_padded(b"k"), &config(), &stats).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn base_with_no_sorted_index_is_skipped() {
        let registry = BaseRegistry::new();
        let open_base = Arc::new(Bctl::new(1));
        registry.push(open_base);
        registry.push(base_with(0, &[(b"k", 0, 42)], &config()));
        let stats = InMemoryStats::new();
        let result = disk_index_lookup(&registry, &Key::from_slice_padded(b"k"), &config(), &stats)
            .unwrap()
            .unwrap();
        assert_eq!(result.data_offset, 42);
        assert_eq!(stats.snapshot().no_sort, 1);
    }

    #[test]
    fn missing_key_across_all_bases_is_a_miss() {
        let registry = BaseRegistry::new();
        registry.push(base_with(0, &[(b"a", 0, 1)], &config()));
        let stats = InMemoryStats::new();
        let result =
            disk_index_lookup(&registry, &Key::from_slice_padded(b"z"), &config(), &stats).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn result_descriptor_keeps_its_base_alive_until_dropped() {
        let registry = BaseRegistry::new();
        let bctl = base_with(0, &[(b"k", 0, 7)], &config());
        registry.push(bctl.clone());
        let stats = InMemoryStats::new();
        let result = disk_index_lookup(&registry, &Key::from_slice_padded(b"k"), &config(), &stats)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(result.base(), &bctl));
        drop(result);
    }
}
