//! Two-level searcher (`find_on_disk`): block-range binary search, bloom
//! probe, intra-block binary search, linear expansion over equal-key runs.

use std::cmp::Ordering;

use crate::block::BlockTable;
use crate::key::Key;
use crate::record::{DiskControl, DC_SIZE};
use crate::stats::LookupStat;

/// One DC read back from the sorted index, together with its byte offset
/// (needed by the caller to compute `index_offset` for the result
/// descriptor).
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub dc: DiskControl,
    pub offset: u64,
}

fn record_at(sorted: &[u8], record_index: u64) -> DiskControl {
    let off = record_index as usize * DC_SIZE;
    DiskControl::from_bytes(&sorted[off..off + DC_SIZE])
        .expect("sorted index bytes were validated by the block table builder")
}

/// Binary searches `[start_idx, end_idx)` (record indices, not byte
/// offsets) for any record equal to `key` under primary-key-only
/// ordering, ignoring the `REMOVED` tiebreak used for on-disk sort
/// order: duplicates of a key may straddle both sides of the pivot a
/// plain comparator would land on, so the caller expands outward from
/// whatever match is found.
fn binary_search_block(sorted: &[u8], start_idx: u64, end_idx: u64, key: &Key) -> Option<u64> {
    let mut lo = start_idx;
    let mut hi = end_idx;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match record_at(sorted, mid).key.cmp(key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Some(mid),
        }
    }
    None
}

/// Scans forward then backward from `hit_idx` over the equal-key run,
/// invoking `accept` on each candidate and returning the first accepted
/// one. Every record examined beyond `hit_idx` itself is counted in
/// `stat.additional_reads`.
fn expand_equal_key_run(
    sorted: &[u8],
    start_idx: u64,
    end_idx: u64,
    hit_idx: u64,
    key: &Key,
    accept: &dyn Fn(&DiskControl) -> bool,
    stat: &mut LookupStat,
) -> Option<Hit> {
    let hit_dc = record_at(sorted, hit_idx);
    if accept(&hit_dc) {
        return Some(Hit {
            dc: hit_dc,
            offset: hit_idx * DC_SIZE as u64,
        });
    }

    let mut i = hit_idx + 1;
    while i < end_idx {
        let dc = record_at(sorted, i);
        if dc.key != *key {
            break;
        }
        stat.additional_reads += 1;
        if accept(&dc) {
            return Some(Hit {
                dc,
                offset: i * DC_SIZE as u64,
            });
        }
        i += 1;
    }

    if hit_idx > start_idx {
        let mut i = hit_idx;
        while i > start_idx {
            i -= 1;
            let dc = record_at(sorted, i);
            if dc.key != *key {
                break;
            }
            stat.additional_reads += 1;
            if accept(&dc) {
                return Some(Hit {
                    dc,
                    offset: i * DC_SIZE as u64,
                });
            }
        }
    }

    None
}

/// Looks up `key` in one base's published sorted index and block table.
///
/// `sorted` is the bytes of the published sorted mmap; `table` its block
/// table. `accept` decides record acceptability (the canonical callback
/// accepts any DC with `REMOVED` unset, see [`crate::record::DiskControl::is_removed`]).
pub fn find_on_disk(
    table: &BlockTable,
    sorted: &[u8],
    key: &Key,
    accept: &dyn Fn(&DiskControl) -> bool,
    stat: &mut LookupStat,
) -> Option<Hit> {
    let block_id = match table.find_block(key) {
        Some(id) => id,
        None => {
            stat.no_block += 1;
            return None;
        }
    };
    stat.found_index_block += 1;

    if !table.bloom().may_contain(block_id, key) {
        stat.bloom_null += 1;
        return None;
    }

    let block = &table.blocks()[block_id];
    let start_idx = block.start_offset / DC_SIZE as u64;
    let end_idx = block.end_offset / DC_SIZE as u64;

    stat.bsearch_reached += 1;
    let hit_idx = binary_search_block(sorted, start_idx, end_idx, key)?;
    stat.bsearch_found += 1;

    expand_equal_key_run(sorted, start_idx, end_idx, hit_idx, key, accept, stat)
}
