//! Block table construction (`index_blocks_fill` in the C original):
//! partitions a sorted index into fixed-count blocks and populates their
//! bloom filter as it goes.

use tracing::{debug, trace, warn};

use crate::bloom::BlockBloom;
use crate::config::BackendConfig;
use crate::error::BlockTableError;
use crate::key::Key;
use crate::record::{check_record, DiskControl, DC_SIZE};
use crate::stats::StatsSink;

/// Summary of one contiguous, fixed-count run of DCs in the sorted index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    /// Key of the first valid DC in the block.
    pub start_key: Key,
    /// Key of the last valid DC in the block.
    pub end_key: Key,
    /// Byte offset of the block's first DC within the sorted index.
    pub start_offset: u64,
    /// Byte offset one past the block's last DC.
    pub end_offset: u64,
}

impl IndexBlock {
    /// Whether `key` falls within `[start_key, end_key]`.
    pub fn contains(&self, key: &Key) -> bool {
        self.start_key <= *key && *key <= self.end_key
    }
}

/// The block summaries and bloom filter built over one base's sorted
/// index.
#[derive(Debug, Clone)]
pub struct BlockTable {
    blocks: Vec<IndexBlock>,
    bloom: BlockBloom,
    index_block_size: usize,
}

impl BlockTable {
    /// Number of blocks in the table.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the table has no blocks (empty sorted index).
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block summaries, in sorted-index order.
    pub fn blocks(&self) -> &[IndexBlock] {
        &self.blocks
    }

    /// Number of DC records summarized per block.
    pub fn index_block_size(&self) -> usize {
        self.index_block_size
    }

    /// Bloom filter covering all blocks in this table.
    pub fn bloom(&self) -> &BlockBloom {
        &self.bloom
    }

    /// Binary searches `index_blocks` for the block whose range contains
    /// `key`. The "equal" class is range containment, not point equality,
    /// so a generic total-order binary search cannot be reused directly —
    /// see DESIGN.md.
    pub fn find_block(&self, key: &Key) -> Option<usize> {
        let mut lo = 0isize;
        let mut hi = self.blocks.len() as isize - 1;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let block = &self.blocks[mid as usize];
            if *key < block.start_key {
                hi = mid - 1;
            } else if *key > block.end_key {
                lo = mid + 1;
            } else {
                return Some(mid as usize);
            }
        }
        None
    }

    /// Scans the sorted index byte content (`data`, a packed DC array) and
    /// builds the block table plus bloom filter over it.
    ///
    /// `data_file_size` bounds each record's `position` for `check_record`;
    /// pass `u64::MAX` to skip that bound (e.g. synthetic fixtures).
    pub fn build(
        data: &[u8],
        data_file_size: u64,
        config: &BackendConfig,
        stats: &dyn StatsSink,
    ) -> Result<Self, BlockTableError> {
        if data.len() % DC_SIZE != 0 {
            return Err(BlockTableError::Corrupt {
                corrupt_count: 0,
                at_offset: data.len() as u64,
            });
        }
        let total_records = (data.len() / DC_SIZE) as u64;
        let mut bloom = BlockBloom::new(total_records, config.index_block_size, config.index_block_bloom_length);
        stats.set_bloom_size(bloom.size_bytes());

        let mut blocks = Vec::with_capacity(
            (total_records as usize).div_ceil(config.index_block_size.max(1)),
        );
        let mut corrupt_count: u64 = 0;

        let mut offset: u64 = 0;
        let mut block_id = 0usize;
        let mut in_block = 0usize;
        let mut start_key: Option<Key> = None;
        let mut start_offset: u64 = 0;
        let mut last_valid: Option<DiskControl> = None;

        let total = total_records;
        let mut idx = 0u64;
        while idx < total {
            let is_first_of_block = in_block == 0;
            let is_last_of_block =
                in_block + 1 == config.index_block_size || idx + 1 == total;

            let raw = &data[offset as usize..offset as usize + DC_SIZE];
            let dc = DiskControl::from_bytes(raw).map_err(|_| BlockTableError::Corrupt {
                corrupt_count: corrupt_count + 1,
                at_offset: offset,
            })?;

            if !check_record(&dc, data_file_size) {
                corrupt_count += 1;
                stats.add_index_corrupted_entries(1);
                if is_first_of_block || is_last_of_block || corrupt_count > config.corruption_max {
                    warn!(
                        offset,
                        corrupt_count,
                        "index corruption exceeds tolerance; aborting block table build"
                    );
                    return Err(BlockTableError::Corrupt {
                        corrupt_count,
                        at_offset: offset,
                    });
                }
                trace!(offset, "skipping corrupt record mid-block");
                offset += DC_SIZE as u64;
                idx += 1;
                in_block += 1;
                if in_block == config.index_block_size {
                    in_block = 0;
                }
                continue;
            }

            if is_first_of_block {
                start_key = Some(dc.key);
                start_offset = offset;
            }

            if dc.is_removed() {
                stats.add_records_removed(1);
                stats.add_removed_size(dc.disk_size);
            } else {
                bloom.insert(block_id, &dc.key);
            }

            last_valid = Some(dc);
            offset += DC_SIZE as u64;
            idx += 1;
            in_block += 1;

            if in_block == config.index_block_size || idx == total {
                let end = last_valid.expect("at least one record processed in this block");
                blocks.push(IndexBlock {
                    start_key: start_key.expect("start_key set at block entry"),
                    end_key: end.key,
                    start_offset,
                    end_offset: offset,
                });
                block_id += 1;
                in_block = 0;
            }
        }

        debug!(
            blocks = blocks.len(),
            corrupt_count, "block table built"
        );
        stats.set_index_blocks_size((blocks.len() * std::mem::size_of::<IndexBlock>()) as u64);

        Ok(Self {
            blocks,
            bloom,
            index_block_size: config.index_block_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::REMOVED;
    use crate::stats::InMemoryStats;

    fn dc_bytes(key: &[u8], flags: u64, position: u64, data_size: u64, disk_size: u64) -> Vec<u8> {
        DiskControl {
            key: Key::from_slice_padded(key),
            flags,
            position,
            data_size,
            disk_size,
        }
        .to_bytes()
        .to_vec()
    }

    fn small_config() -> BackendConfig {
        BackendConfig {
            index_block_size: 4,
            index_block_bloom_length: 16,
            corruption_max: 1,
            max_tries: 10,
        }
    }

    #[test]
    fn builds_expected_block_count_and_ranges() {
        let mut data = Vec::new();
        for i in 1u8..=10 {
            data.extend(dc_bytes(&[i], 0, i as u64 * 10, 5, 5));
        }
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap();
        assert_eq!(table.len(), 3); // ceil(10/4)
        assert_eq!(table.blocks()[0].start_key, Key::from_slice_padded(&[1]));
        assert_eq!(table.blocks()[0].end_key, Key::from_slice_padded(&[4]));
        assert_eq!(table.blocks()[2].start_key, Key::from_slice_padded(&[9]));
        assert_eq!(table.blocks()[2].end_key, Key::from_slice_padded(&[10]));
    }

    #[test]
    fn blocks_tile_without_gaps_or_overlap() {
        let mut data = Vec::new();
        for i in 1u8..=10 {
            data.extend(dc_bytes(&[i], 0, 0, 5, 5));
        }
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap();
        for pair in table.blocks().windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(table.blocks().last().unwrap().end_offset, data.len() as u64);
    }

    #[test]
    fn find_block_locates_containing_range() {
        let mut data = Vec::new();
        for i in 1u8..=10 {
            data.extend(dc_bytes(&[i], 0, 0, 5, 5));
        }
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap();
        let idx = table.find_block(&Key::from_slice_padded(&[5])).unwrap();
        assert!(table.blocks()[idx].contains(&Key::from_slice_padded(&[5])));
        assert!(table.find_block(&Key::from_slice_padded(&[99])).is_none());
    }

    #[test]
    fn mid_block_corruption_is_tolerated_and_counted() {
        let mut data = Vec::new();
        data.extend(dc_bytes(&[1], 0, 0, 5, 5));
        data.extend(dc_bytes(&[2], 0, 0, 100, 5)); // disk_size < data_size: corrupt
        data.extend(dc_bytes(&[3], 0, 0, 5, 5));
        data.extend(dc_bytes(&[4], 0, 0, 5, 5));
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(stats.snapshot().index_corrupted_entries, 1);
        assert_eq!(table.blocks()[0].start_key, Key::from_slice_padded(&[1]));
        assert_eq!(table.blocks()[0].end_key, Key::from_slice_padded(&[4]));
    }

    #[test]
    fn corruption_on_last_of_block_aborts() {
        let mut data = Vec::new();
        data.extend(dc_bytes(&[1], 0, 0, 5, 5));
        data.extend(dc_bytes(&[2], 0, 0, 5, 5));
        data.extend(dc_bytes(&[3], 0, 0, 5, 5));
        data.extend(dc_bytes(&[4], 0, 0, 100, 5)); // last of block, corrupt
        let stats = InMemoryStats::new();
        let err = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap_err();
        match err {
            BlockTableError::Corrupt { corrupt_count, .. } => assert_eq!(corrupt_count, 1),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn removed_keys_are_not_inserted_into_bloom() {
        let mut data = Vec::new();
        data.extend(dc_bytes(b"k", REMOVED, 0, 5, 5));
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap();
        assert!(!table.bloom().may_contain(0, &Key::from_slice_padded(b"k")));
    }

    #[test]
    fn live_keys_are_always_found_by_bloom() {
        let mut data = Vec::new();
        for i in 1u8..=20 {
            data.extend(dc_bytes(&[i], 0, 0, 5, 5));
        }
        let stats = InMemoryStats::new();
        let table = BlockTable::build(&data, u64::MAX, &small_config(), &stats).unwrap();
        for (block_id, block) in table.blocks().iter().enumerate() {
            let records_in_block =
                (block.end_offset - block.start_offset) as usize / DC_SIZE;
            let start_idx = block.start_offset as usize / DC_SIZE;
            for j in 0..records_in_block {
                let key = Key::from_slice_padded(&[(start_idx + j + 1) as u8]);
                assert!(table.bloom().may_contain(block_id, &key));
            }
        }
    }
}
