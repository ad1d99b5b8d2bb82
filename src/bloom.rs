//! Per-block bloom filter.
//!
//! Each index block gets its own slice of a single bit array rather than
//! its own filter object — the same "one big bitset, many logical filters
//! addressed by block id" layout as fjall's blocked bloom builder
//! (`other_examples/8114d2fe_fjall-rs-lsm-tree__src-segment-filter-blocked_bloom-builder.rs.rs`).
//! Membership is tested with Kirsch-Mitzenmacher double hashing from two
//! independent 64-bit hashes, avoiding `k` independent hash functions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::key::Key;

/// Two independent seeds used to derive the pair of base hashes a key's
/// bit positions are built from.
const SEED_A: u64 = 0x9E3779B97F4A7C15;
const SEED_B: u64 = 0xC2B2AE3D27D4EB4F;

/// Bits contributed to a block's filter per live key it holds:
/// `8 * bloom_size / records`, where `bloom_size` is the bit array's total
/// size in bytes.
fn bits_per_key(bloom_size: u64, records: u64) -> f64 {
    if records == 0 {
        return 0.0;
    }
    8.0 * bloom_size as f64 / records as f64
}

/// Number of hash probes per key: `clamp(round(bits_per_key * ln(2)), 1, 20)`.
///
/// Uses `std::f64::consts::LN_2` directly rather than the `0.69`
/// approximation some implementations hardcode.
fn hash_count(bloom_size: u64, records: u64) -> u32 {
    let k = (bits_per_key(bloom_size, records) * std::f64::consts::LN_2).round();
    k.clamp(1.0, 20.0) as u32
}

/// Size, in bytes, of the bloom bit array for a base with `records` live
/// records laid out in blocks of `index_block_size`, at
/// `index_block_bloom_length` bits per key.
///
/// `bloom_size = ceil(ceil(records / index_block_size) * index_block_bloom_length / 8)`,
/// plus one byte of padding so the final block's slot never runs past the
/// end of the allocation when `records` isn't an exact multiple of
/// `index_block_size`.
pub fn bloom_size_bytes(records: u64, index_block_size: usize, index_block_bloom_length: usize) -> u64 {
    if records == 0 || index_block_size == 0 {
        return 0;
    }
    let num_blocks = records.div_ceil(index_block_size as u64);
    let total_bits = num_blocks * index_block_bloom_length as u64;
    total_bits.div_ceil(8) + 1
}

fn hash_pair(key: &Key) -> (u64, u64) {
    let mut ha = DefaultHasher::new();
    SEED_A.hash(&mut ha);
    key.as_bytes().hash(&mut ha);
    let h1 = ha.finish();

    let mut hb = DefaultHasher::new();
    SEED_B.hash(&mut hb);
    key.as_bytes().hash(&mut hb);
    let h2 = hb.finish();
    (h1, h2)
}

/// A single contiguous bit array shared by all blocks of one base, with
/// each block addressed by a byte-range slot.
#[derive(Debug, Clone)]
pub struct BlockBloom {
    bits: Vec<u8>,
    slot_bits: usize,
    k: u32,
}

impl BlockBloom {
    /// Allocates a zeroed filter sized for `records` spread over blocks of
    /// `index_block_size`, each block's slot carrying
    /// `index_block_bloom_length` bits.
    pub fn new(records: u64, index_block_size: usize, index_block_bloom_length: usize) -> Self {
        let size = bloom_size_bytes(records, index_block_size, index_block_bloom_length);
        Self {
            bits: vec![0u8; size as usize],
            slot_bits: index_block_bloom_length,
            k: hash_count(size, records),
        }
    }

    /// Total size of the underlying bit array, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.bits.len() as u64
    }

    fn bit_index(&self, block_id: usize, hash: u64) -> usize {
        let slot_start = block_id * self.slot_bits;
        slot_start + (hash as usize % self.slot_bits)
    }

    fn set_bit(&mut self, idx: usize) {
        self.bits[idx / 8] |= 1 << (idx % 8);
    }

    fn get_bit(&self, idx: usize) -> bool {
        self.bits[idx / 8] & (1 << (idx % 8)) != 0
    }

    /// Records `key` as present in `block_id`'s filter.
    pub fn insert(&mut self, block_id: usize, key: &Key) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.k as u64 {
            let combined = h1.wrapping_add(i.wrapping_mul(h2));
            let idx = self.bit_index(block_id, combined);
            self.set_bit(idx);
        }
    }

    /// Returns `false` only when `key` is definitely absent from
    /// `block_id`; `true` means "maybe present, go check the block".
    pub fn may_contain(&self, block_id: usize, key: &Key) -> bool {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.k as u64 {
            let combined = h1.wrapping_add(i.wrapping_mul(h2));
            let idx = self.bit_index(block_id, combined);
            if !self.get_bit(idx) {
                return false;
            }
        }
        true
    }
}
