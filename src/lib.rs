//! # closedbase-index
//!
//! The closed-base index lookup core of an append-only blob store: once a
//! base stops accepting writes, its index is sorted by key, memory-mapped,
//! and summarized into fixed-count blocks with a per-block bloom filter.
//! Lookups use a two-level accelerated binary search that runs
//! concurrently with background rebuilds of other bases.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     BaseRegistry                           │
//! │   newest ─────────────────────────────────────────► oldest │
//! │   ┌────────┐   ┌────────┐   ┌────────┐   ┌────────┐        │
//! │   │  Bctl  │   │  Bctl  │   │  Bctl  │   │  Bctl  │  ...   │
//! │   └───┬────┘   └───┬────┘   └────────┘   └────────┘        │
//! │       │ sort        │ index_blocks                         │
//! │       ▼             ▼                                      │
//! │  sorted mmap    BlockTable + BlockBloom                    │
//! └────────────────────────────────────────────────────────────┘
//!            ▲                              ▲
//!            │ publish (generator)          │ fill (builder)
//!   sorted_index::generate_sorted_index   block::BlockTable::build
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`lookup`] | Newest-first lookup coordinator; holds bases across the search and restarts on concurrent invalidation |
//! | [`search`] | Two-level searcher: block-range binary search, bloom probe, intra-block binary search, equal-key expansion |
//! | [`block`] | Block table builder: partitions a sorted index into fixed-count blocks and their bloom filter |
//! | [`bloom`] | Per-block bit-array bloom filter with double-hashing |
//! | [`sorted_index`] | Sort-and-publish pipeline turning a base's raw index into a sorted mmap |
//! | [`bctl`] | Per-base coordination object and the RAII hold guard that gates destructive operations |
//! | [`record`] | The fixed-width disk control record and its on-disk sort order |
//! | [`key`] | Opaque fixed-width lookup key |
//! | [`config`] | Backend-wide tunables |
//! | [`stats`] | Counters the core emits |
//! | [`error`] | Typed errors per component |
//! | [`encoding`] | Deterministic little-endian binary encoding for the disk control record |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use closedbase_index::bctl::Bctl;
//! use closedbase_index::block::BlockTable;
//! use closedbase_index::config::BackendConfig;
//! use closedbase_index::key::Key;
//! use closedbase_index::lookup::{disk_index_lookup, BaseRegistry};
//! use closedbase_index::sorted_index::generate_sorted_index;
//! use closedbase_index::stats::InMemoryStats;
//!
//! let config = BackendConfig::default();
//! let stats = InMemoryStats::new();
//!
//! let bctl = Arc::new(Bctl::new(0));
//! generate_sorted_index(&bctl, Path::new("/tmp/my-store/base")).unwrap();
//! bctl.with_sorted_bytes(|bytes| {
//!     let table = BlockTable::build(bytes, u64::MAX, &config, &stats).unwrap();
//!     bctl.publish_block_table(table);
//! });
//!
//! let registry = BaseRegistry::new();
//! registry.push(bctl);
//!
//! let key = Key::from_slice_padded(b"hello");
//! if let Some(result) = disk_index_lookup(&registry, &key, &config, &stats).unwrap() {
//!     println!("found at data offset {}", result.data_offset);
//! }
//! ```

#![allow(dead_code)]

pub mod bctl;
pub mod block;
pub mod bloom;
pub mod config;
pub mod encoding;
pub mod error;
pub mod key;
pub mod lookup;
pub mod record;
pub mod search;
pub mod sorted_index;
pub mod stats;
