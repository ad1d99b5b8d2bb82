//! Error types surfaced by the core.
//!
//! One enum per component — component-scoped `thiserror` enums rather
//! than one grab-bag error for the whole crate.

use std::io;
use thiserror::Error;

/// Errors from [`crate::sorted_index::generate_sorted_index`].
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Underlying I/O error (open, preallocate, mmap, msync, rename).
    #[error("I/O error generating sorted index: {0}")]
    Io(#[from] io::Error),

    /// The source index file was empty or had a size that is not a
    /// multiple of the disk control record width.
    #[error("source index size {size} is not a multiple of the disk control record width")]
    MisalignedSize {
        /// Offending byte size of the source index file.
        size: u64,
    },
}

/// Errors from [`crate::block::BlockTable::build`].
#[derive(Debug, Error)]
pub enum BlockTableError {
    /// Underlying I/O error reading the sorted index.
    #[error("I/O error building block table: {0}")]
    Io(#[from] io::Error),

    /// Corruption exceeded the tolerance budget, or hit the first/last
    /// record of a block (whose key would otherwise be indeterminate).
    #[error(
        "index corruption: {corrupt_count} bad record(s), aborting at offset {at_offset} \
         (run a merge/rebuild on this base)"
    )]
    Corrupt {
        /// Total corrupt records observed so far.
        corrupt_count: u64,
        /// Byte offset of the record that triggered the abort.
        at_offset: u64,
    },
}

/// Errors from [`crate::lookup::disk_index_lookup`].
#[derive(Debug, Error)]
pub enum LookupError {
    /// The newest-first scan kept observing concurrently invalidated bases
    /// past the configured retry budget.
    #[error("lookup retry budget exhausted (possible live-lock with data-sort)")]
    Deadlock,
}
