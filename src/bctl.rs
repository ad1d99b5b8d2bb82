//! Per-base coordination object (BCTL): owns the sorted mmap, block table,
//! and the locks that let lookups run concurrently with background
//! data-sort.

use std::sync::{Condvar, Mutex, RwLock};

use memmap2::Mmap;
use tracing::trace;

use crate::block::BlockTable;

/// A published sorted index: the mmap plus the base's on-disk index
/// number (used for newest-first ordering and diagnostics).
pub struct SortedIndex {
    /// Read-only mapping of the `.sorted` file.
    pub mmap: Mmap,
}

/// Per-base coordination object.
///
/// The owning backend exclusively holds each `Bctl`; the block table and
/// bloom filter (inside [`BlockTable`]) are exclusively owned by it and
/// co-live with the sorted mmap. A `Bctl` is created when its base is
/// opened and destroyed only after `hold_count` reaches zero following
/// retirement.
pub struct Bctl {
    /// Base index number; higher means newer. Used for newest-first scan
    /// ordering by the lookup coordinator's [`crate::lookup::BaseRegistry`].
    pub index_number: u64,

    /// `false` once the engine has invalidated this base (concurrent
    /// data-sort tore it down); lookups holding a reference to an
    /// invalidated `Bctl` must release and restart.
    valid: Mutex<bool>,

    /// Published sorted index, or `None` if generation hasn't completed
    /// yet (`sort.fd < 0` in the C source).
    sort: Mutex<Option<SortedIndex>>,

    /// Block table + bloom filter built over `sort`. Readers hold this
    /// lock across block-range search and the bloom probe; they release
    /// it before the intra-block binary search because the mmap is kept
    /// alive by the hold, not by this lock.
    index_blocks: RwLock<Option<BlockTable>>,

    hold_count: Mutex<usize>,
    drained: Condvar,
}

impl Bctl {
    /// Creates a BCTL with no sorted index and no block table yet
    /// published — the state of a freshly opened, still-writable base.
    pub fn new(index_number: u64) -> Self {
        Self {
            index_number,
            valid: Mutex::new(true),
            sort: Mutex::new(None),
            index_blocks: RwLock::new(None),
            hold_count: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Whether this base has been invalidated by a concurrent data-sort.
    pub fn is_valid(&self) -> bool {
        *self.valid.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a sorted mmap has been published for this base.
    pub fn has_sorted_index(&self) -> bool {
        self.sort.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Runs `f` with a reference to the published sorted index's bytes,
    /// or returns `None` if none is published.
    pub fn with_sorted_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let guard = self.sort.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|s| f(&s.mmap[..]))
    }

    /// Runs `f` with a reference to the published block table, or returns
    /// `None` if none is published.
    pub fn with_block_table<R>(&self, f: impl FnOnce(&BlockTable) -> R) -> Option<R> {
        let guard = self.index_blocks.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(f)
    }

    /// Publishes a freshly generated sorted index, under the BCTL mutex.
    /// Waits for any in-flight holds to drain first: a lookup may still be
    /// reading the previous mmap (directly, or indirectly through a
    /// [`crate::lookup::ResultDescriptor`]) via [`Bctl::with_sorted_bytes`],
    /// and swapping it out from under that read would be a use-after-free.
    pub fn publish_sorted_index(&self, index: SortedIndex) {
        self.wait_for_drain();
        let mut guard = self.sort.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(index);
    }

    /// Publishes a freshly built block table, under the writer lock, so no
    /// reader ever observes a partially constructed table.
    pub fn publish_block_table(&self, table: BlockTable) {
        self.wait_for_drain();
        let mut guard = self.index_blocks.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(table);
    }

    /// Tears down the block table and bloom filter (`index_blocks_destroy`
    /// in the C source). Waits for any in-flight holds to drain first —
    /// the defining safety property: no reader may observe a freed table.
    pub fn destroy_block_table(&self) {
        self.wait_for_drain();
        let mut guard = self.index_blocks.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Marks this base invalidated, as a concurrent data-sort would when
    /// retiring it. Lookups currently scanning observe this via
    /// [`Bctl::is_valid`] and restart.
    pub fn invalidate(&self) {
        let mut guard = self.valid.lock().unwrap_or_else(|e| e.into_inner());
        *guard = false;
    }

    fn wait_for_drain(&self) {
        let guard = self.hold_count.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = self
            .drained
            .wait_while(guard, |count| *count != 0)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Acquires a scoped hold, blocking destructive operations on this
    /// BCTL until the returned guard is dropped.
    pub fn hold(self: &std::sync::Arc<Self>) -> BaseHold {
        let mut guard = self.hold_count.lock().unwrap_or_else(|e| e.into_inner());
        *guard += 1;
        trace!(index = self.index_number, count = *guard, "hold acquired");
        BaseHold {
            bctl: self.clone(),
        }
    }
}

/// RAII guard representing one outstanding reference on a [`Bctl`].
///
/// Embedding this inside [`crate::lookup::ResultDescriptor`] (rather than
/// releasing the hold before returning a raw reference, as the C source's
/// `eblob_disk_index_lookup` does) closes the use-after-free window the
/// original accepts: the base cannot be destroyed while any `BaseHold`
/// derived from it, including one a caller is still holding via its
/// result, is alive.
pub struct BaseHold {
    bctl: std::sync::Arc<Bctl>,
}

impl BaseHold {
    /// The BCTL this hold keeps alive.
    pub fn bctl(&self) -> &std::sync::Arc<Bctl> {
        &self.bctl
    }
}

impl Drop for BaseHold {
    fn drop(&mut self) {
        let mut guard = self
            .bctl
            .hold_count
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *guard -= 1;
        if *guard == 0 {
            self.bctl.drained.notify_all();
        }
    }
}
