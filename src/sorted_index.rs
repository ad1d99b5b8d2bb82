//! Sorted-index generation (`generate_sorted_index`): produce a key-sorted
//! mmap of a base's index file and atomically publish it.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::{debug, warn};

use crate::bctl::{Bctl, SortedIndex};
use crate::error::GeneratorError;
use crate::record::{cmp_key_removed, DiskControl, DC_SIZE};

/// Path of a base's original, unsorted index file.
pub fn index_file_path(prefix: &Path, index: u64) -> PathBuf {
    append(prefix, &format!("-0.{index}.index"))
}

/// Path of the in-progress sort target.
pub fn tmp_path(prefix: &Path, index: u64) -> PathBuf {
    append(prefix, &format!("-0.{index}.index.tmp"))
}

/// Path of a published sorted index.
pub fn sorted_path(prefix: &Path, index: u64) -> PathBuf {
    append(prefix, &format!("-0.{index}.index.sorted"))
}

fn append(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Unlinks its `.tmp` path on drop unless [`TmpGuard::disarm`] was called
/// first, so any early return (via `?`) after the tmp file is created
/// doesn't leave an orphaned, possibly partially written file behind.
struct TmpGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> TmpGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TmpGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(self.path);
        }
    }
}

/// Runs the full sort-and-publish pipeline for one base's index: map the
/// unsorted index read-only, preallocate and map the `.tmp` target
/// read/write, copy, sort in place, msync, publish under the BCTL's
/// mutex, then atomically rename `.tmp` to `.sorted`.
///
/// A crash before the rename leaves a recoverable `.tmp` file (the
/// startup path is expected to delete stale ones); a crash after leaves a
/// valid `.sorted` index. Any I/O error unwinds without leaving a
/// published mmap or the rename performed.
pub fn generate_sorted_index(bctl: &Bctl, prefix: &Path) -> Result<(), GeneratorError> {
    let base_path = index_file_path(prefix, bctl.index_number);
    let tmp = tmp_path(prefix, bctl.index_number);
    let sorted = sorted_path(prefix, bctl.index_number);

    let source_file = File::open(&base_path)?;
    let source_len = source_file.metadata()?.len();
    if source_len % DC_SIZE as u64 != 0 {
        return Err(GeneratorError::MisalignedSize { size: source_len });
    }

    let tmp_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    let mut guard = TmpGuard::new(&tmp);
    tmp_file.set_len(source_len)?;

    if source_len > 0 {
        let source_mmap = unsafe { Mmap::map(&source_file)? };
        let mut target_mmap = unsafe { MmapMut::map_mut(&tmp_file)? };
        target_mmap.copy_from_slice(&source_mmap[..]);
        drop(source_mmap);

        let record_count = source_len as usize / DC_SIZE;
        let mut records: Vec<DiskControl> = (0..record_count)
            .map(|i| {
                let off = i * DC_SIZE;
                DiskControl::from_bytes(&target_mmap[off..off + DC_SIZE])
                    .expect("bytes just copied from a file of the pinned DC layout")
            })
            .collect();
        records.sort_by(cmp_key_removed);

        for (i, rec) in records.into_iter().enumerate() {
            let off = i * DC_SIZE;
            target_mmap[off..off + DC_SIZE].copy_from_slice(&rec.to_bytes());
        }
        target_mmap.flush()?;
    }
    drop(source_file);

    let publish_file = File::open(&tmp)?;
    let publish_mmap = unsafe { Mmap::map(&publish_file)? };
    bctl.publish_sorted_index(SortedIndex { mmap: publish_mmap });

    if let Err(err) = fs::rename(&tmp, &sorted) {
        warn!(index = bctl.index_number, error = %err, "failed to publish sorted index rename");
        return Err(err.into());
    }
    guard.disarm();

    debug!(
        index = bctl.index_number,
        records = source_len as usize / DC_SIZE.max(1),
        "sorted index published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::record::REMOVED;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_unsorted(path: &Path, records: &[DiskControl]) {
        let mut f = File::create(path).unwrap();
        for r in records {
            f.write_all(&r.to_bytes()).unwrap();
        }
    }

    fn dc(key: &[u8], flags: u64, position: u64) -> DiskControl {
        DiskControl {
            key: Key::from_slice_padded(key),
            flags,
            position,
            data_size: 5,
            disk_size: 5,
        }
    }

    #[test]
    fn publishes_sorted_mmap_and_renames_atomically() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("base");
        let unsorted = index_file_path(&prefix, 0);
        write_unsorted(
            &unsorted,
            &[dc(b"c", 0, 3), dc(b"a", 0, 1), dc(b"b", 0, 2)],
        );

        let bctl = Bctl::new(0);
        generate_sorted_index(&bctl, &prefix).unwrap();

        assert!(!tmp_path(&prefix, 0).exists());
        assert!(sorted_path(&prefix, 0).exists());
        assert!(bctl.has_sorted_index());

        let keys: Vec<u8> = bctl
            .with_sorted_bytes(|bytes| {
                (0..3)
                    .map(|i| {
                        DiskControl::from_bytes(&bytes[i * DC_SIZE..(i + 1) * DC_SIZE])
                            .unwrap()
                            .key
                            .0[0]
                    })
                    .collect()
            })
            .unwrap();
        assert_eq!(keys, vec![b'a', b'b', b'c']);
    }

    #[test]
    fn equal_keys_sort_removed_before_live() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("base");
        let unsorted = index_file_path(&prefix, 0);
        write_unsorted(&unsorted, &[dc(b"k", 0, 1), dc(b"k", REMOVED, 2)]);

        let bctl = Bctl::new(0);
        generate_sorted_index(&bctl, &prefix).unwrap();

        let flags: Vec<u64> = bctl
            .with_sorted_bytes(|bytes| {
                (0..2)
                    .map(|i| {
                        DiskControl::from_bytes(&bytes[i * DC_SIZE..(i + 1) * DC_SIZE])
                            .unwrap()
                            .flags
                    })
                    .collect()
            })
            .unwrap();
        assert_eq!(flags, vec![REMOVED, 0]);
    }

    #[test]
    fn tmp_guard_unlinks_file_unless_disarmed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.tmp");
        File::create(&path).unwrap();

        {
            let _guard = TmpGuard::new(&path);
        }
        assert!(!path.exists(), "guard should unlink on drop by default");

        File::create(&path).unwrap();
        {
            let mut guard = TmpGuard::new(&path);
            guard.disarm();
        }
        assert!(path.exists(), "disarmed guard must not unlink");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn misaligned_source_size_is_rejected() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("base");
        let unsorted = index_file_path(&prefix, 0);
        let mut f = File::create(&unsorted).unwrap();
        f.write_all(&[0u8; 10]).unwrap();

        let bctl = Bctl::new(0);
        let err = generate_sorted_index(&bctl, &prefix).unwrap_err();
        match err {
            GeneratorError::MisalignedSize { size } => assert_eq!(size, 10),
            other => panic!("expected MisalignedSize, got {other:?}"),
        }
    }

    #[test]
    fn empty_source_produces_empty_sorted_index() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("base");
        let unsorted = index_file_path(&prefix, 0);
        File::create(&unsorted).unwrap();

        let bctl = Bctl::new(0);
        generate_sorted_index(&bctl, &prefix).unwrap();
        assert!(bctl.has_sorted_index());
        let len = bctl.with_sorted_bytes(|b| b.len()).unwrap();
        assert_eq!(len, 0);
    }
}
