//! The disk control record (DC): the fixed-size unit the sorted index is an
//! array of.

use std::cmp::Ordering;

use crate::encoding::{Decode, Encode};
use crate::key::{Key, KEY_SIZE};

/// `flags` bit marking a record as removed (tombstoned).
pub const REMOVED: u64 = 1 << 0;

/// On-disk byte width of one [`DiskControl`] record.
///
/// `key (64) + flags (8) + position (8) + data_size (8) + disk_size (8)`.
pub const DC_SIZE: usize = KEY_SIZE + 8 + 8 + 8 + 8;

/// Fixed-size on-disk record describing one stored object.
///
/// All multi-byte fields are little-endian on disk; decoding through
/// [`DiskControl::from_bytes`] always yields host-order values (the
/// `u64::from_le_bytes` family performs that normalization), so once a
/// value of this type exists in memory its fields are safe to compare
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskControl {
    /// Key identifying the stored object.
    pub key: Key,
    /// Bitfield; only [`REMOVED`] is meaningful to this core.
    pub flags: u64,
    /// Offset of the payload within the base's data file.
    pub position: u64,
    /// Length of the payload, in bytes.
    pub data_size: u64,
    /// On-disk footprint of the payload (`>= data_size`).
    pub disk_size: u64,
}

impl DiskControl {
    /// Whether the `REMOVED` bit is set.
    pub fn is_removed(&self) -> bool {
        self.flags & REMOVED != 0
    }

    /// Decodes one record from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, crate::encoding::EncodingError> {
        let mut off = 0;
        let (key, n) = <[u8; KEY_SIZE]>::decode_from(&buf[off..])?;
        off += n;
        let (flags, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (position, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (data_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (disk_size, _n) = u64::decode_from(&buf[off..])?;
        Ok(Self {
            key: Key(key),
            flags,
            position,
            data_size,
            disk_size,
        })
    }

    /// Encodes this record as `DC_SIZE` little-endian bytes.
    pub fn to_bytes(self) -> [u8; DC_SIZE] {
        let mut buf = Vec::with_capacity(DC_SIZE);
        self.key.0.encode_to(&mut buf);
        self.flags.encode_to(&mut buf);
        self.position.encode_to(&mut buf);
        self.data_size.encode_to(&mut buf);
        self.disk_size.encode_to(&mut buf);
        let mut out = [0u8; DC_SIZE];
        out.copy_from_slice(&buf);
        out
    }
}

/// Total order used to sort a base's index: `(key asc, REMOVED desc)`.
///
/// For equal keys, the tombstone (REMOVED) sorts before the live record,
/// so a forward linear scan from the first match finds the tombstone
/// before the live value — see [`crate::search::find_on_disk`].
pub fn cmp_key_removed(a: &DiskControl, b: &DiskControl) -> Ordering {
    a.key
        .cmp(&b.key)
        .then_with(|| b.is_removed().cmp(&a.is_removed()))
}

/// Order used for the intra-block binary search: primary key only.
///
/// The REMOVED bit is deliberately excluded — equal-key runs must be
/// reachable by this comparison so the search can land anywhere inside
/// them and let the caller's linear expansion sort out tombstones.
pub fn cmp_key_only(a: &DiskControl, b: &DiskControl) -> Ordering {
    a.key.cmp(&b.key)
}

/// Structural sanity check for one decoded record.
///
/// `data_file_size` bounds `position`; pass `u64::MAX` when the data file
/// size is not known or not being enforced (e.g. synthetic test fixtures).
pub fn check_record(dc: &DiskControl, data_file_size: u64) -> bool {
    if dc.disk_size < dc.data_size {
        return false;
    }
    if data_file_size != u64::MAX {
        let end = match dc.position.checked_add(dc.disk_size) {
            Some(end) => end,
            None => return false,
        };
        if end > data_file_size {
            return false;
        }
    }
    true
}
