//! Identifier types for tessera.
//!
//! These types wrap the raw integers stored in page headers and records,
//! keeping page ids, collection ids and transaction ids from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{MASTER_COL_ID, MAX_COLLECTIONS, NO_SLOT};
use crate::error::{TesseraError, TesseraResult};

// =============================================================================
// PageId
// =============================================================================

/// Logical page identifier.
///
/// A page id is also the page's index in the data file: page `n` lives at
/// byte offset `n * PAGE_SIZE` once checkpointed.
///
/// # Example
///
/// ```rust
/// use tessera_common::types::PageId;
///
/// let page = PageId::new(42);
/// assert_eq!(page.as_u32(), 42);
/// assert_eq!(page.file_offset(), 42 * 8192);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Sentinel for "no page".
    pub const EMPTY: Self = Self(u32::MAX);

    /// The file header page.
    pub const HEADER: Self = Self(0);

    /// Creates a new `PageId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the empty sentinel.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == u32::MAX
    }

    /// Byte offset of this page in the data file.
    #[inline]
    #[must_use]
    pub const fn file_offset(self) -> u64 {
        self.0 as u64 * crate::constants::PAGE_SIZE as u64
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "PageId(EMPTY)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// RowId
// =============================================================================

/// Address of a data block or index node: page id plus slot index.
///
/// Encoded on disk as 5 bytes (page id little endian, then the slot).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId {
    /// Page hosting the segment.
    pub page_id: PageId,
    /// Slot index inside the page.
    pub index: u8,
}

impl RowId {
    /// Encoded size in bytes.
    pub const SIZE: usize = 5;

    /// Sentinel for "no row".
    pub const EMPTY: Self = Self {
        page_id: PageId::EMPTY,
        index: NO_SLOT,
    };

    /// Creates a new row id.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, index: u8) -> Self {
        Self { page_id, index }
    }

    /// Returns true for the empty sentinel.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.page_id.is_empty() && self.index == NO_SLOT
    }

    /// Reads a row id from the first 5 bytes of `buf`.
    #[inline]
    #[must_use]
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: PageId(u32::from_le_bytes(buf[0..4].try_into().unwrap())),
            index: buf[4],
        }
    }

    /// Writes this row id into the first 5 bytes of `buf`.
    #[inline]
    pub fn write_to(self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4] = self.index;
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "RowId(EMPTY)")
        } else {
            write!(f, "RowId({}:{})", self.page_id.0, self.index)
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.index)
    }
}

// =============================================================================
// ColId
// =============================================================================

/// Collection identifier.
///
/// `0` marks an unowned extend and is never a valid collection. User
/// collections use `1..=250`; `255` is the master-catalog lock id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ColId(u8);

impl ColId {
    /// Owner value of an extend that belongs to nobody.
    pub const NONE: Self = Self(0);

    /// Master catalog pseudo collection, used only for locking.
    pub const MASTER: Self = Self(MASTER_COL_ID);

    /// Creates a user collection id, rejecting values outside `1..=250`.
    pub fn new(id: u8) -> TesseraResult<Self> {
        if id == 0 || id > MAX_COLLECTIONS {
            return Err(TesseraError::CollectionLimit {
                col_id: id,
                max: MAX_COLLECTIONS,
            });
        }
        Ok(Self(id))
    }

    /// Wraps a raw value read from disk without validation.
    #[inline]
    #[must_use]
    pub const fn from_raw(id: u8) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns true for the unowned marker.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "ColId(NONE)"),
            MASTER_COL_ID => write!(f, "ColId(MASTER)"),
            id => write!(f, "ColId({id})"),
        }
    }
}

impl fmt::Display for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TxnId
// =============================================================================

/// Transaction identifier stamped into every page a transaction writes.
///
/// Ids increase monotonically for the lifetime of a log file. Zero means
/// "never written by a transaction".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct TxnId(u32);

impl TxnId {
    /// No transaction.
    pub const NONE: Self = Self(0);

    /// Creates a new transaction id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// FileOrigin
// =============================================================================

/// Which physical file a page position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOrigin {
    /// The main data file.
    Data,
    /// The append-only log file.
    Log,
}

impl fmt::Display for FileOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Log => write!(f, "log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_encoding() {
        let row = RowId::new(PageId::new(0x0102_0304), 7);
        let mut buf = [0u8; 5];
        row.write_to(&mut buf);
        assert_eq!(buf, [4, 3, 2, 1, 7]);
        assert_eq!(RowId::read_from(&buf), row);
    }

    #[test]
    fn test_row_id_empty() {
        let mut buf = [0u8; 5];
        RowId::EMPTY.write_to(&mut buf);
        assert_eq!(buf, [0xFF; 5]);
        assert!(RowId::read_from(&buf).is_empty());
        assert!(!RowId::new(PageId::new(1), 0).is_empty());
    }

    #[test]
    fn test_col_id_limits() {
        assert!(ColId::new(0).is_err());
        assert!(ColId::new(1).is_ok());
        assert!(ColId::new(250).is_ok());
        assert!(matches!(
            ColId::new(251),
            Err(TesseraError::CollectionLimit { col_id: 251, .. })
        ));
        assert!(ColId::NONE.is_none());
        assert_eq!(format!("{:?}", ColId::MASTER), "ColId(MASTER)");
    }

    #[test]
    fn test_page_id() {
        assert!(PageId::EMPTY.is_empty());
        assert_eq!(PageId::new(3).file_offset(), 3 * 8192);
        assert_eq!(format!("{:?}", PageId::EMPTY), "PageId(EMPTY)");
    }
}
