//! On-disk layout constants and engine limits.
//!
//! Every value in this module is part of the persisted file format.
//! Changing any of them makes existing data files unreadable.

// =============================================================================
// Page Layout
// =============================================================================

/// Size of every page in bytes (8 KB).
pub const PAGE_SIZE: usize = 8192;

/// Size of the fixed page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Bytes available to segments and the footer directory.
pub const PAGE_CONTENT_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Size of one footer directory entry: location (2) + length (2).
pub const SLOT_SIZE: usize = 4;

/// Maximum number of slots in one page. Slot indexes run `0..=254`.
pub const MAX_ITEMS_COUNT: usize = 255;

/// Slot index sentinel meaning "no slot".
pub const NO_SLOT: u8 = 0xFF;

/// Segments are always a multiple of this many bytes.
pub const SEGMENT_ALIGNMENT: usize = 8;

// =============================================================================
// Allocation Map
// =============================================================================

/// Number of pages grouped into one extend.
pub const EXTEND_SIZE: usize = 8;

/// Number of 32-bit extend words that fit in one allocation-map page.
pub const EXTENDS_PER_MAP_PAGE: usize = PAGE_CONTENT_SIZE / 4;

/// Number of pages governed by one allocation-map page.
pub const PAGES_PER_MAP_PAGE: u32 = (EXTEND_SIZE * EXTENDS_PER_MAP_PAGE) as u32;

/// Distance between two consecutive allocation-map pages.
pub const MAP_PAGE_STRIDE: u32 = 1 + PAGES_PER_MAP_PAGE;

/// Page id of the first allocation-map page (page 0 is the file header).
pub const FIRST_MAP_PAGE_ID: u32 = 1;

// =============================================================================
// Collections
// =============================================================================

/// Highest user collection id. Id 0 marks an unowned extend.
pub const MAX_COLLECTIONS: u8 = 250;

/// Pseudo collection id used to lock the master catalog.
pub const MASTER_COL_ID: u8 = 255;

// =============================================================================
// Data Blocks
// =============================================================================

/// Data block header: format (1) + extend flag (1) + padding (1) + next block (5).
pub const DATA_BLOCK_HEADER_SIZE: usize = 8;

/// A data page is offered for new blocks only while it has this much free space.
pub const DATA_RESERVED_BYTES: usize = PAGE_CONTENT_SIZE / 8;

/// Largest content fragment a single data block can carry.
pub const MAX_DATA_BYTES_PER_BLOCK: usize = (PAGE_CONTENT_SIZE - SLOT_SIZE - DATA_BLOCK_HEADER_SIZE)
    / SEGMENT_ALIGNMENT
    * SEGMENT_ALIGNMENT;

// =============================================================================
// Index Nodes
// =============================================================================

/// Maximum skip-list height. Head and tail sentinels always use it.
pub const MAX_LEVEL_LENGTH: u8 = 32;

/// Maximum encoded size of an index key.
pub const MAX_INDEX_KEY_LENGTH: usize = 1023;

/// Index node header: slot (1) + levels (1) + reserved (2) + data block (5) + next node (5).
pub const INDEX_NODE_HEADER_SIZE: usize = 14;

/// One level entry: next (5) + prev (5).
pub const INDEX_NODE_LEVEL_SIZE: usize = 10;

/// Largest possible index node segment, aligned.
pub const MAX_INDEX_NODE_SIZE: usize = (INDEX_NODE_HEADER_SIZE
    + MAX_LEVEL_LENGTH as usize * INDEX_NODE_LEVEL_SIZE
    + MAX_INDEX_KEY_LENGTH
    + SEGMENT_ALIGNMENT
    - 1)
    / SEGMENT_ALIGNMENT
    * SEGMENT_ALIGNMENT;

/// An index page is offered for new nodes only while the largest node still fits.
pub const INDEX_RESERVED_BYTES: usize = MAX_INDEX_NODE_SIZE + SLOT_SIZE;

/// Maximum number of index definitions per collection (slot 0 is the primary key).
pub const MAX_INDEXES_PER_COLLECTION: u8 = 32;

// =============================================================================
// File Header
// =============================================================================

/// Magic text stored in the header page.
pub const FILE_MAGIC: &[u8; 8] = b"TESSERA\0";

/// Current file format version.
pub const FILE_VERSION: u8 = 1;

/// Suffix appended to the data file name to form the log file name.
pub const LOG_FILE_SUFFIX: &str = "-log";

// =============================================================================
// Defaults
// =============================================================================

/// Default lock acquisition timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;

/// Default log size (in pages) that triggers an automatic checkpoint.
pub const DEFAULT_CHECKPOINT_PAGES: u32 = 1000;

/// Default number of writable pages a transaction holds before a safepoint.
pub const DEFAULT_MAX_TRANSACTION_PAGES: usize = 1000;

/// Default buffer segment ladder, in pages. The last entry repeats.
pub const DEFAULT_CACHE_SEGMENT_SIZES: [usize; 5] = [12, 50, 100, 500, 1000];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(PAGE_CONTENT_SIZE, 8160);
        assert_eq!(EXTENDS_PER_MAP_PAGE, 2040);
        assert_eq!(PAGES_PER_MAP_PAGE, 16320);
        assert_eq!(MAX_DATA_BYTES_PER_BLOCK, 8144);
        assert_eq!(MAX_INDEX_NODE_SIZE % SEGMENT_ALIGNMENT, 0);
        assert!(MAX_INDEX_NODE_SIZE >= 14 + 320 + 1023);
        assert!(INDEX_RESERVED_BYTES < PAGE_CONTENT_SIZE / 4);
    }
}
