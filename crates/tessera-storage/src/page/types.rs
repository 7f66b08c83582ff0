//! Page types, flags, and free-space classes.

use std::fmt;

use tessera_common::constants::{
    DATA_RESERVED_BYTES, INDEX_RESERVED_BYTES, MAX_ITEMS_COUNT, PAGE_CONTENT_SIZE,
};

/// Types of pages in a tessera file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PageType {
    /// Never used, or returned to the allocator.
    #[default]
    Empty = 0,
    /// File header (page 0 only).
    Header = 1,
    /// Allocation map page.
    AllocationMap = 2,
    /// Holds data blocks.
    Data = 3,
    /// Holds index nodes.
    Index = 4,
}

impl PageType {
    /// Creates a PageType from a raw byte value.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::Header),
            2 => Some(Self::AllocationMap),
            3 => Some(Self::Data),
            4 => Some(Self::Index),
            _ => None,
        }
    }

    /// Returns true for page types that carry slotted segments.
    #[inline]
    #[must_use]
    pub const fn is_slotted(self) -> bool {
        matches!(self, Self::Data | Self::Index)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Header => write!(f, "Header"),
            Self::AllocationMap => write!(f, "AllocationMap"),
            Self::Data => write!(f, "Data"),
            Self::Index => write!(f, "Index"),
        }
    }
}

/// Flags for page state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(u8);

impl PageFlags {
    /// Page was modified by the transaction holding it.
    pub const DIRTY: u8 = 1 << 0;
    /// Last page written by a committed transaction.
    pub const CONFIRMED: u8 = 1 << 1;

    /// Creates empty flags.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates flags from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Sets a flag.
    #[inline]
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clears a flag.
    #[inline]
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Checks if a flag is set.
    #[inline]
    #[must_use]
    pub const fn is_set(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Returns true if the page is dirty.
    #[inline]
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        self.is_set(Self::DIRTY)
    }

    /// Returns true if the page closes a committed transaction.
    #[inline]
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        self.is_set(Self::CONFIRMED)
    }
}

/// Free-space class of a page, stored as a 3-bit code in the allocation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageSpace {
    /// Unused page, available to any type.
    Empty = 0b000,
    /// Data page with room for another block.
    Data = 0b001,
    /// Index page with room for the largest node.
    Index = 0b010,
    /// No room worth offering.
    Full = 0b111,
}

impl PageSpace {
    /// Decodes a 3-bit code. Unknown codes read as `Full`.
    #[inline]
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code & 0b111 {
            0b000 => Self::Empty,
            0b001 => Self::Data,
            0b010 => Self::Index,
            _ => Self::Full,
        }
    }

    /// The 3-bit code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The class a page of `page_type` with room to spare is recorded as.
    #[inline]
    #[must_use]
    pub const fn for_type(page_type: PageType) -> Self {
        match page_type {
            PageType::Data => Self::Data,
            PageType::Index => Self::Index,
            _ => Self::Full,
        }
    }
}

/// Maps a page to its free-space class.
///
/// `free_bytes` is content space not used by segments or the footer.
/// `items_count` short-circuits the two cases the byte count cannot see:
/// an empty page is always `Empty`, a page without free slots is `Full`.
#[must_use]
pub const fn extend_page_value(page_type: PageType, free_bytes: usize, items_count: usize) -> PageSpace {
    if items_count == 0 || free_bytes == PAGE_CONTENT_SIZE {
        return PageSpace::Empty;
    }
    if items_count >= MAX_ITEMS_COUNT {
        return PageSpace::Full;
    }
    match page_type {
        PageType::Data if free_bytes >= DATA_RESERVED_BYTES => PageSpace::Data,
        PageType::Index if free_bytes >= INDEX_RESERVED_BYTES => PageSpace::Index,
        _ => PageSpace::Full,
    }
}
