//! Page header format.
//!
//! Every page starts with a 32-byte header.
//!
//! # Header Layout (32 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   page_id
//!   4       1   page_type
//!   5       1   col_id (owning collection)
//!   6       1   flags
//!   7       1   items_count
//!   8       4   transaction_id
//!  12       2   used_bytes
//!  14       2   fragmented_bytes
//!  16       2   next_free_position
//!  18       1   highest_index (0xFF = none)
//!  19       1   reserved
//!  20       4   position_id (physical position the image was written at)
//!  24       4   checksum (CRC32 of the page, excluding this field)
//!  28       4   reserved
//! ```

use tessera_common::constants::{NO_SLOT, PAGE_CONTENT_SIZE, PAGE_HEADER_SIZE, SLOT_SIZE};
use tessera_common::types::{ColId, PageId, TxnId};

use super::checksum::{compute_page_checksum, CHECKSUM_OFFSET};
use super::types::{extend_page_value, PageFlags, PageSpace, PageType};

/// View over the first 32 bytes of a page.
///
/// Getters work on any byte container; setters need mutable access.
///
/// # Example
///
/// ```rust
/// use tessera_storage::page::{PageHeader, PageType};
/// use tessera_common::types::PageId;
///
/// let mut buffer = vec![0u8; 8192];
/// let mut header = PageHeader::new(&mut buffer[..]);
/// header.initialize(PageId::new(7), PageType::Data);
/// assert_eq!(header.page_id(), PageId::new(7));
/// assert_eq!(header.free_bytes(), 8160);
/// ```
#[derive(Debug)]
pub struct PageHeader<B> {
    data: B,
}

impl<B: AsRef<[u8]>> PageHeader<B> {
    /// Creates a header view.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than the header.
    #[inline]
    pub fn new(data: B) -> Self {
        assert!(
            data.as_ref().len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header"
        );
        Self { data }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    #[inline]
    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.bytes()[offset..offset + 2].try_into().unwrap())
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.bytes()[offset..offset + 4].try_into().unwrap())
    }

    /// Returns the page id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.read_u32(0))
    }

    /// Returns the page type. Unknown values read as `Empty`.
    #[inline]
    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.bytes()[4]).unwrap_or_default()
    }

    /// Returns the raw page type byte.
    #[inline]
    pub fn raw_page_type(&self) -> u8 {
        self.bytes()[4]
    }

    /// Returns the owning collection.
    #[inline]
    pub fn col_id(&self) -> ColId {
        ColId::from_raw(self.bytes()[5])
    }

    /// Returns the page flags.
    #[inline]
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits(self.bytes()[6])
    }

    /// Returns the number of occupied slots.
    #[inline]
    pub fn items_count(&self) -> usize {
        self.bytes()[7] as usize
    }

    /// Returns the transaction that last wrote this page.
    #[inline]
    pub fn transaction_id(&self) -> TxnId {
        TxnId::new(self.read_u32(8))
    }

    /// Returns bytes used by segments.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.read_u16(12) as usize
    }

    /// Returns bytes freed inside the used region.
    #[inline]
    pub fn fragmented_bytes(&self) -> usize {
        self.read_u16(14) as usize
    }

    /// Returns the offset where the next segment would be placed.
    #[inline]
    pub fn next_free_position(&self) -> usize {
        self.read_u16(16) as usize
    }

    /// Returns the highest occupied slot, if any.
    #[inline]
    pub fn highest_index(&self) -> Option<u8> {
        match self.bytes()[18] {
            NO_SLOT => None,
            index => Some(index),
        }
    }

    /// Returns the physical position this image was last written at.
    #[inline]
    pub fn position_id(&self) -> u32 {
        self.read_u32(20)
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        self.read_u32(CHECKSUM_OFFSET)
    }

    /// Verifies the page checksum.
    pub fn verify_checksum(&self) -> bool {
        self.checksum() == compute_page_checksum(self.bytes(), CHECKSUM_OFFSET)
    }

    // =========================================================================
    // Derived values
    // =========================================================================

    /// Bytes taken by the footer directory.
    #[inline]
    pub fn footer_size(&self) -> usize {
        self.highest_index()
            .map_or(0, |h| (h as usize + 1) * SLOT_SIZE)
    }

    /// Free bytes, counting fragmented space. Zero-item pages report the
    /// whole content area.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        if self.items_count() == 0 {
            PAGE_CONTENT_SIZE
        } else {
            PAGE_CONTENT_SIZE - self.used_bytes() - self.footer_size()
        }
    }

    /// Free-space class recorded for this page in the allocation map.
    #[inline]
    pub fn space(&self) -> PageSpace {
        extend_page_value(self.page_type(), self.free_bytes(), self.items_count())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> PageHeader<B> {
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    #[inline]
    fn write_u16(&mut self, offset: usize, value: u16) {
        self.bytes_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Resets the header of a page that starts a new life as `page_type`.
    pub fn initialize(&mut self, page_id: PageId, page_type: PageType) {
        self.bytes_mut()[..PAGE_HEADER_SIZE].fill(0);
        self.set_page_id(page_id);
        self.set_page_type(page_type);
        self.reset_content_counters();
    }

    /// Resets counters to "no segments".
    pub fn reset_content_counters(&mut self) {
        self.set_items_count(0);
        self.set_used_bytes(0);
        self.set_fragmented_bytes(0);
        self.set_next_free_position(PAGE_HEADER_SIZE);
        self.set_highest_index(None);
    }

    /// Sets the page id.
    #[inline]
    pub fn set_page_id(&mut self, page_id: PageId) {
        self.write_u32(0, page_id.as_u32());
    }

    /// Sets the page type.
    #[inline]
    pub fn set_page_type(&mut self, page_type: PageType) {
        self.bytes_mut()[4] = page_type as u8;
    }

    /// Sets the owning collection.
    #[inline]
    pub fn set_col_id(&mut self, col_id: ColId) {
        self.bytes_mut()[5] = col_id.as_u8();
    }

    /// Sets the page flags.
    #[inline]
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.bytes_mut()[6] = flags.bits();
    }

    /// Sets one flag.
    #[inline]
    pub fn set_flag(&mut self, flag: u8) {
        let mut flags = self.flags();
        flags.set(flag);
        self.set_flags(flags);
    }

    /// Clears one flag.
    #[inline]
    pub fn clear_flag(&mut self, flag: u8) {
        let mut flags = self.flags();
        flags.clear(flag);
        self.set_flags(flags);
    }

    /// Sets the number of occupied slots.
    #[inline]
    pub fn set_items_count(&mut self, count: usize) {
        self.bytes_mut()[7] = count as u8;
    }

    /// Sets the writing transaction.
    #[inline]
    pub fn set_transaction_id(&mut self, txn_id: TxnId) {
        self.write_u32(8, txn_id.as_u32());
    }

    /// Sets the used byte count.
    #[inline]
    pub fn set_used_bytes(&mut self, used: usize) {
        self.write_u16(12, used as u16);
    }

    /// Sets the fragmented byte count.
    #[inline]
    pub fn set_fragmented_bytes(&mut self, fragmented: usize) {
        self.write_u16(14, fragmented as u16);
    }

    /// Sets the next free position.
    #[inline]
    pub fn set_next_free_position(&mut self, position: usize) {
        self.write_u16(16, position as u16);
    }

    /// Sets the highest occupied slot.
    #[inline]
    pub fn set_highest_index(&mut self, index: Option<u8>) {
        self.bytes_mut()[18] = index.unwrap_or(NO_SLOT);
    }

    /// Sets the recovery position marker.
    #[inline]
    pub fn set_position_id(&mut self, position: u32) {
        self.write_u32(20, position);
    }

    /// Computes and stores the checksum. Call after every other change.
    pub fn update_checksum(&mut self) {
        let checksum = compute_page_checksum(self.bytes(), CHECKSUM_OFFSET);
        self.write_u32(CHECKSUM_OFFSET, checksum);
    }
}
