//! Slotted page memory and the in-page segment allocator.
//!
//! Segments grow up from the header; the slot directory grows down from
//! the end of the page. Slot `i` lives at `PAGE_SIZE - (i + 1) * 4`.
//!
//! ```text
//! +--------+-----------+-----------+------------------+---------+---------+
//! | header | segment 0 | segment 2 |    free space    | slot 2  | slot 1  | slot 0 |
//! +--------+-----------+-----------+------------------+---------+---------+
//!          ^ 32                    ^ next_free_position
//! ```
//!
//! Slot indexes are stable: defragmentation moves segment bytes and
//! rewrites their locations but never renumbers slots, so row ids held
//! elsewhere stay valid. Throughout, `next_free_position` equals
//! `32 + used_bytes + fragmented_bytes`.

use tracing::trace;

use tessera_common::constants::{
    MAX_ITEMS_COUNT, PAGE_HEADER_SIZE, PAGE_SIZE, SEGMENT_ALIGNMENT, SLOT_SIZE,
};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::PageId;

use super::header::PageHeader;

/// A footer directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Offset of the segment's first byte within the page.
    pub location: u16,
    /// Length in bytes (0 = empty slot).
    pub length: u16,
}

impl Segment {
    /// Returns true if the slot is unused.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Byte range of the segment within the page.
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.location as usize..self.location as usize + self.length as usize
    }
}

#[inline]
const fn slot_offset(index: u8) -> usize {
    PAGE_SIZE - (index as usize + 1) * SLOT_SIZE
}

/// Slotted view over a full page buffer.
///
/// # Example
///
/// ```rust
/// use tessera_storage::page::{PageType, SlottedPage};
/// use tessera_common::types::PageId;
///
/// let mut buffer = vec![0u8; 8192];
/// let mut page = SlottedPage::new(&mut buffer[..]);
/// page.initialize(PageId::new(3), PageType::Data);
///
/// let slot = page.insert(16).unwrap();
/// page.get_mut(slot).unwrap()[..5].copy_from_slice(b"hello");
/// assert_eq!(&page.get(slot).unwrap()[..5], b"hello");
/// ```
#[derive(Debug)]
pub struct SlottedPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> SlottedPage<B> {
    /// Wraps a page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not exactly one page.
    #[inline]
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE, "buffer is not one page");
        Self { data }
    }

    /// Returns the underlying buffer.
    #[inline]
    pub fn into_inner(self) -> B {
        self.data
    }

    /// Read-only header view.
    #[inline]
    pub fn header(&self) -> PageHeader<&[u8]> {
        PageHeader::new(self.data.as_ref())
    }

    /// Page id from the header.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.header().page_id()
    }

    /// Reads the directory entry of `index`. Slots above the highest index
    /// read as empty.
    pub fn segment(&self, index: u8) -> Segment {
        match self.header().highest_index() {
            Some(highest) if index <= highest => {
                let offset = slot_offset(index);
                let bytes = &self.data.as_ref()[offset..offset + SLOT_SIZE];
                Segment {
                    location: u16::from_le_bytes([bytes[0], bytes[1]]),
                    length: u16::from_le_bytes([bytes[2], bytes[3]]),
                }
            }
            _ => Segment::default(),
        }
    }

    /// Returns the bytes of an occupied slot.
    pub fn get(&self, index: u8) -> Option<&[u8]> {
        let segment = self.segment(index);
        if segment.is_empty() {
            None
        } else {
            Some(&self.data.as_ref()[segment.range()])
        }
    }

    /// Iterates over occupied slot indexes in ascending order.
    pub fn occupied(&self) -> impl Iterator<Item = u8> + '_ {
        let count = self.header().highest_index().map_or(0, |h| h as usize + 1);
        (0..count)
            .map(|i| i as u8)
            .filter(move |&i| !self.segment(i).is_empty())
    }

    /// Largest aligned segment that `insert` would accept right now.
    pub fn max_insert_len(&self) -> usize {
        let header = self.header();
        if header.items_count() >= MAX_ITEMS_COUNT {
            return 0;
        }
        let extra_footer = match self.first_free_index() {
            Some(index) if header.highest_index().is_some_and(|h| index <= h) => 0,
            Some(_) => SLOT_SIZE,
            None => return 0,
        };
        header.free_bytes().saturating_sub(extra_footer) / SEGMENT_ALIGNMENT * SEGMENT_ALIGNMENT
    }

    /// Lowest slot index not in use.
    fn first_free_index(&self) -> Option<u8> {
        let header = self.header();
        let Some(highest) = header.highest_index() else {
            return Some(0);
        };
        if header.items_count() == highest as usize + 1 {
            return (highest as usize + 1 < MAX_ITEMS_COUNT).then_some(highest + 1);
        }
        (0..highest).find(|&i| self.segment(i).is_empty())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> SlottedPage<B> {
    /// Mutable header view.
    #[inline]
    pub fn header_mut(&mut self) -> PageHeader<&mut [u8]> {
        PageHeader::new(self.data.as_mut())
    }

    /// Zeroes the page and writes a fresh header.
    pub fn initialize(&mut self, page_id: PageId, page_type: super::PageType) {
        self.data.as_mut().fill(0);
        self.header_mut().initialize(page_id, page_type);
    }

    /// Returns the bytes of an occupied slot for writing.
    pub fn get_mut(&mut self, index: u8) -> Option<&mut [u8]> {
        let segment = self.segment(index);
        if segment.is_empty() {
            None
        } else {
            Some(&mut self.data.as_mut()[segment.range()])
        }
    }

    fn write_segment(&mut self, index: u8, segment: Segment) {
        let offset = slot_offset(index);
        let bytes = &mut self.data.as_mut()[offset..offset + SLOT_SIZE];
        bytes[0..2].copy_from_slice(&segment.location.to_le_bytes());
        bytes[2..4].copy_from_slice(&segment.length.to_le_bytes());
    }

    fn check_length(length: usize) -> TesseraResult<()> {
        if length == 0 || length % SEGMENT_ALIGNMENT != 0 {
            return Err(TesseraError::invalid_argument(format!(
                "segment length {length} must be a positive multiple of {SEGMENT_ALIGNMENT}"
            )));
        }
        Ok(())
    }

    /// Allocates a segment of `length` bytes in the lowest free slot.
    pub fn insert(&mut self, length: usize) -> TesseraResult<u8> {
        let index = self.first_free_index().ok_or(TesseraError::TooManyItems {
            page_id: self.page_id(),
        })?;
        self.insert_at(index, length)?;
        Ok(index)
    }

    /// Allocates a segment of `length` bytes in slot `index` and returns its
    /// location. Defragments first if the contiguous free run is too short.
    pub fn insert_at(&mut self, index: u8, length: usize) -> TesseraResult<u16> {
        Self::check_length(length)?;
        let page_id = self.page_id();
        if index as usize >= MAX_ITEMS_COUNT {
            return Err(TesseraError::TooManyItems { page_id });
        }
        if !self.segment(index).is_empty() {
            return Err(TesseraError::internal(format!(
                "slot {index} of page {page_id} is already in use"
            )));
        }

        let header = self.header();
        let highest = header.highest_index();
        let footer = header.footer_size();
        let new_footer = match highest {
            Some(h) if index <= h => footer,
            _ => (index as usize + 1) * SLOT_SIZE,
        };
        let available = header.free_bytes().saturating_sub(new_footer - footer);
        if length > available {
            return Err(TesseraError::PageFull {
                page_id,
                requested: length,
                available,
            });
        }

        if header.next_free_position() + length > PAGE_SIZE - new_footer {
            self.defrag();
        }

        // Directory entries between the old highest and `index` must read
        // as empty.
        let first_gap = highest.map_or(0, |h| h as usize + 1);
        for gap in first_gap..index as usize {
            self.write_segment(gap as u8, Segment::default());
        }

        let location = self.header().next_free_position();
        let items = self.header().items_count();
        let used = self.header().used_bytes();
        {
            let mut header = self.header_mut();
            header.set_items_count(items + 1);
            header.set_used_bytes(used + length);
            header.set_next_free_position(location + length);
            header.set_highest_index(Some(highest.map_or(index, |h| h.max(index))));
        }
        self.write_segment(
            index,
            Segment {
                location: location as u16,
                length: length as u16,
            },
        );
        Ok(location as u16)
    }

    /// Frees the segment in `index`.
    ///
    /// Deleting an empty slot signals corruption.
    pub fn delete(&mut self, index: u8) -> TesseraResult<()> {
        let segment = self.segment(index);
        if segment.is_empty() {
            return Err(TesseraError::corruption(format!(
                "delete of empty slot {index} in page {}",
                self.page_id()
            )));
        }

        self.data.as_mut()[segment.range()].fill(0);
        self.write_segment(index, Segment::default());

        let header = self.header();
        let items = header.items_count() - 1;
        let used = header.used_bytes() - segment.length as usize;
        let next_free = header.next_free_position();
        let fragmented = header.fragmented_bytes();
        let highest = header.highest_index();

        if items == 0 {
            self.header_mut().reset_content_counters();
            return Ok(());
        }

        let new_highest = if highest == Some(index) {
            (0..index).rev().find(|&i| !self.segment(i).is_empty())
        } else {
            highest
        };

        let mut header = self.header_mut();
        header.set_items_count(items);
        header.set_used_bytes(used);
        if segment.location as usize + segment.length as usize == next_free {
            header.set_next_free_position(segment.location as usize);
        } else {
            header.set_fragmented_bytes(fragmented + segment.length as usize);
        }
        header.set_highest_index(new_highest);
        Ok(())
    }

    /// Resizes the segment in `index` to `new_length`, keeping the leading
    /// `min(old, new)` bytes of content.
    pub fn update(&mut self, index: u8, new_length: usize) -> TesseraResult<()> {
        Self::check_length(new_length)?;
        let segment = self.segment(index);
        if segment.is_empty() {
            return Err(TesseraError::corruption(format!(
                "update of empty slot {index} in page {}",
                self.page_id()
            )));
        }
        let old_length = segment.length as usize;
        let end = segment.location as usize + old_length;
        let header = self.header();
        let next_free = header.next_free_position();
        let used = header.used_bytes();
        let fragmented = header.fragmented_bytes();

        if new_length == old_length {
            return Ok(());
        }

        if new_length < old_length {
            let diff = old_length - new_length;
            self.data.as_mut()[end - diff..end].fill(0);
            let mut header = self.header_mut();
            header.set_used_bytes(used - diff);
            if end == next_free {
                header.set_next_free_position(next_free - diff);
            } else {
                header.set_fragmented_bytes(fragmented + diff);
            }
            self.write_segment(
                index,
                Segment {
                    location: segment.location,
                    length: new_length as u16,
                },
            );
            return Ok(());
        }

        let diff = new_length - old_length;
        let available = header.free_bytes();
        if diff > available {
            return Err(TesseraError::PageFull {
                page_id: header.page_id(),
                requested: diff,
                available,
            });
        }

        // Tail segment with contiguous room grows in place.
        if end == next_free && next_free + diff <= PAGE_SIZE - header.footer_size() {
            let mut header = self.header_mut();
            header.set_used_bytes(used + diff);
            header.set_next_free_position(next_free + diff);
            self.write_segment(
                index,
                Segment {
                    location: segment.location,
                    length: new_length as u16,
                },
            );
            return Ok(());
        }

        let content = self.data.as_ref()[segment.range()].to_vec();
        self.delete(index)?;
        let location = self.insert_at(index, new_length)? as usize;
        self.data.as_mut()[location..location + old_length].copy_from_slice(&content);
        Ok(())
    }

    /// Slides every segment down to remove gaps. Slot indexes are unchanged.
    pub fn defrag(&mut self) {
        let mut segments: Vec<(u8, Segment)> = self
            .occupied()
            .map(|i| (i, self.segment(i)))
            .collect();
        segments.sort_by_key(|(_, s)| s.location);

        let next_free = self.header().next_free_position();
        let fragmented = self.header().fragmented_bytes();
        let mut position = PAGE_HEADER_SIZE;
        for (index, segment) in segments {
            let length = segment.length as usize;
            if segment.location as usize != position {
                self.data
                    .as_mut()
                    .copy_within(segment.range(), position);
                self.write_segment(
                    index,
                    Segment {
                        location: position as u16,
                        length: segment.length,
                    },
                );
            }
            position += length;
        }
        self.data.as_mut()[position..next_free].fill(0);

        let mut header = self.header_mut();
        header.set_next_free_position(position);
        header.set_fragmented_bytes(0);
        trace!(page_id = %header.page_id(), reclaimed = fragmented, "page defragmented");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tessera_common::constants::PAGE_CONTENT_SIZE;

    fn new_page() -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        SlottedPage::new(&mut buf[..]).initialize(PageId::new(1), PageType::Data);
        buf
    }

    fn fill(page: &mut SlottedPage<&mut [u8]>, index: u8, byte: u8) {
        page.get_mut(index).unwrap().fill(byte);
    }

    fn assert_accounting(page: &SlottedPage<&mut [u8]>) {
        let h = page.header();
        assert_eq!(
            h.next_free_position(),
            PAGE_HEADER_SIZE + h.used_bytes() + h.fragmented_bytes()
        );
        assert_eq!(h.used_bytes() + h.footer_size() + h.free_bytes(), PAGE_CONTENT_SIZE);
        assert_eq!(h.highest_index().is_none(), h.items_count() == 0);
    }

    #[test]
    fn test_insert_and_read() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        let a = page.insert(16).unwrap();
        let b = page.insert(24).unwrap();
        assert_eq!((a, b), (0, 1));
        fill(&mut page, a, 1);
        fill(&mut page, b, 2);

        assert_eq!(page.get(a).unwrap(), &[1u8; 16][..]);
        assert_eq!(page.get(b).unwrap(), &[2u8; 24][..]);
        assert_eq!(page.header().used_bytes(), 40);
        assert_eq!(page.header().items_count(), 2);
        assert_accounting(&page);
    }

    #[test]
    fn test_rejects_unaligned_length() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        assert!(matches!(page.insert(0), Err(TesseraError::InvalidArgument { .. })));
        assert!(matches!(page.insert(10), Err(TesseraError::InvalidArgument { .. })));
    }

    #[test]
    fn test_insert_at_leaves_empty_gaps() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        page.insert_at(5, 8).unwrap();
        assert_eq!(page.header().highest_index(), Some(5));
        for gap in 0..5 {
            assert!(page.segment(gap).is_empty());
        }
        assert_eq!(page.header().footer_size(), 24);
        assert_eq!(page.insert(8).unwrap(), 0);
        assert_accounting(&page);
    }

    #[test]
    fn test_page_full() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        let max = page.max_insert_len();
        assert_eq!(max, 8152);
        page.insert(max).unwrap();
        assert_eq!(page.header().free_bytes(), PAGE_CONTENT_SIZE - 8152 - SLOT_SIZE);
        assert!(matches!(page.insert(8), Err(TesseraError::PageFull { .. })));
    }

    #[test]
    fn test_delete_tail_reclaims() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        page.insert(16).unwrap();
        page.insert(32).unwrap();
        page.delete(1).unwrap();
        assert_eq!(page.header().fragmented_bytes(), 0);
        assert_eq!(page.header().next_free_position(), PAGE_HEADER_SIZE + 16);
        assert_eq!(page.header().highest_index(), Some(0));
        assert_accounting(&page);
    }

    #[test]
    fn test_delete_middle_fragments() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        page.insert(16).unwrap();
        page.insert(32).unwrap();
        page.delete(0).unwrap();
        assert_eq!(page.header().fragmented_bytes(), 16);
        assert_eq!(page.header().highest_index(), Some(1));
        assert_accounting(&page);
    }

    #[test]
    fn test_delete_last_resets_page() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        page.insert(16).unwrap();
        page.insert(32).unwrap();
        page.delete(0).unwrap();
        page.delete(1).unwrap();
        let h = page.header();
        assert_eq!(h.items_count(), 0);
        assert_eq!(h.highest_index(), None);
        assert_eq!(h.fragmented_bytes(), 0);
        assert_eq!(h.next_free_position(), PAGE_HEADER_SIZE);
        assert_eq!(h.free_bytes(), PAGE_CONTENT_SIZE);
    }

    #[test]
    fn test_delete_empty_slot_is_corruption() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        let slot = page.insert(8).unwrap();
        page.delete(slot).unwrap();
        let err = page.delete(slot).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_update_shrink_and_grow() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        let a = page.insert(32).unwrap();
        let b = page.insert(16).unwrap();
        fill(&mut page, a, 7);
        fill(&mut page, b, 9);

        page.update(a, 16).unwrap();
        assert_eq!(page.get(a).unwrap(), &[7u8; 16][..]);
        assert_eq!(page.header().fragmented_bytes(), 16);
        assert_accounting(&page);

        page.update(a, 64).unwrap();
        let grown = page.get(a).unwrap();
        assert_eq!(&grown[..16], &[7u8; 16][..]);
        assert!(grown[16..].iter().all(|&x| x == 0));
        assert_eq!(page.get(b).unwrap(), &[9u8; 16][..]);
        assert_accounting(&page);
    }

    #[test]
    fn test_update_tail_grows_in_place() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        let a = page.insert(16).unwrap();
        let location = page.segment(a).location;
        page.update(a, 48).unwrap();
        assert_eq!(page.segment(a).location, location);
        assert_eq!(page.header().used_bytes(), 48);
        assert_accounting(&page);
    }

    #[test]
    fn test_update_grow_too_large_leaves_page_unchanged() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        let a = page.insert(16).unwrap();
        fill(&mut page, a, 3);
        let before = page.header().used_bytes();
        assert!(page.update(a, PAGE_SIZE).is_err());
        assert_eq!(page.header().used_bytes(), before);
        assert_eq!(page.get(a).unwrap(), &[3u8; 16][..]);
    }

    #[test]
    fn test_insert_triggers_defrag() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        // Fill the page with 8 x 1000-byte segments, then punch holes.
        for i in 0..8u8 {
            page.insert(1000).unwrap();
            fill(&mut page, i, i + 1);
        }
        page.delete(1).unwrap();
        page.delete(3).unwrap();
        page.delete(5).unwrap();
        assert_eq!(page.header().fragmented_bytes(), 3000);

        let slot = page.insert(2400).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(page.header().fragmented_bytes(), 0);
        for i in [0u8, 2, 4, 6, 7] {
            assert_eq!(page.get(i).unwrap(), &vec![i + 1; 1000][..]);
        }
        assert_accounting(&page);
    }

    #[test]
    fn test_defrag_transparency() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        for i in 0..10u8 {
            page.insert(8 * (i as usize + 1)).unwrap();
            fill(&mut page, i, 100 + i);
        }
        for i in [0u8, 4, 7] {
            page.delete(i).unwrap();
        }
        let before: BTreeMap<u8, Vec<u8>> =
            page.occupied().map(|i| (i, page.get(i).unwrap().to_vec())).collect();
        let used = page.header().used_bytes();

        page.defrag();

        let after: BTreeMap<u8, Vec<u8>> =
            page.occupied().map(|i| (i, page.get(i).unwrap().to_vec())).collect();
        assert_eq!(before, after);
        assert_eq!(page.header().used_bytes(), used);
        assert_eq!(page.header().fragmented_bytes(), 0);
        assert_accounting(&page);
    }

    #[test]
    fn test_slot_directory_limit() {
        let mut buf = new_page();
        let mut page = SlottedPage::new(&mut buf[..]);
        for _ in 0..MAX_ITEMS_COUNT {
            page.insert(8).unwrap();
        }
        assert_eq!(page.max_insert_len(), 0);
        assert!(matches!(page.insert(8), Err(TesseraError::TooManyItems { .. })));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize, u8),
        Update(usize, usize, u8),
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..64, any::<u8>()).prop_map(|(l, b)| Op::Insert(l * 8, b)),
            (any::<usize>(), 1usize..64, any::<u8>()).prop_map(|(i, l, b)| Op::Update(i, l * 8, b)),
            any::<usize>().prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn prop_slot_round_trip(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let mut buf = new_page();
            let mut page = SlottedPage::new(&mut buf[..]);
            let mut model: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Insert(len, byte) => {
                        if len <= page.max_insert_len() {
                            let slot = page.insert(len).unwrap();
                            fill(&mut page, slot, byte);
                            model.insert(slot, vec![byte; len]);
                        }
                    }
                    Op::Update(pick, len, byte) => {
                        if model.is_empty() { continue; }
                        let slot = *model.keys().nth(pick % model.len()).unwrap();
                        let old = model[&slot].len();
                        if len <= old || len - old <= page.header().free_bytes() {
                            page.update(slot, len).unwrap();
                            fill(&mut page, slot, byte);
                            model.insert(slot, vec![byte; len]);
                        }
                    }
                    Op::Delete(pick) => {
                        if model.is_empty() { continue; }
                        let slot = *model.keys().nth(pick % model.len()).unwrap();
                        page.delete(slot).unwrap();
                        model.remove(&slot);
                    }
                }
                assert_accounting(&page);
            }

            let occupied: Vec<u8> = page.occupied().collect();
            prop_assert_eq!(occupied, model.keys().copied().collect::<Vec<_>>());
            for (slot, content) in &model {
                prop_assert_eq!(page.get(*slot).unwrap(), &content[..]);
            }
        }
    }
}
