//! Allocation map pages.
//!
//! Each map page tracks the free space of the `8 * 2040` pages that follow
//! it. The content area is an array of 32-bit extend words:
//!
//! ```text
//!  31      24 23  21 20  18 17  15 14  12 11   9 8    6 5    3 2    0
//! +----------+------+------+------+------+------+------+------+------+
//! |  col_id  | pg 0 | pg 1 | pg 2 | pg 3 | pg 4 | pg 5 | pg 6 | pg 7 |
//! +----------+------+------+------+------+------+------+------+------+
//! ```
//!
//! Page codes are [`PageSpace`] values. An extend keeps its owner until
//! every one of its pages is back to `Empty`.

use tessera_common::constants::{
    EXTENDS_PER_MAP_PAGE, EXTEND_SIZE, FIRST_MAP_PAGE_ID, MAP_PAGE_STRIDE, PAGE_HEADER_SIZE,
    PAGE_SIZE,
};
use tessera_common::types::{ColId, PageId};

use super::header::PageHeader;
use super::types::{PageSpace, PageType};

const CODE_BITS: u32 = 3;
const CODE_MASK: u32 = 0b111;
const CODES_MASK: u32 = 0x00FF_FFFF;

/// Location of a page inside the allocation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtendLocation {
    /// Which map page (0-based).
    pub map_index: u32,
    /// Extend inside the map page.
    pub extend_index: usize,
    /// Page inside the extend (0..8).
    pub page_index: usize,
}

impl ExtendLocation {
    /// Finds the map slot of `page_id`. Returns `None` for the header page
    /// and for map pages themselves.
    #[must_use]
    pub fn of(page_id: PageId) -> Option<Self> {
        let raw = page_id.as_u32();
        if raw < FIRST_MAP_PAGE_ID || page_id.is_empty() {
            return None;
        }
        let relative = raw - FIRST_MAP_PAGE_ID;
        let offset = relative % MAP_PAGE_STRIDE;
        if offset == 0 {
            return None;
        }
        let page = (offset - 1) as usize;
        Some(Self {
            map_index: relative / MAP_PAGE_STRIDE,
            extend_index: page / EXTEND_SIZE,
            page_index: page % EXTEND_SIZE,
        })
    }

    /// The data page this location describes.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        let base = map_page_id(self.map_index).as_u32();
        PageId::new(base + 1 + (self.extend_index * EXTEND_SIZE + self.page_index) as u32)
    }
}

/// Page id of the `map_index`-th allocation map page.
#[inline]
#[must_use]
pub fn map_page_id(map_index: u32) -> PageId {
    PageId::new(FIRST_MAP_PAGE_ID + map_index * MAP_PAGE_STRIDE)
}

/// Result of a free-extend search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeExtend {
    /// Extend holding the page.
    pub extend_index: usize,
    /// Page inside the extend.
    pub page_index: usize,
    /// The page was `Empty` and must be initialized by the caller.
    pub is_new: bool,
}

/// Typed view over an allocation map page.
#[derive(Debug)]
pub struct AllocationMapPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> AllocationMapPage<B> {
    /// Wraps a page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not exactly one page.
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE, "buffer is not one page");
        Self { data }
    }

    /// Read-only header view.
    pub fn header(&self) -> PageHeader<&[u8]> {
        PageHeader::new(self.data.as_ref())
    }

    /// Raw extend word.
    #[inline]
    pub fn extend(&self, extend_index: usize) -> u32 {
        let offset = PAGE_HEADER_SIZE + extend_index * 4;
        u32::from_le_bytes(self.data.as_ref()[offset..offset + 4].try_into().unwrap())
    }

    /// Owner of an extend.
    #[inline]
    pub fn extend_owner(&self, extend_index: usize) -> ColId {
        ColId::from_raw((self.extend(extend_index) >> 24) as u8)
    }

    /// Free-space class of one page.
    #[inline]
    pub fn page_value(&self, extend_index: usize, page_index: usize) -> PageSpace {
        let shift = (EXTEND_SIZE - 1 - page_index) as u32 * CODE_BITS;
        PageSpace::from_code(((self.extend(extend_index) >> shift) & CODE_MASK) as u8)
    }

    /// Iterates over extends owned by `col_id`.
    pub fn extends_of(&self, col_id: ColId) -> impl Iterator<Item = usize> + '_ {
        (0..EXTENDS_PER_MAP_PAGE).filter(move |&e| self.extend_owner(e) == col_id && !col_id.is_none())
    }

    fn find_page(&self, extend_index: usize, wanted: PageSpace) -> Option<FreeExtend> {
        let found = |code: PageSpace| {
            (0..EXTEND_SIZE).find(|&p| self.page_value(extend_index, p) == code)
        };
        found(wanted)
            .map(|page_index| FreeExtend {
                extend_index,
                page_index,
                is_new: false,
            })
            .or_else(|| {
                found(PageSpace::Empty).map(|page_index| FreeExtend {
                    extend_index,
                    page_index,
                    is_new: true,
                })
            })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> AllocationMapPage<B> {
    /// Formats the buffer as an empty map page.
    pub fn initialize(&mut self, page_id: PageId) {
        self.data.as_mut().fill(0);
        PageHeader::new(self.data.as_mut()).initialize(page_id, PageType::AllocationMap);
    }

    /// Overwrites a raw extend word.
    #[inline]
    pub fn set_extend(&mut self, extend_index: usize, value: u32) {
        let offset = PAGE_HEADER_SIZE + extend_index * 4;
        self.data.as_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Finds a page for `col_id` of `page_type`, scanning from `start`.
    ///
    /// Within an owned extend a page of the same type with room is
    /// preferred over an empty one. The first wholly unowned extend met on
    /// the way is claimed for `col_id`.
    pub fn get_free_extend(
        &mut self,
        start: usize,
        col_id: ColId,
        page_type: PageType,
    ) -> Option<FreeExtend> {
        let wanted = PageSpace::for_type(page_type);
        for extend_index in start..EXTENDS_PER_MAP_PAGE {
            let word = self.extend(extend_index);
            let owner = ColId::from_raw((word >> 24) as u8);
            if owner == col_id {
                if let Some(found) = self.find_page(extend_index, wanted) {
                    return Some(found);
                }
            } else if owner.is_none() && word & CODES_MASK == 0 {
                self.set_extend(extend_index, u32::from(col_id.as_u8()) << 24);
                return Some(FreeExtend {
                    extend_index,
                    page_index: 0,
                    is_new: true,
                });
            }
        }
        None
    }

    /// Stores the free-space class of one page. When the whole extend
    /// returns to `Empty` its owner is cleared.
    pub fn update_extend_page_value(
        &mut self,
        extend_index: usize,
        page_index: usize,
        value: PageSpace,
    ) {
        let shift = (EXTEND_SIZE - 1 - page_index) as u32 * CODE_BITS;
        let mut word = self.extend(extend_index);
        word &= !(CODE_MASK << shift);
        word |= u32::from(value.code()) << shift;
        if word & CODES_MASK == 0 {
            word = 0;
        }
        self.set_extend(extend_index, word);
    }

    /// Releases every extend owned by `col_id` and returns the ids of the
    /// pages that were in use.
    pub fn clear_collection(&mut self, col_id: ColId, map_index: u32) -> Vec<PageId> {
        let owned: Vec<usize> = self.extends_of(col_id).collect();
        let mut pages = Vec::new();
        for extend_index in owned {
            for page_index in 0..EXTEND_SIZE {
                if self.page_value(extend_index, page_index) != PageSpace::Empty {
                    pages.push(
                        ExtendLocation {
                            map_index,
                            extend_index,
                            page_index,
                        }
                        .page_id(),
                    );
                }
            }
            self.set_extend(extend_index, 0);
        }
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_map() -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        AllocationMapPage::new(&mut buf[..]).initialize(map_page_id(0));
        buf
    }

    fn col(id: u8) -> ColId {
        ColId::new(id).unwrap()
    }

    #[test]
    fn test_location_round_trip() {
        assert_eq!(ExtendLocation::of(PageId::new(0)), None);
        assert_eq!(ExtendLocation::of(PageId::new(1)), None);
        assert_eq!(ExtendLocation::of(map_page_id(1)), None);

        let loc = ExtendLocation::of(PageId::new(2)).unwrap();
        assert_eq!((loc.map_index, loc.extend_index, loc.page_index), (0, 0, 0));

        let loc = ExtendLocation::of(PageId::new(20)).unwrap();
        assert_eq!((loc.extend_index, loc.page_index), (2, 2));
        assert_eq!(loc.page_id(), PageId::new(20));

        let after_second_map = PageId::new(map_page_id(1).as_u32() + 9);
        let loc = ExtendLocation::of(after_second_map).unwrap();
        assert_eq!((loc.map_index, loc.extend_index, loc.page_index), (1, 1, 0));
        assert_eq!(loc.page_id(), after_second_map);
    }

    #[test]
    fn test_bit_packing() {
        let mut buf = new_map();
        let mut map = AllocationMapPage::new(&mut buf[..]);
        map.get_free_extend(0, col(7), PageType::Data).unwrap();
        map.update_extend_page_value(0, 0, PageSpace::Data);
        map.update_extend_page_value(0, 7, PageSpace::Full);
        map.update_extend_page_value(0, 3, PageSpace::Index);

        assert_eq!(map.extend(0), (7 << 24) | (0b001 << 21) | (0b010 << 12) | 0b111);
        assert_eq!(map.page_value(0, 3), PageSpace::Index);
        assert_eq!(map.extend_owner(0), col(7));
    }

    #[test]
    fn test_get_free_extend_claims_and_prefers_type() {
        let mut buf = new_map();
        let mut map = AllocationMapPage::new(&mut buf[..]);

        let first = map.get_free_extend(0, col(1), PageType::Data).unwrap();
        assert_eq!(first, FreeExtend { extend_index: 0, page_index: 0, is_new: true });
        map.update_extend_page_value(0, 0, PageSpace::Data);

        // Same collection reuses the data page with room.
        let again = map.get_free_extend(0, col(1), PageType::Data).unwrap();
        assert_eq!(again, FreeExtend { extend_index: 0, page_index: 0, is_new: false });

        // An index page goes to the first empty page of the owned extend.
        let index = map.get_free_extend(0, col(1), PageType::Index).unwrap();
        assert_eq!(index, FreeExtend { extend_index: 0, page_index: 1, is_new: true });

        // Another collection claims the next extend.
        let other = map.get_free_extend(0, col(2), PageType::Data).unwrap();
        assert_eq!(other.extend_index, 1);
        assert_eq!(map.extend_owner(1), col(2));
    }

    #[test]
    fn test_full_extend_is_skipped() {
        let mut buf = new_map();
        let mut map = AllocationMapPage::new(&mut buf[..]);
        map.get_free_extend(0, col(1), PageType::Data).unwrap();
        for p in 0..EXTEND_SIZE {
            map.update_extend_page_value(0, p, PageSpace::Full);
        }
        let next = map.get_free_extend(0, col(1), PageType::Data).unwrap();
        assert_eq!(next.extend_index, 1);
    }

    #[test]
    fn test_owner_cleared_when_extend_empties() {
        let mut buf = new_map();
        let mut map = AllocationMapPage::new(&mut buf[..]);
        map.get_free_extend(0, col(3), PageType::Data).unwrap();
        map.update_extend_page_value(0, 2, PageSpace::Full);
        assert_eq!(map.extend_owner(0), col(3));
        map.update_extend_page_value(0, 2, PageSpace::Empty);
        assert_eq!(map.extend(0), 0);
        assert!(map.extend_owner(0).is_none());
    }

    #[test]
    fn test_clear_collection() {
        let mut buf = new_map();
        let mut map = AllocationMapPage::new(&mut buf[..]);
        map.get_free_extend(0, col(4), PageType::Data).unwrap();
        map.update_extend_page_value(0, 0, PageSpace::Data);
        map.update_extend_page_value(0, 5, PageSpace::Index);
        map.get_free_extend(0, col(5), PageType::Data).unwrap();
        map.update_extend_page_value(1, 0, PageSpace::Data);

        let freed = map.clear_collection(col(4), 0);
        assert_eq!(freed, vec![PageId::new(2), PageId::new(7)]);
        assert_eq!(map.extend(0), 0);
        assert_eq!(map.extend_owner(1), col(5));
    }

    #[test]
    fn test_map_page_exhausted() {
        let mut buf = new_map();
        let mut map = AllocationMapPage::new(&mut buf[..]);
        for e in 0..EXTENDS_PER_MAP_PAGE {
            map.get_free_extend(e, col(1), PageType::Data).unwrap();
            for p in 0..EXTEND_SIZE {
                map.update_extend_page_value(e, p, PageSpace::Full);
            }
        }
        assert!(map.get_free_extend(0, col(1), PageType::Data).is_none());
    }
}
