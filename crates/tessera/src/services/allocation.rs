//! Allocation map service: the in-memory images of every allocation map
//! page and the free-page search on top of them.
//!
//! Two images are kept per map page. The working image is what running
//! transactions allocate from; the committed image is what has been made
//! durable. A transaction records every extend it changes and, at commit,
//! copies those extends from working to committed and logs the committed
//! map pages. A rollback copies them back the other way.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, info};

use tessera_common::constants::{EXTENDS_PER_MAP_PAGE, EXTEND_SIZE, PAGE_SIZE};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{ColId, FileOrigin, PageId};
use tessera_storage::page::{
    map_page_id, AllocationMapPage, ExtendLocation, FreeExtend, PageHeader, PageSpace, PageType,
};
use tessera_storage::{DiskService, WritablePage};
use tessera_wal::WalIndex;

/// Extends changed by one transaction, as `(map index, extend index)`.
pub(crate) type ExtendSet = HashSet<(u32, usize)>;

#[derive(Debug, Default)]
struct MapState {
    working: Vec<Vec<u8>>,
    committed: Vec<Vec<u8>>,
    /// First extend worth scanning per collection.
    last_extend: HashMap<ColId, (u32, usize)>,
}

impl MapState {
    fn add_map_page(&mut self) {
        let map_index = self.working.len() as u32;
        let mut image = vec![0u8; PAGE_SIZE];
        AllocationMapPage::new(&mut image[..]).initialize(map_page_id(map_index));
        self.committed.push(image.clone());
        self.working.push(image);
        info!(map_index, page_id = %map_page_id(map_index), "allocation map grown");
    }
}

/// Free-space bookkeeping for the whole file.
#[derive(Debug, Default)]
pub struct AllocationMapService {
    state: Mutex<MapState>,
}

impl AllocationMapService {
    /// Loads every allocation map page visible at the current read version.
    pub(crate) fn load(disk: &DiskService, wal: &WalIndex) -> TesseraResult<Self> {
        let version = wal.current_read_version();
        let mut state = MapState::default();
        for map_index in 0.. {
            let page_id = map_page_id(map_index);
            let page = match wal.get_page_index(page_id, version) {
                Some(position) => disk.read_page(FileOrigin::Log, position)?,
                None => disk.read_page(FileOrigin::Data, page_id.as_u32())?,
            };
            let header = PageHeader::new(&page[..]);
            if header.page_type() != PageType::AllocationMap || header.page_id() != page_id {
                if map_index == 0 {
                    return Err(TesseraError::corruption(
                        "first allocation map page is missing",
                    ));
                }
                break;
            }
            state.committed.push(page.to_vec());
            state.working.push(page.to_vec());
        }
        debug!(map_pages = state.working.len(), "allocation map loaded");
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Number of allocation map pages.
    pub fn map_pages(&self) -> usize {
        self.state.lock().working.len()
    }

    /// Finds a page of `page_type` with room for `col_id`, claiming a new
    /// extend (and growing the map) when needed. Returns the page and
    /// whether it must be initialized.
    pub(crate) fn get_free_page(
        &self,
        col_id: ColId,
        page_type: PageType,
        touched: &mut ExtendSet,
    ) -> TesseraResult<(PageId, bool)> {
        let mut state = self.state.lock();
        let (mut map_index, mut start) = state.last_extend.get(&col_id).copied().unwrap_or((0, 0));

        loop {
            if map_index as usize == state.working.len() {
                state.add_map_page();
            }
            let MapState {
                working, committed, ..
            } = &mut *state;
            let found = search(
                &mut working[map_index as usize],
                &committed[map_index as usize],
                start,
                col_id,
                page_type,
            );
            match found {
                Some(free) => {
                    touched.insert((map_index, free.extend_index));
                    state
                        .last_extend
                        .insert(col_id, (map_index, free.extend_index));
                    let page_id = ExtendLocation {
                        map_index,
                        extend_index: free.extend_index,
                        page_index: free.page_index,
                    }
                    .page_id();
                    return Ok((page_id, free.is_new));
                }
                None => {
                    map_index += 1;
                    start = 0;
                }
            }
        }
    }

    /// Stores the free-space class of a page in the working image.
    pub(crate) fn update_page_space(
        &self,
        col_id: ColId,
        page_id: PageId,
        space: PageSpace,
        touched: &mut ExtendSet,
    ) -> TesseraResult<()> {
        let loc = ExtendLocation::of(page_id).ok_or_else(|| {
            TesseraError::internal(format!("page {page_id} is not tracked by the allocation map"))
        })?;
        let mut state = self.state.lock();
        let image = state
            .working
            .get_mut(loc.map_index as usize)
            .ok_or_else(|| TesseraError::corruption(format!("page {page_id} is beyond the allocation map")))?;
        let mut map = AllocationMapPage::new(&mut image[..]);
        map.update_extend_page_value(loc.extend_index, loc.page_index, space);
        let word = map.extend(loc.extend_index);
        if word != 0 && map.extend_owner(loc.extend_index).is_none() {
            map.set_extend(loc.extend_index, word | (u32::from(col_id.as_u8()) << 24));
        }
        touched.insert((loc.map_index, loc.extend_index));

        if space != PageSpace::Full {
            let here = (loc.map_index, loc.extend_index);
            let hint = state.last_extend.entry(col_id).or_insert(here);
            if here < *hint {
                *hint = here;
            }
        }
        Ok(())
    }

    /// Releases every extend of `col_id` in the working image and returns
    /// the pages that were in use.
    pub(crate) fn drop_collection(&self, col_id: ColId, touched: &mut ExtendSet) -> Vec<PageId> {
        let mut state = self.state.lock();
        state.last_extend.remove(&col_id);
        let mut pages = Vec::new();
        for (map_index, image) in state.working.iter_mut().enumerate() {
            let mut map = AllocationMapPage::new(&mut image[..]);
            let owned: Vec<usize> = map.extends_of(col_id).collect();
            touched.extend(owned.iter().map(|&e| (map_index as u32, e)));
            pages.extend(map.clear_collection(col_id, map_index as u32));
        }
        pages
    }

    /// Publishes the touched extends to the committed image and returns a
    /// copy of every committed map page that changed, ready for the log.
    pub(crate) fn commit(&self, touched: &ExtendSet, disk: &DiskService) -> Vec<WritablePage> {
        let mut state = self.state.lock();
        let mut maps = BTreeSet::new();
        for &(map_index, extend_index) in touched {
            let m = map_index as usize;
            let word = AllocationMapPage::new(&state.working[m][..]).extend(extend_index);
            AllocationMapPage::new(&mut state.committed[m][..]).set_extend(extend_index, word);
            maps.insert(m);
        }
        maps.into_iter()
            .map(|m| {
                let mut page = disk.new_page();
                page.copy_from_slice(&state.committed[m]);
                page
            })
            .collect()
    }

    /// Restores the touched extends from the committed image.
    pub(crate) fn rollback(&self, touched: &ExtendSet, cols: &[ColId]) {
        let mut state = self.state.lock();
        for &(map_index, extend_index) in touched {
            let m = map_index as usize;
            let word = AllocationMapPage::new(&state.committed[m][..]).extend(extend_index);
            AllocationMapPage::new(&mut state.working[m][..]).set_extend(extend_index, word);
        }
        for col in cols {
            state.last_extend.remove(col);
        }
    }

    /// Committed owner and class of a page.
    pub fn committed_page_space(&self, page_id: PageId) -> Option<(ColId, PageSpace)> {
        let loc = ExtendLocation::of(page_id)?;
        let state = self.state.lock();
        let map = AllocationMapPage::new(&state.committed.get(loc.map_index as usize)?[..]);
        Some((
            map.extend_owner(loc.extend_index),
            map.page_value(loc.extend_index, loc.page_index),
        ))
    }

    /// Every page the committed image marks as in use.
    pub fn committed_pages(&self) -> Vec<(PageId, ColId, PageSpace)> {
        let state = self.state.lock();
        let mut pages = Vec::new();
        for (map_index, image) in state.committed.iter().enumerate() {
            let map = AllocationMapPage::new(&image[..]);
            for extend_index in 0..EXTENDS_PER_MAP_PAGE {
                if map.extend(extend_index) == 0 {
                    continue;
                }
                let owner = map.extend_owner(extend_index);
                for page_index in 0..EXTEND_SIZE {
                    let space = map.page_value(extend_index, page_index);
                    if space != PageSpace::Empty {
                        let page_id = ExtendLocation {
                            map_index: map_index as u32,
                            extend_index,
                            page_index,
                        }
                        .page_id();
                        pages.push((page_id, owner, space));
                    }
                }
            }
        }
        pages
    }
}

/// Scans one map page from `start`. An extend that is free in the working
/// image but still owned by another collection in the committed image
/// belongs to an uncommitted release and is skipped.
fn search(
    working: &mut [u8],
    committed: &[u8],
    mut start: usize,
    col_id: ColId,
    page_type: PageType,
) -> Option<FreeExtend> {
    let mut map = AllocationMapPage::new(working);
    let committed = AllocationMapPage::new(committed);
    while start < EXTENDS_PER_MAP_PAGE {
        let free = map.get_free_extend(start, col_id, page_type)?;
        let e = free.extend_index;
        if committed.extend(e) != 0 && committed.extend_owner(e) != col_id {
            map.set_extend(e, 0);
            start = e + 1;
            continue;
        }
        return Some(free);
    }
    None
}
