//! Record-level services over a snapshot: documents as data block chains,
//! skip-list indexes as index node graphs, and the allocation map both
//! allocate from.

pub(crate) mod allocation;
mod data;
mod index;

pub use allocation::AllocationMapService;
pub use data::DataService;
pub use index::{IndexDef, IndexScan, IndexService, Order};

use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::RowId;
use tessera_storage::page::{PageHeader, PageType, SlottedPage};

fn check_page(page: &[u8], row: RowId, expected: PageType) -> TesseraResult<()> {
    let header = PageHeader::new(page);
    if header.page_type() != expected || header.page_id() != row.page_id {
        return Err(TesseraError::corruption(format!(
            "{row} points to {} page {} where a {expected} page was expected",
            header.page_type(),
            header.page_id()
        )));
    }
    Ok(())
}

/// Bytes of the occupied segment `row` inside `page`.
pub(crate) fn segment(page: &[u8], row: RowId, expected: PageType) -> TesseraResult<&[u8]> {
    check_page(page, row, expected)?;
    let segment = SlottedPage::new(page).segment(row.index);
    if segment.is_empty() {
        return Err(TesseraError::corruption(format!("{row} is an empty slot")));
    }
    Ok(&page[segment.range()])
}

/// Mutable bytes of the occupied segment `row` inside `page`.
pub(crate) fn segment_mut(
    page: &mut [u8],
    row: RowId,
    expected: PageType,
) -> TesseraResult<&mut [u8]> {
    check_page(page, row, expected)?;
    let segment = SlottedPage::new(&page[..]).segment(row.index);
    if segment.is_empty() {
        return Err(TesseraError::corruption(format!("{row} is an empty slot")));
    }
    Ok(&mut page[segment.range()])
}
