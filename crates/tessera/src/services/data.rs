//! Documents as chains of data blocks.
//!
//! ```text
//!  page 12              page 13              page 20
//! ┌───────────────┐    ┌───────────────┐    ┌───────────────┐
//! │ block (first) │───►│ block (extend)│───►│ block (extend)│──► EMPTY
//! └───────────────┘    └───────────────┘    └───────────────┘
//! ```
//!
//! A document is addressed by the [`RowId`] of its first block.

use std::collections::HashSet;

use tracing::trace;

use tessera_common::constants::{DATA_BLOCK_HEADER_SIZE, MAX_DATA_BYTES_PER_BLOCK};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::RowId;
use tessera_storage::page::{data_block_len, DataBlock, PageType, SlottedPage};

use super::{segment, segment_mut};
use crate::snapshot::Snapshot;

/// Insert, read, update and delete documents in one collection.
pub struct DataService<'a> {
    snapshot: &'a mut Snapshot,
}

impl<'a> DataService<'a> {
    pub(crate) fn new(snapshot: &'a mut Snapshot) -> Self {
        Self { snapshot }
    }

    /// Stores `content` and returns the address of its first block.
    ///
    /// Content larger than the free space of one page is split over a
    /// chain of blocks on as many pages as needed.
    pub fn insert(&mut self, content: &[u8]) -> TesseraResult<RowId> {
        let result = self.insert_chain(content);
        self.snapshot.observe(result)
    }

    /// Reads a whole document.
    pub fn read(&self, row: RowId) -> TesseraResult<Vec<u8>> {
        let result = self.read_chain(row);
        self.snapshot.observe(result)
    }

    /// Reads a whole document on behalf of a deserializer that only needs
    /// `fields`. The field list is passed through for the caller's decoder;
    /// storage always returns the complete content.
    pub fn read_fields(&self, row: RowId, fields: &[&str]) -> TesseraResult<Vec<u8>> {
        trace!(row = %row, fields = fields.len(), "read with field filter");
        self.read(row)
    }

    /// Replaces a document's content and returns its (possibly new) address.
    ///
    /// If the new content fits in the blocks the document already owns it
    /// is rewritten in place, surplus blocks are freed and the address is
    /// unchanged. Otherwise a new chain is written, the old one deleted and
    /// the new address returned; callers must re-point anything that
    /// referenced the old one.
    pub fn update(&mut self, row: RowId, content: &[u8]) -> TesseraResult<RowId> {
        let result = self.update_chain(row, content);
        self.snapshot.observe(result)
    }

    /// Frees every block of a document. Deleting a document twice is
    /// reported as corruption.
    pub fn delete(&mut self, row: RowId) -> TesseraResult<()> {
        let result = self.delete_chain(row);
        self.snapshot.observe(result)
    }

    /// Addresses of every block in a document's chain.
    pub fn blocks(&self, row: RowId) -> TesseraResult<Vec<RowId>> {
        let mut blocks = Vec::new();
        self.walk(row, |block_row, _| {
            blocks.push(block_row);
            Ok(())
        })?;
        Ok(blocks)
    }

    // =========================================================================
    // Chain walking
    // =========================================================================

    fn walk<F>(&self, row: RowId, mut visit: F) -> TesseraResult<()>
    where
        F: FnMut(RowId, &DataBlock<&[u8]>) -> TesseraResult<()>,
    {
        let mut seen = HashSet::new();
        let mut current = row;
        let mut first = true;
        while !current.is_empty() {
            if !seen.insert(current) {
                return Err(TesseraError::corruption(format!(
                    "data chain of {row} loops at {current}"
                )));
            }
            let page = self.snapshot.page(current.page_id)?;
            let block = DataBlock::new(segment(&page, current, PageType::Data)?)?;
            if block.is_extend() == first {
                return Err(TesseraError::corruption(format!(
                    "data chain of {row} is broken at {current}"
                )));
            }
            visit(current, &block)?;
            current = block.next_block();
            first = false;
        }
        Ok(())
    }

    fn read_chain(&self, row: RowId) -> TesseraResult<Vec<u8>> {
        if row.is_empty() {
            return Err(TesseraError::invalid_argument("cannot read the empty row id"));
        }
        let mut content = Vec::new();
        self.walk(row, |_, block| {
            content.extend_from_slice(block.content());
            Ok(())
        })?;
        Ok(content)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Writes one block into the first page with data space and returns its
    /// address and how many content bytes it took.
    fn write_block(&mut self, content: &[u8], extend: bool) -> TesseraResult<(RowId, usize)> {
        let page_id = self.snapshot.get_free_page(PageType::Data)?;
        let page = self.snapshot.page_mut(page_id)?;
        let mut slotted = SlottedPage::new(&mut page[..]);
        let room = slotted.max_insert_len();
        if room <= DATA_BLOCK_HEADER_SIZE {
            return Err(TesseraError::internal(format!(
                "data page {page_id} handed out with {room} free bytes"
            )));
        }
        let chunk = content
            .len()
            .min(room - DATA_BLOCK_HEADER_SIZE)
            .min(MAX_DATA_BYTES_PER_BLOCK);
        let index = slotted.insert(data_block_len(chunk))?;
        let row = RowId::new(page_id, index);
        let seg = slotted
            .get_mut(index)
            .ok_or_else(|| TesseraError::internal(format!("{row} lost after insert")))?;
        DataBlock::write(seg, extend, RowId::EMPTY, &content[..chunk]);
        self.snapshot.page_changed(page_id)?;
        trace!(row = %row, bytes = chunk, "data block written");
        Ok((row, chunk))
    }

    fn set_next_block(&mut self, row: RowId, next: RowId) -> TesseraResult<()> {
        let page = self.snapshot.page_mut(row.page_id)?;
        let seg = segment_mut(&mut page[..], row, PageType::Data)?;
        DataBlock::new(seg)?.set_next_block(next);
        Ok(())
    }

    fn insert_chain(&mut self, content: &[u8]) -> TesseraResult<RowId> {
        self.snapshot.check_cancelled()?;
        let (first, mut written) = self.write_block(content, false)?;
        let mut last = first;
        while written < content.len() {
            self.snapshot.check_cancelled()?;
            let (row, chunk) = self.write_block(&content[written..], true)?;
            self.set_next_block(last, row)?;
            last = row;
            written += chunk;
        }
        Ok(first)
    }

    fn delete_chain(&mut self, row: RowId) -> TesseraResult<()> {
        let mut current = row;
        while !current.is_empty() {
            self.snapshot.check_cancelled()?;
            let page = self.snapshot.page_mut(current.page_id)?;
            let next = DataBlock::new(segment(&page[..], current, PageType::Data)?)?.next_block();
            SlottedPage::new(&mut page[..]).delete(current.index)?;
            self.snapshot.page_changed(current.page_id)?;
            current = next;
        }
        Ok(())
    }

    fn update_chain(&mut self, row: RowId, content: &[u8]) -> TesseraResult<RowId> {
        let mut chain = Vec::new();
        self.walk(row, |block_row, block| {
            chain.push((block_row, block.capacity()));
            Ok(())
        })?;
        let capacity: usize = chain.iter().map(|(_, c)| c).sum();

        if content.len() > capacity {
            let fresh = self.insert_chain(content)?;
            self.delete_chain(row)?;
            return Ok(fresh);
        }

        let mut written = 0;
        for (i, &(block_row, block_capacity)) in chain.iter().enumerate() {
            self.snapshot.check_cancelled()?;
            let chunk = (content.len() - written).min(block_capacity);
            let last = written + chunk == content.len();
            let next = match chain.get(i + 1) {
                Some(&(next_row, _)) if !last => next_row,
                _ => RowId::EMPTY,
            };

            let page = self.snapshot.page_mut(block_row.page_id)?;
            let mut slotted = SlottedPage::new(&mut page[..]);
            slotted.update(block_row.index, data_block_len(chunk))?;
            let seg = segment_mut(&mut page[..], block_row, PageType::Data)?;
            DataBlock::write(seg, i > 0, next, &content[written..written + chunk]);
            self.snapshot.page_changed(block_row.page_id)?;
            written += chunk;

            if last {
                if let Some(&(surplus, _)) = chain.get(i + 1) {
                    self.delete_chain(surplus)?;
                }
                break;
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use tessera_common::config::EngineConfig;
    use tessera_common::constants::{PAGE_CONTENT_SIZE, SLOT_SIZE};
    use tessera_common::types::ColId;
    use tessera_storage::page::PageHeader;

    fn open() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(EngineConfig::for_testing(dir.path().join("data.db"))).unwrap();
        (dir, engine)
    }

    fn col() -> ColId {
        ColId::new(1).unwrap()
    }

    #[test]
    fn test_insert_and_read_small() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut data = txn.data(col()).unwrap();
        let row = data.insert(b"hello").unwrap();
        assert_eq!(data.read(row).unwrap(), b"hello");
        assert_eq!(data.read_fields(row, &["name"]).unwrap(), b"hello");
        assert_eq!(data.blocks(row).unwrap(), vec![row]);
        let empty = data.insert(b"").unwrap();
        assert_eq!(data.read(empty).unwrap(), b"");
    }

    #[test]
    fn test_large_document_spans_pages() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut data = txn.data(col()).unwrap();
        let content: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        let row = data.insert(&content).unwrap();
        assert_eq!(data.read(row).unwrap(), content);
        let blocks = data.blocks(row).unwrap();
        assert!(blocks.len() >= 4);
        let pages: std::collections::HashSet<_> = blocks.iter().map(|b| b.page_id).collect();
        assert_eq!(pages.len(), blocks.len());
    }

    #[test]
    fn test_update_in_place_shrinks_chain() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut data = txn.data(col()).unwrap();
        let big = vec![7u8; 20_000];
        let row = data.insert(&big).unwrap();
        assert!(data.blocks(row).unwrap().len() >= 3);

        let same = data.update(row, b"small now").unwrap();
        assert_eq!(same, row);
        assert_eq!(data.read(row).unwrap(), b"small now");
        assert_eq!(data.blocks(row).unwrap(), vec![row]);
    }

    #[test]
    fn test_update_grow_moves_document() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut data = txn.data(col()).unwrap();
        let row = data.insert(&[1u8; 100]).unwrap();
        let big: Vec<u8> = (0..20_000u32).map(|i| i as u8).collect();
        let moved = data.update(row, &big).unwrap();
        assert_ne!(moved, row);
        assert_eq!(data.read(moved).unwrap(), big);
        assert!(data.read(row).unwrap_err().is_corruption());
    }

    #[test]
    fn test_delete_twice_is_corruption() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut data = txn.data(col()).unwrap();
        let row = data.insert(&[3u8; 10_000]).unwrap();
        data.delete(row).unwrap();
        let err = data.delete(row).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_delete_frees_page_space() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut data = txn.data(col()).unwrap();
        let keep = data.insert(&[1u8; 500]).unwrap();
        let gone = data.insert(&[2u8; 500]).unwrap();
        assert_eq!(keep.page_id, gone.page_id);
        data.delete(gone).unwrap();
        drop(data);

        let page = txn.page_snapshot(col(), keep.page_id).unwrap();
        let header = PageHeader::new(&page[..]);
        assert_eq!(header.items_count(), 1);
        assert_eq!(header.used_bytes(), 512);
        assert_eq!(header.free_bytes(), PAGE_CONTENT_SIZE - 512 - SLOT_SIZE);
    }
}
