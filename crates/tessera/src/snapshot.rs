//! Per-collection view of the database inside one transaction.
//!
//! A snapshot resolves every page read through three layers: the pages it
//! has already copied for writing, the pages it pushed to the log at a
//! safepoint, and finally the committed image at the transaction's read
//! version. Writes always go to a private [`WritablePage`]; nothing is
//! visible to other transactions until commit.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{ColId, FileOrigin, PageId, TxnId};
use tessera_storage::page::{PageFlags, PageHeader, PageType, SlottedPage};
use tessera_storage::{SharedPage, WritablePage};
use tessera_wal::LogPage;

use crate::context::{EngineContext, EngineCounters};
use crate::services::allocation::ExtendSet;

/// Read access to a page: either the snapshot's own copy or a shared
/// committed image.
pub(crate) enum PageRef<'a> {
    Local(&'a WritablePage),
    Shared(SharedPage),
}

impl Deref for PageRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Local(page) => page,
            Self::Shared(page) => page,
        }
    }
}

pub(crate) struct Snapshot {
    ctx: Arc<EngineContext>,
    col_id: ColId,
    txn_id: TxnId,
    read_version: u32,
    writable: bool,
    cancel: Arc<AtomicBool>,
    local: HashMap<PageId, WritablePage>,
    safepoint: HashMap<PageId, u32>,
    touched: ExtendSet,
}

impl Snapshot {
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        col_id: ColId,
        txn_id: TxnId,
        read_version: u32,
        writable: bool,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ctx,
            col_id,
            txn_id,
            read_version,
            writable,
            cancel,
            local: HashMap::new(),
            safepoint: HashMap::new(),
            touched: ExtendSet::new(),
        }
    }

    pub(crate) fn ctx(&self) -> &EngineContext {
        &self.ctx
    }

    pub(crate) fn col_id(&self) -> ColId {
        self.col_id
    }

    pub(crate) fn dirty_pages(&self) -> usize {
        self.local.len()
    }

    pub(crate) fn check_cancelled(&self) -> TesseraResult<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(TesseraError::Cancelled);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> TesseraResult<()> {
        if !self.writable {
            return Err(TesseraError::invalid_argument(format!(
                "collection {} is not writable in this transaction",
                self.col_id
            )));
        }
        Ok(())
    }

    /// Closes the engine on fatal errors.
    pub(crate) fn observe<T>(&self, result: TesseraResult<T>) -> TesseraResult<T> {
        self.ctx.observe(result)
    }

    // =========================================================================
    // Page access
    // =========================================================================

    pub(crate) fn page(&self, page_id: PageId) -> TesseraResult<PageRef<'_>> {
        if let Some(page) = self.local.get(&page_id) {
            return Ok(PageRef::Local(page));
        }
        let shared = match self.safepoint.get(&page_id) {
            Some(&position) => self.ctx.disk.read_page(FileOrigin::Log, position)?,
            None => self.ctx.read_page(page_id, self.read_version)?,
        };
        Ok(PageRef::Shared(shared))
    }

    pub(crate) fn page_mut(&mut self, page_id: PageId) -> TesseraResult<&mut WritablePage> {
        self.ensure_writable()?;
        if !self.local.contains_key(&page_id) {
            self.maybe_safepoint()?;
            let page = match self.safepoint.get(&page_id) {
                Some(&position) => self.ctx.disk.read_writable_page(FileOrigin::Log, position)?,
                None => self.ctx.read_writable_page(page_id, self.read_version)?,
            };
            self.local.insert(page_id, page);
        }
        self.local
            .get_mut(&page_id)
            .ok_or_else(|| TesseraError::internal(format!("page {page_id} vanished from snapshot")))
    }

    fn init_page(&mut self, page_id: PageId, page_type: PageType) -> TesseraResult<()> {
        self.maybe_safepoint()?;
        let mut page = self.ctx.disk.new_page();
        let mut slotted = SlottedPage::new(&mut page[..]);
        slotted.initialize(page_id, page_type);
        slotted.header_mut().set_col_id(self.col_id);
        self.local.insert(page_id, page);
        Ok(())
    }

    /// Returns a page of `page_type` with free space, initializing it if the
    /// allocation map hands out a fresh one.
    pub(crate) fn get_free_page(&mut self, page_type: PageType) -> TesseraResult<PageId> {
        self.ensure_writable()?;
        let (page_id, is_new) =
            self.ctx
                .alloc
                .get_free_page(self.col_id, page_type, &mut self.touched)?;
        if is_new {
            self.init_page(page_id, page_type)?;
        } else {
            let page = self.page(page_id)?;
            let header = PageHeader::new(&page[..]);
            if header.page_type() != page_type {
                return Err(TesseraError::corruption(format!(
                    "allocation map points {page_type} request at {} page {page_id}",
                    header.page_type()
                )));
            }
        }
        Ok(page_id)
    }

    /// Pushes a modified page's free space class into the allocation map.
    pub(crate) fn page_changed(&mut self, page_id: PageId) -> TesseraResult<()> {
        let page = self.local.get(&page_id).ok_or_else(|| {
            TesseraError::internal(format!("page {page_id} changed outside the snapshot"))
        })?;
        let space = PageHeader::new(&page[..]).space();
        self.ctx
            .alloc
            .update_page_space(self.col_id, page_id, space, &mut self.touched)
    }

    // =========================================================================
    // Safepoint, commit and rollback support
    // =========================================================================

    fn maybe_safepoint(&mut self) -> TesseraResult<()> {
        if self.local.len() >= self.ctx.config.max_transaction_pages {
            self.safepoint()?;
        }
        Ok(())
    }

    /// Appends every dirty page to the log without confirming it and frees
    /// the memory. Returns the number of pages written.
    pub(crate) fn safepoint(&mut self) -> TesseraResult<usize> {
        self.check_cancelled()?;
        if self.local.is_empty() {
            return Ok(0);
        }
        let mut pages: Vec<(PageId, WritablePage)> = self.local.drain().collect();
        pages.sort_by_key(|(id, _)| *id);

        let mut ids = Vec::with_capacity(pages.len());
        let mut buffers = Vec::with_capacity(pages.len());
        for (page_id, mut page) in pages {
            let mut header = PageHeader::new(&mut page[..]);
            header.set_transaction_id(self.txn_id);
            header.clear_flag(PageFlags::CONFIRMED);
            ids.push(page_id);
            buffers.push(page);
        }

        let positions = self.observe(self.ctx.disk.write_log_pages(buffers))?;
        self.observe(self.ctx.disk.flush())?;
        for (page_id, position) in ids.iter().zip(positions) {
            self.safepoint.insert(*page_id, position);
        }
        EngineCounters::bump(&self.ctx.counters.safepoints);
        debug!(
            txn_id = %self.txn_id,
            col = self.col_id.as_u8(),
            pages = ids.len(),
            "safepoint"
        );
        Ok(ids.len())
    }

    /// Dirty pages in page id order, leaving the snapshot empty.
    pub(crate) fn take_dirty(&mut self) -> Vec<(PageId, WritablePage)> {
        let mut pages: Vec<(PageId, WritablePage)> = self.local.drain().collect();
        pages.sort_by_key(|(id, _)| *id);
        pages
    }

    /// Pages already in the log from safepoints.
    pub(crate) fn safepoint_pages(&self) -> Vec<LogPage> {
        let mut pages: Vec<LogPage> = self
            .safepoint
            .iter()
            .map(|(page_id, position)| LogPage {
                page_id: *page_id,
                position: *position,
            })
            .collect();
        pages.sort_by_key(|p| p.position);
        pages
    }

    pub(crate) fn touched(&self) -> &ExtendSet {
        &self.touched
    }

    /// Drops every private page.
    pub(crate) fn discard(&mut self) {
        self.local.clear();
        self.safepoint.clear();
    }

    /// Frees every page of the collection.
    pub(crate) fn drop_collection(&mut self) -> TesseraResult<usize> {
        self.ensure_writable()?;
        let pages = self.ctx.alloc.drop_collection(self.col_id, &mut self.touched);
        for page_id in &pages {
            self.local.remove(page_id);
        }
        debug!(col = self.col_id.as_u8(), pages = pages.len(), "collection dropped");
        Ok(pages.len())
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("col_id", &self.col_id)
            .field("txn_id", &self.txn_id)
            .field("read_version", &self.read_version)
            .field("writable", &self.writable)
            .field("dirty_pages", &self.local.len())
            .field("safepoint_pages", &self.safepoint.len())
            .finish()
    }
}
