//! Transactions.
//!
//! A write transaction holds the shared gate and exclusive locks on the
//! collections it named at begin. It sees the committed state as of its
//! read version plus its own changes, which stay private until commit.
//!
//! # Commit
//!
//! ```text
//!   snapshots ──► dirty pages ─┐
//!   allocation ─► map pages  ──┼──► stamp txn id ──► append to log ──► fsync
//!   safepoints ─► (in log)   ──┘    last = CONFIRMED          │
//!                                                             ▼
//!                                         WalIndex::confirm_transaction
//!                                         (new read version)
//! ```
//!
//! Dropping an active transaction rolls it back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use tessera_common::constants::MAX_COLLECTIONS;
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{ColId, FileOrigin, PageId, TxnId};
use tessera_storage::page::{PageFlags, PageHeader};
use tessera_wal::LogPage;

use crate::context::{EngineContext, EngineCounters};
use crate::services::allocation::ExtendSet;
use crate::services::{DataService, IndexDef, IndexService};
use crate::snapshot::Snapshot;

/// What a transaction may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; takes no collection locks.
    Read,
    /// Reads and writes the collections locked at begin.
    Write,
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open.
    Active,
    /// Changes are durable and visible.
    Committed,
    /// Changes were discarded.
    RolledBack,
}

/// Requests cancellation of a running transaction from another thread.
///
/// The transaction notices at its next page allocation, index insert or
/// chain step and fails with [`TesseraError::Cancelled`]; it must then be
/// rolled back (or dropped).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// An open transaction.
pub struct Transaction {
    ctx: Arc<EngineContext>,
    txn_id: TxnId,
    read_version: u32,
    mode: TransactionMode,
    collections: Vec<ColId>,
    snapshots: BTreeMap<ColId, Snapshot>,
    state: TransactionState,
    cancel: Arc<AtomicBool>,
}

fn check_col(col: ColId, allow_master: bool) -> TesseraResult<()> {
    if col == ColId::MASTER {
        if allow_master {
            return Ok(());
        }
        return Err(TesseraError::invalid_argument(
            "the master collection holds no pages",
        ));
    }
    if col.is_none() || col.as_u8() > MAX_COLLECTIONS {
        return Err(TesseraError::CollectionLimit {
            col_id: col.as_u8(),
            max: MAX_COLLECTIONS,
        });
    }
    Ok(())
}

impl Transaction {
    pub(crate) fn begin(
        ctx: Arc<EngineContext>,
        mode: TransactionMode,
        cols: &[ColId],
    ) -> TesseraResult<Self> {
        ctx.ensure_open()?;
        for &col in cols {
            check_col(col, true)?;
        }
        ctx.locks.enter_transaction()?;

        let (txn_id, collections) = match mode {
            TransactionMode::Read => (TxnId::NONE, Vec::new()),
            TransactionMode::Write => {
                let txn_id = ctx.wal.next_transaction_id();
                match ctx.locks.enter_collections(txn_id, cols) {
                    Ok(held) => (txn_id, held),
                    Err(err) => {
                        ctx.locks.exit_transaction();
                        return Err(err);
                    }
                }
            }
        };
        let read_version = ctx.wal.current_read_version();
        debug!(txn_id = %txn_id, read_version, ?mode, ?collections, "transaction started");

        Ok(Self {
            ctx,
            txn_id,
            read_version,
            mode,
            collections,
            snapshots: BTreeMap::new(),
            state: TransactionState::Active,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Transaction id ([`TxnId::NONE`] for read transactions).
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Committed version this transaction reads.
    pub fn read_version(&self) -> u32 {
        self.read_version
    }

    /// Read or write.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Locked collections, ascending.
    pub fn collections(&self) -> &[ColId] {
        &self.collections
    }

    /// Handle for cancelling this transaction from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel),
        }
    }

    /// Pages currently held in memory across all collections.
    pub fn dirty_pages(&self) -> usize {
        self.snapshots.values().map(Snapshot::dirty_pages).sum()
    }

    fn ensure_active(&self) -> TesseraResult<()> {
        if self.state != TransactionState::Active {
            return Err(TesseraError::invalid_argument(format!(
                "transaction {} is {:?}",
                self.txn_id, self.state
            )));
        }
        Ok(())
    }

    fn snapshot(&mut self, col: ColId) -> TesseraResult<&mut Snapshot> {
        self.ensure_active()?;
        self.ctx.ensure_open()?;
        check_col(col, false)?;
        let writable = match self.mode {
            TransactionMode::Read => false,
            TransactionMode::Write => {
                if !self.collections.contains(&col) {
                    return Err(TesseraError::invalid_argument(format!(
                        "collection {col} is not locked by transaction {}",
                        self.txn_id
                    )));
                }
                true
            }
        };
        let (ctx, txn_id, read_version, cancel) =
            (&self.ctx, self.txn_id, self.read_version, &self.cancel);
        let snapshot = self.snapshots.entry(col).or_insert_with(|| {
            Snapshot::new(
                Arc::clone(ctx),
                col,
                txn_id,
                read_version,
                writable,
                Arc::clone(cancel),
            )
        });
        Ok(snapshot)
    }

    /// Document access for `col`.
    pub fn data(&mut self, col: ColId) -> TesseraResult<DataService<'_>> {
        Ok(DataService::new(self.snapshot(col)?))
    }

    /// Index access for `col`.
    pub fn index(&mut self, col: ColId) -> TesseraResult<IndexService<'_>> {
        Ok(IndexService::new(self.snapshot(col)?))
    }

    /// Creates an index in `col`. Shorthand for
    /// `index(col)?.create_index(..)`.
    pub fn create_index(
        &mut self,
        col: ColId,
        name: impl Into<String>,
        slot: u8,
        unique: bool,
    ) -> TesseraResult<IndexDef> {
        self.index(col)?.create_index(name, slot, unique)
    }

    /// Frees every page of `col`. Returns the number of pages released.
    pub fn drop_collection(&mut self, col: ColId) -> TesseraResult<usize> {
        self.snapshot(col)?.drop_collection()
    }

    /// Copy of page `page_id` as this transaction sees it.
    pub fn page_snapshot(&mut self, col: ColId, page_id: PageId) -> TesseraResult<Vec<u8>> {
        let snapshot = self.snapshot(col)?;
        let page = snapshot.page(page_id)?;
        Ok(page.to_vec())
    }

    /// Writes every dirty page to the log without confirming it. Returns
    /// the number of pages written.
    pub fn safepoint(&mut self) -> TesseraResult<usize> {
        self.ensure_active()?;
        let mut written = 0;
        for snapshot in self.snapshots.values_mut() {
            written += snapshot.safepoint()?;
        }
        Ok(written)
    }

    // =========================================================================
    // Commit / rollback
    // =========================================================================

    /// Makes every change durable and visible to transactions that begin
    /// afterwards.
    pub fn commit(mut self) -> TesseraResult<()> {
        self.ensure_active()?;
        if let Err(err) = self.ctx.ensure_open() {
            self.abort();
            return Err(err);
        }
        if self.cancel.load(Ordering::Acquire) {
            self.abort();
            return Err(TesseraError::Cancelled);
        }
        if self.mode == TransactionMode::Read {
            self.state = TransactionState::Committed;
            self.release();
            return Ok(());
        }

        match self.write_log() {
            Ok(pages) => {
                self.state = TransactionState::Committed;
                self.release();
                EngineCounters::bump(&self.ctx.counters.commits);
                debug!(txn_id = %self.txn_id, pages, "transaction committed");
                self.ctx.try_auto_checkpoint();
                Ok(())
            }
            Err(err) => {
                warn!(txn_id = %self.txn_id, error = %err, "commit failed");
                self.abort();
                Err(err)
            }
        }
    }

    fn write_log(&mut self) -> TesseraResult<usize> {
        let _commit = self.ctx.commit_lock.lock();

        let mut logged: Vec<LogPage> = Vec::new();
        let mut touched = ExtendSet::new();
        let mut ids = Vec::new();
        let mut pages = Vec::new();
        for snapshot in self.snapshots.values_mut() {
            logged.extend(snapshot.safepoint_pages());
            touched.extend(snapshot.touched().iter().copied());
            for (page_id, page) in snapshot.take_dirty() {
                ids.push(page_id);
                pages.push(page);
            }
        }
        logged.sort_by_key(|p| p.position);

        for page in self.ctx.alloc.commit(&touched, &self.ctx.disk) {
            ids.push(PageHeader::new(&page[..]).page_id());
            pages.push(page);
        }

        if pages.is_empty() {
            let Some(last) = logged.pop() else {
                return Ok(0);
            };
            // only safepointed pages: log the last one again to carry the confirm flag
            let page = self
                .ctx
                .observe(self.ctx.disk.read_writable_page(FileOrigin::Log, last.position))?;
            ids.push(last.page_id);
            pages.push(page);
        }

        let last = pages.len() - 1;
        for (i, page) in pages.iter_mut().enumerate() {
            let mut header = PageHeader::new(&mut page[..]);
            header.set_transaction_id(self.txn_id);
            if i == last {
                header.set_flag(PageFlags::CONFIRMED);
            } else {
                header.clear_flag(PageFlags::CONFIRMED);
            }
        }

        let count = pages.len() + logged.len();
        let positions = self.ctx.observe(self.ctx.disk.write_log_pages(pages))?;
        self.ctx.observe(self.ctx.disk.flush())?;
        logged.extend(
            ids.into_iter()
                .zip(positions)
                .map(|(page_id, position)| LogPage { page_id, position }),
        );
        self.ctx.wal.confirm_transaction(self.txn_id, &logged);
        Ok(count)
    }

    /// Discards every change.
    pub fn rollback(mut self) -> TesseraResult<()> {
        self.ensure_active()?;
        self.abort();
        Ok(())
    }

    fn abort(&mut self) {
        let mut touched = ExtendSet::new();
        for snapshot in self.snapshots.values_mut() {
            touched.extend(snapshot.touched().iter().copied());
            snapshot.discard();
        }
        if self.mode == TransactionMode::Write {
            self.ctx.alloc.rollback(&touched, &self.collections);
            EngineCounters::bump(&self.ctx.counters.rollbacks);
        }
        self.state = TransactionState::RolledBack;
        self.release();
        debug!(txn_id = %self.txn_id, "transaction rolled back");
    }

    fn release(&mut self) {
        self.snapshots.clear();
        if self.mode == TransactionMode::Write {
            self.ctx.locks.release_collections(self.txn_id, &self.collections);
        }
        self.ctx.locks.exit_transaction();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("read_version", &self.read_version)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("collections", &self.collections)
            .field("dirty_pages", &self.dirty_pages())
            .finish()
    }
}
