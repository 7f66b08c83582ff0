//! The engine: opening, transactions, checkpoints and shutdown.
//!
//! # Lifecycle
//!
//! ```text
//!  open ──► restore log index ──► load allocation map ──► [checkpoint]
//!    │
//!    ▼
//!  begin_transaction / begin_read ──► commit | rollback ──► auto checkpoint
//!    │
//!    ▼
//!  close ──► [checkpoint] ──► stop writer
//! ```
//!
//! Any I/O failure or detected corruption closes the engine; later calls
//! fail with [`TesseraError::EngineClosed`] and [`Engine::stats`] reports
//! the original error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use tessera_common::config::EngineConfig;
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{ColId, TxnId};
use tessera_storage::buffer::CacheStats;
use tessera_storage::page::PageHeader;
use tessera_storage::DiskService;
use tessera_wal::{CheckpointInfo, WalIndex};

use crate::context::EngineContext;
use crate::levels::{LevelGenerator, RandomLevels};
use crate::services::AllocationMapService;
use crate::transaction::{Transaction, TransactionMode};

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Buffer cache counters.
    pub cache: CacheStats,
    /// Pages in the log file.
    pub log_pages: u32,
    /// Distinct pages with a confirmed version in the log.
    pub wal_pages: usize,
    /// Current read version.
    pub read_version: u32,
    /// Highest transaction id handed out.
    pub last_transaction_id: TxnId,
    /// Transactions inside the engine.
    pub active_transactions: usize,
    /// Checkpoints completed since open.
    pub checkpoints: u64,
    /// Pages written by the disk writer since open.
    pub pages_written: u64,
    /// Committed write transactions.
    pub commits: u64,
    /// Rolled back write transactions.
    pub rollbacks: u64,
    /// Safepoints taken.
    pub safepoints: u64,
    /// Lock waits that timed out.
    pub lock_timeouts: u64,
    /// Whether the engine is closed.
    pub closed: bool,
    /// The fatal error that closed the engine, if any.
    pub failure: Option<String>,
}

/// An open data file.
///
/// `Engine` is `Send + Sync`; share it by reference or in an `Arc` and
/// start transactions from any thread.
pub struct Engine {
    ctx: Arc<EngineContext>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Opens or creates the data file named by `config`.
    ///
    /// Confirmed transactions found in the log are made visible again;
    /// pages of transactions that never confirmed are ignored.
    pub fn open(config: EngineConfig) -> TesseraResult<Self> {
        config.validate()?;
        info!(path = %config.filename.display(), "opening engine");

        let disk = DiskService::open(&config)?;
        let wal = WalIndex::new();
        let restored = wal.restore(&disk)?;
        let alloc = AllocationMapService::load(&disk, &wal)?;
        let levels: Box<dyn LevelGenerator> = match config.level_seed {
            Some(seed) => Box::new(RandomLevels::seeded(seed)),
            None => Box::new(RandomLevels::from_entropy()),
        };

        let ctx = Arc::new(EngineContext::new(config, disk, wal, alloc, levels));
        if ctx.config.checkpoint_on_open && ctx.disk.log_length() > 0 {
            ctx.run_checkpoint()?;
        }
        info!(
            created = ctx.disk.created(),
            restored_pages = restored,
            map_pages = ctx.alloc.map_pages(),
            "engine opened"
        );
        Ok(Self {
            ctx,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Starts a write transaction holding exclusive locks on `cols`.
    ///
    /// Waits up to the lock timeout for other writers of the same
    /// collections and for a running checkpoint.
    pub fn begin_transaction(&self, cols: &[ColId]) -> TesseraResult<Transaction> {
        Transaction::begin(Arc::clone(&self.ctx), TransactionMode::Write, cols)
    }

    /// Starts a read-only transaction over the current committed state.
    pub fn begin_read(&self) -> TesseraResult<Transaction> {
        Transaction::begin(Arc::clone(&self.ctx), TransactionMode::Read, &[])
    }

    /// Copies every committed log page into the data file and empties the
    /// log. Waits for active transactions to finish.
    pub fn checkpoint(&self) -> TesseraResult<CheckpointInfo> {
        self.ctx.ensure_open()?;
        self.ctx.locks.enter_exclusive()?;
        let result = self.ctx.run_checkpoint();
        self.ctx.locks.exit_exclusive();
        result
    }

    /// Replaces the skip-list level generator.
    pub fn set_level_generator(&self, levels: Box<dyn LevelGenerator>) {
        self.ctx.set_level_generator(levels);
    }

    /// True once closed, explicitly or by a fatal error.
    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    /// Checks every page the committed allocation map marks as used
    /// against the page itself: owner collection and free space class must
    /// match. Returns the number of pages checked.
    pub fn check_allocation_map(&self) -> TesseraResult<usize> {
        self.ctx.ensure_open()?;
        let _commit = self.ctx.commit_lock.lock();
        let version = self.ctx.wal.current_read_version();
        let pages = self.ctx.alloc.committed_pages();
        for &(page_id, col_id, space) in &pages {
            let page = self.ctx.observe(self.ctx.read_page(page_id, version))?;
            let header = PageHeader::new(&page[..]);
            if header.page_id() != page_id || header.col_id() != col_id || header.space() != space {
                return self.ctx.observe(Err(TesseraError::corruption(format!(
                    "allocation map says page {page_id} is {space:?} in collection {col_id}, \
                     page says {:?} page {} in collection {}",
                    header.space(),
                    header.page_id(),
                    header.col_id()
                ))));
            }
        }
        Ok(pages.len())
    }

    /// Returns current statistics.
    pub fn stats(&self) -> EngineStats {
        let ctx = &self.ctx;
        let counters = &ctx.counters;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EngineStats {
            cache: ctx.disk.cache_stats(),
            log_pages: ctx.disk.log_length(),
            wal_pages: ctx.wal.page_count(),
            read_version: ctx.wal.current_read_version(),
            last_transaction_id: ctx.wal.last_transaction_id(),
            active_transactions: ctx.locks.active_transactions(),
            checkpoints: ctx.checkpoint.completed(),
            pages_written: ctx.disk.pages_written(),
            commits: load(&counters.commits),
            rollbacks: load(&counters.rollbacks),
            safepoints: load(&counters.safepoints),
            lock_timeouts: load(&ctx.locks.stats().timeouts),
            closed: ctx.is_closed(),
            failure: ctx.failure(),
        }
    }

    /// Closes the engine, checkpointing first if configured to.
    ///
    /// Transactions still open keep the checkpoint from running; their
    /// committed work stays in the log and is restored on the next open.
    pub fn close(&self) -> TesseraResult<()> {
        let ctx = &self.ctx;
        let first = ctx.mark_closed();
        if first && ctx.config.checkpoint_on_close && ctx.failure().is_none() {
            match ctx.locks.enter_exclusive() {
                Ok(()) => {
                    let result = ctx.run_checkpoint();
                    ctx.locks.exit_exclusive();
                    if let Err(err) = result {
                        warn!(error = %err, "checkpoint on close failed");
                    }
                }
                Err(err) => warn!(error = %err, "skipping checkpoint on close"),
            }
        }
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        ctx.disk.close()?;
        if first {
            info!(path = %ctx.config.filename.display(), "engine closed");
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "error closing engine");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("ctx", &self.ctx).finish()
    }
}
