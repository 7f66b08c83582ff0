//! Per-engine shared state handed to every component.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{error, warn};

use tessera_common::config::EngineConfig;
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{FileOrigin, PageId};
use tessera_storage::{DiskService, SharedPage, WritablePage};
use tessera_txn::LockManager;
use tessera_wal::{CheckpointInfo, CheckpointManager, WalIndex};

use crate::levels::LevelGenerator;
use crate::services::AllocationMapService;

/// Engine-wide counters.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub(crate) commits: AtomicU64,
    pub(crate) rollbacks: AtomicU64,
    pub(crate) safepoints: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything an open engine owns. Shared through `Arc` by the engine and
/// its transactions.
pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) disk: DiskService,
    pub(crate) wal: WalIndex,
    pub(crate) locks: LockManager,
    pub(crate) checkpoint: CheckpointManager,
    pub(crate) alloc: AllocationMapService,
    /// Serializes commits so log order follows commit order.
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) counters: EngineCounters,
    levels: Mutex<Box<dyn LevelGenerator>>,
    closed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl EngineContext {
    pub(crate) fn new(
        config: EngineConfig,
        disk: DiskService,
        wal: WalIndex,
        alloc: AllocationMapService,
        levels: Box<dyn LevelGenerator>,
    ) -> Self {
        Self {
            locks: LockManager::new(config.lock_timeout()),
            checkpoint: CheckpointManager::new(config.checkpoint_pages),
            config,
            disk,
            wal,
            alloc,
            commit_lock: Mutex::new(()),
            counters: EngineCounters::default(),
            levels: Mutex::new(levels),
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> TesseraResult<()> {
        if self.is_closed() {
            return Err(TesseraError::EngineClosed);
        }
        Ok(())
    }

    /// Marks the engine closed. Returns false if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Closes the engine if `result` carries a fatal error.
    pub(crate) fn observe<T>(&self, result: TesseraResult<T>) -> TesseraResult<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.fail(err);
            }
        }
        result
    }

    fn fail(&self, err: &TesseraError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            error!(error = %err, code = ?err.code(), "fatal error, closing engine");
            *failure = Some(err.to_string());
        }
        self.closed.store(true, Ordering::Release);
    }

    /// Committed image of `page_id` as of `version`.
    pub(crate) fn read_page(&self, page_id: PageId, version: u32) -> TesseraResult<SharedPage> {
        match self.wal.get_page_index(page_id, version) {
            Some(position) => self.disk.read_page(FileOrigin::Log, position),
            None => self.disk.read_page(FileOrigin::Data, page_id.as_u32()),
        }
    }

    /// Private writable copy of the committed image of `page_id`.
    pub(crate) fn read_writable_page(
        &self,
        page_id: PageId,
        version: u32,
    ) -> TesseraResult<WritablePage> {
        match self.wal.get_page_index(page_id, version) {
            Some(position) => self.disk.read_writable_page(FileOrigin::Log, position),
            None => self.disk.read_writable_page(FileOrigin::Data, page_id.as_u32()),
        }
    }

    pub(crate) fn next_level(&self) -> u8 {
        self.levels.lock().next_level()
    }

    pub(crate) fn set_level_generator(&self, levels: Box<dyn LevelGenerator>) {
        *self.levels.lock() = levels;
    }

    /// Runs a checkpoint. The caller holds the exclusive lock.
    pub(crate) fn run_checkpoint(&self) -> TesseraResult<CheckpointInfo> {
        self.observe(self.checkpoint.checkpoint(&self.disk, &self.wal))
    }

    /// Checkpoints if the log is over its threshold and nobody else is
    /// inside the engine. Never waits.
    pub(crate) fn try_auto_checkpoint(&self) {
        if self.is_closed() || !self.checkpoint.should_checkpoint(self.disk.log_length()) {
            return;
        }
        if !self.locks.try_enter_exclusive() {
            return;
        }
        if let Err(err) = self.run_checkpoint() {
            warn!(error = %err, "automatic checkpoint failed");
        }
        self.locks.exit_exclusive();
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("filename", &self.config.filename)
            .field("closed", &self.is_closed())
            .field("log_pages", &self.disk.log_length())
            .finish()
    }
}
