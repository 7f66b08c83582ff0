//! Checkpoint management.
//!
//! A checkpoint copies the newest committed image of every logged page into
//! the data file, makes it durable and then empties the log. Afterwards
//! recovery has nothing to replay.
//!
//! The caller must hold the engine's exclusive lock: no transaction may be
//! reading log positions while the log is cut.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{FileOrigin, TxnId};
use tessera_storage::page::{PageFlags, PageHeader};
use tessera_storage::DiskService;

use crate::index::WalIndex;

/// Pages copied per batch handed to the writer.
const CHECKPOINT_BATCH: usize = 100;

/// Checkpoint state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    /// No checkpoint in progress.
    Idle,
    /// Copying log pages into the data file.
    InProgress,
    /// Truncating the log and dropping cached log pages.
    Completing,
}

/// Information about a completed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Sequence number of this checkpoint since open.
    pub checkpoint_id: u64,
    /// Distinct pages copied into the data file.
    pub pages: usize,
    /// Log length before truncation.
    pub log_pages: u32,
    /// Time taken.
    pub duration: Duration,
}

/// Checkpoint manager.
pub struct CheckpointManager {
    state: Mutex<CheckpointState>,
    last_checkpoint: Mutex<Option<CheckpointInfo>>,
    completed: AtomicU64,
    checkpoint_requested: AtomicBool,
    /// Log length (pages) that makes a checkpoint due. Zero disables.
    threshold: u32,
}

impl CheckpointManager {
    /// Creates a manager that considers a checkpoint due once the log holds
    /// `threshold` pages.
    pub fn new(threshold: u32) -> Self {
        Self {
            state: Mutex::new(CheckpointState::Idle),
            last_checkpoint: Mutex::new(None),
            completed: AtomicU64::new(0),
            checkpoint_requested: AtomicBool::new(false),
            threshold,
        }
    }

    /// Returns the current checkpoint state.
    pub fn state(&self) -> CheckpointState {
        *self.state.lock()
    }

    /// Returns true if a checkpoint is in progress.
    pub fn is_in_progress(&self) -> bool {
        !matches!(*self.state.lock(), CheckpointState::Idle)
    }

    /// Log length that triggers an automatic checkpoint.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// True once the log has grown past the threshold. Also raises the
    /// request flag so a later committer can pick it up.
    pub fn should_checkpoint(&self, log_pages: u32) -> bool {
        let due = self.threshold > 0 && log_pages >= self.threshold;
        if due {
            self.checkpoint_requested.store(true, Ordering::Release);
        }
        due || self.is_requested()
    }

    /// Requests a checkpoint at the next opportunity.
    pub fn request_checkpoint(&self) {
        self.checkpoint_requested.store(true, Ordering::Release);
    }

    /// Returns true if a checkpoint has been requested.
    pub fn is_requested(&self) -> bool {
        self.checkpoint_requested.load(Ordering::Acquire)
    }

    /// Returns the last completed checkpoint info.
    pub fn last_checkpoint(&self) -> Option<CheckpointInfo> {
        self.last_checkpoint.lock().clone()
    }

    /// Number of checkpoints completed since open.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Runs a checkpoint. The caller holds the exclusive lock.
    pub fn checkpoint(&self, disk: &DiskService, wal: &WalIndex) -> TesseraResult<CheckpointInfo> {
        {
            let mut state = self.state.lock();
            if *state != CheckpointState::Idle {
                return Err(TesseraError::internal("checkpoint already in progress"));
            }
            *state = CheckpointState::InProgress;
        }

        let result = self.run(disk, wal);
        *self.state.lock() = CheckpointState::Idle;

        let info = result?;
        *self.last_checkpoint.lock() = Some(info.clone());
        self.checkpoint_requested.store(false, Ordering::Release);
        info!(
            checkpoint_id = info.checkpoint_id,
            pages = info.pages,
            log_pages = info.log_pages,
            duration_ms = info.duration.as_millis() as u64,
            "checkpoint complete"
        );
        Ok(info)
    }

    fn run(&self, disk: &DiskService, wal: &WalIndex) -> TesseraResult<CheckpointInfo> {
        let start = Instant::now();
        let log_pages = disk.log_length();
        let pages = wal.latest_positions();

        for chunk in pages.chunks(CHECKPOINT_BATCH) {
            let mut batch = Vec::with_capacity(chunk.len());
            for log_page in chunk {
                let mut page = disk.read_writable_page(FileOrigin::Log, log_page.position)?;
                let mut header = PageHeader::new(&mut page[..]);
                header.clear_flag(PageFlags::CONFIRMED);
                header.clear_flag(PageFlags::DIRTY);
                header.set_transaction_id(TxnId::NONE);
                batch.push(page);
            }
            disk.write_data_pages(batch)?;
        }
        disk.flush()?;
        debug!(pages = pages.len(), "log pages copied to data file");

        *self.state.lock() = CheckpointState::Completing;
        wal.clear();
        disk.truncate_log(0)?;
        disk.cache().clear()?;

        let checkpoint_id = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(CheckpointInfo {
            checkpoint_id,
            pages: pages.len(),
            log_pages,
            duration: start.elapsed(),
        })
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("state", &self.state())
            .field("threshold", &self.threshold)
            .field("is_requested", &self.is_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LogPage;
    use tessera_common::config::EngineConfig;
    use tessera_common::types::PageId;
    use tessera_storage::page::{PageType, SlottedPage};

    #[test]
    fn test_checkpoint_manager_creation() {
        let mgr = CheckpointManager::new(10);
        assert_eq!(mgr.state(), CheckpointState::Idle);
        assert!(!mgr.is_in_progress());
        assert!(mgr.last_checkpoint().is_none());
        assert!(!mgr.should_checkpoint(9));
        assert!(mgr.should_checkpoint(10));
        assert!(mgr.is_requested());
    }

    #[test]
    fn test_zero_threshold_disables() {
        let mgr = CheckpointManager::new(0);
        assert!(!mgr.should_checkpoint(u32::MAX));
        mgr.request_checkpoint();
        assert!(mgr.should_checkpoint(0));
    }

    #[test]
    fn test_checkpoint_moves_pages_to_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::for_testing(dir.path().join("ckpt.db"));
        let disk = DiskService::open(&config).unwrap();
        let wal = WalIndex::new();

        let mut pages = Vec::new();
        for (marker, id) in [(1u8, 4u32), (2, 4), (3, 6)] {
            let mut page = disk.new_page();
            let mut slotted = SlottedPage::new(&mut page[..]);
            slotted.initialize(PageId::new(id), PageType::Data);
            slotted.header_mut().set_transaction_id(TxnId::new(1));
            page[200] = marker;
            pages.push(page);
        }
        let positions = disk.write_log_pages(pages).unwrap();
        disk.flush().unwrap();
        let log: Vec<LogPage> = [4u32, 4, 6]
            .iter()
            .zip(&positions)
            .map(|(id, pos)| LogPage { page_id: PageId::new(*id), position: *pos })
            .collect();
        wal.confirm_transaction(TxnId::new(1), &log);

        let mgr = CheckpointManager::new(1000);
        let info = mgr.checkpoint(&disk, &wal).unwrap();
        assert_eq!(info.pages, 2);
        assert_eq!(info.log_pages, 3);
        assert_eq!(disk.log_length(), 0);
        assert_eq!(wal.page_count(), 0);
        assert_eq!(mgr.completed(), 1);

        let page = disk.read_page(FileOrigin::Data, 4).unwrap();
        assert_eq!(page[200], 2);
        let header = PageHeader::new(&page[..]);
        assert_eq!(header.page_id(), PageId::new(4));
        assert_eq!(header.transaction_id(), TxnId::NONE);
        let page = disk.read_page(FileOrigin::Data, 6).unwrap();
        assert_eq!(page[200], 3);
    }
}
