//! Log index: which log position holds which committed page version.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use tessera_common::constants::PAGE_SIZE;
use tessera_common::error::TesseraResult;
use tessera_common::types::{FileOrigin, PageId, TxnId};
use tessera_storage::page::PageHeader;
use tessera_storage::DiskService;

/// A page image stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPage {
    /// Logical page.
    pub page_id: PageId,
    /// Position in the log file.
    pub position: u32,
}

#[derive(Debug, Default)]
struct IndexState {
    /// page id -> [(read version, log position)], oldest first.
    pages: HashMap<PageId, Vec<(u32, u32)>>,
    read_version: u32,
    last_transaction_id: TxnId,
    confirmed_transactions: usize,
}

/// Index of committed page versions in the log.
///
/// A reader pins the read version current when it starts and resolves
/// every page through [`get_page_index`](Self::get_page_index) with it, so
/// commits that land later stay invisible to it.
///
/// # Example
///
/// ```rust
/// use tessera_wal::{LogPage, WalIndex};
/// use tessera_common::types::PageId;
///
/// let index = WalIndex::new();
/// let before = index.current_read_version();
/// let txn = index.next_transaction_id();
/// index.confirm_transaction(txn, &[LogPage { page_id: PageId::new(5), position: 0 }]);
///
/// assert_eq!(index.get_page_index(PageId::new(5), before), None);
/// assert_eq!(index.get_page_index(PageId::new(5), index.current_read_version()), Some(0));
/// ```
#[derive(Debug, Default)]
pub struct WalIndex {
    state: RwLock<IndexState>,
}

impl WalIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Version a new reader should pin.
    pub fn current_read_version(&self) -> u32 {
        self.state.read().read_version
    }

    /// Allocates the next transaction id.
    pub fn next_transaction_id(&self) -> TxnId {
        let mut state = self.state.write();
        state.last_transaction_id = state.last_transaction_id.next();
        state.last_transaction_id
    }

    /// Highest transaction id seen so far.
    pub fn last_transaction_id(&self) -> TxnId {
        self.state.read().last_transaction_id
    }

    /// Log position of the newest version of `page_id` visible at `version`.
    pub fn get_page_index(&self, page_id: PageId, version: u32) -> Option<u32> {
        let state = self.state.read();
        state
            .pages
            .get(&page_id)?
            .iter()
            .rev()
            .find(|(v, _)| *v <= version)
            .map(|(_, position)| *position)
    }

    /// Makes a committed transaction's pages visible under a new read
    /// version and returns it.
    pub fn confirm_transaction(&self, txn_id: TxnId, pages: &[LogPage]) -> u32 {
        let mut state = self.state.write();
        state.read_version += 1;
        let version = state.read_version;
        for page in pages {
            state
                .pages
                .entry(page.page_id)
                .or_default()
                .push((version, page.position));
        }
        state.confirmed_transactions += 1;
        if txn_id > state.last_transaction_id {
            state.last_transaction_id = txn_id;
        }
        debug!(txn_id = %txn_id, version, pages = pages.len(), "transaction confirmed");
        version
    }

    /// Newest log position of every logged page, ordered by page id.
    pub fn latest_positions(&self) -> Vec<LogPage> {
        let state = self.state.read();
        let mut pages: Vec<LogPage> = state
            .pages
            .iter()
            .filter_map(|(page_id, versions)| {
                versions.last().map(|(_, position)| LogPage {
                    page_id: *page_id,
                    position: *position,
                })
            })
            .collect();
        pages.sort_by_key(|p| p.page_id);
        pages
    }

    /// Number of distinct pages with a logged version.
    pub fn page_count(&self) -> usize {
        self.state.read().pages.len()
    }

    /// Number of transactions confirmed since the last clear.
    pub fn confirmed_transactions(&self) -> usize {
        self.state.read().confirmed_transactions
    }

    /// Forgets every logged page. Read versions and transaction ids keep
    /// increasing.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.pages.clear();
        state.confirmed_transactions = 0;
    }

    /// Rebuilds the index from the log file.
    ///
    /// Scanning stops at the first page that was never written, fails its
    /// checksum, or carries a recovery marker different from its position;
    /// the log is cut back to the last good page. Pages of transactions
    /// that never wrote a confirmed page are ignored.
    pub fn restore(&self, disk: &DiskService) -> TesseraResult<usize> {
        let length = disk.log_length();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut pending: HashMap<TxnId, Vec<LogPage>> = HashMap::new();
        let mut last_txn = TxnId::NONE;
        let mut valid = 0;

        for position in 0..length {
            match disk.read_raw(FileOrigin::Log, position, &mut buf) {
                Ok(()) => {}
                Err(e) if e.is_corruption() => {
                    warn!(position, error = %e, "log scan stopped at damaged page");
                    break;
                }
                Err(e) => return Err(e),
            }
            let header = PageHeader::new(&buf[..]);
            let txn_id = header.transaction_id();
            if txn_id == TxnId::NONE || header.position_id() != position {
                warn!(position, "log scan stopped at page with foreign position marker");
                break;
            }
            valid = position + 1;
            last_txn = last_txn.max(txn_id);
            pending.entry(txn_id).or_default().push(LogPage {
                page_id: header.page_id(),
                position,
            });
            if header.flags().is_confirmed() {
                let pages = pending.remove(&txn_id).unwrap_or_default();
                self.confirm_transaction(txn_id, &pages);
            }
        }

        {
            let mut state = self.state.write();
            state.last_transaction_id = state.last_transaction_id.max(last_txn);
        }
        if valid < length {
            disk.truncate_log(valid)?;
        }
        let confirmed = self.confirmed_transactions();
        info!(
            log_pages = valid,
            confirmed,
            discarded = pending.values().map(Vec::len).sum::<usize>(),
            "log restored"
        );
        Ok(confirmed)
    }
}
