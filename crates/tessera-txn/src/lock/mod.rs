//! Collection locks and the transaction gate.
//!
//! # Lock Compatibility
//!
//! ```text
//!              │ gate(S) │ gate(X) │ col(c) │
//! ─────────────┼─────────┼─────────┼────────┤
//!    gate(S)   │   ✓     │   ✗     │   ✓    │
//!    gate(X)   │   ✗     │   ✗     │   -    │
//!    col(c)    │   ✓     │   -     │   ✗    │
//! ```
//!
//! A pending exclusive request blocks new shared entries so a checkpoint
//! cannot be starved by a steady stream of transactions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{ColId, TxnId};

/// Statistics about the lock manager.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Collection locks granted.
    pub acquisitions: AtomicU64,
    /// Collection locks released.
    pub releases: AtomicU64,
    /// Lock requests that had to wait.
    pub waits: AtomicU64,
    /// Lock requests that timed out.
    pub timeouts: AtomicU64,
    /// Exclusive sections entered.
    pub exclusive: AtomicU64,
}

impl LockStats {
    fn record(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, AtomicOrdering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct LockTable {
    /// Transactions inside the shared gate.
    transactions: usize,
    /// Exclusive holder present.
    exclusive: bool,
    /// Exclusive requests waiting for the gate to drain.
    exclusive_waiting: usize,
    /// Collection id -> holding transaction.
    collections: HashMap<ColId, TxnId>,
}

/// The lock manager.
///
/// ```rust
/// use std::time::Duration;
/// use tessera_common::types::{ColId, TxnId};
/// use tessera_txn::LockManager;
///
/// let locks = LockManager::new(Duration::from_millis(100));
/// locks.enter_transaction().unwrap();
/// let cols = [ColId::from_raw(3), ColId::from_raw(1)];
/// let held = locks.enter_collections(TxnId::new(1), &cols).unwrap();
/// assert_eq!(held, vec![ColId::from_raw(1), ColId::from_raw(3)]);
/// locks.release_collections(TxnId::new(1), &held);
/// locks.exit_transaction();
/// ```
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
    timeout: Duration,
    stats: LockStats,
}

impl LockManager {
    /// Creates a lock manager with the given wait timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
            timeout,
            stats: LockStats::default(),
        }
    }

    /// Lock wait timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns lock statistics.
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Number of transactions inside the gate.
    pub fn active_transactions(&self) -> usize {
        self.table.lock().transactions
    }

    /// Transaction holding `col_id`, if any.
    pub fn holder(&self, col_id: ColId) -> Option<TxnId> {
        self.table.lock().collections.get(&col_id).copied()
    }

    /// True while a checkpoint (or other exclusive section) runs.
    pub fn is_exclusive(&self) -> bool {
        self.table.lock().exclusive
    }

    fn wait(&self, table: &mut MutexGuard<'_, LockTable>, deadline: Instant) -> bool {
        !self.changed.wait_until(table, deadline).timed_out()
    }

    // =========================================================================
    // Shared gate
    // =========================================================================

    /// Enters the shared gate, waiting while an exclusive section is held
    /// or requested.
    pub fn enter_transaction(&self) -> TesseraResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();
        let mut waited = false;
        while table.exclusive || table.exclusive_waiting > 0 {
            waited = true;
            if !self.wait(&mut table, deadline) {
                LockStats::record(&self.stats.timeouts, 1);
                warn!(timeout_ms = self.timeout.as_millis() as u64, "transaction gate timed out");
                return Err(TesseraError::LockTimeout {
                    collections: Vec::new(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }
        if waited {
            LockStats::record(&self.stats.waits, 1);
        }
        table.transactions += 1;
        Ok(())
    }

    /// Leaves the shared gate.
    pub fn exit_transaction(&self) {
        let mut table = self.table.lock();
        table.transactions = table.transactions.saturating_sub(1);
        drop(table);
        self.changed.notify_all();
    }

    // =========================================================================
    // Collection locks
    // =========================================================================

    /// Locks every collection in `cols` for `txn_id` and returns the sorted,
    /// de-duplicated set now held.
    ///
    /// Locks are taken in ascending id order. On timeout every lock taken
    /// by this call is released again and nothing is held.
    pub fn enter_collections(&self, txn_id: TxnId, cols: &[ColId]) -> TesseraResult<Vec<ColId>> {
        let mut wanted = cols.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();
        let mut taken = Vec::with_capacity(wanted.len());

        for &col in &wanted {
            let mut waited = false;
            loop {
                match table.collections.get(&col) {
                    None => {
                        table.collections.insert(col, txn_id);
                        taken.push(col);
                        break;
                    }
                    Some(holder) if *holder == txn_id => break,
                    Some(_) => {
                        waited = true;
                        if !self.wait(&mut table, deadline) {
                            for col in &taken {
                                table.collections.remove(col);
                            }
                            drop(table);
                            self.changed.notify_all();
                            LockStats::record(&self.stats.timeouts, 1);
                            warn!(txn_id = %txn_id, col = col.as_u8(), "collection lock timed out");
                            return Err(TesseraError::LockTimeout {
                                collections: wanted,
                                timeout_ms: self.timeout.as_millis() as u64,
                            });
                        }
                    }
                }
            }
            if waited {
                LockStats::record(&self.stats.waits, 1);
            }
        }

        LockStats::record(&self.stats.acquisitions, taken.len() as u64);
        debug!(txn_id = %txn_id, collections = ?wanted, "collections locked");
        Ok(wanted)
    }

    /// Releases the collection locks `txn_id` holds among `cols`.
    pub fn release_collections(&self, txn_id: TxnId, cols: &[ColId]) {
        let mut table = self.table.lock();
        let mut released = 0;
        for col in cols {
            if table.collections.get(col) == Some(&txn_id) {
                table.collections.remove(col);
                released += 1;
            }
        }
        drop(table);
        LockStats::record(&self.stats.releases, released);
        self.changed.notify_all();
    }

    // =========================================================================
    // Exclusive section
    // =========================================================================

    /// Waits until no transaction is inside the gate and takes it
    /// exclusively.
    pub fn enter_exclusive(&self) -> TesseraResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();
        table.exclusive_waiting += 1;
        while table.exclusive || table.transactions > 0 {
            if !self.wait(&mut table, deadline) {
                table.exclusive_waiting -= 1;
                drop(table);
                self.changed.notify_all();
                LockStats::record(&self.stats.timeouts, 1);
                warn!("exclusive lock timed out");
                return Err(TesseraError::LockTimeout {
                    collections: Vec::new(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }
        table.exclusive_waiting -= 1;
        table.exclusive = true;
        LockStats::record(&self.stats.exclusive, 1);
        Ok(())
    }

    /// Takes the gate exclusively only if that needs no waiting.
    pub fn try_enter_exclusive(&self) -> bool {
        let mut table = self.table.lock();
        if table.exclusive || table.transactions > 0 || table.exclusive_waiting > 0 {
            return false;
        }
        table.exclusive = true;
        LockStats::record(&self.stats.exclusive, 1);
        true
    }

    /// Leaves the exclusive section.
    pub fn exit_exclusive(&self) {
        self.table.lock().exclusive = false;
        self.changed.notify_all();
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("LockManager")
            .field("transactions", &table.transactions)
            .field("exclusive", &table.exclusive)
            .field("collections", &table.collections.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
