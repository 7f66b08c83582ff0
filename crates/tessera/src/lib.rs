//! # tessera
//!
//! An embedded, single-file document storage engine.
//!
//! Documents are stored as chains of data blocks on 8 KB slotted pages,
//! indexed by skip lists whose nodes live on index pages, and made durable
//! through an append-only log that a checkpoint merges back into the data
//! file.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Engine                             │
//! │                             │                                │
//! │                        Transaction                           │
//! │              ┌──────────────┼──────────────┐                 │
//! │              ▼              ▼              ▼                 │
//! │        DataService     IndexService   CancelHandle           │
//! │              └──────┬───────┘                                │
//! │                     ▼                                        │
//! │                  Snapshot ──── AllocationMapService          │
//! │                     │                                        │
//! │    ┌────────────────┼─────────────────┐                      │
//! │    ▼                ▼                 ▼                      │
//! │ WalIndex      DiskService        LockManager                 │
//! │ (tessera-wal) (tessera-storage)  (tessera-txn)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tessera::{Engine, EngineConfig};
//! use tessera_common::types::{ColId, IndexKey};
//!
//! # fn main() -> tessera::TesseraResult<()> {
//! let engine = Engine::open(EngineConfig::new("app.db"))?;
//! let col = ColId::new(1)?;
//!
//! let mut txn = engine.begin_transaction(&[col])?;
//! let mut pk = txn.create_index(col, "_id", 0, true)?;
//! let row = txn.data(col)?.insert(b"{\"_id\": 1}")?;
//! txn.index(col)?.add_node(&mut pk, IndexKey::Int(1), row, None)?;
//! txn.commit()?;
//!
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod context;
pub mod engine;
pub mod levels;
pub mod services;
mod snapshot;
pub mod transaction;

pub use engine::{Engine, EngineStats};
pub use levels::{FixedLevels, LevelGenerator, RandomLevels};
pub use services::{DataService, IndexDef, IndexScan, IndexService, Order};
pub use transaction::{CancelHandle, Transaction, TransactionMode, TransactionState};

pub use tessera_common::{EngineConfig, TesseraError, TesseraResult};
pub use tessera_wal::CheckpointInfo;
