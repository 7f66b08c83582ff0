//! # tessera-txn
//!
//! Lock management for tessera transactions.
//!
//! Every transaction passes a shared gate and then locks the collections it
//! writes to. Collection locks are exclusive per collection and always
//! taken in ascending id order, so two writers can never wait on each other
//! in a cycle. A checkpoint takes the gate exclusively and therefore runs
//! alone.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 LockManager                  │
//! │                                              │
//! │   gate:  shared (transactions) │ exclusive   │
//! │            │                     (checkpoint)│
//! │            ▼                                 │
//! │   collections:  1 ─ 2 ─ 3 ─ ... ─ 250 ─ 255  │
//! │                 (ascending acquisition)      │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;

pub use lock::{LockManager, LockStats};
