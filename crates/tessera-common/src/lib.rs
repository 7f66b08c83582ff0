//! # tessera-common
//!
//! Common types, errors, and configuration for the tessera storage engine.
//!
//! This crate provides the foundational types shared by every tessera
//! component:
//!
//! - **Types**: identifiers (`PageId`, `RowId`, `ColId`, `TxnId`), the
//!   ordered index key value (`IndexKey`) and its `Collation`
//! - **Errors**: unified error handling with `TesseraError`
//! - **Config**: engine configuration loaded from code or TOML
//! - **Constants**: on-disk layout constants and limits
//!
//! ## Example
//!
//! ```rust
//! use tessera_common::types::{ColId, PageId, RowId};
//! use tessera_common::error::TesseraResult;
//!
//! fn example() -> TesseraResult<()> {
//!     let col = ColId::new(1)?;
//!     let row = RowId::new(PageId::new(42), 3);
//!     assert!(!row.is_empty());
//!     assert_eq!(col.as_u8(), 1);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use constants::*;
pub use error::{ErrorCode, TesseraError, TesseraResult};
pub use types::{ColId, Collation, FileOrigin, IndexKey, PageId, RowId, TxnId};
