//! Core types shared across tessera.

mod ids;
mod key;

pub use ids::{ColId, FileOrigin, PageId, RowId, TxnId};
pub use key::{Collation, IndexKey};
