//! # tessera-wal
//!
//! The write-ahead log of tessera is a file of whole page images. Every
//! committed page version is appended to it; the data file is only written
//! by checkpoints.
//!
//! ```text
//!  log file
//! +--------+--------+--------+--------+--------+--------+
//! | p7 t1  | p9 t1  | p7 t2  | p3 t1* | p9 t2* | p4 t3  |   * = CONFIRMED
//! +--------+--------+--------+--------+--------+--------+
//!     0        1        2        3        4        5
//! ```
//!
//! - [`WalIndex`] maps each page id to the log positions of its committed
//!   versions, tagged with the read version that made them visible.
//! - [`WalIndex::restore`] rebuilds the index from the log on open,
//!   keeping only transactions whose last page carries the confirmed flag.
//! - [`CheckpointManager`] copies the newest confirmed version of every
//!   logged page back into the data file and empties the log.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod checkpoint;
mod index;

pub use checkpoint::{CheckpointInfo, CheckpointManager, CheckpointState};
pub use index::{LogPage, WalIndex};
