//! File I/O: pooled readers, the background writer, and the disk service.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 DiskService                   │
//! │   read_page ──► MemoryCache ──► StreamPool    │
//! │   write_*   ──► MemoryCache ──► DiskWriterQueue (thread)
//! └──────────────────────────────────────────────┘
//! ```

mod disk;
mod stream_pool;
mod writer;

pub use disk::DiskService;
pub use stream_pool::{PooledStream, StreamPool};
pub use writer::DiskWriterQueue;
