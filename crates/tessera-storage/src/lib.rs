//! # tessera-storage
//!
//! Page-level storage for the tessera engine:
//!
//! - **page**: page header, slotted segment allocator, allocation map
//!   pages, and the data block / index node record formats
//! - **buffer**: the memory cache with shared (read-only) and writable
//!   (exclusive) page handles
//! - **file**: pooled file readers, the background disk writer, and the
//!   disk service tying them to the cache

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod file;
pub mod page;

pub use buffer::{CacheConfig, MemoryCache, SharedPage, WritablePage};
pub use file::DiskService;
