//! Buffer management: the memory cache and its page handles.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       MemoryCache                          │
//! │  readable: HashMap<(origin, position), Arc<CachedPage>>    │
//! │  free:     Vec<BytesMut>  (page-sized slices of segments)  │
//! └───────────────────────────────────────────────────────────┘
//!        │ get_readable_page            │ get_writable_page / new_page
//!        ▼                              ▼
//!   SharedPage (&[u8], counted)     WritablePage (&mut [u8], exclusive)
//!        ▲                              │
//!        └──────── mark_as_read_only ───┘
//! ```

mod cache;
mod config;
mod page;

pub use cache::{CacheStats, MemoryCache};
pub use config::CacheConfig;
pub use page::{SharedPage, WritablePage};
