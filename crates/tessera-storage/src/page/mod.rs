//! Page layout and record formats.
//!
//! Every page is 8 KB and starts with a 32-byte header. Data and index
//! pages are slotted: variable-length segments addressed by a one-byte slot
//! index through a directory at the end of the page.
//!
//! # Page Format
//!
//! ```text
//! +------------------+
//! |   Page Header    |  32 bytes
//! +------------------+
//! |   Segments       |  grow upward
//! |        ↓         |
//! +------------------+
//! |   Free Space     |
//! +------------------+
//! |        ↑         |
//! |   Slot Directory |  grows downward (4 bytes per slot)
//! +------------------+
//! ```
//!
//! Data blocks and index nodes are record formats written into segments.
//! Allocation map and file header pages use the content area directly.

mod allocation_map;
mod checksum;
mod data_block;
mod file_header;
mod header;
mod index_node;
mod slotted;
mod types;

pub use allocation_map::{map_page_id, AllocationMapPage, ExtendLocation, FreeExtend};
pub use checksum::{compute_page_checksum, CHECKSUM_OFFSET};
pub use data_block::{data_block_len, DataBlock, DATA_FORMAT_BSON};
pub use file_header::{file_creation_time, initialize_file_header, validate_file_header};
pub use header::PageHeader;
pub use index_node::IndexNode;
pub use slotted::{Segment, SlottedPage};
pub use types::{extend_page_value, PageFlags, PageSpace, PageType};
