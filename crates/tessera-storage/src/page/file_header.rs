//! File header page (page 0).
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0      32   page header (type = Header)
//!  32       8   magic "TESSERA\0"
//!  40       1   file version
//!  48       8   creation time (unix seconds)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use tessera_common::constants::{FILE_MAGIC, FILE_VERSION, PAGE_SIZE};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::PageId;

use super::header::PageHeader;
use super::types::PageType;

const P_MAGIC: usize = 32;
const P_VERSION: usize = 40;
const P_CREATED: usize = 48;

/// Formats `buf` as a fresh file header page.
pub fn initialize_file_header(buf: &mut [u8]) {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    buf.fill(0);
    let mut header = PageHeader::new(&mut buf[..]);
    header.initialize(PageId::HEADER, PageType::Header);
    buf[P_MAGIC..P_MAGIC + FILE_MAGIC.len()].copy_from_slice(FILE_MAGIC);
    buf[P_VERSION] = FILE_VERSION;
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    buf[P_CREATED..P_CREATED + 8].copy_from_slice(&created.to_le_bytes());
    PageHeader::new(&mut buf[..]).update_checksum();
}

/// Checks magic and version of a header page.
pub fn validate_file_header(buf: &[u8]) -> TesseraResult<()> {
    let header = PageHeader::new(buf);
    if header.page_type() != PageType::Header || &buf[P_MAGIC..P_MAGIC + FILE_MAGIC.len()] != FILE_MAGIC {
        return Err(TesseraError::corruption("file is not a tessera data file"));
    }
    if buf[P_VERSION] != FILE_VERSION {
        return Err(TesseraError::corruption(format!(
            "unsupported file version {}",
            buf[P_VERSION]
        )));
    }
    Ok(())
}

/// Creation time recorded in a header page.
#[must_use]
pub fn file_creation_time(buf: &[u8]) -> u64 {
    u64::from_le_bytes(buf[P_CREATED..P_CREATED + 8].try_into().unwrap())
}
