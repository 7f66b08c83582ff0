//! Page checksum utilities.

/// Offset of the checksum field in the page header.
pub const CHECKSUM_OFFSET: usize = 24;

/// Computes the CRC32 of a page, skipping the 4-byte checksum field.
///
/// # Example
///
/// ```rust
/// use tessera_storage::page::{compute_page_checksum, CHECKSUM_OFFSET};
///
/// let mut page = vec![0u8; 8192];
/// let before = compute_page_checksum(&page, CHECKSUM_OFFSET);
/// page[CHECKSUM_OFFSET] = 0xFF;
/// assert_eq!(compute_page_checksum(&page, CHECKSUM_OFFSET), before);
/// ```
pub fn compute_page_checksum(page_data: &[u8], checksum_offset: usize) -> u32 {
    debug_assert!(checksum_offset + 4 <= page_data.len());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_data[..checksum_offset]);
    hasher.update(&page_data[checksum_offset + 4..]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_detects_changes() {
        let mut page = vec![0u8; 8192];
        let base = compute_page_checksum(&page, CHECKSUM_OFFSET);
        page[100] = 1;
        assert_ne!(compute_page_checksum(&page, CHECKSUM_OFFSET), base);
    }
}
