//! Data block record format.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       1   format (0 = BSON)
//!   1       1   extend (1 on continuation blocks)
//!   2       1   padding (bytes appended after content)
//!   3       5   next block RowId (EMPTY at chain end)
//!   8       n   content
//! ```
//!
//! Segment length is always `8 + n + padding`, a multiple of 8.

use tessera_common::constants::{DATA_BLOCK_HEADER_SIZE, SEGMENT_ALIGNMENT};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::RowId;

/// Format tag for BSON content.
pub const DATA_FORMAT_BSON: u8 = 0;

const P_FORMAT: usize = 0;
const P_EXTEND: usize = 1;
const P_PADDING: usize = 2;
const P_NEXT_BLOCK: usize = 3;

/// Segment length needed for `content_len` bytes of content.
#[inline]
#[must_use]
pub const fn data_block_len(content_len: usize) -> usize {
    (DATA_BLOCK_HEADER_SIZE + content_len + SEGMENT_ALIGNMENT - 1) / SEGMENT_ALIGNMENT
        * SEGMENT_ALIGNMENT
}

/// Typed view over a data block segment.
#[derive(Debug)]
pub struct DataBlock<B> {
    data: B,
}

impl<B: AsRef<[u8]>> DataBlock<B> {
    /// Wraps a segment, checking that its header is plausible.
    pub fn new(data: B) -> TesseraResult<Self> {
        let bytes = data.as_ref();
        if bytes.len() < DATA_BLOCK_HEADER_SIZE
            || bytes[P_PADDING] as usize > bytes.len() - DATA_BLOCK_HEADER_SIZE
        {
            return Err(TesseraError::corruption(format!(
                "malformed data block of {} bytes",
                bytes.len()
            )));
        }
        Ok(Self { data })
    }

    /// Content format tag.
    #[inline]
    pub fn format(&self) -> u8 {
        self.data.as_ref()[P_FORMAT]
    }

    /// True on continuation blocks.
    #[inline]
    pub fn is_extend(&self) -> bool {
        self.data.as_ref()[P_EXTEND] != 0
    }

    /// Next block in the chain.
    #[inline]
    pub fn next_block(&self) -> RowId {
        RowId::read_from(&self.data.as_ref()[P_NEXT_BLOCK..])
    }

    /// Content bytes, without padding.
    #[inline]
    pub fn content(&self) -> &[u8] {
        let bytes = self.data.as_ref();
        let end = bytes.len() - bytes[P_PADDING] as usize;
        &bytes[DATA_BLOCK_HEADER_SIZE..end]
    }

    /// Largest content this segment can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.as_ref().len() - DATA_BLOCK_HEADER_SIZE
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataBlock<B> {
    /// Writes a complete block into `segment`, which must be exactly
    /// `data_block_len(content.len())` bytes.
    pub fn write(mut segment: B, extend: bool, next_block: RowId, content: &[u8]) -> Self {
        let bytes = segment.as_mut();
        debug_assert_eq!(bytes.len(), data_block_len(content.len()));
        let padding = bytes.len() - DATA_BLOCK_HEADER_SIZE - content.len();
        bytes[P_FORMAT] = DATA_FORMAT_BSON;
        bytes[P_EXTEND] = u8::from(extend);
        bytes[P_PADDING] = padding as u8;
        next_block.write_to(&mut bytes[P_NEXT_BLOCK..]);
        bytes[DATA_BLOCK_HEADER_SIZE..DATA_BLOCK_HEADER_SIZE + content.len()]
            .copy_from_slice(content);
        bytes[DATA_BLOCK_HEADER_SIZE + content.len()..].fill(0);
        Self { data: segment }
    }

    /// Re-points the chain.
    #[inline]
    pub fn set_next_block(&mut self, next: RowId) {
        next.write_to(&mut self.data.as_mut()[P_NEXT_BLOCK..]);
    }
}
