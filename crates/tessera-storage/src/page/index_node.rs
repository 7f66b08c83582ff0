//! Index node record format.
//!
//! ```text
//! Offset         Size        Field
//! ------         ----        -----
//!   0              1         index slot
//!   1              1         levels
//!   2              2         reserved
//!   4              5         data block RowId
//!   9              5         next node RowId (next index node of the same document)
//!  14         levels*10      per level: next RowId (5) + prev RowId (5)
//!  14+levels*10    k         key (see IndexKey)
//! ```
//!
//! Nodes are decoded into an owned [`IndexNode`]; link updates patch the
//! segment bytes in place through the `set_*` helpers.

use tessera_common::constants::{
    INDEX_NODE_HEADER_SIZE, INDEX_NODE_LEVEL_SIZE, MAX_LEVEL_LENGTH, SEGMENT_ALIGNMENT,
};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{IndexKey, RowId};

const P_SLOT: usize = 0;
const P_LEVELS: usize = 1;
const P_DATA_BLOCK: usize = 4;
const P_NEXT_NODE: usize = 9;

#[inline]
const fn level_offset(level: usize) -> usize {
    INDEX_NODE_HEADER_SIZE + level * INDEX_NODE_LEVEL_SIZE
}

/// Decoded index node.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    /// Where the node lives.
    pub position: RowId,
    /// Index slot within the collection.
    pub slot: u8,
    /// Document this node points at. Empty for sentinels.
    pub data_block: RowId,
    /// Next node of the same document (in another index).
    pub next_node: RowId,
    /// Forward links, one per level.
    pub next: Vec<RowId>,
    /// Backward links, one per level.
    pub prev: Vec<RowId>,
    /// Indexed key.
    pub key: IndexKey,
}

impl IndexNode {
    /// Segment length of a node with `levels` levels holding `key`.
    #[must_use]
    pub fn segment_len(levels: u8, key: &IndexKey) -> usize {
        (level_offset(levels as usize) + key.encoded_len() + SEGMENT_ALIGNMENT - 1)
            / SEGMENT_ALIGNMENT
            * SEGMENT_ALIGNMENT
    }

    /// Creates an unlinked node.
    #[must_use]
    pub fn new(position: RowId, slot: u8, levels: u8, key: IndexKey, data_block: RowId) -> Self {
        Self {
            position,
            slot,
            data_block,
            next_node: RowId::EMPTY,
            next: vec![RowId::EMPTY; levels as usize],
            prev: vec![RowId::EMPTY; levels as usize],
            key,
        }
    }

    /// Number of levels.
    #[inline]
    #[must_use]
    pub fn levels(&self) -> u8 {
        self.next.len() as u8
    }

    /// Decodes the node stored in `segment`.
    pub fn read(position: RowId, segment: &[u8]) -> TesseraResult<Self> {
        if segment.len() < INDEX_NODE_HEADER_SIZE {
            return Err(TesseraError::corruption(format!(
                "index node {position} is truncated"
            )));
        }
        let levels = segment[P_LEVELS];
        if levels == 0 || levels > MAX_LEVEL_LENGTH || level_offset(levels as usize) > segment.len()
        {
            return Err(TesseraError::corruption(format!(
                "index node {position} has invalid level count {levels}"
            )));
        }
        let mut next = Vec::with_capacity(levels as usize);
        let mut prev = Vec::with_capacity(levels as usize);
        for level in 0..levels as usize {
            let offset = level_offset(level);
            next.push(RowId::read_from(&segment[offset..]));
            prev.push(RowId::read_from(&segment[offset + RowId::SIZE..]));
        }
        Ok(Self {
            position,
            slot: segment[P_SLOT],
            data_block: RowId::read_from(&segment[P_DATA_BLOCK..]),
            next_node: RowId::read_from(&segment[P_NEXT_NODE..]),
            next,
            prev,
            key: IndexKey::decode(&segment[level_offset(levels as usize)..])?,
        })
    }

    /// Encodes the whole node into `segment`.
    pub fn write(&self, segment: &mut [u8]) {
        debug_assert_eq!(segment.len(), Self::segment_len(self.levels(), &self.key));
        segment.fill(0);
        segment[P_SLOT] = self.slot;
        segment[P_LEVELS] = self.levels();
        self.data_block.write_to(&mut segment[P_DATA_BLOCK..]);
        self.next_node.write_to(&mut segment[P_NEXT_NODE..]);
        for level in 0..self.next.len() {
            let offset = level_offset(level);
            self.next[level].write_to(&mut segment[offset..]);
            self.prev[level].write_to(&mut segment[offset + RowId::SIZE..]);
        }
        let key_offset = level_offset(self.next.len());
        let key_len = self.key.encoded_len();
        self.key
            .encode_into(&mut segment[key_offset..key_offset + key_len]);
    }

    /// Patches the forward link of `level` in an encoded node.
    #[inline]
    pub fn set_next(segment: &mut [u8], level: usize, row: RowId) {
        row.write_to(&mut segment[level_offset(level)..]);
    }

    /// Patches the backward link of `level` in an encoded node.
    #[inline]
    pub fn set_prev(segment: &mut [u8], level: usize, row: RowId) {
        row.write_to(&mut segment[level_offset(level) + RowId::SIZE..]);
    }

    /// Patches the next-node link in an encoded node.
    #[inline]
    pub fn set_next_node(segment: &mut [u8], row: RowId) {
        row.write_to(&mut segment[P_NEXT_NODE..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::types::PageId;

    fn row(p: u32, i: u8) -> RowId {
        RowId::new(PageId::new(p), i)
    }

    #[test]
    fn test_segment_len() {
        assert_eq!(IndexNode::segment_len(1, &IndexKey::Int(1)), 40);
        assert_eq!(IndexNode::segment_len(32, &IndexKey::MinValue), 336);
    }

    #[test]
    fn test_write_read_and_patch() {
        let mut node = IndexNode::new(row(5, 1), 2, 3, IndexKey::from("key"), row(9, 0));
        node.next[0] = row(5, 2);
        node.prev[2] = row(5, 0);
        let mut seg = vec![0u8; IndexNode::segment_len(3, &node.key)];
        node.write(&mut seg);

        let decoded = IndexNode::read(row(5, 1), &seg).unwrap();
        assert_eq!(decoded, node);

        IndexNode::set_next(&mut seg, 1, row(7, 7));
        IndexNode::set_prev(&mut seg, 0, row(6, 6));
        IndexNode::set_next_node(&mut seg, row(8, 8));
        let patched = IndexNode::read(row(5, 1), &seg).unwrap();
        assert_eq!(patched.next[1], row(7, 7));
        assert_eq!(patched.prev[0], row(6, 6));
        assert_eq!(patched.next_node, row(8, 8));
        assert_eq!(patched.key, IndexKey::from("key"));
    }

    #[test]
    fn test_invalid_levels() {
        let seg = vec![0u8; 40];
        assert!(IndexNode::read(row(1, 0), &seg).unwrap_err().is_corruption());
    }
}
