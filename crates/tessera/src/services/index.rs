//! Skip-list indexes over index pages.
//!
//! Every index owns two sentinel nodes at the maximum height. Each level is
//! a doubly linked list from head to tail in collation order; level 0
//! holds every key. Equal keys keep insertion order.
//!
//! ```text
//! level 2  HEAD ─────────────────────────► 40 ─────────────────► TAIL
//! level 1  HEAD ─────────► 17 ───────────► 40 ───► 52 ─────────► TAIL
//! level 0  HEAD ──► 3 ───► 17 ──► 17 ──► 40 ───► 52 ──► 99 ──► TAIL
//! ```
//!
//! The nodes of one document are also chained through `next_node`,
//! starting at its primary key node, so all of them can be removed
//! together.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use tessera_common::constants::{MAX_INDEXES_PER_COLLECTION, MAX_LEVEL_LENGTH};
use tessera_common::error::{TesseraError, TesseraResult};
use tessera_common::types::{ColId, Collation, IndexKey, RowId};
use tessera_storage::page::{IndexNode, PageType, SlottedPage};

use super::{segment, segment_mut};
use crate::snapshot::Snapshot;

/// Direction of a search or scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Smallest key first.
    Ascending,
    /// Largest key first.
    Descending,
}

/// Where an index lives. Index definitions belong to the collection
/// catalog, which callers keep; the engine only needs this much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name, used in error messages.
    pub name: String,
    /// Owning collection.
    pub col_id: ColId,
    /// Slot number of the index in its collection (0 = primary key).
    pub slot: u8,
    /// Reject equal keys.
    pub unique: bool,
    /// Head sentinel.
    pub head: RowId,
    /// Tail sentinel.
    pub tail: RowId,
    /// Highest level any node has reached.
    pub max_level: u8,
}

/// Skip-list operations for the indexes of one collection.
pub struct IndexService<'a> {
    snapshot: &'a mut Snapshot,
    collation: Collation,
    visits: Cell<usize>,
}

impl<'a> IndexService<'a> {
    pub(crate) fn new(snapshot: &'a mut Snapshot) -> Self {
        let collation = snapshot.ctx().config.collation;
        Self {
            snapshot,
            collation,
            visits: Cell::new(0),
        }
    }

    /// Nodes read since creation or the last [`reset_visits`](Self::reset_visits).
    pub fn nodes_visited(&self) -> usize {
        self.visits.get()
    }

    /// Resets the node read counter.
    pub fn reset_visits(&self) {
        self.visits.set(0);
    }

    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        self.collation.compare(a, b)
    }

    // =========================================================================
    // Node access
    // =========================================================================

    /// Reads one index node.
    pub fn get_node(&self, row: RowId) -> TesseraResult<IndexNode> {
        self.visits.set(self.visits.get() + 1);
        let page = self.snapshot.page(row.page_id)?;
        IndexNode::read(row, segment(&page, row, PageType::Index)?)
    }

    fn patch<F>(&mut self, row: RowId, apply: F) -> TesseraResult<()>
    where
        F: FnOnce(&mut [u8]),
    {
        let page = self.snapshot.page_mut(row.page_id)?;
        apply(segment_mut(&mut page[..], row, PageType::Index)?);
        Ok(())
    }

    fn write_node(&mut self, node: &IndexNode) -> TesseraResult<()> {
        self.patch(node.position, |seg| node.write(seg))
    }

    fn allocate_node(&mut self, levels: u8, key: &IndexKey) -> TesseraResult<RowId> {
        let length = IndexNode::segment_len(levels, key);
        let page_id = self.snapshot.get_free_page(PageType::Index)?;
        let page = self.snapshot.page_mut(page_id)?;
        let index = SlottedPage::new(&mut page[..]).insert(length)?;
        self.snapshot.page_changed(page_id)?;
        Ok(RowId::new(page_id, index))
    }

    fn free_node(&mut self, row: RowId) -> TesseraResult<()> {
        let page = self.snapshot.page_mut(row.page_id)?;
        segment(&page[..], row, PageType::Index)?;
        SlottedPage::new(&mut page[..]).delete(row.index)?;
        self.snapshot.page_changed(row.page_id)
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Allocates the head and tail sentinels of a new index, linked to each
    /// other on every level.
    pub fn create_index(
        &mut self,
        name: impl Into<String>,
        slot: u8,
        unique: bool,
    ) -> TesseraResult<IndexDef> {
        let name = name.into();
        let result = self.create_head_tail(name, slot, unique);
        self.snapshot.observe(result)
    }

    fn create_head_tail(&mut self, name: String, slot: u8, unique: bool) -> TesseraResult<IndexDef> {
        if slot >= MAX_INDEXES_PER_COLLECTION {
            return Err(TesseraError::invalid_argument(format!(
                "index slot {slot} exceeds the limit of {MAX_INDEXES_PER_COLLECTION} indexes"
            )));
        }
        let head_row = self.allocate_node(MAX_LEVEL_LENGTH, &IndexKey::MinValue)?;
        let tail_row = self.allocate_node(MAX_LEVEL_LENGTH, &IndexKey::MaxValue)?;

        let mut head = IndexNode::new(head_row, slot, MAX_LEVEL_LENGTH, IndexKey::MinValue, RowId::EMPTY);
        head.next.fill(tail_row);
        let mut tail = IndexNode::new(tail_row, slot, MAX_LEVEL_LENGTH, IndexKey::MaxValue, RowId::EMPTY);
        tail.prev.fill(head_row);
        self.write_node(&head)?;
        self.write_node(&tail)?;

        debug!(index = %name, slot, head = %head_row, tail = %tail_row, "index created");
        Ok(IndexDef {
            name,
            col_id: self.snapshot.col_id(),
            slot,
            unique,
            head: head_row,
            tail: tail_row,
            max_level: 1,
        })
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts `key` pointing at `data_block`.
    ///
    /// `last` is the previous node of the same document (its primary key
    /// node or the node added just before); the new node is chained after
    /// it through `next_node`.
    pub fn add_node(
        &mut self,
        index: &mut IndexDef,
        key: IndexKey,
        data_block: RowId,
        last: Option<RowId>,
    ) -> TesseraResult<IndexNode> {
        self.add_node_after(index, key, data_block, last, None)
    }

    /// Like [`add_node`](Self::add_node), starting the search from `hint`, a
    /// node of the same index whose key is not greater than `key`. Bulk
    /// loads of ascending keys pass the node inserted just before.
    pub fn add_node_after(
        &mut self,
        index: &mut IndexDef,
        key: IndexKey,
        data_block: RowId,
        last: Option<RowId>,
        hint: Option<RowId>,
    ) -> TesseraResult<IndexNode> {
        let result = self.insert(index, key, data_block, last, hint);
        self.snapshot.observe(result)
    }

    fn insert(
        &mut self,
        index: &mut IndexDef,
        key: IndexKey,
        data_block: RowId,
        last: Option<RowId>,
        hint: Option<RowId>,
    ) -> TesseraResult<IndexNode> {
        self.snapshot.check_cancelled()?;
        key.validate()?;
        if matches!(key, IndexKey::MinValue | IndexKey::MaxValue) {
            return Err(TesseraError::invalid_argument(
                "MinValue and MaxValue are reserved for index sentinels",
            ));
        }

        let levels = self.snapshot.ctx().next_level();
        let top = index.max_level.max(levels).min(MAX_LEVEL_LENGTH) as usize;

        let hint = match hint {
            Some(row) => {
                let node = self.get_node(row)?;
                (node.slot == index.slot && self.compare(&node.key, &key) != Ordering::Greater)
                    .then_some(node)
            }
            None => None,
        };

        // (predecessor, its successor) per level of the new node
        let mut links = vec![(RowId::EMPTY, RowId::EMPTY); levels as usize];
        let mut cur = self.get_node(index.head)?;
        for level in (0..top).rev() {
            if let Some(h) = &hint {
                if level < h.levels() as usize && self.compare(&h.key, &cur.key) == Ordering::Greater {
                    cur = h.clone();
                }
            }
            loop {
                let next_row = cur.next[level];
                if next_row == index.tail {
                    break;
                }
                let next = self.get_node(next_row)?;
                if self.compare(&next.key, &key) == Ordering::Greater {
                    break;
                }
                cur = next;
            }
            if level < levels as usize {
                links[level] = (cur.position, cur.next[level]);
            }
        }

        if index.unique
            && cur.position != index.head
            && self.compare(&cur.key, &key) == Ordering::Equal
        {
            return Err(TesseraError::IndexDuplicateKey {
                index: index.name.clone(),
                key: key.to_string(),
            });
        }

        let position = self.allocate_node(levels, &key)?;
        let mut node = IndexNode::new(position, index.slot, levels, key, data_block);
        for (level, &(prev, next)) in links.iter().enumerate() {
            node.prev[level] = prev;
            node.next[level] = next;
        }
        if let Some(last) = last {
            node.next_node = self.get_node(last)?.next_node;
        }
        self.write_node(&node)?;

        for (level, &(prev, next)) in links.iter().enumerate() {
            self.patch(prev, |seg| IndexNode::set_next(seg, level, position))?;
            self.patch(next, |seg| IndexNode::set_prev(seg, level, position))?;
        }
        if let Some(last) = last {
            self.patch(last, |seg| IndexNode::set_next_node(seg, position))?;
        }
        if levels > index.max_level {
            index.max_level = levels;
        }
        Ok(node)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Finds `key`.
    ///
    /// Ascending returns the first equal node, descending the last. With
    /// `sibling` set and no equal key, the nearest node in the search
    /// direction (first greater, or last smaller) is returned instead.
    /// Sentinels are never returned.
    pub fn find(
        &self,
        index: &IndexDef,
        key: &IndexKey,
        sibling: bool,
        order: Order,
    ) -> TesseraResult<Option<IndexNode>> {
        let result = self.descend(index, key, order);
        let found = self.snapshot.observe(result)?;
        Ok(found.filter(|node| sibling || self.compare(&node.key, key) == Ordering::Equal))
    }

    fn descend(&self, index: &IndexDef, key: &IndexKey, order: Order) -> TesseraResult<Option<IndexNode>> {
        let (start, end, overshoot) = match order {
            Order::Ascending => (index.head, index.tail, Ordering::Less),
            Order::Descending => (index.tail, index.head, Ordering::Greater),
        };
        let top = index.max_level.clamp(1, MAX_LEVEL_LENGTH) as usize;
        let mut cur = self.get_node(start)?;
        let mut candidate = None;
        for level in (0..top).rev() {
            loop {
                let next_row = match order {
                    Order::Ascending => cur.next[level],
                    Order::Descending => cur.prev[level],
                };
                if next_row == end {
                    break;
                }
                let next = self.get_node(next_row)?;
                if self.compare(&next.key, key) == overshoot {
                    cur = next;
                } else {
                    if level == 0 {
                        candidate = Some(next);
                    }
                    break;
                }
            }
        }
        Ok(candidate)
    }

    /// Every node equal to `key`, in insertion order.
    pub fn find_all(&self, index: &IndexDef, key: &IndexKey) -> TesseraResult<Vec<IndexNode>> {
        let mut nodes = Vec::new();
        let Some(mut node) = self.find(index, key, false, Order::Ascending)? else {
            return Ok(nodes);
        };
        loop {
            let next = node.next[0];
            nodes.push(node);
            if next == index.tail {
                break;
            }
            node = self.get_node(next)?;
            if self.compare(&node.key, key) != Ordering::Equal {
                break;
            }
        }
        Ok(nodes)
    }

    /// Walks level 0 between the sentinels.
    pub fn scan(&self, index: &IndexDef, order: Order) -> TesseraResult<IndexScan<'_, 'a>> {
        let (first, end) = match order {
            Order::Ascending => (self.get_node(index.head)?.next[0], index.tail),
            Order::Descending => (self.get_node(index.tail)?.prev[0], index.head),
        };
        Ok(IndexScan {
            service: self,
            current: first,
            end,
            order,
        })
    }

    // =========================================================================
    // Delete
    // =========================================================================

    fn unlink(&mut self, node: &IndexNode) -> TesseraResult<()> {
        for level in 0..node.levels() as usize {
            let (prev, next) = (node.prev[level], node.next[level]);
            self.patch(prev, |seg| IndexNode::set_next(seg, level, next))?;
            self.patch(next, |seg| IndexNode::set_prev(seg, level, prev))?;
        }
        self.free_node(node.position)
    }

    /// Removes every node of a document, following `next_node` from its
    /// primary key node. Returns how many nodes were removed.
    pub fn delete_all(&mut self, pk_node: RowId) -> TesseraResult<usize> {
        let result = self.delete_chain(pk_node);
        self.snapshot.observe(result)
    }

    fn delete_chain(&mut self, pk_node: RowId) -> TesseraResult<usize> {
        let mut current = pk_node;
        let mut removed = 0;
        while !current.is_empty() {
            self.snapshot.check_cancelled()?;
            let node = self.get_node(current)?;
            self.unlink(&node)?;
            current = node.next_node;
            removed += 1;
        }
        Ok(removed)
    }

    /// Removes the nodes of `index` from every document reachable from the
    /// primary key, then frees its sentinels. Returns the number of nodes
    /// removed.
    pub fn drop_index(&mut self, pk: &IndexDef, index: &IndexDef) -> TesseraResult<usize> {
        let result = self.drop_nodes(pk, index);
        self.snapshot.observe(result)
    }

    fn drop_nodes(&mut self, pk: &IndexDef, index: &IndexDef) -> TesseraResult<usize> {
        if index.slot == pk.slot {
            return Err(TesseraError::invalid_argument(format!(
                "index '{}' is the primary key and cannot be dropped",
                index.name
            )));
        }
        let mut removed = 0;
        let mut pk_row = self.get_node(pk.head)?.next[0];
        while pk_row != pk.tail {
            self.snapshot.check_cancelled()?;
            let pk_node = self.get_node(pk_row)?;
            let mut prev = pk_row;
            let mut current = pk_node.next_node;
            while !current.is_empty() {
                let node = self.get_node(current)?;
                if node.slot == index.slot {
                    self.unlink(&node)?;
                    let after = node.next_node;
                    self.patch(prev, |seg| IndexNode::set_next_node(seg, after))?;
                    removed += 1;
                } else {
                    prev = current;
                }
                current = node.next_node;
            }
            pk_row = pk_node.next[0];
        }
        self.free_node(index.head)?;
        self.free_node(index.tail)?;
        debug!(index = %index.name, removed, "index dropped");
        Ok(removed)
    }

    // =========================================================================
    // Integrity
    // =========================================================================

    /// Checks ordering and link symmetry on every level and returns the
    /// number of keys.
    pub fn check_integrity(&self, index: &IndexDef) -> TesseraResult<usize> {
        let corrupt = |msg: String| TesseraError::corruption(format!("index '{}': {msg}", index.name));
        let head = self.get_node(index.head)?;
        let tail = self.get_node(index.tail)?;
        if head.levels() != MAX_LEVEL_LENGTH || tail.levels() != MAX_LEVEL_LENGTH {
            return Err(corrupt("sentinels are not full height".into()));
        }

        let mut seen = HashSet::new();
        let mut count = 0;
        let mut cur = head;
        loop {
            for level in 0..cur.levels() as usize {
                let next_row = cur.next[level];
                let next = if next_row == index.tail {
                    tail.clone()
                } else {
                    self.get_node(next_row)?
                };
                if next.prev[level] != cur.position {
                    return Err(corrupt(format!(
                        "{}.next[{level}] = {next_row} but its prev is {}",
                        cur.position, next.prev[level]
                    )));
                }
                if next.slot != index.slot {
                    return Err(corrupt(format!("{next_row} belongs to slot {}", next.slot)));
                }
                if self.compare(&cur.key, &next.key) == Ordering::Greater {
                    return Err(corrupt(format!(
                        "key {} is followed by {} on level {level}",
                        cur.key, next.key
                    )));
                }
            }
            let next_row = cur.next[0];
            if next_row == index.tail {
                break;
            }
            if !seen.insert(next_row) {
                return Err(corrupt(format!("level 0 loops at {next_row}")));
            }
            cur = self.get_node(next_row)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Level-0 walk returned by [`IndexService::scan`].
pub struct IndexScan<'s, 'a> {
    service: &'s IndexService<'a>,
    current: RowId,
    end: RowId,
    order: Order,
}

impl Iterator for IndexScan<'_, '_> {
    type Item = TesseraResult<IndexNode>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.end || self.current.is_empty() {
            return None;
        }
        match self.service.get_node(self.current) {
            Ok(node) => {
                self.current = match self.order {
                    Order::Ascending => node.next[0],
                    Order::Descending => node.prev[0],
                };
                Some(Ok(node))
            }
            Err(err) => {
                self.current = RowId::EMPTY;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::levels::FixedLevels;
    use tessera_common::config::EngineConfig;

    fn open() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(EngineConfig::for_testing(dir.path().join("index.db"))).unwrap();
        (dir, engine)
    }

    fn col() -> ColId {
        ColId::new(2).unwrap()
    }

    fn keys(service: &IndexService<'_>, index: &IndexDef, order: Order) -> Vec<IndexKey> {
        service
            .scan(index, order)
            .unwrap()
            .map(|n| n.unwrap().key)
            .collect()
    }

    #[test]
    fn test_head_tail_linked() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let def = idx.create_index("_id", 0, true).unwrap();
        let head = idx.get_node(def.head).unwrap();
        let tail = idx.get_node(def.tail).unwrap();
        assert!(head.next.iter().all(|&r| r == def.tail));
        assert!(tail.prev.iter().all(|&r| r == def.head));
        assert_eq!(idx.check_integrity(&def).unwrap(), 0);
        assert!(idx.find(&def, &IndexKey::Int(1), true, Order::Ascending).unwrap().is_none());
    }

    #[test]
    fn test_ordered_with_stable_duplicates() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut def = idx.create_index("age", 1, false).unwrap();

        let mut rows = Vec::new();
        for (i, k) in [30i64, 10, 20, 10, 40, 10].iter().enumerate() {
            let data = RowId::new(tessera_common::types::PageId::new(100), i as u8);
            idx.add_node(&mut def, IndexKey::Int(*k), data, None).unwrap();
            rows.push(data);
        }
        assert_eq!(
            keys(&idx, &def, Order::Ascending),
            [10, 10, 10, 20, 30, 40].map(IndexKey::Int).to_vec()
        );
        assert_eq!(
            keys(&idx, &def, Order::Descending),
            [40, 30, 20, 10, 10, 10].map(IndexKey::Int).to_vec()
        );

        let tens = idx.find_all(&def, &IndexKey::Int(10)).unwrap();
        let blocks: Vec<RowId> = tens.iter().map(|n| n.data_block).collect();
        assert_eq!(blocks, vec![rows[1], rows[3], rows[5]]);
        assert_eq!(idx.check_integrity(&def).unwrap(), 6);
    }

    #[test]
    fn test_find_sibling_and_order() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut def = idx.create_index("n", 1, false).unwrap();
        for k in [10i64, 20, 30] {
            idx.add_node(&mut def, IndexKey::Int(k), RowId::EMPTY, None).unwrap();
        }
        let key = IndexKey::Int(25);
        assert!(idx.find(&def, &key, false, Order::Ascending).unwrap().is_none());
        let up = idx.find(&def, &key, true, Order::Ascending).unwrap().unwrap();
        assert_eq!(up.key, IndexKey::Int(30));
        let down = idx.find(&def, &key, true, Order::Descending).unwrap().unwrap();
        assert_eq!(down.key, IndexKey::Int(20));
        assert!(idx
            .find(&def, &IndexKey::Int(99), true, Order::Ascending)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unique_rejects_duplicate_without_mutation() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut def = idx.create_index("_id", 0, true).unwrap();
        idx.add_node(&mut def, IndexKey::from("a"), RowId::EMPTY, None).unwrap();
        let err = idx
            .add_node(&mut def, IndexKey::from("a"), RowId::EMPTY, None)
            .unwrap_err();
        assert!(matches!(err, TesseraError::IndexDuplicateKey { .. }));
        assert_eq!(idx.check_integrity(&def).unwrap(), 1);
    }

    #[test]
    fn test_delete_all_follows_document_chain() {
        let (_dir, engine) = open();
        engine.set_level_generator(Box::new(FixedLevels(3)));
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut pk = idx.create_index("_id", 0, true).unwrap();
        let mut name = idx.create_index("name", 1, false).unwrap();

        let mut pk_rows = Vec::new();
        for (id, n) in [(1i64, "x"), (2, "y"), (3, "z")] {
            let pk_node = idx.add_node(&mut pk, IndexKey::Int(id), RowId::EMPTY, None).unwrap();
            idx.add_node(&mut name, IndexKey::from(n), RowId::EMPTY, Some(pk_node.position))
                .unwrap();
            pk_rows.push(pk_node.position);
        }

        assert_eq!(idx.delete_all(pk_rows[1]).unwrap(), 2);
        assert_eq!(idx.check_integrity(&pk).unwrap(), 2);
        assert_eq!(idx.check_integrity(&name).unwrap(), 2);
        assert_eq!(
            keys(&idx, &name, Order::Ascending),
            vec![IndexKey::from("x"), IndexKey::from("z")]
        );
        assert!(idx.delete_all(pk_rows[1]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_drop_index_keeps_primary_key() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut pk = idx.create_index("_id", 0, true).unwrap();
        let mut a = idx.create_index("a", 1, false).unwrap();
        let mut b = idx.create_index("b", 2, false).unwrap();
        for id in 0..50i64 {
            let node = idx.add_node(&mut pk, IndexKey::Int(id), RowId::EMPTY, None).unwrap();
            let a_node = idx
                .add_node(&mut a, IndexKey::Int(id % 7), RowId::EMPTY, Some(node.position))
                .unwrap();
            idx.add_node(&mut b, IndexKey::Int(-id), RowId::EMPTY, Some(a_node.position))
                .unwrap();
        }
        assert_eq!(idx.drop_index(&pk, &a).unwrap(), 50);
        assert_eq!(idx.check_integrity(&pk).unwrap(), 50);
        assert_eq!(idx.check_integrity(&b).unwrap(), 50);
        assert!(idx.get_node(a.head).unwrap_err().is_corruption());

        let first = idx.find(&pk, &IndexKey::Int(0), false, Order::Ascending).unwrap().unwrap();
        let chained = idx.get_node(first.next_node).unwrap();
        assert_eq!(chained.slot, 2);
        assert!(idx.drop_index(&pk, &pk).is_err());
    }

    #[test]
    fn test_hinted_ascending_load() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut def = idx.create_index("seq", 1, true).unwrap();
        let mut hint = None;
        for k in 0..500i64 {
            let node = idx
                .add_node_after(&mut def, IndexKey::Int(k), RowId::EMPTY, None, hint)
                .unwrap();
            hint = Some(node.position);
        }
        assert_eq!(idx.check_integrity(&def).unwrap(), 500);
        let found = idx.find(&def, &IndexKey::Int(250), false, Order::Ascending).unwrap();
        assert_eq!(found.unwrap().key, IndexKey::Int(250));
    }

    #[test]
    fn test_key_too_long_rejected() {
        let (_dir, engine) = open();
        let mut txn = engine.begin_transaction(&[col()]).unwrap();
        let mut idx = txn.index(col()).unwrap();
        let mut def = idx.create_index("s", 1, false).unwrap();
        let long = IndexKey::String("x".repeat(2000));
        let err = idx.add_node(&mut def, long, RowId::EMPTY, None).unwrap_err();
        assert!(matches!(err, TesseraError::IndexKeyTooLong { .. }));
        assert_eq!(idx.check_integrity(&def).unwrap(), 0);
    }
}
