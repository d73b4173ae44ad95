//! Disk-resident B+ tree.
//!
//! Each node occupies exactly one page, fetched through the buffer pool.
//! The root page id lives in the header page; leaves form a singly-linked
//! list for range scans. No parent pointers are persisted: descents carry
//! their path on the stack and consult it during split propagation.

use std::sync::Arc;

use tracing::debug;

use basalt_common::error::{Component, EngineError, EngineResult};
use basalt_common::types::{Key, Lsn, PageId, Value};

use crate::buffer::{BufferPool, PageGuard};
use crate::node::{check_entry_size, InternalNode, LeafNode};
use crate::page::{HeaderPage, PageKind};

/// Ordered index over byte keys.
///
/// Mutating operations take the LSN of the driving log record and stamp
/// it onto every page they touch; unlogged operations pass
/// `Lsn::INVALID` and leave page LSNs alone.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use basalt_storage::{BPlusTree, BufferPool, DiskManager};
/// use basalt_common::types::{Key, Lsn, Value};
///
/// let disk = Arc::new(DiskManager::open("/tmp/demo.db").unwrap());
/// let pool = Arc::new(BufferPool::new(64, disk, None));
/// let tree = BPlusTree::new(pool, 64);
///
/// tree.insert(Key::from("k"), Some(Value::from("v")), Lsn::INVALID).unwrap();
/// assert!(tree.search(b"k").unwrap().is_some());
/// ```
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    /// Maximum fanout of internal nodes.
    order: usize,
}

impl BPlusTree {
    /// Creates a tree over the given pool.
    ///
    /// `order` is the internal-node fanout; the engine validates it
    /// against the configured minimum before construction.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>, order: usize) -> Self {
        Self { pool, order }
    }

    /// The buffer pool backing this tree.
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The current root page id; `PageId::INVALID` means the tree is
    /// empty.
    pub fn root_page_id(&self) -> EngineResult<PageId> {
        let guard = self.pool.fetch(PageId::HEADER)?;
        let page = guard.read();
        Ok(HeaderPage::read_from(&page)?.root_page_id)
    }

    /// Returns true if the tree holds no pages.
    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(!self.root_page_id()?.is_valid())
    }

    /// Inserts or overwrites an entry, splitting leaves and propagating
    /// up as needed. Returns true if the key was new.
    pub fn insert(&self, key: Key, value: Option<Value>, lsn: Lsn) -> EngineResult<bool> {
        check_entry_size(&key, value.as_ref())?;

        let root = self.root_page_id()?;
        if !root.is_valid() {
            let mut guard = self.pool.allocate(PageKind::Leaf)?;
            let mut node = LeafNode::new();
            node.insert(key, value);
            Self::write_leaf(&mut guard, &node, lsn);
            let root_id = guard.page_id();
            drop(guard);
            self.set_root(root_id)?;
            debug!(root = %root_id, "created root leaf");
            return Ok(true);
        }

        let (leaf_id, path) = self.descend(root, key.as_bytes())?;
        let mut guard = self.pool.fetch(leaf_id)?;
        let mut node = Self::read_leaf(&guard)?;
        let is_new = node.insert(key, value);

        if node.fits_page() {
            Self::write_leaf(&mut guard, &node, lsn);
            return Ok(is_new);
        }

        // Leaf split: the new right sibling takes the upper half and the
        // chain is relinked through it.
        let mut upper = node.split_upper();
        let mut right_guard = self.pool.allocate(PageKind::Leaf)?;
        let right_id = right_guard.page_id();
        upper.next_leaf = node.next_leaf;
        node.next_leaf = right_id;
        let promoted = upper.entries[0].key.clone();

        Self::write_leaf(&mut guard, &node, lsn);
        Self::write_leaf(&mut right_guard, &upper, lsn);
        drop(guard);
        drop(right_guard);
        debug!(left = %leaf_id, right = %right_id, "split leaf");

        self.propagate_split(path, promoted, right_id, lsn)?;
        Ok(is_new)
    }

    /// Looks up the value stored for `key`; absent values read as `None`.
    pub fn search(&self, key: &[u8]) -> EngineResult<Option<Value>> {
        let root = self.root_page_id()?;
        if !root.is_valid() {
            return Ok(None);
        }

        let (leaf_id, _) = self.descend(root, key)?;
        let guard = self.pool.fetch(leaf_id)?;
        let node = Self::read_leaf(&guard)?;
        Ok(node.get(key).and_then(|e| e.value.clone()))
    }

    /// Collects `(key, value)` pairs with `lo ≤ key < hi` in ascending
    /// key order by walking the leaf chain.
    pub fn range_scan(&self, lo: &[u8], hi: &[u8]) -> EngineResult<Vec<(Key, Value)>> {
        if lo >= hi {
            return Err(EngineError::invalid_argument(
                "range lower bound must be below upper bound",
            ));
        }

        let root = self.root_page_id()?;
        if !root.is_valid() {
            return Ok(Vec::new());
        }

        let (mut leaf_id, _) = self.descend(root, lo)?;
        let mut out = Vec::new();
        while leaf_id.is_valid() {
            let guard = self.pool.fetch(leaf_id)?;
            let node = Self::read_leaf(&guard)?;
            for entry in node.entries {
                if entry.key.as_bytes() < lo {
                    continue;
                }
                if entry.key.as_bytes() >= hi {
                    return Ok(out);
                }
                if let Some(value) = entry.value {
                    out.push((entry.key, value));
                }
            }
            leaf_id = node.next_leaf;
        }
        Ok(out)
    }

    /// Removes an entry from its leaf; underflow is permitted.
    ///
    /// Returns true if the key was present.
    pub fn delete(&self, key: &[u8], lsn: Lsn) -> EngineResult<bool> {
        let root = self.root_page_id()?;
        if !root.is_valid() {
            return Ok(false);
        }

        let (leaf_id, _) = self.descend(root, key)?;
        let mut guard = self.pool.fetch(leaf_id)?;
        let mut node = Self::read_leaf(&guard)?;
        if node.remove(key).is_none() {
            return Ok(false);
        }
        Self::write_leaf(&mut guard, &node, lsn);
        Ok(true)
    }

    /// The leaf page a write to `key` would land in, materializing the
    /// root leaf if the tree is empty.
    ///
    /// Data log records need a real target page id before the write is
    /// applied; root creation, like splits, is an unlogged structure
    /// modification.
    pub fn target_leaf(&self, key: &[u8]) -> EngineResult<PageId> {
        let root = self.root_page_id()?;
        if !root.is_valid() {
            let mut guard = self.pool.allocate(PageKind::Leaf)?;
            Self::write_leaf(&mut guard, &LeafNode::new(), Lsn::INVALID);
            let root_id = guard.page_id();
            drop(guard);
            self.set_root(root_id)?;
            debug!(root = %root_id, "materialized empty root leaf");
            return Ok(root_id);
        }
        Ok(self.descend(root, key)?.0)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn set_root(&self, root: PageId) -> EngineResult<()> {
        let mut guard = self.pool.fetch(PageId::HEADER)?;
        let mut page = guard.write();
        let mut header = HeaderPage::read_from(&page)?;
        header.root_page_id = root;
        header.next_page_id = PageId::new(self.pool.disk().num_pages() as i32);
        header.write_to(&mut page);
        Ok(())
    }

    /// Walks from `root` to the leaf responsible for `key`, recording the
    /// internal pages visited.
    fn descend(&self, root: PageId, key: &[u8]) -> EngineResult<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut current = root;
        loop {
            let guard = self.pool.fetch(current)?;
            let page = guard.read();
            match page.kind() {
                PageKind::Leaf => return Ok((current, path)),
                PageKind::Internal => {
                    let node = InternalNode::decode(page.payload(), current)?;
                    let next = node.children[node.child_index(key)];
                    path.push(current);
                    current = next;
                }
                other => {
                    return Err(EngineError::corrupted(
                        Component::Tree,
                        current,
                        format!("descended into {other} page"),
                    ))
                }
            }
        }
    }

    /// Pushes a promoted separator into the parents on `path`, splitting
    /// them as needed; an empty path grows a new root.
    fn propagate_split(
        &self,
        mut path: Vec<PageId>,
        mut promoted: Key,
        mut right: PageId,
        lsn: Lsn,
    ) -> EngineResult<()> {
        loop {
            let Some(parent_id) = path.pop() else {
                // The node that split was the old root itself.
                let left = self.root_page_id()?;
                let mut guard = self.pool.allocate(PageKind::Internal)?;
                let node = InternalNode::root(promoted, left, right);
                Self::write_internal(&mut guard, &node, lsn);
                let new_root = guard.page_id();
                drop(guard);
                self.set_root(new_root)?;
                debug!(root = %new_root, "tree height increased");
                return Ok(());
            };

            let mut guard = self.pool.fetch(parent_id)?;
            let mut node = Self::read_internal(&guard)?;
            node.insert_separator(promoted, right);

            if node.fanout() <= self.order && node.fits_page() {
                Self::write_internal(&mut guard, &node, lsn);
                return Ok(());
            }

            let (up, right_node) = node.split();
            let mut right_guard = self.pool.allocate(PageKind::Internal)?;
            Self::write_internal(&mut guard, &node, lsn);
            Self::write_internal(&mut right_guard, &right_node, lsn);
            debug!(left = %parent_id, right = %right_guard.page_id(), "split internal node");

            promoted = up;
            right = right_guard.page_id();
        }
    }

    fn read_leaf(guard: &PageGuard) -> EngineResult<LeafNode> {
        let page = guard.read();
        if page.kind() != PageKind::Leaf {
            return Err(EngineError::corrupted(
                Component::Tree,
                guard.page_id(),
                format!("expected leaf page, found {}", page.kind()),
            ));
        }
        LeafNode::decode(page.payload(), guard.page_id())
    }

    fn read_internal(guard: &PageGuard) -> EngineResult<InternalNode> {
        let page = guard.read();
        if page.kind() != PageKind::Internal {
            return Err(EngineError::corrupted(
                Component::Tree,
                guard.page_id(),
                format!("expected internal page, found {}", page.kind()),
            ));
        }
        InternalNode::decode(page.payload(), guard.page_id())
    }

    fn write_leaf(guard: &mut PageGuard, node: &LeafNode, lsn: Lsn) {
        let mut page = guard.write();
        page.write_payload(&node.encode());
        if lsn.is_valid() {
            page.set_page_lsn(lsn);
        }
    }

    fn write_internal(guard: &mut PageGuard, node: &InternalNode, lsn: Lsn) {
        let mut page = guard.write();
        page.write_payload(&node.encode());
        if lsn.is_valid() {
            page.set_page_lsn(lsn);
        }
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree").field("order", &self.order).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use tempfile::TempDir;

    fn open_tree(order: usize, frames: usize) -> (TempDir, BPlusTree) {
        let tmp = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::open(tmp.path().join("test.db")).unwrap());
        let pool = Arc::new(BufferPool::new(frames, disk, None));
        (tmp, BPlusTree::new(pool, order))
    }

    fn kv(n: u64) -> (Key, Value) {
        (Key::from_u64(n), Value::from_vec(format!("value-{n}").into_bytes()))
    }

    #[test]
    fn test_empty_tree() {
        let (_tmp, tree) = open_tree(4, 16);
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.search(b"missing").unwrap(), None);
        assert!(tree
            .range_scan(&Key::from_u64(0), &Key::from_u64(10))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_insert_and_search() {
        let (_tmp, tree) = open_tree(4, 16);
        let (k, v) = kv(10);

        assert!(tree.insert(k.clone(), Some(v.clone()), Lsn::INVALID).unwrap());
        assert_eq!(tree.search(&k).unwrap(), Some(v));
        assert_eq!(tree.search(&Key::from_u64(11)).unwrap(), None);
    }

    #[test]
    fn test_duplicate_key_overwrites() {
        let (_tmp, tree) = open_tree(4, 16);
        let key = Key::from_u64(1);

        assert!(tree
            .insert(key.clone(), Some(Value::from("first")), Lsn::INVALID)
            .unwrap());
        assert!(!tree
            .insert(key.clone(), Some(Value::from("second")), Lsn::INVALID)
            .unwrap());
        assert_eq!(tree.search(&key).unwrap(), Some(Value::from("second")));
    }

    #[test]
    fn test_many_inserts_split_and_stay_sorted() {
        let (_tmp, tree) = open_tree(4, 32);
        let payload = vec![0x5Au8; 300];

        // Insert in a scrambled order; enough volume to force leaf and
        // internal splits at order 4.
        for i in 0..120u64 {
            let n = (i * 67) % 120;
            tree.insert(
                Key::from_u64(n),
                Some(Value::from_vec(payload.clone())),
                Lsn::INVALID,
            )
            .unwrap();
        }

        for n in 0..120u64 {
            assert!(tree.search(&Key::from_u64(n)).unwrap().is_some(), "key {n}");
        }

        let all = tree
            .range_scan(&Key::from_u64(0), &Key::from_u64(200))
            .unwrap();
        assert_eq!(all.len(), 120);
        for pair in all.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[test]
    fn test_range_scan_bounds() {
        let (_tmp, tree) = open_tree(4, 16);
        for n in 0..20u64 {
            let (k, v) = kv(n);
            tree.insert(k, Some(v), Lsn::INVALID).unwrap();
        }

        let hits = tree
            .range_scan(&Key::from_u64(5), &Key::from_u64(10))
            .unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].0, Key::from_u64(5));
        assert_eq!(hits[4].0, Key::from_u64(9));
    }

    #[test]
    fn test_range_scan_inverted_rejected() {
        let (_tmp, tree) = open_tree(4, 16);
        let err = tree
            .range_scan(&Key::from_u64(10), &Key::from_u64(5))
            .unwrap_err();
        assert_eq!(
            err.kind(),
            basalt_common::error::ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_delete_leaf_entry() {
        let (_tmp, tree) = open_tree(4, 16);
        let (k, v) = kv(3);
        tree.insert(k.clone(), Some(v), Lsn::INVALID).unwrap();

        assert!(tree.delete(&k, Lsn::INVALID).unwrap());
        assert_eq!(tree.search(&k).unwrap(), None);
        assert!(!tree.delete(&k, Lsn::INVALID).unwrap());
    }

    #[test]
    fn test_lsn_stamping() {
        let (_tmp, tree) = open_tree(4, 16);
        let (k, v) = kv(1);
        tree.insert(k.clone(), Some(v), Lsn::new(77)).unwrap();

        let leaf_id = tree.target_leaf(&k).unwrap();
        let guard = tree.pool().fetch(leaf_id).unwrap();
        assert_eq!(guard.read().page_lsn(), Lsn::new(77));
    }

    #[test]
    fn test_target_leaf_materializes_root() {
        let (_tmp, tree) = open_tree(4, 16);
        assert!(tree.is_empty().unwrap());

        let leaf = tree.target_leaf(b"anything").unwrap();
        assert!(leaf.is_valid());
        assert!(!tree.is_empty().unwrap());
        assert_eq!(tree.root_page_id().unwrap(), leaf);
        // Still no entries.
        assert_eq!(tree.search(b"anything").unwrap(), None);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.db");

        {
            let disk = Arc::new(DiskManager::open(&path).unwrap());
            let pool = Arc::new(BufferPool::new(16, Arc::clone(&disk), None));
            let tree = BPlusTree::new(Arc::clone(&pool), 4);
            for n in 0..50u64 {
                let (k, v) = kv(n);
                tree.insert(k, Some(v), Lsn::INVALID).unwrap();
            }
            pool.flush_all().unwrap();
            disk.close().unwrap();
        }

        let disk = Arc::new(DiskManager::open(&path).unwrap());
        let pool = Arc::new(BufferPool::new(16, disk, None));
        let tree = BPlusTree::new(pool, 4);
        for n in 0..50u64 {
            let (k, v) = kv(n);
            assert_eq!(tree.search(&k).unwrap(), Some(v));
        }
    }

    #[test]
    fn test_full_leaf_boundary_then_split() {
        let (_tmp, tree) = open_tree(8, 16);

        // Entries sized so a handful exactly saturate one leaf.
        let value = Value::from_vec(vec![0x11u8; 1000]);
        for n in 0..4u64 {
            tree.insert(Key::from_u64(n), Some(value.clone()), Lsn::INVALID)
                .unwrap();
        }
        let before = tree.root_page_id().unwrap();

        // One more forces the split and a new root above two leaves.
        tree.insert(Key::from_u64(4), Some(value.clone()), Lsn::INVALID)
            .unwrap();
        let after = tree.root_page_id().unwrap();
        assert_ne!(before, after);

        for n in 0..5u64 {
            assert_eq!(tree.search(&Key::from_u64(n)).unwrap(), Some(value.clone()));
        }
    }
}
