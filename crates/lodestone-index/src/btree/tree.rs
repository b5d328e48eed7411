//! B+tree control logic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::btree::internal::InternalNode;
use crate::btree::iterator::IndexIterator;
use crate::btree::leaf::LeafNode;
use crate::btree::node::{self, Node, NodeHeader};
use crate::header::{HeaderPage, MAX_INDEX_NAME_LEN};
use crate::key::{IndexKey, KeyComparator};
use crate::transaction::Transaction;
use lodestone_buffer::{BufferPoolManager, PageFrame, RwLatch};
use lodestone_common::{LodeError, PageId, Result, Rid};

/// What a descent intends to do to the tree; decides latch modes and the
/// safe-node predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Read,
    Insert,
    Delete,
}

impl AccessMode {
    fn is_exclusive(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// Per-descent latch bookkeeping: the operation's mode and how many
/// holds this call currently has on the root-id latch, so nested
/// acquire/release pairs inside crabbing balance cleanly.
struct LatchContext {
    mode: AccessMode,
    root_holds: u32,
}

impl LatchContext {
    fn new(mode: AccessMode) -> Self {
        Self {
            mode,
            root_holds: 0,
        }
    }
}

/// Concurrent B+tree index over buffer pool pages.
///
/// Maps fixed-width keys to record ids. All node storage goes through
/// the buffer pool; parent/child linkage is stored as page ids and
/// resolved by fetching. Thread safety comes from latch coupling: the
/// root-id slot has its own reader/writer latch, each page frame has
/// one, and a descent releases an ancestor's latch only once the freshly
/// latched child is safe for the operation.
pub struct BPlusTree<K: IndexKey, C: KeyComparator<K>> {
    /// Name under which the root page id is recorded on the header page.
    index_name: String,
    /// Current root page id; INVALID while the tree is empty. Guarded by
    /// `root_latch`.
    root_page_id: AtomicU32,
    /// Buffer pool providing all node storage.
    pool: Arc<BufferPoolManager>,
    /// Key ordering.
    comparator: C,
    /// Latch protecting the root page id slot.
    root_latch: RwLatch,
    /// Leaf node capacity.
    leaf_max_size: usize,
    /// Internal node capacity (children per node).
    internal_max_size: usize,
    _key: std::marker::PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Creates a tree handle.
    ///
    /// `root_page_id` is the previously recorded root, or
    /// `PageId::INVALID` for a tree that does not exist yet. Node
    /// capacities default to what fits a page with one entry of
    /// headroom.
    pub fn new(
        name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        comparator: C,
        root_page_id: PageId,
    ) -> Self {
        let index_name = name.into();
        assert!(
            index_name.len() <= MAX_INDEX_NAME_LEN,
            "index name exceeds {MAX_INDEX_NAME_LEN} bytes"
        );
        Self {
            index_name,
            root_page_id: AtomicU32::new(root_page_id.0),
            pool,
            comparator,
            root_latch: RwLatch::new(),
            leaf_max_size: LeafNode::<K>::capacity(),
            internal_max_size: InternalNode::<K>::capacity(),
            _key: std::marker::PhantomData,
        }
    }

    /// Creates a tree handle, looking up the root page id recorded for
    /// `name` on the header page.
    pub fn open(
        name: impl Into<String>,
        pool: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        let index_name = name.into();
        let frame = pool.fetch_page(PageId::HEADER)?;
        frame.latch(false);
        let root = {
            let data = frame.read_data();
            HeaderPage::load(&data[..]).get_root_id(&index_name)
        };
        frame.unlatch(false);
        pool.unpin_page(PageId::HEADER, false);
        Ok(Self::new(
            index_name,
            pool,
            comparator,
            root.unwrap_or(PageId::INVALID),
        ))
    }

    /// Overrides node capacities. Small capacities force deep trees out
    /// of few keys, which is what structural tests want.
    pub fn with_node_capacities(mut self, leaf_max_size: usize, internal_max_size: usize) -> Self {
        assert!(leaf_max_size >= 2, "leaf capacity below 2 cannot split");
        assert!(
            internal_max_size >= 3,
            "internal capacity below 3 cannot split"
        );
        self.leaf_max_size = leaf_max_size;
        self.internal_max_size = internal_max_size;
        self
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::Acquire))
    }

    fn set_root_page_id(&self, page_id: PageId) {
        self.root_page_id.store(page_id.0, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Root-id latch
    // ------------------------------------------------------------------

    fn lock_root(&self, ctx: &mut LatchContext) {
        self.root_latch.lock(ctx.mode.is_exclusive());
        ctx.root_holds += 1;
    }

    fn try_unlock_root(&self, ctx: &mut LatchContext) {
        if ctx.root_holds > 0 {
            self.root_latch.unlock(ctx.mode.is_exclusive());
            ctx.root_holds -= 1;
        }
    }

    // ------------------------------------------------------------------
    // Descent with latch coupling
    // ------------------------------------------------------------------

    /// A node is safe for an operation when a subsequent mutation cannot
    /// propagate structurally past it.
    fn is_safe(header: &NodeHeader, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => true,
            AccessMode::Insert => header.size < header.max_size,
            AccessMode::Delete => {
                // The root is exempt from the minimum-size rule; it is
                // unsafe only when the deletion could empty it (leaf) or
                // collapse it to one child (internal).
                if header.is_root() {
                    if header.is_leaf() {
                        header.size > 1
                    } else {
                        header.size > 2
                    }
                } else {
                    header.size > header.min_size()
                }
            }
        }
    }

    /// Fetches and latches `child_id`, then releases all ancestors if
    /// the child is safe for the operation.
    ///
    /// With a scratchpad the child is recorded in its page set and
    /// ancestors are released through the centralized routine. Without
    /// one (iterator descents, which are read-mode) only the immediate
    /// parent is held and released here.
    fn crab_fetch(
        &self,
        child_id: PageId,
        parent: Option<&Arc<PageFrame>>,
        ctx: &mut LatchContext,
        txn: Option<&Transaction>,
    ) -> Result<Arc<PageFrame>> {
        let frame = match self.pool.fetch_page(child_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.abort_descent(parent, ctx, txn);
                return Err(e);
            }
        };
        let exclusive = ctx.mode.is_exclusive();
        frame.latch(exclusive);

        let safe = {
            let data = frame.read_data();
            Self::is_safe(&NodeHeader::read(&data[..]), ctx.mode)
        };
        if safe {
            match txn {
                Some(txn) => self.release_all(ctx, txn, true),
                None => {
                    if let Some(parent) = parent {
                        let parent_id = parent.page_id();
                        parent.unlatch(false);
                        self.pool.unpin_page(parent_id, false);
                    }
                    self.try_unlock_root(ctx);
                }
            }
        }
        if let Some(txn) = txn {
            txn.add_into_page_set(Arc::clone(&frame));
        }
        Ok(frame)
    }

    /// Releases whatever a failed descent still holds before the error
    /// surfaces to the caller.
    fn abort_descent(
        &self,
        parent: Option<&Arc<PageFrame>>,
        ctx: &mut LatchContext,
        txn: Option<&Transaction>,
    ) {
        match txn {
            Some(txn) => self.release_all(ctx, txn, true),
            None => {
                if let Some(parent) = parent {
                    let parent_id = parent.page_id();
                    parent.unlatch(false);
                    self.pool.unpin_page(parent_id, false);
                }
                self.try_unlock_root(ctx);
            }
        }
    }

    /// Walks from the root to the leaf responsible for `key` (or the
    /// left-most leaf when `key` is None), crabbing latches on the way
    /// down. Assumes the root-id latch is held and the tree is
    /// non-empty.
    fn descend(
        &self,
        key: Option<&K>,
        ctx: &mut LatchContext,
        txn: Option<&Transaction>,
    ) -> Result<Arc<PageFrame>> {
        let mut frame = self.crab_fetch(self.root_page_id(), None, ctx, txn)?;
        loop {
            let child = {
                let data = frame.read_data();
                let header = NodeHeader::read(&data[..]);
                if header.is_leaf() {
                    break;
                }
                let internal = InternalNode::<K>::load(&data[..]);
                match key {
                    Some(key) => internal.lookup(key, &self.comparator),
                    None => internal.value_at(0),
                }
            };
            frame = self.crab_fetch(child, Some(&frame), ctx, txn)?;
        }
        Ok(frame)
    }

    /// The single exit path for traversal-acquired latches and pins.
    ///
    /// Iterates the scratchpad's page set in insertion order, unlatches
    /// and unpins each frame (dirty iff the operation mutates and is no
    /// longer descending), deallocates every page scheduled in the
    /// deleted set, and leaves both sets empty. Releases this call's
    /// root-id latch hold first.
    fn release_all(&self, ctx: &mut LatchContext, txn: &Transaction, still_descending: bool) {
        self.try_unlock_root(ctx);

        let exclusive = ctx.mode.is_exclusive();
        let mark_dirty = exclusive && !still_descending;
        let deleted = txn.take_deleted_page_set();
        debug_assert!(deleted.is_empty() || !still_descending);

        for frame in txn.drain_page_set() {
            let page_id = frame.page_id();
            frame.unlatch(exclusive);
            self.pool.unpin_page(page_id, mark_dirty);
            if deleted.contains(&page_id) {
                let _ = self.pool.delete_page(page_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Point query
    // ------------------------------------------------------------------

    /// Looks up the record id stored for `key`.
    pub fn get_value(&self, key: &K, txn: &Transaction) -> Result<Option<Rid>> {
        let mut ctx = LatchContext::new(AccessMode::Read);
        self.lock_root(&mut ctx);
        if self.is_empty() {
            self.try_unlock_root(&mut ctx);
            return Ok(None);
        }

        let frame = self.descend(Some(key), &mut ctx, Some(txn))?;
        let result = {
            let data = frame.read_data();
            LeafNode::<K>::load(&data[..]).lookup(key, &self.comparator)
        };
        self.release_all(&mut ctx, txn, false);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Inserts a key/record-id pair. Keys are unique; inserting an
    /// existing key fails with `DuplicateKey` and leaves the tree
    /// unchanged.
    pub fn insert(&self, key: K, value: Rid, txn: &Transaction) -> Result<()> {
        let mut ctx = LatchContext::new(AccessMode::Insert);
        self.lock_root(&mut ctx);
        if self.is_empty() {
            let result = self.start_new_tree(key, value);
            self.try_unlock_root(&mut ctx);
            return result;
        }

        let frame = self.descend(Some(&key), &mut ctx, Some(txn))?;
        let mut leaf = {
            let data = frame.read_data();
            LeafNode::<K>::load(&data[..])
        };

        if leaf.lookup(&key, &self.comparator).is_some() {
            self.release_all(&mut ctx, txn, false);
            return Err(LodeError::DuplicateKey);
        }
        leaf.insert(key, value, &self.comparator);

        if leaf.size() > leaf.max_size {
            if let Err(e) = self.split_leaf(leaf, &frame, txn) {
                self.release_all(&mut ctx, txn, false);
                return Err(e);
            }
        } else {
            leaf.store(&mut frame.write_data()[..]);
        }

        self.release_all(&mut ctx, txn, false);
        Ok(())
    }

    /// Builds the first leaf of an empty tree and records its root id.
    fn start_new_tree(&self, key: K, value: Rid) -> Result<()> {
        let (page_id, frame) = self.pool.new_page()?;
        let mut root = LeafNode::<K>::new(page_id, PageId::INVALID, self.leaf_max_size);
        root.insert(key, value, &self.comparator);
        {
            let mut data = frame.write_data();
            root.store(&mut data[..]);
            node::write_parent_id(&mut data[..], PageId::INVALID);
        }
        self.pool.unpin_page(page_id, true);

        self.set_root_page_id(page_id);
        debug!(root = %page_id, name = %self.index_name, "tree root created");
        self.update_root_record(true)
    }

    /// Splits an over-full leaf and threads the separator into the
    /// parent. The transient over-insert is already in `leaf`, which has
    /// not been stored yet.
    fn split_leaf(
        &self,
        mut leaf: LeafNode<K>,
        leaf_frame: &Arc<PageFrame>,
        txn: &Transaction,
    ) -> Result<()> {
        let (new_page_id, new_frame) = self.pool.new_page()?;
        new_frame.latch(true);
        txn.add_into_page_set(Arc::clone(&new_frame));

        let mut sibling = LeafNode::<K>::new(new_page_id, leaf.parent_page_id, self.leaf_max_size);
        leaf.move_half_to(&mut sibling);
        let separator = sibling.key_at(0);

        leaf.store(&mut leaf_frame.write_data()[..]);
        {
            let mut data = new_frame.write_data();
            sibling.store(&mut data[..]);
            node::write_parent_id(&mut data[..], sibling.parent_page_id);
        }
        trace!(left = %leaf.page_id, right = %new_page_id, "leaf split");

        self.insert_into_parent(leaf.page_id, leaf.parent_page_id, separator, new_page_id, txn)
    }

    /// Threads a freshly split-off right sibling into the parent,
    /// splitting upward as often as the separators overflow.
    fn insert_into_parent(
        &self,
        left_id: PageId,
        left_parent_id: PageId,
        key: K,
        right_id: PageId,
        txn: &Transaction,
    ) -> Result<()> {
        if !left_parent_id.is_valid() {
            // The root split: a new root adopts both halves.
            let (root_id, root_frame) = self.pool.new_page()?;
            let mut root = InternalNode::<K>::new(root_id, PageId::INVALID, self.internal_max_size);
            root.populate_new_root(left_id, key, right_id);
            {
                let mut data = root_frame.write_data();
                root.store(&mut data[..]);
                node::write_parent_id(&mut data[..], PageId::INVALID);
            }
            self.pool.unpin_page(root_id, true);

            self.reparent(&[left_id, right_id], root_id)?;
            self.set_root_page_id(root_id);
            debug!(new_root = %root_id, "root split, tree height grew");
            return self.update_root_record(false);
        }

        let parent_frame = self.pool.fetch_page(left_parent_id)?;
        let result = (|| -> Result<()> {
            let mut parent = {
                let data = parent_frame.read_data();
                InternalNode::<K>::load(&data[..])
            };
            self.reparent(&[right_id], left_parent_id)?;
            parent.insert_node_after(left_id, key, right_id);

            if parent.size() <= parent.max_size {
                parent.store(&mut parent_frame.write_data()[..]);
                return Ok(());
            }

            // The parent overflowed in turn.
            let (new_page_id, new_frame) = self.pool.new_page()?;
            new_frame.latch(true);
            txn.add_into_page_set(Arc::clone(&new_frame));

            let mut sibling =
                InternalNode::<K>::new(new_page_id, parent.parent_page_id, self.internal_max_size);
            let moved = parent.move_half_to(&mut sibling);
            let separator = sibling.key_at(0);

            parent.store(&mut parent_frame.write_data()[..]);
            {
                let mut data = new_frame.write_data();
                sibling.store(&mut data[..]);
                node::write_parent_id(&mut data[..], sibling.parent_page_id);
            }
            self.reparent(&moved, new_page_id)?;
            trace!(left = %parent.page_id, right = %new_page_id, "internal split");

            self.insert_into_parent(
                parent.page_id,
                parent.parent_page_id,
                separator,
                new_page_id,
                txn,
            )
        })();
        self.pool.unpin_page(left_parent_id, true);
        result
    }

    /// Rewrites the parent pointer of each child page. Used whenever
    /// children are transplanted to another internal node; the caller's
    /// latches make the in-place pokes safe.
    fn reparent(&self, children: &[PageId], new_parent: PageId) -> Result<()> {
        for &child in children {
            let frame = self.pool.fetch_page(child)?;
            node::write_parent_id(&mut frame.write_data()[..], new_parent);
            self.pool.unpin_page(child, true);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Removes the entry for `key`. Absent keys are a no-op.
    pub fn remove(&self, key: &K, txn: &Transaction) -> Result<()> {
        let mut ctx = LatchContext::new(AccessMode::Delete);
        self.lock_root(&mut ctx);
        if self.is_empty() {
            self.try_unlock_root(&mut ctx);
            return Ok(());
        }

        let frame = self.descend(Some(key), &mut ctx, Some(txn))?;
        let mut leaf = {
            let data = frame.read_data();
            LeafNode::<K>::load(&data[..])
        };

        if !leaf.remove_and_delete_record(key, &self.comparator) {
            self.release_all(&mut ctx, txn, false);
            return Ok(());
        }
        leaf.store(&mut frame.write_data()[..]);

        if leaf.size() < leaf.min_size() {
            if let Err(e) = self.coalesce_or_redistribute(Node::Leaf(leaf), &frame, txn) {
                self.release_all(&mut ctx, txn, false);
                return Err(e);
            }
        }

        self.release_all(&mut ctx, txn, false);
        Ok(())
    }

    /// Restores the minimum-size invariant for an under-full node by
    /// borrowing from a sibling or merging into one, recursing upward
    /// when a merge leaves the parent under-full.
    fn coalesce_or_redistribute(
        &self,
        node: Node<K>,
        node_frame: &Arc<PageFrame>,
        txn: &Transaction,
    ) -> Result<()> {
        if node.is_root() {
            return self.adjust_root(node, node_frame, txn);
        }

        let parent_id = node.parent_page_id();
        let parent_frame = self.pool.fetch_page(parent_id)?;
        let result = self.rebalance(node, node_frame, &parent_frame, txn);
        self.pool.unpin_page(parent_id, false);
        result
    }

    /// Examines the siblings of an under-full non-root node. Tries the
    /// left sibling, then the right; a sibling above its minimum donates
    /// one entry, otherwise the pair merges leftward.
    fn rebalance(
        &self,
        node: Node<K>,
        node_frame: &Arc<PageFrame>,
        parent_frame: &Arc<PageFrame>,
        txn: &Transaction,
    ) -> Result<()> {
        let parent = {
            let data = parent_frame.read_data();
            InternalNode::<K>::load(&data[..])
        };
        let Some(node_idx) = parent.value_index(node.page_id()) else {
            return Err(LodeError::TreeCorrupted(format!(
                "{} missing from its parent {}",
                node.page_id(),
                parent.page_id
            )));
        };

        let mut left: Option<(Arc<PageFrame>, Node<K>)> = None;
        if node_idx > 0 {
            let (left_frame, left_node) = self.fetch_sibling(parent.value_at(node_idx - 1))?;
            if left_node.size() > left_node.min_size() {
                txn.add_into_page_set(Arc::clone(&left_frame));
                return self.redistribute_from_left(
                    left_node,
                    &left_frame,
                    node,
                    node_frame,
                    parent,
                    parent_frame,
                    node_idx,
                );
            }
            left = Some((left_frame, left_node));
        }

        let mut right: Option<(Arc<PageFrame>, Node<K>)> = None;
        if node_idx + 1 < parent.size() {
            let (right_frame, right_node) =
                match self.fetch_sibling(parent.value_at(node_idx + 1)) {
                    Ok(sibling) => sibling,
                    Err(e) => {
                        if let Some((left_frame, _)) = left {
                            self.release_sibling(&left_frame);
                        }
                        return Err(e);
                    }
                };
            if right_node.size() > right_node.min_size() {
                if let Some((left_frame, _)) = left {
                    self.release_sibling(&left_frame);
                }
                txn.add_into_page_set(Arc::clone(&right_frame));
                return self.redistribute_from_right(
                    right_node,
                    &right_frame,
                    node,
                    node_frame,
                    parent,
                    parent_frame,
                    node_idx,
                );
            }
            right = Some((right_frame, right_node));
        }

        // Neither sibling can donate: merge leftward.
        if let Some((left_frame, left_node)) = left {
            if let Some((right_frame, _)) = right {
                self.release_sibling(&right_frame);
            }
            txn.add_into_page_set(Arc::clone(&left_frame));
            self.coalesce(
                left_node,
                &left_frame,
                node,
                node_frame,
                parent,
                parent_frame,
                node_idx,
                txn,
            )
        } else {
            let (right_frame, right_node) =
                right.expect("under-full non-root node has at least one sibling");
            txn.add_into_page_set(Arc::clone(&right_frame));
            self.coalesce(
                node,
                node_frame,
                right_node,
                &right_frame,
                parent,
                parent_frame,
                node_idx + 1,
                txn,
            )
        }
    }

    /// Fetches and write-latches a sibling page. Siblings are taken
    /// while the parent latch is held, preserving the top-down order.
    fn fetch_sibling(&self, page_id: PageId) -> Result<(Arc<PageFrame>, Node<K>)> {
        let frame = self.pool.fetch_page(page_id)?;
        frame.latch(true);
        let node = {
            let data = frame.read_data();
            Node::<K>::load(&data[..])
        };
        match node {
            Ok(node) => Ok((frame, node)),
            Err(e) => {
                frame.unlatch(true);
                self.pool.unpin_page(page_id, false);
                Err(e)
            }
        }
    }

    /// Releases a sibling that was examined but not used.
    fn release_sibling(&self, frame: &Arc<PageFrame>) {
        let page_id = frame.page_id();
        frame.unlatch(true);
        self.pool.unpin_page(page_id, false);
    }

    /// The left sibling donates its last entry to the front of `node`,
    /// rotating the separator through the parent.
    #[allow(clippy::too_many_arguments)]
    fn redistribute_from_left(
        &self,
        left: Node<K>,
        left_frame: &Arc<PageFrame>,
        node: Node<K>,
        node_frame: &Arc<PageFrame>,
        mut parent: InternalNode<K>,
        parent_frame: &Arc<PageFrame>,
        node_idx: usize,
    ) -> Result<()> {
        trace!(node = %node.page_id(), "redistributing from left sibling");
        match (left, node) {
            (Node::Leaf(mut left), Node::Leaf(mut node)) => {
                let separator = left.move_last_to_front_of(&mut node);
                parent.set_key_at(node_idx, separator);
                left.store(&mut left_frame.write_data()[..]);
                node.store(&mut node_frame.write_data()[..]);
            }
            (Node::Internal(mut left), Node::Internal(mut node)) => {
                let (separator, moved_child) =
                    left.move_last_to_front_of(&mut node, parent.key_at(node_idx));
                parent.set_key_at(node_idx, separator);
                left.store(&mut left_frame.write_data()[..]);
                node.store(&mut node_frame.write_data()[..]);
                self.reparent(&[moved_child], node.page_id)?;
            }
            _ => {
                return Err(LodeError::TreeCorrupted(
                    "sibling node kind mismatch".to_string(),
                ))
            }
        }
        parent.store(&mut parent_frame.write_data()[..]);
        Ok(())
    }

    /// The right sibling donates its first entry to the tail of `node`,
    /// rotating the separator through the parent. The separator updated
    /// is the right sibling's own, at node_idx + 1.
    #[allow(clippy::too_many_arguments)]
    fn redistribute_from_right(
        &self,
        right: Node<K>,
        right_frame: &Arc<PageFrame>,
        node: Node<K>,
        node_frame: &Arc<PageFrame>,
        mut parent: InternalNode<K>,
        parent_frame: &Arc<PageFrame>,
        node_idx: usize,
    ) -> Result<()> {
        trace!(node = %node.page_id(), "redistributing from right sibling");
        match (right, node) {
            (Node::Leaf(mut right), Node::Leaf(mut node)) => {
                let separator = right.move_first_to_end_of(&mut node);
                parent.set_key_at(node_idx + 1, separator);
                right.store(&mut right_frame.write_data()[..]);
                node.store(&mut node_frame.write_data()[..]);
            }
            (Node::Internal(mut right), Node::Internal(mut node)) => {
                let (separator, moved_child) =
                    right.move_first_to_end_of(&mut node, parent.key_at(node_idx + 1));
                parent.set_key_at(node_idx + 1, separator);
                right.store(&mut right_frame.write_data()[..]);
                node.store(&mut node_frame.write_data()[..]);
                self.reparent(&[moved_child], node.page_id)?;
            }
            _ => {
                return Err(LodeError::TreeCorrupted(
                    "sibling node kind mismatch".to_string(),
                ))
            }
        }
        parent.store(&mut parent_frame.write_data()[..]);
        Ok(())
    }

    /// Merges `donor` into its left-ward neighbor `recipient`, removing
    /// the separator at `separator_idx` from the parent and scheduling
    /// the emptied donor page for deallocation. Recurses when the parent
    /// falls under its minimum.
    #[allow(clippy::too_many_arguments)]
    fn coalesce(
        &self,
        recipient: Node<K>,
        recipient_frame: &Arc<PageFrame>,
        donor: Node<K>,
        donor_frame: &Arc<PageFrame>,
        mut parent: InternalNode<K>,
        parent_frame: &Arc<PageFrame>,
        separator_idx: usize,
        txn: &Transaction,
    ) -> Result<()> {
        let donor_id = donor.page_id();
        match (recipient, donor) {
            (Node::Leaf(mut recipient), Node::Leaf(mut donor)) => {
                donor.move_all_to(&mut recipient);
                recipient.store(&mut recipient_frame.write_data()[..]);
                donor.store(&mut donor_frame.write_data()[..]);
                debug!(donor = %donor_id, recipient = %recipient.page_id, "leaves coalesced");
            }
            (Node::Internal(mut recipient), Node::Internal(mut donor)) => {
                let moved = donor.move_all_to(&mut recipient, parent.key_at(separator_idx));
                recipient.store(&mut recipient_frame.write_data()[..]);
                donor.store(&mut donor_frame.write_data()[..]);
                self.reparent(&moved, recipient.page_id)?;
                debug!(donor = %donor_id, recipient = %recipient.page_id, "internal nodes coalesced");
            }
            _ => {
                return Err(LodeError::TreeCorrupted(
                    "sibling node kind mismatch".to_string(),
                ))
            }
        }
        txn.add_into_deleted_page_set(donor_id);

        parent.remove(separator_idx);
        parent.store(&mut parent_frame.write_data()[..]);

        if parent.size() < parent.min_size() {
            return self.coalesce_or_redistribute(Node::Internal(parent), parent_frame, txn);
        }
        Ok(())
    }

    /// Handles an under-full root: an empty root leaf empties the tree;
    /// a root holding a single child hands the root role down. The old
    /// root page is scheduled for deallocation either way.
    fn adjust_root(
        &self,
        node: Node<K>,
        node_frame: &Arc<PageFrame>,
        txn: &Transaction,
    ) -> Result<()> {
        match node {
            Node::Leaf(leaf) => {
                if leaf.size() == 0 {
                    self.set_root_page_id(PageId::INVALID);
                    self.update_root_record(false)?;
                    txn.add_into_deleted_page_set(leaf.page_id);
                    debug!(name = %self.index_name, "last entry removed, tree is empty");
                }
                Ok(())
            }
            Node::Internal(mut internal) => {
                if internal.size() == 1 {
                    let new_root_id = internal.remove_and_return_only_child();
                    internal.store(&mut node_frame.write_data()[..]);
                    self.reparent(&[new_root_id], PageId::INVALID)?;
                    self.set_root_page_id(new_root_id);
                    self.update_root_record(false)?;
                    txn.add_into_deleted_page_set(internal.page_id);
                    debug!(new_root = %new_root_id, "root collapsed, tree height shrank");
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Returns an iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<IndexIterator<K>> {
        let mut ctx = LatchContext::new(AccessMode::Read);
        self.lock_root(&mut ctx);
        if self.is_empty() {
            self.try_unlock_root(&mut ctx);
            return Ok(IndexIterator::ended(Arc::clone(&self.pool)));
        }

        let frame = self.descend(None, &mut ctx, None)?;
        debug_assert_eq!(ctx.root_holds, 0);
        Ok(IndexIterator::new(Arc::clone(&self.pool), frame, 0))
    }

    /// Returns an iterator positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<K>> {
        let mut ctx = LatchContext::new(AccessMode::Read);
        self.lock_root(&mut ctx);
        if self.is_empty() {
            self.try_unlock_root(&mut ctx);
            return Ok(IndexIterator::ended(Arc::clone(&self.pool)));
        }

        let frame = self.descend(Some(key), &mut ctx, None)?;
        debug_assert_eq!(ctx.root_holds, 0);
        let index = {
            let data = frame.read_data();
            LeafNode::<K>::load(&data[..]).key_index(key, &self.comparator)
        };
        Ok(IndexIterator::new(Arc::clone(&self.pool), frame, index))
    }

    // ------------------------------------------------------------------
    // Header page maintenance
    // ------------------------------------------------------------------

    /// Persists the current root page id under this tree's name on the
    /// header page. The header frame's latch serializes the
    /// read-modify-write across trees sharing the pool.
    fn update_root_record(&self, insert: bool) -> Result<()> {
        let frame = self.pool.fetch_page(PageId::HEADER)?;
        frame.latch(true);
        let root = self.root_page_id();
        let mut header = {
            let data = frame.read_data();
            HeaderPage::load(&data[..])
        };

        let recorded = if insert {
            header.insert_record(&self.index_name, root)
                || header.update_record(&self.index_name, root)
        } else {
            header.update_record(&self.index_name, root)
                || header.insert_record(&self.index_name, root)
        };
        if !recorded {
            frame.unlatch(true);
            self.pool.unpin_page(PageId::HEADER, false);
            return Err(LodeError::HeaderFull);
        }

        header.store(&mut frame.write_data()[..]);
        frame.unlatch(true);
        self.pool.unpin_page(PageId::HEADER, true);
        Ok(())
    }
}
