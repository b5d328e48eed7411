//! Range iteration over the leaf chain.

use std::sync::Arc;

use crate::btree::leaf::LeafNode;
use crate::key::IndexKey;
use lodestone_buffer::{BufferPoolManager, PageFrame};
use lodestone_common::{PageId, Rid};

/// Iterator over (key, record id) pairs in key order.
///
/// Holds exactly one pinned, shared-latched leaf frame at a time and an
/// index into it; advancing past a leaf's last entry hops to the next
/// leaf through the chain, releasing the old leaf first. Dropping the
/// iterator releases whatever it still holds, so outstanding iterators
/// are the only thing that keeps leaf pins alive between operations.
pub struct IndexIterator<K: IndexKey> {
    pool: Arc<BufferPoolManager>,
    /// Current leaf frame, latched shared and pinned. None once ended.
    frame: Option<Arc<PageFrame>>,
    /// Decoded snapshot of the current leaf; valid while the shared
    /// latch is held.
    leaf: Option<LeafNode<K>>,
    index: usize,
}

impl<K: IndexKey> IndexIterator<K> {
    /// Builds an iterator over a leaf the tree has already latched
    /// (shared) and pinned for us.
    pub(crate) fn new(pool: Arc<BufferPoolManager>, frame: Arc<PageFrame>, index: usize) -> Self {
        let leaf = {
            let data = frame.read_data();
            LeafNode::<K>::load(&data[..])
        };
        Self {
            pool,
            frame: Some(frame),
            leaf: Some(leaf),
            index,
        }
    }

    /// Builds an already-ended iterator (empty tree).
    pub(crate) fn ended(pool: Arc<BufferPoolManager>) -> Self {
        Self {
            pool,
            frame: None,
            leaf: None,
            index: 0,
        }
    }

    /// Returns true once the iterator has moved past the last entry.
    pub fn is_end(&self) -> bool {
        self.frame.is_none()
    }

    /// Releases the current leaf and moves to the next one in the
    /// chain, or into the ended state when there is none.
    fn advance_leaf(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        let next_id = self
            .leaf
            .take()
            .map(|leaf| leaf.next_page_id)
            .unwrap_or(PageId::INVALID);

        let page_id = frame.page_id();
        frame.unlatch(false);
        self.pool.unpin_page(page_id, false);

        if next_id.is_valid() {
            if let Ok(next_frame) = self.pool.fetch_page(next_id) {
                next_frame.latch(false);
                let leaf = {
                    let data = next_frame.read_data();
                    LeafNode::<K>::load(&data[..])
                };
                self.frame = Some(next_frame);
                self.leaf = Some(leaf);
                self.index = 0;
            }
        }
    }
}

impl<K: IndexKey> Iterator for IndexIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let len = self.leaf.as_ref()?.size();
            if self.index < len {
                let item = self.leaf.as_ref()?.get_item(self.index);
                self.index += 1;
                if self.index >= len {
                    // Hop eagerly so is_end is accurate right after the
                    // last entry is consumed.
                    self.advance_leaf();
                }
                return Some(item);
            }
            // Positioned past this leaf's entries (iter_from lower
            // bound beyond its last key): move on.
            self.advance_leaf();
            self.leaf.as_ref()?;
        }
    }
}

impl<K: IndexKey> Drop for IndexIterator<K> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            let page_id = frame.page_id();
            frame.unlatch(false);
            self.pool.unpin_page(page_id, false);
        }
        self.leaf = None;
    }
}
