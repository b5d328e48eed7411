//! Page-based concurrent B+tree.
//!
//! Nodes live in buffer pool pages, one node per page, linked by page
//! ids. Descents use latch coupling: a child's latch is taken before any
//! ancestor is released, and ancestors are released early as soon as the
//! child is safe for the operation. All latches and pins a traversal
//! acquires are recorded in the caller's [`Transaction`] scratchpad and
//! released through one centralized routine.
//!
//! [`Transaction`]: crate::Transaction

mod internal;
mod iterator;
mod leaf;
mod node;
mod tree;

pub use iterator::IndexIterator;
pub use tree::BPlusTree;
