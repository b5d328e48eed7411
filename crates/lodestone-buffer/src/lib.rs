//! Buffer pool management for Lodestone.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU eviction policy over unpinned frames
//! - Extendible hash directory mapping page ids to frames
//! - Pin counting and per-frame reader/writer latches for concurrent access
//! - Dirty page tracking with flush-on-evict write-back

mod extendible;
mod frame;
mod latch;
mod lru;
mod pool;

pub use extendible::ExtendibleHashTable;
pub use frame::PageFrame;
pub use latch::RwLatch;
pub use lru::{LruReplacer, Replacer};
pub use pool::{BufferPoolManager, BufferPoolStats};
