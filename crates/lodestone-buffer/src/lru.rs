//! Page replacement policy for the buffer pool.

use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use std::hash::Hash;

/// Trait for page replacement policies.
pub trait Replacer<T>: Send + Sync {
    /// Records `value` as just used. Re-inserting an existing value moves
    /// it to the most-recent position.
    fn insert(&self, value: T);

    /// Pops and returns the least recently inserted value, or None when
    /// empty.
    fn victim(&self) -> Option<T>;

    /// Removes `value`. Returns true if it was present.
    fn erase(&self, value: &T) -> bool;

    /// Returns the number of eviction candidates.
    fn len(&self) -> usize;

    /// Returns true if there are no eviction candidates.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU replacement policy.
///
/// A linked hash map keeps candidates in recency order: most recent at
/// the back, victim at the front. All operations are O(1) and guarded by
/// a single internal mutex.
pub struct LruReplacer<T: Hash + Eq> {
    inner: Mutex<LinkedHashMap<T, ()>>,
}

impl<T: Hash + Eq> LruReplacer<T> {
    /// Creates an empty replacer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LinkedHashMap::new()),
        }
    }
}

impl<T: Hash + Eq> Default for LruReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq + Copy + Send + Sync> Replacer<T> for LruReplacer<T> {
    fn insert(&self, value: T) {
        let mut inner = self.inner.lock();
        // Remove-then-insert moves an existing entry to the back.
        inner.remove(&value);
        inner.insert(value, ());
    }

    fn victim(&self) -> Option<T> {
        self.inner.lock().pop_front().map(|(value, ())| value)
    }

    fn erase(&self, value: &T) -> bool {
        self.inner.lock().remove(value).is_some()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
