//! Extendible hash table used as the buffer pool's page directory.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Number of entries a bucket holds before it must split.
const DEFAULT_BUCKET_SIZE: usize = 64;

/// Concurrent extendible hash table.
///
/// The directory is a vector of bucket references of length
/// 2^global_depth; several slots may share one bucket (a bucket with
/// local depth d is referenced by 2^(global-d) slots). On overflow a
/// bucket splits, doubling the directory when its local depth would
/// exceed the global depth. The directory never shrinks.
///
/// The directory mutex guards slot and depth mutations and bucket
/// lookup; each bucket has its own mutex for its contents. `find` and
/// `remove` drop the directory lock before taking the bucket lock;
/// `insert` holds the directory lock across the whole split loop because
/// the directory itself may grow.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    dir: Mutex<Directory<K, V>>,
}

struct Directory<K, V> {
    global_depth: u32,
    slots: Vec<Arc<Bucket<K, V>>>,
    num_buckets: usize,
}

struct Bucket<K, V> {
    inner: Mutex<BucketInner<K, V>>,
}

struct BucketInner<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, items: Vec<(K, V)>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BucketInner { local_depth, items }),
        })
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table with the default bucket size.
    pub fn new() -> Self {
        Self::with_bucket_size(DEFAULT_BUCKET_SIZE)
    }

    /// Creates a table whose buckets hold `bucket_size` entries.
    pub fn with_bucket_size(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            dir: Mutex::new(Directory {
                global_depth: 0,
                slots: vec![Bucket::new(0, Vec::new())],
                num_buckets: 1,
            }),
        }
    }

    fn hash_key(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn slot_index(hash: u64, global_depth: u32) -> usize {
        (hash as usize) & ((1usize << global_depth) - 1)
    }

    /// Returns the current global depth.
    pub fn global_depth(&self) -> u32 {
        self.dir.lock().global_depth
    }

    /// Returns the local depth of the bucket at directory slot
    /// `slot_index`, or None if the slot is out of range.
    pub fn local_depth(&self, slot_index: usize) -> Option<u32> {
        let dir = self.dir.lock();
        let bucket = Arc::clone(dir.slots.get(slot_index)?);
        drop(dir);
        let local_depth = bucket.inner.lock().local_depth;
        Some(local_depth)
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.dir.lock().num_buckets
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        let dir = self.dir.lock();
        let mut seen: Vec<*const Bucket<K, V>> = Vec::with_capacity(dir.num_buckets);
        let mut total = 0;
        for bucket in &dir.slots {
            let ptr = Arc::as_ptr(bucket);
            if !seen.contains(&ptr) {
                seen.push(ptr);
                total += bucket.inner.lock().items.len();
            }
        }
        total
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the value for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let hash = Self::hash_key(key);
        let dir = self.dir.lock();
        let bucket = Arc::clone(&dir.slots[Self::slot_index(hash, dir.global_depth)]);
        drop(dir);

        let inner = bucket.inner.lock();
        inner
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Removes the entry for `key`. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let hash = Self::hash_key(key);
        let dir = self.dir.lock();
        let bucket = Arc::clone(&dir.slots[Self::slot_index(hash, dir.global_depth)]);
        drop(dir);

        let mut inner = bucket.inner.lock();
        match inner.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                inner.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces the entry for `key`.
    ///
    /// Splits the routed bucket as often as needed until it has room,
    /// doubling the directory whenever a bucket's local depth would
    /// exceed the global depth.
    pub fn insert(&self, key: K, value: V) {
        let hash = Self::hash_key(&key);
        let mut dir = self.dir.lock();

        loop {
            let idx = Self::slot_index(hash, dir.global_depth);
            let bucket = Arc::clone(&dir.slots[idx]);
            let mut inner = bucket.inner.lock();

            if let Some(slot) = inner.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if inner.items.len() < self.bucket_size {
                inner.items.push((key, value));
                return;
            }

            // Overflow: split this bucket and retry.
            let new_depth = inner.local_depth + 1;
            if new_depth > dir.global_depth {
                // Double the directory by appending a copy of itself, so
                // every pre-existing slot pair points at the same bucket.
                let doubled: Vec<_> = dir.slots.clone();
                dir.slots.extend(doubled);
                dir.global_depth += 1;
                tracing::debug!(
                    global_depth = dir.global_depth,
                    "extendible directory doubled"
                );
            }

            inner.local_depth = new_depth;
            let split_bit = new_depth - 1;

            // Entries whose hash has the new-depth bit set move to the
            // new bucket.
            let mut stay = Vec::new();
            let mut moved = Vec::new();
            for item in inner.items.drain(..) {
                if (Self::hash_key(&item.0) >> split_bit) & 1 == 1 {
                    moved.push(item);
                } else {
                    stay.push(item);
                }
            }
            inner.items = stay;
            drop(inner);

            let new_bucket = Bucket::new(new_depth, moved);
            for (slot_idx, slot) in dir.slots.iter_mut().enumerate() {
                if Arc::ptr_eq(slot, &bucket) && (slot_idx >> split_bit) & 1 == 1 {
                    *slot = Arc::clone(&new_bucket);
                }
            }
            dir.num_buckets += 1;
        }
    }
}

impl<K, V> Default for ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
