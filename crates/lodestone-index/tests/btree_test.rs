//! B+tree integration tests: multi-level structure, random churn, and
//! cross-thread workloads against a shared buffer pool.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

use lodestone_buffer::BufferPoolManager;
use lodestone_common::{PageId, Rid, StorageConfig};
use lodestone_disk::DiskManager;
use lodestone_index::{BPlusTree, HeaderPage, OrdComparator, Transaction};

fn setup(pool_size: usize) -> (Arc<BufferPoolManager>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
        ..Default::default()
    };
    let disk = Arc::new(DiskManager::new(&config).unwrap());
    let pool = Arc::new(BufferPoolManager::new(pool_size, disk));
    HeaderPage::create(&pool).unwrap();
    (pool, dir)
}

fn rid(key: u64) -> Rid {
    Rid::new(PageId(key as u32), key as u32)
}

fn assert_no_pins(pool: &BufferPoolManager) {
    assert_eq!(
        pool.stats().pinned_frames,
        0,
        "pins left behind after operations settled"
    );
}

#[test]
fn test_scan_is_sorted_and_complete_after_random_inserts() {
    let (pool, _dir) = setup(128);
    let tree = BPlusTree::new("scan", Arc::clone(&pool), OrdComparator, PageId::INVALID)
        .with_node_capacities(4, 4);
    let txn = Transaction::new();

    let mut keys: Vec<u64> = (0..500).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    keys.shuffle(&mut rng);

    for &key in &keys {
        tree.insert(key, rid(key), &txn).unwrap();
    }

    let scanned: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0u64..500).collect::<Vec<_>>());
    assert_no_pins(&pool);
}

#[test]
fn test_random_churn_tracks_reference_model() {
    use std::collections::BTreeMap;

    let (pool, _dir) = setup(128);
    let tree = BPlusTree::new("churn", Arc::clone(&pool), OrdComparator, PageId::INVALID)
        .with_node_capacities(3, 4);
    let txn = Transaction::new();
    let mut model: BTreeMap<u64, Rid> = BTreeMap::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    let mut ops: Vec<(bool, u64)> = Vec::new();
    for round in 0..4 {
        for key in 0..120u64 {
            ops.push((true, key * 4 + round));
        }
        for key in 0..60u64 {
            ops.push((false, key * 7 % 480));
        }
    }
    ops.shuffle(&mut rng);

    for (is_insert, key) in ops {
        if is_insert {
            match tree.insert(key, rid(key), &txn) {
                Ok(()) => {
                    assert!(model.insert(key, rid(key)).is_none());
                }
                Err(lodestone_common::LodeError::DuplicateKey) => {
                    assert!(model.contains_key(&key));
                }
                Err(e) => panic!("unexpected insert error: {e}"),
            }
        } else {
            tree.remove(&key, &txn).unwrap();
            model.remove(&key);
        }
    }

    let scanned: Vec<(u64, Rid)> = tree.iter().unwrap().collect();
    let expected: Vec<(u64, Rid)> = model.into_iter().collect();
    assert_eq!(scanned, expected);
    assert_no_pins(&pool);
}

#[test]
fn test_point_queries_match_scan() {
    let (pool, _dir) = setup(128);
    let tree = BPlusTree::new("points", Arc::clone(&pool), OrdComparator, PageId::INVALID)
        .with_node_capacities(3, 3);
    let txn = Transaction::new();

    for key in (0u64..300).step_by(3) {
        tree.insert(key, rid(key), &txn).unwrap();
    }

    for key in 0u64..300 {
        let expected = if key % 3 == 0 { Some(rid(key)) } else { None };
        assert_eq!(tree.get_value(&key, &txn).unwrap(), expected);
    }
    assert_no_pins(&pool);
}

#[test]
fn test_iterators_hold_pins_until_dropped() {
    let (pool, _dir) = setup(64);
    let tree = BPlusTree::new("pins", Arc::clone(&pool), OrdComparator, PageId::INVALID)
        .with_node_capacities(4, 4);
    let txn = Transaction::new();

    for key in 0u64..50 {
        tree.insert(key, rid(key), &txn).unwrap();
    }

    let mut iter = tree.iter().unwrap();
    assert!(!iter.is_end());
    assert_eq!(pool.stats().pinned_frames, 1);

    // Partially consumed iterator still pins exactly one leaf.
    for _ in 0..3 {
        iter.next();
    }
    assert_eq!(pool.stats().pinned_frames, 1);

    drop(iter);
    assert_no_pins(&pool);

    // A fully drained iterator releases its pin by itself.
    let mut iter = tree.iter().unwrap();
    let mut count = 0;
    while iter.next().is_some() {
        count += 1;
    }
    assert_eq!(count, 50);
    assert!(iter.is_end());
    assert_no_pins(&pool);
}

#[test]
fn test_tree_survives_pool_pressure() {
    // Pool far smaller than the tree: every operation churns pages
    // through eviction and the data must still read back intact. Sized
    // to hold a worst-case retained descent path plus split scratch.
    let (pool, _dir) = setup(16);
    let tree = BPlusTree::new("pressure", Arc::clone(&pool), OrdComparator, PageId::INVALID)
        .with_node_capacities(3, 3);
    let txn = Transaction::new();

    for key in 0u64..400 {
        tree.insert(key, rid(key), &txn).unwrap();
    }
    for key in 0u64..400 {
        assert_eq!(tree.get_value(&key, &txn).unwrap(), Some(rid(key)));
    }
    let scanned: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0u64..400).collect::<Vec<_>>());
    assert_no_pins(&pool);
}

#[test]
fn test_concurrent_disjoint_inserts_then_scan() {
    // N threads each insert a disjoint key range; a full scan on one
    // thread yields the union in order, with no pins left anywhere.
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 200;

    let (pool, _dir) = setup(256);
    let tree = Arc::new(
        BPlusTree::new("conc", Arc::clone(&pool), OrdComparator, PageId::INVALID)
            .with_node_capacities(4, 4),
    );

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new();
            let base = t * PER_THREAD;
            for key in base..base + PER_THREAD {
                tree.insert(key, rid(key), &txn).unwrap();
                assert!(txn.is_clean());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let scanned: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    assert_no_pins(&pool);
}

#[test]
fn test_concurrent_readers_and_writers() {
    const WRITERS: u64 = 2;
    const READERS: u64 = 2;
    const PER_WRITER: u64 = 150;

    let (pool, _dir) = setup(256);
    let tree = Arc::new(
        BPlusTree::new("rw", Arc::clone(&pool), OrdComparator, PageId::INVALID)
            .with_node_capacities(4, 4),
    );

    // Seed keys so readers always have something to find.
    {
        let txn = Transaction::new();
        for key in 10_000u64..10_100 {
            tree.insert(key, rid(key), &txn).unwrap();
        }
    }

    let mut handles = Vec::new();
    for t in 0..WRITERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new();
            let base = t * PER_WRITER;
            for key in base..base + PER_WRITER {
                tree.insert(key, rid(key), &txn).unwrap();
            }
        }));
    }
    for _ in 0..READERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new();
            for round in 0..300u64 {
                let key = 10_000 + (round % 100);
                assert_eq!(tree.get_value(&key, &txn).unwrap(), Some(rid(key)));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let txn = Transaction::new();
    for key in 0..WRITERS * PER_WRITER {
        assert_eq!(tree.get_value(&key, &txn).unwrap(), Some(rid(key)));
    }
    assert_no_pins(&pool);
}

#[test]
fn test_concurrent_removes_over_disjoint_ranges() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 100;

    let (pool, _dir) = setup(256);
    let tree = Arc::new(
        BPlusTree::new("rm", Arc::clone(&pool), OrdComparator, PageId::INVALID)
            .with_node_capacities(4, 4),
    );

    {
        let txn = Transaction::new();
        for key in 0..THREADS * PER_THREAD {
            tree.insert(key, rid(key), &txn).unwrap();
        }
    }

    // Each thread removes the odd keys of its range.
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let txn = Transaction::new();
            let base = t * PER_THREAD;
            for key in (base..base + PER_THREAD).filter(|k| k % 2 == 1) {
                tree.remove(&key, &txn).unwrap();
                assert!(txn.is_clean());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let scanned: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    let expected: Vec<u64> = (0..THREADS * PER_THREAD).filter(|k| k % 2 == 0).collect();
    assert_eq!(scanned, expected);
    assert_no_pins(&pool);
}

#[test]
fn test_persisted_tree_readable_after_flush_and_reopen() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
        ..Default::default()
    };

    {
        let disk = Arc::new(DiskManager::new(&config).unwrap());
        let pool = Arc::new(BufferPoolManager::new(64, disk));
        HeaderPage::create(&pool).unwrap();
        let tree = BPlusTree::new("persist", Arc::clone(&pool), OrdComparator, PageId::INVALID)
            .with_node_capacities(4, 4);
        let txn = Transaction::new();
        for key in 0u64..200 {
            tree.insert(key, rid(key), &txn).unwrap();
        }
        pool.flush_all().unwrap();
    }

    // Fresh pool over the same file; the tree comes back via the header
    // page record.
    let disk = Arc::new(DiskManager::new(&config).unwrap());
    let pool = Arc::new(BufferPoolManager::new(64, disk));
    let tree = BPlusTree::<u64, OrdComparator>::open("persist", Arc::clone(&pool), OrdComparator)
        .unwrap()
        .with_node_capacities(4, 4);
    let txn = Transaction::new();

    for key in 0u64..200 {
        assert_eq!(tree.get_value(&key, &txn).unwrap(), Some(rid(key)));
    }
    let scanned: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0u64..200).collect::<Vec<_>>());
    assert_no_pins(&pool);
}
