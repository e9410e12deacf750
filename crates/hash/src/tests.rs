use std::sync::Arc;

use buffer::BufferPoolManager;
use common::RowId;
use parking_lot::Mutex;
use storage::DiskManager;
use tempfile::TempDir;
use types::{DataType, Value};

use crate::HashIndex;

fn temp_index(key_type: DataType) -> (HashIndex, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();
    let pool = Arc::new(BufferPoolManager::new(64, Arc::new(Mutex::new(disk))));
    let index = HashIndex::create(pool, key_type).unwrap();
    (index, dir)
}

#[test]
fn insert_and_search_single_key() {
    let (index, _dir) = temp_index(DataType::Int);
    index.insert(&Value::Int(42), RowId(7)).unwrap();

    assert_eq!(index.search_all(&Value::Int(42)).unwrap(), vec![RowId(7)]);
    assert!(index.search_all(&Value::Int(43)).unwrap().is_empty());
}

#[test]
fn duplicate_keys_return_every_row_id() {
    let (index, _dir) = temp_index(DataType::Int);
    for rid in 1..=3u64 {
        index.insert(&Value::Int(42), RowId(rid)).unwrap();
    }
    let mut results = index.search_all(&Value::Int(42)).unwrap();
    results.sort();
    assert_eq!(results, vec![RowId(1), RowId(2), RowId(3)]);
}

#[test]
fn remove_deletes_one_specific_entry() {
    let (index, _dir) = temp_index(DataType::Int);
    index.insert(&Value::Int(1), RowId(10)).unwrap();
    index.insert(&Value::Int(1), RowId(20)).unwrap();

    assert!(index.remove(&Value::Int(1), RowId(10)).unwrap());
    assert_eq!(index.search_all(&Value::Int(1)).unwrap(), vec![RowId(20)]);
    assert!(!index.remove(&Value::Int(1), RowId(10)).unwrap());
}

#[test]
fn tombstones_do_not_break_probe_chains() {
    let (index, _dir) = temp_index(DataType::Int);
    // Fill enough to force collisions in the small initial table.
    for i in 0..12 {
        index.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    // Remove a few entries in the middle of probe chains.
    for i in [2, 5, 8] {
        assert!(index.remove(&Value::Int(i), RowId(i as u64 + 1)).unwrap());
    }
    // Everything else must remain reachable.
    for i in 0..12 {
        let expected = if [2, 5, 8].contains(&i) { 0 } else { 1 };
        assert_eq!(
            index.search_all(&Value::Int(i)).unwrap().len(),
            expected,
            "key {i}"
        );
    }
}

#[test]
fn grows_past_initial_capacity() {
    let (index, _dir) = temp_index(DataType::Int);
    for i in 0..500 {
        index.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    let stats = index.stats();
    assert_eq!(stats.entry_count, 500);
    assert!(stats.capacity >= 512, "capacity {}", stats.capacity);
    // Load factor stays under the resize threshold.
    assert!(stats.entry_count * 4 <= stats.capacity * 3);

    for i in (0..500).step_by(41) {
        assert_eq!(
            index.search_all(&Value::Int(i)).unwrap(),
            vec![RowId(i as u64 + 1)]
        );
    }
}

#[test]
fn shrinks_when_mostly_empty() {
    let (index, _dir) = temp_index(DataType::Int);
    for i in 0..200 {
        index.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    let grown = index.stats().capacity;
    for i in 0..195 {
        assert!(index.remove(&Value::Int(i), RowId(i as u64 + 1)).unwrap());
    }
    let stats = index.stats();
    assert!(stats.capacity < grown, "should shrink from {grown}");
    for i in 195..200 {
        assert_eq!(
            index.search_all(&Value::Int(i)).unwrap(),
            vec![RowId(i as u64 + 1)]
        );
    }
}

#[test]
fn text_keys() {
    let (index, _dir) = temp_index(DataType::Varchar);
    index
        .insert(&Value::Varchar("alice".into()), RowId(1))
        .unwrap();
    index
        .insert(&Value::Varchar("bob".into()), RowId(2))
        .unwrap();

    assert_eq!(
        index.search_all(&Value::Varchar("alice".into())).unwrap(),
        vec![RowId(1)]
    );
    assert!(index
        .search_all(&Value::Varchar("carol".into()))
        .unwrap()
        .is_empty());
}

#[test]
fn oversized_keys_are_rejected() {
    let (index, _dir) = temp_index(DataType::Text);
    let long = "x".repeat(500);
    let err = index.insert(&Value::Text(long), RowId(1)).unwrap_err();
    assert!(matches!(err, common::DbError::Semantic(_)));
}

#[test]
fn persistence_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    let meta;
    {
        let mut disk = DiskManager::open(&path).unwrap();
        disk.write_magic(false, false).unwrap();
        let pool = Arc::new(BufferPoolManager::new(32, Arc::new(Mutex::new(disk))));
        let index = HashIndex::create(Arc::clone(&pool), DataType::Int).unwrap();
        for i in 0..50 {
            index.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
        }
        meta = index.root_page_id();
        pool.flush_all_pages().unwrap();
    }
    {
        let disk = DiskManager::open(&path).unwrap();
        let pool = Arc::new(BufferPoolManager::new(32, Arc::new(Mutex::new(disk))));
        let index = HashIndex::open(pool, DataType::Int, meta).unwrap();
        for i in 0..50 {
            assert_eq!(
                index.search_all(&Value::Int(i)).unwrap(),
                vec![RowId(i as u64 + 1)],
                "key {i}"
            );
        }
    }
}
