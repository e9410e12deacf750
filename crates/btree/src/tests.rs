use std::sync::Arc;

use buffer::BufferPoolManager;
use common::RowId;
use parking_lot::Mutex;
use storage::DiskManager;
use tempfile::TempDir;
use types::{DataType, Value};

use crate::GenericBPlusTree;

fn temp_tree(unique: bool, max_keys: usize) -> (GenericBPlusTree, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();
    let pool = Arc::new(BufferPoolManager::new(64, Arc::new(Mutex::new(disk))));
    let tree = GenericBPlusTree::create(pool, DataType::Int, unique, max_keys).unwrap();
    (tree, dir)
}

#[test]
fn insert_then_search() {
    let (tree, _dir) = temp_tree(true, 4);
    for i in [5, 1, 9, 3, 7] {
        assert!(tree.insert(&Value::Int(i), RowId(i as u64 * 10)).unwrap());
    }
    for i in [1, 3, 5, 7, 9] {
        assert_eq!(
            tree.search(&Value::Int(i)).unwrap(),
            Some(RowId(i as u64 * 10)),
            "key {i}"
        );
    }
    assert_eq!(tree.search(&Value::Int(2)).unwrap(), None);
}

#[test]
fn unique_rejects_duplicates() {
    let (tree, _dir) = temp_tree(true, 4);
    assert!(tree.insert(&Value::Int(5), RowId(1)).unwrap());
    assert!(!tree.insert(&Value::Int(5), RowId(2)).unwrap());
    // The original entry is untouched.
    assert_eq!(tree.search(&Value::Int(5)).unwrap(), Some(RowId(1)));
}

#[test]
fn non_unique_keeps_duplicates_in_row_order() {
    let (tree, _dir) = temp_tree(false, 4);
    for rid in [30u64, 10, 20] {
        assert!(tree.insert(&Value::Int(7), RowId(rid)).unwrap());
    }
    // Plenty of other keys to force splits around the duplicate run.
    for i in 0..50 {
        tree.insert(&Value::Int(100 + i), RowId(1000 + i as u64))
            .unwrap();
    }
    assert_eq!(
        tree.search_all(&Value::Int(7)).unwrap(),
        vec![RowId(10), RowId(20), RowId(30)]
    );
}

#[test]
fn splits_keep_order_over_many_keys() {
    let (tree, _dir) = temp_tree(true, 4);
    for i in 0..500 {
        assert!(tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap());
    }
    for i in (0..500).step_by(37) {
        assert_eq!(tree.search(&Value::Int(i)).unwrap(), Some(RowId(i as u64 + 1)));
    }
    let stats = tree.stats().unwrap();
    assert_eq!(stats.key_count, 500);
    assert!(stats.height >= 3, "height {}", stats.height);
    assert!(stats.internal_pages > 0);
}

#[test]
fn range_search_is_inclusive_and_ordered() {
    let (tree, _dir) = temp_tree(true, 16);
    for i in 1..=1000 {
        tree.insert(&Value::Int(i), RowId(i as u64)).unwrap();
    }
    let results = tree
        .range_search(Some(&Value::Int(100)), Some(&Value::Int(200)))
        .unwrap();
    assert_eq!(results.len(), 101);
    assert_eq!(results.first().unwrap().0, Value::Int(100));
    assert_eq!(results.last().unwrap().0, Value::Int(200));
    for pair in results.windows(2) {
        assert!(pair[0].0.sql_cmp(&pair[1].0).unwrap().is_lt());
    }
}

#[test]
fn open_ended_ranges() {
    let (tree, _dir) = temp_tree(true, 8);
    for i in 1..=20 {
        tree.insert(&Value::Int(i), RowId(i as u64)).unwrap();
    }
    assert_eq!(
        tree.range_search(None, Some(&Value::Int(5))).unwrap().len(),
        5
    );
    assert_eq!(
        tree.range_search(Some(&Value::Int(16)), None).unwrap().len(),
        5
    );
    assert_eq!(tree.range_search(None, None).unwrap().len(), 20);
}

#[test]
fn remove_from_leaf_without_underflow() {
    let (tree, _dir) = temp_tree(true, 8);
    for i in 0..8 {
        tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    assert!(tree.remove(&Value::Int(3)).unwrap());
    assert!(!tree.remove(&Value::Int(3)).unwrap());
    assert_eq!(tree.search(&Value::Int(3)).unwrap(), None);
    assert_eq!(tree.stats().unwrap().key_count, 7);
}

#[test]
fn remove_everything_collapses_the_tree() {
    let (tree, _dir) = temp_tree(true, 4);
    for i in 0..100 {
        tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    for i in 0..100 {
        assert!(tree.remove(&Value::Int(i)).unwrap(), "remove {i}");
    }
    for i in 0..100 {
        assert_eq!(tree.search(&Value::Int(i)).unwrap(), None);
    }
    let stats = tree.stats().unwrap();
    assert_eq!(stats.key_count, 0);
    assert_eq!(stats.height, 1, "root should collapse back to a leaf");
}

#[test]
fn remove_interleaved_with_search() {
    let (tree, _dir) = temp_tree(true, 4);
    for i in 0..200 {
        tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    // Remove every even key.
    for i in (0..200).step_by(2) {
        assert!(tree.remove(&Value::Int(i)).unwrap());
    }
    for i in 0..200 {
        let expected = if i % 2 == 0 { None } else { Some(RowId(i as u64 + 1)) };
        assert_eq!(tree.search(&Value::Int(i)).unwrap(), expected, "key {i}");
    }
    let results = tree.range_search(Some(&Value::Int(0)), Some(&Value::Int(199))).unwrap();
    assert_eq!(results.len(), 100);
}

#[test]
fn remove_specific_duplicate_entry() {
    let (tree, _dir) = temp_tree(false, 4);
    for rid in 1..=5u64 {
        tree.insert(&Value::Int(42), RowId(rid)).unwrap();
    }
    assert!(tree.remove_entry(&Value::Int(42), Some(RowId(3))).unwrap());
    assert_eq!(
        tree.search_all(&Value::Int(42)).unwrap(),
        vec![RowId(1), RowId(2), RowId(4), RowId(5)]
    );
    assert!(!tree.remove_entry(&Value::Int(42), Some(RowId(3))).unwrap());
}

#[test]
fn root_page_id_changes_on_root_split() {
    let (tree, _dir) = temp_tree(true, 2);
    let before = tree.root_page_id();
    for i in 0..10 {
        tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    assert_ne!(tree.root_page_id(), before, "root split must change the root id");
}

#[test]
fn text_keys_sort_lexicographically() {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();
    let pool = Arc::new(BufferPoolManager::new(32, Arc::new(Mutex::new(disk))));
    let tree = GenericBPlusTree::create(pool, DataType::Varchar, false, 4).unwrap();

    for (i, name) in ["pear", "apple", "mango", "banana", "cherry"].iter().enumerate() {
        tree.insert(&Value::Varchar(name.to_string()), RowId(i as u64 + 1))
            .unwrap();
    }
    let results = tree
        .range_search(
            Some(&Value::Varchar("apple".into())),
            Some(&Value::Varchar("mango".into())),
        )
        .unwrap();
    let names: Vec<String> = results.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(names, vec!["apple", "banana", "cherry", "mango"]);
}

#[test]
fn reopen_from_persisted_root() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    let root;
    {
        let mut disk = DiskManager::open(&path).unwrap();
        disk.write_magic(false, false).unwrap();
        let pool = Arc::new(BufferPoolManager::new(32, Arc::new(Mutex::new(disk))));
        let tree = GenericBPlusTree::create(Arc::clone(&pool), DataType::Int, true, 4).unwrap();
        for i in 0..50 {
            tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
        }
        root = tree.root_page_id();
        pool.flush_all_pages().unwrap();
    }
    {
        let disk = DiskManager::open(&path).unwrap();
        let pool = Arc::new(BufferPoolManager::new(32, Arc::new(Mutex::new(disk))));
        let tree = GenericBPlusTree::open(pool, DataType::Int, true, 4, root);
        for i in 0..50 {
            assert_eq!(tree.search(&Value::Int(i)).unwrap(), Some(RowId(i as u64 + 1)));
        }
    }
}

#[test]
fn stats_track_key_bytes() {
    let (tree, _dir) = temp_tree(true, 8);
    for i in 0..10 {
        tree.insert(&Value::Int(i), RowId(i as u64 + 1)).unwrap();
    }
    let stats = tree.stats().unwrap();
    assert_eq!(stats.key_count, 10);
    // Int keys encode to 5 bytes (tag + 4 payload).
    assert!(stats.total_key_bytes >= 50);
    assert_eq!(stats.leaf_pages, tree.stats().unwrap().leaf_pages);
}
