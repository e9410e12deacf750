use common::{PageId, RowId, TxnId, INVALID_PAGE_ID, INVALID_TXN_ID};
use tempfile::TempDir;

use crate::{
    DiskManager, Page, PageType, PAGE_HEADER_SIZE, PAGE_SIZE, RECORD_HEADER_SIZE, SLOT_SIZE,
};

fn temp_disk() -> (DiskManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    (disk, dir)
}

#[test]
fn header_fields_round_trip() {
    let mut page = Page::new(PageId(7));
    page.set_page_type(PageType::Table);
    page.set_next_page_id(PageId(8));
    page.set_slot_count(3);
    page.set_lsn(common::Lsn(42));

    assert_eq!(page.page_id(), PageId(7));
    assert_eq!(page.page_type().unwrap(), PageType::Table);
    assert_eq!(page.next_page_id(), PageId(8));
    assert_eq!(page.slot_count(), 3);
    assert_eq!(page.lsn(), common::Lsn(42));
}

#[test]
fn new_page_has_no_next() {
    let page = Page::new(PageId(0));
    assert_eq!(page.next_page_id(), INVALID_PAGE_ID);
    assert_eq!(page.free_space_ptr() as usize, PAGE_HEADER_SIZE);
}

#[test]
fn insert_and_read_records() {
    let mut page = Page::new(PageId(0));
    page.set_page_type(PageType::Table);

    let slot_a = page
        .insert_record(RowId(1), TxnId(10), b"alice")
        .unwrap()
        .unwrap();
    let slot_b = page
        .insert_record(RowId(2), TxnId(10), b"bob")
        .unwrap()
        .unwrap();

    assert_eq!(slot_a, 0);
    assert_eq!(slot_b, 1);
    assert_eq!(page.record_payload(slot_a).unwrap(), b"alice");
    assert_eq!(page.record_payload(slot_b).unwrap(), b"bob");

    let header = page.record_header(slot_a).unwrap();
    assert_eq!(header.row_id, RowId(1));
    assert_eq!(header.create_txn, TxnId(10));
    assert_eq!(header.delete_txn, INVALID_TXN_ID);
}

#[test]
fn free_space_accounts_for_slots_and_tuples() {
    let mut page = Page::new(PageId(0));
    let before = page.free_space();
    page.insert_record(RowId(1), TxnId(1), b"xyz").unwrap();
    let tuple = RECORD_HEADER_SIZE + 3;
    assert_eq!(page.free_space(), before - tuple - SLOT_SIZE);
}

#[test]
fn insert_fails_cleanly_when_full() {
    let mut page = Page::new(PageId(0));
    let payload = vec![0u8; 1000];
    let mut inserted = 0u64;
    while page
        .insert_record(RowId(inserted + 1), TxnId(1), &payload)
        .unwrap()
        .is_some()
    {
        inserted += 1;
    }
    assert!(inserted >= 3);
    // The page is intact after the failed insert.
    assert_eq!(page.live_slots().unwrap().len() as u64, inserted);
}

#[test]
fn update_in_place_respects_allocation() {
    let mut page = Page::new(PageId(0));
    let slot = page
        .insert_record(RowId(1), TxnId(1), b"0123456789")
        .unwrap()
        .unwrap();

    assert!(page.update_record(slot, b"short", TxnId(2)).unwrap());
    assert_eq!(page.record_payload(slot).unwrap(), b"short");

    // A larger payload does not fit in the original allocation.
    assert!(!page
        .update_record(slot, &vec![0u8; 64], TxnId(2))
        .unwrap());
}

#[test]
fn logical_delete_then_undelete() {
    let mut page = Page::new(PageId(0));
    let slot = page
        .insert_record(RowId(1), TxnId(1), b"row")
        .unwrap()
        .unwrap();

    page.delete_record(slot, TxnId(5)).unwrap();
    assert!(page.record_header(slot).unwrap().is_deleted());
    assert_eq!(page.record_header(slot).unwrap().delete_txn, TxnId(5));

    page.undelete_record(slot).unwrap();
    assert!(!page.record_header(slot).unwrap().is_deleted());
}

#[test]
fn compact_reclaims_deleted_records() {
    let mut page = Page::new(PageId(0));
    for i in 0..10u64 {
        page.insert_record(RowId(i + 1), TxnId(1), b"payload")
            .unwrap()
            .unwrap();
    }
    for slot in [1u16, 3, 5] {
        page.delete_record(slot, TxnId(2)).unwrap();
    }
    page.tombstone_record(7).unwrap();

    let before_space = page.free_space();
    let removed = page.compact(TxnId(100)).unwrap();
    assert_eq!(removed, 4);
    assert_eq!(page.slot_count(), 6);
    assert!(page.free_space() > before_space);

    // Survivors keep their row ids.
    let ids: Vec<u64> = page
        .live_slots()
        .unwrap()
        .iter()
        .map(|s| page.record_header(*s).unwrap().row_id.0)
        .collect();
    assert_eq!(ids, vec![1, 3, 5, 7, 9, 10]);
}

#[test]
fn compact_keeps_recent_deletes() {
    let mut page = Page::new(PageId(0));
    page.insert_record(RowId(1), TxnId(1), b"row").unwrap();
    page.delete_record(0, TxnId(50)).unwrap();

    // Horizon below the deleting txn: the record must survive compaction
    // so concurrent readers at the horizon still see it.
    let removed = page.compact(TxnId(10)).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(page.slot_count(), 1);
}

#[test]
fn disk_magic_round_trip() {
    let (mut disk, _dir) = temp_disk();
    assert!(!disk.is_initialized().unwrap());

    disk.write_magic(true, false).unwrap();
    let (catalog_in_db, wal_in_db) = disk.verify_and_parse_magic().unwrap();
    assert!(catalog_in_db);
    assert!(!wal_in_db);
}

#[test]
fn disk_rejects_foreign_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    std::fs::write(&path, vec![0xAAu8; 8192]).unwrap();

    let mut disk = DiskManager::open(&path).unwrap();
    let err = disk.verify_and_parse_magic().unwrap_err();
    assert!(matches!(err, common::DbError::Corruption(_)));
}

#[test]
fn disk_page_round_trip() {
    let (mut disk, _dir) = temp_disk();
    disk.write_magic(false, false).unwrap();

    let page_id = disk.allocate_page().unwrap();
    let mut page = Page::new(page_id);
    page.set_page_type(PageType::Table);
    page.data[PAGE_SIZE - 1] = 0xCD;
    disk.write_page(page_id, &page).unwrap();

    let mut loaded = Page::new(page_id);
    disk.read_page(page_id, &mut loaded).unwrap();
    assert_eq!(loaded.page_type().unwrap(), PageType::Table);
    assert_eq!(loaded.data[PAGE_SIZE - 1], 0xCD);
}

#[test]
fn read_of_unallocated_page_fails() {
    let (mut disk, _dir) = temp_disk();
    disk.write_magic(false, false).unwrap();
    let mut page = Page::new(PageId(9));
    assert!(disk.read_page(PageId(9), &mut page).is_err());
}

#[test]
fn deallocated_pages_are_reused() {
    let (mut disk, _dir) = temp_disk();
    disk.write_magic(false, false).unwrap();

    let a = disk.allocate_page().unwrap();
    let b = disk.allocate_page().unwrap();
    assert_ne!(a, b);

    disk.deallocate_page(a);
    let c = disk.allocate_page().unwrap();
    assert_eq!(c, a);
}

#[test]
fn num_pages_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    {
        let mut disk = DiskManager::open(&path).unwrap();
        disk.write_magic(false, false).unwrap();
        disk.allocate_page().unwrap();
        disk.allocate_page().unwrap();
        disk.flush().unwrap();
    }
    let disk = DiskManager::open(&path).unwrap();
    assert_eq!(disk.num_pages(), 2);
}
