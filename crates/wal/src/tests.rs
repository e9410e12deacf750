use common::{Lsn, PageId, TxnId, INVALID_TXN_ID};
use storage::{DiskManager, Page, PAGE_SIZE};
use tempfile::TempDir;

use crate::{
    recover, FileWalStore, Wal, WalPayload, WalRecord, WalRecordType,
};

fn temp_wal() -> (Wal, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = FileWalStore::open(dir.path().join("wal.log")).unwrap();
    (Wal::new(Box::new(store)).unwrap(), dir)
}

fn page_write(page_id: PageId, lsn: Lsn, marker: u8, before: Option<Vec<u8>>) -> Vec<u8> {
    let mut page = Page::new(page_id);
    page.set_lsn(lsn);
    page.data[PAGE_SIZE - 1] = marker;
    WalPayload::PageWrite {
        page_id,
        before,
        after: page.data,
    }
    .encode()
    .unwrap()
}

fn image(page_id: PageId, lsn: Lsn, marker: u8) -> Vec<u8> {
    let mut page = Page::new(page_id);
    page.set_lsn(lsn);
    page.data[PAGE_SIZE - 1] = marker;
    page.data
}

#[test]
fn record_encoding_round_trips() {
    let record = WalRecord {
        lsn: Lsn(7),
        rtype: WalRecordType::Insert,
        txn_id: TxnId(3),
        data: vec![1, 2, 3, 4],
    };
    let bytes = record.encode().unwrap();
    let (decoded, consumed) = WalRecord::decode(&bytes).unwrap();
    assert_eq!(decoded, record);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn checksum_detects_corruption() {
    let record = WalRecord {
        lsn: Lsn(1),
        rtype: WalRecordType::Update,
        txn_id: TxnId(9),
        data: vec![0xAB; 16],
    };
    let mut bytes = record.encode().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(matches!(
        WalRecord::decode(&bytes),
        Err(common::DbError::Corruption(_))
    ));
}

#[test]
fn lsns_strictly_increase() {
    let (wal, _dir) = temp_wal();
    let a = wal.append(WalRecordType::Begin, TxnId(1), vec![]).unwrap();
    let b = wal.append(WalRecordType::Commit, TxnId(1), vec![]).unwrap();
    let c = wal.append(WalRecordType::Begin, TxnId(2), vec![]).unwrap();
    assert!(a < b && b < c);

    let records = wal.read_all().unwrap();
    for pair in records.windows(2) {
        assert!(pair[0].lsn < pair[1].lsn);
    }
}

#[test]
fn lsn_assignment_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal.log");
    {
        let wal = Wal::new(Box::new(FileWalStore::open(&path).unwrap())).unwrap();
        wal.append(WalRecordType::Begin, TxnId(1), vec![]).unwrap();
        wal.append(WalRecordType::Commit, TxnId(1), vec![]).unwrap();
        wal.flush_until(Lsn(2)).unwrap();
    }
    let wal = Wal::new(Box::new(FileWalStore::open(&path).unwrap())).unwrap();
    let next = wal.append(WalRecordType::Begin, TxnId(2), vec![]).unwrap();
    assert_eq!(next, Lsn(3));
}

#[test]
fn torn_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal.log");
    {
        let wal = Wal::new(Box::new(FileWalStore::open(&path).unwrap())).unwrap();
        wal.append(WalRecordType::Begin, TxnId(1), vec![1, 2, 3])
            .unwrap();
        wal.flush_until(Lsn(1)).unwrap();
    }
    // Simulate a crash mid-append.
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();

    let mut store = FileWalStore::open(&path).unwrap();
    let records = crate::WalStore::read_all(&mut store).unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn truncate_discards_records_but_keeps_lsns_monotone() {
    let (wal, _dir) = temp_wal();
    wal.append(WalRecordType::Begin, TxnId(1), vec![]).unwrap();
    wal.append(WalRecordType::Commit, TxnId(1), vec![]).unwrap();

    wal.truncate().unwrap();
    assert!(wal.read_all().unwrap().is_empty());

    let next = wal.append(WalRecordType::Begin, TxnId(2), vec![]).unwrap();
    assert_eq!(next, Lsn(3));
}

fn db_backed_wal(dir: &TempDir) -> crate::Wal {
    use buffer::BufferPoolManager;
    use std::sync::Arc;

    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, true).unwrap();
    let pool = Arc::new(BufferPoolManager::new(
        32,
        Arc::new(parking_lot::Mutex::new(disk)),
    ));
    for expected in 0..6u64 {
        let (page_id, _page) = pool.new_page().unwrap();
        assert_eq!(page_id, PageId(expected));
        pool.unpin_page(page_id, true).unwrap();
    }
    crate::DbWalStore::bootstrap(&pool).unwrap();
    let store = crate::DbWalStore::open(Arc::clone(&pool)).unwrap();
    Wal::new(Box::new(store)).unwrap()
}

#[test]
fn db_backed_store_chunks_page_image_records() {
    let dir = TempDir::new().unwrap();
    let wal = db_backed_wal(&dir);

    // A payload bigger than a page forces multi-chunk storage.
    let big = page_write(PageId(9), Lsn(1), 0x42, Some(vec![0xAB; PAGE_SIZE]));
    assert!(big.len() > PAGE_SIZE);
    wal.append(WalRecordType::Begin, TxnId(1), vec![]).unwrap();
    wal.append(WalRecordType::Insert, TxnId(1), big.clone()).unwrap();
    wal.append(WalRecordType::Commit, TxnId(1), vec![]).unwrap();

    let records = wal.read_all().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].rtype, WalRecordType::Insert);
    assert_eq!(records[1].data, big);
    for pair in records.windows(2) {
        assert!(pair[0].lsn < pair[1].lsn);
    }
}

#[test]
fn db_backed_store_truncate_and_lsn_persistence() {
    let dir = TempDir::new().unwrap();
    let wal = db_backed_wal(&dir);

    wal.append(WalRecordType::Begin, TxnId(1), vec![]).unwrap();
    wal.append(WalRecordType::Commit, TxnId(1), vec![]).unwrap();
    wal.truncate().unwrap();
    assert!(wal.read_all().unwrap().is_empty());

    let next = wal.append(WalRecordType::Begin, TxnId(2), vec![]).unwrap();
    assert_eq!(next, Lsn(3), "LSNs stay monotone after truncation");
}

#[test]
fn recovery_redoes_committed_work() {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();

    let records = vec![
        WalRecord {
            lsn: Lsn(1),
            rtype: WalRecordType::Begin,
            txn_id: TxnId(1),
            data: vec![],
        },
        WalRecord {
            lsn: Lsn(2),
            rtype: WalRecordType::Insert,
            txn_id: TxnId(1),
            data: page_write(PageId(0), Lsn(2), 0x77, None),
        },
        WalRecord {
            lsn: Lsn(3),
            rtype: WalRecordType::Commit,
            txn_id: TxnId(1),
            data: vec![],
        },
    ];

    // The dirty page never reached disk before the crash.
    let report = recover(&records, &mut disk).unwrap();
    assert_eq!(report.pages_redone, 1);
    assert!(report.loser_txns.is_empty());

    let mut page = Page::new(PageId(0));
    disk.read_page(PageId(0), &mut page).unwrap();
    assert_eq!(page.data[PAGE_SIZE - 1], 0x77);
}

#[test]
fn recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();

    let records = vec![
        WalRecord {
            lsn: Lsn(1),
            rtype: WalRecordType::Begin,
            txn_id: TxnId(1),
            data: vec![],
        },
        WalRecord {
            lsn: Lsn(2),
            rtype: WalRecordType::Insert,
            txn_id: TxnId(1),
            data: page_write(PageId(0), Lsn(2), 0x11, None),
        },
        WalRecord {
            lsn: Lsn(3),
            rtype: WalRecordType::Commit,
            txn_id: TxnId(1),
            data: vec![],
        },
    ];

    let first = recover(&records, &mut disk).unwrap();
    assert_eq!(first.pages_redone, 1);

    let second = recover(&records, &mut disk).unwrap();
    assert_eq!(second.pages_redone, 0);
    assert_eq!(second.pages_undone, 0);
}

#[test]
fn recovery_undoes_losers() {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();

    // Committed state: marker 0x01 at lsn 2.
    let committed = image(PageId(0), Lsn(2), 0x01);
    disk.write_page(PageId(0), &Page::from_bytes(committed.clone()).unwrap())
        .unwrap();

    // A transaction overwrote the page (marker 0x02) and never committed.
    let records = vec![
        WalRecord {
            lsn: Lsn(3),
            rtype: WalRecordType::Begin,
            txn_id: TxnId(5),
            data: vec![],
        },
        WalRecord {
            lsn: Lsn(4),
            rtype: WalRecordType::Update,
            txn_id: TxnId(5),
            data: page_write(PageId(0), Lsn(4), 0x02, Some(committed)),
        },
    ];

    let report = recover(&records, &mut disk).unwrap();
    assert_eq!(report.loser_txns, vec![TxnId(5)]);
    assert_eq!(report.pages_undone, 1);

    let mut page = Page::new(PageId(0));
    disk.read_page(PageId(0), &mut page).unwrap();
    assert_eq!(page.data[PAGE_SIZE - 1], 0x01, "before-image restored");
}

#[test]
fn checkpoint_resets_analysis() {
    let dir = TempDir::new().unwrap();
    let mut disk = DiskManager::open(dir.path().join("data.db")).unwrap();
    disk.write_magic(false, false).unwrap();

    let records = vec![
        WalRecord {
            lsn: Lsn(1),
            rtype: WalRecordType::Begin,
            txn_id: TxnId(1),
            data: vec![],
        },
        // The checkpoint says nothing is active: txn 1 must not be a loser.
        WalRecord {
            lsn: Lsn(2),
            rtype: WalRecordType::Checkpoint,
            txn_id: INVALID_TXN_ID,
            data: WalPayload::Checkpoint { active: vec![] }.encode().unwrap(),
        },
    ];

    let report = recover(&records, &mut disk).unwrap();
    assert!(report.loser_txns.is_empty());
}
