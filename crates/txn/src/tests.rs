use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{PageId, Row, RowId, TxnId};
use tempfile::TempDir;
use types::Value;
use wal::{FileWalStore, Wal, WalRecordType};

use crate::{LockMode, LockTable, TransactionManager, TxnState, UndoKind, UndoRecord};

fn temp_manager() -> (TransactionManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = FileWalStore::open(dir.path().join("wal.log")).unwrap();
    let wal = Arc::new(Wal::new(Box::new(store)).unwrap());
    (TransactionManager::new(wal), dir)
}

fn sample_undo(page: u64) -> UndoRecord {
    UndoRecord {
        kind: UndoKind::Update,
        table_name: "users".into(),
        page_id: PageId(page),
        slot: 0,
        before_image: Some(Row::new(vec![Value::Int(1)])),
        row_id: RowId(1),
    }
}

#[test]
fn begin_assigns_increasing_ids() {
    let (mgr, _dir) = temp_manager();
    let a = mgr.begin().unwrap();
    let b = mgr.begin().unwrap();
    assert!(a < b);
    assert_eq!(mgr.state(a), TxnState::Active);
}

#[test]
fn commit_writes_and_flushes_wal() {
    let (mgr, _dir) = temp_manager();
    let txn = mgr.begin().unwrap();
    mgr.commit(txn).unwrap();
    assert_eq!(mgr.state(txn), TxnState::Committed);

    let records = mgr.wal().read_all().unwrap();
    let types: Vec<WalRecordType> = records.iter().map(|r| r.rtype).collect();
    assert_eq!(types, vec![WalRecordType::Begin, WalRecordType::Commit]);
    // The COMMIT record outranks every record of the transaction.
    assert!(records[1].lsn > records[0].lsn);
}

#[test]
fn terminal_states_are_absorbing() {
    let (mgr, _dir) = temp_manager();
    let txn = mgr.begin().unwrap();
    mgr.commit(txn).unwrap();
    assert!(mgr.commit(txn).is_err());
    assert!(mgr.abort(txn).is_err());
}

#[test]
fn abort_returns_undo_in_reverse_order() {
    let (mgr, _dir) = temp_manager();
    let txn = mgr.begin().unwrap();
    mgr.add_undo_record(txn, sample_undo(1)).unwrap();
    mgr.add_undo_record(txn, sample_undo(2)).unwrap();
    mgr.add_undo_record(txn, sample_undo(3)).unwrap();

    let undo = mgr.abort(txn).unwrap();
    let pages: Vec<u64> = undo.iter().map(|u| u.page_id.0).collect();
    assert_eq!(pages, vec![3, 2, 1]);
    assert_eq!(mgr.state(txn), TxnState::Aborted);

    mgr.complete_abort(txn).unwrap();
    let types: Vec<WalRecordType> = mgr
        .wal()
        .read_all()
        .unwrap()
        .iter()
        .map(|r| r.rtype)
        .collect();
    assert_eq!(types, vec![WalRecordType::Begin, WalRecordType::Abort]);
}

#[test]
fn locks_survive_until_abort_completes() {
    let (mgr, _dir) = temp_manager();
    let a = mgr.begin().unwrap();
    let b = mgr.begin().unwrap();
    assert!(mgr.lock_page(a, PageId(1), LockMode::Exclusive, 100).unwrap());

    // Undo runs under the original locks.
    let _undo = mgr.abort(a).unwrap();
    assert!(!mgr.lock_page(b, PageId(1), LockMode::Exclusive, 0).unwrap());

    mgr.complete_abort(a).unwrap();
    assert!(mgr.lock_page(b, PageId(1), LockMode::Exclusive, 0).unwrap());
}

#[test]
fn commit_discards_undo() {
    let (mgr, _dir) = temp_manager();
    let txn = mgr.begin().unwrap();
    mgr.add_undo_record(txn, sample_undo(1)).unwrap();
    mgr.commit(txn).unwrap();
    // Nothing retained: a later abort attempt errors out, and the
    // transaction is terminal.
    assert!(mgr.abort(txn).is_err());
}

#[test]
fn min_active_txn_tracks_oldest() {
    let (mgr, _dir) = temp_manager();
    let a = mgr.begin().unwrap();
    let b = mgr.begin().unwrap();
    assert_eq!(mgr.min_active_txn(), a);
    mgr.commit(a).unwrap();
    assert_eq!(mgr.min_active_txn(), b);
    mgr.commit(b).unwrap();
    // No active transactions: horizon is the next unissued id.
    assert!(mgr.min_active_txn() > b);
}

#[test]
fn shared_locks_coexist() {
    let table = LockTable::new();
    assert!(table.lock(TxnId(1), PageId(7), LockMode::Shared, 100));
    assert!(table.lock(TxnId(2), PageId(7), LockMode::Shared, 100));
    assert_eq!(table.holders(PageId(7)).len(), 2);
}

#[test]
fn exclusive_conflicts_with_everything() {
    let table = LockTable::new();
    assert!(table.lock(TxnId(1), PageId(7), LockMode::Exclusive, 100));
    // Timeout 0 with a held exclusive lock fails immediately.
    assert!(!table.lock(TxnId(2), PageId(7), LockMode::Shared, 0));
    assert!(!table.lock(TxnId(2), PageId(7), LockMode::Exclusive, 0));
}

#[test]
fn sole_shared_holder_upgrades() {
    let table = LockTable::new();
    assert!(table.lock(TxnId(1), PageId(7), LockMode::Shared, 100));
    assert!(table.lock(TxnId(1), PageId(7), LockMode::Exclusive, 100));
    assert_eq!(
        table.holders(PageId(7)),
        vec![(TxnId(1), LockMode::Exclusive)]
    );
}

#[test]
fn waiter_wakes_on_release() {
    let table = Arc::new(LockTable::new());
    assert!(table.lock(TxnId(1), PageId(7), LockMode::Exclusive, 100));

    let waiter = {
        let table = Arc::clone(&table);
        thread::spawn(move || table.lock(TxnId(2), PageId(7), LockMode::Exclusive, 2_000))
    };

    thread::sleep(Duration::from_millis(50));
    assert!(table.unlock(TxnId(1), PageId(7)));
    assert!(waiter.join().unwrap(), "waiter should acquire after release");
}

#[test]
fn lock_timeout_expires() {
    let table = LockTable::new();
    assert!(table.lock(TxnId(1), PageId(7), LockMode::Exclusive, 100));
    let start = std::time::Instant::now();
    assert!(!table.lock(TxnId(2), PageId(7), LockMode::Exclusive, 50));
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn release_all_frees_every_page() {
    let (mgr, _dir) = temp_manager();
    let a = mgr.begin().unwrap();
    let b = mgr.begin().unwrap();
    assert!(mgr.lock_page(a, PageId(1), LockMode::Exclusive, 100).unwrap());
    assert!(mgr.lock_page(a, PageId(2), LockMode::Exclusive, 100).unwrap());

    mgr.commit(a).unwrap();

    assert!(mgr.lock_page(b, PageId(1), LockMode::Exclusive, 0).unwrap());
    assert!(mgr.lock_page(b, PageId(2), LockMode::Exclusive, 0).unwrap());
}
