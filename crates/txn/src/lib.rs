//! Transaction lifecycle, page locking, and undo bookkeeping.
//!
//! Isolation level is Read Committed with two-phase locking on writes:
//! exclusive page locks are held until commit or abort, shared locks only
//! for the duration of a read. Deadlocks are broken by lock timeouts: a
//! waiter that misses its deadline returns `false` and the caller aborts
//! its transaction.
//!
//! Rolling back applies a transaction's undo records in reverse. The
//! records are produced here but applied by the executor, which owns the
//! heap and index access needed to invert each operation.

mod lock_table;

#[cfg(test)]
mod tests;

pub use lock_table::{LockMode, LockTable};

use std::sync::Arc;

use common::{DbError, DbResult, Lsn, PageId, Row, RowId, TxnId};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use wal::{Wal, WalRecordType};

/// Transaction states. `Active` is the only state that accepts work;
/// `Committed` and `Aborted` are absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
    Invalid,
}

/// What a data mutation did, for undo purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoKind {
    Insert,
    Update,
    Delete,
}

/// The inverse of one data mutation, applied in reverse order on abort.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoRecord {
    pub kind: UndoKind,
    pub table_name: String,
    pub page_id: PageId,
    pub slot: u16,
    /// Pre-mutation row for updates and deletes.
    pub before_image: Option<Row>,
    pub row_id: RowId,
}

#[derive(Debug)]
struct Transaction {
    state: TxnState,
    lock_set: Vec<PageId>,
    undo_log: Vec<UndoRecord>,
    start_lsn: Lsn,
    last_lsn: Lsn,
}

/// Issues transaction ids, tracks live transactions, and owns the page
/// lock table.
pub struct TransactionManager {
    wal: Arc<Wal>,
    lock_table: LockTable,
    next_txn_id: Mutex<u64>,
    active: Mutex<HashMap<TxnId, Transaction>>,
}

impl TransactionManager {
    pub fn new(wal: Arc<Wal>) -> Self {
        Self {
            wal,
            lock_table: LockTable::new(),
            next_txn_id: Mutex::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction: assign the next id and log BEGIN.
    pub fn begin(&self) -> DbResult<TxnId> {
        let txn_id = {
            let mut next = self.next_txn_id.lock();
            let id = TxnId(*next);
            *next += 1;
            id
        };
        let lsn = self.wal.append(WalRecordType::Begin, txn_id, vec![])?;
        self.active.lock().insert(
            txn_id,
            Transaction {
                state: TxnState::Active,
                lock_set: Vec::new(),
                undo_log: Vec::new(),
                start_lsn: lsn,
                last_lsn: lsn,
            },
        );
        debug!(txn = txn_id.0, "begin");
        Ok(txn_id)
    }

    /// Commit: log COMMIT, make it durable, release locks, drop undo.
    pub fn commit(&self, txn_id: TxnId) -> DbResult<()> {
        {
            let mut active = self.active.lock();
            let txn = active
                .get_mut(&txn_id)
                .ok_or_else(|| DbError::Executor(format!("unknown transaction {}", txn_id.0)))?;
            if txn.state != TxnState::Active {
                return Err(DbError::Executor(format!(
                    "transaction {} is not active",
                    txn_id.0
                )));
            }
            txn.state = TxnState::Committed;
            txn.undo_log.clear();
        }
        let commit_lsn = self.wal.append(WalRecordType::Commit, txn_id, vec![])?;
        self.wal.flush_until(commit_lsn)?;
        self.lock_table.release_all(txn_id);
        debug!(txn = txn_id.0, lsn = commit_lsn.0, "commit");
        Ok(())
    }

    /// Start an abort: mark the transaction aborted and hand back its undo
    /// records in application (reverse) order. The caller applies the
    /// inverses against the heap and indexes, logging each compensating
    /// page write under this transaction id, and then calls
    /// [`TransactionManager::complete_abort`]. Locks are held until the
    /// abort completes so the undo runs under the same protection as the
    /// original writes.
    pub fn abort(&self, txn_id: TxnId) -> DbResult<Vec<UndoRecord>> {
        let undo = {
            let mut active = self.active.lock();
            let txn = active
                .get_mut(&txn_id)
                .ok_or_else(|| DbError::Executor(format!("unknown transaction {}", txn_id.0)))?;
            if txn.state != TxnState::Active {
                return Err(DbError::Executor(format!(
                    "transaction {} is not active",
                    txn_id.0
                )));
            }
            txn.state = TxnState::Aborted;
            let mut undo = std::mem::take(&mut txn.undo_log);
            undo.reverse();
            undo
        };
        debug!(txn = txn_id.0, undo_records = undo.len(), "abort started");
        Ok(undo)
    }

    /// Finish an abort: append the terminal ABORT record and release every
    /// lock the transaction held.
    pub fn complete_abort(&self, txn_id: TxnId) -> DbResult<()> {
        self.wal.append(WalRecordType::Abort, txn_id, vec![])?;
        self.lock_table.release_all(txn_id);
        debug!(txn = txn_id.0, "abort complete");
        Ok(())
    }

    /// Record the inverse of a mutation for a possible rollback.
    pub fn add_undo_record(&self, txn_id: TxnId, record: UndoRecord) -> DbResult<()> {
        let mut active = self.active.lock();
        let txn = active
            .get_mut(&txn_id)
            .ok_or_else(|| DbError::Executor(format!("unknown transaction {}", txn_id.0)))?;
        if txn.state != TxnState::Active {
            return Err(DbError::Executor(format!(
                "transaction {} is not active",
                txn_id.0
            )));
        }
        txn.undo_log.push(record);
        Ok(())
    }

    /// Track the latest WAL record written on behalf of a transaction.
    pub fn set_last_lsn(&self, txn_id: TxnId, lsn: Lsn) {
        if let Some(txn) = self.active.lock().get_mut(&txn_id) {
            txn.last_lsn = lsn;
        }
    }

    pub fn state(&self, txn_id: TxnId) -> TxnState {
        self.active
            .lock()
            .get(&txn_id)
            .map(|txn| txn.state)
            .unwrap_or(TxnState::Invalid)
    }

    pub fn start_lsn(&self, txn_id: TxnId) -> Option<Lsn> {
        self.active.lock().get(&txn_id).map(|txn| txn.start_lsn)
    }

    /// Transactions currently in `Active` state (checkpointing, VACUUM
    /// horizon).
    pub fn active_txns(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self
            .active
            .lock()
            .iter()
            .filter(|(_, txn)| txn.state == TxnState::Active)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// The oldest transaction id still active, or the next id to be issued
    /// when none are. Records deleted before this horizon are invisible to
    /// everyone and may be reclaimed.
    pub fn min_active_txn(&self) -> TxnId {
        self.active_txns()
            .first()
            .copied()
            .unwrap_or_else(|| TxnId(*self.next_txn_id.lock()))
    }

    /// Acquire a page lock with a deadline. `false` means the deadline
    /// passed; the caller is expected to abort.
    pub fn lock_page(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        mode: LockMode,
        timeout_ms: u64,
    ) -> DbResult<bool> {
        if self.state(txn_id) != TxnState::Active {
            return Err(DbError::Executor(format!(
                "transaction {} is not active",
                txn_id.0
            )));
        }
        let granted = self.lock_table.lock(txn_id, page_id, mode, timeout_ms);
        if granted {
            let mut active = self.active.lock();
            if let Some(txn) = active.get_mut(&txn_id) {
                if !txn.lock_set.contains(&page_id) {
                    txn.lock_set.push(page_id);
                }
            }
        }
        Ok(granted)
    }

    /// Early release for shared locks (Read Committed drops S locks after
    /// the read completes).
    pub fn unlock_page(&self, txn_id: TxnId, page_id: PageId) -> bool {
        let released = self.lock_table.unlock(txn_id, page_id);
        if released {
            if let Some(txn) = self.active.lock().get_mut(&txn_id) {
                txn.lock_set.retain(|p| *p != page_id);
            }
        }
        released
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }
}
