//! Write-ahead log for durability and crash recovery.
//!
//! Every page mutation is logged before the dirty page can reach disk; a
//! transaction reports success only after its COMMIT record is durable.
//! Data records carry full page images (before/after), which keeps redo
//! idempotent (a record is reapplied only when the on-disk page's LSN is
//! older than the record's) and lets undo restore losers after a crash.
//!
//! Record framing (little-endian):
//!
//! ```text
//! lsn: u64 | type: u8 | txn_id: u64 | checksum: u32 | data_size: u16 | data
//! ```
//!
//! The checksum is CRC32 over `{type, txn_id, data_size, data}`.
//!
//! Two interchangeable stores exist, selected by a database-header bit: an
//! append-only sidecar file (`wal.log`) and a page chain inside the database
//! itself (`sys_wal_logs` + `sys_wal_meta`).

mod record;
mod recovery;
mod store;

#[cfg(test)]
mod tests;

pub use record::{WalPayload, WalRecord, WalRecordType};
pub use recovery::{recover, RecoveryReport};
pub use store::{DbWalStore, FileWalStore, WalStore, SYS_WAL_LOGS_PAGE, SYS_WAL_META_PAGE};

use common::{DbResult, Lsn, TxnId};
use parking_lot::Mutex;

/// The WAL manager: assigns LSNs and serializes appends over one store.
pub struct Wal {
    store: Mutex<Box<dyn WalStore>>,
    next_lsn: Mutex<Lsn>,
}

impl Wal {
    /// Wrap a store, resuming LSN assignment where the log left off.
    pub fn new(mut store: Box<dyn WalStore>) -> DbResult<Self> {
        let current = store.load_current_lsn()?;
        Ok(Self {
            store: Mutex::new(store),
            next_lsn: Mutex::new(current.next()),
        })
    }

    /// Append a record, assigning the next LSN. Buffered, not yet durable;
    /// call [`Wal::flush_until`] to persist.
    pub fn append(&self, rtype: WalRecordType, txn_id: TxnId, data: Vec<u8>) -> DbResult<Lsn> {
        // One critical section for both LSN assignment and the append keeps
        // persistence order equal to LSN order.
        let mut store = self.store.lock();
        let mut next = self.next_lsn.lock();
        let lsn = *next;
        *next = next.next();

        let record = WalRecord {
            lsn,
            rtype,
            txn_id,
            data,
        };
        store.append(&record)?;
        store.save_current_lsn(lsn)?;
        Ok(lsn)
    }

    /// Durably persist every record up to (at least) `lsn`.
    pub fn flush_until(&self, _lsn: Lsn) -> DbResult<()> {
        self.store.lock().flush()
    }

    /// All records in LSN order. Used by recovery.
    pub fn read_all(&self) -> DbResult<Vec<WalRecord>> {
        self.store.lock().read_all()
    }

    /// Discard the log. Safe only after every page the records cover has
    /// been flushed (checkpoint).
    pub fn truncate(&self) -> DbResult<()> {
        let mut store = self.store.lock();
        let next = self.next_lsn.lock();
        store.truncate()?;
        // Keep LSNs monotone across the truncation.
        store.save_current_lsn(Lsn(next.0 - 1))?;
        Ok(())
    }

    /// The highest LSN assigned so far.
    pub fn current_lsn(&self) -> Lsn {
        Lsn(self.next_lsn.lock().0 - 1)
    }
}
