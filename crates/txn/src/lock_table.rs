use std::time::{Duration, Instant};

use common::{PageId, TxnId};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

/// Page lock modes. Shared locks are compatible with each other; an
/// exclusive lock conflicts with everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    holders: HashMap<TxnId, LockMode>,
}

impl LockState {
    fn compatible(&self, txn_id: TxnId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self
                .holders
                .iter()
                .all(|(holder, held)| *holder == txn_id || *held == LockMode::Shared),
            LockMode::Exclusive => self.holders.keys().all(|holder| *holder == txn_id),
        }
    }
}

/// Per-database page lock table. One mutex guards the whole map; waiters
/// block on a condvar with a deadline and re-check on every release.
pub struct LockTable {
    locks: Mutex<HashMap<PageId, LockState>>,
    released: Condvar,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    /// Acquire (or upgrade) a lock. Returns `false` on deadline expiry.
    /// A transaction already holding the page in the requested or a
    /// stronger mode succeeds immediately; a sole shared holder may
    /// upgrade to exclusive.
    pub fn lock(&self, txn_id: TxnId, page_id: PageId, mode: LockMode, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut locks = self.locks.lock();

        loop {
            let state = locks.entry(page_id).or_default();
            match state.holders.get(&txn_id) {
                Some(LockMode::Exclusive) => return true,
                Some(LockMode::Shared) if mode == LockMode::Shared => return true,
                _ => {}
            }
            if state.compatible(txn_id, mode) {
                state.holders.insert(txn_id, mode);
                return true;
            }
            if timeout_ms == 0 || self.released.wait_until(&mut locks, deadline).timed_out() {
                return false;
            }
        }
    }

    /// Release one lock. Returns `false` when the transaction held nothing
    /// on that page.
    pub fn unlock(&self, txn_id: TxnId, page_id: PageId) -> bool {
        let mut locks = self.locks.lock();
        let Some(state) = locks.get_mut(&page_id) else {
            return false;
        };
        let released = state.holders.remove(&txn_id).is_some();
        if state.holders.is_empty() {
            locks.remove(&page_id);
        }
        if released {
            self.released.notify_all();
        }
        released
    }

    /// Release every lock a transaction holds (commit/abort path).
    pub fn release_all(&self, txn_id: TxnId) {
        let mut locks = self.locks.lock();
        locks.retain(|_, state| {
            state.holders.remove(&txn_id);
            !state.holders.is_empty()
        });
        self.released.notify_all();
    }

    /// Lock modes currently held on a page, for diagnostics and tests.
    pub fn holders(&self, page_id: PageId) -> Vec<(TxnId, LockMode)> {
        self.locks
            .lock()
            .get(&page_id)
            .map(|state| state.holders.iter().map(|(t, m)| (*t, *m)).collect())
            .unwrap_or_default()
    }
}
