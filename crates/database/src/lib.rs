//! Per-database component wiring and the multi-database manager.
//!
//! Ownership is a strict hierarchy (no cycles): the [`DatabaseManager`]
//! owns one [`Database`] per directory; each database owns its
//! DiskManager, BufferPoolManager, Catalog, WAL, and TransactionManager.
//! Everything above (the executor) borrows a database for the duration of
//! a call.

mod auth;
mod heap;
mod manager;


pub use auth::{AuthManager, PermissionManager, PrivilegeKind, SYS_PERMISSIONS_TABLE, USERS_TABLE};
pub use heap::{HeapWrite, StoredRow, TableHeap, UpdateOutcome};
pub use manager::{DatabaseManager, SYSTEM_DB};

use std::path::Path;
use std::sync::Arc;

use buffer::BufferPoolManager;
use catalog::{Catalog, CatalogBackend};
use common::{Config, DbResult, PageId, INVALID_TXN_ID};
use parking_lot::{Mutex, RwLock};
use storage::{DiskManager, PageType};
use tracing::{debug, info};
use txn::TransactionManager;
use wal::{recover, DbWalStore, FileWalStore, Wal, WalPayload, WalRecordType, WalStore};

/// Pages 0..5 are reserved on every fresh database: the meta page, the
/// three catalog system pages, and the two WAL system pages. User tables
/// and indexes start above them.
pub const RESERVED_PAGES: u64 = 6;

/// One database: a data directory with a paged file and its sidecars.
pub struct Database {
    name: String,
    disk: Arc<Mutex<DiskManager>>,
    pool: Arc<BufferPoolManager>,
    catalog: Arc<RwLock<Catalog>>,
    wal: Arc<Wal>,
    txns: Arc<TransactionManager>,
    lock_timeout_ms: u64,
}

impl Database {
    /// Open (or create) the database stored in `dir`. On an existing file
    /// the header's backend bits override the config; on a fresh one the
    /// config decides and the header is written once. Recovery replays the
    /// WAL before anything else touches the pages.
    pub fn open(name: &str, dir: &Path, config: &Config) -> DbResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut disk = DiskManager::open(dir.join("data.db"))?;

        let fresh = !disk.is_initialized()?;
        let (catalog_in_db, wal_in_db) = if fresh {
            disk.write_magic(config.catalog_in_db, config.wal_in_db)?;
            (config.catalog_in_db, config.wal_in_db)
        } else {
            disk.verify_and_parse_magic()?
        };

        let disk = Arc::new(Mutex::new(disk));
        let pool = Arc::new(BufferPoolManager::new(
            config.buffer_pool_pages,
            Arc::clone(&disk),
        ));

        if fresh {
            Self::reserve_system_pages(&pool)?;
            if catalog_in_db {
                catalog::bootstrap_system_pages(&pool)?;
            }
            if wal_in_db {
                DbWalStore::bootstrap(&pool)?;
            }
            pool.flush_all_pages()?;
        }

        // Replay the log before the catalog or any table page is trusted.
        let store: Box<dyn WalStore> = if wal_in_db {
            Box::new(DbWalStore::open(Arc::clone(&pool))?)
        } else {
            Box::new(FileWalStore::open(dir.join("wal.log"))?)
        };
        let wal = Arc::new(Wal::new(store)?);
        if !fresh {
            let records = wal.read_all()?;
            if !records.is_empty() {
                let report = recover(&records, &mut disk.lock())?;
                debug!(db = name, ?report, "wal replay finished");
            }
        }

        let backend = if catalog_in_db {
            CatalogBackend::Database {
                pool: Arc::clone(&pool),
            }
        } else {
            CatalogBackend::File {
                path: dir.join("catalog.json"),
            }
        };
        let catalog = Arc::new(RwLock::new(Catalog::load(backend)?));
        let txns = Arc::new(TransactionManager::new(Arc::clone(&wal)));

        info!(db = name, fresh, catalog_in_db, wal_in_db, "database open");
        Ok(Self {
            name: name.to_string(),
            disk,
            pool,
            catalog,
            wal,
            txns,
            lock_timeout_ms: config.lock_timeout_ms,
        })
    }

    fn reserve_system_pages(pool: &BufferPoolManager) -> DbResult<()> {
        for expected in 0..RESERVED_PAGES {
            let (page_id, page) = pool.new_page()?;
            debug_assert_eq!(page_id, PageId(expected));
            if page_id == PageId(0) {
                page.write().set_page_type(PageType::Meta);
            }
            pool.unpin_page(page_id, true)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }

    pub fn disk(&self) -> &Arc<Mutex<DiskManager>> {
        &self.disk
    }

    pub fn catalog(&self) -> &Arc<RwLock<Catalog>> {
        &self.catalog
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn txns(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    pub fn lock_timeout_ms(&self) -> u64 {
        self.lock_timeout_ms
    }

    pub fn heap(&self) -> TableHeap<'_> {
        TableHeap::new(&self.pool)
    }

    /// Persist everything: catalog, dirty pages, and the log.
    pub fn save(&self) -> DbResult<()> {
        self.catalog.read().save()?;
        self.pool.flush_all_pages()?;
        self.wal.flush_until(self.wal.current_lsn())?;
        Ok(())
    }

    /// Checkpoint: flush all pages, then truncate the log. The CHECKPOINT
    /// record carries the still-active transactions so a later crash can
    /// rebuild its analysis state.
    pub fn checkpoint(&self) -> DbResult<()> {
        let active = self.txns.active_txns();
        let payload = WalPayload::Checkpoint { active }.encode()?;
        let lsn = self
            .wal
            .append(WalRecordType::Checkpoint, INVALID_TXN_ID, payload)?;
        self.wal.flush_until(lsn)?;
        self.pool.flush_all_pages()?;
        self.wal.truncate()?;
        Ok(())
    }
}
