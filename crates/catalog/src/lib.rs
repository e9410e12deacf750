//! Table, column, and index metadata, persisted through one of two
//! interchangeable backends selected by a database-header bit:
//!
//! - **File**: a `catalog.json` sidecar, rewritten atomically
//!   (temp-then-rename) on every save.
//! - **Database**: the reserved system-table pages 1..3 (`sys_tables`,
//!   `sys_columns`, `sys_indexes`) inside the paged file itself.
//!
//! The catalog is the single source of truth for names. Lookups are
//! case-insensitive; names are stored as written and compared lowercased.

mod db_backend;
mod defs;


pub use db_backend::{SYS_COLUMNS_PAGE, SYS_INDEXES_PAGE, SYS_TABLES_PAGE};
pub use defs::{ColumnDef, ColumnStats, IndexDef, IndexKind, TableDef, TableStats};

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::RandomState;
use buffer::BufferPoolManager;
use common::{DbError, DbResult};
use hashbrown::HashMap;
use tracing::debug;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Set up the reserved system-table pages (1..3) on a fresh database that
/// stores its catalog in-db. The caller must have allocated those page ids.
pub fn bootstrap_system_pages(pool: &BufferPoolManager) -> DbResult<()> {
    db_backend::bootstrap(pool)
}

/// Where catalog contents are persisted.
pub enum CatalogBackend {
    File { path: PathBuf },
    Database { pool: Arc<BufferPoolManager> },
}

/// In-memory catalog with write-through persistence via [`Catalog::save`].
pub struct Catalog {
    tables: Vec<TableDef>,
    name_index: Map<String, usize>,
    backend: CatalogBackend,
}

impl Catalog {
    /// An empty catalog over the given backend.
    pub fn new(backend: CatalogBackend) -> Self {
        Self {
            tables: Vec::new(),
            name_index: Map::default(),
            backend,
        }
    }

    /// Load catalog contents from the backend. A missing sidecar file (or
    /// empty system tables) yields an empty catalog.
    pub fn load(backend: CatalogBackend) -> DbResult<Self> {
        let tables = match &backend {
            CatalogBackend::File { path } => {
                if path.exists() {
                    let data = fs::read_to_string(path)?;
                    serde_json::from_str(&data)
                        .map_err(|e| DbError::Catalog(format!("invalid catalog file: {e}")))?
                } else {
                    Vec::new()
                }
            }
            CatalogBackend::Database { pool } => db_backend::load_tables(pool)?,
        };
        let mut catalog = Self {
            tables,
            name_index: Map::default(),
            backend,
        };
        catalog.rebuild_name_index();
        Ok(catalog)
    }

    /// Persist the catalog. Atomic at the API level: the file backend
    /// writes a temp file and renames it over the old one; the database
    /// backend rewrites the system tables and flushes every page.
    pub fn save(&self) -> DbResult<()> {
        match &self.backend {
            CatalogBackend::File { path } => {
                let data = serde_json::to_string_pretty(&self.tables)
                    .map_err(|e| DbError::Catalog(format!("serialize failed: {e}")))?;
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, data)?;
                fs::rename(&tmp, path)?;
                debug!(path = %path.display(), tables = self.tables.len(), "catalog saved");
            }
            CatalogBackend::Database { pool } => {
                db_backend::save_tables(pool, &self.tables)?;
                pool.flush_all_pages()?;
                debug!(tables = self.tables.len(), "catalog saved to system tables");
            }
        }
        Ok(())
    }

    /// Register a new table. Names are unique case-insensitively.
    pub fn create_table(&mut self, table: TableDef) -> DbResult<()> {
        let key = table.name.to_lowercase();
        if self.name_index.contains_key(&key) {
            return Err(DbError::Catalog(format!(
                "table '{}' already exists",
                table.name
            )));
        }
        table.validate()?;
        self.tables.push(table);
        self.rebuild_name_index();
        Ok(())
    }

    /// Remove a table, returning its definition so the caller can
    /// deallocate its pages and indexes.
    pub fn drop_table(&mut self, name: &str) -> DbResult<TableDef> {
        let idx = self.table_index(name)?;
        let table = self.tables.remove(idx);
        self.rebuild_name_index();
        Ok(table)
    }

    pub fn get_table(&self, name: &str) -> DbResult<&TableDef> {
        let idx = self.table_index(name)?;
        Ok(&self.tables[idx])
    }

    pub fn get_table_mut(&mut self, name: &str) -> DbResult<&mut TableDef> {
        let idx = self.table_index(name)?;
        Ok(&mut self.tables[idx])
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.name_index.contains_key(&name.to_lowercase())
    }

    /// Attach an index to its table. Index names are unique across the
    /// whole catalog.
    pub fn create_index(&mut self, index: IndexDef) -> DbResult<()> {
        if self.get_index(&index.name).is_ok() {
            return Err(DbError::Catalog(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        let table = self.get_table_mut(&index.table_name)?;
        for column in &index.columns {
            if table.column_index(column).is_none() {
                return Err(DbError::Catalog(format!(
                    "unknown column '{}' on table '{}'",
                    column, table.name
                )));
            }
        }
        table.indexes.push(index);
        Ok(())
    }

    /// Detach an index, returning its definition for page deallocation.
    pub fn drop_index(&mut self, name: &str) -> DbResult<IndexDef> {
        let lowered = name.to_lowercase();
        for table in &mut self.tables {
            if let Some(pos) = table
                .indexes
                .iter()
                .position(|idx| idx.name.to_lowercase() == lowered)
            {
                return Ok(table.indexes.remove(pos));
            }
        }
        Err(DbError::Catalog(format!("unknown index '{name}'")))
    }

    pub fn get_index(&self, name: &str) -> DbResult<&IndexDef> {
        let lowered = name.to_lowercase();
        self.tables
            .iter()
            .flat_map(|table| table.indexes.iter())
            .find(|idx| idx.name.to_lowercase() == lowered)
            .ok_or_else(|| DbError::Catalog(format!("unknown index '{name}'")))
    }

    pub fn get_all_table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.iter()
    }

    fn table_index(&self, name: &str) -> DbResult<usize> {
        self.name_index
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| DbError::Catalog(format!("unknown table '{name}'")))
    }

    fn rebuild_name_index(&mut self) {
        self.name_index.clear();
        for (idx, table) in self.tables.iter().enumerate() {
            self.name_index.insert(table.name.to_lowercase(), idx);
        }
    }
}
