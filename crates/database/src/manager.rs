use std::path::PathBuf;
use std::sync::Arc;

use catalog::{ColumnDef, TableDef};
use common::{Config, DbError, DbResult};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{info, warn};
use types::{DataType, Value};

use crate::auth::{hash_password, AuthManager, PermissionManager, SYS_PERMISSIONS_TABLE, USERS_TABLE};
use crate::Database;

/// The system database holding global users and permissions. It must
/// exist; a missing or corrupt copy is recreated and reseeded.
pub const SYSTEM_DB: &str = "qindb";

const DEFAULT_ADMIN: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Container for every database under one data directory. Each database
/// is a subdirectory with its own paged file, catalog, and WAL.
pub struct DatabaseManager {
    config: Config,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    current: RwLock<Option<String>>,
}

impl DatabaseManager {
    /// Open the manager, making sure the system database exists and is
    /// usable. A corrupt `qindb` is moved aside and rebuilt with the
    /// default `admin`/`admin` account.
    pub fn open(config: Config) -> DbResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let manager = Self {
            config,
            databases: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
        };
        manager.ensure_system_db()?;
        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn db_dir(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name.to_lowercase())
    }

    fn ensure_system_db(&self) -> DbResult<()> {
        match self.open_database(SYSTEM_DB) {
            Ok(db) => {
                let catalog_ok = {
                    let catalog = db.catalog().read();
                    catalog.table_exists(USERS_TABLE)
                        && catalog.table_exists(SYS_PERMISSIONS_TABLE)
                };
                if catalog_ok {
                    return Ok(());
                }
                warn!("system database lacks its tables; reseeding");
                self.seed_system_db(&db)
            }
            Err(err) => {
                warn!(%err, "system database unusable; recreating");
                self.databases.write().remove(SYSTEM_DB);
                let dir = self.db_dir(SYSTEM_DB);
                if dir.exists() {
                    let quarantine = dir.with_extension("corrupt");
                    let _ = std::fs::remove_dir_all(&quarantine);
                    std::fs::rename(&dir, &quarantine)?;
                }
                let db = self.open_database(SYSTEM_DB)?;
                self.seed_system_db(&db)
            }
        }
    }

    fn seed_system_db(&self, db: &Arc<Database>) -> DbResult<()> {
        {
            let mut catalog = db.catalog().write();
            if !catalog.table_exists(USERS_TABLE) {
                catalog.create_table(TableDef::new(
                    USERS_TABLE,
                    vec![
                        ColumnDef::new("username", DataType::Varchar)
                            .with_length(255)
                            .primary_key(),
                        ColumnDef::new("password_hash", DataType::Varchar)
                            .with_length(512)
                            .not_null(),
                        ColumnDef::new("is_admin", DataType::Bool),
                    ],
                ))?;
            }
            if !catalog.table_exists(SYS_PERMISSIONS_TABLE) {
                catalog.create_table(TableDef::new(
                    SYS_PERMISSIONS_TABLE,
                    vec![
                        ColumnDef::new("id", DataType::BigInt).primary_key(),
                        ColumnDef::new("username", DataType::Varchar).with_length(255),
                        ColumnDef::new("database_name", DataType::Varchar).with_length(255),
                        ColumnDef::new("table_name", DataType::Varchar).with_length(255),
                        ColumnDef::new("privilege_type", DataType::Varchar).with_length(50),
                        ColumnDef::new("with_grant", DataType::Bool),
                        ColumnDef::new("granted_by", DataType::Varchar).with_length(255),
                    ],
                ))?;
            }
            catalog.save()?;
        }

        let auth = AuthManager::new(Arc::clone(db));
        if !auth.user_exists(DEFAULT_ADMIN)? {
            let hash = hash_password(DEFAULT_ADMIN_PASSWORD)?;
            let mut catalog = db.catalog().write();
            let table = catalog.get_table_mut(USERS_TABLE)?;
            db.heap().insert_row(
                table,
                &[
                    Value::Varchar(DEFAULT_ADMIN.into()),
                    Value::Varchar(hash),
                    Value::Bool(true),
                ],
                common::INVALID_TXN_ID,
            )?;
            catalog.save()?;
            db.pool().flush_all_pages()?;
            info!("seeded default admin account");
        }
        Ok(())
    }

    /// Open (and cache) a database by name.
    fn open_database(&self, name: &str) -> DbResult<Arc<Database>> {
        let key = name.to_lowercase();
        if let Some(db) = self.databases.read().get(&key) {
            return Ok(Arc::clone(db));
        }
        let db = Arc::new(Database::open(&key, &self.db_dir(&key), &self.config)?);
        self.databases.write().insert(key, Arc::clone(&db));
        Ok(db)
    }

    pub fn create_database(&self, name: &str, if_not_exists: bool) -> DbResult<()> {
        if self.database_exists(name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(DbError::Semantic(format!(
                "database '{name}' already exists"
            )));
        }
        self.open_database(name)?;
        Ok(())
    }

    pub fn drop_database(&self, name: &str) -> DbResult<()> {
        let key = name.to_lowercase();
        if key == SYSTEM_DB {
            return Err(DbError::Semantic("cannot drop the system database".into()));
        }
        if !self.database_exists(name) {
            return Err(DbError::Semantic(format!("unknown database '{name}'")));
        }
        self.databases.write().remove(&key);
        let mut current = self.current.write();
        if current.as_deref() == Some(key.as_str()) {
            *current = None;
        }
        std::fs::remove_dir_all(self.db_dir(&key))?;
        info!(db = %key, "database dropped");
        Ok(())
    }

    pub fn use_database(&self, name: &str) -> DbResult<Arc<Database>> {
        if !self.database_exists(name) {
            return Err(DbError::Semantic(format!("unknown database '{name}'")));
        }
        let db = self.open_database(name)?;
        *self.current.write() = Some(name.to_lowercase());
        Ok(db)
    }

    pub fn database_exists(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.databases.read().contains_key(&key) || self.db_dir(&key).join("data.db").exists()
    }

    pub fn current_database_name(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// The database statements run against until USE changes it.
    pub fn current_database(&self) -> DbResult<Arc<Database>> {
        let name = self
            .current_database_name()
            .ok_or_else(|| DbError::Semantic("no database selected; run USE DATABASE".into()))?;
        self.open_database(&name)
    }

    pub fn system_database(&self) -> DbResult<Arc<Database>> {
        self.open_database(SYSTEM_DB)
    }

    pub fn auth_manager(&self) -> DbResult<AuthManager> {
        Ok(AuthManager::new(self.system_database()?))
    }

    pub fn permission_manager(&self) -> DbResult<PermissionManager> {
        Ok(PermissionManager::new(self.system_database()?))
    }

    /// All databases on disk, sorted.
    pub fn list_databases(&self) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            if entry.path().join("data.db").exists() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Flush every open database.
    pub fn save_to_disk(&self) -> DbResult<()> {
        for db in self.databases.read().values() {
            db.save()?;
        }
        Ok(())
    }

    /// Drop cached handles; the next access reloads from disk.
    pub fn load_from_disk(&self) -> DbResult<()> {
        self.databases.write().clear();
        self.ensure_system_db()
    }
}
