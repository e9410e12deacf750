//! Users and permissions, stored as ordinary rows in the system database.
//!
//! `users(username, password_hash, is_admin)` and
//! `sys_permissions(id, username, database_name, table_name,
//! privilege_type, with_grant, granted_by)` live in `qindb`; only this
//! module knows their schemas.
//!
//! Passwords: new hashes are always Argon2id (`$argon2id$…`). Verification
//! also accepts the legacy base64(SHA-256(password + salt) + salt) form,
//! but only when the stored string decodes to exactly 48 bytes; an
//! unknown prefix never falls through to the legacy path.

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{DbError, DbResult, INVALID_TXN_ID};
use sha2::{Digest, Sha256};
use tracing::info;
use types::Value;

use crate::Database;

pub const USERS_TABLE: &str = "users";
pub const SYS_PERMISSIONS_TABLE: &str = "sys_permissions";

const LEGACY_HASH_LEN: usize = 32;
const LEGACY_SALT_LEN: usize = 16;

/// Privileges the permission table understands. `All` matches any check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegeKind {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

impl PrivilegeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeKind::Select => "SELECT",
            PrivilegeKind::Insert => "INSERT",
            PrivilegeKind::Update => "UPDATE",
            PrivilegeKind::Delete => "DELETE",
            PrivilegeKind::All => "ALL",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text.to_ascii_uppercase().as_str() {
            "SELECT" => PrivilegeKind::Select,
            "INSERT" => PrivilegeKind::Insert,
            "UPDATE" => PrivilegeKind::Update,
            "DELETE" => PrivilegeKind::Delete,
            "ALL" => PrivilegeKind::All,
            _ => return None,
        })
    }
}

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::Executor(format!("password hashing failed: {e}")))
}

/// Verify against either the Argon2id format or the legacy
/// SHA-256+salt blob.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if stored.starts_with("$argon2id$") {
        return PasswordHash::new(stored)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
    }
    // Legacy format: base64 of hash(32) + salt(16), nothing else.
    let Ok(decoded) = BASE64.decode(stored) else {
        return false;
    };
    if decoded.len() != LEGACY_HASH_LEN + LEGACY_SALT_LEN {
        return false;
    }
    let (hash, salt) = decoded.split_at(LEGACY_HASH_LEN);
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().as_slice() == hash
}

/// Produce a stored credential in the legacy format (used by tests and by
/// imports of pre-Argon2 user tables).
pub fn legacy_hash_password(password: &str, salt: &[u8; LEGACY_SALT_LEN]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    let mut blob = hasher.finalize().to_vec();
    blob.extend_from_slice(salt);
    BASE64.encode(blob)
}

/// User lifecycle over the system database's `users` table.
pub struct AuthManager {
    system_db: Arc<Database>,
}

impl AuthManager {
    pub fn new(system_db: Arc<Database>) -> Self {
        Self { system_db }
    }

    pub fn create_user(&self, username: &str, password: &str, is_admin: bool) -> DbResult<()> {
        if self.find_user(username)?.is_some() {
            return Err(DbError::Semantic(format!(
                "user '{username}' already exists"
            )));
        }
        let hash = hash_password(password)?;
        let row = vec![
            Value::Varchar(username.to_string()),
            Value::Varchar(hash),
            Value::Bool(is_admin),
        ];
        self.insert_into(USERS_TABLE, &row)?;
        info!(user = username, is_admin, "user created");
        Ok(())
    }

    pub fn drop_user(&self, username: &str) -> DbResult<()> {
        let removed = self.delete_rows(USERS_TABLE, |values| {
            row_text(values, 0).eq_ignore_ascii_case(username)
        })?;
        if removed == 0 {
            return Err(DbError::Semantic(format!("unknown user '{username}'")));
        }
        Ok(())
    }

    pub fn alter_user_password(&self, username: &str, new_password: &str) -> DbResult<()> {
        let Some(row) = self.find_user(username)? else {
            return Err(DbError::Semantic(format!("unknown user '{username}'")));
        };
        let is_admin = matches!(row.2, Value::Bool(true));
        self.delete_rows(USERS_TABLE, |values| {
            row_text(values, 0).eq_ignore_ascii_case(username)
        })?;
        let hash = hash_password(new_password)?;
        self.insert_into(
            USERS_TABLE,
            &[
                Value::Varchar(row.0),
                Value::Varchar(hash),
                Value::Bool(is_admin),
            ],
        )
    }

    pub fn user_exists(&self, username: &str) -> DbResult<bool> {
        Ok(self.find_user(username)?.is_some())
    }

    pub fn verify_login(&self, username: &str, password: &str) -> DbResult<bool> {
        match self.find_user(username)? {
            Some((_, stored, _)) => Ok(verify_password(password, &stored)),
            None => Ok(false),
        }
    }

    pub fn is_admin(&self, username: &str) -> DbResult<bool> {
        Ok(self
            .find_user(username)?
            .is_some_and(|(_, _, admin)| matches!(admin, Value::Bool(true))))
    }

    fn find_user(&self, username: &str) -> DbResult<Option<(String, String, Value)>> {
        let catalog = self.system_db.catalog().read();
        let table = catalog.get_table(USERS_TABLE)?;
        for row in self.system_db.heap().scan(table)? {
            if row.header.is_deleted() {
                continue;
            }
            if row_text(&row.values, 0).eq_ignore_ascii_case(username) {
                return Ok(Some((
                    row_text(&row.values, 0).to_string(),
                    row_text(&row.values, 1).to_string(),
                    row.values.get(2).cloned().unwrap_or(Value::Null),
                )));
            }
        }
        Ok(None)
    }

    fn insert_into(&self, table_name: &str, values: &[Value]) -> DbResult<()> {
        let mut catalog = self.system_db.catalog().write();
        let table = catalog.get_table_mut(table_name)?;
        self.system_db
            .heap()
            .insert_row(table, values, INVALID_TXN_ID)?;
        catalog.save()?;
        self.system_db.pool().flush_all_pages()
    }

    fn delete_rows(
        &self,
        table_name: &str,
        matches: impl Fn(&[Value]) -> bool,
    ) -> DbResult<usize> {
        let targets = {
            let catalog = self.system_db.catalog().read();
            let table = catalog.get_table(table_name)?;
            self.system_db
                .heap()
                .scan(table)?
                .into_iter()
                .filter(|row| !row.header.is_deleted() && matches(&row.values))
                .map(|row| (row.page_id, row.slot))
                .collect::<Vec<_>>()
        };
        let heap = self.system_db.heap();
        for (page_id, slot) in &targets {
            heap.delete_row(*page_id, *slot, common::TxnId(u64::MAX))?;
        }
        self.system_db.pool().flush_all_pages()?;
        Ok(targets.len())
    }
}

/// Grant bookkeeping over `sys_permissions`.
pub struct PermissionManager {
    system_db: Arc<Database>,
}

impl PermissionManager {
    pub fn new(system_db: Arc<Database>) -> Self {
        Self { system_db }
    }

    /// Record a grant. `table = None` covers the whole database.
    pub fn grant(
        &self,
        username: &str,
        database: &str,
        table: Option<&str>,
        privilege: PrivilegeKind,
        with_grant: bool,
        granted_by: &str,
    ) -> DbResult<()> {
        let mut catalog = self.system_db.catalog().write();
        let table_def = catalog.get_table_mut(SYS_PERMISSIONS_TABLE)?;
        let id = table_def.next_row_id;
        let row = vec![
            Value::BigInt(id as i64),
            Value::Varchar(username.to_string()),
            Value::Varchar(database.to_string()),
            table
                .map(|t| Value::Varchar(t.to_string()))
                .unwrap_or(Value::Varchar("*".into())),
            Value::Varchar(privilege.as_str().to_string()),
            Value::Bool(with_grant),
            Value::Varchar(granted_by.to_string()),
        ];
        self.system_db
            .heap()
            .insert_row(table_def, &row, INVALID_TXN_ID)?;
        catalog.save()?;
        self.system_db.pool().flush_all_pages()
    }

    /// Remove matching grants. Returns how many rows were revoked.
    pub fn revoke(
        &self,
        username: &str,
        database: &str,
        table: Option<&str>,
        privilege: PrivilegeKind,
    ) -> DbResult<usize> {
        let wanted_table = table.unwrap_or("*");
        let targets = {
            let catalog = self.system_db.catalog().read();
            let table_def = catalog.get_table(SYS_PERMISSIONS_TABLE)?;
            self.system_db
                .heap()
                .scan(table_def)?
                .into_iter()
                .filter(|row| {
                    !row.header.is_deleted()
                        && row_text(&row.values, 1).eq_ignore_ascii_case(username)
                        && row_text(&row.values, 2).eq_ignore_ascii_case(database)
                        && row_text(&row.values, 3).eq_ignore_ascii_case(wanted_table)
                        && row_text(&row.values, 4).eq_ignore_ascii_case(privilege.as_str())
                })
                .map(|row| (row.page_id, row.slot))
                .collect::<Vec<_>>()
        };
        let heap = self.system_db.heap();
        for (page_id, slot) in &targets {
            heap.delete_row(*page_id, *slot, common::TxnId(u64::MAX))?;
        }
        self.system_db.pool().flush_all_pages()?;
        Ok(targets.len())
    }

    /// May `username` grant `privilege` on the target to others? True for
    /// admins and for holders of a matching grant carrying WITH GRANT
    /// OPTION.
    pub fn has_grant_option(
        &self,
        auth: &AuthManager,
        username: &str,
        database: &str,
        table: Option<&str>,
        privilege: PrivilegeKind,
    ) -> DbResult<bool> {
        if auth.is_admin(username)? {
            return Ok(true);
        }
        let wanted_table = table.unwrap_or("*");
        let catalog = self.system_db.catalog().read();
        let table_def = catalog.get_table(SYS_PERMISSIONS_TABLE)?;
        for row in self.system_db.heap().scan(table_def)? {
            if row.header.is_deleted() {
                continue;
            }
            if !row_text(&row.values, 1).eq_ignore_ascii_case(username)
                || !row_text(&row.values, 2).eq_ignore_ascii_case(database)
            {
                continue;
            }
            let granted_table = row_text(&row.values, 3);
            if granted_table != "*" && !granted_table.eq_ignore_ascii_case(wanted_table) {
                continue;
            }
            if !matches!(row.values.get(5), Some(Value::Bool(true))) {
                continue;
            }
            match PrivilegeKind::parse(row_text(&row.values, 4)) {
                Some(PrivilegeKind::All) => return Ok(true),
                Some(p) if p == privilege => return Ok(true),
                _ => {}
            }
        }
        Ok(false)
    }

    /// Is `(username, database, table, privilege)` allowed? Admins always
    /// are; `ALL` and database-wide (`*`) grants match.
    pub fn has_privilege(
        &self,
        auth: &AuthManager,
        username: &str,
        database: &str,
        table: &str,
        privilege: PrivilegeKind,
    ) -> DbResult<bool> {
        if auth.is_admin(username)? {
            return Ok(true);
        }
        let catalog = self.system_db.catalog().read();
        let table_def = catalog.get_table(SYS_PERMISSIONS_TABLE)?;
        for row in self.system_db.heap().scan(table_def)? {
            if row.header.is_deleted() {
                continue;
            }
            if !row_text(&row.values, 1).eq_ignore_ascii_case(username)
                || !row_text(&row.values, 2).eq_ignore_ascii_case(database)
            {
                continue;
            }
            let granted_table = row_text(&row.values, 3);
            if granted_table != "*" && !granted_table.eq_ignore_ascii_case(table) {
                continue;
            }
            let granted_priv = PrivilegeKind::parse(row_text(&row.values, 4));
            match granted_priv {
                Some(PrivilegeKind::All) => return Ok(true),
                Some(p) if p == privilege => return Ok(true),
                _ => {}
            }
        }
        Ok(false)
    }
}

fn row_text(values: &[Value], idx: usize) -> &str {
    values.get(idx).and_then(|v| v.as_str()).unwrap_or("")
}
