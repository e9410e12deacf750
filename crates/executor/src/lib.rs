//! Statement execution: dispatches parsed statements against the catalog,
//! buffer pool, indexes, transaction manager, and WAL.
//!
//! The executor borrows the [`DatabaseManager`] for the duration of a
//! call and carries per-session state: the authenticated user, the open
//! transaction (if any), the query rewriter, and the query cache. Errors
//! surface in-band: the public [`Executor::execute`] never panics and
//! never returns `Err`; a failed statement comes back as
//! `QueryResult { success: false, error, .. }`.

mod admin;
mod cache;
mod ddl;
mod dml;
mod explain;
mod indexes;
mod maintenance;
mod select;

#[cfg(test)]
mod tests;

pub use cache::{QueryCache, QueryCacheStats};

use std::sync::Arc;

use common::{DbError, DbResult, QueryResult, TxnId};
use database::{Database, DatabaseManager, PrivilegeKind};
use parser::Statement;
use rewriter::QueryRewriter;
use tracing::debug;

/// Per-connection execution engine.
pub struct Executor<'a> {
    manager: &'a DatabaseManager,
    current_user: String,
    current_txn: Option<TxnId>,
    rewriter: QueryRewriter,
    cache: QueryCache,
    rewrite_enabled: bool,
}

impl<'a> Executor<'a> {
    /// An executor for the default administrative user.
    pub fn new(manager: &'a DatabaseManager) -> Self {
        Self::for_user(manager, "admin")
    }

    /// An executor bound to an authenticated user.
    pub fn for_user(manager: &'a DatabaseManager, user: &str) -> Self {
        Self {
            manager,
            current_user: user.to_string(),
            current_txn: None,
            rewriter: QueryRewriter::new(),
            cache: QueryCache::new(manager.config().query_cache_capacity),
            rewrite_enabled: true,
        }
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn set_current_user(&mut self, user: &str) {
        user.clone_into(&mut self.current_user);
    }

    pub fn in_transaction(&self) -> bool {
        self.current_txn.is_some()
    }

    pub fn set_query_rewrite_enabled(&mut self, enabled: bool) {
        self.rewrite_enabled = enabled;
    }

    pub fn rewriter_mut(&mut self) -> &mut QueryRewriter {
        &mut self.rewriter
    }

    pub fn query_cache_stats(&self) -> QueryCacheStats {
        self.cache.stats()
    }

    pub fn clear_query_cache(&mut self) {
        self.cache.clear();
    }

    /// Parse and execute one SQL statement, reporting errors in-band.
    pub fn execute(&mut self, sql: &str) -> QueryResult {
        let stmt = match parser::parse(sql) {
            Ok(stmt) => stmt,
            Err(err) => return QueryResult::error(err),
        };

        // Cacheable SELECTs short-circuit here.
        if let Statement::Select(select) = &stmt {
            if select.into_outfile.is_none() {
                if let Ok(db) = self.manager.current_database() {
                    if let Some(hit) = self.cache.get(db.name(), sql) {
                        return hit;
                    }
                    match self.execute_statement(&stmt) {
                        Ok(result) => {
                            self.cache.put(db.name(), sql, select, &result);
                            return result;
                        }
                        Err(err) => return self.fail(err),
                    }
                }
            }
        }

        match self.execute_statement(&stmt) {
            Ok(result) => result,
            Err(err) => self.fail(err),
        }
    }

    /// On fatal errors the open transaction is aborted before reporting.
    fn fail(&mut self, err: DbError) -> QueryResult {
        if err.is_fatal() {
            if let Some(txn) = self.current_txn.take() {
                debug!(txn = txn.0, %err, "aborting transaction after fatal error");
                let _ = self.rollback_txn(txn);
            }
        }
        QueryResult::error(err)
    }

    /// Dispatch a parsed statement.
    pub fn execute_statement(&mut self, stmt: &Statement) -> DbResult<QueryResult> {
        match stmt {
            Statement::Select(select) => self.execute_select(select),
            Statement::Insert(insert) => self.execute_insert(insert),
            Statement::Update(update) => self.execute_update(update),
            Statement::Delete(delete) => self.execute_delete(delete),
            Statement::CreateTable(create) => self.execute_create_table(create),
            Statement::DropTable { name, if_exists } => self.execute_drop_table(name, *if_exists),
            Statement::AlterTable(alter) => self.execute_alter_table(alter),
            Statement::CreateIndex(create) => self.execute_create_index(create),
            Statement::DropIndex { name, if_exists } => self.execute_drop_index(name, *if_exists),
            Statement::CreateDatabase {
                name,
                if_not_exists,
            } => {
                self.manager.create_database(name, *if_not_exists)?;
                Ok(QueryResult::ok(format!("database '{name}' created")))
            }
            Statement::DropDatabase { name, if_exists } => {
                if !self.manager.database_exists(name) && *if_exists {
                    return Ok(QueryResult::ok(format!("database '{name}' absent")));
                }
                self.cache.clear_database(name);
                self.manager.drop_database(name)?;
                Ok(QueryResult::ok(format!("database '{name}' dropped")))
            }
            Statement::UseDatabase { name } => {
                self.manager.use_database(name)?;
                Ok(QueryResult::ok(format!("using database '{name}'")))
            }
            Statement::ShowTables => self.execute_show_tables(),
            Statement::ShowIndexes { table } => self.execute_show_indexes(table.as_deref()),
            Statement::ShowDatabases => self.execute_show_databases(),
            Statement::Begin => self.execute_begin(),
            Statement::Commit => self.execute_commit(),
            Statement::Rollback => self.execute_rollback(),
            Statement::Save => self.execute_save(),
            Statement::Vacuum { table } => self.execute_vacuum(table.as_deref()),
            Statement::Analyze { table } => self.execute_analyze(table.as_deref()),
            Statement::Explain { query } => self.execute_explain(query),
            Statement::CreateUser {
                username,
                password,
                is_admin,
            } => self.execute_create_user(username, password, *is_admin),
            Statement::DropUser { username } => self.execute_drop_user(username),
            Statement::AlterUser {
                username,
                new_password,
            } => self.execute_alter_user(username, new_password),
            Statement::Grant(grant) => self.execute_grant(grant),
            Statement::Revoke(revoke) => self.execute_revoke(revoke),
        }
    }

    // ---- transaction plumbing ----

    fn execute_begin(&mut self) -> DbResult<QueryResult> {
        if self.current_txn.is_some() {
            return Err(DbError::Semantic("transaction already open".into()));
        }
        let db = self.manager.current_database()?;
        let txn = db.txns().begin()?;
        self.current_txn = Some(txn);
        Ok(QueryResult::ok(format!("transaction {} started", txn.0)))
    }

    fn execute_commit(&mut self) -> DbResult<QueryResult> {
        let txn = self
            .current_txn
            .take()
            .ok_or_else(|| DbError::Semantic("no open transaction".into()))?;
        let db = self.manager.current_database()?;
        db.txns().commit(txn)?;
        Ok(QueryResult::ok(format!("transaction {} committed", txn.0)))
    }

    fn execute_rollback(&mut self) -> DbResult<QueryResult> {
        let txn = self
            .current_txn
            .take()
            .ok_or_else(|| DbError::Semantic("no open transaction".into()))?;
        self.rollback_txn(txn)?;
        Ok(QueryResult::ok(format!("transaction {} rolled back", txn.0)))
    }

    fn rollback_txn(&mut self, txn: TxnId) -> DbResult<()> {
        let db = self.manager.current_database()?;
        let undo = db.txns().abort(txn)?;
        self.apply_undo(&db, txn, &undo)?;
        db.txns().complete_abort(txn)?;
        // Results read inside the rolled-back transaction are stale.
        self.cache.clear_database(db.name());
        Ok(())
    }

    /// Run `body` inside the open transaction, or an autocommit one.
    /// Autocommit commits on success and rolls back on failure; an explicit
    /// transaction is left open either way (non-fatal errors do not abort
    /// it).
    fn with_txn<T>(
        &mut self,
        db: &Arc<Database>,
        body: impl FnOnce(&mut Self, TxnId) -> DbResult<T>,
    ) -> DbResult<T> {
        if let Some(txn) = self.current_txn {
            return body(self, txn);
        }
        let txn = db.txns().begin()?;
        match body(self, txn) {
            Ok(value) => {
                db.txns().commit(txn)?;
                Ok(value)
            }
            Err(err) => {
                let undo = db.txns().abort(txn)?;
                self.apply_undo(db, txn, &undo)?;
                db.txns().complete_abort(txn)?;
                Err(err)
            }
        }
    }

    // ---- shared helpers ----

    fn current_db(&self) -> DbResult<Arc<Database>> {
        self.manager.current_database()
    }

    /// Permission gate consulted before DML/DQL on user tables.
    fn ensure_permission(
        &self,
        database: &str,
        table: &str,
        privilege: PrivilegeKind,
    ) -> DbResult<()> {
        let auth = self.manager.auth_manager()?;
        let perms = self.manager.permission_manager()?;
        if perms.has_privilege(&auth, &self.current_user, database, table, privilege)? {
            Ok(())
        } else {
            Err(DbError::PermissionDenied(format!(
                "user '{}' lacks {} on {database}.{table}",
                self.current_user,
                privilege.as_str()
            )))
        }
    }
}
