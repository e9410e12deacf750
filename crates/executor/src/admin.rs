//! User management and GRANT/REVOKE.

use common::{DbError, DbResult, QueryResult};
use database::PrivilegeKind;
use parser::{GrantStatement, Privilege, RevokeStatement};

use crate::Executor;

fn privilege_kind(privilege: Privilege) -> PrivilegeKind {
    match privilege {
        Privilege::Select => PrivilegeKind::Select,
        Privilege::Insert => PrivilegeKind::Insert,
        Privilege::Update => PrivilegeKind::Update,
        Privilege::Delete => PrivilegeKind::Delete,
        Privilege::All => PrivilegeKind::All,
    }
}

impl Executor<'_> {
    fn require_admin(&self, action: &str) -> DbResult<()> {
        let auth = self.manager.auth_manager()?;
        if auth.is_admin(&self.current_user)? {
            Ok(())
        } else {
            Err(DbError::PermissionDenied(format!(
                "{action} requires administrator privileges"
            )))
        }
    }

    pub(crate) fn execute_create_user(
        &mut self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> DbResult<QueryResult> {
        self.require_admin("CREATE USER")?;
        let auth = self.manager.auth_manager()?;
        auth.create_user(username, password, is_admin)?;
        Ok(QueryResult::ok(format!("user '{username}' created")))
    }

    pub(crate) fn execute_drop_user(&mut self, username: &str) -> DbResult<QueryResult> {
        self.require_admin("DROP USER")?;
        if username.eq_ignore_ascii_case(&self.current_user) {
            return Err(DbError::Semantic("cannot drop the current user".into()));
        }
        let auth = self.manager.auth_manager()?;
        auth.drop_user(username)?;
        Ok(QueryResult::ok(format!("user '{username}' dropped")))
    }

    pub(crate) fn execute_alter_user(
        &mut self,
        username: &str,
        new_password: &str,
    ) -> DbResult<QueryResult> {
        // Users may change their own password; changing someone else's
        // takes an administrator.
        if !username.eq_ignore_ascii_case(&self.current_user) {
            self.require_admin("ALTER USER")?;
        }
        let auth = self.manager.auth_manager()?;
        auth.alter_user_password(username, new_password)?;
        Ok(QueryResult::ok(format!("password updated for '{username}'")))
    }

    pub(crate) fn execute_grant(&mut self, stmt: &GrantStatement) -> DbResult<QueryResult> {
        let auth = self.manager.auth_manager()?;
        let perms = self.manager.permission_manager()?;
        let privilege = privilege_kind(stmt.privilege);

        if !perms.has_grant_option(
            &auth,
            &self.current_user,
            &stmt.database,
            stmt.table.as_deref(),
            privilege,
        )? {
            return Err(DbError::PermissionDenied(format!(
                "user '{}' cannot grant {} on {}.{}",
                self.current_user,
                privilege.as_str(),
                stmt.database,
                stmt.table.as_deref().unwrap_or("*")
            )));
        }
        if !auth.user_exists(&stmt.username)? {
            return Err(DbError::Semantic(format!(
                "unknown user '{}'",
                stmt.username
            )));
        }

        perms.grant(
            &stmt.username,
            &stmt.database,
            stmt.table.as_deref(),
            privilege,
            stmt.with_grant_option,
            &self.current_user,
        )?;
        Ok(QueryResult::ok(format!(
            "granted {} on {}.{} to '{}'",
            privilege.as_str(),
            stmt.database,
            stmt.table.as_deref().unwrap_or("*"),
            stmt.username
        )))
    }

    pub(crate) fn execute_revoke(&mut self, stmt: &RevokeStatement) -> DbResult<QueryResult> {
        self.require_admin("REVOKE")?;
        let perms = self.manager.permission_manager()?;
        let privilege = privilege_kind(stmt.privilege);
        let removed = perms.revoke(
            &stmt.username,
            &stmt.database,
            stmt.table.as_deref(),
            privilege,
        )?;
        if removed == 0 {
            return Err(DbError::Semantic(format!(
                "no matching grant for '{}'",
                stmt.username
            )));
        }
        Ok(QueryResult::ok(format!(
            "revoked {} on {}.{} from '{}'",
            privilege.as_str(),
            stmt.database,
            stmt.table.as_deref().unwrap_or("*"),
            stmt.username
        )))
    }
}
