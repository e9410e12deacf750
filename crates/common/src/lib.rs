use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Logical identifier for a page in the database file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Sentinel for "no page" (end of a page chain, empty table, absent root).
pub const INVALID_PAGE_ID: PageId = PageId(u64::MAX);

impl PageId {
    pub fn is_valid(&self) -> bool {
        *self != INVALID_PAGE_ID
    }
}

/// Table-wide identifier of a logical row. Stable across in-place updates,
/// reassigned when an oversized update forces a re-insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

pub const INVALID_ROW_ID: RowId = RowId(0);

impl RowId {
    pub fn is_valid(&self) -> bool {
        *self != INVALID_ROW_ID
    }
}

/// Transaction identifier. Zero marks "no transaction" in record headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

pub const INVALID_TXN_ID: TxnId = TxnId(0);

impl TxnId {
    pub fn is_valid(&self) -> bool {
        *self != INVALID_TXN_ID
    }
}

/// Log sequence number: the monotonically increasing identifier of a WAL
/// record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub fn next(self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

/// Positional row representation backed by `types::Value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Canonical error type shared across database subsystems.
///
/// Variants follow the engine's error taxonomy; every variant carries a
/// human-readable message so the error can be surfaced in a `QueryResult`
/// or mapped to a wire error code. The type is `Clone` on purpose: I/O
/// errors are captured as strings at the boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("semantic error: {0}")]
    Semantic(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("lock timeout: {0}")]
    LockTimeout(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("wal: {0}")]
    Wal(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("exec: {0}")]
    Executor(String),
}

impl DbError {
    /// Numeric code used by the wire protocol's ERROR_RESPONSE.
    pub fn code(&self) -> u32 {
        match self {
            DbError::Syntax(_) => 1001,
            DbError::Semantic(_) => 1002,
            DbError::PermissionDenied(_) => 1003,
            DbError::Constraint(_) => 1004,
            DbError::DivisionByZero | DbError::Arithmetic(_) => 1005,
            DbError::Io(_) => 2001,
            DbError::LockTimeout(_) => 2002,
            DbError::Corruption(_) => 2003,
            DbError::NotImplemented(_) => 3001,
            DbError::Storage(_) => 2004,
            DbError::Wal(_) => 2005,
            DbError::Catalog(_) => 1006,
            DbError::Executor(_) => 1007,
        }
    }

    /// Fatal errors abort the enclosing transaction; the rest leave it open.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DbError::Io(_) | DbError::Corruption(_) | DbError::Storage(_) | DbError::Wal(_)
        )
    }
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Io(err.to_string())
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Outcome of executing a single SQL statement.
///
/// Errors travel in-band: a failed statement produces
/// `success == false` with `error` set, never a panic or an exception
/// crossing the executor boundary.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    pub success: bool,
    pub message: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub affected: u64,
    pub error: Option<DbError>,
}

impl QueryResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let message = format!("{} row(s)", rows.len());
        Self {
            success: true,
            message,
            columns,
            rows,
            ..Default::default()
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            success: true,
            message: format!("{count} row(s) affected"),
            affected: count,
            ..Default::default()
        }
    }

    pub fn error(err: DbError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            error: Some(err),
            ..Default::default()
        }
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.success {
            return write!(f, "ERROR: {}", self.message);
        }
        if self.rows.is_empty() {
            return f.write_str(&self.message);
        }
        writeln!(f, "{}", self.columns.join(" | "))?;
        for row in &self.rows {
            let cells: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        write!(f, "{} row(s)", self.rows.len())
    }
}

/// Runtime configuration for the database components.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(512)
///     .catalog_in_db(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory holding one subdirectory per database.
    #[builder(default = PathBuf::from("./qindb_data"))]
    pub data_dir: PathBuf,
    /// Number of pages the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Store the catalog in system tables instead of a sidecar file.
    #[builder(default = false)]
    pub catalog_in_db: bool,
    /// Store the WAL in system tables instead of a sidecar file.
    #[builder(default = false)]
    pub wal_in_db: bool,
    /// Deadline for page lock acquisition, in milliseconds.
    #[builder(default = 5_000)]
    pub lock_timeout_ms: u64,
    /// Number of cached query results; 0 disables the cache.
    #[builder(default = 128)]
    pub query_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./qindb_data"),
            buffer_pool_pages: 256,
            catalog_in_db: false,
            wal_in_db: false,
            lock_timeout_ms: 5_000,
            query_cache_capacity: 128,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        Config, DbError, DbResult, Lsn, PageId, QueryResult, Row, RowId, TxnId, INVALID_PAGE_ID,
        INVALID_ROW_ID, INVALID_TXN_ID,
    };
    pub use types::{DataType, Value};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_invalid() {
        assert!(!INVALID_PAGE_ID.is_valid());
        assert!(!INVALID_ROW_ID.is_valid());
        assert!(!INVALID_TXN_ID.is_valid());
        assert!(PageId(0).is_valid());
        assert!(RowId(1).is_valid());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(DbError::Syntax("x".into()).code(), 1001);
        assert_eq!(DbError::PermissionDenied("x".into()).code(), 1003);
        assert_eq!(DbError::DivisionByZero.code(), 1005);
        assert_eq!(DbError::Corruption("x".into()).code(), 2003);
    }

    #[test]
    fn fatal_errors_abort_transactions() {
        assert!(DbError::Io("disk gone".into()).is_fatal());
        assert!(DbError::Corruption("bad magic".into()).is_fatal());
        assert!(!DbError::Constraint("dup key".into()).is_fatal());
        assert!(!DbError::Syntax("oops".into()).is_fatal());
    }

    #[test]
    fn query_result_carries_error_in_band() {
        let res = QueryResult::error(DbError::Constraint("duplicate key '5'".into()));
        assert!(!res.success);
        assert_eq!(res.error.as_ref().unwrap().code(), 1004);
        assert!(res.message.contains("duplicate key"));
    }

    #[test]
    fn query_result_display_renders_rows() {
        let res = QueryResult::with_rows(
            vec!["id".into(), "name".into()],
            vec![Row::new(vec![Value::Int(1), Value::Varchar("Alice".into())])],
        );
        let text = res.to_string();
        assert!(text.contains("id | name"));
        assert!(text.contains("1 | Alice"));
    }

    #[test]
    fn config_builder_defaults() {
        let config = Config::builder().build();
        assert_eq!(config.buffer_pool_pages, 256);
        assert!(!config.catalog_in_db);
        assert_eq!(config.lock_timeout_ms, 5_000);
    }
}
