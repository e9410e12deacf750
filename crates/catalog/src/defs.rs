use common::{DbError, DbResult, PageId, INVALID_PAGE_ID};
use serde::{Deserialize, Serialize};
use types::{DataType, Value};

/// One column of a table schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Declared length for CHAR/VARCHAR, precision for DECIMAL, 0 otherwise.
    pub length: u32,
    /// Scale for DECIMAL, 0 otherwise.
    pub scale: u32,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub auto_increment: bool,
    /// Default value as SQL text, evaluated at insert time.
    pub default_expr: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: 0,
            scale: 0,
            not_null: false,
            primary_key: false,
            unique: false,
            auto_increment: false,
            default_expr: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }
}

/// Supported index implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    BTree,
    Hash,
    FullText,
}

/// Metadata for one index. `root_page_id` is kept current in the catalog on
/// every structural change to the index (root split, root collapse).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    pub kind: IndexKind,
    pub key_type: DataType,
    pub columns: Vec<String>,
    pub unique: bool,
    /// True for indexes the engine created itself (PRIMARY KEY backing).
    pub auto_created: bool,
    pub root_page_id: PageId,
}

/// Per-column ANALYZE output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub distinct_estimate: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

/// Table-level ANALYZE output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct TableStats {
    pub row_count: u64,
    /// Aligned with the table's column order.
    pub columns: Vec<ColumnStats>,
}

/// One table: schema, indexes, and the head of its page chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    /// `INVALID_PAGE_ID` while the table is empty.
    pub first_page_id: PageId,
    pub next_row_id: u64,
    pub stats: Option<TableStats>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            first_page_id: INVALID_PAGE_ID,
            next_row_id: 1,
            stats: None,
        }
    }

    pub(crate) fn validate(&self) -> DbResult<()> {
        if self.columns.is_empty() {
            return Err(DbError::Catalog(format!(
                "table '{}' must have at least one column",
                self.name
            )));
        }
        let mut pk_count = 0usize;
        for (i, column) in self.columns.iter().enumerate() {
            if column.primary_key {
                pk_count += 1;
            }
            for other in &self.columns[..i] {
                if other.name.eq_ignore_ascii_case(&column.name) {
                    return Err(DbError::Catalog(format!(
                        "duplicate column '{}' in table '{}'",
                        column.name, self.name
                    )));
                }
            }
        }
        if pk_count > 1 {
            return Err(DbError::Catalog(format!(
                "table '{}' declares more than one PRIMARY KEY column",
                self.name
            )));
        }
        Ok(())
    }

    /// Ordinal of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Indexes whose leading key column is `column`.
    pub fn indexes_on(&self, column: &str) -> Vec<&IndexDef> {
        self.indexes
            .iter()
            .filter(|idx| {
                idx.columns
                    .first()
                    .is_some_and(|c| c.eq_ignore_ascii_case(column))
            })
            .collect()
    }
}
