//! Index plumbing shared by DML and SELECT: opening handles from catalog
//! definitions, key extraction, and maintenance on row changes.

use std::sync::Arc;

use btree::GenericBPlusTree;
use catalog::{IndexDef, IndexKind, TableDef};
use common::{DbError, DbResult, RowId};
use database::Database;
use hash::HashIndex;
use types::Value;

use crate::Executor;

pub(crate) enum IndexHandle {
    BTree(GenericBPlusTree),
    Hash(HashIndex),
    /// FULLTEXT indexes are cataloged but carry no page structure; MATCH
    /// evaluates during the scan.
    FullText,
}

impl Executor<'_> {
    pub(crate) fn open_index(&self, db: &Arc<Database>, def: &IndexDef) -> DbResult<IndexHandle> {
        Ok(match def.kind {
            IndexKind::BTree => IndexHandle::BTree(GenericBPlusTree::open(
                Arc::clone(db.pool()),
                def.key_type,
                def.unique,
                GenericBPlusTree::DEFAULT_MAX_KEYS,
                def.root_page_id,
            )),
            IndexKind::Hash => {
                IndexHandle::Hash(HashIndex::open(Arc::clone(db.pool()), def.key_type, def.root_page_id)?)
            }
            IndexKind::FullText => IndexHandle::FullText,
        })
    }

    /// The key value an index extracts from a row (leading column).
    pub(crate) fn index_key(
        table: &TableDef,
        def: &IndexDef,
        values: &[Value],
    ) -> DbResult<Value> {
        let column = def.columns.first().ok_or_else(|| {
            DbError::Catalog(format!("index '{}' has no columns", def.name))
        })?;
        let ordinal = table.column_index(column).ok_or_else(|| {
            DbError::Catalog(format!(
                "index '{}' references unknown column '{column}'",
                def.name
            ))
        })?;
        values
            .get(ordinal)
            .cloned()
            .ok_or_else(|| DbError::Corruption("row shorter than schema".into()))
    }

    /// Check unique indexes before touching the heap: a present key fails
    /// with a constraint violation.
    pub(crate) fn check_unique_indexes(
        &self,
        db: &Arc<Database>,
        table: &TableDef,
        values: &[Value],
        ignore_row: Option<RowId>,
    ) -> DbResult<()> {
        for def in &table.indexes {
            if !def.unique {
                continue;
            }
            let key = Self::index_key(table, def, values)?;
            if key.is_null() {
                continue;
            }
            let existing: Vec<RowId> = match self.open_index(db, def)? {
                IndexHandle::BTree(tree) => tree.search_all(&key)?,
                IndexHandle::Hash(index) => index.search_all(&key)?,
                IndexHandle::FullText => continue,
            };
            let conflict = existing
                .into_iter()
                .any(|rid| ignore_row.map_or(true, |ignored| rid != ignored));
            if conflict {
                return Err(DbError::Constraint(format!(
                    "duplicate key {key} for unique index '{}'",
                    def.name
                )));
            }
        }
        Ok(())
    }

    /// Insert a row's keys into every index. Returns the indexes whose
    /// root page moved so the caller can persist the new roots.
    pub(crate) fn index_insert_row(
        &self,
        db: &Arc<Database>,
        table: &TableDef,
        values: &[Value],
        row_id: RowId,
    ) -> DbResult<Vec<(String, common::PageId)>> {
        let mut moved_roots = Vec::new();
        for def in &table.indexes {
            let key = Self::index_key(table, def, values)?;
            if key.is_null() {
                continue;
            }
            match self.open_index(db, def)? {
                IndexHandle::BTree(tree) => {
                    if !tree.insert(&key, row_id)? {
                        return Err(DbError::Constraint(format!(
                            "duplicate key {key} for unique index '{}'",
                            def.name
                        )));
                    }
                    if tree.root_page_id() != def.root_page_id {
                        moved_roots.push((def.name.clone(), tree.root_page_id()));
                    }
                }
                IndexHandle::Hash(index) => index.insert(&key, row_id)?,
                IndexHandle::FullText => {}
            }
        }
        Ok(moved_roots)
    }

    /// Remove a row's keys from every index.
    pub(crate) fn index_remove_row(
        &self,
        db: &Arc<Database>,
        table: &TableDef,
        values: &[Value],
        row_id: RowId,
    ) -> DbResult<Vec<(String, common::PageId)>> {
        let mut moved_roots = Vec::new();
        for def in &table.indexes {
            let key = Self::index_key(table, def, values)?;
            if key.is_null() {
                continue;
            }
            match self.open_index(db, def)? {
                IndexHandle::BTree(tree) => {
                    tree.remove_entry(&key, Some(row_id))?;
                    if tree.root_page_id() != def.root_page_id {
                        moved_roots.push((def.name.clone(), tree.root_page_id()));
                    }
                }
                IndexHandle::Hash(index) => {
                    index.remove(&key, row_id)?;
                }
                IndexHandle::FullText => {}
            }
        }
        Ok(moved_roots)
    }

    /// Persist moved index roots into the table definition. The caller
    /// saves the catalog afterwards.
    pub(crate) fn apply_moved_roots(table: &mut TableDef, moved: Vec<(String, common::PageId)>) {
        for (name, root) in moved {
            if let Some(def) = table.indexes.iter_mut().find(|def| def.name == name) {
                def.root_page_id = root;
            }
        }
    }
}
