//! DDL: tables, indexes, ALTER TABLE, and the SHOW statements.

use std::sync::Arc;

use btree::GenericBPlusTree;
use catalog::{ColumnDef, IndexDef, IndexKind, TableDef};
use common::{DbError, DbResult, QueryResult, Row, INVALID_PAGE_ID, INVALID_TXN_ID};
use database::{Database, PrivilegeKind};
use expr::evaluate;
use hash::HashIndex;
use parser::{
    AlterTableOp, AlterTableStatement, ColumnDefAst, CreateIndexStatement, CreateTableStatement,
    IndexType,
};
use storage::PageType;
use tracing::info;
use types::Value;

use crate::indexes::IndexHandle;
use crate::Executor;

impl Executor<'_> {
    pub(crate) fn execute_create_table(
        &mut self,
        stmt: &CreateTableStatement,
    ) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), &stmt.name, PrivilegeKind::All)?;

        if db.catalog().read().table_exists(&stmt.name) {
            if stmt.if_not_exists {
                return Ok(QueryResult::ok(format!(
                    "table '{}' already exists",
                    stmt.name
                )));
            }
            return Err(DbError::Semantic(format!(
                "table '{}' already exists",
                stmt.name
            )));
        }

        let columns: Vec<ColumnDef> = stmt.columns.iter().map(column_from_ast).collect();
        let table = TableDef::new(&stmt.name, columns);
        db.catalog().write().create_table(table)?;

        // Auto-created unique indexes back PRIMARY KEY and UNIQUE columns.
        let auto: Vec<(String, String)> = {
            let catalog = db.catalog().read();
            let table = catalog.get_table(&stmt.name)?;
            let mut auto = Vec::new();
            if let Some(pk) = table.primary_key_column() {
                auto.push((format!("pk_{}", stmt.name.to_lowercase()), pk.name.clone()));
            }
            for column in &table.columns {
                if column.unique && !column.primary_key {
                    auto.push((
                        format!("uq_{}_{}", stmt.name.to_lowercase(), column.name.to_lowercase()),
                        column.name.clone(),
                    ));
                }
            }
            auto
        };
        for (index_name, column) in auto {
            self.create_index_structure(
                &db,
                &index_name,
                &stmt.name,
                IndexKind::BTree,
                &[column],
                true,
                true,
            )?;
        }

        db.catalog().read().save()?;
        db.pool().flush_all_pages()?;
        info!(table = %stmt.name, "table created");
        Ok(QueryResult::ok(format!("table '{}' created", stmt.name)))
    }

    pub(crate) fn execute_drop_table(
        &mut self,
        name: &str,
        if_exists: bool,
    ) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), name, PrivilegeKind::All)?;

        if !db.catalog().read().table_exists(name) {
            if if_exists {
                return Ok(QueryResult::ok(format!("table '{name}' absent")));
            }
            return Err(DbError::Semantic(format!("unknown table '{name}'")));
        }

        let table = db.catalog().write().drop_table(name)?;
        // Free the index pages, then the heap chain.
        for def in &table.indexes {
            self.destroy_index_structure(&db, def)?;
        }
        db.heap().deallocate(&table)?;

        db.catalog().read().save()?;
        db.pool().flush_all_pages()?;
        self.cache.invalidate_table(db.name(), name);
        Ok(QueryResult::ok(format!("table '{name}' dropped")))
    }

    pub(crate) fn execute_create_index(
        &mut self,
        stmt: &CreateIndexStatement,
    ) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), &stmt.table, PrivilegeKind::All)?;

        if db.catalog().read().get_index(&stmt.name).is_ok() {
            if stmt.if_not_exists {
                return Ok(QueryResult::ok(format!(
                    "index '{}' already exists",
                    stmt.name
                )));
            }
            return Err(DbError::Semantic(format!(
                "index '{}' already exists",
                stmt.name
            )));
        }
        if stmt.columns.len() != 1 {
            return Err(DbError::NotImplemented(
                "composite index keys".into(),
            ));
        }

        let kind = match stmt.index_type {
            IndexType::BTree => IndexKind::BTree,
            IndexType::Hash => IndexKind::Hash,
            IndexType::FullText => IndexKind::FullText,
        };
        self.create_index_structure(
            &db,
            &stmt.name,
            &stmt.table,
            kind,
            &stmt.columns,
            stmt.unique,
            false,
        )?;

        db.catalog().read().save()?;
        db.pool().flush_all_pages()?;
        Ok(QueryResult::ok(format!("index '{}' created", stmt.name)))
    }

    /// Allocate the index structure, register it in the catalog, and
    /// back-fill it from the table's existing rows.
    #[allow(clippy::too_many_arguments)]
    fn create_index_structure(
        &mut self,
        db: &Arc<Database>,
        index_name: &str,
        table_name: &str,
        kind: IndexKind,
        columns: &[String],
        unique: bool,
        auto_created: bool,
    ) -> DbResult<()> {
        let table = db.catalog().read().get_table(table_name)?.clone();
        let column = columns.first().ok_or_else(|| {
            DbError::Semantic("index must name at least one column".into())
        })?;
        let key_type = table
            .column(column)
            .ok_or_else(|| {
                DbError::Semantic(format!(
                    "unknown column '{column}' on table '{table_name}'"
                ))
            })?
            .data_type;

        let root_page_id = match kind {
            IndexKind::BTree => {
                let tree = GenericBPlusTree::create(
                    Arc::clone(db.pool()),
                    key_type,
                    unique,
                    GenericBPlusTree::DEFAULT_MAX_KEYS,
                )?;
                tree.root_page_id()
            }
            IndexKind::Hash => {
                let index = HashIndex::create(Arc::clone(db.pool()), key_type)?;
                index.root_page_id()
            }
            IndexKind::FullText => {
                // Cataloged only; MATCH evaluates during scans. A meta page
                // keeps root_page_id valid per the index contract.
                let (page_id, page) = db.pool().new_page()?;
                page.write().set_page_type(PageType::Meta);
                db.pool().unpin_page(page_id, true)?;
                page_id
            }
        };

        let def = IndexDef {
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            kind,
            key_type,
            columns: columns.to_vec(),
            unique,
            auto_created,
            root_page_id,
        };

        // Back-fill from existing rows; a uniqueness clash destroys the
        // half-built structure and fails the statement.
        let mut root = def.root_page_id;
        if kind != IndexKind::FullText {
            let ordinal = table.column_index(column).expect("column checked above");
            let mut fill_err: Option<DbError> = None;
            for row in db.heap().scan(&table)? {
                if row.header.is_deleted() {
                    continue;
                }
                let key = row.values[ordinal].clone();
                if key.is_null() {
                    continue;
                }
                let step = match kind {
                    IndexKind::BTree => {
                        let tree = GenericBPlusTree::open(
                            Arc::clone(db.pool()),
                            key_type,
                            unique,
                            GenericBPlusTree::DEFAULT_MAX_KEYS,
                            root,
                        );
                        let step = match tree.insert(&key, row.header.row_id) {
                            Ok(true) => Ok(()),
                            Ok(false) => Err(DbError::Constraint(format!(
                                "duplicate key {key} for unique index '{index_name}'"
                            ))),
                            Err(err) => Err(err),
                        };
                        root = tree.root_page_id();
                        step
                    }
                    IndexKind::Hash => {
                        let index =
                            HashIndex::open(Arc::clone(db.pool()), key_type, root)?;
                        if unique && !index.search_all(&key)?.is_empty() {
                            Err(DbError::Constraint(format!(
                                "duplicate key {key} for unique index '{index_name}'"
                            )))
                        } else {
                            index.insert(&key, row.header.row_id)
                        }
                    }
                    IndexKind::FullText => Ok(()),
                };
                if let Err(err) = step {
                    fill_err = Some(err);
                    break;
                }
            }
            if let Some(err) = fill_err {
                let mut doomed = def;
                doomed.root_page_id = root;
                self.destroy_index_structure(db, &doomed)?;
                return Err(err);
            }
        }

        let mut registered = def;
        registered.root_page_id = root;
        db.catalog().write().create_index(registered)?;
        Ok(())
    }

    pub(crate) fn execute_drop_index(
        &mut self,
        name: &str,
        if_exists: bool,
    ) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        if db.catalog().read().get_index(name).is_err() {
            if if_exists {
                return Ok(QueryResult::ok(format!("index '{name}' absent")));
            }
            return Err(DbError::Semantic(format!("unknown index '{name}'")));
        }
        {
            let catalog = db.catalog().read();
            let def = catalog.get_index(name)?;
            self.ensure_permission(db.name(), &def.table_name, PrivilegeKind::All)?;
        }

        let def = db.catalog().write().drop_index(name)?;
        self.destroy_index_structure(&db, &def)?;
        db.catalog().read().save()?;
        db.pool().flush_all_pages()?;
        Ok(QueryResult::ok(format!("index '{name}' dropped")))
    }

    /// Deallocate every page an index reaches.
    pub(crate) fn destroy_index_structure(
        &self,
        db: &Arc<Database>,
        def: &IndexDef,
    ) -> DbResult<()> {
        match self.open_index(db, def)? {
            IndexHandle::BTree(tree) => tree.destroy()?,
            IndexHandle::Hash(index) => index.destroy()?,
            IndexHandle::FullText => {
                if def.root_page_id != INVALID_PAGE_ID {
                    db.pool().delete_page(def.root_page_id)?;
                    db.pool().disk().lock().deallocate_page(def.root_page_id);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn execute_alter_table(
        &mut self,
        stmt: &AlterTableStatement,
    ) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), &stmt.table, PrivilegeKind::All)?;

        match &stmt.op {
            AlterTableOp::AddColumn(column_ast) => {
                let column = column_from_ast(column_ast);
                {
                    let catalog = db.catalog().read();
                    let table = catalog.get_table(&stmt.table)?;
                    if table.column_index(&column.name).is_some() {
                        return Err(DbError::Semantic(format!(
                            "column '{}' already exists",
                            column.name
                        )));
                    }
                }
                let fill = match &column.default_expr {
                    Some(text) => {
                        let expr = parser::Parser::new(text)?.parse_expression()?;
                        crate::dml::coerce_value(&column, evaluate(&expr, None)?)?
                    }
                    None => Value::Null,
                };
                if column.not_null && fill.is_null() {
                    return Err(DbError::Constraint(format!(
                        "cannot add NOT NULL column '{}' without a default",
                        column.name
                    )));
                }
                self.rewrite_table_rows(&db, &stmt.table, |mut values| {
                    values.push(fill.clone());
                    Ok(values)
                })?;
                let mut catalog = db.catalog().write();
                let table = catalog.get_table_mut(&stmt.table)?;
                table.columns.push(column);
                catalog.save()?;
            }
            AlterTableOp::DropColumn(name) => {
                let ordinal = {
                    let catalog = db.catalog().read();
                    let table = catalog.get_table(&stmt.table)?;
                    let ordinal = table.column_index(name).ok_or_else(|| {
                        DbError::Semantic(format!("unknown column '{name}'"))
                    })?;
                    if table.columns[ordinal].primary_key {
                        return Err(DbError::Semantic(
                            "cannot drop the PRIMARY KEY column".into(),
                        ));
                    }
                    if !table.indexes_on(name).is_empty() {
                        return Err(DbError::Semantic(format!(
                            "column '{name}' is indexed; drop the index first"
                        )));
                    }
                    ordinal
                };
                self.rewrite_table_rows(&db, &stmt.table, |mut values| {
                    values.remove(ordinal);
                    Ok(values)
                })?;
                let mut catalog = db.catalog().write();
                let table = catalog.get_table_mut(&stmt.table)?;
                table.columns.remove(ordinal);
                catalog.save()?;
            }
            AlterTableOp::ModifyColumn(column_ast) => {
                let column = column_from_ast(column_ast);
                let ordinal = {
                    let catalog = db.catalog().read();
                    let table = catalog.get_table(&stmt.table)?;
                    table.column_index(&column.name).ok_or_else(|| {
                        DbError::Semantic(format!("unknown column '{}'", column.name))
                    })?
                };
                let target = column.data_type;
                self.rewrite_table_rows(&db, &stmt.table, |mut values| {
                    let old = values[ordinal].clone();
                    values[ordinal] = old.cast_to(target).ok_or_else(|| {
                        DbError::Semantic(format!("cannot convert {old} to {target}"))
                    })?;
                    Ok(values)
                })?;
                let mut catalog = db.catalog().write();
                let table = catalog.get_table_mut(&stmt.table)?;
                table.columns[ordinal] = column;
                catalog.save()?;
            }
            AlterTableOp::RenameColumn { from, to } => {
                let mut catalog = db.catalog().write();
                let table = catalog.get_table_mut(&stmt.table)?;
                if table.column_index(to).is_some() {
                    return Err(DbError::Semantic(format!("column '{to}' already exists")));
                }
                let ordinal = table.column_index(from).ok_or_else(|| {
                    DbError::Semantic(format!("unknown column '{from}'"))
                })?;
                table.columns[ordinal].name = to.clone();
                for index in &mut table.indexes {
                    for column in &mut index.columns {
                        if column.eq_ignore_ascii_case(from) {
                            *column = to.clone();
                        }
                    }
                }
                catalog.save()?;
            }
        }
        db.pool().flush_all_pages()?;
        self.cache.invalidate_table(db.name(), &stmt.table);
        Ok(QueryResult::ok(format!("table '{}' altered", stmt.table)))
    }

    /// Rebuild every row of a table through `transform`, preserving row
    /// ids. Used by ALTER TABLE column changes.
    fn rewrite_table_rows(
        &mut self,
        db: &Arc<Database>,
        table_name: &str,
        transform: impl Fn(Vec<Value>) -> DbResult<Vec<Value>>,
    ) -> DbResult<()> {
        let mut catalog = db.catalog().write();
        let table = catalog.get_table_mut(table_name)?;
        let heap = db.heap();

        let rows = heap.scan(table)?;
        heap.deallocate(table)?;
        table.first_page_id = INVALID_PAGE_ID;
        for row in rows {
            if row.header.is_deleted() {
                continue;
            }
            let new_values = transform(row.values)?;
            heap.insert_row_with_id(table, &new_values, row.header.row_id, INVALID_TXN_ID)?;
        }
        Ok(())
    }

    // ---- SHOW ----

    pub(crate) fn execute_show_tables(&mut self) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        let names = db.catalog().read().get_all_table_names();
        let rows = names
            .into_iter()
            .map(|name| Row::new(vec![Value::Varchar(name)]))
            .collect();
        Ok(QueryResult::with_rows(vec!["table_name".into()], rows))
    }

    pub(crate) fn execute_show_indexes(&mut self, table: Option<&str>) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        let catalog = db.catalog().read();
        let mut rows = Vec::new();
        for table_def in catalog.tables() {
            if let Some(filter) = table {
                if !table_def.name.eq_ignore_ascii_case(filter) {
                    continue;
                }
            }
            for index in &table_def.indexes {
                rows.push(Row::new(vec![
                    Value::Varchar(index.name.clone()),
                    Value::Varchar(table_def.name.clone()),
                    Value::Varchar(format!("{:?}", index.kind).to_uppercase()),
                    Value::Varchar(index.columns.join(", ")),
                    Value::Bool(index.unique),
                ]));
            }
        }
        Ok(QueryResult::with_rows(
            vec![
                "index_name".into(),
                "table_name".into(),
                "index_type".into(),
                "columns".into(),
                "unique".into(),
            ],
            rows,
        ))
    }

    pub(crate) fn execute_show_databases(&mut self) -> DbResult<QueryResult> {
        let names = self.manager.list_databases()?;
        let rows = names
            .into_iter()
            .map(|name| Row::new(vec![Value::Varchar(name)]))
            .collect();
        Ok(QueryResult::with_rows(vec!["database_name".into()], rows))
    }
}

/// Lower a parsed column definition into catalog form; the default
/// expression is kept as SQL text and re-parsed at insert time.
pub(crate) fn column_from_ast(ast: &ColumnDefAst) -> ColumnDef {
    ColumnDef {
        name: ast.name.clone(),
        data_type: ast.data_type,
        length: ast.length,
        scale: ast.scale,
        not_null: ast.not_null,
        primary_key: ast.primary_key,
        unique: ast.unique,
        auto_increment: ast.auto_increment,
        default_expr: ast.default_expr.as_ref().map(|e| e.to_string()),
    }
}
