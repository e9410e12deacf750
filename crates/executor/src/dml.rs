//! INSERT / UPDATE / DELETE execution: constraint checks, page locking,
//! WAL page-image logging, undo recording, and index maintenance.

use std::sync::Arc;

use catalog::{ColumnDef, TableDef};
use common::{DbError, DbResult, PageId, QueryResult, Row, RowId, TxnId};
use database::{Database, HeapWrite, PrivilegeKind, UpdateOutcome};
use expr::{evaluate, evaluate_predicate, EvalContext};
use parser::{DeleteStatement, Expression, InsertSource, InsertStatement, UpdateStatement};
use txn::{LockMode, UndoKind, UndoRecord};
use types::Value;
use wal::{WalPayload, WalRecordType};

use crate::Executor;

impl Executor<'_> {
    pub(crate) fn execute_insert(&mut self, stmt: &InsertStatement) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), &stmt.table, PrivilegeKind::Insert)?;

        // Materialize the source rows up front.
        let value_rows: Vec<Vec<Value>> = match &stmt.source {
            InsertSource::Values(rows) => {
                let mut out = Vec::with_capacity(rows.len());
                for exprs in rows {
                    let mut values = Vec::with_capacity(exprs.len());
                    for e in exprs {
                        let resolved = self.resolve_subqueries(e.clone())?;
                        values.push(evaluate(&resolved, None)?);
                    }
                    out.push(values);
                }
                out
            }
            InsertSource::Select(select) => {
                let result = self.execute_select(select)?;
                result.rows.into_iter().map(Row::into_values).collect()
            }
        };

        let inserted = self.with_txn(&Arc::clone(&db), |this, txn| {
            let mut count = 0u64;
            for raw in &value_rows {
                let (table_snapshot, row) = {
                    let catalog = db.catalog().read();
                    let table = catalog.get_table(&stmt.table)?;
                    let row = build_row(table, &stmt.columns, raw)?;
                    (table.clone(), row)
                };
                this.check_unique_indexes(&db, &table_snapshot, &row, None)?;
                this.insert_one(&db, txn, &stmt.table, &row)?;
                count += 1;
            }
            Ok(count)
        })?;

        {
            let catalog = db.catalog().read();
            catalog.save()?;
        }
        self.cache.invalidate_table(db.name(), &stmt.table);
        Ok(QueryResult::affected(inserted))
    }

    /// Heap insert + lock + WAL + undo + index maintenance for one row.
    fn insert_one(
        &mut self,
        db: &Arc<Database>,
        txn: TxnId,
        table_name: &str,
        row: &[Value],
    ) -> DbResult<()> {
        let mut catalog = db.catalog().write();
        let table = catalog.get_table_mut(table_name)?;

        let (row_id, write) = db.heap().insert_row(table, row, txn)?;
        self.lock_exclusive(db, txn, write.page_id)?;
        self.log_page_write(db, WalRecordType::Insert, txn, &write)?;
        db.txns().add_undo_record(
            txn,
            UndoRecord {
                kind: UndoKind::Insert,
                table_name: table_name.to_string(),
                page_id: write.page_id,
                slot: write.slot,
                before_image: Some(Row::new(row.to_vec())),
                row_id,
            },
        )?;

        let table_snapshot = table.clone();
        let moved = self.index_insert_row(db, &table_snapshot, row, row_id)?;
        Self::apply_moved_roots(table, moved);
        Ok(())
    }

    pub(crate) fn execute_update(&mut self, stmt: &UpdateStatement) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), &stmt.table, PrivilegeKind::Update)?;

        let where_clause = stmt
            .where_clause
            .clone()
            .map(|e| self.resolve_subqueries(e))
            .transpose()?;
        let assignments: Vec<(String, Expression)> = stmt
            .assignments
            .iter()
            .map(|(col, e)| Ok((col.clone(), self.resolve_subqueries(e.clone())?)))
            .collect::<DbResult<_>>()?;

        let (table_snapshot, matches) =
            self.collect_matches(&db, &stmt.table, where_clause.as_ref())?;

        let affected = self.with_txn(&Arc::clone(&db), |this, txn| {
            let schema = table_schema_labels(&table_snapshot);
            let mut count = 0u64;
            for (page_id, slot, old_values, old_row_id) in &matches {
                let ctx = EvalContext::new(&schema, old_values);
                let mut new_values = old_values.clone();
                for (column, assign_expr) in &assignments {
                    let ordinal = table_snapshot.column_index(column).ok_or_else(|| {
                        DbError::Semantic(format!(
                            "unknown column '{column}' in table '{}'",
                            table_snapshot.name
                        ))
                    })?;
                    let raw = evaluate(assign_expr, Some(&ctx))?;
                    new_values[ordinal] =
                        coerce_value(&table_snapshot.columns[ordinal], raw)?;
                }
                check_not_null(&table_snapshot, &new_values)?;
                this.check_unique_indexes(&db, &table_snapshot, &new_values, Some(*old_row_id))?;

                this.lock_exclusive(&db, txn, *page_id)?;
                this.update_one(
                    &db,
                    txn,
                    &stmt.table,
                    *page_id,
                    *slot,
                    old_values,
                    &new_values,
                    *old_row_id,
                )?;
                count += 1;
            }
            Ok(count)
        })?;

        db.catalog().read().save()?;
        self.cache.invalidate_table(db.name(), &stmt.table);
        Ok(QueryResult::affected(affected))
    }

    #[allow(clippy::too_many_arguments)]
    fn update_one(
        &mut self,
        db: &Arc<Database>,
        txn: TxnId,
        table_name: &str,
        page_id: PageId,
        slot: u16,
        old_values: &[Value],
        new_values: &[Value],
        old_row_id: RowId,
    ) -> DbResult<()> {
        let mut catalog = db.catalog().write();
        let table = catalog.get_table_mut(table_name)?;

        let outcome = db
            .heap()
            .update_row(table, page_id, slot, new_values, txn)?;
        let table_snapshot = table.clone();

        match outcome {
            UpdateOutcome::InPlace { write, row_id } => {
                self.log_page_write(db, WalRecordType::Update, txn, &write)?;
                db.txns().add_undo_record(
                    txn,
                    UndoRecord {
                        kind: UndoKind::Update,
                        table_name: table_name.to_string(),
                        page_id,
                        slot,
                        before_image: Some(Row::new(old_values.to_vec())),
                        row_id,
                    },
                )?;
                let mut moved = self.index_remove_row(db, &table_snapshot, old_values, row_id)?;
                moved.extend(self.index_insert_row(db, &table_snapshot, new_values, row_id)?);
                Self::apply_moved_roots(table, moved);
            }
            UpdateOutcome::Reinserted {
                delete,
                insert,
                new_row_id,
            } => {
                self.lock_exclusive(db, txn, insert.page_id)?;
                self.log_page_write(db, WalRecordType::Delete, txn, &delete)?;
                self.log_page_write(db, WalRecordType::Insert, txn, &insert)?;
                db.txns().add_undo_record(
                    txn,
                    UndoRecord {
                        kind: UndoKind::Delete,
                        table_name: table_name.to_string(),
                        page_id,
                        slot,
                        before_image: Some(Row::new(old_values.to_vec())),
                        row_id: old_row_id,
                    },
                )?;
                db.txns().add_undo_record(
                    txn,
                    UndoRecord {
                        kind: UndoKind::Insert,
                        table_name: table_name.to_string(),
                        page_id: insert.page_id,
                        slot: insert.slot,
                        before_image: Some(Row::new(new_values.to_vec())),
                        row_id: new_row_id,
                    },
                )?;
                let mut moved =
                    self.index_remove_row(db, &table_snapshot, old_values, old_row_id)?;
                moved.extend(self.index_insert_row(db, &table_snapshot, new_values, new_row_id)?);
                Self::apply_moved_roots(table, moved);
            }
        }
        Ok(())
    }

    pub(crate) fn execute_delete(&mut self, stmt: &DeleteStatement) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        self.ensure_permission(db.name(), &stmt.table, PrivilegeKind::Delete)?;

        let where_clause = stmt
            .where_clause
            .clone()
            .map(|e| self.resolve_subqueries(e))
            .transpose()?;
        let (table_snapshot, matches) =
            self.collect_matches(&db, &stmt.table, where_clause.as_ref())?;

        let affected = self.with_txn(&Arc::clone(&db), |this, txn| {
            let mut count = 0u64;
            for (page_id, slot, values, row_id) in &matches {
                this.lock_exclusive(&db, txn, *page_id)?;

                let write = db.heap().delete_row(*page_id, *slot, txn)?;
                this.log_page_write(&db, WalRecordType::Delete, txn, &write)?;
                db.txns().add_undo_record(
                    txn,
                    UndoRecord {
                        kind: UndoKind::Delete,
                        table_name: stmt.table.clone(),
                        page_id: *page_id,
                        slot: *slot,
                        before_image: Some(Row::new(values.clone())),
                        row_id: *row_id,
                    },
                )?;

                let moved = this.index_remove_row(&db, &table_snapshot, values, *row_id)?;
                let mut catalog = db.catalog().write();
                let table = catalog.get_table_mut(&stmt.table)?;
                Self::apply_moved_roots(table, moved);
                count += 1;
            }
            Ok(count)
        })?;

        db.catalog().read().save()?;
        self.cache.invalidate_table(db.name(), &stmt.table);
        Ok(QueryResult::affected(affected))
    }

    /// Rows of `table` matching the (already subquery-free) predicate,
    /// as `(page, slot, values, row_id)`.
    fn collect_matches(
        &mut self,
        db: &Arc<Database>,
        table_name: &str,
        predicate: Option<&Expression>,
    ) -> DbResult<(TableDef, Vec<(PageId, u16, Vec<Value>, RowId)>)> {
        let catalog = db.catalog().read();
        let table = catalog.get_table(table_name)?.clone();
        drop(catalog);

        let schema = table_schema_labels(&table);
        let mut matches = Vec::new();
        for row in db.heap().scan(&table)? {
            if row.header.is_deleted() {
                continue;
            }
            if let Some(predicate) = predicate {
                let ctx = EvalContext::new(&schema, &row.values);
                if !evaluate_predicate(predicate, Some(&ctx))? {
                    continue;
                }
            }
            matches.push((row.page_id, row.slot, row.values, row.header.row_id));
        }
        Ok((table, matches))
    }

    /// Apply a transaction's undo records (already in reverse order),
    /// logging each compensating page write under the aborting
    /// transaction. The caller finishes with `complete_abort`, whose ABORT
    /// record terminates the transaction for recovery analysis.
    pub(crate) fn apply_undo(
        &mut self,
        db: &Arc<Database>,
        txn: TxnId,
        undo: &[UndoRecord],
    ) -> DbResult<()> {
        for record in undo {
            let before = record
                .before_image
                .as_ref()
                .map(|row| row.values.clone())
                .unwrap_or_default();
            match record.kind {
                UndoKind::Insert => {
                    let write = db.heap().tombstone_row(record.page_id, record.slot)?;
                    self.log_page_write(db, WalRecordType::Update, txn, &write)?;
                    self.undo_index_remove(db, record, &before)?;
                }
                UndoKind::Update => {
                    // Remove the keys of the current (new) values first.
                    let current = db.heap().row_at(record.page_id, record.slot)?;
                    self.undo_index_remove(db, record, &current.values)?;
                    let write =
                        db.heap()
                            .restore_row(record.page_id, record.slot, &before, txn)?;
                    self.log_page_write(db, WalRecordType::Update, txn, &write)?;
                    self.undo_index_insert(db, record, &before)?;
                }
                UndoKind::Delete => {
                    let write = db.heap().undelete_row(record.page_id, record.slot)?;
                    self.log_page_write(db, WalRecordType::Update, txn, &write)?;
                    self.undo_index_insert(db, record, &before)?;
                }
            }
        }
        Ok(())
    }

    fn undo_index_remove(
        &mut self,
        db: &Arc<Database>,
        record: &UndoRecord,
        values: &[Value],
    ) -> DbResult<()> {
        let mut catalog = db.catalog().write();
        let table = catalog.get_table_mut(&record.table_name)?;
        let snapshot = table.clone();
        let moved = self.index_remove_row(db, &snapshot, values, record.row_id)?;
        Self::apply_moved_roots(table, moved);
        Ok(())
    }

    fn undo_index_insert(
        &mut self,
        db: &Arc<Database>,
        record: &UndoRecord,
        values: &[Value],
    ) -> DbResult<()> {
        let mut catalog = db.catalog().write();
        let table = catalog.get_table_mut(&record.table_name)?;
        let snapshot = table.clone();
        let moved = self.index_insert_row(db, &snapshot, values, record.row_id)?;
        Self::apply_moved_roots(table, moved);
        Ok(())
    }

    // ---- low-level plumbing ----

    pub(crate) fn log_page_write(
        &self,
        db: &Arc<Database>,
        rtype: WalRecordType,
        txn: TxnId,
        write: &HeapWrite,
    ) -> DbResult<()> {
        let payload = WalPayload::PageWrite {
            page_id: write.page_id,
            before: write.before.clone(),
            after: write.after.clone(),
        }
        .encode()?;
        let lsn = db.wal().append(rtype, txn, payload)?;
        db.heap().stamp_page_lsn(write.page_id, lsn)?;
        db.txns().set_last_lsn(txn, lsn);
        Ok(())
    }

    pub(crate) fn lock_exclusive(
        &self,
        db: &Arc<Database>,
        txn: TxnId,
        page_id: PageId,
    ) -> DbResult<()> {
        let granted =
            db.txns()
                .lock_page(txn, page_id, LockMode::Exclusive, db.lock_timeout_ms())?;
        if granted {
            Ok(())
        } else {
            Err(DbError::LockTimeout(format!(
                "page {} is held by another transaction",
                page_id.0
            )))
        }
    }
}

/// Column labels for a single-table row context (bare lowercase names).
pub(crate) fn table_schema_labels(table: &TableDef) -> Vec<String> {
    table
        .columns
        .iter()
        .map(|c| c.name.to_lowercase())
        .collect()
}

/// Coerce an evaluated value into a column's declared type, enforcing
/// declared lengths.
pub(crate) fn coerce_value(column: &ColumnDef, value: Value) -> DbResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let coerced = value.cast_to(column.data_type).ok_or_else(|| {
        DbError::Semantic(format!(
            "cannot store {value} in {} column '{}'",
            column.data_type, column.name
        ))
    })?;
    if column.length > 0 {
        if let Some(text) = coerced.as_str() {
            if text.chars().count() > column.length as usize {
                return Err(DbError::Constraint(format!(
                    "value too long for column '{}' ({} > {})",
                    column.name,
                    text.chars().count(),
                    column.length
                )));
            }
        }
    }
    Ok(coerced)
}

pub(crate) fn check_not_null(table: &TableDef, values: &[Value]) -> DbResult<()> {
    for (column, value) in table.columns.iter().zip(values) {
        if column.not_null && value.is_null() {
            return Err(DbError::Constraint(format!(
                "column '{}' is NOT NULL",
                column.name
            )));
        }
    }
    Ok(())
}

/// Build a full row from an INSERT's column list and evaluated values:
/// positional when the list is empty, with defaults / auto-increment /
/// NULL for omitted columns.
pub(crate) fn build_row(
    table: &TableDef,
    columns: &[String],
    values: &[Value],
) -> DbResult<Vec<Value>> {
    let mut slots: Vec<Option<Value>> = vec![None; table.columns.len()];

    if columns.is_empty() {
        if values.len() != table.columns.len() {
            return Err(DbError::Semantic(format!(
                "table '{}' has {} columns but {} values were supplied",
                table.name,
                table.columns.len(),
                values.len()
            )));
        }
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = Some(value.clone());
        }
    } else {
        if columns.len() != values.len() {
            return Err(DbError::Semantic(format!(
                "{} columns named but {} values supplied",
                columns.len(),
                values.len()
            )));
        }
        for (column, value) in columns.iter().zip(values) {
            let ordinal = table.column_index(column).ok_or_else(|| {
                DbError::Semantic(format!(
                    "unknown column '{column}' in table '{}'",
                    table.name
                ))
            })?;
            if slots[ordinal].is_some() {
                return Err(DbError::Semantic(format!("column '{column}' named twice")));
            }
            slots[ordinal] = Some(value.clone());
        }
    }

    let mut row = Vec::with_capacity(table.columns.len());
    for (column, slot) in table.columns.iter().zip(slots) {
        let value = match slot {
            Some(value) if !value.is_null() => coerce_value(column, value)?,
            provided => {
                let omitted = provided.is_none();
                if column.auto_increment && (omitted || provided == Some(Value::Null)) {
                    coerce_value(column, Value::BigInt(table.next_row_id as i64))?
                } else if omitted {
                    match &column.default_expr {
                        Some(text) => {
                            let expr = parser::Parser::new(text)?.parse_expression()?;
                            coerce_value(column, evaluate(&expr, None)?)?
                        }
                        None => Value::Null,
                    }
                } else {
                    Value::Null
                }
            }
        };
        row.push(value);
    }
    check_not_null(table, &row)?;
    Ok(row)
}
