//! VACUUM, ANALYZE, and SAVE.

use catalog::{ColumnStats, TableStats};
use common::{DbResult, QueryResult, Row};
use hashbrown::HashSet;
use tracing::info;
use types::Value;

use crate::Executor;

impl Executor<'_> {
    /// Physically reclaim deleted rows. The horizon is the oldest active
    /// transaction: anything deleted before it is invisible to everyone.
    pub(crate) fn execute_vacuum(&mut self, table: Option<&str>) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        let horizon = db.txns().min_active_txn();

        let names: Vec<String> = match table {
            Some(name) => vec![db.catalog().read().get_table(name)?.name.clone()],
            None => db.catalog().read().get_all_table_names(),
        };

        let mut reclaimed = 0usize;
        let mut freed = 0usize;
        for name in &names {
            let mut catalog = db.catalog().write();
            let table_def = catalog.get_table_mut(name)?;
            let (rows, pages) = db.heap().vacuum(table_def, horizon)?;
            reclaimed += rows;
            freed += pages;
        }

        db.catalog().read().save()?;
        db.pool().flush_all_pages()?;
        info!(reclaimed, freed, "vacuum finished");
        Ok(QueryResult::ok(format!(
            "vacuum reclaimed {reclaimed} row(s), freed {freed} page(s)"
        )))
    }

    /// Collect per-table statistics: row count and, per column, a distinct
    /// estimate plus min/max.
    pub(crate) fn execute_analyze(&mut self, table: Option<&str>) -> DbResult<QueryResult> {
        let db = self.current_db()?;
        let names: Vec<String> = match table {
            Some(name) => vec![db.catalog().read().get_table(name)?.name.clone()],
            None => db.catalog().read().get_all_table_names(),
        };

        let mut report_rows = Vec::new();
        for name in &names {
            let snapshot = db.catalog().read().get_table(name)?.clone();
            let rows: Vec<_> = db
                .heap()
                .scan(&snapshot)?
                .into_iter()
                .filter(|row| !row.header.is_deleted())
                .collect();

            let mut columns = Vec::with_capacity(snapshot.columns.len());
            for ordinal in 0..snapshot.columns.len() {
                let mut distinct: HashSet<String> = HashSet::new();
                let mut min: Option<Value> = None;
                let mut max: Option<Value> = None;
                for row in &rows {
                    let Some(value) = row.values.get(ordinal) else {
                        continue;
                    };
                    if value.is_null() {
                        continue;
                    }
                    distinct.insert(value.to_string());
                    min = Some(match min {
                        None => value.clone(),
                        Some(current) => {
                            if value.sql_cmp(&current) == Some(std::cmp::Ordering::Less) {
                                value.clone()
                            } else {
                                current
                            }
                        }
                    });
                    max = Some(match max {
                        None => value.clone(),
                        Some(current) => {
                            if value.sql_cmp(&current) == Some(std::cmp::Ordering::Greater) {
                                value.clone()
                            } else {
                                current
                            }
                        }
                    });
                }
                columns.push(ColumnStats {
                    distinct_estimate: distinct.len() as u64,
                    min,
                    max,
                });
            }

            let stats = TableStats {
                row_count: rows.len() as u64,
                columns,
            };
            report_rows.push(Row::new(vec![
                Value::Varchar(snapshot.name.clone()),
                Value::BigInt(stats.row_count as i64),
            ]));
            db.catalog().write().get_table_mut(name)?.stats = Some(stats);
        }

        db.catalog().read().save()?;
        Ok(QueryResult::with_rows(
            vec!["table_name".into(), "row_count".into()],
            report_rows,
        ))
    }

    /// SAVE: flush every open database (catalog, pages, WAL) and take a
    /// checkpoint on the current one so the log can be truncated.
    pub(crate) fn execute_save(&mut self) -> DbResult<QueryResult> {
        self.manager.save_to_disk()?;
        if let Ok(db) = self.current_db() {
            db.checkpoint()?;
        }
        Ok(QueryResult::ok("database saved"))
    }
}
