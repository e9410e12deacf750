//! Result cache for SELECT statements, keyed by `(database, SQL text)`.
//!
//! Entries remember which tables they read; any DML or DDL against one of
//! those tables drops the entries. Bounded by an LRU over entry count.

use std::num::NonZeroUsize;

use common::QueryResult;
use hashbrown::HashSet;
use lru::LruCache;
use parser::SelectStatement;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

struct CacheEntry {
    result: QueryResult,
    /// Lowercased table names the query read.
    tables: HashSet<String>,
}

pub struct QueryCache {
    entries: Option<LruCache<(String, String), CacheEntry>>,
    hits: u64,
    misses: u64,
    invalidations: u64,
}

impl QueryCache {
    /// `capacity == 0` disables the cache entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
            invalidations: 0,
        }
    }

    pub fn get(&mut self, database: &str, sql: &str) -> Option<QueryResult> {
        let entries = self.entries.as_mut()?;
        match entries.get(&(database.to_string(), sql.to_string())) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.result.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(
        &mut self,
        database: &str,
        sql: &str,
        stmt: &SelectStatement,
        result: &QueryResult,
    ) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        if !result.success {
            return;
        }
        let mut tables = HashSet::new();
        collect_tables(stmt, &mut tables);
        entries.put(
            (database.to_string(), sql.to_string()),
            CacheEntry {
                result: result.clone(),
                tables,
            },
        );
    }

    /// Drop every entry that read `table` in `database`.
    pub fn invalidate_table(&mut self, database: &str, table: &str) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let table = table.to_lowercase();
        let stale: Vec<(String, String)> = entries
            .iter()
            .filter(|((db, _), entry)| db == database && entry.tables.contains(&table))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
            self.invalidations += 1;
        }
    }

    /// Drop every entry belonging to `database` (DROP DATABASE).
    pub fn clear_database(&mut self, database: &str) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let stale: Vec<(String, String)> = entries
            .iter()
            .filter(|((db, _), _)| db == database)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
            self.invalidations += 1;
        }
    }

    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            entries: self.entries.as_ref().map(|e| e.len()).unwrap_or(0),
            hits: self.hits,
            misses: self.misses,
            invalidations: self.invalidations,
        }
    }
}

/// Tables a SELECT reads, including join sides and subqueries.
fn collect_tables(stmt: &SelectStatement, out: &mut HashSet<String>) {
    if let Some(from) = &stmt.from {
        out.insert(from.name.to_lowercase());
    }
    for join in &stmt.joins {
        out.insert(join.table.name.to_lowercase());
    }
    let mut exprs: Vec<&parser::Expression> = Vec::new();
    for item in &stmt.select_list {
        if let parser::SelectItem::Expr { expr, .. } = item {
            exprs.push(expr);
        }
    }
    if let Some(where_clause) = &stmt.where_clause {
        exprs.push(where_clause);
    }
    if let Some(having) = &stmt.having {
        exprs.push(having);
    }
    while let Some(expr) = exprs.pop() {
        match expr {
            parser::Expression::Subquery(sub) => collect_tables(sub, out),
            parser::Expression::InSubquery { expr, subquery, .. } => {
                exprs.push(expr);
                collect_tables(subquery, out);
            }
            parser::Expression::Unary { expr, .. } => exprs.push(expr),
            parser::Expression::Binary { left, right, .. } => {
                exprs.push(left);
                exprs.push(right);
            }
            parser::Expression::InList { expr, list, .. } => {
                exprs.push(expr);
                exprs.extend(list.iter());
            }
            parser::Expression::Between {
                expr, low, high, ..
            } => {
                exprs.push(expr);
                exprs.push(low);
                exprs.push(high);
            }
            parser::Expression::Like { expr, pattern, .. } => {
                exprs.push(expr);
                exprs.push(pattern);
            }
            parser::Expression::IsNull { expr, .. } => exprs.push(expr),
            parser::Expression::Case { whens, else_expr } => {
                for (c, r) in whens {
                    exprs.push(c);
                    exprs.push(r);
                }
                if let Some(e) = else_expr {
                    exprs.push(e);
                }
            }
            parser::Expression::FunctionCall { args, .. } => exprs.extend(args.iter()),
            parser::Expression::Aggregate { arg: Some(arg), .. } => exprs.push(arg),
            _ => {}
        }
    }
}
