//! SELECT execution: access-path choice, nested-loop joins, grouping and
//! aggregation, ordering, limits, projection, and `INTO OUTFILE`.

use std::cmp::Ordering;
use std::sync::Arc;

use catalog::{IndexDef, IndexKind, TableDef};
use common::{DbError, DbResult, QueryResult, Row, RowId};
use database::{Database, PrivilegeKind};
use expr::{evaluate, evaluate_predicate, EvalContext};
use hashbrown::{HashMap, HashSet};
use parser::{
    AggFunc, BinaryOp, Expression, JoinType, OutFile, OutFileFormat, SelectItem, SelectStatement,
    TableReference,
};
use rewriter::Rewritten;
use types::Value;

use crate::indexes::IndexHandle;
use crate::Executor;

/// Intermediate row set flowing through the pipeline.
pub(crate) struct RowSet {
    pub schema: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub(crate) enum AccessPath {
    SeqScan,
    IndexEq {
        index: IndexDef,
        key: Value,
    },
    IndexRange {
        index: IndexDef,
        low: Option<Value>,
        high: Option<Value>,
    },
}

impl Executor<'_> {
    pub(crate) fn execute_select(&mut self, stmt: &SelectStatement) -> DbResult<QueryResult> {
        let (output, outfile) = self.run_select(stmt)?;
        if let Some(outfile) = outfile {
            let count = output.rows.len();
            write_outfile(&outfile, &output)?;
            return Ok(QueryResult::ok(format!(
                "{count} row(s) exported to '{}'",
                outfile.path
            )));
        }
        Ok(QueryResult::with_rows(
            output.schema,
            output.rows.into_iter().map(Row::new).collect(),
        ))
    }

    /// The full pipeline; returns the projected rows and any OUTFILE sink.
    fn run_select(&mut self, stmt: &SelectStatement) -> DbResult<(RowSet, Option<OutFile>)> {
        let Rewritten {
            stmt: mut stmt,
            pushed,
            used_columns: _,
        } = if self.rewrite_enabled {
            self.rewriter.rewrite(stmt)?
        } else {
            Rewritten {
                stmt: stmt.clone(),
                pushed: HashMap::new(),
                used_columns: None,
            }
        };
        self.resolve_statement_subqueries(&mut stmt)?;
        let outfile = stmt.into_outfile.take();

        // FROM and joins.
        let mut current = match &stmt.from {
            None => RowSet {
                schema: Vec::new(),
                rows: vec![Vec::new()],
            },
            Some(table_ref) => {
                let empty = Vec::new();
                let preds = pushed
                    .get(&table_ref.effective_name().to_lowercase())
                    .unwrap_or(&empty);
                self.scan_table(table_ref, preds)?
            }
        };
        for join in &stmt.joins {
            let empty = Vec::new();
            let preds = pushed
                .get(&join.table.effective_name().to_lowercase())
                .unwrap_or(&empty);
            let right = self.scan_table(&join.table, preds)?;
            current = join_rowsets(current, right, join.join_type, join.on.as_ref())?;
        }

        // WHERE.
        if let Some(where_clause) = &stmt.where_clause {
            let schema = current.schema.clone();
            let mut kept = Vec::new();
            for row in current.rows {
                let ctx = EvalContext::new(&schema, &row);
                if evaluate_predicate(where_clause, Some(&ctx))? {
                    kept.push(row);
                }
            }
            current.rows = kept;
        }

        // Projection (with grouping when required).
        let has_aggregates = stmt.select_list.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
            SelectItem::Wildcard => false,
        }) || stmt
            .having
            .as_ref()
            .is_some_and(|having| having.contains_aggregate());

        let mut projected = if !stmt.group_by.is_empty() || has_aggregates {
            project_grouped(&stmt, &current)?
        } else {
            project_plain(&stmt, &current)?
        };

        // DISTINCT.
        if stmt.distinct {
            let mut seen = HashSet::new();
            projected.retain(|(_, out)| seen.insert(render_row(out)));
        }

        // ORDER BY: evaluate against the source row extended with the
        // projected output (so aliases resolve).
        if !stmt.order_by.is_empty() {
            let mut extended_schema = current.schema.clone();
            for item in &stmt.select_list {
                if let SelectItem::Expr {
                    alias: Some(alias), ..
                } = item
                {
                    extended_schema.push(alias.to_lowercase());
                }
            }
            let output_offset = current.schema.len();
            let alias_count = extended_schema.len() - output_offset;

            let mut keyed: Vec<(Vec<Option<Value>>, (Option<Vec<Value>>, Vec<Value>))> =
                Vec::with_capacity(projected.len());
            for (source, out) in projected {
                let mut extended_row = source.clone().unwrap_or_default();
                extended_row.resize(output_offset, Value::Null);
                let mut alias_values = Vec::with_capacity(alias_count);
                let mut pos = 0usize;
                for item in &stmt.select_list {
                    match item {
                        SelectItem::Wildcard => pos += output_offset,
                        SelectItem::Expr { alias, .. } => {
                            if alias.is_some() {
                                if let Some(value) = out.get(pos) {
                                    alias_values.push(value.clone());
                                }
                            }
                            pos += 1;
                        }
                    }
                }
                extended_row.extend(alias_values);

                let ctx = EvalContext::new(&extended_schema, &extended_row);
                let mut key = Vec::with_capacity(stmt.order_by.len());
                for order in &stmt.order_by {
                    match evaluate(&order.expr, Some(&ctx)) {
                        Ok(value) if value.is_null() => key.push(None),
                        Ok(value) => key.push(Some(value)),
                        Err(_) => key.push(None),
                    }
                }
                keyed.push((key, (source, out)));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (order, (ka, kb)) in stmt.order_by.iter().zip(a.iter().zip(b.iter())) {
                    let ord = match (ka, kb) {
                        (None, None) => Ordering::Equal,
                        // NULLs sort first on ascending order.
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(a), Some(b)) => a.sql_cmp(b).unwrap_or(Ordering::Equal),
                    };
                    let ord = if order.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            projected = keyed.into_iter().map(|(_, pair)| pair).collect();
        }

        // LIMIT / OFFSET.
        let offset = stmt.offset.unwrap_or(0) as usize;
        if offset > 0 {
            projected = projected.into_iter().skip(offset).collect();
        }
        if let Some(limit) = stmt.limit {
            projected.truncate(limit as usize);
        }

        let schema = output_labels(&stmt, &current.schema)?;
        let rows = projected.into_iter().map(|(_, out)| out).collect();
        Ok((RowSet { schema, rows }, outfile))
    }

    /// Scan one base table, choosing an index access path from the pushed
    /// predicates where one applies, and filtering by all of them.
    fn scan_table(
        &mut self,
        table_ref: &TableReference,
        predicates: &[Expression],
    ) -> DbResult<RowSet> {
        let db = self.current_db()?;
        let table = {
            let catalog = db.catalog().read();
            catalog.get_table(&table_ref.name)?.clone()
        };
        self.ensure_permission(db.name(), &table.name, PrivilegeKind::Select)?;

        let label = table_ref.effective_name().to_lowercase();
        let schema: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{label}.{}", c.name.to_lowercase()))
            .collect();

        let access = choose_access_path(&table, predicates);
        let rows = self.fetch_rows(&db, &table, access)?;

        let mut kept = Vec::new();
        for values in rows {
            let ctx = EvalContext::new(&schema, &values);
            let mut keep = true;
            for predicate in predicates {
                if !evaluate_predicate(predicate, Some(&ctx))? {
                    keep = false;
                    break;
                }
            }
            if keep {
                kept.push(values);
            }
        }
        Ok(RowSet { schema, rows: kept })
    }

    fn fetch_rows(
        &self,
        db: &Arc<Database>,
        table: &TableDef,
        access: AccessPath,
    ) -> DbResult<Vec<Vec<Value>>> {
        let visible: Vec<_> = db
            .heap()
            .scan(table)?
            .into_iter()
            .filter(|row| !row.header.is_deleted())
            .collect();

        let wanted: Option<Vec<RowId>> = match access {
            AccessPath::SeqScan => None,
            AccessPath::IndexEq { index, key } => Some(match self.open_index(db, &index)? {
                IndexHandle::BTree(tree) => tree.search_all(&key)?,
                IndexHandle::Hash(handle) => handle.search_all(&key)?,
                IndexHandle::FullText => return Ok(visible.into_iter().map(|r| r.values).collect()),
            }),
            AccessPath::IndexRange { index, low, high } => {
                match self.open_index(db, &index)? {
                    IndexHandle::BTree(tree) => Some(
                        tree.range_search(low.as_ref(), high.as_ref())?
                            .into_iter()
                            .map(|(_, rid)| rid)
                            .collect(),
                    ),
                    // Hash indexes cannot serve ranges.
                    _ => None,
                }
            }
        };

        Ok(match wanted {
            None => visible.into_iter().map(|r| r.values).collect(),
            Some(row_ids) => {
                let want: HashSet<RowId> = row_ids.into_iter().collect();
                visible
                    .into_iter()
                    .filter(|r| want.contains(&r.header.row_id))
                    .map(|r| r.values)
                    .collect()
            }
        })
    }

    // ---- subquery resolution ----

    /// Replace every subquery in the statement's expressions with its
    /// materialized result, so evaluation stays pure.
    fn resolve_statement_subqueries(&mut self, stmt: &mut SelectStatement) -> DbResult<()> {
        for item in &mut stmt.select_list {
            if let SelectItem::Expr { expr, .. } = item {
                *expr = self.resolve_subqueries(expr.clone())?;
            }
        }
        for join in &mut stmt.joins {
            if let Some(on) = &mut join.on {
                *on = self.resolve_subqueries(on.clone())?;
            }
        }
        if let Some(where_clause) = &mut stmt.where_clause {
            *where_clause = self.resolve_subqueries(where_clause.clone())?;
        }
        if let Some(having) = &mut stmt.having {
            *having = self.resolve_subqueries(having.clone())?;
        }
        Ok(())
    }

    /// Rewrite `IN (SELECT …)` into an IN-list and a scalar subquery into
    /// its single value.
    pub(crate) fn resolve_subqueries(&mut self, expr: Expression) -> DbResult<Expression> {
        Ok(match expr {
            Expression::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let expr = Box::new(self.resolve_subqueries(*expr)?);
                let (result, _) = self.run_select(&subquery)?;
                let list = result
                    .rows
                    .into_iter()
                    .map(|mut row| {
                        if row.is_empty() {
                            Expression::Literal(Value::Null)
                        } else {
                            Expression::Literal(row.remove(0))
                        }
                    })
                    .collect();
                Expression::InList {
                    expr,
                    list,
                    negated,
                }
            }
            Expression::Subquery(subquery) => {
                let (result, _) = self.run_select(&subquery)?;
                if result.schema.len() != 1 {
                    return Err(DbError::Semantic(
                        "scalar subquery must return one column".into(),
                    ));
                }
                if result.rows.len() > 1 {
                    return Err(DbError::Semantic(
                        "scalar subquery returned more than one row".into(),
                    ));
                }
                let value = result
                    .rows
                    .into_iter()
                    .next()
                    .and_then(|mut row| {
                        if row.is_empty() {
                            None
                        } else {
                            Some(row.remove(0))
                        }
                    })
                    .unwrap_or(Value::Null);
                Expression::Literal(value)
            }
            Expression::Unary { op, expr } => Expression::Unary {
                op,
                expr: Box::new(self.resolve_subqueries(*expr)?),
            },
            Expression::Binary { left, op, right } => Expression::Binary {
                left: Box::new(self.resolve_subqueries(*left)?),
                op,
                right: Box::new(self.resolve_subqueries(*right)?),
            },
            Expression::Aggregate {
                func,
                arg,
                distinct,
            } => Expression::Aggregate {
                func,
                arg: match arg {
                    Some(arg) => Some(Box::new(self.resolve_subqueries(*arg)?)),
                    None => None,
                },
                distinct,
            },
            Expression::FunctionCall { name, args } => Expression::FunctionCall {
                name,
                args: args
                    .into_iter()
                    .map(|a| self.resolve_subqueries(a))
                    .collect::<DbResult<_>>()?,
            },
            Expression::Case { whens, else_expr } => Expression::Case {
                whens: whens
                    .into_iter()
                    .map(|(c, r)| {
                        Ok((self.resolve_subqueries(c)?, self.resolve_subqueries(r)?))
                    })
                    .collect::<DbResult<_>>()?,
                else_expr: match else_expr {
                    Some(e) => Some(Box::new(self.resolve_subqueries(*e)?)),
                    None => None,
                },
            },
            Expression::IsNull { expr, negated } => Expression::IsNull {
                expr: Box::new(self.resolve_subqueries(*expr)?),
                negated,
            },
            Expression::Like {
                expr,
                pattern,
                negated,
            } => Expression::Like {
                expr: Box::new(self.resolve_subqueries(*expr)?),
                pattern: Box::new(self.resolve_subqueries(*pattern)?),
                negated,
            },
            Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: Box::new(self.resolve_subqueries(*expr)?),
                list: list
                    .into_iter()
                    .map(|e| self.resolve_subqueries(e))
                    .collect::<DbResult<_>>()?,
                negated,
            },
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => Expression::Between {
                expr: Box::new(self.resolve_subqueries(*expr)?),
                low: Box::new(self.resolve_subqueries(*low)?),
                high: Box::new(self.resolve_subqueries(*high)?),
                negated,
            },
            other => other,
        })
    }
}

// ---- free helpers ----

/// Pick the cheapest applicable access path from single-table predicates:
/// index equality first (B+tree or hash), then a B+tree range.
pub(crate) fn choose_access_path(table: &TableDef, predicates: &[Expression]) -> AccessPath {
    // Equality probes.
    for predicate in predicates {
        if let Some((column, value)) = match_eq(predicate) {
            for index in table.indexes_on(&column) {
                if matches!(index.kind, IndexKind::BTree | IndexKind::Hash) {
                    if let Some(key) = value.cast_to(index.key_type) {
                        return AccessPath::IndexEq {
                            index: index.clone(),
                            key,
                        };
                    }
                }
            }
        }
    }

    // Range bounds per column, B+tree only.
    let mut bounds: HashMap<String, (Option<Value>, Option<Value>)> = HashMap::new();
    for predicate in predicates {
        if let Some((column, low, high)) = match_range(predicate) {
            let entry = bounds.entry(column).or_default();
            if low.is_some() {
                entry.0 = low;
            }
            if high.is_some() {
                entry.1 = high;
            }
        }
    }
    for (column, (low, high)) in bounds {
        for index in table.indexes_on(&column) {
            if index.kind == IndexKind::BTree {
                let low = low.clone().and_then(|v| v.cast_to(index.key_type));
                let high = high.clone().and_then(|v| v.cast_to(index.key_type));
                if low.is_some() || high.is_some() {
                    return AccessPath::IndexRange {
                        index: index.clone(),
                        low,
                        high,
                    };
                }
            }
        }
    }
    AccessPath::SeqScan
}

/// `column = literal` (either side).
fn match_eq(expr: &Expression) -> Option<(String, Value)> {
    let Expression::Binary { left, op, right } = expr else {
        return None;
    };
    if *op != BinaryOp::Eq {
        return None;
    }
    match (left.as_ref(), right.as_ref()) {
        (Expression::Column { name, .. }, Expression::Literal(value))
        | (Expression::Literal(value), Expression::Column { name, .. }) => {
            Some((name.to_lowercase(), value.clone()))
        }
        _ => None,
    }
}

/// Bounds usable for an inclusive index range scan: `<`, `<=`, `>`, `>=`
/// and BETWEEN. Strict bounds widen to inclusive ones; the predicate is
/// re-checked per row anyway.
fn match_range(expr: &Expression) -> Option<(String, Option<Value>, Option<Value>)> {
    match expr {
        Expression::Binary { left, op, right } => {
            let (column, value, op) = match (left.as_ref(), right.as_ref()) {
                (Expression::Column { name, .. }, Expression::Literal(value)) => {
                    (name.to_lowercase(), value.clone(), *op)
                }
                (Expression::Literal(value), Expression::Column { name, .. }) => {
                    // Mirror: `5 < x` is `x > 5`.
                    let mirrored = match op {
                        BinaryOp::Lt => BinaryOp::Gt,
                        BinaryOp::Le => BinaryOp::Ge,
                        BinaryOp::Gt => BinaryOp::Lt,
                        BinaryOp::Ge => BinaryOp::Le,
                        other => *other,
                    };
                    (name.to_lowercase(), value.clone(), mirrored)
                }
                _ => return None,
            };
            match op {
                BinaryOp::Lt | BinaryOp::Le => Some((column, None, Some(value))),
                BinaryOp::Gt | BinaryOp::Ge => Some((column, Some(value), None)),
                _ => None,
            }
        }
        Expression::Between {
            expr,
            low,
            high,
            negated: false,
        } => {
            let Expression::Column { name, .. } = expr.as_ref() else {
                return None;
            };
            let (Expression::Literal(low), Expression::Literal(high)) =
                (low.as_ref(), high.as_ref())
            else {
                return None;
            };
            Some((
                name.to_lowercase(),
                Some(low.clone()),
                Some(high.clone()),
            ))
        }
        _ => None,
    }
}

fn join_rowsets(
    left: RowSet,
    right: RowSet,
    join_type: JoinType,
    on: Option<&Expression>,
) -> DbResult<RowSet> {
    let mut schema = left.schema.clone();
    schema.extend(right.schema.clone());

    let on_matches = |l: &[Value], r: &[Value]| -> DbResult<bool> {
        match on {
            None => Ok(true),
            Some(on) => {
                let mut combined = l.to_vec();
                combined.extend_from_slice(r);
                let ctx = EvalContext::new(&schema, &combined);
                evaluate_predicate(on, Some(&ctx))
            }
        }
    };

    let mut rows = Vec::new();
    match join_type {
        JoinType::Inner | JoinType::Cross => {
            for l in &left.rows {
                for r in &right.rows {
                    if on_matches(l, r)? {
                        let mut combined = l.clone();
                        combined.extend(r.clone());
                        rows.push(combined);
                    }
                }
            }
        }
        JoinType::Left => {
            for l in &left.rows {
                let mut matched = false;
                for r in &right.rows {
                    if on_matches(l, r)? {
                        matched = true;
                        let mut combined = l.clone();
                        combined.extend(r.clone());
                        rows.push(combined);
                    }
                }
                if !matched {
                    let mut combined = l.clone();
                    combined.extend(vec![Value::Null; right.schema.len()]);
                    rows.push(combined);
                }
            }
        }
        JoinType::Right => {
            for r in &right.rows {
                let mut matched = false;
                for l in &left.rows {
                    if on_matches(l, r)? {
                        matched = true;
                        let mut combined = l.clone();
                        combined.extend(r.clone());
                        rows.push(combined);
                    }
                }
                if !matched {
                    let mut combined = vec![Value::Null; left.schema.len()];
                    combined.extend(r.clone());
                    rows.push(combined);
                }
            }
        }
        JoinType::Full => {
            let mut right_matched = vec![false; right.rows.len()];
            for l in &left.rows {
                let mut matched = false;
                for (ri, r) in right.rows.iter().enumerate() {
                    if on_matches(l, r)? {
                        matched = true;
                        right_matched[ri] = true;
                        let mut combined = l.clone();
                        combined.extend(r.clone());
                        rows.push(combined);
                    }
                }
                if !matched {
                    let mut combined = l.clone();
                    combined.extend(vec![Value::Null; right.schema.len()]);
                    rows.push(combined);
                }
            }
            for (ri, r) in right.rows.iter().enumerate() {
                if !right_matched[ri] {
                    let mut combined = vec![Value::Null; left.schema.len()];
                    combined.extend(r.clone());
                    rows.push(combined);
                }
            }
        }
    }
    Ok(RowSet { schema, rows })
}

/// Plain projection: every output row keeps a pointer to its source row
/// for later ORDER BY evaluation.
#[allow(clippy::type_complexity)]
fn project_plain(
    stmt: &SelectStatement,
    input: &RowSet,
) -> DbResult<Vec<(Option<Vec<Value>>, Vec<Value>)>> {
    let mut out = Vec::with_capacity(input.rows.len());
    for row in &input.rows {
        let ctx = EvalContext::new(&input.schema, row);
        let mut projected = Vec::new();
        for item in &stmt.select_list {
            match item {
                SelectItem::Wildcard => projected.extend(row.iter().cloned()),
                SelectItem::Expr { expr, .. } => projected.push(evaluate(expr, Some(&ctx))?),
            }
        }
        out.push((Some(row.clone()), projected));
    }
    Ok(out)
}

/// Grouped projection: build groups, apply HAVING, compute aggregates.
#[allow(clippy::type_complexity)]
fn project_grouped(
    stmt: &SelectStatement,
    input: &RowSet,
) -> DbResult<Vec<(Option<Vec<Value>>, Vec<Value>)>> {
    // Group rows, preserving first-seen order.
    let mut group_order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    if stmt.group_by.is_empty() {
        group_order.push(String::new());
        groups.insert(String::new(), (0..input.rows.len()).collect());
    } else {
        for (idx, row) in input.rows.iter().enumerate() {
            let ctx = EvalContext::new(&input.schema, row);
            let mut key = String::new();
            for group_expr in &stmt.group_by {
                let value = evaluate(group_expr, Some(&ctx))?;
                key.push_str(&format!("{value:?}|"));
            }
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(idx);
        }
    }

    let mut out = Vec::new();
    for key in group_order {
        let members = &groups[&key];
        let group_rows: Vec<&Vec<Value>> = members.iter().map(|i| &input.rows[*i]).collect();

        if let Some(having) = &stmt.having {
            let resolved = fold_aggregates(having, &group_rows, &input.schema)?;
            let representative = group_rows.first().copied();
            let truthy = match representative {
                Some(row) => {
                    let ctx = EvalContext::new(&input.schema, row);
                    evaluate_predicate(&resolved, Some(&ctx))?
                }
                None => evaluate_predicate(&resolved, None)?,
            };
            if !truthy {
                continue;
            }
        }

        let mut projected = Vec::new();
        for item in &stmt.select_list {
            let SelectItem::Expr { expr, .. } = item else {
                return Err(DbError::Semantic(
                    "SELECT * cannot be combined with GROUP BY or aggregates".into(),
                ));
            };
            let resolved = fold_aggregates(expr, &group_rows, &input.schema)?;
            let value = match group_rows.first() {
                Some(row) => {
                    let ctx = EvalContext::new(&input.schema, row);
                    evaluate(&resolved, Some(&ctx))?
                }
                None => evaluate(&resolved, None)?,
            };
            projected.push(value);
        }
        out.push((group_rows.first().map(|r| (*r).clone()), projected));
    }
    Ok(out)
}

/// Replace every aggregate node with the literal computed over the group.
fn fold_aggregates(
    expr: &Expression,
    group_rows: &[&Vec<Value>],
    schema: &[String],
) -> DbResult<Expression> {
    Ok(match expr {
        Expression::Aggregate {
            func,
            arg,
            distinct,
        } => Expression::Literal(compute_aggregate(
            *func,
            arg.as_deref(),
            *distinct,
            group_rows,
            schema,
        )?),
        Expression::Unary { op, expr } => Expression::Unary {
            op: *op,
            expr: Box::new(fold_aggregates(expr, group_rows, schema)?),
        },
        Expression::Binary { left, op, right } => Expression::Binary {
            left: Box::new(fold_aggregates(left, group_rows, schema)?),
            op: *op,
            right: Box::new(fold_aggregates(right, group_rows, schema)?),
        },
        Expression::FunctionCall { name, args } => Expression::FunctionCall {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| fold_aggregates(a, group_rows, schema))
                .collect::<DbResult<_>>()?,
        },
        Expression::Case { whens, else_expr } => Expression::Case {
            whens: whens
                .iter()
                .map(|(c, r)| {
                    Ok((
                        fold_aggregates(c, group_rows, schema)?,
                        fold_aggregates(r, group_rows, schema)?,
                    ))
                })
                .collect::<DbResult<_>>()?,
            else_expr: match else_expr {
                Some(e) => Some(Box::new(fold_aggregates(e, group_rows, schema)?)),
                None => None,
            },
        },
        Expression::IsNull { expr, negated } => Expression::IsNull {
            expr: Box::new(fold_aggregates(expr, group_rows, schema)?),
            negated: *negated,
        },
        other => other.clone(),
    })
}

fn compute_aggregate(
    func: AggFunc,
    arg: Option<&Expression>,
    distinct: bool,
    group_rows: &[&Vec<Value>],
    schema: &[String],
) -> DbResult<Value> {
    // COUNT(*) counts rows; everything else works over non-null argument
    // values.
    let mut values: Vec<Value> = Vec::new();
    if let Some(arg) = arg {
        for row in group_rows {
            let ctx = EvalContext::new(schema, row);
            let value = evaluate(arg, Some(&ctx))?;
            if !value.is_null() {
                values.push(value);
            }
        }
        if distinct {
            let mut seen = HashSet::new();
            values.retain(|v| seen.insert(v.to_string()));
        }
    }

    Ok(match func {
        AggFunc::Count => match arg {
            None => Value::BigInt(group_rows.len() as i64),
            Some(_) => Value::BigInt(values.len() as i64),
        },
        AggFunc::Sum => {
            if values.is_empty() {
                Value::Null
            } else if values.iter().all(|v| v.is_integer()) {
                let mut total = 0i64;
                for v in &values {
                    total = total
                        .checked_add(v.as_i64().unwrap_or_default())
                        .ok_or_else(|| DbError::Arithmetic("SUM overflow".into()))?;
                }
                Value::BigInt(total)
            } else {
                let mut total = 0f64;
                for v in &values {
                    total += v.as_f64().ok_or_else(|| {
                        DbError::Semantic(format!("SUM over non-numeric value {v}"))
                    })?;
                }
                Value::Double(total)
            }
        }
        AggFunc::Avg => {
            if values.is_empty() {
                Value::Null
            } else {
                let mut total = 0f64;
                for v in &values {
                    total += v.as_f64().ok_or_else(|| {
                        DbError::Semantic(format!("AVG over non-numeric value {v}"))
                    })?;
                }
                Value::Double(total / values.len() as f64)
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<Value> = None;
            for v in values {
                best = Some(match best {
                    None => v,
                    Some(current) => {
                        let keep_new = match v.sql_cmp(&current) {
                            Some(Ordering::Less) => func == AggFunc::Min,
                            Some(Ordering::Greater) => func == AggFunc::Max,
                            _ => false,
                        };
                        if keep_new {
                            v
                        } else {
                            current
                        }
                    }
                });
            }
            best.unwrap_or(Value::Null)
        }
    })
}

/// Output column labels: aliases, bare column names for wildcards, or the
/// printed expression.
fn output_labels(stmt: &SelectStatement, input_schema: &[String]) -> DbResult<Vec<String>> {
    let mut labels = Vec::new();
    for item in &stmt.select_list {
        match item {
            SelectItem::Wildcard => {
                for label in input_schema {
                    let bare = label.rsplit('.').next().unwrap_or(label);
                    labels.push(bare.to_string());
                }
            }
            SelectItem::Expr { expr, alias } => match alias {
                Some(alias) => labels.push(alias.clone()),
                None => match expr {
                    Expression::Column { name, .. } => labels.push(name.to_lowercase()),
                    other => labels.push(other.to_string()),
                },
            },
        }
    }
    Ok(labels)
}

fn render_row(row: &[Value]) -> String {
    let cells: Vec<String> = row.iter().map(|v| format!("{v:?}")).collect();
    cells.join("\u{1}")
}

// ---- INTO OUTFILE ----

fn write_outfile(outfile: &OutFile, output: &RowSet) -> DbResult<()> {
    let content = match outfile.format {
        OutFileFormat::Csv => {
            let mut text = String::new();
            text.push_str(&csv_line(
                &output.schema.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            ));
            for row in &output.rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                text.push_str(&csv_line(
                    &cells.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                ));
            }
            text
        }
        OutFileFormat::Json => {
            let mut rows = Vec::new();
            for row in &output.rows {
                let mut object = serde_json::Map::new();
                for (label, value) in output.schema.iter().zip(row) {
                    object.insert(label.clone(), json_value(value));
                }
                rows.push(serde_json::Value::Object(object));
            }
            serde_json::to_string_pretty(&rows)
                .map_err(|e| DbError::Executor(format!("JSON export failed: {e}")))?
        }
        OutFileFormat::Xml => {
            let mut text = String::from("<rows>\n");
            for row in &output.rows {
                text.push_str("  <row>\n");
                for (label, value) in output.schema.iter().zip(row) {
                    text.push_str(&format!(
                        "    <{label}>{}</{label}>\n",
                        xml_escape(&value.to_string())
                    ));
                }
                text.push_str("  </row>\n");
            }
            text.push_str("</rows>\n");
            text
        }
    };
    std::fs::write(&outfile.path, content)
        .map_err(|e| DbError::Io(format!("failed to write '{}': {e}", outfile.path)))
}

fn csv_line(cells: &[&str]) -> String {
    let quoted: Vec<String> = cells
        .iter()
        .map(|cell| {
            if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell.to_string()
            }
        })
        .collect();
    format!("{}\n", quoted.join(","))
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        v if v.is_integer() => serde_json::Value::from(v.as_i64().unwrap_or_default()),
        v if v.is_numeric() => serde_json::Value::from(v.as_f64().unwrap_or_default()),
        other => serde_json::Value::String(other.to_string()),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
