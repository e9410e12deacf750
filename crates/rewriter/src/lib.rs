//! Query rewriting: idempotent transformations applied to a SELECT before
//! execution.
//!
//! Passes, each individually toggleable:
//! 1. **Constant folding**: any subtree whose leaves are literals is
//!    replaced by its value; a failing evaluation leaves the subtree as-is.
//! 2. **Predicate pushdown**: the WHERE clause is split on top-level AND
//!    and conjuncts that only touch one base table are recorded against
//!    that table's scan. Join-side pushes happen only when every join is
//!    inner (pushing below a LEFT JOIN would change null-extension).
//! 3. **Column pruning**: the set of columns the statement actually uses
//!    is collected for the executor; `SELECT *` disables it.
//! 4. **Subquery unnesting**: an uncorrelated `IN (SELECT …)` with no
//!    aggregation, grouping, limit, distinct, or joins becomes an inner
//!    join when the outer SELECT is DISTINCT (so no duplicates can be
//!    introduced); anything else is left alone.
//!
//! The input statement is deep-cloned first; rewriting never mutates the
//! parsed AST in place.


use common::DbResult;
use expr::evaluate;
use hashbrown::{HashMap, HashSet};
use parser::{
    BinaryOp, Expression, JoinClause, JoinType, OrderByItem, SelectItem, SelectStatement,
};

/// Counters for how many rewrites fired during the last `rewrite` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub constants_folded: u32,
    pub predicates_pushed: u32,
    pub column_sets_computed: u32,
    pub subqueries_unnested: u32,
}

/// The rewritten statement plus side information for the executor.
#[derive(Clone, Debug)]
pub struct Rewritten {
    pub stmt: SelectStatement,
    /// Conjuncts to apply during the scan of each table (keyed by the
    /// table's effective name, lowercased). Removed from the WHERE clause.
    pub pushed: HashMap<String, Vec<Expression>>,
    /// Columns referenced anywhere in the statement (lowercased, qualified
    /// names kept as `table.column`). `None` when `SELECT *` disables
    /// pruning.
    pub used_columns: Option<HashSet<String>>,
}

/// The rewrite pipeline. Construct once, reuse across statements.
pub struct QueryRewriter {
    pub constant_folding: bool,
    pub predicate_pushdown: bool,
    pub column_pruning: bool,
    pub subquery_unnesting: bool,
    stats: RewriteStats,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRewriter {
    pub fn new() -> Self {
        Self {
            constant_folding: true,
            predicate_pushdown: true,
            column_pruning: true,
            subquery_unnesting: true,
            stats: RewriteStats::default(),
        }
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    /// Apply every enabled pass to a clone of `stmt`.
    pub fn rewrite(&mut self, stmt: &SelectStatement) -> DbResult<Rewritten> {
        self.stats = RewriteStats::default();
        let mut stmt = stmt.clone();

        if self.constant_folding {
            self.fold_statement(&mut stmt);
        }
        if self.subquery_unnesting {
            self.unnest_subqueries(&mut stmt);
        }

        let pushed = if self.predicate_pushdown {
            self.push_predicates(&mut stmt)
        } else {
            HashMap::new()
        };

        let used_columns = if self.column_pruning {
            let used = collect_used_columns(&stmt, &pushed);
            if used.is_some() {
                self.stats.column_sets_computed += 1;
            }
            used
        } else {
            None
        };

        Ok(Rewritten {
            stmt,
            pushed,
            used_columns,
        })
    }

    // ---- constant folding ----

    fn fold_statement(&mut self, stmt: &mut SelectStatement) {
        for item in &mut stmt.select_list {
            if let SelectItem::Expr { expr, .. } = item {
                self.fold_expr(expr);
            }
        }
        for join in &mut stmt.joins {
            if let Some(on) = &mut join.on {
                self.fold_expr(on);
            }
        }
        if let Some(where_clause) = &mut stmt.where_clause {
            self.fold_expr(where_clause);
        }
        for group in &mut stmt.group_by {
            self.fold_expr(group);
        }
        if let Some(having) = &mut stmt.having {
            self.fold_expr(having);
        }
        for OrderByItem { expr, .. } in &mut stmt.order_by {
            self.fold_expr(expr);
        }
    }

    fn fold_expr(&mut self, expr: &mut Expression) {
        if matches!(expr, Expression::Literal(_)) {
            return;
        }
        if expr.is_constant() {
            if let Ok(value) = evaluate(expr, None) {
                *expr = Expression::Literal(value);
                self.stats.constants_folded += 1;
                return;
            }
        }
        // Fold what can be folded inside a non-constant tree.
        match expr {
            Expression::Unary { expr, .. } => self.fold_expr(expr),
            Expression::Binary { left, right, .. } => {
                self.fold_expr(left);
                self.fold_expr(right);
            }
            Expression::Aggregate { arg: Some(arg), .. } => self.fold_expr(arg),
            Expression::FunctionCall { args, .. } => {
                for arg in args {
                    self.fold_expr(arg);
                }
            }
            Expression::Case { whens, else_expr } => {
                for (cond, result) in whens {
                    self.fold_expr(cond);
                    self.fold_expr(result);
                }
                if let Some(else_expr) = else_expr {
                    self.fold_expr(else_expr);
                }
            }
            Expression::IsNull { expr, .. } => self.fold_expr(expr),
            Expression::Like { expr, pattern, .. } => {
                self.fold_expr(expr);
                self.fold_expr(pattern);
            }
            Expression::InList { expr, list, .. } => {
                self.fold_expr(expr);
                for item in list {
                    self.fold_expr(item);
                }
            }
            Expression::Between {
                expr, low, high, ..
            } => {
                self.fold_expr(expr);
                self.fold_expr(low);
                self.fold_expr(high);
            }
            _ => {}
        }
    }

    // ---- predicate pushdown ----

    fn push_predicates(&mut self, stmt: &mut SelectStatement) -> HashMap<String, Vec<Expression>> {
        let mut pushed: HashMap<String, Vec<Expression>> = HashMap::new();
        let Some(from) = &stmt.from else {
            return pushed;
        };
        let Some(where_clause) = stmt.where_clause.take() else {
            return pushed;
        };

        let outer = from.effective_name().to_lowercase();
        let single_table = stmt.joins.is_empty();
        let all_inner = stmt
            .joins
            .iter()
            .all(|join| matches!(join.join_type, JoinType::Inner | JoinType::Cross));
        let mut join_tables: HashSet<String> = HashSet::new();
        if all_inner {
            for join in &stmt.joins {
                join_tables.insert(join.table.effective_name().to_lowercase());
            }
        }

        let mut kept: Vec<Expression> = Vec::new();
        for conjunct in split_conjuncts(where_clause) {
            match pushdown_target(&conjunct, &outer, single_table) {
                Some(table) if table == outer || join_tables.contains(&table) => {
                    pushed.entry(table).or_default().push(conjunct);
                    self.stats.predicates_pushed += 1;
                }
                _ => kept.push(conjunct),
            }
        }
        stmt.where_clause = combine_conjuncts(kept);
        pushed
    }

    // ---- subquery unnesting ----

    fn unnest_subqueries(&mut self, stmt: &mut SelectStatement) {
        if !stmt.distinct {
            // An inner join may duplicate outer rows; without DISTINCT the
            // transformation is not equivalence-preserving.
            return;
        }
        let Some(where_clause) = stmt.where_clause.take() else {
            return;
        };

        let mut kept = Vec::new();
        let mut new_joins: Vec<JoinClause> = Vec::new();
        for conjunct in split_conjuncts(where_clause) {
            match try_unnest(&conjunct) {
                Some((join, extra_where)) => {
                    new_joins.push(join);
                    if let Some(extra) = extra_where {
                        kept.push(extra);
                    }
                    self.stats.subqueries_unnested += 1;
                }
                None => kept.push(conjunct),
            }
        }
        stmt.joins.extend(new_joins);
        stmt.where_clause = combine_conjuncts(kept);
    }
}

/// Split an expression on top-level ANDs.
fn split_conjuncts(expr: Expression) -> Vec<Expression> {
    match expr {
        Expression::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let mut parts = split_conjuncts(*left);
            parts.extend(split_conjuncts(*right));
            parts
        }
        other => vec![other],
    }
}

/// Reassemble conjuncts into a left-deep AND chain.
fn combine_conjuncts(mut parts: Vec<Expression>) -> Option<Expression> {
    if parts.is_empty() {
        return None;
    }
    let mut expr = parts.remove(0);
    for part in parts {
        expr = Expression::Binary {
            left: Box::new(expr),
            op: BinaryOp::And,
            right: Box::new(part),
        };
    }
    Some(expr)
}

/// The single table a conjunct's columns all belong to, if determinable.
/// Unqualified columns resolve to the outer table only when it is the sole
/// table in scope.
fn pushdown_target(expr: &Expression, outer: &str, single_table: bool) -> Option<String> {
    if matches!(
        expr,
        Expression::Subquery(_) | Expression::InSubquery { .. } | Expression::Match { .. }
    ) || expr.contains_aggregate()
    {
        return None;
    }
    let mut columns = Vec::new();
    expr.referenced_columns(&mut columns);
    if columns.is_empty() {
        return None;
    }

    let mut target: Option<String> = None;
    for (table, _) in columns {
        let table = match table {
            Some(table) => table.to_lowercase(),
            None if single_table => outer.to_string(),
            None => return None,
        };
        match &target {
            None => target = Some(table),
            Some(existing) if *existing == table => {}
            Some(_) => return None,
        }
    }
    target
}

/// `x IN (SELECT c FROM t WHERE p)` → `INNER JOIN t ON x = t.c` plus `p`
/// lifted into the outer WHERE. Only simple, uncorrelated subqueries
/// qualify.
fn try_unnest(conjunct: &Expression) -> Option<(JoinClause, Option<Expression>)> {
    let Expression::InSubquery {
        expr,
        subquery,
        negated: false,
    } = conjunct
    else {
        return None;
    };
    let sub = subquery.as_ref();
    if sub.distinct
        || !sub.joins.is_empty()
        || !sub.group_by.is_empty()
        || sub.having.is_some()
        || sub.limit.is_some()
        || sub.offset.is_some()
        || sub.into_outfile.is_some()
    {
        return None;
    }
    let from = sub.from.as_ref()?;
    let [SelectItem::Expr {
        expr: sub_column, ..
    }] = sub.select_list.as_slice()
    else {
        return None;
    };
    let Expression::Column { name, .. } = sub_column else {
        return None;
    };
    if sub_column.contains_aggregate() {
        return None;
    }

    let join = JoinClause {
        join_type: JoinType::Inner,
        table: from.clone(),
        on: Some(Expression::Binary {
            left: expr.clone(),
            op: BinaryOp::Eq,
            right: Box::new(Expression::Column {
                table: Some(from.effective_name().to_string()),
                name: name.clone(),
            }),
        }),
    };
    Some((join, sub.where_clause.clone()))
}

/// Columns used anywhere in the statement. `None` when a wildcard appears.
fn collect_used_columns(
    stmt: &SelectStatement,
    pushed: &HashMap<String, Vec<Expression>>,
) -> Option<HashSet<String>> {
    let mut refs: Vec<(Option<String>, String)> = Vec::new();
    for item in &stmt.select_list {
        match item {
            SelectItem::Wildcard => return None,
            SelectItem::Expr { expr, .. } => expr.referenced_columns(&mut refs),
        }
    }
    for join in &stmt.joins {
        if let Some(on) = &join.on {
            on.referenced_columns(&mut refs);
        }
    }
    if let Some(where_clause) = &stmt.where_clause {
        where_clause.referenced_columns(&mut refs);
    }
    for group in &stmt.group_by {
        group.referenced_columns(&mut refs);
    }
    if let Some(having) = &stmt.having {
        having.referenced_columns(&mut refs);
    }
    for OrderByItem { expr, .. } in &stmt.order_by {
        expr.referenced_columns(&mut refs);
    }
    for conjuncts in pushed.values() {
        for conjunct in conjuncts {
            conjunct.referenced_columns(&mut refs);
        }
    }

    let mut used = HashSet::new();
    for (table, name) in refs {
        match table {
            Some(table) => {
                used.insert(format!("{}.{}", table.to_lowercase(), name.to_lowercase()));
            }
            None => {
                used.insert(name.to_lowercase());
            }
        }
    }
    Some(used)
}
