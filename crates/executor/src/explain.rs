//! EXPLAIN: render the plan the executor would run as `(id, op, detail)`
//! rows.

use common::{DbResult, QueryResult, Row};
use parser::{SelectItem, SelectStatement};
use types::Value;

use crate::select::{choose_access_path, AccessPath};
use crate::Executor;

struct PlanNode {
    op: &'static str,
    detail: String,
    children: Vec<PlanNode>,
}

impl PlanNode {
    fn leaf(op: &'static str, detail: String) -> Self {
        Self {
            op,
            detail,
            children: Vec::new(),
        }
    }

    fn above(op: &'static str, detail: String, child: PlanNode) -> Self {
        Self {
            op,
            detail,
            children: vec![child],
        }
    }
}

impl Executor<'_> {
    pub(crate) fn execute_explain(&mut self, query: &SelectStatement) -> DbResult<QueryResult> {
        let rewritten = if self.rewrite_enabled {
            Some(self.rewriter_plan(query)?)
        } else {
            None
        };
        let (stmt, pushed) = match &rewritten {
            Some(rewritten) => (&rewritten.stmt, Some(&rewritten.pushed)),
            None => (query, None),
        };

        // Scan nodes, bottom-up.
        let mut plan = match &stmt.from {
            None => PlanNode::leaf("Project", "constant row".into()),
            Some(from) => {
                let empty = Vec::new();
                let preds = pushed
                    .and_then(|p| p.get(&from.effective_name().to_lowercase()))
                    .unwrap_or(&empty);
                let mut node = self.scan_node(&from.name, preds)?;
                for join in &stmt.joins {
                    let join_preds = pushed
                        .and_then(|p| p.get(&join.table.effective_name().to_lowercase()))
                        .unwrap_or(&empty);
                    let right = self.scan_node(&join.table.name, join_preds)?;
                    let detail = match &join.on {
                        Some(on) => format!("{} ON {on}", join.join_type),
                        None => join.join_type.to_string(),
                    };
                    node = PlanNode {
                        op: "NestedLoopJoin",
                        detail,
                        children: vec![node, right],
                    };
                }
                node
            }
        };

        if let Some(where_clause) = &stmt.where_clause {
            plan = PlanNode::above("Filter", where_clause.to_string(), plan);
        }

        let has_aggregates = stmt.select_list.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
            SelectItem::Wildcard => false,
        });
        if !stmt.group_by.is_empty() || has_aggregates {
            let keys: Vec<String> = stmt.group_by.iter().map(|e| e.to_string()).collect();
            let detail = if keys.is_empty() {
                "single group".to_string()
            } else {
                format!("keys: {}", keys.join(", "))
            };
            plan = PlanNode::above("HashAggregate", detail, plan);
            if let Some(having) = &stmt.having {
                plan = PlanNode::above("Filter", having.to_string(), plan);
            }
        }

        if !stmt.order_by.is_empty() {
            let keys: Vec<String> = stmt
                .order_by
                .iter()
                .map(|o| format!("{}{}", o.expr, if o.ascending { "" } else { " DESC" }))
                .collect();
            plan = PlanNode::above("Sort", keys.join(", "), plan);
        }
        if stmt.limit.is_some() || stmt.offset.is_some() {
            plan = PlanNode::above(
                "Limit",
                format!(
                    "limit {}, offset {}",
                    stmt.limit
                        .map(|l| l.to_string())
                        .unwrap_or_else(|| "all".into()),
                    stmt.offset.unwrap_or(0)
                ),
                plan,
            );
        }

        let items: Vec<String> = stmt.select_list.iter().map(|i| i.to_string()).collect();
        plan = PlanNode::above("Project", items.join(", "), plan);

        let mut rows = Vec::new();
        let mut next_id = 0u64;
        flatten(&plan, 0, &mut next_id, &mut rows);
        Ok(QueryResult::with_rows(
            vec!["id".into(), "op".into(), "detail".into()],
            rows,
        ))
    }

    fn rewriter_plan(&mut self, query: &SelectStatement) -> DbResult<rewriter::Rewritten> {
        self.rewriter.rewrite(query)
    }

    fn scan_node(
        &mut self,
        table_name: &str,
        preds: &[parser::Expression],
    ) -> DbResult<PlanNode> {
        let db = self.current_db()?;
        let table = db.catalog().read().get_table(table_name)?.clone();
        let node = match choose_access_path(&table, preds) {
            AccessPath::SeqScan => {
                PlanNode::leaf("SeqScan", format!("table {}", table.name))
            }
            AccessPath::IndexEq { index, key } => PlanNode::leaf(
                "IndexScan",
                format!("index {} = {key}", index.name),
            ),
            AccessPath::IndexRange { index, low, high } => {
                let low = low
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-inf".into());
                let high = high
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "+inf".into());
                PlanNode::leaf(
                    "IndexScan",
                    format!("index {} in [{low}, {high}]", index.name),
                )
            }
        };
        // Pushed predicates run during the scan.
        if preds.is_empty() {
            Ok(node)
        } else {
            let rendered: Vec<String> = preds.iter().map(|p| p.to_string()).collect();
            Ok(PlanNode::above("Filter", rendered.join(" AND "), node))
        }
    }
}

fn flatten(node: &PlanNode, depth: usize, next_id: &mut u64, rows: &mut Vec<Row>) {
    let id = *next_id;
    *next_id += 1;
    let indent = "  ".repeat(depth);
    rows.push(Row::new(vec![
        Value::BigInt(id as i64),
        Value::Varchar(format!("{indent}{}", node.op)),
        Value::Varchar(node.detail.clone()),
    ]));
    for child in &node.children {
        flatten(child, depth + 1, next_id, rows);
    }
}
