//! Expression evaluation with SQL three-valued logic.
//!
//! The evaluator is pure: it reads an expression tree and an optional row
//! context and produces a [`Value`], with no I/O and no mutation of its
//! inputs. NULL propagates through arithmetic and ordered comparisons;
//! `AND`/`OR` follow Kleene logic; `IS NULL` is total.
//!
//! Aggregates and subqueries are not evaluated here; the executor
//! computes aggregates and rewrites subqueries into lists before asking
//! for a value; meeting one of those nodes is a semantic error.


use std::cmp::Ordering;

use common::{DbError, DbResult};
use parser::{BinaryOp, Expression, UnaryOp};
use types::Value;

/// Row context: column labels (possibly `table.column`-qualified) aligned
/// with the row's values.
#[derive(Clone, Copy, Debug)]
pub struct EvalContext<'a> {
    pub schema: &'a [String],
    pub row: &'a [Value],
}

impl<'a> EvalContext<'a> {
    pub fn new(schema: &'a [String], row: &'a [Value]) -> Self {
        Self { schema, row }
    }

    /// Resolve a column reference against the schema. Qualified references
    /// require an exact `table.column` match; unqualified ones match a bare
    /// label or a unique `.column` suffix.
    fn find_column(&self, table: Option<&str>, name: &str) -> DbResult<usize> {
        if let Some(table) = table {
            let wanted = format!("{table}.{name}");
            return self
                .schema
                .iter()
                .position(|label| label.eq_ignore_ascii_case(&wanted))
                .ok_or_else(|| DbError::Semantic(format!("unknown column '{table}.{name}'")));
        }

        let suffix = format!(".{}", name.to_lowercase());
        let mut matches = self.schema.iter().enumerate().filter(|(_, label)| {
            label.eq_ignore_ascii_case(name) || label.to_lowercase().ends_with(&suffix)
        });
        let first = matches
            .next()
            .ok_or_else(|| DbError::Semantic(format!("unknown column '{name}'")))?;
        if matches.next().is_some() {
            return Err(DbError::Semantic(format!("ambiguous column '{name}'")));
        }
        Ok(first.0)
    }
}

/// Evaluate an expression. `ctx` is `None` when no row is in scope
/// (constant folding, DEFAULT clauses); a column reference then fails.
pub fn evaluate(expr: &Expression, ctx: Option<&EvalContext<'_>>) -> DbResult<Value> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Column { table, name } => {
            let ctx = ctx.ok_or_else(|| {
                DbError::Semantic(format!("column '{name}' referenced without a row context"))
            })?;
            let idx = ctx.find_column(table.as_deref(), name)?;
            ctx.row
                .get(idx)
                .cloned()
                .ok_or_else(|| DbError::Semantic(format!("row has no value for column '{name}'")))
        }
        Expression::Unary { op, expr } => {
            let value = evaluate(expr, ctx)?;
            eval_unary(*op, value)
        }
        Expression::Binary { left, op, right } => match op {
            BinaryOp::And | BinaryOp::Or => eval_logical(left, *op, right, ctx),
            _ => {
                let lhs = evaluate(left, ctx)?;
                let rhs = evaluate(right, ctx)?;
                eval_binary(&lhs, *op, &rhs)
            }
        },
        Expression::Aggregate { .. } => Err(DbError::Semantic(
            "aggregate function is not allowed in this context".into(),
        )),
        Expression::FunctionCall { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, ctx)?);
            }
            eval_function(name, &values)
        }
        Expression::Case { whens, else_expr } => {
            for (condition, result) in whens {
                let cond = evaluate(condition, ctx)?;
                if cond.as_bool() == Some(true) {
                    return evaluate(result, ctx);
                }
            }
            match else_expr {
                Some(else_expr) => evaluate(else_expr, ctx),
                None => Ok(Value::Null),
            }
        }
        Expression::IsNull { expr, negated } => {
            let value = evaluate(expr, ctx)?;
            Ok(Value::Bool(value.is_null() != *negated))
        }
        Expression::Like {
            expr,
            pattern,
            negated,
        } => {
            let value = evaluate(expr, ctx)?;
            let pattern = evaluate(pattern, ctx)?;
            if value.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let text = value.to_string();
            let pattern = pattern
                .as_str()
                .ok_or_else(|| DbError::Semantic("LIKE pattern must be a string".into()))?;
            let matched = like_match(&text, pattern);
            Ok(Value::Bool(matched != *negated))
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, ctx)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                let item = evaluate(item, ctx)?;
                match value.sql_eq(&item) {
                    Some(true) => return Ok(Value::Bool(!negated)),
                    Some(false) => {}
                    None => saw_null = true,
                }
            }
            if saw_null {
                Ok(Value::Null)
            } else {
                Ok(Value::Bool(*negated))
            }
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = evaluate(expr, ctx)?;
            let low = evaluate(low, ctx)?;
            let high = evaluate(high, ctx)?;
            if value.is_null() || low.is_null() || high.is_null() {
                return Ok(Value::Null);
            }
            let ge_low = compare(&value, &low)? != Ordering::Less;
            let le_high = compare(&value, &high)? != Ordering::Greater;
            Ok(Value::Bool((ge_low && le_high) != *negated))
        }
        Expression::InSubquery { .. } | Expression::Subquery(_) => Err(DbError::Semantic(
            "subquery must be resolved before evaluation".into(),
        )),
        Expression::Match {
            columns,
            query,
            boolean_mode,
        } => {
            let ctx = ctx.ok_or_else(|| {
                DbError::Semantic("MATCH requires a row context".into())
            })?;
            let mut haystack = String::new();
            for column in columns {
                let idx = ctx.find_column(None, column)?;
                if let Some(value) = ctx.row.get(idx) {
                    if !value.is_null() {
                        haystack.push_str(&value.to_string().to_lowercase());
                        haystack.push(' ');
                    }
                }
            }
            Ok(Value::Bool(match_against(&haystack, query, *boolean_mode)))
        }
    }
}

/// Shorthand for WHERE/HAVING: missing truth (NULL) filters the row out.
pub fn evaluate_predicate(expr: &Expression, ctx: Option<&EvalContext<'_>>) -> DbResult<bool> {
    let value = evaluate(expr, ctx)?;
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        other => Err(DbError::Semantic(format!(
            "predicate evaluated to non-boolean {other}"
        ))),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> DbResult<Value> {
    match op {
        UnaryOp::Not => match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(DbError::Semantic(format!("NOT applied to {other}"))),
        },
        UnaryOp::Minus => match value {
            Value::Null => Ok(Value::Null),
            v if v.is_integer() => Ok(Value::BigInt(-v.as_i64().unwrap_or_default())),
            v if v.is_numeric() => Ok(Value::Double(-v.as_f64().unwrap_or_default())),
            other => Err(DbError::Semantic(format!("cannot negate {other}"))),
        },
        UnaryOp::Plus => match value {
            Value::Null => Ok(Value::Null),
            v if v.is_numeric() => Ok(v),
            other => Err(DbError::Semantic(format!("unary + applied to {other}"))),
        },
    }
}

/// Kleene AND/OR with short-circuiting on the determined side.
fn eval_logical(
    left: &Expression,
    op: BinaryOp,
    right: &Expression,
    ctx: Option<&EvalContext<'_>>,
) -> DbResult<Value> {
    let lhs = truth(evaluate(left, ctx)?)?;
    match (op, lhs) {
        (BinaryOp::And, Some(false)) => return Ok(Value::Bool(false)),
        (BinaryOp::Or, Some(true)) => return Ok(Value::Bool(true)),
        _ => {}
    }
    let rhs = truth(evaluate(right, ctx)?)?;
    let result = match op {
        BinaryOp::And => match (lhs, rhs) {
            (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lhs, rhs) {
            (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!("eval_logical only handles AND/OR"),
    };
    Ok(result.map(Value::Bool).unwrap_or(Value::Null))
}

fn truth(value: Value) -> DbResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        other => Err(DbError::Semantic(format!(
            "AND/OR operand is not boolean: {other}"
        ))),
    }
}

fn eval_binary(lhs: &Value, op: BinaryOp, rhs: &Value) -> DbResult<Value> {
    use BinaryOp::*;

    match op {
        Add | Sub | Mul | Div | Mod => eval_arithmetic(lhs, op, rhs),
        Eq | Ne | Lt | Le | Gt | Ge => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            let ord = compare(lhs, rhs)?;
            let result = match op {
                Eq => ord == Ordering::Equal,
                Ne => ord != Ordering::Equal,
                Lt => ord == Ordering::Less,
                Le => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                Ge => ord != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And | Or => unreachable!("handled by eval_logical"),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> DbResult<Ordering> {
    lhs.sql_cmp(rhs).ok_or_else(|| {
        DbError::Semantic(format!("cannot compare {lhs} with {rhs}"))
    })
}

/// Integer arithmetic when both sides are integral, double otherwise.
fn eval_arithmetic(lhs: &Value, op: BinaryOp, rhs: &Value) -> DbResult<Value> {
    use BinaryOp::*;

    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    if !lhs.is_numeric() || !rhs.is_numeric() {
        return Err(DbError::Semantic(format!(
            "arithmetic on non-numeric operands {lhs} and {rhs}"
        )));
    }

    if lhs.is_integer() && rhs.is_integer() {
        let a = lhs.as_i64().unwrap_or_default();
        let b = rhs.as_i64().unwrap_or_default();
        let result = match op {
            Add => a.checked_add(b),
            Sub => a.checked_sub(b),
            Mul => a.checked_mul(b),
            Div => {
                if b == 0 {
                    return Err(DbError::DivisionByZero);
                }
                a.checked_div(b)
            }
            Mod => {
                if b == 0 {
                    return Err(DbError::DivisionByZero);
                }
                a.checked_rem(b)
            }
            _ => unreachable!(),
        };
        return result
            .map(Value::BigInt)
            .ok_or_else(|| DbError::Arithmetic(format!("integer overflow in {a} {op:?} {b}")));
    }

    let a = lhs.as_f64().unwrap_or_default();
    let b = rhs.as_f64().unwrap_or_default();
    let result = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => {
            if b == 0.0 {
                return Err(DbError::DivisionByZero);
            }
            a / b
        }
        Mod => {
            if b == 0.0 {
                return Err(DbError::DivisionByZero);
            }
            a % b
        }
        _ => unreachable!(),
    };
    if result.is_infinite() {
        return Err(DbError::Arithmetic("floating point overflow".into()));
    }
    Ok(Value::Double(result))
}

fn eval_function(name: &str, args: &[Value]) -> DbResult<Value> {
    let arity = |n: usize| -> DbResult<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(DbError::Semantic(format!(
                "{name} expects {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    match name {
        "UPPER" => {
            arity(1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Text(args[0].to_string().to_uppercase()))
        }
        "LOWER" => {
            arity(1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Text(args[0].to_string().to_lowercase()))
        }
        "LENGTH" => {
            arity(1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::BigInt(args[0].to_string().chars().count() as i64))
        }
        "TRIM" => {
            arity(1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Text(args[0].to_string().trim().to_string()))
        }
        "ABS" => {
            arity(1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                v if v.is_integer() => Ok(Value::BigInt(v.as_i64().unwrap_or_default().abs())),
                v if v.is_numeric() => Ok(Value::Double(v.as_f64().unwrap_or_default().abs())),
                other => Err(DbError::Semantic(format!("ABS applied to {other}"))),
            }
        }
        "ROUND" => {
            if args.is_empty() || args.len() > 2 {
                return Err(DbError::Semantic("ROUND expects 1 or 2 arguments".into()));
            }
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            let value = args[0]
                .as_f64()
                .ok_or_else(|| DbError::Semantic("ROUND expects a number".into()))?;
            let digits = match args.get(1) {
                Some(d) => d
                    .as_i64()
                    .ok_or_else(|| DbError::Semantic("ROUND digits must be an integer".into()))?,
                None => 0,
            };
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Double((value * factor).round() / factor))
        }
        "COALESCE" => {
            for arg in args {
                if !arg.is_null() {
                    return Ok(arg.clone());
                }
            }
            Ok(Value::Null)
        }
        other => Err(DbError::Semantic(format!("unknown function '{other}'"))),
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character.
fn like_match(text: &str, pattern: &str) -> bool {
    fn matches(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('%', rest)) => {
                (0..=text.len()).any(|skip| matches(&text[skip..], rest))
            }
            Some(('_', rest)) => match text.split_first() {
                Some((_, text_rest)) => matches(text_rest, rest),
                None => false,
            },
            Some((c, rest)) => match text.split_first() {
                Some((t, text_rest)) => {
                    t.to_lowercase().eq(c.to_lowercase()) && matches(text_rest, rest)
                }
                None => false,
            },
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches(&text, &pattern)
}

/// Full-text predicate over the concatenated, lowercased column text.
/// Natural mode: any term matches. Boolean mode: every unprefixed or
/// `+`-prefixed term must appear, no `-`-prefixed term may.
fn match_against(haystack: &str, query: &str, boolean_mode: bool) -> bool {
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return false;
    }
    if !boolean_mode {
        return terms
            .iter()
            .any(|term| haystack.contains(&term.to_lowercase()));
    }
    for term in terms {
        if let Some(negative) = term.strip_prefix('-') {
            if haystack.contains(&negative.to_lowercase()) {
                return false;
            }
        } else {
            let required = term.strip_prefix('+').unwrap_or(term);
            if !haystack.contains(&required.to_lowercase()) {
                return false;
            }
        }
    }
    true
}
