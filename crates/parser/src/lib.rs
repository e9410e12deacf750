//! SQL front end: a hand-written lexer and recursive-descent parser over
//! the engine's SQL dialect, producing an owned AST.
//!
//! The dialect covers the SQL-92 core (SELECT with joins, grouping,
//! ordering and limits; INSERT/UPDATE/DELETE; table and index DDL) plus
//! the engine's administrative statements: databases, users, grants,
//! SHOW, EXPLAIN, VACUUM, ANALYZE, SAVE, and `SELECT … INTO OUTFILE`.
//!
//! Every AST node implements `Display`, printing back to parsable SQL, so
//! `parse(stmt.to_string())` re-parses to an equivalent statement.

mod ast;
mod lexer;
mod parser;
mod token;

#[cfg(test)]
mod tests;

pub use ast::*;
pub use parser::Parser;

use common::{DbError, DbResult};

/// Parse exactly one statement.
pub fn parse(sql: &str) -> DbResult<Statement> {
    let mut statements = parse_many(sql)?;
    match statements.len() {
        0 => Err(DbError::Syntax("empty statement".into())),
        1 => Ok(statements.remove(0)),
        n => Err(DbError::Syntax(format!(
            "expected a single statement, found {n}"
        ))),
    }
}

/// Parse a semicolon-separated script.
pub fn parse_many(sql: &str) -> DbResult<Vec<Statement>> {
    Parser::new(sql)?.parse_statements()
}
