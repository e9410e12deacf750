use pretty_assertions::assert_eq;
use types::{DataType, Value};

use crate::{
    parse, parse_many, AggFunc, AlterTableOp, BinaryOp, Expression, InsertSource, JoinType,
    OutFileFormat, Privilege, SelectItem, Statement,
};

fn parse_select(sql: &str) -> crate::SelectStatement {
    match parse(sql).unwrap() {
        Statement::Select(select) => select,
        other => panic!("expected SELECT, got {other:?}"),
    }
}

#[test]
fn select_star_with_where() {
    let select = parse_select("SELECT * FROM users WHERE id > 1");
    assert_eq!(select.select_list, vec![SelectItem::Wildcard]);
    assert_eq!(select.from.as_ref().unwrap().name, "users");
    let Some(Expression::Binary { op, .. }) = select.where_clause else {
        panic!("expected binary WHERE");
    };
    assert_eq!(op, BinaryOp::Gt);
}

#[test]
fn select_with_everything() {
    let select = parse_select(
        "SELECT DISTINCT name, COUNT(*) AS n FROM users \
         LEFT JOIN orders ON users.id = orders.user_id \
         WHERE age >= 18 AND active = TRUE \
         GROUP BY name HAVING COUNT(*) > 2 \
         ORDER BY n DESC, name \
         LIMIT 10 OFFSET 5",
    );
    assert!(select.distinct);
    assert_eq!(select.select_list.len(), 2);
    assert_eq!(select.joins.len(), 1);
    assert_eq!(select.joins[0].join_type, JoinType::Left);
    assert_eq!(select.group_by.len(), 1);
    assert!(select.having.is_some());
    assert_eq!(select.order_by.len(), 2);
    assert!(!select.order_by[0].ascending);
    assert!(select.order_by[1].ascending);
    assert_eq!(select.limit, Some(10));
    assert_eq!(select.offset, Some(5));
}

#[test]
fn select_into_outfile() {
    let select = parse_select("SELECT * FROM t INTO OUTFILE '/tmp/out.json' FORMAT JSON");
    let outfile = select.into_outfile.unwrap();
    assert_eq!(outfile.path, "/tmp/out.json");
    assert_eq!(outfile.format, OutFileFormat::Json);
}

#[test]
fn operator_precedence() {
    // 1 + 2 * 3 parses as 1 + (2 * 3).
    let select = parse_select("SELECT 1 + 2 * 3");
    let SelectItem::Expr { expr, .. } = &select.select_list[0] else {
        panic!();
    };
    let Expression::Binary { op, right, .. } = expr else {
        panic!("expected +");
    };
    assert_eq!(*op, BinaryOp::Add);
    let Expression::Binary { op, .. } = right.as_ref() else {
        panic!("expected *");
    };
    assert_eq!(*op, BinaryOp::Mul);
}

#[test]
fn and_binds_tighter_than_or() {
    let select = parse_select("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3");
    let Some(Expression::Binary { op, .. }) = &select.where_clause else {
        panic!();
    };
    assert_eq!(*op, BinaryOp::Or);
}

#[test]
fn comparison_suffixes() {
    for sql in [
        "SELECT * FROM t WHERE a IS NULL",
        "SELECT * FROM t WHERE a IS NOT NULL",
        "SELECT * FROM t WHERE a LIKE 'x%'",
        "SELECT * FROM t WHERE a NOT LIKE '%y'",
        "SELECT * FROM t WHERE a IN (1, 2, 3)",
        "SELECT * FROM t WHERE a NOT IN (SELECT b FROM u)",
        "SELECT * FROM t WHERE a BETWEEN 1 AND 10",
    ] {
        parse(sql).unwrap_or_else(|e| panic!("{sql}: {e}"));
    }
}

#[test]
fn case_and_functions() {
    let select = parse_select(
        "SELECT CASE WHEN age < 18 THEN 'minor' ELSE 'adult' END, UPPER(name) FROM people",
    );
    assert_eq!(select.select_list.len(), 2);
    let SelectItem::Expr { expr, .. } = &select.select_list[1] else {
        panic!();
    };
    assert_eq!(
        *expr,
        Expression::FunctionCall {
            name: "UPPER".into(),
            args: vec![Expression::Column {
                table: None,
                name: "name".into()
            }],
        }
    );
}

#[test]
fn match_against() {
    let select = parse_select(
        "SELECT * FROM docs WHERE MATCH(title, body) AGAINST('rust database' IN BOOLEAN MODE)",
    );
    let Some(Expression::Match {
        columns,
        query,
        boolean_mode,
    }) = select.where_clause
    else {
        panic!("expected MATCH");
    };
    assert_eq!(columns, vec!["title", "body"]);
    assert_eq!(query, "rust database");
    assert!(boolean_mode);
}

#[test]
fn aggregate_distinct() {
    let select = parse_select("SELECT COUNT(DISTINCT city) FROM users");
    let SelectItem::Expr { expr, .. } = &select.select_list[0] else {
        panic!();
    };
    let Expression::Aggregate {
        func, distinct, ..
    } = expr
    else {
        panic!();
    };
    assert_eq!(*func, AggFunc::Count);
    assert!(*distinct);
}

#[test]
fn multi_row_insert() {
    let Statement::Insert(insert) =
        parse("INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob')").unwrap()
    else {
        panic!();
    };
    assert_eq!(insert.table, "users");
    assert_eq!(insert.columns, vec!["id", "name"]);
    let InsertSource::Values(rows) = insert.source else {
        panic!();
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][1], Expression::Literal(Value::Text("Bob".into())));
}

#[test]
fn insert_from_select() {
    let Statement::Insert(insert) =
        parse("INSERT INTO archive SELECT * FROM users WHERE active = FALSE").unwrap()
    else {
        panic!();
    };
    assert!(matches!(insert.source, InsertSource::Select(_)));
}

#[test]
fn update_and_delete() {
    let Statement::Update(update) =
        parse("UPDATE acc SET bal = 500, touched = TRUE WHERE id = 1").unwrap()
    else {
        panic!();
    };
    assert_eq!(update.assignments.len(), 2);
    assert!(update.where_clause.is_some());

    let Statement::Delete(delete) = parse("DELETE FROM acc WHERE bal < 0").unwrap() else {
        panic!();
    };
    assert_eq!(delete.table, "acc");
}

#[test]
fn create_table_with_constraints() {
    let Statement::CreateTable(create) = parse(
        "CREATE TABLE users (\
           id INT PRIMARY KEY AUTO_INCREMENT, \
           name VARCHAR(50) NOT NULL, \
           email VARCHAR(100) UNIQUE, \
           balance DECIMAL(10, 2) DEFAULT 0, \
           created DATETIME)",
    )
    .unwrap()
    else {
        panic!();
    };
    assert_eq!(create.columns.len(), 5);
    let id = &create.columns[0];
    assert!(id.primary_key && id.not_null && id.auto_increment);
    assert_eq!(create.columns[1].length, 50);
    assert_eq!(create.columns[1].data_type, DataType::Varchar);
    let balance = &create.columns[3];
    assert_eq!((balance.length, balance.scale), (10, 2));
    assert!(balance.default_expr.is_some());
}

#[test]
fn table_level_primary_key() {
    let Statement::CreateTable(create) =
        parse("CREATE TABLE t (k INT, v TEXT, PRIMARY KEY (k))").unwrap()
    else {
        panic!();
    };
    assert!(create.columns[0].primary_key);
    assert!(!create.columns[1].primary_key);
}

#[test]
fn create_index_variants() {
    let Statement::CreateIndex(create) =
        parse("CREATE UNIQUE INDEX idx_k ON t (k) USING HASH").unwrap()
    else {
        panic!();
    };
    assert!(create.unique);
    assert_eq!(create.index_type, crate::IndexType::Hash);

    let Statement::CreateIndex(create) = parse("CREATE INDEX idx_ft ON docs (body) USING FULLTEXT")
        .unwrap()
    else {
        panic!();
    };
    assert_eq!(create.index_type, crate::IndexType::FullText);
}

#[test]
fn alter_table_ops() {
    let Statement::AlterTable(alter) =
        parse("ALTER TABLE t ADD COLUMN age INT NOT NULL").unwrap()
    else {
        panic!();
    };
    assert!(matches!(alter.op, AlterTableOp::AddColumn(_)));

    let Statement::AlterTable(alter) = parse("ALTER TABLE t RENAME COLUMN a TO b").unwrap()
    else {
        panic!();
    };
    assert_eq!(
        alter.op,
        AlterTableOp::RenameColumn {
            from: "a".into(),
            to: "b".into()
        }
    );
}

#[test]
fn database_and_admin_statements() {
    assert_eq!(
        parse("CREATE DATABASE IF NOT EXISTS shop").unwrap(),
        Statement::CreateDatabase {
            name: "shop".into(),
            if_not_exists: true
        }
    );
    assert_eq!(
        parse("USE DATABASE shop").unwrap(),
        Statement::UseDatabase { name: "shop".into() }
    );
    assert_eq!(
        parse("USE shop").unwrap(),
        Statement::UseDatabase { name: "shop".into() }
    );
    assert_eq!(parse("SHOW TABLES").unwrap(), Statement::ShowTables);
    assert_eq!(
        parse("SHOW INDEXES FROM users").unwrap(),
        Statement::ShowIndexes {
            table: Some("users".into())
        }
    );
    assert_eq!(parse("SHOW DATABASES").unwrap(), Statement::ShowDatabases);
    assert_eq!(parse("BEGIN TRANSACTION").unwrap(), Statement::Begin);
    assert_eq!(parse("COMMIT").unwrap(), Statement::Commit);
    assert_eq!(parse("ROLLBACK").unwrap(), Statement::Rollback);
    assert_eq!(parse("SAVE").unwrap(), Statement::Save);
    assert_eq!(
        parse("VACUUM users").unwrap(),
        Statement::Vacuum {
            table: Some("users".into())
        }
    );
    assert_eq!(
        parse("ANALYZE TABLE users").unwrap(),
        Statement::Analyze {
            table: Some("users".into())
        }
    );
}

#[test]
fn user_and_grant_statements() {
    let Statement::CreateUser {
        username,
        password,
        is_admin,
    } = parse("CREATE USER bob IDENTIFIED BY 'pw'").unwrap()
    else {
        panic!();
    };
    assert_eq!(username, "bob");
    assert_eq!(password, "pw");
    assert!(!is_admin);

    let Statement::Grant(grant) =
        parse("GRANT SELECT ON shop.users TO bob WITH GRANT OPTION").unwrap()
    else {
        panic!();
    };
    assert_eq!(grant.privilege, Privilege::Select);
    assert_eq!(grant.database, "shop");
    assert_eq!(grant.table.as_deref(), Some("users"));
    assert!(grant.with_grant_option);

    let Statement::Revoke(revoke) = parse("REVOKE ALL ON shop.* FROM bob").unwrap() else {
        panic!();
    };
    assert_eq!(revoke.privilege, Privilege::All);
    assert_eq!(revoke.table, None);
}

#[test]
fn explain_wraps_select() {
    let Statement::Explain { query } = parse("EXPLAIN SELECT * FROM t WHERE k = 5").unwrap()
    else {
        panic!();
    };
    assert!(query.where_clause.is_some());
}

#[test]
fn string_escapes_and_comments() {
    let select = parse_select(
        "SELECT 'it''s' -- trailing comment\n FROM t /* block\n comment */ WHERE a = 1",
    );
    let SelectItem::Expr { expr, .. } = &select.select_list[0] else {
        panic!();
    };
    assert_eq!(*expr, Expression::Literal(Value::Text("it's".into())));
}

#[test]
fn parse_many_splits_statements() {
    let statements = parse_many("CREATE DATABASE a; USE a; SHOW TABLES;").unwrap();
    assert_eq!(statements.len(), 3);
}

#[test]
fn errors_are_reported_once_with_position() {
    let err = parse("SELECT FROM").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("syntax error"), "{message}");
    assert!(message.contains("line 1"), "{message}");

    assert!(parse("SELEC * FROM t").is_err());
    assert!(parse("INSERT users VALUES (1)").is_err());
    assert!(parse("SELECT * FROM t WHERE").is_err());
}

#[test]
fn round_trip_through_display() {
    let sources = [
        "SELECT * FROM users WHERE id > 1",
        "SELECT DISTINCT name AS n FROM users ORDER BY n DESC LIMIT 3",
        "SELECT a, SUM(b) FROM t GROUP BY a HAVING SUM(b) > 10",
        "SELECT * FROM a INNER JOIN b ON a.id = b.a_id WHERE a.x IS NOT NULL",
        "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')",
        "UPDATE t SET a = a + 1 WHERE b IN (1, 2)",
        "DELETE FROM t WHERE a BETWEEN 1 AND 5",
        "CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(50) NOT NULL)",
        "CREATE UNIQUE INDEX idx ON t (name) USING BTREE",
        "GRANT UPDATE ON shop.users TO bob",
        "SELECT CASE WHEN a = 1 THEN 'one' ELSE 'many' END FROM t",
    ];
    for sql in sources {
        let first = parse(sql).unwrap();
        let printed = first.to_string();
        let second = parse(&printed)
            .unwrap_or_else(|e| panic!("reparse of '{printed}' failed: {e}"));
        assert_eq!(first, second, "round trip of '{sql}' via '{printed}'");
    }
}
