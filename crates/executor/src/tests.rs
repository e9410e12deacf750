use common::{Config, DbError};
use database::DatabaseManager;
use tempfile::TempDir;
use types::Value;

use crate::Executor;

fn test_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(128)
        .build()
}

fn setup() -> (DatabaseManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let manager = DatabaseManager::open(test_config(&dir)).unwrap();
    (manager, dir)
}

fn run_all(executor: &mut Executor<'_>, script: &[&str]) {
    for sql in script {
        let result = executor.execute(sql);
        assert!(result.success, "'{sql}' failed: {}", result.message);
    }
}

#[test]
fn create_insert_select() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE shop",
            "USE DATABASE shop",
            "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(50))",
            "INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob')",
        ],
    );

    let result = executor.execute("SELECT * FROM users WHERE id > 1");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(
        result.rows[0].values,
        vec![Value::Int(2), Value::Varchar("Bob".into())]
    );
    assert_eq!(result.columns, vec!["id", "name"]);
}

#[test]
fn unique_index_enforcement() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (k INT)",
            "CREATE UNIQUE INDEX idx_k ON t (k)",
            "INSERT INTO t VALUES (5)",
        ],
    );

    let dup = executor.execute("INSERT INTO t VALUES (5)");
    assert!(!dup.success);
    assert!(matches!(dup.error, Some(DbError::Constraint(_))), "{dup:?}");

    // The first insert is still visible.
    let check = executor.execute("SELECT * FROM t");
    assert_eq!(check.rows.len(), 1);
}

#[test]
fn transaction_rollback_restores_state() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE bank",
            "USE DATABASE bank",
            "CREATE TABLE acc (id INT, bal INT)",
            "INSERT INTO acc VALUES (1, 100)",
            "BEGIN",
            "UPDATE acc SET bal = 500 WHERE id = 1",
        ],
    );

    // Inside the transaction the update is visible.
    let dirty = executor.execute("SELECT bal FROM acc WHERE id = 1");
    assert_eq!(dirty.rows[0].values, vec![Value::Int(500)]);

    assert!(executor.execute("ROLLBACK").success);

    let result = executor.execute("SELECT bal FROM acc WHERE id = 1");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].values, vec![Value::Int(100)]);
}

#[test]
fn transaction_rollback_of_insert_and_delete() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT, v VARCHAR(20))",
            "INSERT INTO t VALUES (1, 'keep')",
            "BEGIN",
            "INSERT INTO t VALUES (2, 'gone')",
            "DELETE FROM t WHERE id = 1",
        ],
    );
    assert!(executor.execute("ROLLBACK").success);

    let result = executor.execute("SELECT id FROM t");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].values, vec![Value::Int(1)]);
}

#[test]
fn commit_makes_changes_durable_across_reload() {
    let dir = TempDir::new().unwrap();
    {
        let manager = DatabaseManager::open(test_config(&dir)).unwrap();
        let mut executor = Executor::new(&manager);
        run_all(
            &mut executor,
            &[
                "CREATE DATABASE d",
                "USE DATABASE d",
                "CREATE TABLE users (id INT, name VARCHAR(20))",
                "BEGIN",
                "INSERT INTO users VALUES (1, 'x')",
                "COMMIT",
                "SAVE",
            ],
        );
    }
    {
        let manager = DatabaseManager::open(test_config(&dir)).unwrap();
        let mut executor = Executor::new(&manager);
        run_all(&mut executor, &["USE DATABASE d"]);
        let result = executor.execute("SELECT * FROM users");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(
            result.rows[0].values,
            vec![Value::Int(1), Value::Varchar("x".into())]
        );
    }
}

#[test]
fn recovery_replays_committed_but_unflushed_work() {
    let dir = TempDir::new().unwrap();
    {
        let manager = DatabaseManager::open(test_config(&dir)).unwrap();
        let mut executor = Executor::new(&manager);
        run_all(
            &mut executor,
            &[
                "CREATE DATABASE d",
                "USE DATABASE d",
                "CREATE TABLE users (id INT, name VARCHAR(20))",
            ],
        );
        // Autocommit insert: the WAL is flushed at commit, but the dirty
        // data pages are never written back ("kill before
        // flush_all_pages").
        let result = executor.execute("INSERT INTO users VALUES (1, 'x')");
        assert!(result.success);
        // Dropping the manager without SAVE abandons the buffer pool.
    }
    {
        let manager = DatabaseManager::open(test_config(&dir)).unwrap();
        let mut executor = Executor::new(&manager);
        run_all(&mut executor, &["USE DATABASE d"]);
        let result = executor.execute("SELECT * FROM users");
        assert_eq!(result.rows.len(), 1, "WAL replay must restore the row");
        assert_eq!(
            result.rows[0].values,
            vec![Value::Int(1), Value::Varchar("x".into())]
        );
    }
}

#[test]
fn permission_enforcement() {
    let (manager, _dir) = setup();
    let mut admin = Executor::new(&manager);

    run_all(
        &mut admin,
        &[
            "CREATE DATABASE shop",
            "USE DATABASE shop",
            "CREATE TABLE users (id INT, name VARCHAR(20))",
            "INSERT INTO users VALUES (1, 'a'), (2, 'b')",
            "CREATE USER bob IDENTIFIED BY 'pw'",
            "GRANT SELECT ON shop.users TO bob",
        ],
    );

    let mut bob = Executor::for_user(&manager, "bob");
    assert!(bob.execute("USE DATABASE shop").success);

    let select = bob.execute("SELECT * FROM users");
    assert!(select.success, "{}", select.message);
    assert_eq!(select.rows.len(), 2);

    let insert = bob.execute("INSERT INTO users VALUES (3, 'c')");
    assert!(!insert.success);
    assert!(
        matches!(insert.error, Some(DbError::PermissionDenied(_))),
        "{insert:?}"
    );
}

#[test]
fn joins_aggregates_order_limit() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(20))",
            "CREATE TABLE orders (id INT PRIMARY KEY, user_id INT, total INT)",
            "INSERT INTO users VALUES (1, 'alice'), (2, 'bob'), (3, 'carol')",
            "INSERT INTO orders VALUES (10, 1, 50), (11, 1, 70), (12, 2, 30)",
        ],
    );

    // Inner join.
    let joined = executor.execute(
        "SELECT users.name, orders.total FROM users \
         INNER JOIN orders ON users.id = orders.user_id \
         ORDER BY orders.total",
    );
    assert!(joined.success, "{}", joined.message);
    assert_eq!(joined.rows.len(), 3);
    assert_eq!(joined.rows[0].values[1], Value::Int(30));

    // LEFT JOIN preserves carol with NULLs.
    let left = executor.execute(
        "SELECT users.name, orders.total FROM users \
         LEFT JOIN orders ON users.id = orders.user_id WHERE orders.total IS NULL",
    );
    assert_eq!(left.rows.len(), 1);
    assert_eq!(left.rows[0].values[0], Value::Varchar("carol".into()));

    // Aggregates with GROUP BY and HAVING.
    let grouped = executor.execute(
        "SELECT user_id, COUNT(*) AS n, SUM(total) AS s FROM orders \
         GROUP BY user_id HAVING COUNT(*) > 1",
    );
    assert_eq!(grouped.rows.len(), 1);
    assert_eq!(
        grouped.rows[0].values,
        vec![Value::Int(1), Value::BigInt(2), Value::BigInt(120)]
    );

    // ORDER BY DESC + LIMIT/OFFSET.
    let paged = executor.execute("SELECT id FROM orders ORDER BY id DESC LIMIT 2 OFFSET 1");
    assert_eq!(paged.rows.len(), 2);
    assert_eq!(paged.rows[0].values, vec![Value::Int(11)]);
    assert_eq!(paged.rows[1].values, vec![Value::Int(10)]);
}

#[test]
fn btree_range_access_path() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE nums (k INT PRIMARY KEY)",
        ],
    );
    for chunk in (1..=300).collect::<Vec<i64>>().chunks(50) {
        let values: Vec<String> = chunk.iter().map(|i| format!("({i})")).collect();
        let sql = format!("INSERT INTO nums VALUES {}", values.join(", "));
        assert!(executor.execute(&sql).success);
    }

    let result = executor.execute("SELECT k FROM nums WHERE k BETWEEN 100 AND 200 ORDER BY k");
    assert_eq!(result.rows.len(), 101);
    assert_eq!(result.rows[0].values, vec![Value::Int(100)]);
    assert_eq!(result.rows[100].values, vec![Value::Int(200)]);

    // The plan uses the primary key index for the range.
    let plan = executor.execute("EXPLAIN SELECT k FROM nums WHERE k BETWEEN 100 AND 200");
    assert!(plan.success);
    let text: Vec<String> = plan
        .rows
        .iter()
        .map(|row| format!("{} {}", row.values[1], row.values[2]))
        .collect();
    assert!(
        text.iter().any(|line| line.contains("IndexScan")),
        "{text:?}"
    );
}

#[test]
fn hash_index_equality_and_no_ranges() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (k INT, v VARCHAR(10))",
            "CREATE INDEX idx_k ON t (k) USING HASH",
            "INSERT INTO t VALUES (1, 'a'), (2, 'b'), (2, 'c'), (3, 'd')",
        ],
    );

    let eq = executor.execute("SELECT v FROM t WHERE k = 2");
    assert_eq!(eq.rows.len(), 2);

    // Ranges still work (sequential scan fallback).
    let range = executor.execute("SELECT v FROM t WHERE k > 1");
    assert_eq!(range.rows.len(), 3);
}

#[test]
fn update_maintains_indexes() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT PRIMARY KEY, v INT)",
            "CREATE INDEX idx_v ON t (v)",
            "INSERT INTO t VALUES (1, 10), (2, 20)",
            "UPDATE t SET v = 99 WHERE id = 1",
        ],
    );

    let hit = executor.execute("SELECT id FROM t WHERE v = 99");
    assert_eq!(hit.rows.len(), 1);
    assert_eq!(hit.rows[0].values, vec![Value::Int(1)]);

    let miss = executor.execute("SELECT id FROM t WHERE v = 10");
    assert_eq!(miss.rows.len(), 0);
}

#[test]
fn delete_and_vacuum() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT PRIMARY KEY)",
            "INSERT INTO t VALUES (1), (2), (3), (4), (5)",
            "DELETE FROM t WHERE id > 2",
        ],
    );

    let remaining = executor.execute("SELECT id FROM t ORDER BY id");
    assert_eq!(remaining.rows.len(), 2);

    let vacuum = executor.execute("VACUUM t");
    assert!(vacuum.success);
    assert!(vacuum.message.contains("3 row(s)"), "{}", vacuum.message);

    // Data unchanged after vacuum.
    let after = executor.execute("SELECT id FROM t ORDER BY id");
    assert_eq!(after.rows.len(), 2);
}

#[test]
fn analyze_populates_stats() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT, grp VARCHAR(5))",
            "INSERT INTO t VALUES (1, 'a'), (2, 'a'), (3, 'b')",
            "ANALYZE TABLE t",
        ],
    );

    let db = manager.current_database().unwrap();
    let catalog = db.catalog().read();
    let stats = catalog.get_table("t").unwrap().stats.clone().unwrap();
    assert_eq!(stats.row_count, 3);
    assert_eq!(stats.columns[0].distinct_estimate, 3);
    assert_eq!(stats.columns[1].distinct_estimate, 2);
    assert_eq!(stats.columns[0].min, Some(Value::Int(1)));
    assert_eq!(stats.columns[0].max, Some(Value::Int(3)));
}

#[test]
fn expression_features_in_select() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE people (id INT, name VARCHAR(20), age INT)",
            "INSERT INTO people VALUES (1, 'ann', 17), (2, 'ben', 30), (3, 'cy', NULL)",
        ],
    );

    let case = executor.execute(
        "SELECT name, CASE WHEN age < 18 THEN 'minor' WHEN age IS NULL THEN 'unknown' \
         ELSE 'adult' END AS kind FROM people ORDER BY id",
    );
    assert!(case.success, "{}", case.message);
    assert_eq!(case.rows[0].values[1], Value::Text("minor".into()));
    assert_eq!(case.rows[1].values[1], Value::Text("adult".into()));
    assert_eq!(case.rows[2].values[1], Value::Text("unknown".into()));

    let like = executor.execute("SELECT name FROM people WHERE name LIKE '%n%'");
    assert_eq!(like.rows.len(), 2);

    let division = executor.execute("SELECT 1 / 0 FROM people");
    assert!(!division.success);
    assert_eq!(division.error, Some(DbError::DivisionByZero));

    let in_list = executor.execute("SELECT name FROM people WHERE id IN (1, 3)");
    assert_eq!(in_list.rows.len(), 2);
}

#[test]
fn in_subquery_execution() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(20))",
            "CREATE TABLE vips (user_id INT)",
            "INSERT INTO users VALUES (1, 'a'), (2, 'b'), (3, 'c')",
            "INSERT INTO vips VALUES (1), (3)",
        ],
    );

    let result =
        executor.execute("SELECT name FROM users WHERE id IN (SELECT user_id FROM vips)");
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn insert_from_select_and_multi_row() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE src (id INT, v INT)",
            "CREATE TABLE dst (id INT, v INT)",
            "INSERT INTO src VALUES (1, 10), (2, 20), (3, 30)",
            "INSERT INTO dst SELECT * FROM src WHERE v > 10",
        ],
    );

    let result = executor.execute("SELECT id FROM dst ORDER BY id");
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn constraints_not_null_and_defaults() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(10) NOT NULL, \
             score INT DEFAULT 100)",
        ],
    );

    let null_violation = executor.execute("INSERT INTO t (id) VALUES (1)");
    assert!(!null_violation.success);
    assert!(matches!(
        null_violation.error,
        Some(DbError::Constraint(_))
    ));

    assert!(executor.execute("INSERT INTO t (id, name) VALUES (1, 'x')").success);
    let row = executor.execute("SELECT score FROM t WHERE id = 1");
    assert_eq!(row.rows[0].values, vec![Value::Int(100)]);

    // Over-length VARCHAR is rejected.
    let too_long = executor.execute("INSERT INTO t (id, name) VALUES (2, 'longer than ten')");
    assert!(!too_long.success);
    assert!(matches!(too_long.error, Some(DbError::Constraint(_))));

    // PRIMARY KEY duplicates fail through the auto-created index.
    let dup = executor.execute("INSERT INTO t (id, name) VALUES (1, 'y')");
    assert!(!dup.success);
    assert!(matches!(dup.error, Some(DbError::Constraint(_))));
}

#[test]
fn alter_table_lifecycle() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(20))",
            "INSERT INTO t VALUES (1, 'a')",
            "ALTER TABLE t ADD COLUMN score INT DEFAULT 5",
        ],
    );

    let with_default = executor.execute("SELECT score FROM t WHERE id = 1");
    assert_eq!(with_default.rows[0].values, vec![Value::Int(5)]);

    run_all(
        &mut executor,
        &[
            "ALTER TABLE t RENAME COLUMN score TO points",
            "ALTER TABLE t DROP COLUMN points",
        ],
    );
    assert!(!executor.execute("SELECT points FROM t").success);
    assert!(executor.execute("SELECT name FROM t").success);
}

#[test]
fn show_statements_and_drop() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE a (x INT PRIMARY KEY)",
            "CREATE TABLE b (y INT)",
            "CREATE INDEX idx_y ON b (y)",
        ],
    );

    let tables = executor.execute("SHOW TABLES");
    let names: Vec<String> = tables
        .rows
        .iter()
        .map(|r| r.values[0].to_string())
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    let indexes = executor.execute("SHOW INDEXES FROM b");
    assert_eq!(indexes.rows.len(), 1);
    assert_eq!(indexes.rows[0].values[0], Value::Varchar("idx_y".into()));

    let databases = executor.execute("SHOW DATABASES");
    assert!(databases.rows.iter().any(|r| r.values[0].to_string() == "d"));

    run_all(&mut executor, &["DROP INDEX idx_y", "DROP TABLE b"]);
    assert!(!executor.execute("SELECT * FROM b").success);
    let after = executor.execute("SHOW TABLES");
    assert_eq!(after.rows.len(), 1);
}

#[test]
fn select_into_outfile_csv_and_json() {
    let (manager, dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT, name VARCHAR(20))",
            "INSERT INTO t VALUES (1, 'a,b'), (2, 'plain')",
        ],
    );

    let csv_path = dir.path().join("out.csv");
    let sql = format!(
        "SELECT * FROM t ORDER BY id INTO OUTFILE '{}' FORMAT CSV",
        csv_path.display()
    );
    assert!(executor.execute(&sql).success);
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert!(csv.starts_with("id,name\n"), "{csv}");
    assert!(csv.contains("\"a,b\""), "{csv}");

    let json_path = dir.path().join("out.json");
    let sql = format!(
        "SELECT * FROM t ORDER BY id INTO OUTFILE '{}' FORMAT JSON",
        json_path.display()
    );
    assert!(executor.execute(&sql).success);
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert_eq!(json[0]["id"], serde_json::json!(1));
}

#[test]
fn query_cache_hits_and_invalidation() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT)",
            "INSERT INTO t VALUES (1)",
        ],
    );

    let first = executor.execute("SELECT id FROM t");
    assert_eq!(first.rows.len(), 1);
    let stats_before = executor.query_cache_stats();

    let second = executor.execute("SELECT id FROM t");
    assert_eq!(second.rows.len(), 1);
    let stats_after = executor.query_cache_stats();
    assert_eq!(stats_after.hits, stats_before.hits + 1);

    // DML invalidates; the next run sees fresh data.
    assert!(executor.execute("INSERT INTO t VALUES (2)").success);
    let third = executor.execute("SELECT id FROM t");
    assert_eq!(third.rows.len(), 2, "stale cache entry served after DML");
}

#[test]
fn explain_renders_plan_rows() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (id INT PRIMARY KEY, v INT)",
        ],
    );

    let plan = executor.execute(
        "EXPLAIN SELECT v FROM t WHERE id = 1 ORDER BY v LIMIT 3",
    );
    assert!(plan.success, "{}", plan.message);
    assert_eq!(plan.columns, vec!["id", "op", "detail"]);
    let ops: Vec<String> = plan
        .rows
        .iter()
        .map(|r| r.values[1].to_string())
        .collect();
    assert!(ops.iter().any(|op| op.contains("Project")), "{ops:?}");
    assert!(ops.iter().any(|op| op.contains("Limit")), "{ops:?}");
    assert!(ops.iter().any(|op| op.contains("Sort")), "{ops:?}");
    assert!(ops.iter().any(|op| op.contains("IndexScan")), "{ops:?}");
}

#[test]
fn syntax_and_semantic_errors_are_in_band() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    let bad = executor.execute("SELEC 1");
    assert!(!bad.success);
    assert!(matches!(bad.error, Some(DbError::Syntax(_))));

    run_all(&mut executor, &["CREATE DATABASE d", "USE DATABASE d"]);
    let missing = executor.execute("SELECT * FROM no_such_table");
    assert!(!missing.success);
    assert!(matches!(missing.error, Some(DbError::Catalog(_))), "{missing:?}");

    let unknown_col = executor.execute("CREATE TABLE t (id INT)");
    assert!(unknown_col.success);
    let result = executor.execute("SELECT nope FROM t");
    assert!(!result.success);
}

#[test]
fn distinct_and_count_distinct() {
    let (manager, _dir) = setup();
    let mut executor = Executor::new(&manager);

    run_all(
        &mut executor,
        &[
            "CREATE DATABASE d",
            "USE DATABASE d",
            "CREATE TABLE t (grp VARCHAR(5))",
            "INSERT INTO t VALUES ('a'), ('a'), ('b'), ('b'), ('c')",
        ],
    );

    let distinct = executor.execute("SELECT DISTINCT grp FROM t ORDER BY grp");
    assert_eq!(distinct.rows.len(), 3);

    let counted = executor.execute("SELECT COUNT(DISTINCT grp) FROM t");
    assert_eq!(counted.rows[0].values, vec![Value::BigInt(3)]);

    // Aggregates over an empty table yield a single row.
    run_all(&mut executor, &["DELETE FROM t"]);
    let empty = executor.execute("SELECT COUNT(*), SUM(1) FROM t");
    assert_eq!(empty.rows.len(), 1);
    assert_eq!(empty.rows[0].values[0], Value::BigInt(0));
    assert_eq!(empty.rows[0].values[1], Value::Null);
}
