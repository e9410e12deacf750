//! Integration coverage for the two persistence backends: catalog and WAL
//! each stored either as sidecar files or inside the database file itself,
//! selected by the file-header bits.

use catalog::{ColumnDef, TableDef};
use common::{Config, INVALID_TXN_ID};
use database::Database;
use tempfile::TempDir;
use types::{DataType, Value};

fn config(dir: &TempDir, catalog_in_db: bool, wal_in_db: bool) -> Config {
    Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(64)
        .catalog_in_db(catalog_in_db)
        .wal_in_db(wal_in_db)
        .build()
}

fn sample_table() -> TableDef {
    TableDef::new(
        "items",
        vec![
            ColumnDef::new("id", DataType::Int).primary_key(),
            ColumnDef::new("label", DataType::Varchar).with_length(40),
        ],
    )
}

fn populate(db: &Database, count: i32) {
    {
        let mut catalog = db.catalog().write();
        catalog.create_table(sample_table()).unwrap();
    }
    for i in 1..=count {
        let mut catalog = db.catalog().write();
        let table = catalog.get_table_mut("items").unwrap();
        db.heap()
            .insert_row(
                table,
                &[Value::Int(i), Value::Varchar(format!("item-{i}"))],
                INVALID_TXN_ID,
            )
            .unwrap();
    }
    db.save().unwrap();
}

fn verify(db: &Database, count: usize) {
    let catalog = db.catalog().read();
    let table = catalog.get_table("items").unwrap();
    assert_eq!(table.columns.len(), 2);
    let rows = db.heap().scan(table).unwrap();
    assert_eq!(rows.len(), count);
    assert_eq!(rows[0].values[1], Value::Varchar("item-1".into()));
}

#[test]
fn file_catalog_file_wal_round_trip() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, false, false);
    {
        let db = Database::open("t", &dir.path().join("t"), &cfg).unwrap();
        populate(&db, 10);
    }
    assert!(dir.path().join("t/catalog.json").exists());
    assert!(dir.path().join("t/wal.log").exists());

    let db = Database::open("t", &dir.path().join("t"), &cfg).unwrap();
    verify(&db, 10);
}

#[test]
fn db_catalog_db_wal_round_trip() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, true, true);
    {
        let db = Database::open("t", &dir.path().join("t"), &cfg).unwrap();
        populate(&db, 10);
    }
    // Everything lives inside the paged file.
    assert!(!dir.path().join("t/catalog.json").exists());

    let db = Database::open("t", &dir.path().join("t"), &cfg).unwrap();
    verify(&db, 10);
}

#[test]
fn header_bits_override_config_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let cfg = config(&dir, true, false);
        let db = Database::open("t", &dir.path().join("t"), &cfg).unwrap();
        populate(&db, 3);
    }
    // Reopening with a contradicting config still honors the header.
    let other = config(&dir, false, true);
    let db = Database::open("t", &dir.path().join("t"), &other).unwrap();
    verify(&db, 3);
}

#[test]
fn checkpoint_truncates_the_log() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, false, false);
    let db = Database::open("t", &dir.path().join("t"), &cfg).unwrap();
    populate(&db, 5);

    let txn = db.txns().begin().unwrap();
    db.txns().commit(txn).unwrap();
    assert!(!db.wal().read_all().unwrap().is_empty());

    db.checkpoint().unwrap();
    assert!(db.wal().read_all().unwrap().is_empty());

    // LSNs stay monotone after truncation.
    let before = db.wal().current_lsn();
    let txn = db.txns().begin().unwrap();
    db.txns().commit(txn).unwrap();
    assert!(db.wal().current_lsn() > before);
}
