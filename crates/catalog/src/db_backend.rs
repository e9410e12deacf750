//! Catalog persistence inside the database file.
//!
//! Pages 1..3 are reserved at bootstrap for `sys_tables`, `sys_columns`,
//! and `sys_indexes`. Each save rewrites all three chains (truncating any
//! overflow pages) so a torn save is repaired by the next one; each load
//! reassembles `TableDef`s from the three row sets.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use buffer::BufferPoolManager;
use common::{DbError, DbResult, PageId, RowId, INVALID_TXN_ID};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use storage::{Page, PageType};

use crate::defs::{ColumnDef, IndexDef, TableDef, TableStats};

/// Head of the `sys_tables` chain.
pub const SYS_TABLES_PAGE: PageId = PageId(1);
/// Head of the `sys_columns` chain.
pub const SYS_COLUMNS_PAGE: PageId = PageId(2);
/// Head of the `sys_indexes` chain.
pub const SYS_INDEXES_PAGE: PageId = PageId(3);

fn bincode_config() -> impl Config {
    config::legacy()
}

#[derive(Serialize, Deserialize)]
struct SysTableRow {
    name: String,
    first_page_id: PageId,
    next_row_id: u64,
    stats: Option<TableStats>,
}

#[derive(Serialize, Deserialize)]
struct SysColumnRow {
    table_name: String,
    position: u32,
    column: ColumnDef,
}

/// Initialize the three system pages on a fresh database. The caller must
/// have allocated pages so that ids 1..3 exist.
pub(crate) fn bootstrap(pool: &BufferPoolManager) -> DbResult<()> {
    for page_id in [SYS_TABLES_PAGE, SYS_COLUMNS_PAGE, SYS_INDEXES_PAGE] {
        let page = pool.fetch_page(page_id)?;
        page.write().set_page_type(PageType::Table);
        pool.unpin_page(page_id, true)?;
    }
    Ok(())
}

pub(crate) fn save_tables(pool: &BufferPoolManager, tables: &[TableDef]) -> DbResult<()> {
    let mut table_rows = Vec::new();
    let mut column_rows = Vec::new();
    let mut index_rows: Vec<IndexDef> = Vec::new();

    for table in tables {
        table_rows.push(SysTableRow {
            name: table.name.clone(),
            first_page_id: table.first_page_id,
            next_row_id: table.next_row_id,
            stats: table.stats.clone(),
        });
        for (position, column) in table.columns.iter().enumerate() {
            column_rows.push(SysColumnRow {
                table_name: table.name.clone(),
                position: position as u32,
                column: column.clone(),
            });
        }
        index_rows.extend(table.indexes.iter().cloned());
    }

    write_chain(pool, SYS_TABLES_PAGE, &table_rows)?;
    write_chain(pool, SYS_COLUMNS_PAGE, &column_rows)?;
    write_chain(pool, SYS_INDEXES_PAGE, &index_rows)?;
    Ok(())
}

pub(crate) fn load_tables(pool: &BufferPoolManager) -> DbResult<Vec<TableDef>> {
    let table_rows: Vec<SysTableRow> = read_chain(pool, SYS_TABLES_PAGE)?;
    let mut column_rows: Vec<SysColumnRow> = read_chain(pool, SYS_COLUMNS_PAGE)?;
    let index_rows: Vec<IndexDef> = read_chain(pool, SYS_INDEXES_PAGE)?;

    column_rows.sort_by_key(|row| row.position);

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in table_rows {
        let columns: Vec<ColumnDef> = column_rows
            .iter()
            .filter(|c| c.table_name == row.name)
            .map(|c| c.column.clone())
            .collect();
        if columns.is_empty() {
            return Err(DbError::Corruption(format!(
                "sys_columns has no rows for table '{}'",
                row.name
            )));
        }
        let indexes: Vec<IndexDef> = index_rows
            .iter()
            .filter(|idx| idx.table_name == row.name)
            .cloned()
            .collect();
        tables.push(TableDef {
            name: row.name,
            columns,
            indexes,
            first_page_id: row.first_page_id,
            next_row_id: row.next_row_id,
            stats: row.stats,
        });
    }
    Ok(tables)
}

/// Rewrite a system-table chain with the given rows: reset the head page,
/// free the old overflow pages, then append, linking new pages as needed.
fn write_chain<T: Serialize>(
    pool: &BufferPoolManager,
    head: PageId,
    rows: &[T],
) -> DbResult<()> {
    // Reset the head and collect the overflow chain for deallocation.
    let page = pool.fetch_page(head)?;
    let mut next = {
        let mut page = page.write();
        let next = page.next_page_id();
        *page = Page::new(head);
        page.set_page_type(PageType::Table);
        next
    };
    pool.unpin_page(head, true)?;

    while next.is_valid() {
        let page = pool.fetch_page(next)?;
        let following = page.read().next_page_id();
        pool.unpin_page(next, false)?;
        pool.delete_page(next)?;
        pool.disk().lock().deallocate_page(next);
        next = following;
    }

    let mut tail = head;
    for (ordinal, row) in rows.iter().enumerate() {
        let bytes = encode_to_vec(row, bincode_config())
            .map_err(|e| DbError::Catalog(format!("failed to encode system row: {e}")))?;
        let row_id = RowId(ordinal as u64 + 1);

        let page = pool.fetch_page(tail)?;
        let inserted = page.write().insert_record(row_id, INVALID_TXN_ID, &bytes)?;
        pool.unpin_page(tail, inserted.is_some())?;
        if inserted.is_some() {
            continue;
        }

        let (new_id, new_page) = pool.new_page()?;
        {
            let mut new_page = new_page.write();
            new_page.set_page_type(PageType::Table);
            if new_page.insert_record(row_id, INVALID_TXN_ID, &bytes)?.is_none() {
                return Err(DbError::Catalog(
                    "system row does not fit an empty page".into(),
                ));
            }
        }
        pool.unpin_page(new_id, true)?;

        let old_tail = pool.fetch_page(tail)?;
        old_tail.write().set_next_page_id(new_id);
        pool.unpin_page(tail, true)?;
        tail = new_id;
    }
    Ok(())
}

fn read_chain<T: DeserializeOwned>(pool: &BufferPoolManager, head: PageId) -> DbResult<Vec<T>> {
    let mut rows = Vec::new();
    let mut page_id = head;
    while page_id.is_valid() {
        let page = pool.fetch_page(page_id)?;
        let next = {
            let page = page.read();
            for slot in page.live_slots()? {
                let bytes = page.record_payload(slot)?;
                let (row, _) = decode_from_slice(bytes, bincode_config())
                    .map_err(|e| DbError::Corruption(format!("bad system row: {e}")))?;
                rows.push(row);
            }
            page.next_page_id()
        };
        pool.unpin_page(page_id, false)?;
        page_id = next;
    }
    Ok(rows)
}
