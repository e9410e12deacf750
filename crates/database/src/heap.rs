use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use buffer::BufferPoolManager;
use catalog::TableDef;
use common::{DbError, DbResult, PageId, RowId, TxnId};
use storage::{PageType, RecordHeader};
use types::Value;

fn bincode_config() -> impl Config {
    config::legacy()
}

pub fn encode_row(values: &[Value]) -> DbResult<Vec<u8>> {
    encode_to_vec(values, bincode_config())
        .map_err(|e| DbError::Storage(format!("failed to encode row: {e}")))
}

pub fn decode_row(bytes: &[u8]) -> DbResult<Vec<Value>> {
    let (values, _) = decode_from_slice(bytes, bincode_config())
        .map_err(|e| DbError::Corruption(format!("failed to decode row: {e}")))?;
    Ok(values)
}

/// One page mutation: the page's bytes before (None for a fresh page) and
/// after. The executor turns these into WAL records.
#[derive(Clone, Debug)]
pub struct HeapWrite {
    pub page_id: PageId,
    pub slot: u16,
    pub before: Option<Vec<u8>>,
    pub after: Vec<u8>,
}

/// A row read from a table page, with its physical location.
#[derive(Clone, Debug)]
pub struct StoredRow {
    pub page_id: PageId,
    pub slot: u16,
    pub header: RecordHeader,
    pub values: Vec<Value>,
}

/// Outcome of an UPDATE at the heap level.
pub enum UpdateOutcome {
    /// The new payload fit the slot: the row id is unchanged.
    InPlace { write: HeapWrite, row_id: RowId },
    /// The row moved: logically deleted in place, re-inserted with a new
    /// row id (possibly on another page).
    Reinserted {
        delete: HeapWrite,
        insert: HeapWrite,
        new_row_id: RowId,
    },
}

/// Row-level access over a table's page chain.
pub struct TableHeap<'a> {
    pool: &'a BufferPoolManager,
}

impl<'a> TableHeap<'a> {
    pub fn new(pool: &'a BufferPoolManager) -> Self {
        Self { pool }
    }

    /// Append a row: to the last page of the chain, or to a freshly linked
    /// page when the tail is full (or the table is empty). Assigns
    /// `table.next_row_id` and advances it.
    pub fn insert_row(
        &self,
        table: &mut TableDef,
        values: &[Value],
        txn: TxnId,
    ) -> DbResult<(RowId, HeapWrite)> {
        let row_id = RowId(table.next_row_id);
        let write = self.insert_row_with_id(table, values, row_id, txn)?;
        table.next_row_id = table.next_row_id.max(row_id.0) + 1;
        Ok((row_id, write))
    }

    /// Append a row under a caller-chosen row id (table rewrites keep ids
    /// stable). Does not advance `next_row_id`.
    pub fn insert_row_with_id(
        &self,
        table: &mut TableDef,
        values: &[Value],
        row_id: RowId,
        txn: TxnId,
    ) -> DbResult<HeapWrite> {
        let payload = encode_row(values)?;

        // Find the tail of the chain.
        let mut tail = table.first_page_id;
        while tail.is_valid() {
            let page = self.pool.fetch_page(tail)?;
            let next = page.read().next_page_id();
            self.pool.unpin_page(tail, false)?;
            if !next.is_valid() {
                break;
            }
            tail = next;
        }

        if tail.is_valid() {
            let page = self.pool.fetch_page(tail)?;
            let (before, inserted, after) = {
                let mut page = page.write();
                let before = page.data.clone();
                let inserted = page.insert_record(row_id, txn, &payload)?;
                (before, inserted, page.data.clone())
            };
            self.pool.unpin_page(tail, inserted.is_some())?;
            if let Some(slot) = inserted {
                return Ok(HeapWrite {
                    page_id: tail,
                    slot,
                    before: Some(before),
                    after,
                });
            }
        }

        // Tail full or table empty: allocate and link a new page.
        let (new_id, new_page) = self.pool.new_page()?;
        let (slot, after) = {
            let mut page = new_page.write();
            page.set_page_type(PageType::Table);
            let slot = page.insert_record(row_id, txn, &payload)?.ok_or_else(|| {
                DbError::Storage("row does not fit an empty page".into())
            })?;
            (slot, page.data.clone())
        };
        self.pool.unpin_page(new_id, true)?;

        if tail.is_valid() {
            let page = self.pool.fetch_page(tail)?;
            page.write().set_next_page_id(new_id);
            self.pool.unpin_page(tail, true)?;
        } else {
            table.first_page_id = new_id;
        }
        Ok(HeapWrite {
            page_id: new_id,
            slot,
            before: None,
            after,
        })
    }

    /// Every non-tombstone row in chain order. Rows with a set
    /// `delete_txn` are included; visibility is the caller's decision.
    pub fn scan(&self, table: &TableDef) -> DbResult<Vec<StoredRow>> {
        let mut rows = Vec::new();
        let mut page_id = table.first_page_id;
        while page_id.is_valid() {
            let page = self.pool.fetch_page(page_id)?;
            let next = {
                let page = page.read();
                for slot in page.live_slots()? {
                    rows.push(StoredRow {
                        page_id,
                        slot,
                        header: page.record_header(slot)?,
                        values: decode_row(page.record_payload(slot)?)?,
                    });
                }
                page.next_page_id()
            };
            self.pool.unpin_page(page_id, false)?;
            page_id = next;
        }
        Ok(rows)
    }

    /// Locate a row by its table-wide row id.
    pub fn find_by_row_id(&self, table: &TableDef, row_id: RowId) -> DbResult<Option<StoredRow>> {
        let mut page_id = table.first_page_id;
        while page_id.is_valid() {
            let page = self.pool.fetch_page(page_id)?;
            let (next, found) = {
                let page = page.read();
                let mut found = None;
                for slot in page.live_slots()? {
                    let header = page.record_header(slot)?;
                    if header.row_id == row_id && !header.is_deleted() {
                        found = Some(StoredRow {
                            page_id,
                            slot,
                            header,
                            values: decode_row(page.record_payload(slot)?)?,
                        });
                        break;
                    }
                }
                (page.next_page_id(), found)
            };
            self.pool.unpin_page(page_id, false)?;
            if found.is_some() {
                return Ok(found);
            }
            page_id = next;
        }
        Ok(None)
    }

    /// Overwrite a row in place when the payload fits, otherwise delete
    /// logically and re-insert under a fresh row id.
    pub fn update_row(
        &self,
        table: &mut TableDef,
        page_id: PageId,
        slot: u16,
        new_values: &[Value],
        txn: TxnId,
    ) -> DbResult<UpdateOutcome> {
        let payload = encode_row(new_values)?;
        let page = self.pool.fetch_page(page_id)?;
        let (before, fitted, after, row_id) = {
            let mut page = page.write();
            let before = page.data.clone();
            let row_id = page.record_header(slot)?.row_id;
            let fitted = page.update_record(slot, &payload, txn)?;
            (before, fitted, page.data.clone(), row_id)
        };
        self.pool.unpin_page(page_id, fitted)?;

        if fitted {
            return Ok(UpdateOutcome::InPlace {
                write: HeapWrite {
                    page_id,
                    slot,
                    before: Some(before),
                    after,
                },
                row_id,
            });
        }

        let delete = self.delete_row(page_id, slot, txn)?;
        let (new_row_id, insert) = self.insert_row(table, new_values, txn)?;
        Ok(UpdateOutcome::Reinserted {
            delete,
            insert,
            new_row_id,
        })
    }

    /// Logical delete: stamps the deleting transaction.
    pub fn delete_row(&self, page_id: PageId, slot: u16, txn: TxnId) -> DbResult<HeapWrite> {
        let page = self.pool.fetch_page(page_id)?;
        let (before, after) = {
            let mut page = page.write();
            let before = page.data.clone();
            page.delete_record(slot, txn)?;
            (before, page.data.clone())
        };
        self.pool.unpin_page(page_id, true)?;
        Ok(HeapWrite {
            page_id,
            slot,
            before: Some(before),
            after,
        })
    }

    /// Read one row by physical location.
    pub fn row_at(&self, page_id: PageId, slot: u16) -> DbResult<StoredRow> {
        let page = self.pool.fetch_page(page_id)?;
        let result = {
            let page = page.read();
            Ok(StoredRow {
                page_id,
                slot,
                header: page.record_header(slot)?,
                values: decode_row(page.record_payload(slot)?)?,
            })
        };
        self.pool.unpin_page(page_id, false)?;
        result
    }

    /// Undo helper: put a row's previous payload back in place. The old
    /// payload always fits: in-place updates never grow a slot.
    pub fn restore_row(
        &self,
        page_id: PageId,
        slot: u16,
        values: &[Value],
        txn: TxnId,
    ) -> DbResult<HeapWrite> {
        let payload = encode_row(values)?;
        let page = self.pool.fetch_page(page_id)?;
        let (before, fitted, after) = {
            let mut page = page.write();
            let before = page.data.clone();
            let fitted = page.update_record(slot, &payload, txn)?;
            (before, fitted, page.data.clone())
        };
        self.pool.unpin_page(page_id, fitted)?;
        if !fitted {
            return Err(DbError::Storage(
                "before-image does not fit its original slot".into(),
            ));
        }
        Ok(HeapWrite {
            page_id,
            slot,
            before: Some(before),
            after,
        })
    }

    /// Undo helper: clear a logical delete.
    pub fn undelete_row(&self, page_id: PageId, slot: u16) -> DbResult<HeapWrite> {
        let page = self.pool.fetch_page(page_id)?;
        let (before, after) = {
            let mut page = page.write();
            let before = page.data.clone();
            page.undelete_record(slot)?;
            (before, page.data.clone())
        };
        self.pool.unpin_page(page_id, true)?;
        Ok(HeapWrite {
            page_id,
            slot,
            before: Some(before),
            after,
        })
    }

    /// Undo helper: make an aborted insert disappear.
    pub fn tombstone_row(&self, page_id: PageId, slot: u16) -> DbResult<HeapWrite> {
        let page = self.pool.fetch_page(page_id)?;
        let (before, after) = {
            let mut page = page.write();
            let before = page.data.clone();
            page.tombstone_record(slot)?;
            (before, page.data.clone())
        };
        self.pool.unpin_page(page_id, true)?;
        Ok(HeapWrite {
            page_id,
            slot,
            before: Some(before),
            after,
        })
    }

    /// VACUUM: compact every page of the chain, dropping tombstones and
    /// rows deleted before `horizon`. Pages left empty are unlinked and
    /// freed. Returns `(rows_reclaimed, pages_freed)`.
    pub fn vacuum(&self, table: &mut TableDef, horizon: TxnId) -> DbResult<(usize, usize)> {
        let mut reclaimed = 0usize;
        let mut freed = 0usize;
        let mut page_id = table.first_page_id;
        let mut prev: Option<PageId> = None;

        while page_id.is_valid() {
            let page = self.pool.fetch_page(page_id)?;
            let (next, removed, now_empty) = {
                let mut page = page.write();
                let removed = page.compact(horizon)?;
                (page.next_page_id(), removed, page.slot_count() == 0)
            };
            self.pool.unpin_page(page_id, removed > 0)?;
            reclaimed += removed;

            if now_empty {
                // Unlink the page from the chain and free it.
                match prev {
                    Some(prev_id) => {
                        let prev_page = self.pool.fetch_page(prev_id)?;
                        prev_page.write().set_next_page_id(next);
                        self.pool.unpin_page(prev_id, true)?;
                    }
                    None => table.first_page_id = next,
                }
                self.pool.delete_page(page_id)?;
                self.pool.disk().lock().deallocate_page(page_id);
                freed += 1;
            } else {
                prev = Some(page_id);
            }
            page_id = next;
        }
        Ok((reclaimed, freed))
    }

    /// Drop the whole chain (DROP TABLE).
    pub fn deallocate(&self, table: &TableDef) -> DbResult<usize> {
        let mut freed = 0usize;
        let mut page_id = table.first_page_id;
        while page_id.is_valid() {
            let page = self.pool.fetch_page(page_id)?;
            let next = page.read().next_page_id();
            self.pool.unpin_page(page_id, false)?;
            self.pool.delete_page(page_id)?;
            self.pool.disk().lock().deallocate_page(page_id);
            freed += 1;
            page_id = next;
        }
        Ok(freed)
    }

    /// Read a page's raw bytes (for WAL before-images around index ops).
    pub fn page_image(&self, page_id: PageId) -> DbResult<Vec<u8>> {
        let page = self.pool.fetch_page(page_id)?;
        let image = page.read().data.clone();
        self.pool.unpin_page(page_id, false)?;
        Ok(image)
    }

    /// Stamp a page with the LSN of the WAL record covering its mutation.
    pub fn stamp_page_lsn(&self, page_id: PageId, lsn: common::Lsn) -> DbResult<()> {
        let page = self.pool.fetch_page(page_id)?;
        page.write().set_lsn(lsn);
        self.pool.unpin_page(page_id, true)
    }
}
