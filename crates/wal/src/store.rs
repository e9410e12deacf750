use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use buffer::BufferPoolManager;
use common::{DbError, DbResult, Lsn, PageId, RowId, INVALID_PAGE_ID, INVALID_TXN_ID};
use storage::{Page, PageType};
use tracing::debug;

use crate::record::WalRecord;

/// Reserved page for the head of the `sys_wal_logs` chain (wal-in-db mode).
pub const SYS_WAL_LOGS_PAGE: PageId = PageId(4);
/// Reserved page for `sys_wal_meta` (holds the persisted current LSN).
pub const SYS_WAL_META_PAGE: PageId = PageId(5);

/// Persistence backend for WAL records.
pub trait WalStore: Send {
    fn append(&mut self, record: &WalRecord) -> DbResult<()>;
    /// Durably sync everything appended so far.
    fn flush(&mut self) -> DbResult<()>;
    fn read_all(&mut self) -> DbResult<Vec<WalRecord>>;
    fn truncate(&mut self) -> DbResult<()>;
    /// Highest LSN the store knows about (0 when empty).
    fn load_current_lsn(&mut self) -> DbResult<Lsn>;
    fn save_current_lsn(&mut self, lsn: Lsn) -> DbResult<()>;
}

/// Append-only sidecar file (`wal.log`). The current LSN is recovered by
/// scanning on open; `save_current_lsn` is a no-op.
#[derive(Debug)]
pub struct FileWalStore {
    path: PathBuf,
    file: File,
}

impl FileWalStore {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| DbError::Wal(format!("failed to open WAL file: {e}")))?;
        Ok(Self { path, file })
    }
}

impl WalStore for FileWalStore {
    fn append(&mut self, record: &WalRecord) -> DbResult<()> {
        let bytes = record.encode()?;
        self.file
            .write_all(&bytes)
            .map_err(|e| DbError::Wal(format!("failed to append record: {e}")))
    }

    fn flush(&mut self) -> DbResult<()> {
        self.file
            .sync_all()
            .map_err(|e| DbError::Wal(format!("failed to sync WAL: {e}")))
    }

    fn read_all(&mut self) -> DbResult<Vec<WalRecord>> {
        let mut bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut bytes))
            .map_err(|e| DbError::Wal(format!("failed to read WAL: {e}")))?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match WalRecord::decode(&bytes[offset..]) {
                Ok((record, consumed)) => {
                    records.push(record);
                    offset += consumed;
                }
                Err(err) => {
                    // A torn tail from a crash mid-append ends the log.
                    debug!(%err, offset, "stopping WAL scan at corrupt record");
                    break;
                }
            }
        }
        Ok(records)
    }

    fn truncate(&mut self) -> DbResult<()> {
        self.file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("failed to truncate WAL: {e}")))?;
        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("failed to reopen WAL: {e}")))?;
        Ok(())
    }

    fn load_current_lsn(&mut self) -> DbResult<Lsn> {
        let max = self
            .read_all()?
            .last()
            .map(|record| record.lsn)
            .unwrap_or(Lsn(0));
        Ok(max)
    }

    fn save_current_lsn(&mut self, _lsn: Lsn) -> DbResult<()> {
        Ok(())
    }
}

/// WAL stored inside the database file: records live as slot entries in the
/// `sys_wal_logs` page chain rooted at page 4, and the current LSN is kept
/// at the start of the `sys_wal_meta` page (page 5).
///
/// Page-image records are larger than a page, so each encoded record is
/// split into chunks framed as
/// `lsn: u64 | chunk_index: u16 | chunk_count: u16 | bytes` and
/// reassembled on read.
pub struct DbWalStore {
    pool: Arc<BufferPoolManager>,
    tail_page: PageId,
}

const CHUNK_HEADER: usize = 8 + 2 + 2;
const MAX_CHUNK_BYTES: usize = 2048;

fn encode_chunk(lsn: Lsn, index: u16, count: u16, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHUNK_HEADER + bytes.len());
    out.extend_from_slice(&lsn.0.to_le_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

fn decode_chunk(bytes: &[u8]) -> DbResult<(Lsn, u16, u16, &[u8])> {
    if bytes.len() < CHUNK_HEADER {
        return Err(DbError::Corruption("truncated WAL chunk".into()));
    }
    let mut lsn = [0u8; 8];
    lsn.copy_from_slice(&bytes[0..8]);
    let index = u16::from_le_bytes([bytes[8], bytes[9]]);
    let count = u16::from_le_bytes([bytes[10], bytes[11]]);
    Ok((
        Lsn(u64::from_le_bytes(lsn)),
        index,
        count,
        &bytes[CHUNK_HEADER..],
    ))
}

impl DbWalStore {
    /// Attach to already-bootstrapped system pages and find the chain tail.
    pub fn open(pool: Arc<BufferPoolManager>) -> DbResult<Self> {
        let mut tail = SYS_WAL_LOGS_PAGE;
        loop {
            let page = pool.fetch_page(tail)?;
            let next = page.read().next_page_id();
            pool.unpin_page(tail, false)?;
            if !next.is_valid() {
                break;
            }
            tail = next;
        }
        Ok(Self { pool, tail_page: tail })
    }

    /// Initialize pages 4..5 on a fresh database. Expects both pages to have
    /// just been allocated by the caller (they must get these exact ids).
    pub fn bootstrap(pool: &BufferPoolManager) -> DbResult<()> {
        for (page_id, ty) in [
            (SYS_WAL_LOGS_PAGE, PageType::Table),
            (SYS_WAL_META_PAGE, PageType::Meta),
        ] {
            let page = pool.fetch_page(page_id)?;
            {
                let mut page = page.write();
                page.set_page_type(ty);
            }
            pool.unpin_page(page_id, true)?;
        }
        Ok(())
    }

    fn write_meta_lsn(&self, lsn: Lsn) -> DbResult<()> {
        let page = self.pool.fetch_page(SYS_WAL_META_PAGE)?;
        page.write().body_mut()[0..8].copy_from_slice(&lsn.0.to_le_bytes());
        self.pool.unpin_page(SYS_WAL_META_PAGE, true)
    }

    /// Store one framed chunk in the tail page, linking a fresh page when
    /// the tail is full.
    fn append_slot(&mut self, lsn: Lsn, framed: &[u8]) -> DbResult<()> {
        let page = self.pool.fetch_page(self.tail_page)?;
        let inserted = page
            .write()
            .insert_record(RowId(lsn.0), INVALID_TXN_ID, framed)?;
        self.pool.unpin_page(self.tail_page, inserted.is_some())?;
        if inserted.is_some() {
            return Ok(());
        }

        let (new_id, new_page) = self.pool.new_page()?;
        new_page.write().set_page_type(PageType::Table);
        let inserted = new_page
            .write()
            .insert_record(RowId(lsn.0), INVALID_TXN_ID, framed)?;
        self.pool.unpin_page(new_id, true)?;
        if inserted.is_none() {
            return Err(DbError::Wal(format!(
                "chunk of {} bytes does not fit an empty page",
                framed.len()
            )));
        }

        let old_tail = self.pool.fetch_page(self.tail_page)?;
        old_tail.write().set_next_page_id(new_id);
        self.pool.unpin_page(self.tail_page, true)?;
        self.tail_page = new_id;
        Ok(())
    }
}

impl WalStore for DbWalStore {
    fn append(&mut self, record: &WalRecord) -> DbResult<()> {
        let bytes = record.encode()?;
        let chunks: Vec<&[u8]> = bytes.chunks(MAX_CHUNK_BYTES).collect();
        let count = chunks.len() as u16;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let framed = encode_chunk(record.lsn, index as u16, count, chunk);
            self.append_slot(record.lsn, &framed)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> DbResult<()> {
        self.pool.flush_all_pages()
    }

    fn read_all(&mut self) -> DbResult<Vec<WalRecord>> {
        // Gather chunks per LSN, then reassemble in order.
        let mut chunks: hashbrown::HashMap<u64, Vec<(u16, u16, Vec<u8>)>> =
            hashbrown::HashMap::new();
        let mut page_id = SYS_WAL_LOGS_PAGE;
        while page_id.is_valid() {
            let page = self.pool.fetch_page(page_id)?;
            let next = {
                let page = page.read();
                for slot in page.live_slots()? {
                    let (lsn, index, count, bytes) = decode_chunk(page.record_payload(slot)?)?;
                    chunks
                        .entry(lsn.0)
                        .or_default()
                        .push((index, count, bytes.to_vec()));
                }
                page.next_page_id()
            };
            self.pool.unpin_page(page_id, false)?;
            page_id = next;
        }

        let mut lsns: Vec<u64> = chunks.keys().copied().collect();
        lsns.sort();
        let mut records = Vec::with_capacity(lsns.len());
        for lsn in lsns {
            let mut parts = chunks.remove(&lsn).expect("key from map");
            parts.sort_by_key(|(index, _, _)| *index);
            let expected = parts.first().map(|(_, count, _)| *count).unwrap_or(0);
            if parts.len() != expected as usize {
                return Err(DbError::Corruption(format!(
                    "WAL record {lsn} has {} of {expected} chunks",
                    parts.len()
                )));
            }
            let mut bytes = Vec::new();
            for (_, _, part) in parts {
                bytes.extend_from_slice(&part);
            }
            let (record, _) = WalRecord::decode(&bytes)?;
            records.push(record);
        }
        Ok(records)
    }

    fn truncate(&mut self) -> DbResult<()> {
        // Reset the head and free the overflow chain.
        let head = self.pool.fetch_page(SYS_WAL_LOGS_PAGE)?;
        let mut next = {
            let mut page = head.write();
            let next = page.next_page_id();
            let id = page.page_id();
            *page = Page::new(id);
            page.set_page_type(PageType::Table);
            next
        };
        self.pool.unpin_page(SYS_WAL_LOGS_PAGE, true)?;

        while next.is_valid() {
            let page = self.pool.fetch_page(next)?;
            let following = page.read().next_page_id();
            self.pool.unpin_page(next, false)?;
            self.pool.delete_page(next)?;
            self.pool.disk().lock().deallocate_page(next);
            next = following;
        }
        self.tail_page = SYS_WAL_LOGS_PAGE;
        Ok(())
    }

    fn load_current_lsn(&mut self) -> DbResult<Lsn> {
        let page = self.pool.fetch_page(SYS_WAL_META_PAGE)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&page.read().body()[0..8]);
        self.pool.unpin_page(SYS_WAL_META_PAGE, false)?;
        Ok(Lsn(u64::from_le_bytes(buf)))
    }

    fn save_current_lsn(&mut self, lsn: Lsn) -> DbResult<()> {
        self.write_meta_lsn(lsn)
    }
}
