use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use common::{DbError, DbResult, PageId};
use tracing::debug;

use crate::page::{Page, PAGE_SIZE};
use crate::{DB_FORMAT_VERSION, DB_HEADER_SIZE, DB_MAGIC};

const FLAG_CATALOG_IN_DB: u8 = 0x01;
const FLAG_WAL_IN_DB: u8 = 0x02;

/// Maps page ids to file offsets and performs whole-page I/O against the
/// single database file. Page `i` starts at `DB_HEADER_SIZE + i * PAGE_SIZE`.
///
/// Deallocated pages go onto an in-process free list and are handed out
/// again before the file is extended; the list is not persisted, so pages
/// freed in a previous run are only reclaimed by VACUUM.
#[derive(Debug)]
pub struct DiskManager {
    path: PathBuf,
    file: File,
    num_pages: u64,
    free_list: Vec<PageId>,
}

impl DiskManager {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| DbError::Io(format!("failed to open {}: {e}", path.display())))?;

        let len = file
            .metadata()
            .map_err(|e| DbError::Io(format!("failed to stat {}: {e}", path.display())))?
            .len();
        let num_pages = len.saturating_sub(DB_HEADER_SIZE as u64) / PAGE_SIZE as u64;

        Ok(Self {
            path,
            file,
            num_pages,
            free_list: Vec::new(),
        })
    }

    /// True when the file already carries a header (any content at all).
    pub fn is_initialized(&self) -> DbResult<bool> {
        let len = self
            .file
            .metadata()
            .map_err(|e| DbError::Io(e.to_string()))?
            .len();
        Ok(len >= DB_HEADER_SIZE as u64)
    }

    /// Write the file header. Must be called exactly once on a fresh file.
    pub fn write_magic(&mut self, catalog_in_db: bool, wal_in_db: bool) -> DbResult<()> {
        let mut header = vec![0u8; DB_HEADER_SIZE];
        header[0..8].copy_from_slice(&DB_MAGIC);
        header[8..10].copy_from_slice(&DB_FORMAT_VERSION.to_le_bytes());
        let mut flags = 0u8;
        if catalog_in_db {
            flags |= FLAG_CATALOG_IN_DB;
        }
        if wal_in_db {
            flags |= FLAG_WAL_IN_DB;
        }
        header[10] = flags;

        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header))
            .map_err(|e| DbError::Io(format!("failed to write db header: {e}")))?;
        debug!(path = %self.path.display(), catalog_in_db, wal_in_db, "wrote database header");
        Ok(())
    }

    /// Validate the magic header and return `(catalog_in_db, wal_in_db)`.
    pub fn verify_and_parse_magic(&mut self) -> DbResult<(bool, bool)> {
        let mut header = [0u8; 16];
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_exact(&mut header))
            .map_err(|e| DbError::Corruption(format!("unreadable db header: {e}")))?;

        if header[0..8] != DB_MAGIC {
            return Err(DbError::Corruption(format!(
                "bad magic in {}",
                self.path.display()
            )));
        }
        let version = u16::from_le_bytes([header[8], header[9]]);
        if version != DB_FORMAT_VERSION {
            return Err(DbError::Corruption(format!(
                "unsupported format version {version}"
            )));
        }
        let flags = header[10];
        Ok((
            flags & FLAG_CATALOG_IN_DB != 0,
            flags & FLAG_WAL_IN_DB != 0,
        ))
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    fn page_offset(page_id: PageId) -> u64 {
        DB_HEADER_SIZE as u64 + page_id.0 * PAGE_SIZE as u64
    }

    /// Read a whole page. Fails for ids beyond the allocated range.
    pub fn read_page(&mut self, page_id: PageId, page: &mut Page) -> DbResult<()> {
        if page_id.0 >= self.num_pages {
            return Err(DbError::Storage(format!(
                "page {} out of range ({} allocated)",
                page_id.0, self.num_pages
            )));
        }
        self.file
            .seek(SeekFrom::Start(Self::page_offset(page_id)))
            .and_then(|_| self.file.read_exact(&mut page.data))
            .map_err(|e| DbError::Io(format!("failed to read page {}: {e}", page_id.0)))?;
        Ok(())
    }

    /// Write a whole page, extending the file when needed.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> DbResult<()> {
        self.file
            .seek(SeekFrom::Start(Self::page_offset(page_id)))
            .and_then(|_| self.file.write_all(&page.data))
            .map_err(|e| DbError::Io(format!("failed to write page {}: {e}", page_id.0)))?;
        if page_id.0 >= self.num_pages {
            self.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    /// Hand out a fresh page id, reusing the free list before growing the
    /// file.
    pub fn allocate_page(&mut self) -> DbResult<PageId> {
        if let Some(page_id) = self.free_list.pop() {
            return Ok(page_id);
        }
        let page_id = PageId(self.num_pages);
        let zeroed = Page::new(page_id);
        self.write_page(page_id, &zeroed)?;
        Ok(page_id)
    }

    /// Return a page to the allocator.
    pub fn deallocate_page(&mut self, page_id: PageId) {
        if page_id.0 < self.num_pages && !self.free_list.contains(&page_id) {
            self.free_list.push(page_id);
        }
    }

    /// Durably sync all written pages.
    pub fn flush(&mut self) -> DbResult<()> {
        self.file
            .sync_all()
            .map_err(|e| DbError::Io(format!("fsync failed: {e}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
