//! Buffer pool manager: page caching with pin counts and Clock
//! (second-chance) replacement.
//!
//! Every fetched page is pinned and must be unpinned exactly once. A frame
//! with a nonzero pin count is never evicted; leaving pages pinned will
//! eventually exhaust the pool. All pool bookkeeping is serialized by one
//! mutex; disk I/O happens while that mutex is held, so callers must not
//! hold a page lock across another pool call.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use buffer::BufferPoolManager;
//! use storage::DiskManager;
//!
//! let disk = Arc::new(Mutex::new(DiskManager::open("data.db").unwrap()));
//! let pool = BufferPoolManager::new(64, disk);
//!
//! let (page_id, page) = pool.new_page().unwrap();
//! page.write().data[100] = 42;
//! pool.unpin_page(page_id, true).unwrap();
//! pool.flush_all_pages().unwrap();
//! ```

#[cfg(test)]
mod tests;

use std::sync::Arc;

use common::{DbError, DbResult, PageId, INVALID_PAGE_ID};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use storage::{DiskManager, Page};
use tracing::trace;

struct Frame {
    page: Arc<RwLock<Page>>,
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
    referenced: bool,
}

impl Frame {
    fn empty() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
            referenced: false,
        }
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    clock_hand: usize,
    hits: u64,
    misses: u64,
}

/// Read-only snapshot of pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub pool_size: usize,
    pub cached_pages: usize,
    pub dirty_pages: usize,
    pub pinned_pages: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Fixed pool of frames caching pages of one database file.
pub struct BufferPoolManager {
    inner: Mutex<PoolInner>,
    disk: Arc<Mutex<DiskManager>>,
}

impl BufferPoolManager {
    /// # Panics
    ///
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, disk: Arc<Mutex<DiskManager>>) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        let free_list = (0..pool_size).rev().collect();
        Self {
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                clock_hand: 0,
                hits: 0,
                misses: 0,
            }),
            disk: Arc::clone(&disk),
        }
    }

    /// Fetch a page, reading it from disk on a miss. The returned page is
    /// pinned; pair every fetch with exactly one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> DbResult<Arc<RwLock<Page>>> {
        let mut inner = self.inner.lock();

        if let Some(&frame_idx) = inner.page_table.get(&page_id) {
            inner.hits += 1;
            let frame = &mut inner.frames[frame_idx];
            frame.pin_count += 1;
            frame.referenced = true;
            return Ok(Arc::clone(&frame.page));
        }

        inner.misses += 1;
        let frame_idx = self.take_victim(&mut inner)?;

        let mut page = Page::new(page_id);
        self.disk.lock().read_page(page_id, &mut page)?;

        let frame = &mut inner.frames[frame_idx];
        frame.page = Arc::new(RwLock::new(page));
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.dirty = false;
        frame.referenced = true;
        let handle = Arc::clone(&frame.page);
        inner.page_table.insert(page_id, frame_idx);
        Ok(handle)
    }

    /// Allocate a fresh page on disk and install it zeroed and pinned.
    pub fn new_page(&self) -> DbResult<(PageId, Arc<RwLock<Page>>)> {
        let mut inner = self.inner.lock();
        let frame_idx = self.take_victim(&mut inner)?;

        let page_id = self.disk.lock().allocate_page()?;
        let frame = &mut inner.frames[frame_idx];
        frame.page = Arc::new(RwLock::new(Page::new(page_id)));
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.dirty = true;
        frame.referenced = true;
        let handle = Arc::clone(&frame.page);
        inner.page_table.insert(page_id, frame_idx);
        Ok((page_id, handle))
    }

    /// Drop one pin and fold `is_dirty` into the frame's dirty flag.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> DbResult<()> {
        let mut inner = self.inner.lock();
        let frame_idx = *inner
            .page_table
            .get(&page_id)
            .ok_or_else(|| DbError::Storage(format!("unpin of uncached page {}", page_id.0)))?;
        let frame = &mut inner.frames[frame_idx];
        if frame.pin_count == 0 {
            return Err(DbError::Storage(format!(
                "unpin of unpinned page {}",
                page_id.0
            )));
        }
        frame.pin_count -= 1;
        frame.dirty |= is_dirty;
        Ok(())
    }

    /// Write one page through to disk if it is cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> DbResult<()> {
        let mut inner = self.inner.lock();
        let Some(&frame_idx) = inner.page_table.get(&page_id) else {
            return Ok(());
        };
        if inner.frames[frame_idx].dirty {
            let page = Arc::clone(&inner.frames[frame_idx].page);
            self.disk.lock().write_page(page_id, &page.read())?;
            inner.frames[frame_idx].dirty = false;
        }
        Ok(())
    }

    /// Write every dirty frame through to disk and fsync.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        let dirty: Vec<usize> = inner
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.page_id.is_valid() && f.dirty)
            .map(|(idx, _)| idx)
            .collect();
        for frame_idx in dirty {
            let page_id = inner.frames[frame_idx].page_id;
            let page = Arc::clone(&inner.frames[frame_idx].page);
            self.disk.lock().write_page(page_id, &page.read())?;
            inner.frames[frame_idx].dirty = false;
        }
        self.disk.lock().flush()
    }

    /// Evict a page from the cache. Only legal when nobody holds a pin;
    /// deallocating the page on disk is the caller's decision.
    pub fn delete_page(&self, page_id: PageId) -> DbResult<()> {
        let mut inner = self.inner.lock();
        let Some(&frame_idx) = inner.page_table.get(&page_id) else {
            return Ok(());
        };
        if inner.frames[frame_idx].pin_count > 0 {
            return Err(DbError::Storage(format!(
                "cannot delete pinned page {}",
                page_id.0
            )));
        }
        inner.page_table.remove(&page_id);
        inner.frames[frame_idx] = Frame::empty();
        inner.free_list.push(frame_idx);
        Ok(())
    }

    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        BufferPoolStats {
            pool_size: inner.frames.len(),
            cached_pages: inner.page_table.len(),
            dirty_pages: inner
                .frames
                .iter()
                .filter(|f| f.page_id.is_valid() && f.dirty)
                .count(),
            pinned_pages: inner
                .frames
                .iter()
                .filter(|f| f.page_id.is_valid() && f.pin_count > 0)
                .count(),
            hit_count: inner.hits,
            miss_count: inner.misses,
        }
    }

    pub fn disk(&self) -> Arc<Mutex<DiskManager>> {
        Arc::clone(&self.disk)
    }

    /// Claim a frame for a new occupant: free list first, then Clock.
    /// Flushes the previous occupant if it was dirty.
    fn take_victim(&self, inner: &mut PoolInner) -> DbResult<usize> {
        if let Some(frame_idx) = inner.free_list.pop() {
            return Ok(frame_idx);
        }

        let pool_size = inner.frames.len();
        // Two full sweeps: the first may only clear reference bits.
        for _ in 0..pool_size * 2 {
            let idx = inner.clock_hand;
            inner.clock_hand = (inner.clock_hand + 1) % pool_size;

            let frame = &mut inner.frames[idx];
            if frame.pin_count > 0 {
                continue;
            }
            if frame.referenced {
                frame.referenced = false;
                continue;
            }

            if frame.dirty {
                let page = Arc::clone(&frame.page);
                let page_id = frame.page_id;
                self.disk.lock().write_page(page_id, &page.read())?;
            }
            trace!(evicted = inner.frames[idx].page_id.0, "clock eviction");
            let old_id = inner.frames[idx].page_id;
            inner.page_table.remove(&old_id);
            inner.frames[idx] = Frame::empty();
            return Ok(idx);
        }

        Err(DbError::Storage(
            "buffer pool exhausted: every frame is pinned".into(),
        ))
    }
}
