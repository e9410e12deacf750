//! Paged open-addressed hash index with linear probing.
//!
//! Buckets hold `(hash, serialized key, row id)` and live in fixed-size
//! groups across buffer pool pages; a meta page (the index's root) carries
//! the directory. FNV-1a is the hash; it must stay stable across
//! processes because bucket positions are persisted. The table doubles at
//! a load factor of 0.75 and halves below 0.125 (never under its initial
//! capacity).
//!
//! No ordering is maintained: equality probes only. Range queries belong
//! to the B+tree.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use buffer::BufferPoolManager;
use common::{DbError, DbResult, PageId, RowId};
use keys::encode_key;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use storage::{PageType, PAGE_BODY_SIZE};
use types::{DataType, Value};

const BUCKETS_PER_PAGE: usize = 16;
const INITIAL_CAPACITY: u64 = BUCKETS_PER_PAGE as u64;
const MAX_KEY_BYTES: usize = 128;

fn bincode_config() -> impl Config {
    config::legacy()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum Bucket {
    Empty,
    Tombstone,
    Occupied {
        hash: u32,
        key: Vec<u8>,
        row_id: RowId,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Directory {
    capacity: u64,
    count: u64,
    tombstones: u64,
    bucket_pages: Vec<PageId>,
}

/// Counters exposed for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashStats {
    pub capacity: u64,
    pub entry_count: u64,
    pub tombstones: u64,
    pub bucket_pages: usize,
}

/// Open-addressed hash index mapping serialized keys to row ids.
pub struct HashIndex {
    pool: Arc<BufferPoolManager>,
    key_type: DataType,
    meta_page: PageId,
    dir: Mutex<Directory>,
}

impl HashIndex {
    /// Create a fresh index: one meta page plus the initial bucket page.
    pub fn create(pool: Arc<BufferPoolManager>, key_type: DataType) -> DbResult<Self> {
        let (meta_page, meta) = pool.new_page()?;
        meta.write().set_page_type(PageType::Meta);
        pool.unpin_page(meta_page, true)?;

        let bucket_page = Self::alloc_bucket_page(&pool)?;
        let index = Self {
            pool,
            key_type,
            meta_page,
            dir: Mutex::new(Directory {
                capacity: INITIAL_CAPACITY,
                count: 0,
                tombstones: 0,
                bucket_pages: vec![bucket_page],
            }),
        };
        index.save_directory(&index.dir.lock())?;
        Ok(index)
    }

    /// Open an existing index from its meta page.
    pub fn open(
        pool: Arc<BufferPoolManager>,
        key_type: DataType,
        meta_page: PageId,
    ) -> DbResult<Self> {
        let page = pool.fetch_page(meta_page)?;
        let dir = {
            let page = page.read();
            let (dir, _) = decode_from_slice(page.body(), bincode_config())
                .map_err(|e| DbError::Corruption(format!("bad hash directory: {e}")))?;
            dir
        };
        pool.unpin_page(meta_page, false)?;
        Ok(Self {
            pool,
            key_type,
            meta_page,
            dir: Mutex::new(dir),
        })
    }

    /// Root page id to persist in the catalog.
    pub fn root_page_id(&self) -> PageId {
        self.meta_page
    }

    pub fn key_type(&self) -> DataType {
        self.key_type
    }

    /// Insert one entry. Duplicate keys are allowed; the caller enforces
    /// uniqueness where an index demands it via [`HashIndex::search_all`].
    pub fn insert(&self, key: &Value, row_id: RowId) -> DbResult<()> {
        let encoded = self.encode_bounded(key)?;
        let hash = fnv1a(&encoded);
        let mut dir = self.dir.lock();

        if (dir.count + dir.tombstones + 1) * 4 > dir.capacity * 3 {
            let doubled = dir.capacity * 2;
            self.resize(&mut dir, doubled)?;
        }

        let capacity = dir.capacity;
        let mut idx = (hash as u64) % capacity;
        for _ in 0..capacity {
            let bucket = self.read_bucket(&dir, idx)?;
            match bucket {
                Bucket::Empty | Bucket::Tombstone => {
                    if matches!(bucket, Bucket::Tombstone) {
                        dir.tombstones -= 1;
                    }
                    self.write_bucket(
                        &dir,
                        idx,
                        Bucket::Occupied {
                            hash,
                            key: encoded,
                            row_id,
                        },
                    )?;
                    dir.count += 1;
                    self.save_directory(&dir)?;
                    return Ok(());
                }
                Bucket::Occupied { .. } => {
                    idx = (idx + 1) % capacity;
                }
            }
        }
        Err(DbError::Storage("hash index probe exhausted capacity".into()))
    }

    /// Every row id stored under `key` (duplicates included, order
    /// unspecified).
    pub fn search_all(&self, key: &Value) -> DbResult<Vec<RowId>> {
        let encoded = self.encode_bounded(key)?;
        let hash = fnv1a(&encoded);
        let dir = self.dir.lock();

        let mut results = Vec::new();
        let mut idx = (hash as u64) % dir.capacity;
        for _ in 0..dir.capacity {
            match self.read_bucket(&dir, idx)? {
                Bucket::Empty => break,
                Bucket::Tombstone => {}
                Bucket::Occupied {
                    hash: h,
                    key: k,
                    row_id,
                } => {
                    if h == hash && k == encoded {
                        results.push(row_id);
                    }
                }
            }
            idx = (idx + 1) % dir.capacity;
        }
        Ok(results)
    }

    /// Delete the first bucket matching both key and row id. Returns
    /// whether anything was removed.
    pub fn remove(&self, key: &Value, row_id: RowId) -> DbResult<bool> {
        let encoded = self.encode_bounded(key)?;
        let hash = fnv1a(&encoded);
        let mut dir = self.dir.lock();

        let mut idx = (hash as u64) % dir.capacity;
        let mut removed = false;
        for _ in 0..dir.capacity {
            match self.read_bucket(&dir, idx)? {
                Bucket::Empty => break,
                Bucket::Tombstone => {}
                Bucket::Occupied {
                    hash: h,
                    key: k,
                    row_id: r,
                } => {
                    if h == hash && k == encoded && r == row_id {
                        self.write_bucket(&dir, idx, Bucket::Tombstone)?;
                        dir.count -= 1;
                        dir.tombstones += 1;
                        removed = true;
                        break;
                    }
                }
            }
            idx = (idx + 1) % dir.capacity;
        }

        if removed {
            if dir.capacity > INITIAL_CAPACITY && dir.count * 8 < dir.capacity {
                let target = (dir.capacity / 2).max(INITIAL_CAPACITY);
                self.resize(&mut dir, target)?;
            } else {
                self.save_directory(&dir)?;
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> HashStats {
        let dir = self.dir.lock();
        HashStats {
            capacity: dir.capacity,
            entry_count: dir.count,
            tombstones: dir.tombstones,
            bucket_pages: dir.bucket_pages.len(),
        }
    }

    /// Deallocate every page the index owns.
    pub fn destroy(self) -> DbResult<()> {
        let dir = self.dir.lock();
        for page_id in &dir.bucket_pages {
            self.pool.delete_page(*page_id)?;
            self.pool.disk().lock().deallocate_page(*page_id);
        }
        self.pool.delete_page(self.meta_page)?;
        self.pool.disk().lock().deallocate_page(self.meta_page);
        Ok(())
    }

    // ---- internals ----

    fn encode_bounded(&self, key: &Value) -> DbResult<Vec<u8>> {
        let encoded = encode_key(key)?;
        if encoded.len() > MAX_KEY_BYTES {
            return Err(DbError::Semantic(format!(
                "hash index keys are limited to {MAX_KEY_BYTES} serialized bytes"
            )));
        }
        Ok(encoded)
    }

    /// Rebuild the table at `new_capacity`, rehashing every live entry.
    fn resize(&self, dir: &mut Directory, new_capacity: u64) -> DbResult<()> {
        let mut live: Vec<(u32, Vec<u8>, RowId)> = Vec::with_capacity(dir.count as usize);
        for idx in 0..dir.capacity {
            if let Bucket::Occupied { hash, key, row_id } = self.read_bucket(dir, idx)? {
                live.push((hash, key, row_id));
            }
        }

        let pages_needed = (new_capacity as usize).div_ceil(BUCKETS_PER_PAGE);
        while dir.bucket_pages.len() < pages_needed {
            dir.bucket_pages.push(Self::alloc_bucket_page(&self.pool)?);
        }
        while dir.bucket_pages.len() > pages_needed {
            let page_id = dir.bucket_pages.pop().expect("length checked");
            self.pool.delete_page(page_id)?;
            self.pool.disk().lock().deallocate_page(page_id);
        }

        dir.capacity = new_capacity;
        dir.tombstones = 0;
        dir.count = live.len() as u64;
        for page_id in &dir.bucket_pages {
            self.write_bucket_page(*page_id, &vec![Bucket::Empty; BUCKETS_PER_PAGE])?;
        }

        for (hash, key, row_id) in live {
            let mut idx = (hash as u64) % new_capacity;
            loop {
                match self.read_bucket(dir, idx)? {
                    Bucket::Occupied { .. } => idx = (idx + 1) % new_capacity,
                    _ => {
                        self.write_bucket(dir, idx, Bucket::Occupied { hash, key, row_id })?;
                        break;
                    }
                }
            }
        }
        self.save_directory(dir)
    }

    fn alloc_bucket_page(pool: &BufferPoolManager) -> DbResult<PageId> {
        let (page_id, page) = pool.new_page()?;
        page.write().set_page_type(PageType::Meta);
        pool.unpin_page(page_id, true)?;
        let buckets = vec![Bucket::Empty; BUCKETS_PER_PAGE];
        Self::write_bucket_page_static(pool, page_id, &buckets)?;
        Ok(page_id)
    }

    fn bucket_location(&self, dir: &Directory, idx: u64) -> DbResult<(PageId, usize)> {
        let page_ordinal = (idx as usize) / BUCKETS_PER_PAGE;
        let slot = (idx as usize) % BUCKETS_PER_PAGE;
        let page_id = dir
            .bucket_pages
            .get(page_ordinal)
            .copied()
            .ok_or_else(|| DbError::Corruption(format!("bucket page {page_ordinal} missing")))?;
        Ok((page_id, slot))
    }

    fn read_bucket(&self, dir: &Directory, idx: u64) -> DbResult<Bucket> {
        let (page_id, slot) = self.bucket_location(dir, idx)?;
        let buckets = self.read_bucket_page(page_id)?;
        buckets
            .into_iter()
            .nth(slot)
            .ok_or_else(|| DbError::Corruption("bucket page too short".into()))
    }

    fn write_bucket(&self, dir: &Directory, idx: u64, bucket: Bucket) -> DbResult<()> {
        let (page_id, slot) = self.bucket_location(dir, idx)?;
        let mut buckets = self.read_bucket_page(page_id)?;
        buckets[slot] = bucket;
        self.write_bucket_page(page_id, &buckets)
    }

    fn read_bucket_page(&self, page_id: PageId) -> DbResult<Vec<Bucket>> {
        let page = self.pool.fetch_page(page_id)?;
        let result = {
            let page = page.read();
            decode_from_slice(page.body(), bincode_config())
                .map(|(buckets, _)| buckets)
                .map_err(|e| DbError::Corruption(format!("bad bucket page: {e}")))
        };
        self.pool.unpin_page(page_id, false)?;
        result
    }

    fn write_bucket_page(&self, page_id: PageId, buckets: &[Bucket]) -> DbResult<()> {
        Self::write_bucket_page_static(&self.pool, page_id, buckets)
    }

    fn write_bucket_page_static(
        pool: &BufferPoolManager,
        page_id: PageId,
        buckets: &[Bucket],
    ) -> DbResult<()> {
        let bytes = encode_to_vec(buckets, bincode_config())
            .map_err(|e| DbError::Storage(format!("failed to encode bucket page: {e}")))?;
        if bytes.len() > PAGE_BODY_SIZE {
            return Err(DbError::Storage("bucket page overflow".into()));
        }
        let page = pool.fetch_page(page_id)?;
        {
            let mut page = page.write();
            let body = page.body_mut();
            body[..bytes.len()].copy_from_slice(&bytes);
            for byte in &mut body[bytes.len()..] {
                *byte = 0;
            }
        }
        pool.unpin_page(page_id, true)
    }

    fn save_directory(&self, dir: &Directory) -> DbResult<()> {
        let bytes = encode_to_vec(dir, bincode_config())
            .map_err(|e| DbError::Storage(format!("failed to encode hash directory: {e}")))?;
        if bytes.len() > PAGE_BODY_SIZE {
            return Err(DbError::Storage("hash directory overflow".into()));
        }
        let page = self.pool.fetch_page(self.meta_page)?;
        {
            let mut page = page.write();
            let body = page.body_mut();
            body[..bytes.len()].copy_from_slice(&bytes);
            for byte in &mut body[bytes.len()..] {
                *byte = 0;
            }
        }
        self.pool.unpin_page(self.meta_page, true)
    }
}

/// 32-bit FNV-1a over the serialized key.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
