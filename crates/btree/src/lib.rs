//! Generic B+tree over serialized, variable-length keys.
//!
//! Keys are the memcmp-ordered encodings produced by the `keys` crate, so
//! one tree implementation serves every SQL key type. Nodes live in buffer
//! pool pages; leaves chain forward for range scans. Equal keys are
//! ordered by row id and may span leaves; searches descend to the
//! leftmost candidate leaf and walk the chain.
//!
//! Concurrency: one tree-wide mutex serializes all operations.

mod node;

#[cfg(test)]
mod tests;

pub use node::Node;

use std::sync::Arc;

use buffer::BufferPoolManager;
use common::{DbError, DbResult, PageId, RowId, INVALID_PAGE_ID};
use keys::{decode_key, encode_key};
use parking_lot::Mutex;
use storage::{PageType, PAGE_BODY_SIZE};
use types::{DataType, Value};

/// Tree statistics, computed by a full traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub key_count: usize,
    pub leaf_pages: usize,
    pub internal_pages: usize,
    pub height: usize,
    pub total_key_bytes: usize,
}

enum InsertOutcome {
    Done,
    Duplicate,
    Split { separator: Vec<u8>, right: PageId },
}

/// B+tree index keyed on one SQL type, mapping keys to row ids.
pub struct GenericBPlusTree {
    pool: Arc<BufferPoolManager>,
    key_type: DataType,
    unique: bool,
    max_keys: usize,
    root: Mutex<PageId>,
}

impl GenericBPlusTree {
    pub const DEFAULT_MAX_KEYS: usize = 100;

    /// Create a new tree with an empty leaf root. The root page id is valid
    /// immediately and must be persisted by the caller.
    pub fn create(
        pool: Arc<BufferPoolManager>,
        key_type: DataType,
        unique: bool,
        max_keys: usize,
    ) -> DbResult<Self> {
        let tree = Self {
            pool,
            key_type,
            unique,
            max_keys: max_keys.max(2),
            root: Mutex::new(INVALID_PAGE_ID),
        };
        let root = tree.alloc_node(&Node::new_leaf())?;
        *tree.root.lock() = root;
        Ok(tree)
    }

    /// Open an existing tree rooted at `root_page_id`.
    pub fn open(
        pool: Arc<BufferPoolManager>,
        key_type: DataType,
        unique: bool,
        max_keys: usize,
        root_page_id: PageId,
    ) -> Self {
        Self {
            pool,
            key_type,
            unique,
            max_keys: max_keys.max(2),
            root: Mutex::new(root_page_id),
        }
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.lock()
    }

    pub fn key_type(&self) -> DataType {
        self.key_type
    }

    /// Insert a key → row id entry. Returns `false` (and leaves the tree
    /// untouched) when the index is unique and the key is already present.
    pub fn insert(&self, key: &Value, row_id: RowId) -> DbResult<bool> {
        let encoded = encode_key(key)?;
        let mut root = self.root.lock();

        match self.insert_rec(*root, &encoded, row_id)? {
            InsertOutcome::Duplicate => Ok(false),
            InsertOutcome::Done => Ok(true),
            InsertOutcome::Split { separator, right } => {
                let new_root = self.alloc_node(&Node::Internal {
                    first_child: *root,
                    entries: vec![(separator, right)],
                })?;
                *root = new_root;
                Ok(true)
            }
        }
    }

    /// First row id stored under `key`.
    pub fn search(&self, key: &Value) -> DbResult<Option<RowId>> {
        Ok(self.search_all(key)?.into_iter().next())
    }

    /// Every row id stored under `key`, in row-id order.
    pub fn search_all(&self, key: &Value) -> DbResult<Vec<RowId>> {
        let encoded = encode_key(key)?;
        let root = self.root.lock();
        let mut results = Vec::new();
        let mut leaf_id = self.find_leaf(*root, &encoded)?;

        while leaf_id.is_valid() {
            let Node::Leaf { entries, next_leaf } = self.read_node(leaf_id)? else {
                return Err(DbError::Corruption("leaf chain reached an internal page".into()));
            };
            for (k, row_id) in &entries {
                match k.as_slice().cmp(encoded.as_slice()) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => results.push(*row_id),
                    std::cmp::Ordering::Greater => return Ok(results),
                }
            }
            leaf_id = next_leaf;
        }
        Ok(results)
    }

    /// All entries with `min <= key <= max` (both bounds inclusive and
    /// optional), in ascending key order.
    pub fn range_search(
        &self,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> DbResult<Vec<(Value, RowId)>> {
        let min_enc = min.map(encode_key).transpose()?;
        let max_enc = max.map(encode_key).transpose()?;
        let root = self.root.lock();

        let mut leaf_id = match &min_enc {
            Some(bound) => self.find_leaf(*root, bound)?,
            None => self.leftmost_leaf(*root)?,
        };

        let mut results = Vec::new();
        while leaf_id.is_valid() {
            let Node::Leaf { entries, next_leaf } = self.read_node(leaf_id)? else {
                return Err(DbError::Corruption("leaf chain reached an internal page".into()));
            };
            for (k, row_id) in &entries {
                if let Some(min_enc) = &min_enc {
                    if k.as_slice() < min_enc.as_slice() {
                        continue;
                    }
                }
                if let Some(max_enc) = &max_enc {
                    if k.as_slice() > max_enc.as_slice() {
                        return Ok(results);
                    }
                }
                results.push((decode_key(k, self.key_type)?, *row_id));
            }
            leaf_id = next_leaf;
        }
        Ok(results)
    }

    /// Remove the first entry under `key`. Returns `false` when absent.
    pub fn remove(&self, key: &Value) -> DbResult<bool> {
        self.remove_entry(key, None)
    }

    /// Remove a specific `(key, row_id)` entry, or the first entry for the
    /// key when `row_id` is `None`. Underflowing nodes borrow from a
    /// sibling (left preferred) or merge; an emptied internal root is
    /// collapsed into its only child.
    pub fn remove_entry(&self, key: &Value, row_id: Option<RowId>) -> DbResult<bool> {
        let encoded = encode_key(key)?;
        let mut root = self.root.lock();
        let (found, _) = self.remove_rec(*root, &encoded, row_id)?;

        let root_node = self.read_node(*root)?;
        if let Node::Internal {
            first_child,
            entries,
        } = &root_node
        {
            if entries.is_empty() {
                let old_root = *root;
                *root = *first_child;
                self.free_node(old_root)?;
            }
        }
        Ok(found)
    }

    /// Deallocate every page the tree reaches. Consumes the handle; used
    /// by DROP INDEX / DROP TABLE.
    pub fn destroy(self) -> DbResult<()> {
        let root = *self.root.lock();
        self.destroy_rec(root)
    }

    pub fn stats(&self) -> DbResult<TreeStats> {
        let root = self.root.lock();
        let mut stats = TreeStats::default();
        self.stats_rec(*root, 1, &mut stats)?;
        Ok(stats)
    }

    // ---- descent helpers ----

    fn find_leaf(&self, mut page_id: PageId, key: &[u8]) -> DbResult<PageId> {
        loop {
            let node = self.read_node(page_id)?;
            match node {
                Node::Leaf { .. } => return Ok(page_id),
                Node::Internal { .. } => page_id = node.child_for_search(key)?,
            }
        }
    }

    fn leftmost_leaf(&self, mut page_id: PageId) -> DbResult<PageId> {
        loop {
            match self.read_node(page_id)? {
                Node::Leaf { .. } => return Ok(page_id),
                Node::Internal { first_child, .. } => page_id = first_child,
            }
        }
    }

    // ---- insert ----

    fn insert_rec(&self, page_id: PageId, key: &[u8], row_id: RowId) -> DbResult<InsertOutcome> {
        let node = self.read_node(page_id)?;
        match node {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => {
                if self.unique && entries.iter().any(|(k, _)| k.as_slice() == key) {
                    return Ok(InsertOutcome::Duplicate);
                }
                let pos = entries
                    .partition_point(|(k, r)| (k.as_slice(), *r) < (key, row_id));
                entries.insert(pos, (key.to_vec(), row_id));

                let node = Node::Leaf { entries, next_leaf };
                if node.len() <= self.max_keys && node.fits_page()? {
                    self.write_node(page_id, &node)?;
                    return Ok(InsertOutcome::Done);
                }
                self.split_leaf(page_id, node)
            }
            Node::Internal {
                first_child,
                mut entries,
            } => {
                // Equal keys go right, keeping `subtree(k_i) >= k_i`.
                let idx = entries.partition_point(|(k, _)| k.as_slice() <= key);
                let child = if idx == 0 {
                    first_child
                } else {
                    entries[idx - 1].1
                };

                match self.insert_rec(child, key, row_id)? {
                    InsertOutcome::Duplicate => Ok(InsertOutcome::Duplicate),
                    InsertOutcome::Done => Ok(InsertOutcome::Done),
                    InsertOutcome::Split { separator, right } => {
                        entries.insert(idx, (separator, right));
                        let node = Node::Internal {
                            first_child,
                            entries,
                        };
                        if node.len() <= self.max_keys && node.fits_page()? {
                            self.write_node(page_id, &node)?;
                            return Ok(InsertOutcome::Done);
                        }
                        self.split_internal(page_id, node)
                    }
                }
            }
        }
    }

    /// Left keeps the first half, right the second; the first key of the
    /// right half goes up as the separator.
    fn split_leaf(&self, page_id: PageId, node: Node) -> DbResult<InsertOutcome> {
        let Node::Leaf {
            mut entries,
            next_leaf,
        } = node
        else {
            return Err(DbError::Storage("split_leaf on internal node".into()));
        };
        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        let separator = right_entries[0].0.clone();

        let right_page = self.alloc_node(&Node::Leaf {
            entries: right_entries,
            next_leaf,
        })?;
        self.write_node(
            page_id,
            &Node::Leaf {
                entries,
                next_leaf: right_page,
            },
        )?;
        Ok(InsertOutcome::Split {
            separator,
            right: right_page,
        })
    }

    fn split_internal(&self, page_id: PageId, node: Node) -> DbResult<InsertOutcome> {
        let Node::Internal {
            first_child,
            mut entries,
        } = node
        else {
            return Err(DbError::Storage("split_internal on leaf node".into()));
        };
        let mid = entries.len() / 2;
        let mut right_entries = entries.split_off(mid);
        let (separator, right_first) = right_entries.remove(0);

        let right_page = self.alloc_node(&Node::Internal {
            first_child: right_first,
            entries: right_entries,
        })?;
        self.write_node(
            page_id,
            &Node::Internal {
                first_child,
                entries,
            },
        )?;
        Ok(InsertOutcome::Split {
            separator,
            right: right_page,
        })
    }

    // ---- remove ----

    fn min_keys(&self) -> usize {
        self.max_keys.div_ceil(2)
    }

    fn remove_rec(
        &self,
        page_id: PageId,
        key: &[u8],
        row_id: Option<RowId>,
    ) -> DbResult<(bool, bool)> {
        let node = self.read_node(page_id)?;
        match node {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => {
                let pos = entries.iter().position(|(k, r)| {
                    k.as_slice() == key && row_id.map_or(true, |want| *r == want)
                });
                let Some(pos) = pos else {
                    return Ok((false, false));
                };
                entries.remove(pos);
                let underflow = entries.len() < self.min_keys();
                self.write_node(page_id, &Node::Leaf { entries, next_leaf })?;
                Ok((true, underflow))
            }
            Node::Internal { entries, .. } => {
                // Equal keys may span children starting at the boundary;
                // probe forward until the separator passes the key.
                let start = entries.partition_point(|(k, _)| k.as_slice() < key);
                let mut ordinal = start;
                loop {
                    let node = self.read_node(page_id)?;
                    let child = node.child_at(ordinal)?;
                    let (found, child_underflow) = self.remove_rec(child, key, row_id)?;
                    if child_underflow {
                        self.fix_child(page_id, ordinal)?;
                    }
                    if found {
                        let node = self.read_node(page_id)?;
                        return Ok((true, node.len() < self.min_keys()));
                    }
                    ordinal += 1;
                    let Node::Internal { entries, .. } = self.read_node(page_id)? else {
                        return Err(DbError::Corruption("internal node changed shape".into()));
                    };
                    if ordinal > entries.len()
                        || entries
                            .get(ordinal - 1)
                            .is_some_and(|(k, _)| k.as_slice() > key)
                    {
                        return Ok((false, false));
                    }
                }
            }
        }
    }

    /// Repair an underflowing child: borrow from the left sibling when it
    /// can spare an entry, else from the right, else merge with a sibling
    /// (left preferred). Oversized variable-length nodes that would not
    /// fit a merged page are left underfull.
    fn fix_child(&self, parent_id: PageId, ordinal: usize) -> DbResult<()> {
        let Node::Internal {
            first_child,
            mut entries,
        } = self.read_node(parent_id)?
        else {
            return Err(DbError::Storage("fix_child on leaf parent".into()));
        };
        let parent_probe = Node::Internal {
            first_child,
            entries: entries.clone(),
        };
        let child_id = parent_probe.child_at(ordinal)?;
        let child = self.read_node(child_id)?;
        let min = self.min_keys();

        // Borrow from the left sibling.
        if ordinal > 0 {
            let left_id = parent_probe.child_at(ordinal - 1)?;
            let left = self.read_node(left_id)?;
            if left.len() > min {
                self.borrow_from_left(
                    &mut entries,
                    ordinal,
                    left_id,
                    left,
                    child_id,
                    child,
                )?;
                return self.write_node(
                    parent_id,
                    &Node::Internal {
                        first_child,
                        entries,
                    },
                );
            }
        }

        // Borrow from the right sibling.
        if ordinal < entries.len() {
            let right_id = parent_probe.child_at(ordinal + 1)?;
            let right = self.read_node(right_id)?;
            if right.len() > min {
                self.borrow_from_right(
                    &mut entries,
                    ordinal,
                    child_id,
                    child,
                    right_id,
                    right,
                )?;
                return self.write_node(
                    parent_id,
                    &Node::Internal {
                        first_child,
                        entries,
                    },
                );
            }
        }

        // Merge with the left sibling, falling back to the right.
        if ordinal > 0 {
            let left_id = parent_probe.child_at(ordinal - 1)?;
            let left = self.read_node(left_id)?;
            if self.merge_nodes(left_id, left, child_id, child, &entries[ordinal - 1].0)? {
                entries.remove(ordinal - 1);
                return self.write_node(
                    parent_id,
                    &Node::Internal {
                        first_child,
                        entries,
                    },
                );
            }
        } else if ordinal < entries.len() {
            let right_id = parent_probe.child_at(ordinal + 1)?;
            let right = self.read_node(right_id)?;
            if self.merge_nodes(child_id, child, right_id, right, &entries[ordinal].0)? {
                entries.remove(ordinal);
                return self.write_node(
                    parent_id,
                    &Node::Internal {
                        first_child,
                        entries,
                    },
                );
            }
        }
        Ok(())
    }

    fn borrow_from_left(
        &self,
        parent_entries: &mut [(Vec<u8>, PageId)],
        ordinal: usize,
        left_id: PageId,
        left: Node,
        child_id: PageId,
        child: Node,
    ) -> DbResult<()> {
        let sep_idx = ordinal - 1;
        match (left, child) {
            (
                Node::Leaf {
                    entries: mut left_entries,
                    next_leaf: left_next,
                },
                Node::Leaf {
                    entries: mut child_entries,
                    next_leaf: child_next,
                },
            ) => {
                let moved = left_entries
                    .pop()
                    .ok_or_else(|| DbError::Storage("borrow from empty leaf".into()))?;
                child_entries.insert(0, moved);
                parent_entries[sep_idx].0 = child_entries[0].0.clone();
                self.write_node(
                    left_id,
                    &Node::Leaf {
                        entries: left_entries,
                        next_leaf: left_next,
                    },
                )?;
                self.write_node(
                    child_id,
                    &Node::Leaf {
                        entries: child_entries,
                        next_leaf: child_next,
                    },
                )
            }
            (
                Node::Internal {
                    first_child: left_first,
                    entries: mut left_entries,
                },
                Node::Internal {
                    first_child: child_first,
                    entries: mut child_entries,
                },
            ) => {
                let (moved_key, moved_child) = left_entries
                    .pop()
                    .ok_or_else(|| DbError::Storage("borrow from empty internal".into()))?;
                let old_sep = std::mem::replace(&mut parent_entries[sep_idx].0, moved_key);
                child_entries.insert(0, (old_sep, child_first));
                self.write_node(
                    left_id,
                    &Node::Internal {
                        first_child: left_first,
                        entries: left_entries,
                    },
                )?;
                self.write_node(
                    child_id,
                    &Node::Internal {
                        first_child: moved_child,
                        entries: child_entries,
                    },
                )
            }
            _ => Err(DbError::Corruption("siblings of different kinds".into())),
        }
    }

    fn borrow_from_right(
        &self,
        parent_entries: &mut [(Vec<u8>, PageId)],
        ordinal: usize,
        child_id: PageId,
        child: Node,
        right_id: PageId,
        right: Node,
    ) -> DbResult<()> {
        let sep_idx = ordinal;
        match (child, right) {
            (
                Node::Leaf {
                    entries: mut child_entries,
                    next_leaf: child_next,
                },
                Node::Leaf {
                    entries: mut right_entries,
                    next_leaf: right_next,
                },
            ) => {
                child_entries.push(right_entries.remove(0));
                parent_entries[sep_idx].0 = right_entries[0].0.clone();
                self.write_node(
                    child_id,
                    &Node::Leaf {
                        entries: child_entries,
                        next_leaf: child_next,
                    },
                )?;
                self.write_node(
                    right_id,
                    &Node::Leaf {
                        entries: right_entries,
                        next_leaf: right_next,
                    },
                )
            }
            (
                Node::Internal {
                    first_child: child_first,
                    entries: mut child_entries,
                },
                Node::Internal {
                    first_child: right_first,
                    entries: mut right_entries,
                },
            ) => {
                let (next_key, next_child) = right_entries.remove(0);
                let old_sep = std::mem::replace(&mut parent_entries[sep_idx].0, next_key);
                child_entries.push((old_sep, right_first));
                self.write_node(
                    child_id,
                    &Node::Internal {
                        first_child: child_first,
                        entries: child_entries,
                    },
                )?;
                self.write_node(
                    right_id,
                    &Node::Internal {
                        first_child: next_child,
                        entries: right_entries,
                    },
                )
            }
            _ => Err(DbError::Corruption("siblings of different kinds".into())),
        }
    }

    /// Merge `right_node` into `left_node` if the result fits one page.
    /// Returns `true` on success; the right page is freed.
    fn merge_nodes(
        &self,
        left_id: PageId,
        left: Node,
        right_id: PageId,
        right: Node,
        separator: &[u8],
    ) -> DbResult<bool> {
        let merged = match (left, right) {
            (
                Node::Leaf {
                    entries: mut left_entries,
                    ..
                },
                Node::Leaf {
                    entries: right_entries,
                    next_leaf: right_next,
                },
            ) => {
                left_entries.extend(right_entries);
                Node::Leaf {
                    entries: left_entries,
                    next_leaf: right_next,
                }
            }
            (
                Node::Internal {
                    first_child: left_first,
                    entries: mut left_entries,
                },
                Node::Internal {
                    first_child: right_first,
                    entries: right_entries,
                },
            ) => {
                left_entries.push((separator.to_vec(), right_first));
                left_entries.extend(right_entries);
                Node::Internal {
                    first_child: left_first,
                    entries: left_entries,
                }
            }
            _ => return Err(DbError::Corruption("siblings of different kinds".into())),
        };

        if !merged.fits_page()? {
            return Ok(false);
        }
        self.write_node(left_id, &merged)?;
        self.free_node(right_id)?;
        Ok(true)
    }

    // ---- maintenance ----

    fn destroy_rec(&self, page_id: PageId) -> DbResult<()> {
        if let Node::Internal {
            first_child,
            entries,
        } = self.read_node(page_id)?
        {
            self.destroy_rec(first_child)?;
            for (_, child) in entries {
                self.destroy_rec(child)?;
            }
        }
        self.free_node(page_id)
    }

    fn stats_rec(&self, page_id: PageId, depth: usize, stats: &mut TreeStats) -> DbResult<()> {
        match self.read_node(page_id)? {
            Node::Leaf { entries, .. } => {
                stats.leaf_pages += 1;
                stats.key_count += entries.len();
                stats.total_key_bytes += entries.iter().map(|(k, _)| k.len()).sum::<usize>();
                stats.height = stats.height.max(depth);
            }
            Node::Internal {
                first_child,
                entries,
            } => {
                stats.internal_pages += 1;
                stats.total_key_bytes += entries.iter().map(|(k, _)| k.len()).sum::<usize>();
                self.stats_rec(first_child, depth + 1, stats)?;
                for (_, child) in entries {
                    self.stats_rec(child, depth + 1, stats)?;
                }
            }
        }
        Ok(())
    }

    // ---- page I/O ----

    fn read_node(&self, page_id: PageId) -> DbResult<Node> {
        let page = self.pool.fetch_page(page_id)?;
        let node = Node::decode(page.read().body());
        self.pool.unpin_page(page_id, false)?;
        node
    }

    fn write_node(&self, page_id: PageId, node: &Node) -> DbResult<()> {
        let bytes = node.encode()?;
        if bytes.len() > PAGE_BODY_SIZE {
            return Err(DbError::Storage(format!(
                "btree node of {} bytes exceeds page body",
                bytes.len()
            )));
        }
        let page = self.pool.fetch_page(page_id)?;
        {
            let mut page = page.write();
            page.set_page_type(if node.is_leaf() {
                PageType::LeafIndex
            } else {
                PageType::InternalIndex
            });
            let body = page.body_mut();
            body[..bytes.len()].copy_from_slice(&bytes);
            for byte in &mut body[bytes.len()..] {
                *byte = 0;
            }
        }
        self.pool.unpin_page(page_id, true)
    }

    fn alloc_node(&self, node: &Node) -> DbResult<PageId> {
        let (page_id, page) = self.pool.new_page()?;
        drop(page);
        self.pool.unpin_page(page_id, true)?;
        self.write_node(page_id, node)?;
        Ok(page_id)
    }

    fn free_node(&self, page_id: PageId) -> DbResult<()> {
        self.pool.delete_page(page_id)?;
        self.pool.disk().lock().deallocate_page(page_id);
        Ok(())
    }
}
