use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, PageId, RowId};
use serde::{Deserialize, Serialize};
use storage::PAGE_BODY_SIZE;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// A B+tree node, bincode-encoded into the page body.
///
/// Leaf entries are `(serialized key, row id)` pairs in ascending key
/// order (ties broken by row id); leaves chain forward through
/// `next_leaf`. Internal nodes hold `first_child` plus
/// `(separator, child)` entries: the subtree before separator `k`
/// contains keys `< k`, the subtree at `k` contains keys `>= k`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        entries: Vec<(Vec<u8>, RowId)>,
        next_leaf: PageId,
    },
    Internal {
        first_child: PageId,
        entries: Vec<(Vec<u8>, PageId)>,
    },
}

impl Node {
    pub fn new_leaf() -> Self {
        Node::Leaf {
            entries: Vec::new(),
            next_leaf: common::INVALID_PAGE_ID,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Internal { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        encode_to_vec(self, bincode_config())
            .map_err(|e| DbError::Storage(format!("failed to encode btree node: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let (node, _) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| DbError::Corruption(format!("failed to decode btree node: {e}")))?;
        Ok(node)
    }

    /// Whether the encoded node fits the page body. Variable-length keys
    /// make the entry-count bound an upper bound only; this is the real
    /// constraint.
    pub fn fits_page(&self) -> DbResult<bool> {
        Ok(self.encode()?.len() <= PAGE_BODY_SIZE)
    }

    /// Child page to follow so that an equal key is found at the leftmost
    /// leaf that can hold it (separator equal to the key goes left).
    pub fn child_for_search(&self, key: &[u8]) -> DbResult<PageId> {
        match self {
            Node::Internal {
                first_child,
                entries,
            } => {
                let idx = entries.partition_point(|(k, _)| k.as_slice() < key);
                Ok(if idx == 0 {
                    *first_child
                } else {
                    entries[idx - 1].1
                })
            }
            Node::Leaf { .. } => Err(DbError::Storage("child_for_search on a leaf".into())),
        }
    }

    /// Page id of child ordinal `idx` (0 = `first_child`).
    pub fn child_at(&self, idx: usize) -> DbResult<PageId> {
        match self {
            Node::Internal {
                first_child,
                entries,
            } => {
                if idx == 0 {
                    Ok(*first_child)
                } else {
                    entries
                        .get(idx - 1)
                        .map(|(_, child)| *child)
                        .ok_or_else(|| DbError::Storage(format!("no child at ordinal {idx}")))
                }
            }
            Node::Leaf { .. } => Err(DbError::Storage("child_at on a leaf".into())),
        }
    }
}
