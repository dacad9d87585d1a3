//! Node and entry model.
//!
//! Leaf and index nodes share a uniform entry layout so the tree
//! algorithms can treat them alike: an entry carries an MBR, a child
//! identifier (a page id for index entries, a data id for leaf entries)
//! and, in leaf entries, an opaque payload. A node's MBR is always the
//! union of its entries' MBRs after every mutation.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::geometry::Region;
use crate::storage::PageId;

/// Leaf nodes live at level 0; index nodes above.
pub const LEAF_LEVEL: u32 = 0;

/// Persisted node type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    PersistentLeaf,
    PersistentIndex,
}

/// A member of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub mbr: Region,
    /// Child page id in index nodes, data id in leaf nodes.
    pub id: u64,
    /// Application payload; present only on leaf entries.
    pub payload: Option<Vec<u8>>,
}

impl Entry {
    pub fn new(mbr: Region, id: u64) -> Entry {
        Entry {
            mbr,
            id,
            payload: None,
        }
    }

    pub fn with_payload(mbr: Region, id: u64, payload: Option<Vec<u8>>) -> Entry {
        Entry { mbr, id, payload }
    }
}

/// A leaf or index node.
///
/// `identifier` is `None` until the page store assigns an id on first
/// write.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub identifier: Option<PageId>,
    pub level: u32,
    pub entries: Vec<Entry>,
    pub node_mbr: Region,
}

/// Serialized node layout. The page store owns framing; this is the
/// logical form and it round-trips exactly.
#[derive(Serialize, Deserialize)]
struct PersistentNode {
    kind: NodeKind,
    level: u32,
    entries: Vec<Entry>,
    node_mbr: Region,
}

impl Node {
    /// Creates an empty, unassigned node at the given level.
    pub fn new(level: u32, dimension: usize) -> Node {
        Node {
            identifier: None,
            level,
            entries: Vec::new(),
            node_mbr: Region::infinite(dimension),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == LEAF_LEVEL
    }

    pub fn kind(&self) -> NodeKind {
        if self.is_leaf() {
            NodeKind::PersistentLeaf
        } else {
            NodeKind::PersistentIndex
        }
    }

    /// Appends an entry and grows the node MBR to cover it. The caller
    /// enforces capacity and keeps the parent's MBR current.
    pub fn insert_entry(&mut self, entry: Entry) {
        self.node_mbr.expand(&entry.mbr);
        self.entries.push(entry);
    }

    /// Removes the entry at `slot`, compacting the remainder, and
    /// recomputes the node MBR.
    pub fn delete_entry(&mut self, slot: usize) -> Entry {
        let entry = self.entries.remove(slot);
        self.recompute_mbr();
        entry
    }

    /// Recomputes the node MBR as the union of all entry MBRs.
    pub fn recompute_mbr(&mut self) {
        let mut mbr = Region::infinite(self.node_mbr.dimension());
        for entry in &self.entries {
            mbr.expand(&entry.mbr);
        }
        self.node_mbr = mbr;
    }

    /// Position of the entry referencing `id`.
    pub fn entry_slot(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Serializes the node for the page store.
    pub fn to_page_bytes(&self) -> Result<Vec<u8>> {
        let persistent = PersistentNode {
            kind: self.kind(),
            level: self.level,
            entries: self.entries.clone(),
            node_mbr: self.node_mbr.clone(),
        };
        bincode::serde::encode_to_vec(&persistent, bincode::config::legacy())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Reconstructs a node from its page bytes. The identifier is not part
    /// of the page; the tree sets it after loading.
    pub fn from_page_bytes(bytes: &[u8]) -> Result<Node> {
        let (persistent, _): (PersistentNode, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
                .map_err(|e| Error::Serialization(e.to_string()))?;

        let expected = if persistent.level == LEAF_LEVEL {
            NodeKind::PersistentLeaf
        } else {
            NodeKind::PersistentIndex
        };
        if persistent.kind != expected {
            return Err(Error::invalid_state(format!(
                "node type {:?} does not match level {}",
                persistent.kind, persistent.level
            )));
        }

        Ok(Node {
            identifier: None,
            level: persistent.level,
            entries: persistent.entries,
            node_mbr: persistent.node_mbr,
        })
    }
}
