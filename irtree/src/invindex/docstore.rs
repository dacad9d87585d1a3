//! Document store contract.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::WeightEntry;

/// A document's term weights, keyed by the document id the leaf entries
/// carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub weights: Vec<WeightEntry>,
}

impl Document {
    pub fn new(id: u64, weights: Vec<WeightEntry>) -> Document {
        Document { id, weights }
    }
}

/// Read side of the document store the IR-tree builder consumes.
pub trait DocumentStore {
    fn read(&self, doc: u64) -> Option<&Document>;
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: HashMap<u64, Document>,
}

impl MemoryDocumentStore {
    pub fn new() -> MemoryDocumentStore {
        MemoryDocumentStore::default()
    }

    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.id, document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, doc: u64) -> Option<&Document> {
        self.documents.get(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_back() {
        let mut store = MemoryDocumentStore::new();
        store.insert(Document::new(1, vec![WeightEntry::new(7, 0.5)]));

        let doc = store.read(1).unwrap();
        assert_eq!(doc.weights[0].keyword, 7);
        assert!(store.read(2).is_none());
    }
}
