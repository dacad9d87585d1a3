//! Per-node inverted files.
//!
//! Every tree node carries an inverted file summarizing the keyword
//! content of its subtree. The engine drives the [`InvertedFile`] contract
//! during IR-tree construction and consults it during top-k search; the
//! concrete storage of posting lists is the implementation's business.

pub mod docstore;

pub use docstore::{Document, DocumentStore, MemoryDocumentStore};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::storage::PageId;

/// Keyword identifier.
pub type KeywordId = u32;

/// Cluster identifier assigned by the clustering preprocessor.
pub type ClusterId = u32;

/// One keyword weight of a document or pseudo-document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub keyword: KeywordId,
    pub weight: f64,
}

impl WeightEntry {
    pub fn new(keyword: KeywordId, weight: f64) -> WeightEntry {
        WeightEntry { keyword, weight }
    }
}

/// A pseudo-document: the keyword weight vector standing in for a whole
/// subtree in its parent's inverted file.
pub type PseudoDocument = Vec<WeightEntry>;

/// Posting-list container attached to tree nodes.
///
/// The tree calls `create` once per node, accumulates documents (or child
/// pseudo-documents) with `add_document`, and seals the node with `store`,
/// which returns the node's pseudo-document. `load` selects the node whose
/// lists the two ranking functions read.
pub trait InvertedFile {
    /// Initializes an empty posting container for `node`.
    fn create(&mut self, node: PageId) -> Result<()>;

    /// Accumulates `postings` under `node` for document (or child) `doc`.
    fn add_document(&mut self, node: PageId, doc: u64, postings: &[WeightEntry]) -> Result<()>;

    /// Cluster-aware accumulation: the postings are routed to the given
    /// cluster slot.
    fn add_document_clustered(
        &mut self,
        node: PageId,
        doc: u64,
        postings: &[WeightEntry],
        cluster: ClusterId,
    ) -> Result<()>;

    /// Seals `node` and returns its pseudo-document.
    fn store(&mut self, node: PageId) -> Result<PseudoDocument>;

    /// Seals `node` and returns one pseudo-document per cluster.
    fn store_cluster_enhance(&mut self, node: PageId) -> Result<Vec<PseudoDocument>>;

    /// Selects `node` for the ranking functions.
    fn load(&mut self, node: PageId) -> Result<()>;

    /// Sum of matching keyword weights per indexed child of the loaded
    /// node.
    fn ranking_sum(&self, keywords: &[KeywordId]) -> HashMap<u64, f64>;

    /// Cluster-aware ranking: each keyword weight is scaled by the query's
    /// per-keyword weight.
    fn ranking_sum_cluster_enhance(
        &self,
        keywords: &[KeywordId],
        keyword_weights: &[f64],
    ) -> HashMap<u64, f64>;
}

/// In-memory inverted file.
///
/// Posting lists are kept per node as `keyword -> (child -> weight)` maps;
/// the cluster-enhanced variant adds a cluster dimension in front.
#[derive(Debug, Default)]
pub struct MemoryInvertedFile {
    nodes: HashMap<PageId, NodeLists>,
    loaded: Option<PageId>,
}

#[derive(Debug, Default)]
struct NodeLists {
    /// keyword -> child -> accumulated weight
    lists: HashMap<KeywordId, HashMap<u64, f64>>,
    /// cluster -> keyword -> child -> accumulated weight
    clustered: HashMap<ClusterId, HashMap<KeywordId, HashMap<u64, f64>>>,
    max_cluster: Option<ClusterId>,
}

impl MemoryInvertedFile {
    pub fn new() -> MemoryInvertedFile {
        MemoryInvertedFile::default()
    }

    fn node_mut(&mut self, node: PageId) -> Result<&mut NodeLists> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| Error::invalid_state(format!("no inverted file for node {}", node)))
    }

    fn loaded_node(&self) -> Option<&NodeLists> {
        self.loaded.and_then(|node| self.nodes.get(&node))
    }
}

/// Per-keyword maximum over the accumulated lists: an interior score can
/// then never underestimate a descendant's score, which the best-first
/// search depends on.
fn pseudo_document(lists: &HashMap<KeywordId, HashMap<u64, f64>>) -> PseudoDocument {
    let mut weights: Vec<WeightEntry> = lists
        .iter()
        .map(|(&keyword, per_child)| {
            let max = per_child.values().fold(0.0f64, |acc, w| acc.max(*w));
            WeightEntry::new(keyword, max)
        })
        .collect();
    weights.sort_by_key(|entry| entry.keyword);
    weights
}

impl InvertedFile for MemoryInvertedFile {
    fn create(&mut self, node: PageId) -> Result<()> {
        self.nodes.insert(node, NodeLists::default());
        Ok(())
    }

    fn add_document(&mut self, node: PageId, doc: u64, postings: &[WeightEntry]) -> Result<()> {
        let lists = self.node_mut(node)?;
        for posting in postings {
            *lists
                .lists
                .entry(posting.keyword)
                .or_default()
                .entry(doc)
                .or_insert(0.0) += posting.weight;
        }
        Ok(())
    }

    fn add_document_clustered(
        &mut self,
        node: PageId,
        doc: u64,
        postings: &[WeightEntry],
        cluster: ClusterId,
    ) -> Result<()> {
        let lists = self.node_mut(node)?;
        lists.max_cluster = Some(lists.max_cluster.map_or(cluster, |c| c.max(cluster)));
        let slot = lists.clustered.entry(cluster).or_default();
        for posting in postings {
            *slot
                .entry(posting.keyword)
                .or_default()
                .entry(doc)
                .or_insert(0.0) += posting.weight;
        }
        Ok(())
    }

    fn store(&mut self, node: PageId) -> Result<PseudoDocument> {
        let lists = self.node_mut(node)?;
        Ok(pseudo_document(&lists.lists))
    }

    fn store_cluster_enhance(&mut self, node: PageId) -> Result<Vec<PseudoDocument>> {
        let lists = self.node_mut(node)?;
        let slots = lists.max_cluster.map_or(0, |c| c as usize + 1);
        let mut result = vec![PseudoDocument::new(); slots];
        for (&cluster, slot_lists) in &lists.clustered {
            result[cluster as usize] = pseudo_document(slot_lists);
        }
        Ok(result)
    }

    fn load(&mut self, node: PageId) -> Result<()> {
        if !self.nodes.contains_key(&node) {
            return Err(Error::invalid_state(format!(
                "no inverted file for node {}",
                node
            )));
        }
        self.loaded = Some(node);
        Ok(())
    }

    fn ranking_sum(&self, keywords: &[KeywordId]) -> HashMap<u64, f64> {
        let mut scores = HashMap::new();
        let Some(lists) = self.loaded_node() else {
            return scores;
        };

        for keyword in keywords {
            if let Some(per_child) = lists.lists.get(keyword) {
                for (&child, &weight) in per_child {
                    *scores.entry(child).or_insert(0.0) += weight;
                }
            }
        }
        scores
    }

    fn ranking_sum_cluster_enhance(
        &self,
        keywords: &[KeywordId],
        keyword_weights: &[f64],
    ) -> HashMap<u64, f64> {
        let mut scores = HashMap::new();
        let Some(lists) = self.loaded_node() else {
            return scores;
        };

        for slot_lists in lists.clustered.values() {
            for (index, keyword) in keywords.iter().enumerate() {
                let query_weight = keyword_weights.get(index).copied().unwrap_or(1.0);
                if let Some(per_child) = slot_lists.get(keyword) {
                    for (&child, &weight) in per_child {
                        *scores.entry(child).or_insert(0.0) += weight * query_weight;
                    }
                }
            }
        }
        scores
    }
}
