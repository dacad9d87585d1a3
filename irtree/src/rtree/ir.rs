//! IR-tree construction and top-k spatial-keyword search.
//!
//! The builders walk the finished R-tree bottom-up and attach an inverted
//! file to every node; after completion the inverted file of a node
//! summarizes the keyword content of its entire subtree, so an interior
//! textual score never underestimates a descendant's. The searches exploit
//! that bound in a best-first branch-and-bound traversal.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::{Error, Result};
use crate::invindex::{ClusterId, DocumentStore, InvertedFile, PseudoDocument};
use crate::query::{AggregateQuery, Cost, Query, QueryResult};
use crate::storage::{PageId, PageStore};

use super::node::Node;
use super::stats::StatCounters;
use super::tree::{RTree, RTreeInner, RankingParams};

/// Combines a spatial distance and a textual score into the search cost.
/// Lower totals are better; monotone in both arguments.
pub fn combined_score(params: &RankingParams, spatial: f64, ir: f64) -> Cost {
    let spatial_cost = (spatial / params.max_d).max(0.0);
    let textual_cost = (1.0 - ir).max(0.0);
    let total = params.alpha * spatial_cost + (1.0 - params.alpha) * textual_cost;
    Cost::new(spatial_cost, textual_cost, total)
}

impl<S: PageStore> RTree<S> {
    /// Builds the IR-tree: attaches an inverted file to every node, leaves
    /// first. Returns the root's pseudo-document.
    pub fn ir(
        &self,
        documents: &dyn DocumentStore,
        inverted: &mut dyn InvertedFile,
    ) -> Result<PseudoDocument> {
        let core = self.inner.core.read();
        let root = self.inner.read_node(core.root_id)?;
        self.inner.ir_traversal(documents, inverted, &root)
    }

    /// Cluster-enhanced IR-tree construction: every document is routed to
    /// its cluster slot and interior pseudo-documents propagate per
    /// cluster. `clusters` maps document ids to cluster ids.
    pub fn cir_cluster_enhance(
        &self,
        clusters: &HashMap<u64, ClusterId>,
        documents: &dyn DocumentStore,
        inverted: &mut dyn InvertedFile,
    ) -> Result<Vec<PseudoDocument>> {
        let core = self.inner.core.read();
        let root = self.inner.read_node(core.root_id)?;
        self.inner
            .cir_traversal(clusters, documents, inverted, &root)
    }

    /// Top-k spatial-keyword search: best-first traversal combining the
    /// minimum spatial distance with the textual score from each node's
    /// inverted file. Emits costs in nondecreasing order and reports all
    /// ties at the top-k boundary, so more than `topk` results may return.
    pub fn lkt(
        &self,
        inverted: &mut dyn InvertedFile,
        query: &Query,
        topk: usize,
    ) -> Result<Vec<QueryResult>> {
        let core = self.inner.core.read();
        if query.location.dimension() != core.dimension {
            return Err(Error::shape(format!(
                "lkt: query has dimension {}, tree has {}",
                query.location.dimension(),
                core.dimension
            )));
        }
        let params = *self.inner.ranking.read();

        let mut queue: BinaryHeap<std::cmp::Reverse<RankedEntry>> = BinaryHeap::new();
        queue.push(std::cmp::Reverse(RankedEntry::node(core.root_id)));

        let mut results: Vec<QueryResult> = Vec::new();
        let mut k_nearest = 0.0f64;

        while let Some(std::cmp::Reverse(first)) = queue.pop() {
            StatCounters::bump(&self.inner.counters.visited_nodes);

            if first.is_leaf_entry {
                if results.len() >= topk && first.cost.total_cost > k_nearest {
                    break;
                }
                k_nearest = first.cost.total_cost;
                results.push(QueryResult::new(first.id, first.cost));
                continue;
            }

            let node = self.inner.read_node(first.id)?;
            inverted.load(first.id)?;
            let scores = if params.num_clusters != 0 {
                inverted.ranking_sum_cluster_enhance(&query.keywords, &query.keyword_weights)
            } else {
                inverted.ranking_sum(&query.keywords)
            };

            for entry in &node.entries {
                // A child absent from the score map has no matching keyword
                // anywhere below it.
                let Some(&irscore) = scores.get(&entry.id) else {
                    continue;
                };
                let spatial = entry.mbr.minimum_distance(&query.location);
                let cost = combined_score(&params, spatial, irscore);
                queue.push(std::cmp::Reverse(RankedEntry {
                    cost,
                    id: entry.id,
                    is_leaf_entry: node.is_leaf(),
                }));
            }
        }

        Ok(results)
    }

    /// Group top-k search: per candidate, each member query contributes
    /// its weighted combined cost and the group's aggregator folds them.
    /// The group MBR gives a cheap spatial lower bound used for pruning
    /// once `topk` results are known. Results come back in ascending
    /// total cost, ties by id.
    pub fn aggregate_lkt(
        &self,
        inverted: &mut dyn InvertedFile,
        group: &AggregateQuery,
        topk: usize,
    ) -> Result<Vec<QueryResult>> {
        let core = self.inner.core.read();
        for query in &group.queries {
            if query.location.dimension() != core.dimension {
                return Err(Error::shape(format!(
                    "aggregate_lkt: query has dimension {}, tree has {}",
                    query.location.dimension(),
                    core.dimension
                )));
            }
        }
        let params = *self.inner.ranking.read();
        let group_shape = crate::geometry::Shape::Region(group.mbr());

        let mut queue: BinaryHeap<std::cmp::Reverse<RankedEntry>> = BinaryHeap::new();
        queue.push(std::cmp::Reverse(RankedEntry::node(core.root_id)));

        let mut results: Vec<QueryResult> = Vec::new();
        let mut k_nearest = 0.0f64;

        while let Some(std::cmp::Reverse(first)) = queue.pop() {
            StatCounters::bump(&self.inner.counters.visited_nodes);

            if first.is_leaf_entry {
                if results.len() >= topk && first.cost.total_cost > k_nearest {
                    break;
                }
                k_nearest = first.cost.total_cost;
                results.push(QueryResult::new(first.id, first.cost));
                continue;
            }

            let node = self.inner.read_node(first.id)?;
            inverted.load(first.id)?;
            let member_scores: Vec<HashMap<u64, f64>> = group
                .queries
                .iter()
                .map(|query| {
                    if params.num_clusters != 0 {
                        inverted
                            .ranking_sum_cluster_enhance(&query.keywords, &query.keyword_weights)
                    } else {
                        inverted.ranking_sum(&query.keywords)
                    }
                })
                .collect();

            for entry in &node.entries {
                if member_scores.iter().all(|scores| !scores.contains_key(&entry.id)) {
                    continue;
                }

                // Every member lies inside the group MBR, so the distance
                // from a candidate to the group MBR lower-bounds every
                // member distance; with nonnegative textual costs and a
                // monotone aggregator that yields a lower bound on the
                // candidate's total.
                if results.len() >= topk {
                    let group_distance = group_shape.minimum_distance(&entry.mbr);
                    let bound_parts: Vec<f64> = group
                        .queries
                        .iter()
                        .map(|query| {
                            query.weight
                                * params.alpha
                                * (group_distance / params.max_d).max(0.0)
                        })
                        .collect();
                    if group.aggregator.aggregate(&bound_parts) > k_nearest {
                        continue;
                    }
                }

                let mut spatial_parts = Vec::with_capacity(group.queries.len());
                let mut textual_parts = Vec::with_capacity(group.queries.len());
                let mut total_parts = Vec::with_capacity(group.queries.len());
                for (index, query) in group.queries.iter().enumerate() {
                    let irscore = member_scores[index]
                        .get(&entry.id)
                        .copied()
                        .unwrap_or(0.0);
                    let spatial = entry.mbr.minimum_distance(&query.location);
                    let cost = combined_score(&params, spatial, irscore);
                    spatial_parts.push(query.weight * cost.spatial_cost);
                    textual_parts.push(query.weight * cost.ir_cost);
                    total_parts.push(query.weight * cost.total_cost);
                }

                let cost = Cost::new(
                    group.aggregator.aggregate(&spatial_parts),
                    group.aggregator.aggregate(&textual_parts),
                    group.aggregator.aggregate(&total_parts),
                );
                queue.push(std::cmp::Reverse(RankedEntry {
                    cost,
                    id: entry.id,
                    is_leaf_entry: node.is_leaf(),
                }));
            }
        }

        Ok(results)
    }
}

impl<S: PageStore> RTreeInner<S> {
    fn ir_traversal(
        &self,
        documents: &dyn DocumentStore,
        inverted: &mut dyn InvertedFile,
        node: &Node,
    ) -> Result<PseudoDocument> {
        let node_id = node_id(node)?;
        inverted.create(node_id)?;

        if node.is_leaf() {
            for entry in &node.entries {
                let document = documents
                    .read(entry.id)
                    .ok_or(Error::MissingDocument(entry.id))?;
                inverted.add_document(node_id, entry.id, &document.weights)?;
            }
        } else {
            log::debug!("processing index node {}", node_id);
            for entry in &node.entries {
                let child = self.read_node(entry.id)?;
                let pseudo = self.ir_traversal(documents, inverted, &child)?;
                inverted.add_document(node_id, entry.id, &pseudo)?;
            }
        }

        inverted.store(node_id)
    }

    fn cir_traversal(
        &self,
        clusters: &HashMap<u64, ClusterId>,
        documents: &dyn DocumentStore,
        inverted: &mut dyn InvertedFile,
        node: &Node,
    ) -> Result<Vec<PseudoDocument>> {
        let node_id = node_id(node)?;
        inverted.create(node_id)?;

        if node.is_leaf() {
            for entry in &node.entries {
                let document = documents
                    .read(entry.id)
                    .ok_or(Error::MissingDocument(entry.id))?;
                let cluster = *clusters
                    .get(&entry.id)
                    .ok_or(Error::MissingCluster(entry.id))?;
                log::debug!(
                    "adding doc {} to node {} in cluster {}",
                    entry.id,
                    node_id,
                    cluster
                );
                inverted.add_document_clustered(node_id, entry.id, &document.weights, cluster)?;
            }
        } else {
            log::debug!("processing index node {}", node_id);
            for entry in &node.entries {
                let child = self.read_node(entry.id)?;
                let pseudo = self.cir_traversal(clusters, documents, inverted, &child)?;
                for (slot, cluster_doc) in pseudo.iter().enumerate() {
                    if cluster_doc.is_empty() {
                        continue;
                    }
                    inverted.add_document_clustered(
                        node_id,
                        entry.id,
                        cluster_doc,
                        slot as ClusterId,
                    )?;
                }
            }
        }

        inverted.store_cluster_enhance(node_id)
    }
}

fn node_id(node: &Node) -> Result<PageId> {
    node.identifier
        .ok_or_else(|| Error::invalid_state("node without identifier"))
}

/// Priority-queue element of the top-k searches; orders by total cost,
/// ties by id for deterministic output.
struct RankedEntry {
    cost: Cost,
    id: u64,
    is_leaf_entry: bool,
}

impl RankedEntry {
    fn node(id: PageId) -> RankedEntry {
        RankedEntry {
            cost: Cost::new(0.0, 0.0, 0.0),
            id,
            is_leaf_entry: false,
        }
    }
}

impl PartialEq for RankedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost.total_cost == other.cost.total_cost && self.id == other.id
    }
}

impl Eq for RankedEntry {}

impl PartialOrd for RankedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.cost
            .total_cost
            .total_cmp(&other.cost.total_cost)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Shape};
    use crate::invindex::{Document, MemoryDocumentStore, MemoryInvertedFile, WeightEntry};
    use crate::rtree::tree::{TreeConfig, TreeVariant};
    use crate::storage::MemoryPageStore;

    fn build_tree() -> RTree<MemoryPageStore> {
        let config = TreeConfig {
            variant: TreeVariant::Quadratic,
            fill_factor: 0.5,
            index_capacity: 4,
            leaf_capacity: 4,
            near_minimum_overlap_factor: 4,
            split_distribution_factor: 0.4,
            reinsert_factor: 0.3,
            dimension: 2,
            index_identifier: None,
        };
        RTree::new(config, MemoryPageStore::new()).unwrap()
    }

    /// Two spatial clusters: docs 1-3 near the origin carry keyword 7,
    /// docs 4-6 far away carry keyword 9.
    fn corpus() -> (RTree<MemoryPageStore>, MemoryDocumentStore) {
        let tree = build_tree();
        let mut docs = MemoryDocumentStore::new();

        for (id, x, y, keyword) in [
            (1u64, 0.0, 0.0, 7u32),
            (2, 1.0, 0.0, 7),
            (3, 0.0, 1.0, 7),
            (4, 50.0, 50.0, 9),
            (5, 51.0, 50.0, 9),
            (6, 50.0, 51.0, 9),
        ] {
            tree.insert_data(None, &Shape::from(Point::xy(x, y)), id)
                .unwrap();
            docs.insert(Document::new(id, vec![WeightEntry::new(keyword, 1.0)]));
        }

        tree.set_ranking_params(RankingParams {
            alpha: 0.5,
            max_d: 100.0,
            num_clusters: 0,
        });
        (tree, docs)
    }

    #[test]
    fn test_combined_score_mixing() {
        let params = RankingParams {
            alpha: 0.5,
            max_d: 10.0,
            num_clusters: 0,
        };
        let cost = combined_score(&params, 5.0, 1.0);
        assert_eq!(cost.spatial_cost, 0.5);
        assert_eq!(cost.ir_cost, 0.0);
        assert_eq!(cost.total_cost, 0.25);

        // Clamped at zero from below.
        let cost = combined_score(&params, -1.0, 2.0);
        assert_eq!(cost.spatial_cost, 0.0);
        assert_eq!(cost.ir_cost, 0.0);
        assert_eq!(cost.total_cost, 0.0);
    }

    #[test]
    fn test_ir_builds_subtree_summaries() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();

        let root_pseudo = tree.ir(&docs, &mut inverted).unwrap();
        let keywords: Vec<u32> = root_pseudo.iter().map(|w| w.keyword).collect();
        assert_eq!(keywords, vec![7, 9]);
        for weight in &root_pseudo {
            assert_eq!(weight.weight, 1.0);
        }
    }

    #[test]
    fn test_ir_missing_document_is_recoverable() {
        let (tree, _docs) = corpus();
        let empty = MemoryDocumentStore::new();
        let mut inverted = MemoryInvertedFile::new();

        let result = tree.ir(&empty, &mut inverted);
        assert!(matches!(result, Err(Error::MissingDocument(_))));
    }

    #[test]
    fn test_lkt_prefers_matching_leaf() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();
        tree.ir(&docs, &mut inverted).unwrap();

        // Keyword 7 near the left cluster: a left doc must win.
        let query = Query::new(Point::xy(0.5, 0.5), vec![7]);
        let results = tree.lkt(&mut inverted, &query, 1).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].id <= 3, "expected a left-cluster doc, got {}", results[0].id);

        // Keyword 9 near the right cluster.
        let query = Query::new(Point::xy(50.5, 50.5), vec![9]);
        let results = tree.lkt(&mut inverted, &query, 1).unwrap();
        assert!(results[0].id >= 4);
    }

    #[test]
    fn test_lkt_costs_nondecreasing() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();
        tree.ir(&docs, &mut inverted).unwrap();

        let query = Query::new(Point::xy(0.0, 0.0), vec![7, 9]);
        let results = tree.lkt(&mut inverted, &query, 6).unwrap();
        assert_eq!(results.len(), 6);
        for pair in results.windows(2) {
            assert!(pair[0].cost.total_cost <= pair[1].cost.total_cost);
        }
    }

    #[test]
    fn test_lkt_skips_unmatched_subtrees() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();
        tree.ir(&docs, &mut inverted).unwrap();

        // Only keyword 7 exists on the left; right-cluster docs never match.
        let query = Query::new(Point::xy(0.0, 0.0), vec![7]);
        let results = tree.lkt(&mut inverted, &query, 6).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|&id| id <= 3));
    }

    #[test]
    fn test_lkt_visited_nodes_counted() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();
        tree.ir(&docs, &mut inverted).unwrap();

        let before = tree.statistics().visited_nodes;
        let query = Query::new(Point::xy(0.0, 0.0), vec![7]);
        tree.lkt(&mut inverted, &query, 1).unwrap();
        assert!(tree.statistics().visited_nodes > before);
    }

    #[test]
    fn test_cluster_enhanced_build_and_search() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();

        let clusters: HashMap<u64, ClusterId> =
            (1..=6).map(|id| (id, (id % 2) as ClusterId)).collect();
        tree.cir_cluster_enhance(&clusters, &docs, &mut inverted)
            .unwrap();

        tree.set_ranking_params(RankingParams {
            alpha: 0.5,
            max_d: 100.0,
            num_clusters: 2,
        });

        let query =
            Query::with_weights(Point::xy(0.5, 0.5), 1.0, vec![7], vec![1.0]);
        let results = tree.lkt(&mut inverted, &query, 1).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].id <= 3);
    }

    #[test]
    fn test_cluster_build_missing_cluster_is_recoverable() {
        let (tree, docs) = corpus();
        let mut inverted = MemoryInvertedFile::new();
        let clusters = HashMap::new();

        let result = tree.cir_cluster_enhance(&clusters, &docs, &mut inverted);
        assert!(matches!(result, Err(Error::MissingCluster(_))));
    }
}
