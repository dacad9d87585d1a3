//! Test fixtures: small trees, id collection helpers and a spatial-keyword
//! corpus with two well-separated clusters.

use irtree::geometry::{Point, Region, Shape};
use irtree::invindex::{Document, MemoryDocumentStore};
use irtree::rtree::{IdCollector, RTree, RankingParams, TreeConfig, TreeVariant};
use irtree::storage::{MemoryPageStore, PageStore};
use irtree::WeightEntry;

/// A 2-D tree with capacities 4/4 so a handful of inserts already split.
pub fn small_config(variant: TreeVariant) -> TreeConfig {
    TreeConfig {
        variant,
        fill_factor: 0.5,
        index_capacity: 4,
        leaf_capacity: 4,
        near_minimum_overlap_factor: 4,
        split_distribution_factor: 0.4,
        reinsert_factor: 0.3,
        dimension: 2,
        index_identifier: None,
    }
}

pub fn small_tree(variant: TreeVariant) -> RTree<MemoryPageStore> {
    RTree::new(small_config(variant), MemoryPageStore::new()).expect("tree construction")
}

pub fn insert_point<S: PageStore>(tree: &RTree<S>, x: f64, y: f64, id: u64) {
    tree.insert_data(None, &Shape::from(Point::xy(x, y)), id)
        .expect("insert");
}

pub fn region(lx: f64, ly: f64, hx: f64, hy: f64) -> Shape {
    Shape::from(Region::new(vec![lx, ly], vec![hx, hy]))
}

/// Sorted ids matched by an intersection query.
pub fn intersection_ids<S: PageStore>(tree: &RTree<S>, query: &Shape) -> Vec<u64> {
    let mut collector = IdCollector::new();
    tree.intersection_query(query, &mut collector)
        .expect("intersection query");
    collector.ids.sort_unstable();
    collector.ids
}

/// Sorted ids matched by a containment query.
pub fn containment_ids<S: PageStore>(tree: &RTree<S>, query: &Shape) -> Vec<u64> {
    let mut collector = IdCollector::new();
    tree.containment_query(query, &mut collector)
        .expect("containment query");
    collector.ids.sort_unstable();
    collector.ids
}

/// Ids in emission order from a k-NN query.
pub fn knn_ids<S: PageStore>(tree: &RTree<S>, k: usize, x: f64, y: f64) -> Vec<u64> {
    let mut collector = IdCollector::new();
    tree.nearest_neighbor_query(k, &Shape::from(Point::xy(x, y)), &mut collector)
        .expect("knn query");
    collector.ids
}

/// Two clusters of documents: ids 1..=3 near the origin carrying keyword
/// 7, ids 4..=6 around (50, 50) carrying keyword 9. Ranking parameters
/// are set so `max_d` covers the extent.
pub fn spatial_keyword_corpus(
    variant: TreeVariant,
) -> (RTree<MemoryPageStore>, MemoryDocumentStore) {
    let tree = small_tree(variant);
    let mut docs = MemoryDocumentStore::new();

    for (id, x, y, keyword) in [
        (1u64, 0.0, 0.0, 7u32),
        (2, 1.0, 0.0, 7),
        (3, 0.0, 1.0, 7),
        (4, 50.0, 50.0, 9),
        (5, 51.0, 50.0, 9),
        (6, 50.0, 51.0, 9),
    ] {
        insert_point(&tree, x, y, id);
        docs.insert(Document::new(id, vec![WeightEntry::new(keyword, 1.0)]));
    }

    tree.set_ranking_params(RankingParams {
        alpha: 0.5,
        max_d: 100.0,
        num_clusters: 0,
    });
    (tree, docs)
}
