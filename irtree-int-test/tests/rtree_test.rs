//! Integration tests for the R-tree engine: insertion, range queries,
//! k-NN, deletion and the structural audit.

use std::collections::HashMap;

use irtree::geometry::{Point, Shape};
use irtree::rtree::{Node, QueryStrategy, RTree, TreeVariant};
use irtree::storage::{DiskPageStore, PageId};
use irtree_int_test::test_util::{
    containment_ids, insert_point, intersection_ids, knn_ids, region, small_config, small_tree,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn scenario_tree(variant: TreeVariant) -> irtree::RTree<irtree::MemoryPageStore> {
    let tree = small_tree(variant);
    insert_point(&tree, 1.0, 1.0, 1);
    insert_point(&tree, 2.0, 2.0, 2);
    insert_point(&tree, 10.0, 10.0, 3);
    insert_point(&tree, 11.0, 11.0, 4);
    insert_point(&tree, 12.0, 12.0, 5);
    tree
}

#[test]
fn test_insert_and_requery() {
    // Five points at leaf capacity 4 force a split; both sides stay
    // queryable.
    let tree = scenario_tree(TreeVariant::Quadratic);

    assert_eq!(intersection_ids(&tree, &region(0.0, 0.0, 3.0, 3.0)), vec![1, 2]);
    assert_eq!(
        intersection_ids(&tree, &region(9.0, 9.0, 13.0, 13.0)),
        vec![3, 4, 5]
    );
    assert!(tree.is_index_valid().unwrap());
}

#[test]
fn test_insert_and_requery_all_variants() {
    for variant in [TreeVariant::Linear, TreeVariant::Quadratic, TreeVariant::Rstar] {
        let tree = scenario_tree(variant);
        assert_eq!(
            intersection_ids(&tree, &region(0.0, 0.0, 3.0, 3.0)),
            vec![1, 2],
            "{:?}",
            variant
        );
        assert_eq!(
            intersection_ids(&tree, &region(9.0, 9.0, 13.0, 13.0)),
            vec![3, 4, 5],
            "{:?}",
            variant
        );
    }
}

#[test]
fn test_inserted_entry_always_found_by_containment() {
    let tree = small_tree(TreeVariant::Quadratic);
    for i in 0..50u64 {
        let x = (i % 7) as f64 * 3.0;
        let y = (i / 7) as f64 * 3.0;
        insert_point(&tree, x, y, i);

        let ids = containment_ids(&tree, &region(x, y, x, y));
        assert!(ids.contains(&i));
    }
}

#[test]
fn test_containment_is_subset_of_intersection() {
    let tree = small_tree(TreeVariant::Quadratic);
    tree.insert_data(None, &region(0.0, 0.0, 4.0, 4.0), 1).unwrap();
    tree.insert_data(None, &region(3.0, 3.0, 8.0, 8.0), 2).unwrap();
    tree.insert_data(None, &region(7.0, 7.0, 9.0, 9.0), 3).unwrap();

    let query = region(0.0, 0.0, 5.0, 5.0);
    let contained = containment_ids(&tree, &query);
    let intersecting = intersection_ids(&tree, &query);

    for id in &contained {
        assert!(intersecting.contains(id));
    }
    assert_eq!(contained, vec![1]);
    assert_eq!(intersecting, vec![1, 2]);
}

#[test]
fn test_knn_with_ties() {
    // Four points at distance 5 from the origin plus one at distance 1:
    // k = 2 reports the close one and all four ties, five results total.
    let tree = small_tree(TreeVariant::Quadratic);
    insert_point(&tree, 5.0, 0.0, 1);
    insert_point(&tree, 0.0, 5.0, 2);
    insert_point(&tree, -5.0, 0.0, 3);
    insert_point(&tree, 0.0, -5.0, 4);
    insert_point(&tree, 1.0, 0.0, 5);

    let ids = knn_ids(&tree, 2, 0.0, 0.0);
    assert_eq!(ids.len(), 5);
    assert_eq!(ids[0], 5);
    let mut ties = ids[1..].to_vec();
    ties.sort_unstable();
    assert_eq!(ties, vec![1, 2, 3, 4]);
}

#[test]
fn test_knn_kth_distance_ordering() {
    let tree = small_tree(TreeVariant::Quadratic);
    let mut rng = StdRng::seed_from_u64(11);
    let mut points: Vec<(f64, f64)> = Vec::new();
    for i in 0..64u64 {
        let x: f64 = rng.gen_range(0.0..100.0);
        let y: f64 = rng.gen_range(0.0..100.0);
        points.push((x, y));
        insert_point(&tree, x, y, i);
    }

    let ids = knn_ids(&tree, 8, 50.0, 50.0);
    assert!(ids.len() >= 8);

    let query = Point::xy(50.0, 50.0);
    let distances: Vec<f64> = ids
        .iter()
        .map(|&id| {
            let (x, y) = points[id as usize];
            Point::xy(x, y).distance(&query)
        })
        .collect();
    for pair in distances.windows(2) {
        assert!(pair[0] <= pair[1] + 1e-9);
    }
}

#[test]
fn test_delete_and_shrink() {
    let tree = scenario_tree(TreeVariant::Quadratic);

    assert!(tree
        .delete_data(&Shape::from(Point::xy(12.0, 12.0)), 5)
        .unwrap());
    assert_eq!(intersection_ids(&tree, &region(9.0, 9.0, 13.0, 13.0)), vec![3, 4]);
    assert!(tree.is_index_valid().unwrap());
    assert_eq!(tree.statistics().data, 4);
}

#[test]
fn test_delete_nonexistent_returns_false() {
    let tree = scenario_tree(TreeVariant::Quadratic);
    assert!(!tree
        .delete_data(&Shape::from(Point::xy(99.0, 99.0)), 99)
        .unwrap());
    assert_eq!(tree.statistics().data, 5);
}

/// Breadth-first node census driven through the public `query_strategy`
/// interface.
struct LevelCensus {
    pending: Vec<PageId>,
    per_level: HashMap<u32, u64>,
}

impl LevelCensus {
    fn new() -> LevelCensus {
        LevelCensus {
            pending: Vec::new(),
            per_level: HashMap::new(),
        }
    }
}

impl QueryStrategy for LevelCensus {
    fn next_entry(&mut self, node: &Node) -> Option<PageId> {
        *self.per_level.entry(node.level).or_insert(0) += 1;
        if !node.is_leaf() {
            for entry in &node.entries {
                self.pending.push(entry.id);
            }
        }
        self.pending.pop()
    }
}

#[test]
fn test_structural_audit_after_random_load() {
    for variant in [TreeVariant::Linear, TreeVariant::Quadratic, TreeVariant::Rstar] {
        let tree = small_tree(variant);
        let mut rng = StdRng::seed_from_u64(7);

        for i in 0..1000u64 {
            let x: f64 = rng.gen_range(0.0..1000.0);
            let y: f64 = rng.gen_range(0.0..1000.0);
            insert_point(&tree, x, y, i);
        }

        assert!(tree.is_index_valid().unwrap(), "{:?}", variant);

        // Recount nodes per level independently and compare with the
        // statistics.
        let mut census = LevelCensus::new();
        tree.query_strategy(&mut census).unwrap();

        let stats = tree.statistics();
        assert_eq!(stats.data, 1000);
        for (level, count) in &census.per_level {
            assert_eq!(
                stats.nodes_in_level[*level as usize], *count,
                "{:?} level {}",
                variant, level
            );
        }
        let census_total: u64 = census.per_level.values().sum();
        assert_eq!(stats.nodes, census_total);
    }
}

#[test]
fn test_random_inserts_and_deletes_stay_valid() {
    let tree = small_tree(TreeVariant::Quadratic);
    let mut rng = StdRng::seed_from_u64(13);
    let mut live: Vec<(u64, f64, f64)> = Vec::new();

    for i in 0..300u64 {
        let x: f64 = rng.gen_range(0.0..100.0);
        let y: f64 = rng.gen_range(0.0..100.0);
        insert_point(&tree, x, y, i);
        live.push((i, x, y));
    }
    for _ in 0..150 {
        let index = rng.gen_range(0..live.len());
        let (id, x, y) = live.swap_remove(index);
        assert!(tree.delete_data(&Shape::from(Point::xy(x, y)), id).unwrap());
    }

    assert!(tree.is_index_valid().unwrap());
    assert_eq!(tree.statistics().data, live.len() as u64);

    for (id, x, y) in &live {
        let ids = intersection_ids(&tree, &region(*x, *y, *x, *y));
        assert!(ids.contains(id));
    }
}

#[test]
fn test_disk_backed_tree_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.irt");

    let header_id = {
        let store = DiskPageStore::create(&path).unwrap();
        let tree = RTree::new(small_config(TreeVariant::Quadratic), store).unwrap();
        for i in 0..40u64 {
            insert_point(&tree, (i % 8) as f64, (i / 8) as f64, i);
        }
        tree.flush().unwrap();
        tree.header_id().unwrap()
    };

    let store = DiskPageStore::open(&path).unwrap();
    let mut config = small_config(TreeVariant::Quadratic);
    config.index_identifier = Some(header_id);
    let tree = RTree::new(config, store).unwrap();

    assert_eq!(tree.statistics().data, 40);
    assert!(tree.is_index_valid().unwrap());
    let all = intersection_ids(&tree, &region(-1.0, -1.0, 10.0, 10.0));
    assert_eq!(all.len(), 40);
}

#[test]
fn test_concurrent_readers() {
    use std::thread;

    let tree = small_tree(TreeVariant::Quadratic);
    for i in 0..200u64 {
        insert_point(&tree, (i % 20) as f64, (i / 20) as f64, i);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let view = tree.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let ids = intersection_ids(&view, &region(0.0, 0.0, 19.0, 9.0));
                assert_eq!(ids.len(), 200);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
