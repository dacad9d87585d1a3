//! Integration tests for aggregate (group) queries.

use irtree::geometry::{Point, Region};
use irtree::invindex::MemoryInvertedFile;
use irtree::query::{
    AggregateQuery, Cost, MaxAggregator, Query, QueryResult, SumAggregator,
};
use irtree::rtree::TreeVariant;
use irtree_int_test::test_util::spatial_keyword_corpus;

fn scenario_group() -> AggregateQuery {
    AggregateQuery::new(
        vec![
            Query::new(Point::xy(0.0, 0.0), vec![1, 2]),
            Query::new(Point::xy(10.0, 0.0), vec![2, 3]),
            Query::new(Point::xy(0.0, 10.0), vec![3, 4]),
        ],
        Box::new(SumAggregator),
    )
}

#[test]
fn test_combined_mbr_and_keywords() {
    let group = scenario_group();

    assert_eq!(group.group_size(), 3);
    assert_eq!(group.mbr(), Region::new(vec![0.0, 0.0], vec![10.0, 10.0]));
    assert_eq!(group.combined_keywords(), vec![1, 2, 3, 4]);
}

#[test]
fn test_combined_mbr_contains_every_location() {
    let group = scenario_group();
    let mbr = group.mbr();
    for query in &group.queries {
        assert!(mbr.contains_point(&query.location));
    }
}

#[test]
fn test_weights_keep_query_order() {
    let group = AggregateQuery::new(
        vec![
            Query::with_weights(Point::xy(0.0, 0.0), 2.0, vec![1], vec![]),
            Query::with_weights(Point::xy(1.0, 1.0), 0.5, vec![2], vec![]),
        ],
        Box::new(SumAggregator),
    );
    assert_eq!(group.weights(), vec![2.0, 0.5]);
}

#[test]
fn test_result_sort_is_total_then_id() {
    let mut results = vec![
        QueryResult::new(9, Cost::new(0.1, 0.1, 0.4)),
        QueryResult::new(4, Cost::new(0.1, 0.1, 0.4)),
        QueryResult::new(7, Cost::new(0.0, 0.2, 0.2)),
        QueryResult::new(1, Cost::new(0.3, 0.3, 0.9)),
    ];
    results.sort();

    let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![7, 4, 9, 1]);
}

#[test]
fn test_aggregate_search_orders_by_folded_cost() {
    let (tree, docs) = spatial_keyword_corpus(TreeVariant::Quadratic);
    let mut inverted = MemoryInvertedFile::new();
    tree.ir(&docs, &mut inverted).unwrap();

    let group = AggregateQuery::new(
        vec![
            Query::new(Point::xy(0.5, 0.5), vec![7]),
            Query::new(Point::xy(50.5, 50.5), vec![9]),
        ],
        Box::new(SumAggregator),
    );

    let results = tree.aggregate_lkt(&mut inverted, &group, 6).unwrap();
    assert_eq!(results.len(), 6);
    for pair in results.windows(2) {
        assert!(pair[0].cost.total_cost <= pair[1].cost.total_cost);
    }
}

#[test]
fn test_aggregate_search_respects_member_weights() {
    let (tree, docs) = spatial_keyword_corpus(TreeVariant::Quadratic);
    let mut inverted = MemoryInvertedFile::new();
    tree.ir(&docs, &mut inverted).unwrap();

    // A dominant weight on the right-cluster member drags the best
    // candidates to the right cluster.
    let group = AggregateQuery::new(
        vec![
            Query::with_weights(Point::xy(0.5, 0.5), 0.01, vec![7], vec![]),
            Query::with_weights(Point::xy(50.5, 50.5), 10.0, vec![9], vec![]),
        ],
        Box::new(SumAggregator),
    );

    let results = tree.aggregate_lkt(&mut inverted, &group, 1).unwrap();
    assert!(!results.is_empty());
    assert!(results[0].id >= 4, "got {}", results[0].id);
}

#[test]
fn test_aggregate_search_max_aggregator() {
    let (tree, docs) = spatial_keyword_corpus(TreeVariant::Quadratic);
    let mut inverted = MemoryInvertedFile::new();
    tree.ir(&docs, &mut inverted).unwrap();

    let group = AggregateQuery::new(
        vec![
            Query::new(Point::xy(0.5, 0.5), vec![7]),
            Query::new(Point::xy(50.5, 50.5), vec![9]),
        ],
        Box::new(MaxAggregator),
    );

    let results = tree.aggregate_lkt(&mut inverted, &group, 6).unwrap();
    assert!(!results.is_empty());
    for pair in results.windows(2) {
        assert!(pair[0].cost.total_cost <= pair[1].cost.total_cost);
    }

    // With MAX, a candidate's folded cost is its worst member cost, which
    // here is always the far member's, so totals stay below the sum
    // aggregator's for the same group shape.
    for result in &results {
        assert!(result.cost.total_cost <= 1.0 + 1e-9);
    }
}

#[test]
fn test_aggregate_search_empty_group_is_empty() {
    let (tree, docs) = spatial_keyword_corpus(TreeVariant::Quadratic);
    let mut inverted = MemoryInvertedFile::new();
    tree.ir(&docs, &mut inverted).unwrap();

    let group = AggregateQuery::new(Vec::new(), Box::new(SumAggregator));
    let results = tree.aggregate_lkt(&mut inverted, &group, 3).unwrap();
    assert!(results.is_empty());
}
