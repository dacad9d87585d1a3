//! Query types, costs and aggregate (group) queries.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Region};
use crate::invindex::KeywordId;

/// A single spatial-keyword query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub location: Point,
    pub weight: f64,
    pub keywords: Vec<KeywordId>,
    /// Per-keyword weights, parallel to `keywords`; missing entries count
    /// as 1.
    pub keyword_weights: Vec<f64>,
}

impl Query {
    pub fn new(location: Point, keywords: Vec<KeywordId>) -> Query {
        Query {
            location,
            weight: 1.0,
            keywords,
            keyword_weights: Vec::new(),
        }
    }

    pub fn with_weights(
        location: Point,
        weight: f64,
        keywords: Vec<KeywordId>,
        keyword_weights: Vec<f64>,
    ) -> Query {
        Query {
            location,
            weight,
            keywords,
            keyword_weights,
        }
    }
}

/// Composite cost of a search result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub spatial_cost: f64,
    pub ir_cost: f64,
    pub total_cost: f64,
}

impl Cost {
    pub fn new(spatial_cost: f64, ir_cost: f64, total_cost: f64) -> Cost {
        Cost {
            spatial_cost,
            ir_cost,
            total_cost,
        }
    }
}

/// A ranked search result.
///
/// Results order by ascending total cost, breaking ties by ascending id;
/// consumers rely on that for determinism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: u64,
    pub cost: Cost,
}

impl QueryResult {
    pub fn new(id: u64, cost: Cost) -> QueryResult {
        QueryResult { id, cost }
    }
}

impl Eq for QueryResult {}

impl PartialOrd for QueryResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cost
            .total_cmp(&other.cost.total_cost)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Folds per-query costs of a group query into a single scalar.
///
/// Both supplied aggregators are monotone in every argument, which the
/// group search needs for its pruning bound.
pub trait Aggregator {
    fn aggregate(&self, costs: &[f64]) -> f64;
    fn name(&self) -> &'static str;
}

/// Sums the member costs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumAggregator;

impl Aggregator for SumAggregator {
    fn aggregate(&self, costs: &[f64]) -> f64 {
        costs.iter().sum()
    }

    fn name(&self) -> &'static str {
        "SUM"
    }
}

/// Takes the worst member cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAggregator;

impl Aggregator for MaxAggregator {
    fn aggregate(&self, costs: &[f64]) -> f64 {
        costs.iter().fold(0.0f64, |acc, c| acc.max(*c))
    }

    fn name(&self) -> &'static str {
        "MAX"
    }
}

/// A group of queries evaluated together.
pub struct AggregateQuery {
    pub queries: Vec<Query>,
    pub aggregator: Box<dyn Aggregator>,
}

impl AggregateQuery {
    pub fn new(queries: Vec<Query>, aggregator: Box<dyn Aggregator>) -> AggregateQuery {
        AggregateQuery {
            queries,
            aggregator,
        }
    }

    pub fn group_size(&self) -> usize {
        self.queries.len()
    }

    /// Per-query weights, in query order.
    pub fn weights(&self) -> Vec<f64> {
        self.queries.iter().map(|q| q.weight).collect()
    }

    /// The minimum bounding region covering every member location.
    pub fn mbr(&self) -> Region {
        let dimension = self
            .queries
            .first()
            .map(|q| q.location.dimension())
            .unwrap_or(2);
        let mut mbr = Region::infinite(dimension);
        for query in &self.queries {
            mbr.expand(&Region::from_point(&query.location));
        }
        mbr
    }

    /// Set-union of every member's keywords.
    pub fn combined_keywords(&self) -> Vec<KeywordId> {
        let mut keywords = BTreeSet::new();
        for query in &self.queries {
            keywords.extend(query.keywords.iter().copied());
        }
        keywords.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_at(x: f64, y: f64, keywords: Vec<KeywordId>) -> Query {
        Query::new(Point::xy(x, y), keywords)
    }

    #[test]
    fn test_result_ordering_total_then_id() {
        let mut results = vec![
            QueryResult::new(3, Cost::new(0.0, 0.0, 0.5)),
            QueryResult::new(1, Cost::new(0.0, 0.0, 0.5)),
            QueryResult::new(2, Cost::new(0.0, 0.0, 0.1)),
        ];
        results.sort();

        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_aggregate_mbr_and_keywords() {
        let group = AggregateQuery::new(
            vec![
                query_at(0.0, 0.0, vec![1, 2]),
                query_at(10.0, 0.0, vec![2, 3]),
                query_at(0.0, 10.0, vec![3, 4]),
            ],
            Box::new(SumAggregator),
        );

        assert_eq!(group.group_size(), 3);
        assert_eq!(
            group.mbr(),
            Region::new(vec![0.0, 0.0], vec![10.0, 10.0])
        );
        assert_eq!(group.combined_keywords(), vec![1, 2, 3, 4]);
        assert_eq!(group.weights(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_aggregate_mbr_contains_every_location() {
        let group = AggregateQuery::new(
            vec![
                query_at(-3.0, 7.0, vec![]),
                query_at(4.0, -2.0, vec![]),
                query_at(1.0, 1.0, vec![]),
            ],
            Box::new(MaxAggregator),
        );

        let mbr = group.mbr();
        for query in &group.queries {
            assert!(mbr.contains_point(&query.location));
        }
    }

    #[test]
    fn test_aggregators() {
        let costs = [0.2, 0.5, 0.1];
        assert!((SumAggregator.aggregate(&costs) - 0.8).abs() < 1e-12);
        assert_eq!(MaxAggregator.aggregate(&costs), 0.5);
        assert_eq!(SumAggregator.name(), "SUM");
        assert_eq!(MaxAggregator.name(), "MAX");
    }
}
