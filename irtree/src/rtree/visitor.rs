//! Traversal callbacks and hook traits.

use crate::geometry::{Region, Shape};
use crate::rtree::node::Node;
use crate::storage::PageId;

/// A data entry handed to visitors during traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub id: u64,
    pub mbr: Region,
    pub payload: Option<Vec<u8>>,
}

/// Receives every touched node and every matching data entry during a
/// traversal. Views are immutable snapshots.
pub trait Visitor {
    fn visit_node(&mut self, node: &Node);
    fn visit_data(&mut self, data: &DataItem);
}

/// A visitor that collects matching data ids, in visit order.
#[derive(Debug, Default)]
pub struct IdCollector {
    pub ids: Vec<u64>,
}

impl IdCollector {
    pub fn new() -> IdCollector {
        IdCollector::default()
    }
}

impl Visitor for IdCollector {
    fn visit_node(&mut self, _node: &Node) {}

    fn visit_data(&mut self, data: &DataItem) {
        self.ids.push(data.id);
    }
}

/// Caller-driven traversal: the strategy inspects each node and names the
/// next node to load, or `None` to stop.
pub trait QueryStrategy {
    fn next_entry(&mut self, node: &Node) -> Option<PageId>;
}

/// Hook invoked after a node is written, read or deleted, depending on
/// the list it is registered in. Fire-and-forget.
pub trait NodeCommand: Send + Sync {
    fn execute(&self, node: &Node);
}

/// Orders the k-NN traversal queue.
///
/// Implementations must lower-bound the distance from the query shape to
/// anything inside `mbr`, or the best-first traversal loses its ordering
/// guarantee.
pub trait NearestNeighborComparator {
    fn minimum_distance(&self, query: &Shape, mbr: &Region) -> f64;
}

/// The default comparator: plain minimum spatial distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumDistanceComparator;

impl NearestNeighborComparator for MinimumDistanceComparator {
    fn minimum_distance(&self, query: &Shape, mbr: &Region) -> f64 {
        query.minimum_distance(mbr)
    }
}
