//! R-tree engine and the IR-tree overlay.

pub mod ir;
pub mod node;
mod split;
pub mod stats;
pub mod tree;
pub mod visitor;

pub use ir::combined_score;
pub use node::{Entry, Node, NodeKind, LEAF_LEVEL};
pub use stats::Statistics;
pub use tree::{RTree, RangePredicate, RankingParams, TreeConfig, TreeVariant};
pub use visitor::{
    DataItem, IdCollector, MinimumDistanceComparator, NearestNeighborComparator, NodeCommand,
    QueryStrategy, Visitor,
};
