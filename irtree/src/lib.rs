//! # irtree - Spatial-Keyword Indexing
//!
//! An IR-tree: an R/R*-tree over a pluggable page store whose nodes carry
//! inverted files summarizing the keyword content of their subtrees, plus
//! a best-first top-k search combining spatial distance with textual
//! relevance.
//!
//! ## Features
//!
//! - **Pluggable storage**: nodes persist as opaque pages through the
//!   [`storage::PageStore`] trait; in-memory and checksummed disk stores
//!   are included
//! - **Three split policies**: linear, quadratic and R* (with forced
//!   reinsertion and overlap-aware subtree choice)
//! - **Search primitives**: range (intersection/containment), point
//!   location, k-NN with tie reporting, caller-driven traversal
//! - **IR-tree overlay**: bottom-up inverted-file construction, plain and
//!   cluster-enhanced
//! - **Top-k spatial-keyword search**: `lkt` for single queries,
//!   `aggregate_lkt` for query groups with pluggable cost aggregation
//! - **Thread safe**: one writer or many readers per tree; handles are
//!   cheap clones sharing lock, storage and root
//!
//! ## Quick Start
//!
//! ```rust
//! use irtree::geometry::{Point, Shape};
//! use irtree::rtree::{IdCollector, RTree, TreeConfig};
//! use irtree::storage::MemoryPageStore;
//!
//! # fn main() -> irtree::errors::Result<()> {
//! let tree = RTree::new(TreeConfig::default(), MemoryPageStore::new())?;
//!
//! tree.insert_data(None, &Shape::from(Point::xy(1.0, 1.0)), 1)?;
//! tree.insert_data(None, &Shape::from(Point::xy(9.0, 9.0)), 2)?;
//!
//! let mut results = IdCollector::new();
//! tree.nearest_neighbor_query(1, &Shape::from(Point::xy(0.0, 0.0)), &mut results)?;
//! assert_eq!(results.ids, vec![1]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Spatial-keyword search
//!
//! ```rust
//! use irtree::geometry::{Point, Shape};
//! use irtree::invindex::{Document, MemoryDocumentStore, MemoryInvertedFile, WeightEntry};
//! use irtree::query::Query;
//! use irtree::rtree::{RTree, RankingParams, TreeConfig};
//! use irtree::storage::MemoryPageStore;
//!
//! # fn main() -> irtree::errors::Result<()> {
//! let tree = RTree::new(TreeConfig::default(), MemoryPageStore::new())?;
//! let mut docs = MemoryDocumentStore::new();
//!
//! tree.insert_data(None, &Shape::from(Point::xy(1.0, 1.0)), 1)?;
//! docs.insert(Document::new(1, vec![WeightEntry::new(7, 1.0)]));
//!
//! let mut inverted = MemoryInvertedFile::new();
//! tree.ir(&docs, &mut inverted)?;
//!
//! tree.set_ranking_params(RankingParams { alpha: 0.5, max_d: 10.0, num_clusters: 0 });
//! let hits = tree.lkt(&mut inverted, &Query::new(Point::xy(0.0, 0.0), vec![7]), 1)?;
//! assert_eq!(hits[0].id, 1);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod geometry;
pub mod invindex;
pub mod query;
pub mod rtree;
pub mod storage;

pub use errors::{Error, Result};
pub use geometry::{Point, Region, Shape};
pub use invindex::{
    ClusterId, Document, DocumentStore, InvertedFile, KeywordId, MemoryDocumentStore,
    MemoryInvertedFile, PseudoDocument, WeightEntry,
};
pub use query::{AggregateQuery, Aggregator, Cost, MaxAggregator, Query, QueryResult, SumAggregator};
pub use rtree::{
    combined_score, DataItem, IdCollector, MinimumDistanceComparator, NearestNeighborComparator,
    Node, NodeCommand, QueryStrategy, RTree, RankingParams, Statistics, TreeConfig, TreeVariant,
    Visitor,
};
pub use storage::{DiskPageStore, MemoryPageStore, PageId, PageStore};
