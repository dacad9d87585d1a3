//! The R-tree engine.
//!
//! An R/R*-tree over a pluggable page store. Nodes are borrowed from the
//! store for the duration of an operation, mutated in place and written
//! back; across operations they are referenced only by page id. A single
//! reader/writer lock guards the tree: queries share the read lock,
//! `insert_data`/`delete_data` take the write lock.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::geometry::{Region, Shape};
use crate::storage::{PageId, PageStore};

use super::node::{Entry, Node};
use super::split;
use super::stats::{StatCounters, Statistics};
use super::visitor::{
    DataItem, MinimumDistanceComparator, NearestNeighborComparator, NodeCommand, QueryStrategy,
    Visitor,
};

/// Split policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeVariant {
    Linear,
    Quadratic,
    Rstar,
}

/// Tree construction options.
///
/// When `index_identifier` is set the tree reloads from that header page;
/// the immutable options (dimension, fill factor, capacities) are then
/// taken from the header and only the variant and the three R* factors
/// are re-applied from this config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub variant: TreeVariant,
    pub fill_factor: f64,
    pub index_capacity: usize,
    pub leaf_capacity: usize,
    pub near_minimum_overlap_factor: usize,
    pub split_distribution_factor: f64,
    pub reinsert_factor: f64,
    pub dimension: usize,
    pub index_identifier: Option<PageId>,
}

impl Default for TreeConfig {
    fn default() -> TreeConfig {
        TreeConfig {
            variant: TreeVariant::Quadratic,
            fill_factor: 0.7,
            index_capacity: 100,
            leaf_capacity: 100,
            near_minimum_overlap_factor: 32,
            split_distribution_factor: 0.4,
            reinsert_factor: 0.3,
            dimension: 2,
            index_identifier: None,
        }
    }
}

impl TreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fill_factor <= 0.0 || self.fill_factor >= 1.0 {
            return Err(Error::config("FillFactor must be in (0.0, 1.0)"));
        }
        if self.index_capacity < 3 {
            return Err(Error::config("IndexCapacity must be >= 3"));
        }
        if self.leaf_capacity < 3 {
            return Err(Error::config("LeafCapacity must be >= 3"));
        }
        if self.near_minimum_overlap_factor < 1
            || self.near_minimum_overlap_factor > self.index_capacity
            || self.near_minimum_overlap_factor > self.leaf_capacity
        {
            return Err(Error::config(
                "NearMinimumOverlapFactor must be between 1 and both capacities",
            ));
        }
        if self.split_distribution_factor <= 0.0 || self.split_distribution_factor >= 1.0 {
            return Err(Error::config("SplitDistributionFactor must be in (0.0, 1.0)"));
        }
        if self.reinsert_factor <= 0.0 || self.reinsert_factor >= 1.0 {
            return Err(Error::config("ReinsertFactor must be in (0.0, 1.0)"));
        }
        if self.dimension < 2 {
            return Err(Error::config("Dimension must be >= 2"));
        }
        Ok(())
    }
}

/// Tree-wide parameters of the spatial-keyword ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingParams {
    /// Mixing weight between the spatial and textual cost components.
    pub alpha: f64,
    /// Normalizing bound on spatial distances; queries are expected to
    /// stay within it.
    pub max_d: f64,
    /// Number of clusters; 0 disables the cluster-enhanced ranking.
    pub num_clusters: u32,
}

impl Default for RankingParams {
    fn default() -> RankingParams {
        RankingParams {
            alpha: 0.5,
            max_d: 1.0,
            num_clusters: 0,
        }
    }
}

/// Range query predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePredicate {
    Intersection,
    Containment,
}

/// Tree metadata persisted on the header page.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeHeader {
    root_id: PageId,
    variant: TreeVariant,
    fill_factor: f64,
    index_capacity: u64,
    leaf_capacity: u64,
    near_minimum_overlap_factor: u64,
    split_distribution_factor: f64,
    reinsert_factor: f64,
    dimension: u64,
    node_count: u64,
    data_count: u64,
    tree_height: u32,
    nodes_in_level: Vec<u64>,
}

/// Mutable tree state, guarded by the tree lock.
pub(crate) struct TreeCore {
    pub root_id: PageId,
    pub header_id: Option<PageId>,
    pub variant: TreeVariant,
    pub fill_factor: f64,
    pub index_capacity: usize,
    pub leaf_capacity: usize,
    pub near_minimum_overlap_factor: usize,
    pub split_distribution_factor: f64,
    pub reinsert_factor: f64,
    pub dimension: usize,
    pub tree_height: u32,
    pub nodes_in_level: Vec<u64>,
    pub node_count: u64,
    pub data_count: u64,
}

impl TreeCore {
    fn capacity_for(&self, level: u32) -> usize {
        if level == 0 {
            self.leaf_capacity
        } else {
            self.index_capacity
        }
    }

    /// Minimum entries of a non-root node. Floor keeps a split of
    /// `capacity + 1` entries feasible for every legal fill factor.
    fn min_fill_for(&self, level: u32) -> usize {
        ((self.capacity_for(level) as f64 * self.fill_factor).floor() as usize).max(1)
    }
}

pub(crate) struct RTreeInner<S: PageStore> {
    pub store: S,
    pub core: RwLock<TreeCore>,
    pub counters: StatCounters,
    pub ranking: RwLock<RankingParams>,
    write_node_commands: RwLock<Vec<Box<dyn NodeCommand>>>,
    read_node_commands: RwLock<Vec<Box<dyn NodeCommand>>>,
    delete_node_commands: RwLock<Vec<Box<dyn NodeCommand>>>,
}

/// A spatial index handle.
///
/// `RTree` is a cheap-clone handle: clones share the lock, the page store
/// and the root, so a clone is a view of the same tree rather than an
/// independent copy.
pub struct RTree<S: PageStore> {
    pub(crate) inner: Arc<RTreeInner<S>>,
}

impl<S: PageStore> Clone for RTree<S> {
    fn clone(&self) -> Self {
        RTree {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PageStore> RTree<S> {
    /// Creates a new tree, or reloads one when the config names an
    /// existing header page.
    pub fn new(config: TreeConfig, store: S) -> Result<RTree<S>> {
        config.validate()?;
        let inner = match config.index_identifier {
            Some(header_page) => RTreeInner::init_old(config, store, header_page)?,
            None => RTreeInner::init_new(config, store)?,
        };
        Ok(RTree {
            inner: Arc::new(inner),
        })
    }

    /// The header page this tree persists its metadata under; pass it as
    /// `index_identifier` to reopen the tree.
    pub fn header_id(&self) -> Option<PageId> {
        self.inner.core.read().header_id
    }

    /// Inserts a data entry. The shape's MBR is indexed; `payload` rides
    /// along on the leaf entry.
    pub fn insert_data(&self, payload: Option<Vec<u8>>, shape: &Shape, id: u64) -> Result<()> {
        let mut core = self.inner.core.write();
        if shape.dimension() != core.dimension {
            return Err(Error::shape(format!(
                "insert_data: shape has dimension {}, tree has {}",
                shape.dimension(),
                core.dimension
            )));
        }

        let mbr = shape.mbr();
        self.inner.insert_data_impl(&mut core, payload, mbr, id)?;
        core.data_count += 1;
        Ok(())
    }

    /// Deletes the entry `(shape.mbr(), id)`. Returns whether it existed.
    pub fn delete_data(&self, shape: &Shape, id: u64) -> Result<bool> {
        let mut core = self.inner.core.write();
        if shape.dimension() != core.dimension {
            return Err(Error::shape(format!(
                "delete_data: shape has dimension {}, tree has {}",
                shape.dimension(),
                core.dimension
            )));
        }

        let mbr = shape.mbr();
        let deleted = self.inner.delete_data_impl(&mut core, &mbr, id)?;
        if deleted {
            core.data_count -= 1;
        }
        Ok(deleted)
    }

    /// Emits every data entry whose MBR is contained in `query`.
    pub fn containment_query(&self, query: &Shape, visitor: &mut dyn Visitor) -> Result<()> {
        self.range_query(RangePredicate::Containment, query, visitor)
    }

    /// Emits every data entry whose MBR intersects `query`.
    pub fn intersection_query(&self, query: &Shape, visitor: &mut dyn Visitor) -> Result<()> {
        self.range_query(RangePredicate::Intersection, query, visitor)
    }

    /// Emits every data entry whose MBR covers the query point (or
    /// intersects the query region).
    pub fn point_location_query(&self, query: &Shape, visitor: &mut dyn Visitor) -> Result<()> {
        let region = match query {
            Shape::Point(p) => Region::from_point(p),
            Shape::Region(r) => r.clone(),
        };
        self.range_query(RangePredicate::Intersection, &Shape::Region(region), visitor)
    }

    fn range_query(
        &self,
        predicate: RangePredicate,
        query: &Shape,
        visitor: &mut dyn Visitor,
    ) -> Result<()> {
        let core = self.inner.core.read();
        if query.dimension() != core.dimension {
            return Err(Error::shape(format!(
                "range query: shape has dimension {}, tree has {}",
                query.dimension(),
                core.dimension
            )));
        }
        self.inner.range_query_impl(&core, predicate, query, visitor)
    }

    /// Best-first k-nearest-neighbor query with the default minimum
    /// distance comparator.
    pub fn nearest_neighbor_query(
        &self,
        k: usize,
        query: &Shape,
        visitor: &mut dyn Visitor,
    ) -> Result<()> {
        self.nearest_neighbor_query_with_comparator(k, query, visitor, &MinimumDistanceComparator)
    }

    /// Best-first k-nearest-neighbor query ordered by the supplied
    /// comparator. All boundary ties are reported, so more than `k`
    /// entries may be emitted.
    pub fn nearest_neighbor_query_with_comparator(
        &self,
        k: usize,
        query: &Shape,
        visitor: &mut dyn Visitor,
        comparator: &dyn NearestNeighborComparator,
    ) -> Result<()> {
        let core = self.inner.core.read();
        if query.dimension() != core.dimension {
            return Err(Error::shape(format!(
                "nearest_neighbor_query: shape has dimension {}, tree has {}",
                query.dimension(),
                core.dimension
            )));
        }
        self.inner
            .nearest_neighbor_impl(&core, k, query, visitor, comparator)
    }

    /// Hands nodes to `strategy`, which names each next node to load.
    pub fn query_strategy(&self, strategy: &mut dyn QueryStrategy) -> Result<()> {
        let core = self.inner.core.read();
        let mut next = core.root_id;
        loop {
            let node = self.inner.read_node(next)?;
            match strategy.next_entry(&node) {
                Some(id) => next = id,
                None => return Ok(()),
            }
        }
    }

    /// Structural audit: recomputes every node MBR from its children and
    /// rechecks the per-level node accounting. Returns `false` and logs
    /// diagnostics when the structure and the statistics disagree.
    pub fn is_index_valid(&self) -> Result<bool> {
        let core = self.inner.core.read();
        self.inner.validate_impl(&core)
    }

    /// Point-in-time statistics snapshot.
    pub fn statistics(&self) -> Statistics {
        let core = self.inner.core.read();
        Statistics {
            reads: StatCounters::get(&self.inner.counters.reads),
            writes: StatCounters::get(&self.inner.counters.writes),
            nodes: core.node_count,
            nodes_in_level: core.nodes_in_level.clone(),
            data: core.data_count,
            tree_height: core.tree_height,
            query_results: StatCounters::get(&self.inner.counters.query_results),
            visited_nodes: StatCounters::get(&self.inner.counters.visited_nodes),
        }
    }

    /// The configuration this tree runs with.
    pub fn index_properties(&self) -> TreeConfig {
        let core = self.inner.core.read();
        TreeConfig {
            variant: core.variant,
            fill_factor: core.fill_factor,
            index_capacity: core.index_capacity,
            leaf_capacity: core.leaf_capacity,
            near_minimum_overlap_factor: core.near_minimum_overlap_factor,
            split_distribution_factor: core.split_distribution_factor,
            reinsert_factor: core.reinsert_factor,
            dimension: core.dimension,
            index_identifier: core.header_id,
        }
    }

    /// Total page reads and writes served by the page store.
    pub fn io_count(&self) -> u64 {
        self.inner.store.io_count()
    }

    pub fn ranking_params(&self) -> RankingParams {
        *self.inner.ranking.read()
    }

    pub fn set_ranking_params(&self, params: RankingParams) {
        *self.inner.ranking.write() = params;
    }

    /// Persists the tree header so the index can be reopened through
    /// [`TreeConfig::index_identifier`].
    pub fn flush(&self) -> Result<()> {
        let mut core = self.inner.core.write();
        self.inner.store_header(&mut core)
    }

    pub fn add_write_node_command(&self, command: Box<dyn NodeCommand>) {
        self.inner.write_node_commands.write().push(command);
    }

    pub fn add_read_node_command(&self, command: Box<dyn NodeCommand>) {
        self.inner.read_node_commands.write().push(command);
    }

    pub fn add_delete_node_command(&self, command: Box<dyn NodeCommand>) {
        self.inner.delete_node_commands.write().push(command);
    }
}

impl<S: PageStore> RTreeInner<S> {
    fn init_new(config: TreeConfig, store: S) -> Result<RTreeInner<S>> {
        let core = TreeCore {
            root_id: 0,
            header_id: None,
            variant: config.variant,
            fill_factor: config.fill_factor,
            index_capacity: config.index_capacity,
            leaf_capacity: config.leaf_capacity,
            near_minimum_overlap_factor: config.near_minimum_overlap_factor,
            split_distribution_factor: config.split_distribution_factor,
            reinsert_factor: config.reinsert_factor,
            dimension: config.dimension,
            tree_height: 1,
            nodes_in_level: vec![0],
            node_count: 0,
            data_count: 0,
        };

        let inner = RTreeInner {
            store,
            core: RwLock::new(core),
            counters: StatCounters::new(),
            ranking: RwLock::new(RankingParams::default()),
            write_node_commands: RwLock::new(Vec::new()),
            read_node_commands: RwLock::new(Vec::new()),
            delete_node_commands: RwLock::new(Vec::new()),
        };

        {
            let mut core = inner.core.write();
            let mut root = Node::new(0, config.dimension);
            inner.write_node(&mut core, &mut root)?;
            core.root_id = root
                .identifier
                .ok_or_else(|| Error::invalid_state("root write did not assign a page"))?;
            inner.store_header(&mut core)?;
        }

        Ok(inner)
    }

    fn init_old(config: TreeConfig, store: S, header_page: PageId) -> Result<RTreeInner<S>> {
        let bytes = store.load_page(header_page)?;
        let (header, _): (TreeHeader, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
                .map_err(|e| Error::Serialization(e.to_string()))?;

        // Only the variant and the R* factors may be re-set on reload; the
        // rest comes from the stored header.
        let core = TreeCore {
            root_id: header.root_id,
            header_id: Some(header_page),
            variant: config.variant,
            fill_factor: header.fill_factor,
            index_capacity: header.index_capacity as usize,
            leaf_capacity: header.leaf_capacity as usize,
            near_minimum_overlap_factor: config.near_minimum_overlap_factor,
            split_distribution_factor: config.split_distribution_factor,
            reinsert_factor: config.reinsert_factor,
            dimension: header.dimension as usize,
            tree_height: header.tree_height,
            nodes_in_level: header.nodes_in_level,
            node_count: header.node_count,
            data_count: header.data_count,
        };

        Ok(RTreeInner {
            store,
            core: RwLock::new(core),
            counters: StatCounters::new(),
            ranking: RwLock::new(RankingParams::default()),
            write_node_commands: RwLock::new(Vec::new()),
            read_node_commands: RwLock::new(Vec::new()),
            delete_node_commands: RwLock::new(Vec::new()),
        })
    }

    fn store_header(&self, core: &mut TreeCore) -> Result<()> {
        let header = TreeHeader {
            root_id: core.root_id,
            variant: core.variant,
            fill_factor: core.fill_factor,
            index_capacity: core.index_capacity as u64,
            leaf_capacity: core.leaf_capacity as u64,
            near_minimum_overlap_factor: core.near_minimum_overlap_factor as u64,
            split_distribution_factor: core.split_distribution_factor,
            reinsert_factor: core.reinsert_factor,
            dimension: core.dimension as u64,
            node_count: core.node_count,
            data_count: core.data_count,
            tree_height: core.tree_height,
            nodes_in_level: core.nodes_in_level.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&header, bincode::config::legacy())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let page = self.store.store_page(core.header_id, &bytes)?;
        core.header_id = Some(page);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Node IO
    // ------------------------------------------------------------------

    pub(crate) fn read_node(&self, id: PageId) -> Result<Node> {
        let bytes = self.store.load_page(id).map_err(|e| {
            log::error!("read_node({}) failed: {}", id, e);
            e
        })?;
        let mut node = Node::from_page_bytes(&bytes)?;
        node.identifier = Some(id);
        StatCounters::bump(&self.counters.reads);

        for command in self.read_node_commands.read().iter() {
            command.execute(&node);
        }
        Ok(node)
    }

    fn write_node(&self, core: &mut TreeCore, node: &mut Node) -> Result<()> {
        let bytes = node.to_page_bytes()?;
        let assigned = self.store.store_page(node.identifier, &bytes)?;

        if node.identifier.is_none() {
            node.identifier = Some(assigned);
            core.node_count += 1;
            let level = node.level as usize;
            if core.nodes_in_level.len() <= level {
                core.nodes_in_level.resize(level + 1, 0);
            }
            core.nodes_in_level[level] += 1;
        }
        StatCounters::bump(&self.counters.writes);

        for command in self.write_node_commands.read().iter() {
            command.execute(node);
        }
        Ok(())
    }

    fn delete_node(&self, core: &mut TreeCore, node: &Node) -> Result<()> {
        let id = node
            .identifier
            .ok_or_else(|| Error::invalid_state("deleting an unassigned node"))?;
        self.store.delete_page(id)?;
        core.node_count -= 1;
        core.nodes_in_level[node.level as usize] -= 1;

        for command in self.delete_node_commands.read().iter() {
            command.execute(node);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    fn insert_data_impl(
        &self,
        core: &mut TreeCore,
        payload: Option<Vec<u8>>,
        mbr: Region,
        id: u64,
    ) -> Result<()> {
        let root = self.read_node(core.root_id)?;
        // One forced-reinsert opportunity per level per top-level insertion.
        let mut overflow = vec![false; root.level as usize];
        let entry = Entry::with_payload(mbr, id, payload);
        self.insert_entry_at_level(core, entry, 0, &mut overflow)
    }

    fn insert_entry_at_level(
        &self,
        core: &mut TreeCore,
        entry: Entry,
        level: u32,
        overflow: &mut Vec<bool>,
    ) -> Result<()> {
        let mut path = self.choose_subtree(core, &entry.mbr, level)?;
        let target = path
            .pop()
            .ok_or_else(|| Error::invalid_state("empty subtree path"))?;
        let node = self.read_node(target)?;
        self.insert_into_node(core, node, entry, &path, overflow)
    }

    /// Root-to-target descent picking, at each index node, the child whose
    /// MBR needs the least enlargement (R* minimizes overlap at the
    /// leaf-parent level instead). Returns the page ids of the traversed
    /// nodes, target last.
    fn choose_subtree(
        &self,
        core: &TreeCore,
        mbr: &Region,
        target_level: u32,
    ) -> Result<Vec<PageId>> {
        let mut path = Vec::new();
        let mut id = core.root_id;
        loop {
            let node = self.read_node(id)?;
            path.push(id);
            if node.level == target_level {
                return Ok(path);
            }

            let child = if core.variant == TreeVariant::Rstar && node.level == 1 {
                self.choose_least_overlap(core, &node, mbr)
            } else {
                least_enlargement_child(&node, mbr)
            };
            id = node.entries[child].id;
        }
    }

    /// R* leaf-parent rule: cost the `near_minimum_overlap_factor`
    /// candidates with the least enlargement, pick the one whose
    /// enlargement adds the least overlap with its siblings.
    fn choose_least_overlap(&self, core: &TreeCore, node: &Node, mbr: &Region) -> usize {
        let mut order: Vec<usize> = (0..node.entries.len()).collect();
        order.sort_by(|&a, &b| {
            let ea = node.entries[a].mbr.enlargement(mbr);
            let eb = node.entries[b].mbr.enlargement(mbr);
            ea.total_cmp(&eb)
                .then_with(|| node.entries[a].mbr.area().total_cmp(&node.entries[b].mbr.area()))
        });
        let candidates = &order[..core.near_minimum_overlap_factor.min(order.len())];

        let mut best = candidates[0];
        let mut best_overlap = f64::INFINITY;
        let mut best_enlargement = f64::INFINITY;

        for &index in candidates {
            let enlarged = node.entries[index].mbr.union(mbr);
            let mut overlap_delta = 0.0;
            for (sibling, other) in node.entries.iter().enumerate() {
                if sibling == index {
                    continue;
                }
                overlap_delta += enlarged.intersecting_area(&other.mbr)
                    - node.entries[index].mbr.intersecting_area(&other.mbr);
            }
            let enlargement = node.entries[index].mbr.enlargement(mbr);

            if overlap_delta < best_overlap
                || (overlap_delta == best_overlap && enlargement < best_enlargement)
            {
                best_overlap = overlap_delta;
                best_enlargement = enlargement;
                best = index;
            }
        }
        best
    }

    fn insert_into_node(
        &self,
        core: &mut TreeCore,
        mut node: Node,
        entry: Entry,
        ancestors: &[PageId],
        overflow: &mut Vec<bool>,
    ) -> Result<()> {
        let capacity = core.capacity_for(node.level);
        if node.entries.len() < capacity {
            node.insert_entry(entry);
            self.write_node(core, &mut node)?;
            return self.update_path_mbrs(core, ancestors, &node);
        }

        // Overflow. R* gets one forced reinsert per level per insertion;
        // everything else (and the root) splits.
        let level = node.level as usize;
        let at_root = node.identifier == Some(core.root_id);
        if core.variant == TreeVariant::Rstar
            && !at_root
            && level < overflow.len()
            && !overflow[level]
        {
            overflow[level] = true;
            self.reinsert_overflow(core, node, entry, ancestors, overflow)
        } else {
            self.split_overflow(core, node, entry, ancestors, overflow)
        }
    }

    /// R* forced reinsert: drop the farthest entries, shrink the node and
    /// insert them again at the same level.
    fn reinsert_overflow(
        &self,
        core: &mut TreeCore,
        mut node: Node,
        entry: Entry,
        ancestors: &[PageId],
        overflow: &mut Vec<bool>,
    ) -> Result<()> {
        let level = node.level;
        let capacity = core.capacity_for(level);
        node.insert_entry(entry);

        let count = ((capacity as f64 * core.reinsert_factor) as usize)
            .clamp(1, node.entries.len() - 1);
        let center = node.node_mbr.center();
        let removed = split::take_farthest(&mut node.entries, &center, count);

        node.recompute_mbr();
        self.write_node(core, &mut node)?;
        self.update_path_mbrs(core, ancestors, &node)?;

        for orphan in removed {
            self.insert_entry_at_level(core, orphan, level, overflow)?;
        }
        Ok(())
    }

    fn split_overflow(
        &self,
        core: &mut TreeCore,
        mut node: Node,
        entry: Entry,
        ancestors: &[PageId],
        overflow: &mut Vec<bool>,
    ) -> Result<()> {
        let level = node.level;
        let dimension = core.dimension;
        let old_id = node
            .identifier
            .ok_or_else(|| Error::invalid_state("splitting an unassigned node"))?;

        node.insert_entry(entry);
        let (group_a, group_b) = split::split_entries(
            core.variant,
            std::mem::take(&mut node.entries),
            core.min_fill_for(level),
            core.split_distribution_factor,
            dimension,
        );

        let mut left = Node::new(level, dimension);
        left.identifier = Some(old_id);
        for e in group_a {
            left.insert_entry(e);
        }
        let mut right = Node::new(level, dimension);
        for e in group_b {
            right.insert_entry(e);
        }

        self.write_node(core, &mut left)?;
        self.write_node(core, &mut right)?;
        let right_id = right
            .identifier
            .ok_or_else(|| Error::invalid_state("split write did not assign a page"))?;

        if old_id == core.root_id {
            // Grow the tree by one level.
            let mut new_root = Node::new(level + 1, dimension);
            new_root.insert_entry(Entry::new(left.node_mbr.clone(), old_id));
            new_root.insert_entry(Entry::new(right.node_mbr.clone(), right_id));
            self.write_node(core, &mut new_root)?;
            core.root_id = new_root
                .identifier
                .ok_or_else(|| Error::invalid_state("root write did not assign a page"))?;
            core.tree_height += 1;
            return Ok(());
        }

        let (&parent_id, grand) = ancestors
            .split_last()
            .ok_or_else(|| Error::invalid_state("split below root without a parent"))?;
        let mut parent = self.read_node(parent_id)?;
        let slot = parent
            .entry_slot(old_id)
            .ok_or_else(|| Error::invalid_state("parent lost its child entry"))?;
        parent.entries[slot].mbr = left.node_mbr.clone();
        parent.recompute_mbr();

        let new_entry = Entry::new(right.node_mbr.clone(), right_id);
        self.insert_into_node(core, parent, new_entry, grand, overflow)
    }

    /// Rewrites ancestor entry MBRs after `child` changed, recomputing
    /// each node MBR exactly on the way to the root.
    fn update_path_mbrs(
        &self,
        core: &mut TreeCore,
        ancestors: &[PageId],
        child: &Node,
    ) -> Result<()> {
        let mut child_id = child
            .identifier
            .ok_or_else(|| Error::invalid_state("unassigned child in path update"))?;
        let mut child_mbr = child.node_mbr.clone();

        for &parent_id in ancestors.iter().rev() {
            let mut parent = self.read_node(parent_id)?;
            let slot = parent
                .entry_slot(child_id)
                .ok_or_else(|| Error::invalid_state("parent lost its child entry"))?;
            parent.entries[slot].mbr = child_mbr;
            parent.recompute_mbr();
            self.write_node(core, &mut parent)?;

            child_id = parent_id;
            child_mbr = parent.node_mbr.clone();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    fn delete_data_impl(&self, core: &mut TreeCore, mbr: &Region, id: u64) -> Result<bool> {
        let root = self.read_node(core.root_id)?;
        let mut path = Vec::new();
        let leaf_id = match self.find_leaf(&root, mbr, id, &mut path)? {
            Some(leaf_id) => leaf_id,
            None => return Ok(false),
        };

        let mut leaf = self.read_node(leaf_id)?;
        let slot = leaf
            .entries
            .iter()
            .position(|e| e.id == id && e.mbr == *mbr)
            .ok_or_else(|| Error::invalid_state("located leaf lost the entry"))?;
        leaf.delete_entry(slot);

        self.condense_tree(core, leaf, path)?;
        Ok(true)
    }

    /// Depth-first descent through every child whose MBR contains the
    /// deletion MBR, restoring `path` (root..parent) when found.
    fn find_leaf(
        &self,
        node: &Node,
        mbr: &Region,
        id: u64,
        path: &mut Vec<PageId>,
    ) -> Result<Option<PageId>> {
        if node.is_leaf() {
            if node.entries.iter().any(|e| e.id == id && e.mbr == *mbr) {
                let leaf_id = node
                    .identifier
                    .ok_or_else(|| Error::invalid_state("leaf without identifier"))?;
                return Ok(Some(leaf_id));
            }
            return Ok(None);
        }

        for entry in &node.entries {
            if entry.mbr.contains(mbr) {
                path.push(
                    node.identifier
                        .ok_or_else(|| Error::invalid_state("node without identifier"))?,
                );
                let child = self.read_node(entry.id)?;
                if let Some(found) = self.find_leaf(&child, mbr, id, path)? {
                    return Ok(Some(found));
                }
                path.pop();
            }
        }
        Ok(None)
    }

    /// Walks from the mutated leaf to the root: underfull nodes are
    /// detached and their surviving entries queued for reinsertion at
    /// their original level; ancestor MBRs shrink; a root with a single
    /// child collapses into it.
    fn condense_tree(
        &self,
        core: &mut TreeCore,
        node: Node,
        path: Vec<PageId>,
    ) -> Result<()> {
        let mut orphans: Vec<(Entry, u32)> = Vec::new();
        let mut current = node;
        let mut path = path;

        loop {
            if path.is_empty() {
                // current is the root.
                if current.level > 0 && current.entries.len() == 1 {
                    let child_id = current.entries[0].id;
                    self.delete_node(core, &current)?;
                    core.root_id = child_id;
                    core.tree_height -= 1;
                    core.nodes_in_level.truncate(core.tree_height as usize);
                    current = self.read_node(child_id)?;
                    continue;
                }
                self.write_node(core, &mut current)?;
                break;
            }

            let parent_id = *path
                .last()
                .ok_or_else(|| Error::invalid_state("empty deletion path"))?;
            let mut parent = self.read_node(parent_id)?;
            let current_id = current
                .identifier
                .ok_or_else(|| Error::invalid_state("unassigned node in deletion path"))?;
            let slot = parent
                .entry_slot(current_id)
                .ok_or_else(|| Error::invalid_state("parent lost its child entry"))?;

            if current.entries.len() < core.min_fill_for(current.level) {
                parent.entries.remove(slot);
                let level = current.level;
                orphans.extend(current.entries.drain(..).map(|e| (e, level)));
                self.delete_node(core, &current)?;
            } else {
                self.write_node(core, &mut current)?;
                parent.entries[slot].mbr = current.node_mbr.clone();
            }

            parent.recompute_mbr();
            path.pop();
            current = parent;
        }

        for (entry, level) in orphans {
            let root = self.read_node(core.root_id)?;
            let mut overflow = vec![false; root.level as usize];
            self.insert_entry_at_level(core, entry, level, &mut overflow)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn range_query_impl(
        &self,
        core: &TreeCore,
        predicate: RangePredicate,
        query: &Shape,
        visitor: &mut dyn Visitor,
    ) -> Result<()> {
        let root = self.read_node(core.root_id)?;
        let mut stack = Vec::new();
        if !root.entries.is_empty() && query.intersects(&root.node_mbr) {
            stack.push(root);
        }

        while let Some(node) = stack.pop() {
            visitor.visit_node(&node);

            if node.is_leaf() {
                for entry in &node.entries {
                    let matches = match predicate {
                        RangePredicate::Containment => query.contains(&entry.mbr),
                        RangePredicate::Intersection => query.intersects(&entry.mbr),
                    };
                    if matches {
                        visitor.visit_data(&DataItem {
                            id: entry.id,
                            mbr: entry.mbr.clone(),
                            payload: entry.payload.clone(),
                        });
                        StatCounters::bump(&self.counters.query_results);
                    }
                }
            } else {
                for entry in &node.entries {
                    if query.intersects(&entry.mbr) {
                        stack.push(self.read_node(entry.id)?);
                    }
                }
            }
        }
        Ok(())
    }

    fn nearest_neighbor_impl(
        &self,
        core: &TreeCore,
        k: usize,
        query: &Shape,
        visitor: &mut dyn Visitor,
        comparator: &dyn NearestNeighborComparator,
    ) -> Result<()> {
        let mut queue: BinaryHeap<std::cmp::Reverse<NnEntry>> = BinaryHeap::new();
        queue.push(std::cmp::Reverse(NnEntry {
            cost: 0.0,
            tie_id: core.root_id,
            kind: NnKind::Node(core.root_id),
        }));

        let mut count = 0usize;
        let mut k_nearest = 0.0f64;

        while let Some(std::cmp::Reverse(first)) = queue.pop() {
            match first.kind {
                NnKind::Node(id) => {
                    let node = self.read_node(id)?;
                    visitor.visit_node(&node);

                    for entry in node.entries {
                        let cost = comparator.minimum_distance(query, &entry.mbr);
                        let kind = if node.level == 0 {
                            NnKind::Data(DataItem {
                                id: entry.id,
                                mbr: entry.mbr,
                                payload: entry.payload,
                            })
                        } else {
                            NnKind::Node(entry.id)
                        };
                        queue.push(std::cmp::Reverse(NnEntry {
                            cost,
                            tie_id: entry.id,
                            kind,
                        }));
                    }
                }
                NnKind::Data(item) => {
                    // Report every tie at the boundary: keep emitting past k
                    // while the cost equals the kth cost.
                    if count >= k && first.cost > k_nearest {
                        break;
                    }
                    visitor.visit_data(&item);
                    StatCounters::bump(&self.counters.query_results);
                    count += 1;
                    k_nearest = first.cost;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn validate_impl(&self, core: &TreeCore) -> Result<bool> {
        let mut valid = true;
        let root = self.read_node(core.root_id)?;

        if root.level != core.tree_height - 1 {
            log::error!(
                "invalid tree height: root level {} with height {}",
                root.level,
                core.tree_height
            );
            return Ok(false);
        }

        let mut nodes_in_level = vec![0u64; core.tree_height as usize];
        nodes_in_level[root.level as usize] = 1;

        let root_mbr = root.node_mbr.clone();
        let mut stack = vec![(root, root_mbr)];

        while let Some((node, parent_mbr)) = stack.pop() {
            let mut recomputed = Region::infinite(core.dimension);
            for entry in &node.entries {
                recomputed.expand(&entry.mbr);
            }

            if recomputed != node.node_mbr {
                log::error!(
                    "node {:?}: stored MBR differs from the union of its entries",
                    node.identifier
                );
                valid = false;
            } else if recomputed != parent_mbr {
                log::error!(
                    "node {:?}: parent entry MBR is stale",
                    node.identifier
                );
                valid = false;
            }

            if node.level > 0 {
                for entry in &node.entries {
                    let child = self.read_node(entry.id)?;
                    nodes_in_level[child.level as usize] += 1;
                    stack.push((child, entry.mbr.clone()));
                }
            }
        }

        let mut total = 0u64;
        for level in 0..core.tree_height as usize {
            if nodes_in_level[level] != core.nodes_in_level[level] {
                log::error!(
                    "level {}: counted {} nodes, statistics say {}",
                    level,
                    nodes_in_level[level],
                    core.nodes_in_level[level]
                );
                valid = false;
            }
            total += core.nodes_in_level[level];
        }
        if total != core.node_count {
            log::error!(
                "node count {} does not match per-level sum {}",
                core.node_count,
                total
            );
            valid = false;
        }

        Ok(valid)
    }
}

/// Child slot requiring the least enlargement, ties by smaller area.
fn least_enlargement_child(node: &Node, mbr: &Region) -> usize {
    let mut best = 0;
    let mut best_enlargement = f64::INFINITY;
    let mut best_area = f64::INFINITY;

    for (index, entry) in node.entries.iter().enumerate() {
        let enlargement = entry.mbr.enlargement(mbr);
        let area = entry.mbr.area();
        if enlargement < best_enlargement
            || (enlargement == best_enlargement && area < best_area)
        {
            best_enlargement = enlargement;
            best_area = area;
            best = index;
        }
    }
    best
}

/// Priority-queue element of the k-NN traversal.
struct NnEntry {
    cost: f64,
    tie_id: u64,
    kind: NnKind,
}

enum NnKind {
    Node(PageId),
    Data(DataItem),
}

impl PartialEq for NnEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.tie_id == other.tie_id
    }
}

impl Eq for NnEntry {}

impl PartialOrd for NnEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for NnEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.tie_id.cmp(&other.tie_id))
    }
}
