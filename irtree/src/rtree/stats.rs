//! Operation statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated on the read path.
///
/// These are relaxed atomics so concurrent readers can bump them while
/// holding only the read lock; the counts are an approximation under
/// reader concurrency.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub query_results: AtomicU64,
    pub visited_nodes: AtomicU64,
}

impl StatCounters {
    pub fn new() -> StatCounters {
        StatCounters::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// A point-in-time snapshot of tree statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Node pages read from the store.
    pub reads: u64,
    /// Node pages written to the store.
    pub writes: u64,
    /// Total number of nodes.
    pub nodes: u64,
    /// Node count per level, leaves at index 0.
    pub nodes_in_level: Vec<u64>,
    /// Number of data entries.
    pub data: u64,
    /// Height of the tree; a lone root leaf has height 1.
    pub tree_height: u32,
    /// Data entries emitted by queries.
    pub query_results: u64,
    /// Nodes expanded by top-k searches.
    pub visited_nodes: u64,
}

impl std::fmt::Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Reads: {}", self.reads)?;
        writeln!(f, "Writes: {}", self.writes)?;
        writeln!(f, "Nodes: {}", self.nodes)?;
        writeln!(f, "Data: {}", self.data)?;
        writeln!(f, "Tree height: {}", self.tree_height)?;
        for (level, count) in self.nodes_in_level.iter().enumerate() {
            writeln!(f, "Level {} nodes: {}", level, count)?;
        }
        writeln!(f, "Query results: {}", self.query_results)?;
        write!(f, "Visited nodes: {}", self.visited_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_bump() {
        let counters = StatCounters::new();
        StatCounters::bump(&counters.reads);
        StatCounters::bump(&counters.reads);
        StatCounters::bump(&counters.writes);

        assert_eq!(StatCounters::get(&counters.reads), 2);
        assert_eq!(StatCounters::get(&counters.writes), 1);
        assert_eq!(StatCounters::get(&counters.query_results), 0);
    }

    #[test]
    fn test_statistics_display() {
        let stats = Statistics {
            reads: 10,
            writes: 4,
            nodes: 3,
            nodes_in_level: vec![2, 1],
            data: 8,
            tree_height: 2,
            query_results: 5,
            visited_nodes: 7,
        };
        let text = stats.to_string();
        assert!(text.contains("Nodes: 3"));
        assert!(text.contains("Level 1 nodes: 1"));
    }
}
