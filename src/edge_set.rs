use rustc_hash::FxHashSet;

use crate::VertexId;

/// Symmetric accumulator for edges discovered during one spread burst.
///
/// Every undirected edge is kept as both directed tuples, in the order they
/// were first recorded, so the heartbeat built from it is deterministic.
#[derive(Debug, Default, Clone)]
pub struct EdgeSet {
    edges: Vec<(VertexId, VertexId)>,
    seen: FxHashSet<(VertexId, VertexId)>,
}

impl EdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: VertexId, to: VertexId) {
        for pair in [(from, to), (to, from)] {
            if self.seen.insert(pair) {
                self.edges.push(pair);
            }
        }
    }

    pub fn contains(&self, from: VertexId, to: VertexId) -> bool {
        self.seen.contains(&(from, to))
    }

    /// Number of directed tuples held.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(VertexId, VertexId)> + '_ {
        self.edges.iter()
    }

    pub fn list_rep(self) -> Vec<(VertexId, VertexId)> {
        self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_is_symmetric() {
        let mut set = EdgeSet::new();
        set.add_edge(1, 2);
        assert!(set.contains(1, 2));
        assert!(set.contains(2, 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut set = EdgeSet::new();
        set.add_edge(1, 2);
        set.add_edge(2, 1);
        set.add_edge(1, 2);
        assert_eq!(set.list_rep(), vec![(1, 2), (2, 1)]);
    }

    #[test]
    fn test_self_loop_stored_once() {
        let mut set = EdgeSet::new();
        set.add_edge(5, 5);
        assert_eq!(set.len(), 1);
    }
}
