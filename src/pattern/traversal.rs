//! Graph traversal and reachability
//!
//! [`is_data_dependency`] is the safety query behind in-place fusion: a
//! buffer may only be overwritten once every other reader of it is known to
//! run earlier.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

/// Direction of traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow child edges
    Forward,
    /// Follow parent edges
    Backward,
}

/// BFS traversal iterator over live nodes
pub struct BfsIterator<'a> {
    graph: &'a Graph,
    queue: VecDeque<NodeId>,
    visited: FxHashSet<NodeId>,
    direction: Direction,
}

impl<'a> BfsIterator<'a> {
    /// Create a new BFS iterator starting from the given node
    pub fn new(graph: &'a Graph, start: NodeId, direction: Direction) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = FxHashSet::default();

        if graph.is_live(start) {
            queue.push_back(start);
            visited.insert(start);
        }

        Self {
            graph,
            queue,
            visited,
            direction,
        }
    }

    /// Create forward BFS (follows consumers)
    pub fn forward(graph: &'a Graph, start: NodeId) -> Self {
        Self::new(graph, start, Direction::Forward)
    }

    /// Create backward BFS (follows producers)
    pub fn backward(graph: &'a Graph, start: NodeId) -> Self {
        Self::new(graph, start, Direction::Backward)
    }
}

impl<'a> Iterator for BfsIterator<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;

        let neighbours = match self.direction {
            Direction::Forward => self.graph.children(id),
            Direction::Backward => self.graph.parents(id),
        };
        for next in neighbours {
            if self.graph.is_live(next) && self.visited.insert(next) {
                self.queue.push_back(next);
            }
        }

        Some(id)
    }
}

/// Whether `child` consumes, directly or transitively, data produced by `parent`
///
/// Breadth-first search along child edges starting at `parent`. A node is
/// not its own dependency: the path must contain at least one edge.
pub fn is_data_dependency(graph: &Graph, parent: NodeId, child: NodeId) -> bool {
    let mut visited = FxHashSet::default();
    let mut queue: VecDeque<NodeId> = graph.children(parent).into_iter().collect();

    while let Some(id) = queue.pop_front() {
        if id == child {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        queue.extend(graph.children(id));
    }

    false
}

/// Whether a path of length zero or more leads from `from` to `to`
pub fn has_path(graph: &Graph, from: NodeId, to: NodeId) -> bool {
    from == to || is_data_dependency(graph, from, to)
}

/// All live nodes reachable from `start` in the given direction, excluding `start`
pub fn reachable_nodes(graph: &Graph, start: NodeId, direction: Direction) -> Vec<NodeId> {
    BfsIterator::new(graph, start, direction).skip(1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpKind;
    use proptest::prelude::*;

    fn make_chain(len: usize) -> (Graph, Vec<NodeId>) {
        let mut graph = Graph::new();
        let ids: Vec<NodeId> = (0..len)
            .map(|i| graph.add_node(OpKind::Copy, format!("n{}", i), None))
            .collect();
        for pair in ids.windows(2) {
            graph.link(pair[0], pair[1], &[1]).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn test_dependency_along_chain() {
        let (graph, ids) = make_chain(4);

        assert!(is_data_dependency(&graph, ids[0], ids[3]));
        assert!(is_data_dependency(&graph, ids[1], ids[2]));
        assert!(!is_data_dependency(&graph, ids[3], ids[0]));
    }

    #[test]
    fn test_no_self_dependency() {
        let (graph, ids) = make_chain(2);
        assert!(!is_data_dependency(&graph, ids[0], ids[0]));
        assert!(has_path(&graph, ids[0], ids[0]));
    }

    #[test]
    fn test_dependency_ignores_dropped_edges() {
        let (mut graph, ids) = make_chain(3);
        graph.remove_node(ids[1]);

        assert!(!is_data_dependency(&graph, ids[0], ids[2]));
    }

    #[test]
    fn test_bfs_order() {
        let mut graph = Graph::new();
        let root = graph.add_node(OpKind::Input, "root", None);
        let a = graph.add_node(OpKind::Copy, "a", None);
        let b = graph.add_node(OpKind::Copy, "b", None);
        let c = graph.add_node(OpKind::Copy, "c", None);
        graph.link(root, a, &[1]).unwrap();
        graph.link(root, b, &[1]).unwrap();
        graph.link(a, c, &[1]).unwrap();

        let visited: Vec<NodeId> = BfsIterator::forward(&graph, root).collect();
        assert_eq!(visited, vec![root, a, b, c]);

        let back = reachable_nodes(&graph, c, Direction::Backward);
        assert_eq!(back, vec![a, root]);
    }

    /// Reference reachability over an adjacency matrix
    fn closure(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<bool>> {
        let mut reach = vec![vec![false; n]; n];
        for &(a, b) in edges {
            reach[a][b] = true;
        }
        for k in 0..n {
            for i in 0..n {
                for j in 0..n {
                    if reach[i][k] && reach[k][j] {
                        reach[i][j] = true;
                    }
                }
            }
        }
        reach
    }

    proptest! {
        #[test]
        fn prop_bfs_matches_transitive_closure(
            n in 2usize..10,
            raw in prop::collection::vec((0usize..10, 0usize..10), 0..25)
        ) {
            // orient every edge from lower to higher index to stay acyclic
            let edges: Vec<(usize, usize)> = raw
                .into_iter()
                .map(|(a, b)| (a % n, b % n))
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect();

            let mut graph = Graph::new();
            let ids: Vec<NodeId> = (0..n)
                .map(|i| graph.add_node(OpKind::Copy, format!("n{}", i), None))
                .collect();
            for &(a, b) in &edges {
                graph.link(ids[a], ids[b], &[1]).unwrap();
            }

            let reach = closure(n, &edges);
            for a in 0..n {
                for b in 0..n {
                    prop_assert_eq!(is_data_dependency(&graph, ids[a], ids[b]), reach[a][b]);
                }
            }
        }
    }
}
