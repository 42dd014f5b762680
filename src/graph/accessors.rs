//! Higher-level graph queries
//!
//! Lookup by kind, ancestry, and topological ordering.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{CompileError, CompileResult};

use super::context::Graph;
use super::layer::OpKind;
use super::node::NodeId;

impl Graph {
    // ========================================================================
    // Pattern matching helpers
    // ========================================================================

    /// Live nodes of the given kind, in list order
    pub fn find_nodes_by_kind(&self, kind: OpKind) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| !n.is_dropped() && n.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether a live node of the given kind exists
    pub fn has_kind(&self, kind: OpKind) -> bool {
        self.nodes().any(|(_, n)| !n.is_dropped() && n.kind == kind)
    }

    /// Whether an edge runs directly from `first` to `second`
    pub fn are_adjacent(&self, first: NodeId, second: NodeId) -> bool {
        self.children(first).contains(&second)
    }

    /// All transitive producers of a node
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = FxHashSet::default();
        self.collect_predecessors(id, &mut result, &mut visited);
        result
    }

    fn collect_predecessors(
        &self,
        id: NodeId,
        result: &mut Vec<NodeId>,
        visited: &mut FxHashSet<NodeId>,
    ) {
        for parent in self.parents(id) {
            if visited.insert(parent) {
                result.push(parent);
                self.collect_predecessors(parent, result, visited);
            }
        }
    }

    /// All transitive consumers of a node
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = FxHashSet::default();
        self.collect_successors(id, &mut result, &mut visited);
        result
    }

    fn collect_successors(
        &self,
        id: NodeId,
        result: &mut Vec<NodeId>,
        visited: &mut FxHashSet<NodeId>,
    ) {
        for child in self.children(id) {
            if visited.insert(child) {
                result.push(child);
                self.collect_successors(child, result, visited);
            }
        }
    }

    /// Live nodes in topological order (Kahn's algorithm)
    ///
    /// Ties are broken by node-list order. Fails if the live subgraph has a
    /// cycle.
    pub fn topological_order(&self) -> CompileResult<Vec<NodeId>> {
        let live: Vec<NodeId> = self
            .nodes()
            .filter(|(_, n)| !n.is_dropped())
            .map(|(id, _)| id)
            .collect();

        let mut in_degree: FxHashMap<NodeId, usize> = live
            .iter()
            .map(|id| {
                let degree = self
                    .parents(*id)
                    .into_iter()
                    .filter(|p| self.is_live(*p))
                    .count();
                (*id, degree)
            })
            .collect();

        let mut queue: VecDeque<NodeId> = live
            .iter()
            .copied()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(live.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for child in self.children(id) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if order.len() != live.len() {
            let stuck: Vec<String> = live
                .iter()
                .filter(|id| !order.contains(id))
                .filter_map(|id| self.node(*id).map(|n| n.name.clone()))
                .collect();
            return Err(CompileError::CycleDetected(stuck.join(", ")));
        }

        Ok(order)
    }
}
