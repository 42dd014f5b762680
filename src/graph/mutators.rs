//! Graph surgery
//!
//! Edge creation, detaching, and node removal with neighbour reconnection.
//! Removal is two-phase: nodes and edges are flagged here and erased later by
//! [`Graph::remove_dropped`] / [`Graph::remove_dropped_edges`], so passes can
//! drop nodes while walking a snapshot of the node list.

use crate::error::{CompileError, CompileResult};

use super::context::Graph;
use super::node::{Edge, EdgeId, EdgeList, NodeId, Shape};

/// Replace `old` in `list` by `new`, keeping its position
fn splice_edge(list: &mut EdgeList, old: EdgeId, new: &[EdgeId]) {
    if let Some(pos) = list.iter().position(|e| *e == old) {
        list.remove(pos);
        list.insert_many(pos, new.iter().copied());
    }
}

impl Graph {
    // ========================================================================
    // Edge creation
    // ========================================================================

    /// Connect `parent` to `child` with explicit ports
    ///
    /// The edge is inserted into the producer's child list at `output_num`
    /// and into the consumer's parent list at `input_num` (clamped to the
    /// list length).
    pub fn connect(
        &mut self,
        parent: NodeId,
        child: NodeId,
        output_num: usize,
        input_num: usize,
        dims: &[usize],
    ) -> CompileResult<EdgeId> {
        if !self.is_live(parent) {
            return Err(CompileError::NodeNotFound(parent.0));
        }
        if !self.is_live(child) {
            return Err(CompileError::NodeNotFound(child.0));
        }

        let id = self.alloc_edge(Edge {
            parent,
            child,
            input_num,
            output_num,
            dims: Shape::from_slice(dims),
            dropped: false,
        });

        let producer = self.try_node_mut(parent)?;
        let pos = output_num.min(producer.child_edges.len());
        producer.child_edges.insert(pos, id);

        let consumer = self.try_node_mut(child)?;
        let pos = input_num.min(consumer.parent_edges.len());
        consumer.parent_edges.insert(pos, id);

        Ok(id)
    }

    /// Connect `parent` to `child` on the next free ports
    pub fn link(&mut self, parent: NodeId, child: NodeId, dims: &[usize]) -> CompileResult<EdgeId> {
        let output_num = self.child_count(parent);
        let input_num = self.parent_count(child);
        self.connect(parent, child, output_num, input_num, dims)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Flag an edge as dropped and unhook it from both endpoints
    ///
    /// Returns the edge as it was, or `None` if it was already gone.
    pub fn detach_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.get_mut(&id).filter(|e| !e.dropped)?;
        edge.dropped = true;
        let edge = edge.clone();

        if let Some(producer) = self.nodes.get_mut(&edge.parent) {
            producer.child_edges.retain(|e| *e != id);
        }
        if let Some(consumer) = self.nodes.get_mut(&edge.child) {
            consumer.parent_edges.retain(|e| *e != id);
        }

        Some(edge)
    }

    /// Drop a node without reconnecting its neighbours
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let edges: Vec<EdgeId> = match self.nodes.get(&id) {
            Some(node) => node
                .parent_edges
                .iter()
                .chain(node.child_edges.iter())
                .copied()
                .collect(),
            None => return false,
        };

        for edge in edges {
            self.detach_edge(edge);
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.dropped = true;
        }
        true
    }

    /// Drop a node and connect every parent directly to every child
    ///
    /// For parent edge `i` and child edge `j` a new edge is created with the
    /// child edge's output port and the parent edge's input port plus `j`.
    /// In each neighbour's edge list the new edges take the slot the removed
    /// edge occupied, so consumers see their inputs in unchanged order.
    ///
    /// Returns the number of edges created, or `None` if the node is absent.
    pub fn drop_node(&mut self, id: NodeId) -> Option<usize> {
        let (parent_edges, child_edges) = {
            let node = self.nodes.get(&id)?;
            (node.parent_edges.clone(), node.child_edges.clone())
        };

        let parents: Vec<Option<Edge>> = parent_edges
            .iter()
            .map(|e| self.live_edge(*e).cloned())
            .collect();
        let children: Vec<Option<Edge>> = child_edges
            .iter()
            .map(|e| self.live_edge(*e).cloned())
            .collect();

        let mut via_parent: Vec<Vec<EdgeId>> = vec![Vec::new(); parents.len()];
        let mut via_child: Vec<Vec<EdgeId>> = vec![Vec::new(); children.len()];

        for (i, parent_edge) in parents.iter().enumerate() {
            let parent_edge = match parent_edge {
                Some(e) if self.is_live(e.parent) => e,
                _ => continue,
            };

            for (j, child_edge) in children.iter().enumerate() {
                let child_edge = match child_edge {
                    Some(e) if self.is_live(e.child) => e,
                    _ => continue,
                };

                let new_id = self.alloc_edge(Edge {
                    parent: parent_edge.parent,
                    child: child_edge.child,
                    input_num: parent_edge.input_num + j,
                    output_num: child_edge.output_num,
                    dims: child_edge.dims.clone(),
                    dropped: false,
                });
                via_parent[i].push(new_id);
                via_child[j].push(new_id);
            }
        }

        for (i, old) in parent_edges.iter().enumerate() {
            if let Some(edge) = self.edges.get_mut(old) {
                edge.dropped = true;
            }
            if let Some(parent_edge) = &parents[i] {
                if let Some(producer) = self.nodes.get_mut(&parent_edge.parent) {
                    splice_edge(&mut producer.child_edges, *old, &via_parent[i]);
                }
            }
        }

        for (j, old) in child_edges.iter().enumerate() {
            if let Some(edge) = self.edges.get_mut(old) {
                edge.dropped = true;
            }
            if let Some(child_edge) = &children[j] {
                if let Some(consumer) = self.nodes.get_mut(&child_edge.child) {
                    splice_edge(&mut consumer.parent_edges, *old, &via_child[j]);
                }
            }
        }

        let node = self.nodes.get_mut(&id)?;
        node.parent_edges.clear();
        node.child_edges.clear();
        node.dropped = true;

        Some(via_parent.iter().map(Vec::len).sum())
    }
}
