//! Operator graph
//!
//! `Graph` exclusively owns every node and edge. Node and edge lists keep
//! insertion order, which is not a topological order.

use crate::error::{CompileError, CompileResult};

use super::layer::{LayerDesc, OpKind};
use super::node::{Edge, EdgeId, EdgeMap, Node, NodeId, NodeMap};

/// Mutable operator DAG
#[derive(Debug, Default)]
pub struct Graph {
    pub(crate) nodes: NodeMap,
    pub(crate) edges: EdgeMap,
    outputs: Vec<NodeId>,
    next_node: usize,
    next_edge: usize,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Add a node
    pub fn add_node(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        layer: Option<LayerDesc>,
    ) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(id, Node::new(kind, name.into(), layer));
        id
    }

    /// Add a node named after its layer
    pub fn add_layer(&mut self, kind: OpKind, layer: LayerDesc) -> NodeId {
        let name = layer.name.clone();
        self.add_node(kind, name, Some(layer))
    }

    /// Designate a node as a network output
    pub fn mark_output(&mut self, id: NodeId) {
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
    }

    /// Move the output designation from `old` to `new`
    ///
    /// Used when a fusion absorbs the node that produced a network output.
    pub fn replace_output(&mut self, old: NodeId, new: NodeId) {
        if let Some(pos) = self.outputs.iter().position(|id| *id == old) {
            if self.outputs.contains(&new) {
                self.outputs.remove(pos);
            } else {
                self.outputs[pos] = new;
            }
        }
    }

    pub(crate) fn alloc_edge(&mut self, edge: Edge) -> EdgeId {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(id, edge);
        id
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Get a node, including one marked as dropped but not yet swept
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a mutable node
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Get a node or fail
    pub fn try_node(&self, id: NodeId) -> CompileResult<&Node> {
        self.nodes.get(&id).ok_or(CompileError::NodeNotFound(id.0))
    }

    /// Get a mutable node or fail
    pub fn try_node_mut(&mut self, id: NodeId) -> CompileResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(CompileError::NodeNotFound(id.0))
    }

    /// Whether the handle refers to a node that is present and not dropped
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| !n.dropped).unwrap_or(false)
    }

    /// Kind of a live node
    pub fn kind(&self, id: NodeId) -> Option<OpKind> {
        self.nodes.get(&id).filter(|n| !n.dropped).map(|n| n.kind)
    }

    /// Number of nodes in the node list (dropped ones count until swept)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes not marked as dropped
    pub fn active_node_count(&self) -> usize {
        self.nodes.values().filter(|n| !n.dropped).count()
    }

    /// Snapshot of node handles in list order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Iterate over nodes in list order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, n)| (*id, n))
    }

    /// Find a live node by name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| !n.dropped && n.name == name)
            .map(|(id, _)| *id)
    }

    /// Designated output nodes
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Whether the node is a designated output
    pub fn is_output(&self, id: NodeId) -> bool {
        self.outputs.contains(&id)
    }

    // ========================================================================
    // Edge accessors
    // ========================================================================

    /// Get an edge, including a dropped one
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Get an edge that is present and not dropped
    pub fn live_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id).filter(|e| !e.dropped)
    }

    /// Get a mutable edge
    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(&id)
    }

    /// Number of edges in the edge list (dropped ones count until swept)
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of edges not marked as dropped
    pub fn active_edge_count(&self) -> usize {
        self.edges.values().filter(|e| !e.dropped).count()
    }

    /// Iterate over edges in list order
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().map(|(id, e)| (*id, e))
    }

    /// The `index`-th incoming edge of a node
    pub fn parent_edge_at(&self, id: NodeId, index: usize) -> Option<&Edge> {
        let edge_id = *self.nodes.get(&id)?.parent_edges.get(index)?;
        self.live_edge(edge_id)
    }

    /// The `index`-th outgoing edge of a node
    pub fn child_edge_at(&self, id: NodeId, index: usize) -> Option<&Edge> {
        let edge_id = *self.nodes.get(&id)?.child_edges.get(index)?;
        self.live_edge(edge_id)
    }

    /// Producer feeding the `index`-th input
    pub fn parent_at(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.parent_edge_at(id, index).map(|e| e.parent)
    }

    /// Consumer of the `index`-th output edge
    pub fn child_at(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.child_edge_at(id, index).map(|e| e.child)
    }

    /// Number of incoming edges
    pub fn parent_count(&self, id: NodeId) -> usize {
        self.nodes
            .get(&id)
            .map(|n| n.parent_edges.len())
            .unwrap_or(0)
    }

    /// Number of outgoing edges
    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes
            .get(&id)
            .map(|n| n.child_edges.len())
            .unwrap_or(0)
    }

    /// Producers of all inputs, in port order
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|n| {
                n.parent_edges
                    .iter()
                    .filter_map(|e| self.live_edge(*e))
                    .map(|e| e.parent)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Consumers of all outputs, in port order
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|n| {
                n.child_edges
                    .iter()
                    .filter_map(|e| self.live_edge(*e))
                    .map(|e| e.child)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Erase dropped nodes from the node list
    pub fn remove_dropped(&mut self) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|_, n| !n.dropped);
        let nodes = &self.nodes;
        self.outputs.retain(|id| nodes.contains_key(id));
        before - self.nodes.len()
    }

    /// Erase dropped edges from the edge list
    pub fn remove_dropped_edges(&mut self) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, e| !e.dropped);
        before - self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::layer::{ActivationKind, LayerParams};

    fn make_test_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let conv = graph.add_node(OpKind::Convolution, "conv1", None);
        let relu = graph.add_layer(
            OpKind::Activation,
            LayerDesc::new("relu1", LayerParams::Activation(ActivationKind::relu())),
        );
        graph.link(input, conv, &[1, 3, 8, 8]).unwrap();
        graph.link(conv, relu, &[1, 16, 8, 8]).unwrap();
        graph.mark_output(relu);
        (graph, input, conv, relu)
    }

    #[test]
    fn test_graph_creation() {
        let (graph, input, conv, relu) = make_test_graph();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.kind(conv), Some(OpKind::Convolution));
        assert_eq!(graph.parents(conv), vec![input]);
        assert_eq!(graph.children(conv), vec![relu]);
        assert!(graph.is_output(relu));
    }

    #[test]
    fn test_find_node() {
        let (graph, _, conv, _) = make_test_graph();

        assert_eq!(graph.find_node("conv1"), Some(conv));
        assert!(graph.find_node("nonexistent").is_none());
    }

    #[test]
    fn test_edge_at() {
        let (graph, input, conv, _) = make_test_graph();

        let edge = graph.parent_edge_at(conv, 0).unwrap();
        assert_eq!(edge.parent, input);
        assert_eq!(edge.dims.as_slice(), &[1, 3, 8, 8]);
        assert!(graph.parent_edge_at(conv, 1).is_none());
    }

    #[test]
    fn test_remove_dropped() {
        let (mut graph, _, _, relu) = make_test_graph();

        graph.remove_node(relu);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.active_node_count(), 2);

        assert_eq!(graph.remove_dropped(), 1);
        assert_eq!(graph.node_count(), 2);
        assert!(graph.outputs().is_empty());

        assert_eq!(graph.remove_dropped_edges(), 1);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_node_iteration_order() {
        let (graph, _, _, _) = make_test_graph();

        let names: Vec<_> = graph.nodes().map(|(_, n)| n.name.as_str()).collect();
        assert_eq!(names, vec!["data", "conv1", "relu1"]);
    }

    #[test]
    fn test_replace_output() {
        let (mut graph, _, conv, relu) = make_test_graph();

        graph.replace_output(relu, conv);
        assert_eq!(graph.outputs(), &[conv]);

        // already an output: the old entry just disappears
        graph.mark_output(relu);
        graph.replace_output(relu, conv);
        assert_eq!(graph.outputs(), &[conv]);
    }

    #[test]
    fn test_try_node_missing() {
        let graph = Graph::new();
        assert!(matches!(
            graph.try_node(NodeId(5)),
            Err(CompileError::NodeNotFound(5))
        ));
    }
}
