//! Common utilities for fusion passes
//!
//! Shared helper functions and types used across multiple passes.

use crate::graph::{ActivationKind, Graph, LayerDesc, NodeId, OpKind};

/// Activation of a live activation node
pub fn activation_of(graph: &Graph, id: NodeId) -> Option<ActivationKind> {
    let node = graph.node(id).filter(|n| !n.is_dropped())?;
    if node.kind != OpKind::Activation {
        return None;
    }
    node.layer.as_ref().and_then(LayerDesc::activation)
}

/// Whether an activation can be folded into a convolution
///
/// Only ReLU and ELU have fused kernels, and only in their monotonic
/// non-decreasing configurations: fusing across max-pooling relies on it.
pub fn is_fusable_activation(kind: ActivationKind) -> bool {
    matches!(kind, ActivationKind::Relu { .. } | ActivationKind::Elu { .. })
        && kind.is_monotonic_nondecreasing()
}

/// Whether the node is a live activation that can be folded into a convolution
pub fn is_fusing_supported(graph: &Graph, id: NodeId) -> bool {
    activation_of(graph, id)
        .map(is_fusable_activation)
        .unwrap_or(false)
}

/// The single consumer of a node, if it has exactly one outgoing edge
pub fn sole_child(graph: &Graph, id: NodeId) -> Option<NodeId> {
    if graph.child_count(id) != 1 {
        return None;
    }
    graph.child_at(id, 0).filter(|c| graph.is_live(*c))
}

/// Pass statistics
#[derive(Debug, Default, Clone)]
pub struct PassResult {
    /// Number of candidates that matched the structural pattern
    pub patterns_matched: usize,
    /// Number of rewrites applied
    pub transforms_applied: usize,
    /// Number of nodes dropped
    pub nodes_eliminated: usize,
    /// Names of rewritten and dropped nodes
    pub transformed_nodes: Vec<String>,
}

impl PassResult {
    /// Create empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rewrite
    pub fn record(&mut self, node_name: &str) {
        self.transforms_applied += 1;
        self.transformed_nodes.push(node_name.to_string());
    }

    /// Record a dropped node
    pub fn record_elimination(&mut self, node_name: &str) {
        self.nodes_eliminated += 1;
        self.transformed_nodes.push(node_name.to_string());
    }

    /// Merge with another result
    pub fn merge(&mut self, other: PassResult) {
        self.patterns_matched += other.patterns_matched;
        self.transforms_applied += other.transforms_applied;
        self.nodes_eliminated += other.nodes_eliminated;
        self.transformed_nodes.extend(other.transformed_nodes);
    }

    /// Whether the pass changed the graph
    pub fn changed(&self) -> bool {
        self.transforms_applied + self.nodes_eliminated > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LayerParams;

    #[test]
    fn test_fusable_activations() {
        assert!(is_fusable_activation(ActivationKind::relu()));
        assert!(is_fusable_activation(ActivationKind::Elu { alpha: 1.0 }));
        assert!(!is_fusable_activation(ActivationKind::Sigmoid));
        assert!(!is_fusable_activation(ActivationKind::Relu {
            negative_slope: -1.0
        }));
    }

    #[test]
    fn test_is_fusing_supported() {
        let mut graph = Graph::new();
        let relu = graph.add_layer(
            OpKind::Activation,
            LayerDesc::new("relu", LayerParams::Activation(ActivationKind::relu())),
        );
        let bare = graph.add_node(OpKind::Activation, "bare", None);
        let copy = graph.add_node(OpKind::Copy, "copy", None);

        assert!(is_fusing_supported(&graph, relu));
        assert!(!is_fusing_supported(&graph, bare));
        assert!(!is_fusing_supported(&graph, copy));
    }

    #[test]
    fn test_pass_result() {
        let mut result = PassResult::new();

        result.record("conv1");
        result.record_elimination("relu1");

        let mut total = PassResult::new();
        total.merge(result);

        assert_eq!(total.transforms_applied, 1);
        assert_eq!(total.nodes_eliminated, 1);
        assert_eq!(total.transformed_nodes.len(), 2);
        assert!(total.changed());
    }
}
