//! Graph validation
//!
//! Structural checks run before optimization and again before lowering.

use crate::error::{CompileError, CompileResult};
use crate::graph::{Graph, OpKind};

/// Validation result with detailed issues
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the graph is valid
    pub is_valid: bool,
    /// List of errors (critical issues)
    pub errors: Vec<String>,
    /// List of warnings (non-critical issues)
    pub warnings: Vec<String>,
    /// Whether a cycle was among the errors
    pub has_cycle: bool,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            has_cycle: false,
        }
    }

    /// Add an error
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
        self.is_valid = false;
    }

    /// Add a warning
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merge with another result
    pub fn merge(&mut self, other: ValidationResult) {
        if !other.is_valid {
            self.is_valid = false;
        }
        self.has_cycle |= other.has_cycle;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validation options
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Strict mode (warnings become errors)
    pub strict: bool,
}

/// Validate a graph
///
/// Checks:
/// - Edge lists only reference live edges whose endpoints match
/// - Live edges connect live nodes and appear in both endpoint lists
/// - Output designations name live nodes
/// - The live subgraph is acyclic
pub fn validate_graph(graph: &Graph) -> ValidationResult {
    let mut result = ValidationResult::valid();

    for (id, node) in graph.nodes().filter(|(_, n)| !n.is_dropped()) {
        for edge_id in node.parent_edges() {
            match graph.live_edge(*edge_id) {
                Some(edge) if edge.child == id => {}
                Some(_) => result.add_error(format!(
                    "Node '{}': input edge {} points elsewhere",
                    node.name, edge_id
                )),
                None => result.add_error(format!(
                    "Node '{}': input edge {} is missing or dropped",
                    node.name, edge_id
                )),
            }
        }

        for edge_id in node.child_edges() {
            match graph.live_edge(*edge_id) {
                Some(edge) if edge.parent == id => {}
                Some(_) => result.add_error(format!(
                    "Node '{}': output edge {} points elsewhere",
                    node.name, edge_id
                )),
                None => result.add_error(format!(
                    "Node '{}': output edge {} is missing or dropped",
                    node.name, edge_id
                )),
            }
        }

        match node.kind {
            OpKind::Input if !node.parent_edges().is_empty() => {
                result.add_error(format!("Input '{}' has producers", node.name))
            }
            OpKind::Input => {}
            _ if node.parent_edges().is_empty() => {
                result.add_warning(format!("Node '{}' ({}) has no inputs", node.name, node.kind))
            }
            kind if kind.is_fused() && node.fused.is_empty() => result.add_warning(format!(
                "Node '{}' is {} but records no fused operators",
                node.name, kind
            )),
            _ => {}
        }
    }

    for (id, edge) in graph.edges().filter(|(_, e)| !e.is_dropped()) {
        let listed_by_parent = graph
            .node(edge.parent)
            .filter(|n| !n.is_dropped())
            .map(|n| n.child_edges().contains(&id));
        let listed_by_child = graph
            .node(edge.child)
            .filter(|n| !n.is_dropped())
            .map(|n| n.parent_edges().contains(&id));

        match (listed_by_parent, listed_by_child) {
            (Some(true), Some(true)) => {}
            (None, _) | (_, None) => {
                result.add_error(format!("Edge {} connects a dropped node", id))
            }
            _ => result.add_error(format!("Edge {} is not listed by its endpoints", id)),
        }
    }

    for id in graph.outputs() {
        if !graph.is_live(*id) {
            result.add_error(format!("Output {} is not a live node", id));
        }
    }

    if let Err(CompileError::CycleDetected(nodes)) = graph.topological_order() {
        result.add_error(format!("Cycle through: {}", nodes));
        result.has_cycle = true;
    }

    result
}

/// Validate with options
pub fn validate_graph_with_options(graph: &Graph, options: &ValidationOptions) -> ValidationResult {
    let mut result = validate_graph(graph);

    if options.strict {
        for warning in std::mem::take(&mut result.warnings) {
            result.add_error(warning);
        }
    }

    result
}

/// Quick validation that returns an error if invalid
pub fn check_graph(graph: &Graph) -> CompileResult<()> {
    let result = validate_graph(graph);
    if result.is_valid {
        Ok(())
    } else if result.has_cycle {
        Err(CompileError::CycleDetected(result.errors.join("; ")))
    } else {
        Err(CompileError::InvalidGraph(result.errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeId, NodeId};

    fn make_valid_graph() -> Graph {
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let copy = graph.add_node(OpKind::Copy, "copy", None);
        let out = graph.add_node(OpKind::Output, "out", None);
        graph.link(input, copy, &[1, 3, 4, 4]).unwrap();
        graph.link(copy, out, &[1, 3, 4, 4]).unwrap();
        graph
    }

    #[test]
    fn test_validate_valid_graph() {
        let result = validate_graph(&make_valid_graph());
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(check_graph(&make_valid_graph()).is_ok());
    }

    #[test]
    fn test_validate_after_drop() {
        let mut graph = make_valid_graph();
        graph.drop_node(NodeId(1));

        assert!(validate_graph(&graph).is_valid);
        graph.remove_dropped();
        graph.remove_dropped_edges();
        assert!(validate_graph(&graph).is_valid);
    }

    #[test]
    fn test_validate_missing_edge() {
        let mut graph = make_valid_graph();
        if let Some(node) = graph.nodes.get_mut(&NodeId(1)) {
            node.parent_edges.push(EdgeId(99));
        }

        let result = validate_graph(&graph);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("e99")));
    }

    #[test]
    fn test_validate_dangling_edge() {
        let mut graph = make_valid_graph();
        if let Some(node) = graph.nodes.get_mut(&NodeId(2)) {
            node.dropped = true;
        }

        let result = validate_graph(&graph);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("dropped node")));
    }

    #[test]
    fn test_validate_cycle() {
        let mut graph = make_valid_graph();
        let copy = NodeId(1);
        let back = graph.add_node(OpKind::Copy, "back", None);
        graph.link(copy, back, &[1, 3, 4, 4]).unwrap();
        graph.link(back, copy, &[1, 3, 4, 4]).unwrap();

        let result = validate_graph(&graph);
        assert!(result.has_cycle);
        assert!(matches!(check_graph(&graph), Err(CompileError::CycleDetected(_))));
    }

    #[test]
    fn test_strict_promotes_warnings() {
        let mut graph = make_valid_graph();
        graph.add_node(OpKind::Copy, "orphan", None);

        assert!(validate_graph(&graph).is_valid);
        let strict = ValidationOptions { strict: true };
        let result = validate_graph_with_options(&graph, &strict);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("orphan")));
    }
}
