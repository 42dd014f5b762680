//! Identity elimination
//!
//! Removes operators that leave their input unchanged.

use log::debug;

use crate::error::CompileResult;
use crate::graph::{Graph, NodeId, OpKind};
use crate::traits::GraphPass;

use super::common::PassResult;

/// Remove no-op operators
///
/// - Power with exponent 1, unit scale and zero offset
/// - ScaleShift without weights and biases
/// - Copy, unconditionally
///
/// Neighbours are reconnected through [`Graph::drop_node`].
#[derive(Debug, Default)]
pub struct RemoveIdentityOperator;

impl RemoveIdentityOperator {
    /// Create a new pass
    pub fn new() -> Self {
        Self
    }

    fn is_noop(&self, graph: &Graph, id: NodeId) -> bool {
        let node = match graph.node(id) {
            Some(n) if !n.is_dropped() => n,
            _ => return false,
        };

        match node.kind {
            OpKind::Copy => true,
            OpKind::Power | OpKind::ScaleShift => {
                node.layer.as_ref().map(|l| l.is_identity()).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl GraphPass for RemoveIdentityOperator {
    fn name(&self) -> &'static str {
        "RemoveIdentityOperator"
    }

    fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
        let mut result = PassResult::new();

        let candidates: Vec<NodeId> = graph
            .node_ids()
            .into_iter()
            .filter(|id| self.is_noop(graph, *id))
            .collect();

        for id in candidates {
            // an output can only be handed over to a single producer
            if graph.is_output(id) {
                match graph.parents(id).as_slice() {
                    [parent] => graph.replace_output(id, *parent),
                    _ => continue,
                }
            }
            result.patterns_matched += 1;

            let name = graph.try_node(id)?.name.clone();
            if graph.drop_node(id).is_some() {
                debug!("Removed identity operator {}", name);
                result.record_elimination(&name);
            }
        }

        Ok(result)
    }
}
