//! BatchNormalization + ScaleShift fusion

use log::debug;

use crate::error::CompileResult;
use crate::graph::{Graph, NodeId, OpKind};
use crate::traits::GraphPass;

use super::common::{sole_child, PassResult};

/// Fuse BatchNormalization -> ScaleShift into one BatchNormScale node
///
/// A batch normalization that is itself a network output is left alone.
#[derive(Debug, Default)]
pub struct FuseBatchNormWithScale;

impl FuseBatchNormWithScale {
    /// Create a new pass
    pub fn new() -> Self {
        Self
    }

    fn find_scale(&self, graph: &Graph, bn: NodeId) -> Option<NodeId> {
        if graph.is_output(bn) {
            return None;
        }
        let child = sole_child(graph, bn)?;
        (graph.kind(child)? == OpKind::ScaleShift).then_some(child)
    }
}

impl GraphPass for FuseBatchNormWithScale {
    fn name(&self) -> &'static str {
        "FuseBatchNormWithScale"
    }

    fn is_applicable(&self, graph: &Graph) -> bool {
        graph.has_kind(OpKind::BatchNormalization) && graph.has_kind(OpKind::ScaleShift)
    }

    fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
        let mut result = PassResult::new();

        for bn in graph.find_nodes_by_kind(OpKind::BatchNormalization) {
            let scale = match self.find_scale(graph, bn) {
                Some(scale) => scale,
                None => continue,
            };
            result.patterns_matched += 1;

            let (scale_name, scale_layer) = {
                let node = graph.try_node(scale)?;
                (node.name.clone(), node.layer.clone())
            };

            let node = graph.try_node_mut(bn)?;
            node.kind = OpKind::BatchNormScale;
            if let Some(layer) = scale_layer {
                node.fuse_with(layer);
            }
            let bn_name = node.name.clone();

            graph.replace_output(scale, bn);
            graph.drop_node(scale);

            debug!("Fused {} into {}", scale_name, bn_name);
            result.record(&bn_name);
            result.record_elimination(&scale_name);
        }

        Ok(result)
    }
}
