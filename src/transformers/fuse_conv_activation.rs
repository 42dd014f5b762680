//! Convolution + activation fusion
//!
//! Folds a ReLU/ELU into the convolution that feeds it, either directly or
//! across a max-pooling node.

use log::debug;

use crate::error::CompileResult;
use crate::graph::{Graph, NodeId, OpKind};
use crate::traits::GraphPass;

use super::common::{is_fusing_supported, sole_child, PassResult};

/// Fuse Convolution -> Activation and Convolution -> MaxPool -> Activation
///
/// Max pooling commutes with any monotonic non-decreasing function, so the
/// activation can be evaluated by the convolution while the pooling node
/// stays in place.
#[derive(Debug, Default)]
pub struct FuseConvolutionAndActivation;

impl FuseConvolutionAndActivation {
    /// Create a new pass
    pub fn new() -> Self {
        Self
    }

    /// The activation to absorb into `conv`, if the pattern matches
    fn find_activation(&self, graph: &Graph, conv: NodeId) -> Option<NodeId> {
        let child = sole_child(graph, conv)?;
        if is_fusing_supported(graph, child) {
            return Some(child);
        }

        let pool = graph.node(child)?;
        let is_max_pool = pool.kind == OpKind::Pooling
            && pool.layer.as_ref().map(|l| l.is_max_pool()).unwrap_or(false);
        if !is_max_pool {
            return None;
        }

        let act = sole_child(graph, child)?;
        is_fusing_supported(graph, act).then_some(act)
    }
}

impl GraphPass for FuseConvolutionAndActivation {
    fn name(&self) -> &'static str {
        "FuseConvolutionAndActivation"
    }

    fn is_applicable(&self, graph: &Graph) -> bool {
        graph.has_kind(OpKind::Convolution) && graph.has_kind(OpKind::Activation)
    }

    fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
        let mut result = PassResult::new();

        for conv in graph.find_nodes_by_kind(OpKind::Convolution) {
            let act = match self.find_activation(graph, conv) {
                Some(act) => act,
                None => continue,
            };
            result.patterns_matched += 1;

            let (act_name, act_layer) = {
                let node = graph.try_node(act)?;
                (node.name.clone(), node.layer.clone())
            };

            let node = graph.try_node_mut(conv)?;
            node.kind = OpKind::ConvolutionActivation;
            if let Some(layer) = act_layer {
                node.fuse_with(layer);
            }
            let conv_name = node.name.clone();

            // the activated value is now produced by the convolution or,
            // across pooling, by the pooling node
            if let Some(producer) = graph.parent_at(act, 0) {
                graph.replace_output(act, producer);
            }
            graph.drop_node(act);

            debug!("Fused {} into {}", act_name, conv_name);
            result.record(&conv_name);
            result.record_elimination(&act_name);
        }

        Ok(result)
    }
}
