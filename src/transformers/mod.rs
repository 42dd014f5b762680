//! Fusion passes
//!
//! This module provides the graph rewrites run before lowering:
//!
//! - **Merge**: reassemble grouped convolutions split into parallel branches
//! - **Fusion**: fold activations, scale/shift and sums into their producer
//! - **Elimination**: remove operators that do nothing
//!
//! # Overview
//!
//! Each pass implements the [`GraphPass`] trait and can be applied
//! individually. Removed nodes are only flagged; [`Graph::remove_dropped`]
//! erases them.
//!
//! # Example
//!
//! ```ignore
//! use vpu_compiler::transformers::{FuseConvolutionAndActivation, OptimizationPipeline};
//! use vpu_compiler::traits::GraphPass;
//!
//! // Apply one pass
//! let result = FuseConvolutionAndActivation::new().run(&mut graph)?;
//! graph.remove_dropped();
//!
//! // Or the whole canonical sequence
//! let result = OptimizationPipeline::default().run(&mut graph)?;
//! println!("Eliminated {} nodes", result.nodes_eliminated);
//! ```

/// Common utilities and types
pub mod common;
/// Identity elimination
pub mod eliminate;
/// Fuse BatchNormalization + ScaleShift
pub mod fuse_bn_scale;
/// Fuse Convolution + Activation
pub mod fuse_conv_activation;
/// Fuse Convolution + Sum (+ Activation)
pub mod fuse_conv_sum;
/// Merge grouped convolution branches
pub mod merge_group_conv;

pub use common::{is_fusing_supported, PassResult};
pub use eliminate::RemoveIdentityOperator;
pub use fuse_bn_scale::FuseBatchNormWithScale;
pub use fuse_conv_activation::FuseConvolutionAndActivation;
pub use fuse_conv_sum::FuseConvolutionSumAndConvolutionSumActivation;
pub use merge_group_conv::MergeGroupConvolution;

use std::fmt;

use log::debug;

use crate::error::CompileResult;
use crate::graph::Graph;
use crate::traits::GraphPass;

/// Ordered sequence of passes
///
/// Every pass is followed by a sweep of dropped nodes; dropped edges are
/// swept once at the end. Passes run exactly once, in list order.
pub struct OptimizationPipeline {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Default for OptimizationPipeline {
    fn default() -> Self {
        Self::new()
            .with_pass(MergeGroupConvolution::new())
            .with_pass(FuseConvolutionAndActivation::new())
            .with_pass(FuseBatchNormWithScale::new())
            .with_pass(RemoveIdentityOperator::new())
            .with_pass(FuseConvolutionSumAndConvolutionSumActivation::new())
    }
}

impl fmt::Debug for OptimizationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.passes.iter().map(|p| p.name()))
            .finish()
    }
}

impl OptimizationPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Append a pass
    pub fn with_pass(mut self, pass: impl GraphPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Pass names in execution order
    pub fn passes(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run the pipeline
    pub fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
        let mut total = PassResult::new();

        for pass in &self.passes {
            if !pass.is_applicable(graph) {
                debug!("Skipping optimization pass: {}", pass.name());
                continue;
            }

            debug!("Running optimization pass: {}", pass.name());
            let result = pass.run(graph)?;
            let swept = graph.remove_dropped();
            debug!(
                "{}: {} matched, {} applied, {} nodes removed",
                pass.name(),
                result.patterns_matched,
                result.transforms_applied,
                swept
            );
            total.merge(result);
        }

        graph.remove_dropped_edges();
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ActivationKind, EltwiseOp, LayerDesc, LayerParams, NodeId, OpKind};

    const DIMS: [usize; 4] = [1, 8, 4, 4];

    fn relu(graph: &mut Graph, name: &str) -> NodeId {
        graph.add_layer(
            OpKind::Activation,
            LayerDesc::new(name, LayerParams::Activation(ActivationKind::relu())),
        )
    }

    /// data -> conv1 -> relu1 -> copy -> conv2 -> conv3 --+
    ///                              \------------------ sum -> relu2 -> out
    fn make_test_graph() -> Graph {
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let conv1 = graph.add_node(OpKind::Convolution, "conv1", None);
        let relu1 = relu(&mut graph, "relu1");
        let copy = graph.add_node(OpKind::Copy, "copy", None);
        let conv2 = graph.add_node(OpKind::Convolution, "conv2", None);
        let conv3 = graph.add_node(OpKind::Convolution, "conv3", None);
        let sum = graph.add_layer(
            OpKind::Eltwise,
            LayerDesc::new(
                "sum",
                LayerParams::Eltwise {
                    op: EltwiseOp::Sum,
                    coeffs: vec![],
                },
            ),
        );
        let relu2 = relu(&mut graph, "relu2");
        let out = graph.add_node(OpKind::Output, "out", None);

        graph.link(input, conv1, &DIMS).unwrap();
        graph.link(conv1, relu1, &DIMS).unwrap();
        graph.link(relu1, copy, &DIMS).unwrap();
        graph.link(copy, conv2, &DIMS).unwrap();
        graph.link(conv2, conv3, &DIMS).unwrap();
        graph.link(conv3, sum, &DIMS).unwrap();
        graph.link(copy, sum, &DIMS).unwrap();
        graph.link(sum, relu2, &DIMS).unwrap();
        graph.link(relu2, out, &DIMS).unwrap();
        graph
    }

    #[test]
    fn test_canonical_order() {
        let pipeline = OptimizationPipeline::default();
        assert_eq!(
            pipeline.passes(),
            vec![
                "MergeGroupConvolution",
                "FuseConvolutionAndActivation",
                "FuseBatchNormWithScale",
                "RemoveIdentityOperator",
                "FuseConvolutionSumAndConvolutionSumActivation",
            ]
        );
    }

    #[test]
    fn test_optimization_pipeline() {
        let mut graph = make_test_graph();

        let result = OptimizationPipeline::default().run(&mut graph).unwrap();

        // relu1, copy, sum, relu2
        assert_eq!(result.nodes_eliminated, 4);
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), graph.active_edge_count());

        let conv1 = graph.find_node("conv1").unwrap();
        let conv2 = graph.find_node("conv2").unwrap();
        let conv3 = graph.find_node("conv3").unwrap();
        assert_eq!(graph.kind(conv1), Some(OpKind::ConvolutionActivation));
        assert_eq!(graph.kind(conv2), Some(OpKind::Convolution));
        assert_eq!(graph.kind(conv3), Some(OpKind::ConvolutionSumActivation));
        assert_eq!(graph.parents(conv3), vec![conv2, conv1]);
        assert_eq!(graph.children(conv1), vec![conv2, conv3]);
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let mut graph = make_test_graph();
        let pipeline = OptimizationPipeline::default();
        pipeline.run(&mut graph).unwrap();

        let kinds: Vec<OpKind> = graph.nodes().map(|(_, n)| n.kind).collect();
        let edges = graph.edge_count();

        let second = pipeline.run(&mut graph).unwrap();

        assert!(!second.changed());
        assert_eq!(graph.nodes().map(|(_, n)| n.kind).collect::<Vec<_>>(), kinds);
        assert_eq!(graph.edge_count(), edges);
    }

    #[test]
    fn test_empty_pipeline() {
        let mut graph = make_test_graph();
        let result = OptimizationPipeline::new().run(&mut graph).unwrap();

        assert!(!result.changed());
        assert_eq!(graph.node_count(), 9);
    }
}
