//! Grouped convolution reassembly
//!
//! A grouped convolution exported as `Split -> N x Conv -> Concatenation`
//! becomes one convolution with `N` times the channels.

use log::debug;

use crate::error::{CompileError, CompileResult};
use crate::graph::{ConvParams, Graph, LayerParams, NodeId, OpKind, Shape};
use crate::traits::GraphPass;

use super::common::{sole_child, PassResult};

/// Channel axis of NCHW shapes
const CHANNEL_AXIS: usize = 1;

/// Matched split/concat group
#[derive(Debug)]
struct ConvGroup {
    split: NodeId,
    concat: NodeId,
    branches: Vec<NodeId>,
}

/// Merge parallel convolution branches between a Split and a Concatenation
#[derive(Debug, Default)]
pub struct MergeGroupConvolution;

impl MergeGroupConvolution {
    /// Create a new pass
    pub fn new() -> Self {
        Self
    }

    fn match_group(&self, graph: &Graph, split: NodeId) -> Option<ConvGroup> {
        let branches = graph.children(split);
        if branches.len() < 2 {
            return None;
        }

        let first = graph.node(branches[0])?;
        if !matches!(
            first.kind,
            OpKind::Convolution | OpKind::ConvolutionActivation
        ) {
            return None;
        }
        let concat = sole_child(graph, branches[0])?;
        if graph.kind(concat)? != OpKind::Concatenation {
            return None;
        }

        let first_params = conv_params(graph, branches[0]);
        let first_in = in_shape(graph, branches[0])?;
        let first_out = out_shape(graph, branches[0])?;

        for &peer in &branches[1..] {
            let node = graph.node(peer).filter(|n| !n.is_dropped())?;
            if node.kind != first.kind || node.fused != first.fused {
                return None;
            }
            if sole_child(graph, peer)? != concat {
                return None;
            }
            if !same_except_channels(&first_in, &in_shape(graph, peer)?)
                || !same_except_channels(&first_out, &out_shape(graph, peer)?)
            {
                return None;
            }
            // branches without parameters merge by shape only
            match (first_params, conv_params(graph, peer)) {
                (Some(first), Some(params)) if first.can_merge_with(params) => {}
                (None, None) => {}
                _ => return None,
            }
        }

        // the concatenation must not gather anything besides the branches
        if graph.parent_count(concat) != branches.len() {
            return None;
        }

        Some(ConvGroup {
            split,
            concat,
            branches,
        })
    }

    fn merge(&self, graph: &mut Graph, group: &ConvGroup) -> CompileResult<()> {
        let conv = group.branches[0];
        let mut merged_params = conv_params(graph, conv).cloned();
        let mut merged_in = in_shape(graph, conv).ok_or(CompileError::NodeNotFound(conv.0))?;
        let mut merged_out = out_shape(graph, conv).ok_or(CompileError::NodeNotFound(conv.0))?;

        for &peer in &group.branches[1..] {
            if let Some(merged) = merged_params.as_mut() {
                let params = conv_params(graph, peer)
                    .ok_or_else(|| missing_conv_params(graph, peer))?;
                merged.merge_with(params)?;
            }

            if let Some(dims) = in_shape(graph, peer) {
                merged_in[CHANNEL_AXIS] += dims[CHANNEL_AXIS];
            }
            if let Some(dims) = out_shape(graph, peer) {
                merged_out[CHANNEL_AXIS] += dims[CHANNEL_AXIS];
            }
            graph.remove_node(peer);
        }

        let (in_edge, out_edge) = {
            let node = graph.try_node(conv)?;
            (
                node.parent_edges().first().copied(),
                node.child_edges().first().copied(),
            )
        };
        for (edge, dims) in [(in_edge, &merged_in), (out_edge, &merged_out)] {
            if let Some(e) = edge.and_then(|id| graph.edge_mut(id)) {
                e.dims = dims.clone();
            }
        }

        let node = graph.try_node_mut(conv)?;
        set_first(&mut node.in_dims, merged_in);
        set_first(&mut node.out_dims, merged_out);
        if let (Some(layer), Some(params)) = (node.layer.as_mut(), merged_params) {
            layer.params = LayerParams::Convolution(params);
        }

        graph.drop_node(group.split);
        graph.drop_node(group.concat);
        Ok(())
    }
}

impl GraphPass for MergeGroupConvolution {
    fn name(&self) -> &'static str {
        "MergeGroupConvolution"
    }

    fn is_applicable(&self, graph: &Graph) -> bool {
        graph.has_kind(OpKind::Split) && graph.has_kind(OpKind::Concatenation)
    }

    fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
        let mut result = PassResult::new();

        for split in graph.find_nodes_by_kind(OpKind::Split) {
            let group = match self.match_group(graph, split) {
                Some(group) => group,
                None => continue,
            };
            result.patterns_matched += 1;

            let names: Vec<String> = [group.split, group.concat]
                .iter()
                .chain(group.branches[1..].iter())
                .filter_map(|id| graph.node(*id).map(|n| n.name.clone()))
                .collect();

            self.merge(graph, &group)?;

            let conv_name = graph.try_node(group.branches[0])?.name.clone();
            debug!(
                "Merged {} convolution branches into {}",
                group.branches.len(),
                conv_name
            );
            result.record(&conv_name);
            for name in &names {
                result.record_elimination(name);
            }
        }

        Ok(result)
    }
}

fn conv_params(graph: &Graph, id: NodeId) -> Option<&ConvParams> {
    match &graph.node(id)?.layer.as_ref()?.params {
        LayerParams::Convolution(params) => Some(params),
        _ => None,
    }
}

fn missing_conv_params(graph: &Graph, id: NodeId) -> CompileError {
    let name = graph
        .node(id)
        .map(|n| n.name.clone())
        .unwrap_or_else(|| id.to_string());
    CompileError::MissingParameter(format!("convolution parameters of {}", name))
}

/// Shape entering a node through its first input
fn in_shape(graph: &Graph, id: NodeId) -> Option<Shape> {
    graph.parent_edge_at(id, 0).map(|e| e.dims.clone())
}

/// Shape leaving a node through its first output
fn out_shape(graph: &Graph, id: NodeId) -> Option<Shape> {
    graph.child_edge_at(id, 0).map(|e| e.dims.clone())
}

fn same_except_channels(a: &Shape, b: &Shape) -> bool {
    a.len() == b.len()
        && a.len() > CHANNEL_AXIS
        && a.iter()
            .zip(b.iter())
            .enumerate()
            .all(|(axis, (x, y))| axis == CHANNEL_AXIS || x == y)
}

fn set_first(dims: &mut Vec<Shape>, shape: Shape) {
    match dims.first_mut() {
        Some(first) => *first = shape,
        None => dims.push(shape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LayerDesc;
    use ndarray::{Array1, ArrayD, IxDyn};

    fn make_conv(graph: &mut Graph, name: &str, channels: usize) -> NodeId {
        let params = ConvParams::new([3, 3], channels)
            .with_weights(ArrayD::ones(IxDyn(&[channels, channels, 3, 3])))
            .with_biases(Array1::zeros(channels));
        graph.add_layer(
            OpKind::Convolution,
            LayerDesc::new(name, LayerParams::Convolution(params)),
        )
    }

    fn make_test_graph(channels: &[usize]) -> (Graph, NodeId, NodeId, Vec<NodeId>, NodeId) {
        let total: usize = channels.iter().sum();
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let split = graph.add_node(OpKind::Split, "split", None);
        let concat = graph.add_node(OpKind::Concatenation, "concat", None);
        let out = graph.add_node(OpKind::Output, "out", None);
        graph.link(input, split, &[1, total, 8, 8]).unwrap();

        let convs: Vec<NodeId> = channels
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let conv = make_conv(&mut graph, &format!("conv{}", i), c);
                graph.link(split, conv, &[1, c, 8, 8]).unwrap();
                graph.link(conv, concat, &[1, c, 8, 8]).unwrap();
                conv
            })
            .collect();

        graph.link(concat, out, &[1, total, 8, 8]).unwrap();
        (graph, input, split, convs, out)
    }

    #[test]
    fn test_merge_three_branches() {
        let (mut graph, input, split, convs, out) = make_test_graph(&[4, 4, 4]);

        let result = MergeGroupConvolution::new().run(&mut graph).unwrap();
        graph.remove_dropped();

        assert_eq!(result.transforms_applied, 1);
        assert_eq!(result.nodes_eliminated, 4);
        assert_eq!(graph.node_count(), 3);
        assert!(graph.node(split).is_none());
        assert!(!graph.has_kind(OpKind::Concatenation));

        let conv = graph.node(convs[0]).unwrap();
        assert_eq!(conv.in_dims[0].as_slice(), &[1, 12, 8, 8]);
        assert_eq!(conv.out_dims[0].as_slice(), &[1, 12, 8, 8]);

        assert_eq!(graph.parents(convs[0]), vec![input]);
        assert_eq!(graph.children(convs[0]), vec![out]);
        assert_eq!(graph.parent_edge_at(convs[0], 0).unwrap().dims[1], 12);

        match &conv.layer.as_ref().unwrap().params {
            LayerParams::Convolution(params) => {
                assert_eq!(params.group, 3);
                assert_eq!(params.out_channels, 12);
                assert_eq!(params.weights.as_ref().unwrap().shape(), &[12, 4, 3, 3]);
                assert_eq!(params.biases.as_ref().unwrap().len(), 12);
            }
            other => panic!("unexpected params {:?}", other),
        }
    }

    #[test]
    fn test_skip_mixed_kinds() {
        let (mut graph, _, _, convs, _) = make_test_graph(&[4, 4]);
        graph.node_mut(convs[1]).unwrap().kind = OpKind::ConvolutionActivation;

        let result = MergeGroupConvolution::new().run(&mut graph).unwrap();
        assert_eq!(result.patterns_matched, 0);
        assert_eq!(graph.active_node_count(), 6);
    }

    #[test]
    fn test_skip_spatial_mismatch() {
        let mut graph = Graph::new();
        let split = graph.add_node(OpKind::Split, "split", None);
        let concat = graph.add_node(OpKind::Concatenation, "concat", None);
        let a = make_conv(&mut graph, "a", 4);
        let b = make_conv(&mut graph, "b", 4);
        graph.link(split, a, &[1, 4, 8, 8]).unwrap();
        graph.link(split, b, &[1, 4, 8, 8]).unwrap();
        graph.link(a, concat, &[1, 4, 8, 8]).unwrap();
        graph.link(b, concat, &[1, 4, 4, 4]).unwrap();

        let result = MergeGroupConvolution::new().run(&mut graph).unwrap();
        assert_eq!(result.patterns_matched, 0);
    }

    #[test]
    fn test_skip_different_concat() {
        let (mut graph, _, _, convs, out) = make_test_graph(&[4, 4]);
        let other = graph.add_node(OpKind::Concatenation, "other", None);
        let edge = graph.node(convs[1]).unwrap().child_edges()[0];
        graph.detach_edge(edge);
        graph.link(convs[1], other, &[1, 4, 8, 8]).unwrap();
        graph.link(other, out, &[1, 4, 8, 8]).unwrap();

        let result = MergeGroupConvolution::new().run(&mut graph).unwrap();
        assert_eq!(result.patterns_matched, 0);
    }

    #[test]
    fn test_merge_parameterless_branches() {
        let (mut graph, input, _, convs, out) = make_test_graph(&[4, 4]);
        for &conv in &convs {
            graph.node_mut(conv).unwrap().layer = None;
        }

        let result = MergeGroupConvolution::new().run(&mut graph).unwrap();
        graph.remove_dropped();

        assert_eq!(result.transforms_applied, 1);
        assert_eq!(graph.parents(convs[0]), vec![input]);
        assert_eq!(graph.children(convs[0]), vec![out]);
        let conv = graph.node(convs[0]).unwrap();
        assert_eq!(conv.in_dims[0].as_slice(), &[1, 8, 8, 8]);
        assert_eq!(conv.out_dims[0].as_slice(), &[1, 8, 8, 8]);
        assert!(conv.layer.is_none());
    }

    #[test]
    fn test_skip_partially_parameterless_branches() {
        let (mut graph, _, _, convs, _) = make_test_graph(&[4, 4]);
        graph.node_mut(convs[1]).unwrap().layer = None;

        let result = MergeGroupConvolution::new().run(&mut graph).unwrap();
        assert_eq!(result.patterns_matched, 0);
        assert_eq!(graph.active_node_count(), 6);
    }
}
