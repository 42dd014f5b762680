//! In-place Convolution + Sum fusion
//!
//! `Sum(conv(x), peer)` is computed by letting the convolution accumulate
//! into a buffer that already holds `peer`. The convolution then owns the
//! sum's output, so the rewrite is only legal when no other reader of `peer`
//! can run after the write.

use log::{debug, trace};

use crate::error::{CompileError, CompileResult};
use crate::graph::{Graph, NodeId, OpKind, Shape};
use crate::pattern::is_data_dependency;
use crate::traits::GraphPass;

use super::common::{is_fusing_supported, sole_child, PassResult};

/// Matched `conv + peer -> sum [-> activation]`
#[derive(Debug)]
struct SumCandidate {
    conv: NodeId,
    peer: NodeId,
    sum: NodeId,
    activation: Option<NodeId>,
}

/// Fuse Convolution -> Sum and Convolution -> Sum -> Activation
#[derive(Debug, Default)]
pub struct FuseConvolutionSumAndConvolutionSumActivation;

impl FuseConvolutionSumAndConvolutionSumActivation {
    /// Create a new pass
    pub fn new() -> Self {
        Self
    }

    fn match_sum(&self, graph: &Graph, sum: NodeId) -> Option<SumCandidate> {
        let node = graph.node(sum).filter(|n| !n.is_dropped())?;
        if graph.parent_count(sum) != 2 || !node.layer.as_ref()?.is_unit_sum() {
            return None;
        }

        let first = graph.parent_at(sum, 0)?;
        let second = graph.parent_at(sum, 1)?;
        let (conv, peer) = if graph.kind(first)? == OpKind::Convolution {
            (first, second)
        } else if graph.kind(second)? == OpKind::Convolution {
            (second, first)
        } else {
            return None;
        };

        if graph.child_count(conv) != 1 {
            return None;
        }

        let activation = sole_child(graph, sum).filter(|c| is_fusing_supported(graph, *c));

        Some(SumCandidate {
            conv,
            peer,
            sum,
            activation,
        })
    }

    /// Whether overwriting `peer`'s buffer with the sum is safe
    fn is_in_place_safe(&self, graph: &Graph, candidate: &SumCandidate) -> bool {
        let SumCandidate {
            conv, peer, sum, ..
        } = *candidate;

        // conv reads peer, so peer's buffer cannot hold conv's result;
        // feeding peer into conv must not close a cycle either
        if graph.are_adjacent(peer, conv) || is_data_dependency(graph, conv, peer) {
            trace!("Rejected sum fusion at {}: peer depends on convolution", sum);
            return false;
        }

        // every other reader of peer has to run before the sum
        for reader in graph.children(peer) {
            if reader == sum {
                continue;
            }
            if !is_data_dependency(graph, reader, sum) {
                trace!(
                    "Rejected sum fusion at {}: {} reads the overwritten buffer",
                    sum,
                    reader
                );
                return false;
            }
        }

        true
    }

    fn fuse(&self, graph: &mut Graph, candidate: &SumCandidate) -> CompileResult<()> {
        let SumCandidate {
            conv,
            peer,
            sum,
            activation,
        } = *candidate;
        let last = activation.unwrap_or(sum);

        let mut absorbed = vec![graph.try_node(sum)?.layer.clone()];
        if let Some(act) = activation {
            absorbed.push(graph.try_node(act)?.layer.clone());
        }

        let node = graph.try_node_mut(conv)?;
        node.kind = if activation.is_some() {
            OpKind::ConvolutionSumActivation
        } else {
            OpKind::ConvolutionSum
        };
        for layer in absorbed.into_iter().flatten() {
            node.fuse_with(layer);
        }

        // peer becomes the second input of conv, in the slot it fed the sum from
        let (peer_port, peer_dims) = peer_edge(graph, peer, sum)?;
        let input_num = graph.parent_count(conv);
        graph.connect(peer, conv, peer_port, input_num, &peer_dims)?;
        let in_dims: Vec<Shape> = (0..graph.parent_count(conv))
            .filter_map(|i| graph.parent_edge_at(conv, i).map(|e| e.dims.clone()))
            .collect();
        graph.try_node_mut(conv)?.in_dims = in_dims;

        // conv takes over the consumers of the fused tail
        let outputs: Vec<(NodeId, usize, usize, Shape)> = graph
            .try_node(last)?
            .child_edges()
            .iter()
            .filter_map(|id| graph.live_edge(*id))
            .map(|e| (e.child, e.output_num, input_position(graph, e.child, last), e.dims.clone()))
            .collect();
        for (child, output_num, input_num, dims) in outputs {
            graph.connect(conv, child, output_num, input_num, &dims)?;
        }

        graph.replace_output(last, conv);
        if let Some(act) = activation {
            graph.remove_node(act);
        }
        graph.remove_node(sum);
        Ok(())
    }
}

impl GraphPass for FuseConvolutionSumAndConvolutionSumActivation {
    fn name(&self) -> &'static str {
        "FuseConvolutionSumAndConvolutionSumActivation"
    }

    fn is_applicable(&self, graph: &Graph) -> bool {
        graph.has_kind(OpKind::Convolution) && graph.has_kind(OpKind::Eltwise)
    }

    fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
        let mut result = PassResult::new();

        for sum in graph.find_nodes_by_kind(OpKind::Eltwise) {
            let candidate = match self.match_sum(graph, sum) {
                Some(candidate) => candidate,
                None => continue,
            };
            result.patterns_matched += 1;

            if !self.is_in_place_safe(graph, &candidate) {
                continue;
            }

            let mut eliminated = vec![graph.try_node(sum)?.name.clone()];
            if let Some(act) = candidate.activation {
                eliminated.push(graph.try_node(act)?.name.clone());
            }

            self.fuse(graph, &candidate)?;

            let conv_name = graph.try_node(candidate.conv)?.name.clone();
            debug!("Fused {} into {}", eliminated.join(" + "), conv_name);
            result.record(&conv_name);
            for name in &eliminated {
                result.record_elimination(name);
            }
        }

        Ok(result)
    }
}

/// Output port and shape of the edge from `peer` into `sum`
fn peer_edge(graph: &Graph, peer: NodeId, sum: NodeId) -> CompileResult<(usize, Shape)> {
    let node = graph.try_node(peer)?;
    node.child_edges()
        .iter()
        .enumerate()
        .filter_map(|(port, id)| graph.live_edge(*id).map(|e| (port, e)))
        .find(|(_, e)| e.child == sum)
        .map(|(port, e)| (port, e.dims.clone()))
        .ok_or_else(|| {
            CompileError::InvalidGraph(format!(
                "{} does not feed {}",
                node.name,
                sum
            ))
        })
}

/// Position of the edge from `parent` among the parents of `child`
fn input_position(graph: &Graph, child: NodeId, parent: NodeId) -> usize {
    graph
        .parents(child)
        .iter()
        .position(|p| *p == parent)
        .unwrap_or_else(|| graph.parent_count(child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ActivationKind, EltwiseOp, LayerDesc, LayerParams};

    const DIMS: [usize; 4] = [1, 8, 4, 4];

    fn add_sum(graph: &mut Graph, coeffs: Vec<f32>) -> NodeId {
        graph.add_layer(
            OpKind::Eltwise,
            LayerDesc::new(
                "sum",
                LayerParams::Eltwise {
                    op: EltwiseOp::Sum,
                    coeffs,
                },
            ),
        )
    }

    /// data -> A, data -> B, Sum(A, B) -> out, B -> D
    fn make_test_graph() -> (Graph, [NodeId; 5]) {
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let a = graph.add_node(OpKind::Convolution, "A", None);
        let b = graph.add_node(OpKind::Convolution, "B", None);
        let sum = add_sum(&mut graph, vec![]);
        let d = graph.add_node(OpKind::Copy, "D", None);
        let out = graph.add_node(OpKind::Output, "out", None);
        graph.link(input, a, &DIMS).unwrap();
        graph.link(input, b, &DIMS).unwrap();
        graph.link(a, sum, &DIMS).unwrap();
        graph.link(b, sum, &DIMS).unwrap();
        graph.link(sum, out, &DIMS).unwrap();
        graph.link(b, d, &DIMS).unwrap();
        (graph, [a, b, sum, d, out])
    }

    #[test]
    fn test_reject_unordered_reader() {
        let (mut graph, [a, b, sum, d, _]) = make_test_graph();
        let sink = graph.add_node(OpKind::Output, "sink", None);
        graph.link(d, sink, &DIMS).unwrap();

        let result = FuseConvolutionSumAndConvolutionSumActivation::new()
            .run(&mut graph)
            .unwrap();

        assert_eq!(result.patterns_matched, 1);
        assert_eq!(result.transforms_applied, 0);
        assert!(graph.is_live(sum));
        assert_eq!(graph.kind(a), Some(OpKind::Convolution));
        assert_eq!(graph.parents(a).len(), 1);
        assert!(graph.children(b).contains(&sum));
    }

    #[test]
    fn test_fuse_when_reader_precedes_sum() {
        let (mut graph, [a, b, sum, d, out]) = make_test_graph();
        // D now feeds A, so it runs before the sum overwrites B's buffer
        let edge = graph.node(a).unwrap().parent_edges()[0];
        graph.detach_edge(edge);
        graph.link(d, a, &DIMS).unwrap();

        let result = FuseConvolutionSumAndConvolutionSumActivation::new()
            .run(&mut graph)
            .unwrap();
        graph.remove_dropped();

        assert_eq!(result.transforms_applied, 1);
        assert_eq!(graph.kind(a), Some(OpKind::ConvolutionSum));
        assert!(graph.node(sum).is_none());
        assert!(!graph.has_kind(OpKind::Eltwise));
        assert!(graph.are_adjacent(b, a));
        assert_eq!(graph.parents(a), vec![d, b]);
        assert_eq!(graph.children(a), vec![out]);
        assert_eq!(graph.children(b), vec![a, d]);

        let node = graph.node(a).unwrap();
        assert_eq!(node.fused.len(), 1);
        assert_eq!(node.fused[0].name, "sum");
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_fuse_sum_activation() {
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let conv = graph.add_node(OpKind::Convolution, "conv", None);
        let peer = graph.add_node(OpKind::Copy, "peer", None);
        let sum = add_sum(&mut graph, vec![1.0, 1.0]);
        let relu = graph.add_layer(
            OpKind::Activation,
            LayerDesc::new("relu", LayerParams::Activation(ActivationKind::relu())),
        );
        let out = graph.add_node(OpKind::Output, "out", None);
        graph.link(input, conv, &DIMS).unwrap();
        graph.link(input, peer, &DIMS).unwrap();
        graph.link(peer, sum, &DIMS).unwrap();
        graph.link(conv, sum, &DIMS).unwrap();
        graph.link(sum, relu, &DIMS).unwrap();
        graph.link(relu, out, &DIMS).unwrap();

        FuseConvolutionSumAndConvolutionSumActivation::new()
            .run(&mut graph)
            .unwrap();

        assert_eq!(graph.kind(conv), Some(OpKind::ConvolutionSumActivation));
        assert!(!graph.is_live(sum));
        assert!(!graph.is_live(relu));
        assert_eq!(graph.parents(conv), vec![input, peer]);
        assert_eq!(graph.children(conv), vec![out]);
        assert_eq!(graph.node(conv).unwrap().in_dims.len(), 2);

        let fused: Vec<&str> = graph
            .node(conv)
            .unwrap()
            .fused
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(fused, vec!["sum", "relu"]);
    }

    #[test]
    fn test_skip_scaled_sum() {
        let (mut graph, [_, _, sum, d, _]) = make_test_graph();
        graph.remove_node(d);
        if let Some(node) = graph.node_mut(sum) {
            node.layer = Some(LayerDesc::new(
                "sum",
                LayerParams::Eltwise {
                    op: EltwiseOp::Sum,
                    coeffs: vec![1.0, 0.5],
                },
            ));
        }

        let result = FuseConvolutionSumAndConvolutionSumActivation::new()
            .run(&mut graph)
            .unwrap();
        assert_eq!(result.patterns_matched, 0);
    }

    #[test]
    fn test_reject_peer_read_by_conv() {
        let mut graph = Graph::new();
        let input = graph.add_node(OpKind::Input, "data", None);
        let conv = graph.add_node(OpKind::Convolution, "conv", None);
        let sum = add_sum(&mut graph, vec![]);
        graph.link(input, conv, &DIMS).unwrap();
        graph.link(input, sum, &DIMS).unwrap();
        graph.link(conv, sum, &DIMS).unwrap();

        let result = FuseConvolutionSumAndConvolutionSumActivation::new()
            .run(&mut graph)
            .unwrap();

        assert_eq!(result.patterns_matched, 1);
        assert_eq!(result.transforms_applied, 0);
        assert!(graph.is_live(sum));
        assert_eq!(graph.kind(conv), Some(OpKind::Convolution));
    }
}
