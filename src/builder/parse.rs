//! Graph lowering
//!
//! Walks the optimized graph in topological order and hands every operator
//! to its parse routine, which creates stages and any parameter data.

use std::sync::Arc;

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{CompileError, CompileResult};
use crate::graph::{ActivationKind, Graph, LayerDesc, LayerParams, Node, NodeId, OpKind};
use crate::tensor::{DataType, Dim, DimOrder, Dims};

use super::data::{ArrayContent, DataId, DataLocation};
use super::model::{StageBuilder, StagePosition};
use super::stage::{StageKind, StageParams};

impl StageBuilder {
    /// Lower every live operator of the graph
    ///
    /// Each operator's first output becomes one data object, named after the
    /// operator. Nodes designated as graph outputs, and producers feeding an
    /// `Output` node, get their data marked as network outputs.
    pub fn lower_graph(&mut self, graph: &Graph) -> CompileResult<()> {
        let mut produced: FxHashMap<NodeId, DataId> = FxHashMap::default();

        for id in graph.topological_order()? {
            let node = graph.try_node(id)?;

            let inputs = graph
                .parents(id)
                .into_iter()
                .map(|p| {
                    produced.get(&p).copied().ok_or_else(|| {
                        CompileError::InvalidGraph(format!("{} reads an unlowered producer", node.name))
                    })
                })
                .collect::<CompileResult<Vec<DataId>>>()?;

            match node.kind {
                OpKind::Input => {
                    let data = self.add_node_data(graph, id, DataLocation::Input)?;
                    produced.insert(id, data);
                }
                OpKind::Output => {
                    for input in &inputs {
                        self.try_data_mut(*input)?.location = DataLocation::Output;
                    }
                }
                _ => {
                    let output = self.add_node_data(graph, id, DataLocation::None)?;
                    produced.insert(id, output);
                    self.parse_layer(node, &inputs, output)?;
                }
            }
        }

        for id in graph.outputs() {
            if let Some(data) = produced.get(id) {
                let data = self.try_data_mut(*data)?;
                if data.location == DataLocation::None {
                    data.location = DataLocation::Output;
                }
            }
        }

        debug!(
            "Lowered {} operators into {} stages and {} data objects",
            graph.active_node_count(),
            self.stages().len(),
            self.data_count()
        );
        Ok(())
    }

    fn add_node_data(
        &mut self,
        graph: &Graph,
        id: NodeId,
        location: DataLocation,
    ) -> CompileResult<DataId> {
        let node = graph.try_node(id)?;
        let shape = graph
            .child_edge_at(id, 0)
            .map(|e| e.dims.clone())
            .or_else(|| node.out_dims.first().cloned())
            .ok_or_else(|| {
                CompileError::InvalidGraph(format!("output shape of {} is unknown", node.name))
            })?;
        let dims = Dims::from_shape(&shape)?;

        let name = node.name.clone();
        let (data_type, order) = (self.config.data_type, self.config.order);
        self.add_new_data(move |data| {
            data.name = name;
            data.location = location;
            data.data_type = data_type;
            data.order = order;
            data.dims = dims;
        })
    }

    fn parse_layer(&mut self, node: &Node, inputs: &[DataId], output: DataId) -> CompileResult<()> {
        match node.kind {
            OpKind::Copy => self.parse_copy(node, inputs, output),
            OpKind::Activation => self.parse_activation(node, inputs, output),
            OpKind::Norm => self.parse_norm(node, inputs, output),
            OpKind::FullyConnected => self.parse_fully_connected(node, inputs, output),
            kind => Err(CompileError::UnsupportedOperator {
                layer: node.name.clone(),
                kind: kind.as_str().to_string(),
            }),
        }
    }

    fn parse_copy(&mut self, node: &Node, inputs: &[DataId], output: DataId) -> CompileResult<()> {
        self.add_new_stage(
            node.name.clone(),
            StageKind::None,
            node.name.clone(),
            |_| {},
            inputs,
            &[output],
            StagePosition::Append,
        )?;
        Ok(())
    }

    fn parse_activation(
        &mut self,
        node: &Node,
        inputs: &[DataId],
        output: DataId,
    ) -> CompileResult<()> {
        let input = single_input(node, inputs)?;
        let (kind, params) = match layer_of(node)?.activation() {
            Some(ActivationKind::Relu { negative_slope }) => {
                (StageKind::Relu, StageParams::Relu { negative_slope })
            }
            Some(ActivationKind::Elu { alpha }) => (StageKind::Elu, StageParams::Elu { alpha }),
            Some(other) => {
                return Err(CompileError::UnsupportedOperator {
                    layer: node.name.clone(),
                    kind: other.as_str().to_string(),
                })
            }
            None => {
                return Err(CompileError::MissingParameter(format!(
                    "activation function of {}",
                    node.name
                )))
            }
        };

        self.add_new_stage(
            node.name.clone(),
            kind,
            node.name.clone(),
            move |stage| stage.params = params,
            &[input],
            &[output],
            StagePosition::Append,
        )?;
        Ok(())
    }

    fn parse_norm(&mut self, node: &Node, inputs: &[DataId], output: DataId) -> CompileResult<()> {
        let input = single_input(node, inputs)?;
        let params = match layer_of(node)?.params {
            LayerParams::Norm {
                size,
                k,
                alpha,
                beta,
            } => StageParams::Lrn {
                size,
                k,
                alpha,
                beta,
            },
            _ => {
                return Err(CompileError::MissingParameter(format!(
                    "normalization window of {}",
                    node.name
                )))
            }
        };

        self.add_new_stage(
            node.name.clone(),
            StageKind::Lrn,
            node.name.clone(),
            move |stage| stage.params = params,
            &[input],
            &[output],
            StagePosition::Append,
        )?;
        Ok(())
    }

    fn parse_fully_connected(
        &mut self,
        node: &Node,
        inputs: &[DataId],
        output: DataId,
    ) -> CompileResult<()> {
        let input = single_input(node, inputs)?;
        let params = match &layer_of(node)?.params {
            LayerParams::FullyConnected(params) => params,
            _ => {
                return Err(CompileError::MissingParameter(format!(
                    "fully connected parameters of {}",
                    node.name
                )))
            }
        };

        let in_dims = self.try_data(input)?.dims;
        let out_dims = self.try_data(output)?.dims;
        if out_dims[Dim::X] != 1 || out_dims[Dim::Y] != 1 {
            return Err(CompileError::InvalidConfiguration(format!(
                "FC output {} has invalid batch",
                node.name
            )));
        }

        let weights = params.weights.clone().ok_or_else(|| {
            CompileError::MissingParameter(format!("weights of {}", node.name))
        })?;
        let plane = in_dims[Dim::X].checked_mul(in_dims[Dim::Y]).ok_or_else(|| {
            CompileError::InvalidConfiguration(format!("FC input {} is too large", node.name))
        })?;
        let weights_dims = Dims::new(plane, in_dims[Dim::Z], out_dims.total_size()?);
        let expected = weights_dims.total_size()?;
        if weights.len() != expected as usize {
            return Err(CompileError::InvalidConfiguration(format!(
                "weights of {} hold {} values, expected {}",
                node.name,
                weights.len(),
                expected
            )));
        }

        let name = node.name.clone();
        let weights_data = self.add_new_data(|data| {
            data.name = format!("{}@weights", name);
            data.location = DataLocation::Blob;
            data.data_type = DataType::Fp16;
            data.order = DimOrder::Xyz;
            data.dims = weights_dims;
            data.content = Some(Arc::new(ArrayContent::new(weights)));
        })?;

        let fc = self.add_new_stage(
            node.name.clone(),
            StageKind::FullyConnected,
            node.name.clone(),
            |_| {},
            &[input, weights_data],
            &[output],
            StagePosition::Append,
        )?;

        if let Some(biases) = &params.biases {
            let len = u32::try_from(biases.len()).map_err(|_| {
                CompileError::InvalidConfiguration(format!("too many biases in {}", node.name))
            })?;
            let content = ArrayContent::from_vec(biases);
            let biases_data = self.add_new_data(|data| {
                data.name = format!("{}@biases", name);
                data.location = DataLocation::Blob;
                data.data_type = DataType::Fp16;
                data.dims = Dims::new(len, 1, 1);
                data.content = Some(Arc::new(content));
            })?;
            let biases_name = self.try_data(biases_data)?.name.clone();

            self.add_new_stage(
                biases_name,
                StageKind::Bias,
                node.name.clone(),
                |_| {},
                &[output, biases_data],
                &[output],
                StagePosition::After(fc),
            )?;
        }

        Ok(())
    }
}

fn layer_of(node: &Node) -> CompileResult<&LayerDesc> {
    node.layer
        .as_ref()
        .ok_or_else(|| CompileError::MissingParameter(format!("layer parameters of {}", node.name)))
}

fn single_input(node: &Node, inputs: &[DataId]) -> CompileResult<DataId> {
    match inputs {
        [input] => Ok(*input),
        _ => Err(CompileError::InvalidGraph(format!(
            "{} expects one input, got {}",
            node.name,
            inputs.len()
        ))),
    }
}
