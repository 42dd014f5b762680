//! Stage builder
//!
//! Owns the data objects and the ordered stage list produced by lowering.
//! The stage list is emitted as-is, so it must already respect dependency
//! order: stages that belong together are placed with [`StagePosition`].

use std::fmt::Write as _;
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use log::trace;
use rustc_hash::FxHasher;

use crate::error::{CompileError, CompileResult};
use crate::tensor::{DataType, DimOrder};

use super::data::{Data, DataId, DataLocation};
use super::stage::{Stage, StageId, StageKind, StageParams};

/// Data arena: handle → data, in creation order
pub type DataMap = IndexMap<DataId, Data, BuildHasherDefault<FxHasher>>;

/// Lowering options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringConfig {
    /// Element type of activations
    pub data_type: DataType,
    /// Memory order of activations
    pub order: DimOrder,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            data_type: DataType::Fp16,
            order: DimOrder::Xyz,
        }
    }
}

/// Where a new stage goes in the stage list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePosition {
    /// At the end
    #[default]
    Append,
    /// At an explicit index (clamped to the list length)
    At(usize),
    /// Immediately after another stage
    After(StageId),
}

/// Builder for the lowered stage list
#[derive(Debug, Default)]
pub struct StageBuilder {
    datas: DataMap,
    stages: Vec<Stage>,
    next_data: usize,
    next_stage: usize,
    pub(crate) config: LoweringConfig,
}

impl StageBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder
    pub fn with_config(config: LoweringConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Lowering options in effect
    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    // ========================================================================
    // Factories
    // ========================================================================

    /// Add a data object
    ///
    /// `init` fills in name, location, type, order and dims; strides are
    /// derived afterwards. Fails if the buffer is too large to address.
    pub fn add_new_data<F>(&mut self, init: F) -> CompileResult<DataId>
    where
        F: FnOnce(&mut Data),
    {
        let id = DataId(self.next_data);
        let mut data = Data {
            id,
            ..Default::default()
        };
        init(&mut data);
        data.id = id;
        data.update_strides()?;

        self.next_data += 1;
        trace!("New data {} '{}' {}", id, data.name, data.dims);
        self.datas.insert(id, data);
        Ok(id)
    }

    /// Add a stage
    ///
    /// `init` sets the stage's scalar parameters, which must fit `kind`.
    /// Every input and output must be a known data object.
    #[allow(clippy::too_many_arguments)]
    pub fn add_new_stage<F>(
        &mut self,
        name: impl Into<String>,
        kind: StageKind,
        layer_name: impl Into<String>,
        init: F,
        inputs: &[DataId],
        outputs: &[DataId],
        position: StagePosition,
    ) -> CompileResult<StageId>
    where
        F: FnOnce(&mut Stage),
    {
        for id in inputs.iter().chain(outputs) {
            if !self.datas.contains_key(id) {
                return Err(CompileError::DataNotFound(id.0));
            }
        }

        let index = match position {
            StagePosition::Append => self.stages.len(),
            StagePosition::At(index) => index.min(self.stages.len()),
            StagePosition::After(parent) => self.stage_index(parent)? + 1,
        };

        let id = StageId(self.next_stage);
        let mut stage = Stage {
            id,
            name: name.into(),
            layer_name: layer_name.into(),
            kind,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            params: StageParams::None,
            parent: match position {
                StagePosition::After(parent) => Some(parent),
                _ => None,
            },
        };
        init(&mut stage);
        stage.id = id;
        stage.kind = kind;

        if !stage.params.fits(kind) {
            return Err(CompileError::Internal(format!(
                "parameters {:?} do not belong to a {} stage",
                stage.params, kind
            )));
        }

        self.next_stage += 1;
        trace!("New stage {} '{}' ({}) at {}", id, stage.name, kind, index);
        self.stages.insert(index, stage);
        Ok(id)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get a data object
    pub fn data(&self, id: DataId) -> Option<&Data> {
        self.datas.get(&id)
    }

    /// Get a data object or fail
    pub fn try_data(&self, id: DataId) -> CompileResult<&Data> {
        self.datas.get(&id).ok_or(CompileError::DataNotFound(id.0))
    }

    /// Get a mutable data object or fail
    pub fn try_data_mut(&mut self, id: DataId) -> CompileResult<&mut Data> {
        self.datas.get_mut(&id).ok_or(CompileError::DataNotFound(id.0))
    }

    /// Iterate over data in creation order
    pub fn datas(&self) -> impl Iterator<Item = &Data> {
        self.datas.values()
    }

    /// Number of data objects
    pub fn data_count(&self) -> usize {
        self.datas.len()
    }

    /// Stages in emission order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get a stage
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Position of a stage in the emission order
    pub fn stage_index(&self, id: StageId) -> CompileResult<usize> {
        self.stages
            .iter()
            .position(|s| s.id == id)
            .ok_or(CompileError::StageNotFound(id.0))
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Lay out all blob data contiguously and produce the weights blob
    ///
    /// Assigns each blob data its byte offset. Fails if a blob data has no
    /// content or its content does not match its dims.
    pub fn allocate_blob(&mut self) -> CompileResult<Vec<u8>> {
        let mut blob = Vec::new();

        for data in self.datas.values_mut() {
            if data.location != DataLocation::Blob {
                continue;
            }

            let content = data
                .content
                .clone()
                .ok_or_else(|| CompileError::MissingParameter(format!("content of {}", data.name)))?;
            let bytes = content.materialize(data)?;
            let expected = data.byte_size()?;
            if bytes.len() != expected {
                return Err(CompileError::InvalidConfiguration(format!(
                    "{} produced {} bytes, expected {}",
                    data.name,
                    bytes.len(),
                    expected
                )));
            }

            data.offset = u32::try_from(blob.len()).map_err(|_| {
                CompileError::InvalidConfiguration("weights blob exceeds 4 GiB".to_string())
            })?;
            blob.extend_from_slice(&bytes);
        }

        Ok(blob)
    }

    /// Graphviz rendering of the stage list
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph stages {{");

        for data in self.datas.values() {
            let _ = writeln!(
                out,
                "    {} [shape=box, label=\"{}\\n{}\\n{:?}\"];",
                data.id, data.name, data.dims, data.location
            );
        }

        for stage in &self.stages {
            let params = stage.params.to_string();
            let label = if params.is_empty() {
                format!("{}\\n{}", stage.name, stage.kind)
            } else {
                format!("{}\\n{}\\n{}", stage.name, stage.kind, params)
            };
            let _ = writeln!(out, "    {} [shape=ellipse, label=\"{}\"];", stage.id, label);

            for input in &stage.inputs {
                let _ = writeln!(out, "    {} -> {};", input, stage.id);
            }
            for output in &stage.outputs {
                let _ = writeln!(out, "    {} -> {};", stage.id, output);
            }
        }

        out.push_str("}\n");
        out
    }
}
