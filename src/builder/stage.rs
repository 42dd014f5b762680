//! Lowered stages
//!
//! A stage is one unit of computation over input and output data. Its scalar
//! parameters are fixed by the initializer passed at construction.

use std::fmt;

use super::data::DataId;

/// Stable handle of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Stage kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Parameterless pass-through
    None,
    /// Exponential linear unit
    Elu,
    /// Rectified linear unit
    Relu,
    /// Local response normalization
    Lrn,
    /// Fully connected
    FullyConnected,
    /// Bias accumulation
    Bias,
}

impl StageKind {
    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::None => "None",
            StageKind::Elu => "Elu",
            StageKind::Relu => "Relu",
            StageKind::Lrn => "LRN",
            StageKind::FullyConnected => "FullyConnected",
            StageKind::Bias => "Bias",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar parameters captured at construction
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StageParams {
    /// No parameters
    #[default]
    None,
    /// ELU saturation
    Elu {
        /// Scale of the negative branch
        alpha: f32,
    },
    /// ReLU slope
    Relu {
        /// Slope of the negative branch
        negative_slope: f32,
    },
    /// LRN window
    Lrn {
        /// Window size
        size: u32,
        /// Bias constant
        k: f32,
        /// Scale
        alpha: f32,
        /// Exponent
        beta: f32,
    },
}

impl StageParams {
    /// Whether these parameters belong to a stage of the given kind
    pub fn fits(&self, kind: StageKind) -> bool {
        match self {
            StageParams::None => matches!(
                kind,
                StageKind::None | StageKind::FullyConnected | StageKind::Bias
            ),
            StageParams::Elu { .. } => kind == StageKind::Elu,
            StageParams::Relu { .. } => kind == StageKind::Relu,
            StageParams::Lrn { .. } => kind == StageKind::Lrn,
        }
    }
}

impl fmt::Display for StageParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageParams::None => Ok(()),
            StageParams::Elu { alpha } => write!(f, "alpha={}", alpha),
            StageParams::Relu { negative_slope } => write!(f, "negative_slope={}", negative_slope),
            StageParams::Lrn {
                size,
                k,
                alpha,
                beta,
            } => write!(
                f,
                "size={}\\nk={}\\nalpha={}\\nbeta={}",
                size, k, alpha, beta
            ),
        }
    }
}

/// One unit of lowered computation
#[derive(Debug, Clone)]
pub struct Stage {
    /// Handle
    pub id: StageId,
    /// Stage name
    pub name: String,
    /// Name of the graph operator it was lowered from
    pub layer_name: String,
    /// Kind tag
    pub kind: StageKind,
    /// Inputs, in port order
    pub inputs: Vec<DataId>,
    /// Outputs, in port order
    pub outputs: Vec<DataId>,
    /// Scalar parameters
    pub params: StageParams,
    /// Stage this one was placed after
    pub parent: Option<StageId>,
}
