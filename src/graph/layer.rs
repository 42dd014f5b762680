//! Operator kinds and their parameter sources
//!
//! A node's [`OpKind`] is mutable: fusion re-tags a convolution as one of the
//! composite kinds. The [`LayerDesc`] values are the original operators as
//! supplied by the network loader and are only read as parameter sources.

use std::fmt;

use ndarray::{concatenate, Array1, ArrayD, Axis};

use crate::error::{CompileError, CompileResult};

/// Operator kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Network input
    Input,
    /// Network output
    Output,
    /// Convolution
    Convolution,
    /// Convolution with a fused activation
    ConvolutionActivation,
    /// Convolution with a fused in-place elementwise sum
    ConvolutionSum,
    /// Convolution with a fused sum followed by an activation
    ConvolutionSumActivation,
    /// Elementwise activation
    Activation,
    /// Spatial pooling
    Pooling,
    /// Batch normalization
    BatchNormalization,
    /// Batch normalization with a fused scale/shift
    BatchNormScale,
    /// Per-channel scale and shift
    ScaleShift,
    /// `(offset + scale * x) ^ power`
    Power,
    /// Explicit buffer copy
    Copy,
    /// Channel split
    Split,
    /// Channel concatenation
    Concatenation,
    /// Elementwise binary operation
    Eltwise,
    /// Fully connected (inner product)
    FullyConnected,
    /// Local response normalization
    Norm,
}

impl OpKind {
    /// Stable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Input => "Input",
            OpKind::Output => "Output",
            OpKind::Convolution => "Convolution",
            OpKind::ConvolutionActivation => "Convolution_Activation",
            OpKind::ConvolutionSum => "Convolution_Sum",
            OpKind::ConvolutionSumActivation => "Convolution_Sum_Activation",
            OpKind::Activation => "Activation",
            OpKind::Pooling => "Pooling",
            OpKind::BatchNormalization => "BatchNormalization",
            OpKind::BatchNormScale => "BatchNorm_Scale",
            OpKind::ScaleShift => "ScaleShift",
            OpKind::Power => "Power",
            OpKind::Copy => "Copy",
            OpKind::Split => "Split",
            OpKind::Concatenation => "Concatenation",
            OpKind::Eltwise => "Eltwise",
            OpKind::FullyConnected => "FullyConnected",
            OpKind::Norm => "Norm",
        }
    }

    /// Whether this is a composite kind produced by fusion
    pub fn is_fused(&self) -> bool {
        matches!(
            self,
            OpKind::ConvolutionActivation
                | OpKind::ConvolutionSum
                | OpKind::ConvolutionSumActivation
                | OpKind::BatchNormScale
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Elementwise activation function
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationKind {
    /// `max(x, 0) + negative_slope * min(x, 0)`
    Relu {
        /// Slope applied to negative inputs
        negative_slope: f32,
    },
    /// `x` for `x > 0`, `alpha * (exp(x) - 1)` otherwise
    Elu {
        /// Saturation scale for negative inputs
        alpha: f32,
    },
    /// Logistic sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Gaussian error linear unit (tanh approximation)
    Gelu,
    /// Absolute value
    Abs,
}

impl ActivationKind {
    /// Plain ReLU
    pub fn relu() -> Self {
        ActivationKind::Relu {
            negative_slope: 0.0,
        }
    }

    /// Evaluate the activation on a single value
    pub fn apply(&self, x: f32) -> f32 {
        match *self {
            ActivationKind::Relu { negative_slope } => {
                if x > 0.0 {
                    x
                } else {
                    negative_slope * x
                }
            }
            ActivationKind::Elu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * (x.exp() - 1.0)
                }
            }
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Gelu => {
                let c = (2.0 / std::f32::consts::PI).sqrt();
                0.5 * x * (1.0 + (c * (x + 0.044715 * x * x * x)).tanh())
            }
            ActivationKind::Abs => x.abs(),
        }
    }

    /// Whether `a <= b` implies `f(a) <= f(b)`
    ///
    /// Such functions commute with a max reduction, which is what allows an
    /// activation to move across a max-pooling node.
    pub fn is_monotonic_nondecreasing(&self) -> bool {
        match *self {
            ActivationKind::Relu { negative_slope } => negative_slope >= 0.0,
            ActivationKind::Elu { alpha } => alpha >= 0.0,
            ActivationKind::Sigmoid | ActivationKind::Tanh => true,
            ActivationKind::Gelu | ActivationKind::Abs => false,
        }
    }

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationKind::Relu { .. } => "relu",
            ActivationKind::Elu { .. } => "elu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Gelu => "gelu",
            ActivationKind::Abs => "abs",
        }
    }
}

/// Pooling reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMethod {
    /// Maximum over the window
    Max,
    /// Average over the window
    Avg,
}

/// Elementwise binary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EltwiseOp {
    /// Weighted sum
    Sum,
    /// Product
    Prod,
    /// Maximum
    Max,
}

/// Convolution parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    /// Kernel size `[kh, kw]`
    pub kernel: [usize; 2],
    /// Stride `[sh, sw]`
    pub stride: [usize; 2],
    /// Padding `[ph, pw]`
    pub pad: [usize; 2],
    /// Number of channel groups
    pub group: usize,
    /// Output channel count
    pub out_channels: usize,
    /// Weights `[out_channels, in_channels / group, kh, kw]`
    pub weights: Option<ArrayD<f32>>,
    /// Per-output-channel biases
    pub biases: Option<Array1<f32>>,
}

impl ConvParams {
    /// Parameters without attached weights
    pub fn new(kernel: [usize; 2], out_channels: usize) -> Self {
        Self {
            kernel,
            stride: [1, 1],
            pad: [0, 0],
            group: 1,
            out_channels,
            weights: None,
            biases: None,
        }
    }

    /// Attach weights
    pub fn with_weights(mut self, weights: ArrayD<f32>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Attach biases
    pub fn with_biases(mut self, biases: Array1<f32>) -> Self {
        self.biases = Some(biases);
        self
    }

    /// Whether `other` can be appended as extra channel groups
    pub fn can_merge_with(&self, other: &ConvParams) -> bool {
        if self.kernel != other.kernel || self.stride != other.stride || self.pad != other.pad {
            return false;
        }

        let weights_ok = match (&self.weights, &other.weights) {
            (Some(a), Some(b)) => a.ndim() == b.ndim() && a.shape()[1..] == b.shape()[1..],
            (None, None) => true,
            _ => false,
        };

        weights_ok && self.biases.is_some() == other.biases.is_some()
    }

    /// Append `other`'s output channels as additional groups
    pub fn merge_with(&mut self, other: &ConvParams) -> CompileResult<()> {
        if !self.can_merge_with(other) {
            return Err(CompileError::Internal(
                "convolution parameters are not mergeable".to_string(),
            ));
        }

        if let (Some(a), Some(b)) = (&self.weights, &other.weights) {
            self.weights = Some(concatenate(Axis(0), &[a.view(), b.view()])?);
        }
        if let (Some(a), Some(b)) = (&self.biases, &other.biases) {
            self.biases = Some(concatenate(Axis(0), &[a.view(), b.view()])?);
        }

        self.group += other.group;
        self.out_channels += other.out_channels;
        Ok(())
    }
}

/// Fully connected layer parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FullyConnectedParams {
    /// Number of outputs
    pub out_size: usize,
    /// Weights, any layout with `out_size * inputs` elements
    pub weights: Option<ArrayD<f32>>,
    /// Per-output biases
    pub biases: Option<Array1<f32>>,
}

/// Operator parameters
#[derive(Debug, Clone, PartialEq)]
pub enum LayerParams {
    /// No parameters
    None,
    /// Convolution
    Convolution(ConvParams),
    /// Activation
    Activation(ActivationKind),
    /// Pooling
    Pooling {
        /// Reduction
        method: PoolMethod,
        /// Window `[kh, kw]`
        kernel: [usize; 2],
        /// Stride `[sh, sw]`
        stride: [usize; 2],
    },
    /// Batch normalization
    BatchNorm {
        /// Variance epsilon
        epsilon: f32,
    },
    /// Scale and shift, both optional
    ScaleShift {
        /// Per-channel multipliers
        weights: Option<Array1<f32>>,
        /// Per-channel offsets
        biases: Option<Array1<f32>>,
    },
    /// Power
    Power {
        /// Exponent
        power: f32,
        /// Input multiplier
        scale: f32,
        /// Input offset
        offset: f32,
    },
    /// Elementwise
    Eltwise {
        /// Operation
        op: EltwiseOp,
        /// Per-input coefficients (empty means all ones)
        coeffs: Vec<f32>,
    },
    /// Fully connected
    FullyConnected(FullyConnectedParams),
    /// Local response normalization
    Norm {
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

/// Original operator as delivered by the network loader
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDesc {
    /// Layer name
    pub name: String,
    /// Parameters
    pub params: LayerParams,
}

impl LayerDesc {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, params: LayerParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Activation kind, if this is an activation layer
    pub fn activation(&self) -> Option<ActivationKind> {
        match self.params {
            LayerParams::Activation(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether this is a max-pooling layer
    pub fn is_max_pool(&self) -> bool {
        matches!(
            self.params,
            LayerParams::Pooling {
                method: PoolMethod::Max,
                ..
            }
        )
    }

    /// Whether this is a sum with all coefficients equal to one
    pub fn is_unit_sum(&self) -> bool {
        match &self.params {
            LayerParams::Eltwise {
                op: EltwiseOp::Sum,
                coeffs,
            } => coeffs.iter().all(|&c| c == 1.0),
            _ => false,
        }
    }

    /// Whether this operator leaves its input unchanged
    pub fn is_identity(&self) -> bool {
        match &self.params {
            LayerParams::Power {
                power,
                scale,
                offset,
            } => *power == 1.0 && *scale == 1.0 && *offset == 0.0,
            LayerParams::ScaleShift { weights, biases } => weights.is_none() && biases.is_none(),
            _ => false,
        }
    }
}
