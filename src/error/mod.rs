//! Error types for vpu-compiler
//!
//! Pattern mismatches and rejected in-place fusions are not errors: passes
//! simply skip the candidate. Everything here aborts compilation.

use thiserror::Error;

/// Main error type for graph optimization and lowering
#[derive(Error, Debug)]
pub enum CompileError {
    /// A node handle does not refer to a live node
    #[error("Node not found: #{0}")]
    NodeNotFound(usize),

    /// A data handle does not refer to a known data object
    #[error("Data not found: #{0}")]
    DataNotFound(usize),

    /// A stage handle does not refer to a known stage
    #[error("Stage not found: #{0}")]
    StageNotFound(usize),

    /// An operator is configured in a way the target cannot execute
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A parameter required to construct a stage is absent
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// The lowering pass has no parse routine for this operator
    #[error("Unsupported operator '{kind}' in layer {layer}")]
    UnsupportedOperator {
        /// Layer name
        layer: String,
        /// Operator kind
        kind: String,
    },

    /// Graph structure is inconsistent
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Graph contains a cycle
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// Parameter tensor shapes could not be combined
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for compiler operations
pub type CompileResult<T> = Result<T, CompileError>;
