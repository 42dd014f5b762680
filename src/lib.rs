//! # VPU Compiler
//!
//! Compilation core of a neural-network inference engine for a vision
//! processing unit.
//!
//! The crate rewrites an operator graph in place, fusing adjacent operators
//! and removing redundant ones, then lowers it into an ordered list of stages
//! over typed, strided data buffers and encodes that list as a binary stream.
//!
//! ## Features
//!
//! - **Graph IR**: arena-backed operator DAG with port-preserving rewiring
//! - **Fusion**: convolution with activation, sum and group merging, batch
//!   norm with scale, identity removal
//! - **Lowering**: stage builder with placement control and a weights blob
//! - **Encoding**: little-endian instruction stream
//!
//! ## Example
//!
//! ```ignore
//! use vpu_compiler::prelude::*;
//!
//! let output = compile_graph(&mut graph, &CompileOptions::default())?;
//! println!("{} byte stream", output.stream.len());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod builder;
pub mod error;
pub mod graph;
pub mod io;
pub mod pattern;
pub mod tensor;
pub mod traits;
pub mod transformers;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use vpu_compiler::prelude::*`
pub mod prelude {
    pub use crate::builder::{LoweringConfig, StageBuilder, StageKind, StagePosition};
    pub use crate::error::{CompileError, CompileResult};
    pub use crate::graph::{ActivationKind, Graph, LayerDesc, LayerParams, NodeId, OpKind};
    pub use crate::io::{compile_graph, CompileOptions, CompileOutput, CompileStats};
    pub use crate::pattern::is_data_dependency;
    pub use crate::traits::GraphPass;
    pub use crate::transformers::{OptimizationPipeline, PassResult};
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{CompileError, CompileResult};
pub use traits::GraphPass;

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
