//! Compile driver, validation and stream encoding
//!
//! This module ties the optimizer and the lowering compiler together.
//!
//! # Example
//!
//! ```ignore
//! use vpu_compiler::io::{compile_graph, CompileOptions};
//!
//! let output = compile_graph(&mut graph, &CompileOptions::default())?;
//! println!("{} stages, {} byte stream", output.stats.stage_count, output.stream.len());
//! ```

pub mod validation;
pub mod writer;

// Re-exports
pub use validation::{
    check_graph, validate_graph, validate_graph_with_options, ValidationOptions, ValidationResult,
};
pub use writer::{encode_stage, encode_stages, BlobWriter, DATA_HEADER_SIZE};

use log::debug;

use crate::builder::{LoweringConfig, StageBuilder};
use crate::error::CompileResult;
use crate::graph::Graph;
use crate::transformers::{OptimizationPipeline, PassResult};

/// Compilation statistics
#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    /// Live node count before optimization
    pub original_nodes: usize,
    /// Live node count after optimization
    pub optimized_nodes: usize,
    /// Nodes removed by optimization
    pub nodes_reduced: usize,
    /// Number of lowered stages
    pub stage_count: usize,
    /// Number of lowered data objects
    pub data_count: usize,
    /// Instruction stream size in bytes
    pub stream_size: usize,
    /// Weights blob size in bytes
    pub blob_size: usize,
    /// Optimization statistics
    pub transform: PassResult,
}

impl CompileStats {
    /// Calculate reduction percentage
    pub fn node_reduction_percent(&self) -> f64 {
        if self.original_nodes == 0 {
            0.0
        } else {
            (self.nodes_reduced as f64 / self.original_nodes as f64) * 100.0
        }
    }
}

/// Compilation options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the fusion pipeline before lowering
    pub optimize: bool,
    /// Validate before optimization
    pub validate_input: bool,
    /// Validate after optimization
    pub validate_output: bool,
    /// Lowering options
    pub lowering: LoweringConfig,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            validate_input: true,
            validate_output: true,
            lowering: LoweringConfig::default(),
        }
    }
}

impl CompileOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable optimization
    pub fn with_optimize(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    /// Enable or disable both validation steps
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_input = enabled;
        self.validate_output = enabled;
        self
    }

    /// Set lowering options
    pub fn with_lowering(mut self, lowering: LoweringConfig) -> Self {
        self.lowering = lowering;
        self
    }
}

/// Result of a compilation
#[derive(Debug)]
pub struct CompileOutput {
    /// Serialized stage list
    pub stream: Vec<u8>,
    /// Weights blob referenced by `Blob` data offsets
    pub blob: Vec<u8>,
    /// Statistics
    pub stats: CompileStats,
    /// The builder, for inspection and dumps
    pub builder: StageBuilder,
}

/// Optimize, lower and encode a graph
///
/// The graph is rewritten in place when `options.optimize` is set.
pub fn compile_graph(graph: &mut Graph, options: &CompileOptions) -> CompileResult<CompileOutput> {
    if options.validate_input {
        check_graph(graph)?;
    }

    let original_nodes = graph.active_node_count();
    let transform = if options.optimize {
        OptimizationPipeline::default().run(graph)?
    } else {
        PassResult::new()
    };
    let optimized_nodes = graph.active_node_count();

    if options.validate_output {
        check_graph(graph)?;
    }

    let mut builder = StageBuilder::with_config(options.lowering);
    builder.lower_graph(graph)?;
    let blob = builder.allocate_blob()?;
    let stream = encode_stages(&builder)?;

    let stats = CompileStats {
        original_nodes,
        optimized_nodes,
        nodes_reduced: original_nodes.saturating_sub(optimized_nodes),
        stage_count: builder.stages().len(),
        data_count: builder.data_count(),
        stream_size: stream.len(),
        blob_size: blob.len(),
        transform,
    };
    debug!(
        "Compiled {} nodes into {} stages ({} byte stream, {} byte blob)",
        optimized_nodes, stats.stage_count, stats.stream_size, stats.blob_size
    );

    Ok(CompileOutput {
        stream,
        blob,
        stats,
        builder,
    })
}
