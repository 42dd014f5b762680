//! Lowering of an optimized graph into stages
//!
//! This module turns operators into an ordered stage list over data buffers:
//!
//! - [`StageBuilder`]: owns data and stages, places new stages
//! - [`data`]: typed, strided buffers and their deferred content
//! - [`stage`]: stage kinds and captured scalar parameters
//! - `parse`: per-operator lowering routines behind [`StageBuilder::lower_graph`]
//!
//! # Example
//!
//! ```ignore
//! use vpu_compiler::builder::{LoweringConfig, StageBuilder};
//!
//! let mut builder = StageBuilder::with_config(LoweringConfig::default());
//! builder.lower_graph(&graph)?;
//! let blob = builder.allocate_blob()?;
//! println!("{}", builder.to_dot());
//! ```

pub mod data;
pub mod model;
mod parse;
pub mod stage;

// Re-export main types
pub use data::{ArrayContent, Data, DataContent, DataId, DataLocation};
pub use model::{DataMap, LoweringConfig, StageBuilder, StagePosition};
pub use stage::{Stage, StageId, StageKind, StageParams};
