//! Operator graph IR
//!
//! This module provides the mutable DAG the optimizer rewrites in place:
//!
//! - [`Graph`]: owns all nodes and edges in insertion-ordered arenas
//! - [`node`]: node and edge records addressed by [`NodeId`] / [`EdgeId`]
//! - [`layer`]: operator kinds and original parameter sources
//! - [`mutators`]: edge creation and node removal with reconnection
//!
//! # Example
//!
//! ```ignore
//! use vpu_compiler::graph::{Graph, OpKind};
//!
//! let mut graph = Graph::new();
//! let input = graph.add_node(OpKind::Input, "data", None);
//! let copy = graph.add_node(OpKind::Copy, "copy", None);
//! graph.link(input, copy, &[1, 3, 224, 224])?;
//!
//! // Mark, then sweep
//! graph.drop_node(copy);
//! graph.remove_dropped();
//! ```
//!
//! # Handles
//!
//! Parent/child relations are index lookups into the arenas. A handle to a
//! node or edge that was dropped or swept simply resolves to `None`.

pub mod accessors;
pub mod context;
pub mod layer;
pub mod mutators;
pub mod node;

// Re-export main types
pub use context::Graph;
pub use layer::{
    ActivationKind, ConvParams, EltwiseOp, FullyConnectedParams, LayerDesc, LayerParams, OpKind,
    PoolMethod,
};
pub use node::{Edge, EdgeId, Node, NodeId, Shape};
