//! Node and edge records
//!
//! Nodes and edges live in insertion-ordered arenas owned by the graph and
//! refer to each other through stable integer handles.

use std::fmt;
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use super::layer::{LayerDesc, OpKind};

/// Stable handle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Stable handle of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Tensor shape, outermost dimension first (`[N, C, H, W]` for images)
pub type Shape = SmallVec<[usize; 4]>;

/// Edge handle list, sized for the common fan-in/fan-out
pub type EdgeList = SmallVec<[EdgeId; 4]>;

/// Node arena: handle → node, in insertion order
pub type NodeMap = IndexMap<NodeId, Node, BuildHasherDefault<FxHasher>>;

/// Edge arena: handle → edge, in insertion order
pub type EdgeMap = IndexMap<EdgeId, Edge, BuildHasherDefault<FxHasher>>;

/// Operator instance
#[derive(Debug, Clone)]
pub struct Node {
    /// Operator kind, re-tagged by fusion
    pub kind: OpKind,
    /// Node name
    pub name: String,
    /// The operator this node was created from
    pub layer: Option<LayerDesc>,
    /// Operators absorbed by fusion, in fusion order
    pub fused: Vec<LayerDesc>,
    /// Input shapes, per input port
    pub in_dims: Vec<Shape>,
    /// Output shapes, per output
    pub out_dims: Vec<Shape>,
    pub(crate) parent_edges: EdgeList,
    pub(crate) child_edges: EdgeList,
    pub(crate) dropped: bool,
}

impl Node {
    pub(crate) fn new(kind: OpKind, name: String, layer: Option<LayerDesc>) -> Self {
        Self {
            kind,
            name,
            layer,
            fused: Vec::new(),
            in_dims: Vec::new(),
            out_dims: Vec::new(),
            parent_edges: EdgeList::new(),
            child_edges: EdgeList::new(),
            dropped: false,
        }
    }

    /// Incoming edges, ordered by input port
    pub fn parent_edges(&self) -> &[EdgeId] {
        &self.parent_edges
    }

    /// Outgoing edges, ordered by output port
    pub fn child_edges(&self) -> &[EdgeId] {
        &self.child_edges
    }

    /// Whether the node is marked for removal
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// Absorb another operator's descriptor
    pub fn fuse_with(&mut self, layer: LayerDesc) {
        self.fused.push(layer);
    }
}

/// Directed tensor dependency
#[derive(Debug, Clone)]
pub struct Edge {
    /// Producer
    pub parent: NodeId,
    /// Consumer
    pub child: NodeId,
    /// Position among the consumer's parents
    pub input_num: usize,
    /// Position among the producer's children
    pub output_num: usize,
    /// Tensor shape carried by the edge
    pub dims: Shape,
    pub(crate) dropped: bool,
}

impl Edge {
    /// Whether the edge is marked for removal
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }
}
