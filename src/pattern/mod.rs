//! Reachability queries over the operator graph
//!
//! Fusion passes use these to prove that a destructive rewrite is safe.
//!
//! # Example
//!
//! ```ignore
//! use vpu_compiler::pattern::{is_data_dependency, BfsIterator};
//!
//! // Does `consumer` already read `producer`'s result, directly or not?
//! if is_data_dependency(&graph, producer, consumer) {
//!     // ...
//! }
//!
//! for id in BfsIterator::forward(&graph, start) {
//!     println!("Visiting: {}", id);
//! }
//! ```

pub mod traversal;

// Re-export main types
pub use traversal::{has_path, is_data_dependency, reachable_nodes, BfsIterator, Direction};
