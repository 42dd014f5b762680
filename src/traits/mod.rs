//! Core traits for vpu-compiler
//!
//! Defines the interface every graph rewrite pass implements.

use crate::error::CompileResult;
use crate::graph::Graph;
use crate::transformers::common::PassResult;

/// A single graph rewrite pass
///
/// Passes mutate the graph in place. Nodes they remove are only flagged as
/// dropped; the pipeline sweeps them after the pass returns. A candidate that
/// fails any precondition is skipped without touching the graph.
///
/// # Example
///
/// ```ignore
/// struct NoOpPass;
///
/// impl GraphPass for NoOpPass {
///     fn name(&self) -> &'static str {
///         "NoOpPass"
///     }
///
///     fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
///         Ok(PassResult::new())
///     }
/// }
/// ```
pub trait GraphPass {
    /// Name of the pass
    fn name(&self) -> &'static str;

    /// Apply the pass
    fn run(&self, graph: &mut Graph) -> CompileResult<PassResult>;

    /// Cheap check whether the pass could match anything
    fn is_applicable(&self, _graph: &Graph) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpKind;

    struct CountingPass;

    impl GraphPass for CountingPass {
        fn name(&self) -> &'static str {
            "CountingPass"
        }

        fn run(&self, graph: &mut Graph) -> CompileResult<PassResult> {
            let mut result = PassResult::new();
            result.patterns_matched = graph.active_node_count();
            Ok(result)
        }
    }

    #[test]
    fn test_trait_object_dispatch() {
        let mut graph = Graph::new();
        graph.add_node(OpKind::Input, "data", None);

        let pass: Box<dyn GraphPass> = Box::new(CountingPass);
        assert!(pass.is_applicable(&graph));

        let result = pass.run(&mut graph).unwrap();
        assert_eq!(pass.name(), "CountingPass");
        assert_eq!(result.patterns_matched, 1);
    }
}
