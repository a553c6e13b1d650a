//! Graph optimizer.
//!
//! A fixed sequence of rewrite passes, repeated until a whole round leaves
//! the graph unchanged. Every pass must leave a valid graph behind: the
//! optimizer re-validates after each one and aborts with
//! `OptimizationInvariantViolation` otherwise.
//!
//! Pass order and preconditions:
//!
//! 1. `normalize_layout`: explicit padding everywhere, ceil-mode pooling
//!    rewritten as extra bottom/right padding, single-use constant conv
//!    filters reordered to `Ohwi`.
//! 2. `constant_folding`: operators with only constant inputs are evaluated;
//!    batch normalization with constant statistics becomes an axis-1 affine.
//! 3. `merge_elementwise`: chained scalar affines collapse; an activation-free
//!    add feeding another add is flattened into it.
//! 4. `fuse_affine`: an axis-1 affine with constant parameters is folded into
//!    the constant weights of the conv/linear producing its input.
//! 5. `fuse_activation`: a standalone activation is stored on the conv,
//!    linear, add or affine producing its input.
//! 6. `eliminate_dead_code`: operators that cannot reach a graph output go.
//!
//! Every producer/consumer pair above must be connected through a
//! single-use intermediate (see `Graph::single_use_consumer`); a pass that
//! cannot prove its precondition leaves the subgraph alone.

mod cleanup;
mod fold;
mod fusion;
mod layout;

#[cfg(test)]
mod tests;

pub use cleanup::EliminateDeadCode;
pub use fold::ConstantFolding;
pub use fusion::{FuseActivation, FuseAffine, MergeElementwise};
pub use layout::NormalizeLayout;

use tracing::{debug, warn};

use crate::diagnostic::DiagnosticSink;
use crate::error::{GraphError, Result};
use crate::ir::shape::check_operator;
use crate::ir::{Graph, OperatorId, VariableId};

/// Names of the built-in passes in execution order.
pub const PASS_NAMES: [&str; 6] = [
    "normalize_layout",
    "constant_folding",
    "merge_elementwise",
    "fuse_affine",
    "fuse_activation",
    "eliminate_dead_code",
];

/// Outcome of one pass over the graph.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    pub changed: bool,
    /// Patterns rewritten by the pass.
    pub rewrites_applied: usize,
    /// Operators removed from the graph.
    pub erased_operators: usize,
}

impl PassResult {
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_operators: self.erased_operators + other.erased_operators,
        }
    }

    pub(crate) fn rewrite(&mut self, erased: usize) {
        self.changed = true;
        self.rewrites_applied += 1;
        self.erased_operators += erased;
    }
}

pub trait OptimizePass {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph) -> Result<PassResult>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerOptions {
    /// Upper bound on full rounds over the pass list.
    pub max_rounds: usize,
    /// Pass names to skip.
    pub disabled_passes: Vec<String>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_rounds: 8,
            disabled_passes: Vec::new(),
        }
    }
}

pub struct Optimizer {
    options: OptimizerOptions,
    passes: Vec<Box<dyn OptimizePass>>,
}

impl Optimizer {
    pub fn new(options: OptimizerOptions) -> Self {
        for name in &options.disabled_passes {
            if !PASS_NAMES.contains(&name.as_str()) {
                warn!(pass = %name, "ignoring unknown optimizer pass");
            }
        }
        let passes: Vec<Box<dyn OptimizePass>> = vec![
            Box::new(NormalizeLayout),
            Box::new(ConstantFolding),
            Box::new(MergeElementwise),
            Box::new(FuseAffine),
            Box::new(FuseActivation),
            Box::new(EliminateDeadCode),
        ];
        let passes = passes
            .into_iter()
            .filter(|p| !options.disabled_passes.iter().any(|d| d == p.name()))
            .collect();
        Self { options, passes }
    }

    /// Names of the passes this optimizer runs, in order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn optimize(&self, mut graph: Graph, sink: &mut dyn DiagnosticSink) -> Result<Graph> {
        let before = graph.operator_count();
        let mut rounds = 0;
        while rounds < self.options.max_rounds {
            rounds += 1;
            let mut round = PassResult::default();
            for pass in &self.passes {
                let result = pass
                    .run(&mut graph)
                    .map_err(|e| violation(pass.name(), e))?;
                check_graph(&graph).map_err(|e| violation(pass.name(), e))?;
                debug!(
                    pass = pass.name(),
                    round = rounds,
                    changed = result.changed,
                    rewrites = result.rewrites_applied,
                    erased = result.erased_operators,
                    "optimizer pass"
                );
                if result.changed && sink.wants_snapshots() {
                    sink.snapshot(&format!("after {}", pass.name()), &graph);
                }
                round = round.merge(result);
            }
            if !round.changed {
                break;
            }
        }
        debug!(
            rounds,
            operators_before = before,
            operators_after = graph.operator_count(),
            "optimizer finished"
        );
        Ok(graph)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(OptimizerOptions::default())
    }
}

/// Structural validation plus shape agreement of every operator.
fn check_graph(graph: &Graph) -> Result<()> {
    graph.validate()?;
    let ops: Vec<OperatorId> = graph.operators().map(|op| op.id).collect();
    for op in ops {
        check_operator(graph, op)?;
    }
    Ok(())
}

fn violation(pass: &'static str, err: GraphError) -> GraphError {
    let (node, detail) = match err {
        GraphError::InvalidGraph { node, detail } => (node, detail),
        GraphError::ShapeMismatch { operator, detail } => (operator, detail),
        other => (String::new(), other.to_string()),
    };
    GraphError::OptimizationInvariantViolation { pass, node, detail }
}

// ─── Shared helpers ───────────────────────────────────────────────

/// Constant payload of `id`, if it is a live constant.
pub(crate) fn constant_data(graph: &Graph, id: VariableId) -> Option<&[f32]> {
    graph.get_variable(id).and_then(|v| v.data.as_deref())
}

/// Snapshot of live operator ids in topological order. Passes iterate this
/// and skip ids that an earlier rewrite removed.
pub(crate) fn schedule(graph: &Graph) -> Result<Vec<OperatorId>> {
    graph.topological_order()
}
