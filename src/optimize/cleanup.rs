use std::collections::HashSet;

use super::{schedule, OptimizePass, PassResult};
use crate::error::Result;
use crate::ir::Graph;

/// Removes operators none of whose outputs reach a graph output.
pub struct EliminateDeadCode;

impl OptimizePass for EliminateDeadCode {
    fn name(&self) -> &'static str {
        "eliminate_dead_code"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let mut live: HashSet<_> = graph.outputs().iter().copied().collect();
        let mut dead = Vec::new();
        for id in schedule(graph)?.into_iter().rev() {
            let op = graph.operator(id);
            if op.outputs.iter().any(|v| live.contains(v)) {
                live.extend(op.inputs.iter().copied());
            } else {
                dead.push(id);
            }
        }

        let mut result = PassResult::default();
        for id in dead {
            graph.remove_operator(id)?;
            result.rewrite(1);
        }
        if graph.prune_variables() > 0 {
            result.changed = true;
        }
        Ok(result)
    }
}
