//! Ordering and structural validation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use super::{Graph, OperatorId};
use crate::error::{GraphError, Result};

impl Graph {
    /// Operators in dependency order. Among ready operators the lowest id
    /// (earliest inserted) goes first, so the order is a pure function of
    /// the graph.
    pub fn topological_order(&self) -> Result<Vec<OperatorId>> {
        let mut pending: BTreeMap<OperatorId, usize> = BTreeMap::new();
        for op in self.operators() {
            let deps = op
                .inputs
                .iter()
                .filter(|&&v| self.variable(v).producer.is_some())
                .count();
            pending.insert(op.id, deps);
        }

        let mut ready: BinaryHeap<Reverse<OperatorId>> = pending
            .iter()
            .filter(|&(_, &n)| n == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &out in &self.operator(id).outputs {
                for &consumer in &self.variable(out).consumers {
                    let uses = self
                        .operator(consumer)
                        .inputs
                        .iter()
                        .filter(|&&v| v == out)
                        .count();
                    if let Some(n) = pending.get_mut(&consumer) {
                        *n -= uses;
                        if *n == 0 {
                            ready.push(Reverse(consumer));
                        }
                    }
                }
            }
        }

        if order.len() != pending.len() {
            let stuck = pending
                .iter()
                .find(|&(_, &n)| n > 0)
                .map(|(&id, _)| self.operator(id).label())
                .unwrap_or_default();
            return Err(GraphError::invalid(stuck, "operator dependencies form a cycle"));
        }
        Ok(order)
    }

    /// Check every structural invariant of the IR.
    pub fn validate(&self) -> Result<()> {
        for op in self.operators() {
            for &v in op.inputs.iter().chain(&op.outputs) {
                if self.get_variable(v).is_none() {
                    return Err(GraphError::invalid(op.label(), format!("references dead {v}")));
                }
            }
            for &v in &op.inputs {
                if !self.variable(v).consumers.contains(&op.id) {
                    return Err(GraphError::invalid(v, format!("missing consumer {}", op.id)));
                }
            }
            for &v in &op.outputs {
                if self.variable(v).producer != Some(op.id) {
                    return Err(GraphError::invalid(v, format!("missing producer {}", op.id)));
                }
            }
        }

        for var in self.variables() {
            if let Some(p) = var.producer {
                match self.get_operator(p) {
                    Some(op) if op.outputs.contains(&var.id) => {}
                    _ => return Err(GraphError::invalid(var.id, format!("stale producer {p}"))),
                }
                if var.is_constant() {
                    return Err(GraphError::invalid(var.id, "constant has a producer"));
                }
            }
            for &c in &var.consumers {
                match self.get_operator(c) {
                    Some(op) if op.inputs.contains(&var.id) => {}
                    _ => return Err(GraphError::invalid(var.id, format!("stale consumer {c}"))),
                }
            }
            if let Some(data) = &var.data {
                if data.len() != var.size() {
                    return Err(GraphError::invalid(
                        var.id,
                        format!("payload has {} elements for shape {:?}", data.len(), var.shape),
                    ));
                }
            }
            if var.shape.contains(&0) {
                return Err(GraphError::invalid(var.id, format!("empty dimension in {:?}", var.shape)));
            }
            let sourced = var.producer.is_some() || var.is_constant() || self.is_input(var.id);
            if !sourced {
                return Err(GraphError::invalid(
                    var.id,
                    "not a graph input, a constant, or an operator output",
                ));
            }
            if var.consumers.is_empty() && !self.is_output(var.id) && !self.is_input(var.id) {
                return Err(GraphError::invalid(var.id, "value is never used"));
            }
        }

        for &v in self.inputs.iter().chain(&self.outputs) {
            if self.get_variable(v).is_none() {
                return Err(GraphError::invalid(v, "designated input/output is dead"));
            }
        }

        if is_cyclic_directed(&self.dependency_graph()) {
            // topological_order names the operator stuck on the cycle
            self.topological_order()?;
            return Err(GraphError::invalid("graph", "operator dependencies form a cycle"));
        }
        Ok(())
    }

    /// Operator-level dependency graph (edge `a → b` when `b` reads an
    /// output of `a`), weighted with operator labels.
    pub fn dependency_graph(&self) -> DiGraph<String, ()> {
        let mut g = DiGraph::new();
        let mut nodes = BTreeMap::new();
        for op in self.operators() {
            nodes.insert(op.id, g.add_node(op.label()));
        }
        for op in self.operators() {
            for &v in &op.inputs {
                if let Some(p) = self.variable(v).producer {
                    if let (Some(&from), Some(&to)) = (nodes.get(&p), nodes.get(&op.id)) {
                        g.update_edge(from, to, ());
                    }
                }
            }
        }
        g
    }
}
