//! Fluent construction of graphs with inferred output shapes.
//!
//! The converter builds graphs from declared trace shapes; this builder is
//! for graphs assembled in code (tests, benchmarks, programmatic models).

use super::shape::infer_output_shape;
use super::{Graph, OperatorKind, VariableId};
use crate::error::{GraphError, Result};

#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
    inputs: Vec<VariableId>,
    temps: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&mut self, name: &str, shape: &[usize]) -> VariableId {
        let id = self.graph.add_variable(name, shape.to_vec());
        self.inputs.push(id);
        id
    }

    pub fn constant(&mut self, name: &str, shape: &[usize], data: Vec<f32>) -> Result<VariableId> {
        self.graph.add_constant(name, shape.to_vec(), data)
    }

    /// Constant filled with `f(i)` for every flat index `i`.
    pub fn constant_fn(
        &mut self,
        name: &str,
        shape: &[usize],
        f: impl Fn(usize) -> f32,
    ) -> Result<VariableId> {
        let len: usize = shape.iter().product();
        self.constant(name, shape, (0..len).map(f).collect())
    }

    /// Append an operator and return its (single) output.
    pub fn op(&mut self, kind: OperatorKind, inputs: &[VariableId]) -> Result<VariableId> {
        let shapes: Vec<&[usize]> = inputs
            .iter()
            .map(|&v| {
                self.graph
                    .get_variable(v)
                    .map(|var| var.shape.as_slice())
                    .ok_or_else(|| GraphError::invalid(v, "unknown operand"))
            })
            .collect::<Result<_>>()?;
        let shape = infer_output_shape(&kind, &shapes)
            .map_err(|detail| GraphError::shape(kind.name(), detail))?;
        let name = format!("t{}", self.temps);
        self.temps += 1;
        let out = self.graph.add_variable(name, shape);
        self.graph.add_operator(kind, inputs.to_vec(), vec![out])?;
        Ok(out)
    }

    /// Designate outputs, validate and hand over the graph.
    pub fn finish(mut self, outputs: &[VariableId]) -> Result<Graph> {
        self.graph.set_inputs(self.inputs)?;
        self.graph.set_outputs(outputs.to_vec())?;
        self.graph.prune_variables();
        self.graph.validate()?;
        Ok(self.graph)
    }
}
