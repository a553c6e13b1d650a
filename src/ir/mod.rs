//! Graph intermediate representation.
//!
//! A `Graph` owns two arenas: variables (tensors) and operators
//! (computations). Ids index the arenas and are never reused, so an id held
//! across a rewrite either still names the same node or names nothing.
//! Every mutation goes through `Graph` methods, which keep the
//! producer/consumer back-references of variables consistent with the
//! operand lists of operators.
//!
//! ```text
//! trace ─→ frontend ─→ Graph ─→ optimize ─→ Graph ─→ backend ─→ descriptor + weights
//! ```

pub mod builder;
pub mod dump;
pub mod operator;
pub mod shape;
pub mod traverse;
pub mod variable;


pub use builder::GraphBuilder;
pub use operator::{
    Activation, Conv2DParams, FilterLayout, Operator, OperatorId, OperatorKind, Padding,
    Pool2DParams, PoolMode,
};
pub use variable::{DType, Variable, VariableId};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    variables: Vec<Option<Variable>>,
    operators: Vec<Option<Operator>>,
    inputs: Vec<VariableId>,
    outputs: Vec<VariableId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Lookup ───────────────────────────────────────────────────

    pub fn get_variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_operator(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(id.index()).and_then(Option::as_ref)
    }

    /// Panics if `id` does not name a live variable; ids handed out by this
    /// graph stay valid until the variable is removed.
    pub(crate) fn variable(&self, id: VariableId) -> &Variable {
        match self.get_variable(id) {
            Some(v) => v,
            None => panic!("{id} is not a live variable"),
        }
    }

    /// Panics if `id` does not name a live operator.
    pub(crate) fn operator(&self, id: OperatorId) -> &Operator {
        match self.get_operator(id) {
            Some(op) => op,
            None => panic!("{id} is not a live operator"),
        }
    }

    fn variable_mut(&mut self, id: VariableId) -> Result<&mut Variable> {
        self.variables
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| GraphError::invalid(id, "variable is not live"))
    }

    fn operator_mut(&mut self, id: OperatorId) -> Result<&mut Operator> {
        self.operators
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| GraphError::invalid(id, "operator is not live"))
    }

    /// Live variables in id order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter_map(Option::as_ref)
    }

    /// Live operators in id (insertion) order.
    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.iter().filter_map(Option::as_ref)
    }

    pub fn operator_count(&self) -> usize {
        self.operators().count()
    }

    pub fn variable_count(&self) -> usize {
        self.variables().count()
    }

    pub fn inputs(&self) -> &[VariableId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VariableId] {
        &self.outputs
    }

    pub fn is_input(&self, id: VariableId) -> bool {
        self.inputs.contains(&id)
    }

    pub fn is_output(&self, id: VariableId) -> bool {
        self.outputs.contains(&id)
    }

    pub fn is_constant(&self, id: VariableId) -> bool {
        self.get_variable(id).is_some_and(Variable::is_constant)
    }

    /// The only operator reading `id`, provided it reads it exactly once and
    /// `id` is not a graph output.
    pub fn single_use_consumer(&self, id: VariableId) -> Option<OperatorId> {
        let var = self.get_variable(id)?;
        if self.is_output(id) || var.consumers.len() != 1 {
            return None;
        }
        let consumer = var.consumers[0];
        let uses = self
            .operator(consumer)
            .inputs
            .iter()
            .filter(|&&i| i == id)
            .count();
        (uses == 1).then_some(consumer)
    }

    // ─── Construction ─────────────────────────────────────────────

    pub fn add_variable(&mut self, name: impl Into<String>, shape: Vec<usize>) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(Some(Variable {
            id,
            name: name.into(),
            shape,
            dtype: DType::Float32,
            data: None,
            producer: None,
            consumers: Vec::new(),
        }));
        id
    }

    /// Add a constant; `data` must hold exactly `prod(shape)` elements.
    pub fn add_constant(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<VariableId> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(GraphError::shape(
                &name,
                format!(
                    "constant of shape {:?} needs {} elements, got {}",
                    shape,
                    expected,
                    data.len()
                ),
            ));
        }
        let id = self.add_variable(name, shape);
        self.variable_mut(id)?.data = Some(data);
        Ok(id)
    }

    /// Turn an existing variable into a constant, e.g. after folding.
    pub fn set_constant_data(&mut self, id: VariableId, data: Vec<f32>) -> Result<()> {
        let var = self.variable_mut(id)?;
        if data.len() != var.size() {
            return Err(GraphError::shape(
                id,
                format!("expected {} elements, got {}", var.size(), data.len()),
            ));
        }
        if var.producer.is_some() {
            return Err(GraphError::invalid(id, "cannot attach data to a produced variable"));
        }
        var.data = Some(data);
        Ok(())
    }

    pub fn add_operator(
        &mut self,
        kind: OperatorKind,
        inputs: Vec<VariableId>,
        outputs: Vec<VariableId>,
    ) -> Result<OperatorId> {
        let id = OperatorId(self.operators.len() as u32);
        for &v in &inputs {
            if self.get_variable(v).is_none() {
                return Err(GraphError::invalid(id, format!("input {v} is not live")));
            }
        }
        for (i, &v) in outputs.iter().enumerate() {
            let var = self
                .get_variable(v)
                .ok_or_else(|| GraphError::invalid(id, format!("output {v} is not live")))?;
            if let Some(p) = var.producer {
                return Err(GraphError::invalid(id, format!("{v} is already produced by {p}")));
            }
            if var.is_constant() {
                return Err(GraphError::invalid(id, format!("{v} is a constant")));
            }
            if outputs[..i].contains(&v) || inputs.contains(&v) {
                return Err(GraphError::invalid(id, format!("{v} appears twice")));
            }
        }
        for &v in &inputs {
            let var = self.variable_mut(v)?;
            if !var.consumers.contains(&id) {
                var.consumers.push(id);
            }
        }
        for &v in &outputs {
            self.variable_mut(v)?.producer = Some(id);
        }
        self.operators.push(Some(Operator {
            id,
            kind,
            inputs,
            outputs,
        }));
        Ok(id)
    }

    pub fn set_inputs(&mut self, inputs: Vec<VariableId>) -> Result<()> {
        for &v in &inputs {
            let var = self.variable_mut(v)?;
            if var.producer.is_some() || var.is_constant() {
                return Err(GraphError::invalid(v, "graph input must be a free variable"));
            }
        }
        self.inputs = inputs;
        Ok(())
    }

    pub fn set_outputs(&mut self, outputs: Vec<VariableId>) -> Result<()> {
        for &v in &outputs {
            self.variable_mut(v)?;
        }
        self.outputs = outputs;
        Ok(())
    }

    // ─── Rewriting ────────────────────────────────────────────────

    /// Detach and return an operator. Its operands stay in the graph.
    pub fn remove_operator(&mut self, id: OperatorId) -> Result<Operator> {
        let op = self
            .operators
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| GraphError::invalid(id, "operator is not live"))?;
        for &v in &op.inputs {
            self.variable_mut(v)?.consumers.retain(|&c| c != id);
        }
        for &v in &op.outputs {
            let var = self.variable_mut(v)?;
            if var.producer == Some(id) {
                var.producer = None;
            }
        }
        Ok(op)
    }

    /// Make `op` produce `new` in place of its output `old`.
    pub fn rebind_output(&mut self, op: OperatorId, old: VariableId, new: VariableId) -> Result<()> {
        if let Some(p) = self.variable_mut(new)?.producer {
            return Err(GraphError::invalid(new, format!("already produced by {p}")));
        }
        let operator = self.operator_mut(op)?;
        let slot = operator
            .outputs
            .iter_mut()
            .find(|v| **v == old)
            .ok_or_else(|| GraphError::invalid(op, format!("{old} is not an output")))?;
        *slot = new;
        self.variable_mut(old)?.producer = None;
        self.variable_mut(new)?.producer = Some(op);
        Ok(())
    }

    /// Replace every use of `old` as an input of `op` with `new`.
    pub fn replace_input(&mut self, op: OperatorId, old: VariableId, new: VariableId) -> Result<()> {
        self.variable_mut(new)?;
        let operator = self.operator_mut(op)?;
        let mut found = false;
        for v in operator.inputs.iter_mut().filter(|v| **v == old) {
            *v = new;
            found = true;
        }
        if !found {
            return Err(GraphError::invalid(op, format!("{old} is not an input")));
        }
        self.variable_mut(old)?.consumers.retain(|&c| c != op);
        let var = self.variable_mut(new)?;
        if !var.consumers.contains(&op) {
            var.consumers.push(op);
        }
        Ok(())
    }

    /// Replace the whole input list of `op`.
    pub fn set_operator_inputs(&mut self, op: OperatorId, inputs: Vec<VariableId>) -> Result<()> {
        for &v in &inputs {
            self.variable_mut(v)?;
        }
        let old = std::mem::replace(&mut self.operator_mut(op)?.inputs, inputs.clone());
        for v in old {
            self.variable_mut(v)?.consumers.retain(|&c| c != op);
        }
        for v in inputs {
            let var = self.variable_mut(v)?;
            if !var.consumers.contains(&op) {
                var.consumers.push(op);
            }
        }
        Ok(())
    }

    pub fn set_operator_kind(&mut self, op: OperatorId, kind: OperatorKind) -> Result<()> {
        self.operator_mut(op)?.kind = kind;
        Ok(())
    }

    /// Drop every variable no operator references that is neither a graph
    /// input nor a graph output. Returns how many were dropped.
    pub fn prune_variables(&mut self) -> usize {
        let mut removed = 0;
        for slot in self.variables.iter_mut() {
            let dead = match slot {
                Some(v) => {
                    v.producer.is_none()
                        && v.consumers.is_empty()
                        && !self.inputs.contains(&v.id)
                        && !self.outputs.contains(&v.id)
                }
                None => false,
            };
            if dead {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    /// Fresh name for a variable derived from `base`.
    pub(crate) fn derived_name(&self, base: VariableId, suffix: &str) -> String {
        format!("{}_{}{}", self.variable(base).name, suffix, self.variables.len())
    }
}
