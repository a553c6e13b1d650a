//! Backend generators: graph → descriptor + weight buffer.
//!
//! Each backend implements `DescriptorGenerator`. Generation walks a fixed
//! state sequence shared by all backends:
//!
//! ```text
//! Start → Traversing → Lowering(op)* → Packing → Done
//!             └──────────────┴──→ Failed(reason)
//! ```
//!
//! Traversing validates the graph and fixes the operator order; every
//! operator is shape-checked and lowered in that order; packing lays out the
//! weight buffer and variable table. Any failure is final and no partial
//! descriptor escapes.

pub mod fallback;
pub mod webgpu;
mod weights;

#[cfg(test)]
mod tests;

pub use fallback::{FallbackDescriptor, FallbackGenerator, FallbackKernel};
pub use webgpu::{DataAllocation, WebGpuDescriptor, WebGpuGenerator, WebGpuKernel};
pub use weights::{WeightBuffer, WeightEntry};

use serde::Serialize;
use tracing::trace;

use crate::config::{Backend, PipelineOptions};
use crate::error::{GraphError, Result};
use crate::ir::shape::check_operator;
use crate::ir::{Graph, Operator, OperatorId};

/// Lowers a whole graph for one backend.
pub trait DescriptorGenerator {
    /// The backend name (`"webgpu"`, `"fallback"`).
    fn backend_name(&self) -> &'static str;

    fn generate(&self, graph: &Graph) -> Result<Artifacts>;
}

/// Create the generator for `backend`.
pub fn create_generator(backend: Backend, options: &PipelineOptions) -> Box<dyn DescriptorGenerator> {
    match backend {
        Backend::Webgpu => Box::new(WebGpuGenerator::new(options.workgroup_size)),
        Backend::Fallback => Box::new(FallbackGenerator::new()),
    }
}

// ─── Outputs ──────────────────────────────────────────────────────

/// Everything one generation produces.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub descriptor: Descriptor,
    pub weights: WeightBuffer,
}

impl Artifacts {
    pub fn backend(&self) -> &'static str {
        self.descriptor.backend()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Descriptor {
    Fallback(FallbackDescriptor),
    WebGpu(WebGpuDescriptor),
}

impl Descriptor {
    pub fn backend(&self) -> &'static str {
        match self {
            Descriptor::Fallback(d) => d.backend,
            Descriptor::WebGpu(d) => d.backend,
        }
    }

    pub fn kernel_count(&self) -> usize {
        match self {
            Descriptor::Fallback(d) => d.kernels.len(),
            Descriptor::WebGpu(d) => d.kernels.len(),
        }
    }

    /// Concatenated kernel source, for backends that synthesize source.
    pub fn kernel_source(&self) -> Option<String> {
        match self {
            Descriptor::Fallback(_) => None,
            Descriptor::WebGpu(d) => Some(d.concat_kernel_sources()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableRole {
    Input,
    Constant,
    Output,
    Intermediate,
}

/// One row of the descriptor's variable table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableEntry {
    pub key: String,
    pub name: String,
    pub shape: Vec<usize>,
    pub size: usize,
    pub role: VariableRole,
}

/// Every live variable in key order.
pub(crate) fn variable_table(graph: &Graph) -> Vec<VariableEntry> {
    graph
        .variables()
        .map(|v| VariableEntry {
            key: v.id.to_string(),
            name: v.name.clone(),
            shape: v.shape.clone(),
            size: v.size(),
            role: if graph.is_input(v.id) {
                VariableRole::Input
            } else if v.is_constant() {
                VariableRole::Constant
            } else if graph.is_output(v.id) {
                VariableRole::Output
            } else {
                VariableRole::Intermediate
            },
        })
        .collect()
}

pub(crate) fn keys(ids: &[crate::ir::VariableId]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

// ─── State machine ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorState {
    Start,
    Traversing,
    Lowering(OperatorId),
    Packing,
    Done,
    Failed(String),
}

/// One generation run over a borrowed graph.
pub struct Generation<'g> {
    backend: &'static str,
    graph: &'g Graph,
    state: GeneratorState,
    history: Vec<GeneratorState>,
}

impl<'g> Generation<'g> {
    pub fn new(backend: &'static str, graph: &'g Graph) -> Self {
        Self {
            backend,
            graph,
            state: GeneratorState::Start,
            history: vec![GeneratorState::Start],
        }
    }

    pub fn state(&self) -> &GeneratorState {
        &self.state
    }

    /// Every state entered so far, starting with `Start`.
    pub fn history(&self) -> &[GeneratorState] {
        &self.history
    }

    fn advance(&mut self, next: GeneratorState) {
        trace!(backend = self.backend, from = ?self.state, to = ?next, "generator state");
        self.state = next.clone();
        self.history.push(next);
    }

    fn fail(&mut self, err: GraphError) -> GraphError {
        self.advance(GeneratorState::Failed(err.to_string()));
        err
    }

    /// Validate, run backend-specific graph limits, and fix the order.
    pub fn traverse(&mut self, limits: impl FnOnce(&Graph) -> Result<()>) -> Result<Vec<OperatorId>> {
        self.advance(GeneratorState::Traversing);
        let graph = self.graph;
        let checked = graph
            .validate()
            .and_then(|()| limits(graph))
            .and_then(|()| graph.topological_order());
        checked.map_err(|e| self.fail(e))
    }

    /// Shape-check and lower every operator in `order`.
    pub fn lower<K>(
        &mut self,
        order: &[OperatorId],
        mut lower_op: impl FnMut(&Operator) -> Result<K>,
    ) -> Result<Vec<K>> {
        let graph = self.graph;
        let mut lowered = Vec::with_capacity(order.len());
        for &id in order {
            self.advance(GeneratorState::Lowering(id));
            let op = graph.operator(id);
            let kernel = check_operator(graph, id)
                .and_then(|()| lower_op(op))
                .map_err(|e| self.fail(e))?;
            lowered.push(kernel);
        }
        Ok(lowered)
    }

    pub fn pack(&mut self, order: &[OperatorId]) -> WeightBuffer {
        self.advance(GeneratorState::Packing);
        WeightBuffer::pack(self.graph, order)
    }

    pub fn finish(&mut self) {
        self.advance(GeneratorState::Done);
    }
}
