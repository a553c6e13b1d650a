//! WebGPU backend: one WGSL compute kernel per operator.
//!
//! Kernels bind three storage buffers: the packed weights, a single
//! read-write data buffer holding graph inputs and every computed variable,
//! and a `u32` parameter table carrying each dispatch's buffer offsets.
//! Operators with identical kernel specs share one entry point.

pub mod kernels;
pub mod signature;

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::{keys, variable_table, Artifacts, Descriptor, DescriptorGenerator, Generation};
use super::{VariableEntry, WeightEntry};
use crate::error::{GraphError, Result};
use crate::ir::{Graph, OperatorId, VariableId};

pub use kernels::{KernelSpec, Operand, Placement, PRELUDE};

/// Largest workgroup count per dispatch dimension.
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;
pub const MAX_WORKGROUP_SIZE: u32 = 256;

#[derive(Debug, Clone, Serialize)]
pub struct WebGpuDescriptor {
    pub backend: &'static str,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub variables: Vec<VariableEntry>,
    pub weights: Vec<WeightEntry>,
    pub weight_bytes: usize,
    pub data_allocation: Vec<DataAllocation>,
    /// Size of the data buffer in `f32` elements.
    pub data_elements: usize,
    pub kernels: Vec<WebGpuKernel>,
    /// Entry points defined by the kernel module, in first-use order.
    pub kernel_sources: Vec<String>,
    #[serde(skip)]
    sources: Vec<String>,
}

impl WebGpuDescriptor {
    /// The complete WGSL module: shared bindings followed by every distinct
    /// kernel.
    pub fn concat_kernel_sources(&self) -> String {
        let mut module = String::from(PRELUDE);
        for source in &self.sources {
            module.push('\n');
            module.push_str(source);
        }
        module
    }
}

/// Placement of a non-constant variable in the data buffer, in `f32`
/// elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataAllocation {
    pub variable: String,
    pub offset: usize,
    pub length: usize,
}

/// One dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebGpuKernel {
    pub entry_point: String,
    pub workgroups: [u32; 3],
    pub workgroup_size: u32,
    /// Element offsets of each input in its buffer, then of the output.
    pub params: Vec<u32>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct WebGpuGenerator {
    workgroup_size: u32,
}

impl WebGpuGenerator {
    pub fn new(workgroup_size: u32) -> Self {
        Self {
            workgroup_size: workgroup_size.clamp(1, MAX_WORKGROUP_SIZE),
        }
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }
}

impl Default for WebGpuGenerator {
    fn default() -> Self {
        Self::new(64)
    }
}

impl DescriptorGenerator for WebGpuGenerator {
    fn backend_name(&self) -> &'static str {
        "webgpu"
    }

    fn generate(&self, graph: &Graph) -> Result<Artifacts> {
        let mut run = Generation::new(self.backend_name(), graph);
        let order = run.traverse(check_addressable)?;
        let specs = run.lower(&order, |op| kernels::plan(graph, op, self.workgroup_size))?;
        let names = signature::kernel_names(&specs);
        let weights = run.pack(&order);

        let mut seen = HashSet::new();
        let mut kernel_sources = Vec::new();
        let mut sources = Vec::new();
        for (spec, name) in specs.iter().zip(&names) {
            if seen.insert(name.clone()) {
                kernel_sources.push(name.clone());
                sources.push(spec.emit(name));
            }
        }

        let (data_allocation, data_elements) = allocate(graph, &order);
        let offsets: HashMap<String, usize> = data_allocation
            .iter()
            .map(|a| (a.variable.clone(), a.offset))
            .chain(
                weights
                    .entries
                    .iter()
                    .filter_map(|e| Some((e.variable.clone(), weights.element_offset(&e.variable)?))),
            )
            .collect();

        let kernels = order
            .iter()
            .zip(specs.iter().zip(names))
            .map(|(&id, (spec, name))| {
                let op = graph.operator(id);
                let params = op
                    .inputs
                    .iter()
                    .chain(&op.outputs)
                    .map(|v| offsets.get(&v.to_string()).copied().unwrap_or(0) as u32)
                    .collect();
                WebGpuKernel {
                    entry_point: name,
                    workgroups: dispatch(spec.invocations, spec.workgroup_size),
                    workgroup_size: spec.workgroup_size,
                    params,
                    inputs: keys(&op.inputs),
                    outputs: keys(&op.outputs),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            kernels = kernels.len(),
            distinct = sources.len(),
            data_elements,
            "webgpu kernels generated"
        );

        let descriptor = WebGpuDescriptor {
            backend: self.backend_name(),
            inputs: keys(graph.inputs()),
            outputs: keys(graph.outputs()),
            variables: variable_table(graph),
            weights: weights.entries.clone(),
            weight_bytes: weights.byte_len(),
            data_allocation,
            data_elements,
            kernels,
            kernel_sources,
            sources,
        };
        run.finish();
        Ok(Artifacts {
            descriptor: Descriptor::WebGpu(descriptor),
            weights,
        })
    }
}

/// Buffer offsets are `u32` element indices on the device.
fn check_addressable(graph: &Graph) -> Result<()> {
    let (weights, data) = graph.variables().fold((0usize, 0usize), |(w, d), v| {
        if v.is_constant() {
            (w.saturating_add(v.size()), d)
        } else {
            (w, d.saturating_add(v.size()))
        }
    });
    for (buffer, elements) in [("weights", weights), ("data", data)] {
        if elements > u32::MAX as usize {
            return Err(GraphError::invalid(
                "graph",
                format!("{buffer} buffer of {elements} elements exceeds 32-bit addressing"),
            ));
        }
    }
    Ok(())
}

/// Data buffer layout: graph inputs first, then operator outputs in
/// execution order.
fn allocate(graph: &Graph, order: &[OperatorId]) -> (Vec<DataAllocation>, usize) {
    let mut seen: HashSet<VariableId> = HashSet::new();
    let mut allocation = Vec::new();
    let mut cursor = 0;
    let produced = order
        .iter()
        .flat_map(|&id| graph.operator(id).outputs.iter().copied());
    for id in graph.inputs().iter().copied().chain(produced) {
        let var = graph.variable(id);
        if var.is_constant() || !seen.insert(id) {
            continue;
        }
        allocation.push(DataAllocation {
            variable: id.to_string(),
            offset: cursor,
            length: var.size(),
        });
        cursor += var.size();
    }
    (allocation, cursor)
}

/// Workgroup counts covering `invocations`, spilling into `y` past the
/// per-dimension limit.
pub fn dispatch(invocations: usize, workgroup_size: u32) -> [u32; 3] {
    let groups = invocations.div_ceil(workgroup_size.max(1) as usize).max(1);
    let limit = MAX_WORKGROUPS_PER_DIMENSION as usize;
    if groups <= limit {
        [groups as u32, 1, 1]
    } else {
        [MAX_WORKGROUPS_PER_DIMENSION, groups.div_ceil(limit) as u32, 1]
    }
}
