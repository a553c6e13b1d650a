//! Fallback backend: every operator maps onto a portable reference
//! implementation selected by name. No source is synthesized; the
//! descriptor only carries the implementation names and their resolved
//! parameters.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use super::{keys, variable_table, Artifacts, Descriptor, DescriptorGenerator, Generation};
use super::{VariableEntry, WeightEntry};
use crate::error::Result;
use crate::ir::{Activation, FilterLayout, Graph, Operator, OperatorKind};

#[derive(Debug, Clone, Serialize)]
pub struct FallbackDescriptor {
    pub backend: &'static str,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub variables: Vec<VariableEntry>,
    pub weights: Vec<WeightEntry>,
    pub weight_bytes: usize,
    pub kernels: Vec<FallbackKernel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackKernel {
    pub implementation: &'static str,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params: BTreeMap<&'static str, Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl DescriptorGenerator for FallbackGenerator {
    fn backend_name(&self) -> &'static str {
        "fallback"
    }

    fn generate(&self, graph: &Graph) -> Result<Artifacts> {
        let mut run = Generation::new(self.backend_name(), graph);
        let order = run.traverse(|_| Ok(()))?;
        let kernels = run.lower(&order, |op| Ok(lower(graph, op)))?;
        let weights = run.pack(&order);
        let descriptor = FallbackDescriptor {
            backend: self.backend_name(),
            inputs: keys(graph.inputs()),
            outputs: keys(graph.outputs()),
            variables: variable_table(graph),
            weights: weights.entries.clone(),
            weight_bytes: weights.byte_len(),
            kernels,
        };
        run.finish();
        Ok(Artifacts {
            descriptor: Descriptor::Fallback(descriptor),
            weights,
        })
    }
}

fn lower(graph: &Graph, op: &Operator) -> FallbackKernel {
    let mut params = BTreeMap::new();
    let input_hw = match graph.variable(op.inputs[0]).shape.as_slice() {
        [_, _, h, w] => [*h, *w],
        _ => [0, 0],
    };
    match &op.kind {
        OperatorKind::Convolution2D(p) => {
            params.insert("kernel", json!(p.kernel));
            params.insert("stride", json!(p.stride));
            params.insert("padding", json!(p.padding.resolve(input_hw, p.kernel, p.stride)));
            let layout = match p.filter_layout {
                FilterLayout::Oihw => "oihw",
                FilterLayout::Ohwi => "ohwi",
            };
            params.insert("filter_layout", json!(layout));
            params.insert("activation", activation(p.activation));
        }
        OperatorKind::Linear { activation: act } | OperatorKind::ElementwiseAdd { activation: act } => {
            params.insert("activation", activation(*act));
        }
        OperatorKind::Relu | OperatorKind::Sigmoid | OperatorKind::Tanh => {}
        OperatorKind::LeakyRelu { slope } => {
            params.insert("slope", real(*slope));
        }
        OperatorKind::BatchNormalization { eps } => {
            params.insert("eps", real(*eps));
        }
        OperatorKind::Pooling2D(p) => {
            params.insert("kernel", json!(p.kernel));
            params.insert("stride", json!(p.stride));
            params.insert("padding", json!(p.effective_padding(input_hw)));
        }
        OperatorKind::LocalResponseNormalization {
            size,
            k,
            alpha,
            beta,
        } => {
            params.insert("size", json!(size));
            params.insert("k", real(*k));
            params.insert("alpha", real(*alpha));
            params.insert("beta", real(*beta));
        }
        OperatorKind::Reshape { shape } => {
            params.insert("shape", json!(shape));
        }
        OperatorKind::ScalarAffine { scale, bias } => {
            params.insert("scale", real(*scale));
            params.insert("bias", real(*bias));
        }
        OperatorKind::AxiswiseAffine { axis, activation: act } => {
            params.insert("axis", json!(axis));
            params.insert("activation", activation(*act));
        }
        OperatorKind::Softmax { axis } => {
            params.insert("axis", json!(axis));
        }
    }
    FallbackKernel {
        implementation: op.kind.name(),
        inputs: keys(&op.inputs),
        outputs: keys(&op.outputs),
        params,
    }
}

/// Shortest decimal form of an `f32`, without widening noise.
fn real(x: f32) -> Value {
    x.to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

fn activation(act: Option<Activation>) -> Value {
    match act {
        None => Value::Null,
        Some(Activation::LeakyRelu { slope }) => json!({"type": "leaky_relu", "slope": real(slope)}),
        Some(a) => json!({ "type": a.name() }),
    }
}
