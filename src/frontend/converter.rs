//! Trace → graph IR conversion.
//!
//! Each framework function tag maps to exactly one operator kind. Shapes
//! are taken from the trace declarations and then checked against the
//! operator semantics, so a trace that lies about a shape is rejected
//! instead of being silently re-inferred.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use super::{GraphTrace, TraceNode};
use crate::error::{GraphError, Result};
use crate::ir::shape::check_operator;
use crate::ir::{
    Conv2DParams, DType, FilterLayout, Graph, OperatorKind, Padding, Pool2DParams, PoolMode,
    VariableId,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphConverter;

impl GraphConverter {
    pub fn new() -> Self {
        Self
    }

    /// Build a validated graph. Variable and operator ids follow trace order.
    pub fn convert(&self, trace: &GraphTrace) -> Result<Graph> {
        let mut graph = Graph::new();
        let mut ids: HashMap<&str, VariableId> = HashMap::new();

        for var in &trace.variables {
            if ids.contains_key(var.id.as_str()) {
                return Err(GraphError::malformed(format!("duplicate variable `{}`", var.id)));
            }
            if let Some(dtype) = &var.dtype {
                if DType::parse(dtype).is_none() {
                    return Err(GraphError::malformed(format!(
                        "variable `{}` has unsupported dtype `{}`",
                        var.id, dtype
                    )));
                }
            }
            if var.shape.contains(&0) {
                return Err(GraphError::malformed(format!(
                    "variable `{}` has a zero dimension in {:?}",
                    var.id, var.shape
                )));
            }
            let id = match &var.data {
                Some(data) => {
                    let expected: usize = var.shape.iter().product();
                    if data.len() != expected {
                        return Err(GraphError::malformed(format!(
                            "variable `{}` of shape {:?} carries {} values, expected {}",
                            var.id,
                            var.shape,
                            data.len(),
                            expected
                        )));
                    }
                    graph.add_constant(var.id.clone(), var.shape.clone(), data.clone())?
                }
                None => graph.add_variable(var.id.clone(), var.shape.clone()),
            };
            ids.insert(var.id.as_str(), id);
        }

        let lookup = |name: &str, role: &str| {
            ids.get(name).copied().ok_or_else(|| {
                GraphError::malformed(format!("{} refers to unknown variable `{}`", role, name))
            })
        };

        for (index, node) in trace.nodes.iter().enumerate() {
            let role = format!("node {} ({})", index, node.op);
            let inputs = node
                .inputs
                .iter()
                .map(|name| lookup(name.as_str(), &role))
                .collect::<Result<Vec<_>>>()?;
            let outputs = node
                .outputs
                .iter()
                .map(|name| lookup(name.as_str(), &role))
                .collect::<Result<Vec<_>>>()?;
            let kind = lower_node(&graph, node, &inputs, &outputs)?;
            let op = graph.add_operator(kind, inputs, outputs)?;
            check_operator(&graph, op)?;
        }

        let inputs = trace
            .inputs
            .iter()
            .map(|name| lookup(name.as_str(), "graph input"))
            .collect::<Result<Vec<_>>>()?;
        let outputs = trace
            .outputs
            .iter()
            .map(|name| lookup(name.as_str(), "graph output"))
            .collect::<Result<Vec<_>>>()?;
        graph.set_inputs(inputs)?;
        graph.set_outputs(outputs)?;
        let pruned = graph.prune_variables();
        graph.validate()?;

        debug!(
            operators = graph.operator_count(),
            variables = graph.variable_count(),
            pruned,
            "converted trace"
        );
        Ok(graph)
    }
}

// ─── Tag lowering ─────────────────────────────────────────────────

fn lower_node(
    graph: &Graph,
    node: &TraceNode,
    inputs: &[VariableId],
    outputs: &[VariableId],
) -> Result<OperatorKind> {
    let p = Params {
        tag: &node.op,
        map: &node.params,
    };
    let kind = match node.op.as_str() {
        "Convolution2DFunction" | "Convolution2D" => {
            p.arity(inputs, 2, 3)?;
            let filter = &graph.variable(inputs[1]).shape;
            if filter.len() != 4 {
                return Err(GraphError::shape(
                    &node.op,
                    format!("filter must be [O, I, kh, kw], got {:?}", filter),
                ));
            }
            OperatorKind::Convolution2D(Conv2DParams {
                kernel: [filter[2], filter[3]],
                stride: [p.usize("sy", 1)?, p.usize("sx", 1)?],
                padding: Padding::Symmetric([p.usize("ph", 0)?, p.usize("pw", 0)?]),
                filter_layout: FilterLayout::Oihw,
                activation: None,
            })
        }
        "LinearFunction" | "Linear" => {
            p.arity(inputs, 2, 3)?;
            OperatorKind::Linear { activation: None }
        }
        "ReLU" | "Relu" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::Relu
        }
        "Sigmoid" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::Sigmoid
        }
        "Tanh" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::Tanh
        }
        "LeakyReLU" | "LeakyRelu" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::LeakyRelu {
                slope: p.f32("slope", 0.2)?,
            }
        }
        "BatchNormalizationFunction" | "FixedBatchNormalization" | "BatchNormalization" => {
            p.arity(inputs, 5, 5)?;
            OperatorKind::BatchNormalization {
                eps: p.f32("eps", 2e-5)?,
            }
        }
        "MaxPooling2D" | "AveragePooling2D" => {
            p.arity(inputs, 1, 1)?;
            let max = node.op == "MaxPooling2D";
            let kh = p.required_usize("kh")?;
            let kw = p.usize("kw", kh)?;
            OperatorKind::Pooling2D(Pool2DParams {
                mode: if max { PoolMode::Max } else { PoolMode::Average },
                kernel: [kh, kw],
                stride: [p.usize("sy", kh)?, p.usize("sx", kw)?],
                padding: Padding::Symmetric([p.usize("ph", 0)?, p.usize("pw", 0)?]),
                ceil_mode: p.bool("cover_all", max)?,
            })
        }
        "LocalResponseNormalization" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::LocalResponseNormalization {
                size: p.usize("n", 5)?,
                k: p.f32("k", 2.0)?,
                alpha: p.f32("alpha", 1e-4)?,
                beta: p.f32("beta", 0.75)?,
            }
        }
        "Reshape" => {
            p.arity(inputs, 1, 1)?;
            let shape = match p.shape("shape")? {
                Some(shape) => shape,
                None => match outputs.first() {
                    Some(&out) => graph.variable(out).shape.clone(),
                    None => Vec::new(),
                },
            };
            OperatorKind::Reshape { shape }
        }
        "Add" | "ElementwiseAdd" => {
            p.arity(inputs, 2, usize::MAX)?;
            OperatorKind::ElementwiseAdd { activation: None }
        }
        "MulConstant" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::ScalarAffine {
                scale: p.required_f32("value")?,
                bias: 0.0,
            }
        }
        "AddConstant" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::ScalarAffine {
                scale: 1.0,
                bias: p.required_f32("value")?,
            }
        }
        "Softmax" => {
            p.arity(inputs, 1, 1)?;
            OperatorKind::Softmax {
                axis: p.usize("axis", 1)?,
            }
        }
        other => {
            return Err(GraphError::UnsupportedOperator {
                kind: other.to_string(),
            })
        }
    };
    if outputs.len() != 1 {
        return Err(GraphError::malformed(format!(
            "{} must have exactly one output, got {}",
            node.op,
            outputs.len()
        )));
    }
    Ok(kind)
}

/// Typed access to a node's parameter map.
struct Params<'a> {
    tag: &'a str,
    map: &'a Map<String, Value>,
}

impl Params<'_> {
    fn arity(&self, inputs: &[VariableId], min: usize, max: usize) -> Result<()> {
        if inputs.len() < min || inputs.len() > max {
            return Err(GraphError::malformed(format!(
                "{} takes {} inputs, got {}",
                self.tag,
                if min == max {
                    min.to_string()
                } else if max == usize::MAX {
                    format!("at least {}", min)
                } else {
                    format!("{} to {}", min, max)
                },
                inputs.len()
            )));
        }
        Ok(())
    }

    fn bad(&self, key: &str, expected: &str) -> GraphError {
        GraphError::malformed(format!(
            "parameter `{}` of {} must be {}",
            key, self.tag, expected
        ))
    }

    fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| self.bad(key, "a non-negative integer")),
        }
    }

    fn required_usize(&self, key: &str) -> Result<usize> {
        if !self.map.contains_key(key) {
            return Err(GraphError::malformed(format!(
                "{} is missing parameter `{}`",
                self.tag, key
            )));
        }
        self.usize(key, 0)
    }

    fn f32(&self, key: &str, default: f32) -> Result<f32> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_f64()
                .map(|n| n as f32)
                .filter(|x| x.is_finite())
                .ok_or_else(|| self.bad(key, "a finite f32 number")),
        }
    }

    fn required_f32(&self, key: &str) -> Result<f32> {
        if !self.map.contains_key(key) {
            return Err(GraphError::malformed(format!(
                "{} is missing parameter `{}`",
                self.tag, key
            )));
        }
        self.f32(key, 0.0)
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.bad(key, "a boolean")),
        }
    }

    fn shape(&self, key: &str) -> Result<Option<Vec<usize>>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .map(|n| n as usize)
                        .ok_or_else(|| self.bad(key, "a list of non-negative integers"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(self.bad(key, "a list of non-negative integers")),
        }
    }
}
