//! Reference evaluator.
//!
//! Interprets a graph in topological order on the host with `f32`
//! kernels. Constant folding uses `evaluate_operator`; tests use `evaluate`
//! to check that optimized graphs and descriptors agree with the original.

pub mod kernels;


use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::ir::shape::check_operator;
use crate::ir::{Activation, Graph, Operator, OperatorKind, VariableId};

/// Run `graph` on `inputs` (one buffer per graph input, in designated
/// order) and return one buffer per graph output.
pub fn evaluate(graph: &Graph, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
    if inputs.len() != graph.inputs().len() {
        return Err(GraphError::invalid(
            "inputs",
            format!(
                "graph has {} inputs, {} buffers given",
                graph.inputs().len(),
                inputs.len()
            ),
        ));
    }
    let mut values: HashMap<VariableId, Vec<f32>> = HashMap::new();
    for (&id, data) in graph.inputs().iter().zip(inputs) {
        let var = graph.variable(id);
        if data.len() != var.size() {
            return Err(GraphError::shape(
                id,
                format!("input {:?} needs {} elements, got {}", var.shape, var.size(), data.len()),
            ));
        }
        values.insert(id, data.clone());
    }

    for op_id in graph.topological_order()? {
        let op = graph.operator(op_id);
        let result = {
            let operands = op
                .inputs
                .iter()
                .map(|&v| operand(graph, &values, v))
                .collect::<Result<Vec<&[f32]>>>()?;
            evaluate_operator(graph, op, &operands)?
        };
        values.insert(op.outputs[0], result);
    }

    graph
        .outputs()
        .iter()
        .map(|&id| operand(graph, &values, id).map(<[f32]>::to_vec))
        .collect()
}

fn operand<'a>(
    graph: &'a Graph,
    values: &'a HashMap<VariableId, Vec<f32>>,
    id: VariableId,
) -> Result<&'a [f32]> {
    if let Some(data) = graph.variable(id).data.as_deref() {
        return Ok(data);
    }
    values
        .get(&id)
        .map(Vec::as_slice)
        .ok_or_else(|| GraphError::invalid(id, "value is not computed yet"))
}

/// Compute the single output of `op` from its operand buffers.
pub fn evaluate_operator(graph: &Graph, op: &Operator, operands: &[&[f32]]) -> Result<Vec<f32>> {
    check_operator(graph, op.id)?;
    if operands.len() != op.inputs.len() {
        return Err(GraphError::invalid(
            op.label(),
            format!("{} operand buffers for {} inputs", operands.len(), op.inputs.len()),
        ));
    }
    let shapes: Vec<&[usize]> = op
        .inputs
        .iter()
        .map(|&v| graph.variable(v).shape.as_slice())
        .collect();
    let out_shape = &graph.variable(op.outputs[0]).shape;
    let x = operands[0];

    let out = match &op.kind {
        OperatorKind::Convolution2D(p) => kernels::conv2d(
            x,
            nchw(op, shapes[0])?,
            operands[1],
            shapes[1],
            operands.get(2).copied(),
            p,
            [out_shape[2], out_shape[3]],
        ),
        OperatorKind::Linear { activation } => {
            let features = shapes[1][1];
            kernels::linear(
                x,
                shapes[0][0],
                features,
                operands[1],
                shapes[1][0],
                operands.get(2).copied(),
                *activation,
            )
        }
        OperatorKind::Relu => kernels::unary(x, Activation::Relu),
        OperatorKind::Sigmoid => kernels::unary(x, Activation::Sigmoid),
        OperatorKind::Tanh => kernels::unary(x, Activation::Tanh),
        OperatorKind::LeakyRelu { slope } => {
            kernels::unary(x, Activation::LeakyRelu { slope: *slope })
        }
        OperatorKind::BatchNormalization { eps } => kernels::batch_normalization(
            x,
            shapes[0],
            operands[1],
            operands[2],
            operands[3],
            operands[4],
            *eps,
        ),
        OperatorKind::Pooling2D(p) => {
            kernels::pool2d(x, nchw(op, shapes[0])?, p, [out_shape[2], out_shape[3]])
        }
        OperatorKind::LocalResponseNormalization {
            size,
            k,
            alpha,
            beta,
        } => kernels::lrn(x, nchw(op, shapes[0])?, *size, *k, *alpha, *beta),
        OperatorKind::Reshape { .. } => x.to_vec(),
        OperatorKind::ElementwiseAdd { activation } => kernels::elementwise_add(operands, *activation),
        OperatorKind::ScalarAffine { scale, bias } => kernels::scalar_affine(x, *scale, *bias),
        OperatorKind::AxiswiseAffine { axis, activation } => kernels::axiswise_affine(
            x,
            shapes[0],
            *axis,
            operands[1],
            operands[2],
            *activation,
        ),
        OperatorKind::Softmax { axis } => kernels::softmax(x, shapes[0], *axis),
    };

    if out.len() != graph.variable(op.outputs[0]).size() {
        return Err(GraphError::shape(
            op.label(),
            format!("computed {} elements for output {:?}", out.len(), out_shape),
        ));
    }
    Ok(out)
}

fn nchw(op: &Operator, shape: &[usize]) -> Result<[usize; 4]> {
    match shape {
        [n, c, h, w] => Ok([*n, *c, *h, *w]),
        _ => Err(GraphError::shape(op.label(), format!("expected NCHW input, got {:?}", shape))),
    }
}
