//! Shape rules of every operator kind.
//!
//! `infer_output_shape` computes the output extent from input shapes and
//! parameters; `check_operator` compares it with what the graph declares.

use super::{Conv2DParams, Graph, OperatorId, OperatorKind, Pool2DParams};
use crate::error::{GraphError, Result};

/// Output shape of `kind` applied to `inputs`, or a description of the
/// first inconsistency.
pub fn infer_output_shape(
    kind: &OperatorKind,
    inputs: &[&[usize]],
) -> std::result::Result<Vec<usize>, String> {
    match kind {
        OperatorKind::Convolution2D(p) => conv2d_shape(p, inputs),
        OperatorKind::Linear { .. } => {
            arity(inputs, 2, 3)?;
            let x = inputs[0];
            let w = inputs[1];
            if x.len() < 2 {
                return Err(format!("linear input must have rank >= 2, got {:?}", x));
            }
            let features: usize = x[1..].iter().product();
            if w.len() != 2 || w[1] != features {
                return Err(format!(
                    "weight {:?} does not match {} input features of {:?}",
                    w, features, x
                ));
            }
            if let Some(b) = inputs.get(2) {
                expect_vector(b, w[0], "bias")?;
            }
            Ok(vec![x[0], w[0]])
        }
        OperatorKind::Relu
        | OperatorKind::Sigmoid
        | OperatorKind::Tanh
        | OperatorKind::LeakyRelu { .. }
        | OperatorKind::ScalarAffine { .. } => {
            arity(inputs, 1, 1)?;
            Ok(inputs[0].to_vec())
        }
        OperatorKind::BatchNormalization { eps } => {
            arity(inputs, 5, 5)?;
            let x = inputs[0];
            if x.len() < 2 {
                return Err(format!("batch normalization needs a channel axis, got {:?}", x));
            }
            if !(*eps >= 0.0) {
                return Err(format!("eps must be non-negative, got {eps}"));
            }
            for (name, shape) in ["gamma", "beta", "mean", "var"].iter().zip(&inputs[1..]) {
                expect_vector(shape, x[1], name)?;
            }
            Ok(x.to_vec())
        }
        OperatorKind::Pooling2D(p) => pool2d_shape(p, inputs),
        OperatorKind::LocalResponseNormalization { size, .. } => {
            arity(inputs, 1, 1)?;
            if inputs[0].len() != 4 {
                return Err(format!("expected NCHW input, got {:?}", inputs[0]));
            }
            if *size == 0 {
                return Err("window size must be positive".to_string());
            }
            Ok(inputs[0].to_vec())
        }
        OperatorKind::Reshape { shape } => {
            arity(inputs, 1, 1)?;
            let from: usize = inputs[0].iter().product();
            let to: usize = shape.iter().product();
            if from != to {
                return Err(format!(
                    "cannot reshape {:?} ({} elements) into {:?} ({} elements)",
                    inputs[0], from, shape, to
                ));
            }
            Ok(shape.clone())
        }
        OperatorKind::ElementwiseAdd { .. } => {
            if inputs.len() < 2 {
                return Err(format!("expected at least 2 inputs, got {}", inputs.len()));
            }
            for other in &inputs[1..] {
                if *other != inputs[0] {
                    return Err(format!("operand shapes {:?} and {:?} differ", inputs[0], other));
                }
            }
            Ok(inputs[0].to_vec())
        }
        OperatorKind::AxiswiseAffine { axis, .. } => {
            arity(inputs, 3, 3)?;
            let x = inputs[0];
            let dim = *x
                .get(*axis)
                .ok_or_else(|| format!("axis {} out of range for {:?}", axis, x))?;
            expect_vector(inputs[1], dim, "scale")?;
            expect_vector(inputs[2], dim, "bias")?;
            Ok(x.to_vec())
        }
        OperatorKind::Softmax { axis } => {
            arity(inputs, 1, 1)?;
            if *axis >= inputs[0].len() {
                return Err(format!("axis {} out of range for {:?}", axis, inputs[0]));
            }
            Ok(inputs[0].to_vec())
        }
    }
}

fn conv2d_shape(p: &Conv2DParams, inputs: &[&[usize]]) -> std::result::Result<Vec<usize>, String> {
    arity(inputs, 2, 3)?;
    let x = nchw(inputs[0])?;
    let [o, i, kh, kw] = p
        .filter_layout
        .dims(inputs[1])
        .ok_or_else(|| format!("filter must have rank 4, got {:?}", inputs[1]))?;
    if i != x[1] {
        return Err(format!(
            "filter expects {} input channels, input {:?} has {}",
            i, inputs[0], x[1]
        ));
    }
    if [kh, kw] != p.kernel {
        return Err(format!(
            "filter extent [{}, {}] differs from kernel {:?}",
            kh, kw, p.kernel
        ));
    }
    if let Some(b) = inputs.get(2) {
        expect_vector(b, o, "bias")?;
    }
    let [oh, ow] = spatial_out([x[2], x[3]], p.kernel, p.stride, |hw| {
        p.padding.resolve(hw, p.kernel, p.stride)
    })?;
    Ok(vec![x[0], o, oh, ow])
}

fn pool2d_shape(p: &Pool2DParams, inputs: &[&[usize]]) -> std::result::Result<Vec<usize>, String> {
    arity(inputs, 1, 1)?;
    let x = nchw(inputs[0])?;
    let [oh, ow] = spatial_out([x[2], x[3]], p.kernel, p.stride, |hw| p.effective_padding(hw))?;
    Ok(vec![x[0], x[1], oh, ow])
}

/// Output `[h, w]` of a sliding window with floor division.
pub(crate) fn spatial_out(
    input_hw: [usize; 2],
    kernel: [usize; 2],
    stride: [usize; 2],
    pads: impl Fn([usize; 2]) -> [usize; 4],
) -> std::result::Result<[usize; 2], String> {
    if kernel.contains(&0) || stride.contains(&0) {
        return Err(format!(
            "kernel {:?} and stride {:?} must be positive",
            kernel, stride
        ));
    }
    let pads = pads(input_hw);
    let mut out = [0usize; 2];
    for axis in 0..2 {
        let padded = input_hw[axis] + pads[axis] + pads[axis + 2];
        if padded < kernel[axis] {
            return Err(format!(
                "kernel {:?} larger than padded input {:?}",
                kernel, input_hw
            ));
        }
        out[axis] = (padded - kernel[axis]) / stride[axis] + 1;
    }
    Ok(out)
}

fn nchw(shape: &[usize]) -> std::result::Result<[usize; 4], String> {
    match shape {
        [n, c, h, w] => Ok([*n, *c, *h, *w]),
        _ => Err(format!("expected NCHW input, got {:?}", shape)),
    }
}

fn arity(inputs: &[&[usize]], min: usize, max: usize) -> std::result::Result<(), String> {
    if inputs.len() < min || inputs.len() > max {
        if min == max {
            return Err(format!("expected {} inputs, got {}", min, inputs.len()));
        }
        return Err(format!(
            "expected {} to {} inputs, got {}",
            min,
            max,
            inputs.len()
        ));
    }
    Ok(())
}

fn expect_vector(shape: &[usize], len: usize, what: &str) -> std::result::Result<(), String> {
    if shape != [len] {
        return Err(format!("{} must have shape [{}], got {:?}", what, len, shape));
    }
    Ok(())
}

/// Check that the declared output shapes of `op` agree with its inputs.
pub fn check_operator(graph: &Graph, op: OperatorId) -> Result<()> {
    let operator = graph.operator(op);
    let input_shapes: Vec<&[usize]> = operator
        .inputs
        .iter()
        .map(|&v| graph.variable(v).shape.as_slice())
        .collect();
    let expected = infer_output_shape(&operator.kind, &input_shapes)
        .map_err(|detail| GraphError::shape(operator.label(), detail))?;
    if operator.outputs.len() != 1 {
        return Err(GraphError::shape(
            operator.label(),
            format!("expected 1 output, got {}", operator.outputs.len()),
        ));
    }
    let declared = &graph.variable(operator.outputs[0]).shape;
    if *declared != expected {
        return Err(GraphError::shape(
            operator.label(),
            format!(
                "output {} declared as {:?} but inputs {:?} give {:?}",
                operator.outputs[0], declared, input_shapes, expected
            ),
        ));
    }
    Ok(())
}
