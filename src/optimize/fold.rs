use super::{constant_data, schedule, OptimizePass, PassResult};
use crate::error::Result;
use crate::eval::evaluate_operator;
use crate::ir::{Graph, OperatorId, OperatorKind};

/// Evaluates operators whose inputs are all constants, and turns batch
/// normalization with constant statistics into an axis-1 affine.
pub struct ConstantFolding;

impl OptimizePass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let mut result = PassResult::default();
        for id in schedule(graph)? {
            let op = graph.operator(id);
            if op.inputs.iter().all(|&v| graph.is_constant(v)) {
                fold(graph, id)?;
                result.rewrite(1);
            } else if let OperatorKind::BatchNormalization { eps } = op.kind {
                if op.inputs[1..].iter().all(|&v| graph.is_constant(v)) {
                    fold_batch_norm(graph, id, eps)?;
                    result.rewrite(0);
                }
            }
        }
        if result.changed {
            graph.prune_variables();
        }
        Ok(result)
    }
}

fn fold(graph: &mut Graph, id: OperatorId) -> Result<()> {
    let data = {
        let op = graph.operator(id);
        let operands: Vec<&[f32]> = op
            .inputs
            .iter()
            .filter_map(|&v| constant_data(graph, v))
            .collect();
        evaluate_operator(graph, op, &operands)?
    };
    let op = graph.remove_operator(id)?;
    graph.set_constant_data(op.outputs[0], data)
}

/// `y = (x - mean) / sqrt(var + eps) * gamma + beta` becomes
/// `y = x * scale + bias` per channel.
fn fold_batch_norm(graph: &mut Graph, id: OperatorId, eps: f32) -> Result<()> {
    let op = graph.operator(id);
    let x = op.inputs[0];
    let params: Vec<&[f32]> = op.inputs[1..]
        .iter()
        .filter_map(|&v| constant_data(graph, v))
        .collect();
    let [gamma, beta, mean, var] = [params[0], params[1], params[2], params[3]];
    let scale: Vec<f32> = gamma
        .iter()
        .zip(var)
        .map(|(g, v)| g / (v + eps).sqrt())
        .collect();
    let bias: Vec<f32> = beta
        .iter()
        .zip(mean)
        .zip(&scale)
        .map(|((b, m), s)| b - m * s)
        .collect();
    let channels = vec![scale.len()];
    let scale_name = graph.derived_name(op.inputs[1], "scale");
    let bias_name = graph.derived_name(op.inputs[2], "bias");

    let scale = graph.add_constant(scale_name, channels.clone(), scale)?;
    let bias = graph.add_constant(bias_name, channels, bias)?;
    graph.set_operator_inputs(id, vec![x, scale, bias])?;
    graph.set_operator_kind(
        id,
        OperatorKind::AxiswiseAffine {
            axis: 1,
            activation: None,
        },
    )
}
