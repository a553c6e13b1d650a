//! Producer/consumer fusion over single-use intermediates.

use super::{constant_data, schedule, OptimizePass, PassResult};
use crate::error::Result;
use crate::ir::{Graph, OperatorId, OperatorKind, VariableId};

/// The operator producing `v` when `consumer` is its only reader.
fn fusible_producer(graph: &Graph, v: VariableId, consumer: OperatorId) -> Option<OperatorId> {
    if graph.single_use_consumer(v) != Some(consumer) {
        return None;
    }
    graph.variable(v).producer()
}

/// Remove `consumer` and let `producer` write the consumer's output
/// directly; the intermediate between them is pruned.
fn absorb(graph: &mut Graph, producer: OperatorId, consumer: OperatorId) -> Result<()> {
    let removed = graph.remove_operator(consumer)?;
    let intermediate = removed.inputs[0];
    graph.rebind_output(producer, intermediate, removed.outputs[0])
}

// ─── merge_elementwise ────────────────────────────────────────────

pub struct MergeElementwise;

impl OptimizePass for MergeElementwise {
    fn name(&self) -> &'static str {
        "merge_elementwise"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let mut result = PassResult::default();
        for id in schedule(graph)? {
            let Some(op) = graph.get_operator(id) else {
                continue;
            };
            match op.kind {
                OperatorKind::ScalarAffine { scale, bias } => {
                    let Some(inner) = fusible_producer(graph, op.inputs[0], id) else {
                        continue;
                    };
                    let inner_op = graph.operator(inner);
                    let OperatorKind::ScalarAffine {
                        scale: s0,
                        bias: b0,
                    } = inner_op.kind
                    else {
                        continue;
                    };
                    // (x·s0 + b0)·scale + bias
                    let x = inner_op.inputs[0];
                    let merged = OperatorKind::ScalarAffine {
                        scale: s0 * scale,
                        bias: b0 * scale + bias,
                    };
                    graph.set_operator_inputs(id, vec![x])?;
                    graph.set_operator_kind(id, merged)?;
                    graph.remove_operator(inner)?;
                    result.rewrite(1);
                }
                OperatorKind::ElementwiseAdd { .. } => {
                    let mut inputs = op.inputs.clone();
                    let mut erased = Vec::new();
                    let mut i = 0;
                    while i < inputs.len() {
                        let nested = fusible_producer(graph, inputs[i], id).filter(|&p| {
                            matches!(
                                graph.operator(p).kind,
                                OperatorKind::ElementwiseAdd { activation: None }
                            )
                        });
                        match nested {
                            Some(p) => {
                                let operands = graph.operator(p).inputs.clone();
                                inputs.splice(i..=i, operands);
                                erased.push(p);
                            }
                            None => i += 1,
                        }
                    }
                    if !erased.is_empty() {
                        graph.set_operator_inputs(id, inputs)?;
                        for &p in &erased {
                            graph.remove_operator(p)?;
                        }
                        result.rewrite(erased.len());
                    }
                }
                _ => {}
            }
        }
        if result.changed {
            graph.prune_variables();
        }
        Ok(result)
    }
}

// ─── fuse_affine ──────────────────────────────────────────────────

/// Folds an axis-1 affine into the constant weights of a preceding
/// convolution or linear operator.
pub struct FuseAffine;

impl OptimizePass for FuseAffine {
    fn name(&self) -> &'static str {
        "fuse_affine"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let mut result = PassResult::default();
        for id in schedule(graph)? {
            let Some(op) = graph.get_operator(id) else {
                continue;
            };
            let OperatorKind::AxiswiseAffine {
                axis: 1,
                activation,
            } = op.kind
            else {
                continue;
            };
            let (scale, shift) = match (
                constant_data(graph, op.inputs[1]),
                constant_data(graph, op.inputs[2]),
            ) {
                (Some(s), Some(b)) => (s.to_vec(), b.to_vec()),
                _ => continue,
            };
            let Some(producer) = fusible_producer(graph, op.inputs[0], id) else {
                continue;
            };
            let prod = graph.operator(producer);
            let eligible = matches!(
                prod.kind,
                OperatorKind::Convolution2D(_) | OperatorKind::Linear { .. }
            ) && prod.kind.fused_activation().is_none();
            if !eligible {
                continue;
            }
            let (x, weight, bias) = (prod.inputs[0], prod.inputs[1], prod.inputs.get(2).copied());
            let Some(w) = constant_data(graph, weight) else {
                continue;
            };
            let old_bias = match bias {
                Some(b) => match constant_data(graph, b) {
                    Some(data) => data.to_vec(),
                    None => continue,
                },
                None => vec![0.0; scale.len()],
            };

            // Output channels are the outermost filter/weight axis in every layout.
            let block = w.len() / scale.len();
            let new_weight: Vec<f32> = w
                .iter()
                .enumerate()
                .map(|(i, v)| v * scale[i / block])
                .collect();
            let new_bias: Vec<f32> = old_bias
                .iter()
                .zip(&scale)
                .zip(&shift)
                .map(|((b, s), t)| b * s + t)
                .collect();

            let weight_shape = graph.variable(weight).shape.clone();
            let weight_name = graph.derived_name(weight, "scaled");
            let bias_name = graph.derived_name(weight, "bias");
            let channels = vec![scale.len()];
            let weight = graph.add_constant(weight_name, weight_shape, new_weight)?;
            let bias = graph.add_constant(bias_name, channels, new_bias)?;
            graph.set_operator_inputs(producer, vec![x, weight, bias])?;
            if let Some(act) = activation {
                let mut kind = graph.operator(producer).kind.clone();
                if let Some(slot) = kind.activation_slot() {
                    *slot = Some(act);
                }
                graph.set_operator_kind(producer, kind)?;
            }
            absorb(graph, producer, id)?;
            result.rewrite(1);
        }
        if result.changed {
            graph.prune_variables();
        }
        Ok(result)
    }
}

// ─── fuse_activation ──────────────────────────────────────────────

pub struct FuseActivation;

impl OptimizePass for FuseActivation {
    fn name(&self) -> &'static str {
        "fuse_activation"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let mut result = PassResult::default();
        for id in schedule(graph)? {
            let Some(op) = graph.get_operator(id) else {
                continue;
            };
            let Some(act) = op.kind.as_activation() else {
                continue;
            };
            let Some(producer) = fusible_producer(graph, op.inputs[0], id) else {
                continue;
            };
            let mut kind = graph.operator(producer).kind.clone();
            match kind.activation_slot() {
                Some(slot) if slot.is_none() => *slot = Some(act),
                _ => continue,
            }
            graph.set_operator_kind(producer, kind)?;
            absorb(graph, producer, id)?;
            result.rewrite(1);
        }
        if result.changed {
            graph.prune_variables();
        }
        Ok(result)
    }
}
