use super::*;
use crate::diagnostic::{CollectingSink, NullSink};
use crate::eval::evaluate;
use crate::ir::{
    Activation, Conv2DParams, FilterLayout, GraphBuilder, OperatorKind, Padding, Pool2DParams,
    PoolMode,
};

fn assert_equivalent(before: &Graph, after: &Graph, inputs: &[Vec<f32>]) {
    let a = evaluate(before, inputs).unwrap();
    let b = evaluate(after, inputs).unwrap();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.len(), y.len());
        for (p, q) in x.iter().zip(y) {
            assert!((p - q).abs() <= 1e-4 * (1.0 + p.abs()), "{p} vs {q}");
        }
    }
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 7 % 11) as f32 - 5.0) * 0.25).collect()
}

fn kinds(g: &Graph) -> Vec<&'static str> {
    g.operators().map(|op| op.kind.name()).collect()
}

fn conv(padding: Padding, activation: Option<Activation>) -> OperatorKind {
    OperatorKind::Convolution2D(Conv2DParams {
        kernel: [3, 3],
        stride: [1, 1],
        padding,
        filter_layout: FilterLayout::Oihw,
        activation,
    })
}

#[test]
fn test_folds_constant_add() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[4]);
    let c1 = b.constant("c1", &[4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let c2 = b.constant("c2", &[4], vec![0.5; 4]).unwrap();
    let sum = b
        .op(OperatorKind::ElementwiseAdd { activation: None }, &[c1, c2])
        .unwrap();
    let y = b
        .op(OperatorKind::ElementwiseAdd { activation: None }, &[x, sum])
        .unwrap();
    let mut g = b.finish(&[y]).unwrap();
    let before = g.clone();

    let result = ConstantFolding.run(&mut g).unwrap();
    assert!(result.changed);
    assert_eq!(result.erased_operators, 1);
    assert_eq!(g.operator_count(), before.operator_count() - 1);
    assert_eq!(g.variable(sum).data.as_deref(), Some(&[1.5, 2.5, 3.5, 4.5][..]));
    assert!(g.get_variable(c1).is_none());
    assert!(g.get_variable(c2).is_none());
    g.validate().unwrap();
    assert_equivalent(&before, &g, &[ramp(4)]);
}

#[test]
fn test_batch_norm_folds_into_conv() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 2, 5, 5]);
    let w = b.constant("w", &[3, 2, 3, 3], ramp(54)).unwrap();
    let bias = b.constant("b", &[3], vec![0.1, -0.2, 0.3]).unwrap();
    let h = b.op(conv(Padding::Symmetric([1, 1]), None), &[x, w, bias]).unwrap();
    let gamma = b.constant("gamma", &[3], vec![1.5, 0.5, -1.0]).unwrap();
    let beta = b.constant("beta", &[3], vec![0.0, 1.0, -1.0]).unwrap();
    let mean = b.constant("mean", &[3], vec![0.2, -0.1, 0.0]).unwrap();
    let var = b.constant("var", &[3], vec![1.0, 4.0, 0.25]).unwrap();
    let n = b
        .op(
            OperatorKind::BatchNormalization { eps: 2e-5 },
            &[h, gamma, beta, mean, var],
        )
        .unwrap();
    let y = b.op(OperatorKind::Relu, &[n]).unwrap();
    let g = b.finish(&[y]).unwrap();

    let optimized = Optimizer::default().optimize(g.clone(), &mut NullSink).unwrap();
    assert_eq!(kinds(&optimized), vec!["convolution_2d"]);
    let op = optimized.operators().next().unwrap();
    match &op.kind {
        OperatorKind::Convolution2D(p) => {
            assert_eq!(p.activation, Some(Activation::Relu));
            assert_eq!(p.filter_layout, FilterLayout::Ohwi);
            assert_eq!(
                p.padding,
                Padding::Explicit {
                    top: 1,
                    left: 1,
                    bottom: 1,
                    right: 1
                }
            );
        }
        other => panic!("expected convolution, got {:?}", other),
    }
    assert_equivalent(&g, &optimized, &[ramp(50)]);
}

#[test]
fn test_fuses_activation_into_linear() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[2, 3]);
    let w = b.constant("w", &[4, 3], ramp(12)).unwrap();
    let h = b.op(OperatorKind::Linear { activation: None }, &[x, w]).unwrap();
    let y = b.op(OperatorKind::Tanh, &[h]).unwrap();
    let mut g = b.finish(&[y]).unwrap();
    let before = g.clone();

    let result = FuseActivation.run(&mut g).unwrap();
    assert_eq!(result.rewrites_applied, 1);
    assert_eq!(kinds(&g), vec!["linear"]);
    assert_eq!(g.outputs(), &[y]);
    assert_eq!(g.variable(y).producer(), Some(OperatorId(0)));
    assert!(g.get_variable(h).is_none());
    g.validate().unwrap();
    assert_equivalent(&before, &g, &[ramp(6)]);
}

#[test]
fn test_shared_intermediate_is_not_fused() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[2, 3]);
    let w = b.constant("w", &[3, 3], ramp(9)).unwrap();
    let h = b.op(OperatorKind::Linear { activation: None }, &[x, w]).unwrap();
    let r = b.op(OperatorKind::Relu, &[h]).unwrap();
    let y = b
        .op(OperatorKind::ElementwiseAdd { activation: None }, &[h, r])
        .unwrap();
    let mut g = b.finish(&[y]).unwrap();

    let result = FuseActivation.run(&mut g).unwrap();
    assert!(!result.changed);
    assert_eq!(kinds(&g), vec!["linear", "relu", "elementwise_add"]);
}

#[test]
fn test_merges_scalar_affine_chain() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[3]);
    let a = b
        .op(OperatorKind::ScalarAffine { scale: 2.0, bias: 0.0 }, &[x])
        .unwrap();
    let c = b
        .op(OperatorKind::ScalarAffine { scale: 1.0, bias: 3.0 }, &[a])
        .unwrap();
    let y = b
        .op(OperatorKind::ScalarAffine { scale: -1.0, bias: 0.5 }, &[c])
        .unwrap();
    let mut g = b.finish(&[y]).unwrap();
    let before = g.clone();

    MergeElementwise.run(&mut g).unwrap();
    assert_eq!(g.operator_count(), 1);
    assert_eq!(
        g.operators().next().unwrap().kind,
        OperatorKind::ScalarAffine {
            scale: -2.0,
            bias: -2.5
        }
    );
    assert_equivalent(&before, &g, &[vec![0.0, 1.0, -4.0]]);
}

#[test]
fn test_flattens_nested_adds() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[2]);
    let y = b.input("y", &[2]);
    let z = b.input("z", &[2]);
    let xy = b
        .op(OperatorKind::ElementwiseAdd { activation: None }, &[x, y])
        .unwrap();
    let out = b
        .op(
            OperatorKind::ElementwiseAdd {
                activation: Some(Activation::Relu),
            },
            &[xy, z],
        )
        .unwrap();
    let mut g = b.finish(&[out]).unwrap();
    let before = g.clone();

    MergeElementwise.run(&mut g).unwrap();
    assert_eq!(g.operator_count(), 1);
    assert_eq!(g.operators().next().unwrap().inputs, vec![x, y, z]);
    assert_equivalent(
        &before,
        &g,
        &[vec![1.0, -2.0], vec![0.5, 0.5], vec![-3.0, 4.0]],
    );
}

#[test]
fn test_normalize_layout_preserves_numerics() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 2, 7, 6]);
    let w = b.constant("w", &[2, 2, 3, 3], ramp(36)).unwrap();
    let c = b.op(conv(Padding::Same, None), &[x, w]).unwrap();
    let p = b
        .op(
            OperatorKind::Pooling2D(Pool2DParams {
                mode: PoolMode::Average,
                kernel: [2, 2],
                stride: [2, 2],
                padding: Padding::NONE,
                ceil_mode: true,
            }),
            &[c],
        )
        .unwrap();
    let mut g = b.finish(&[p]).unwrap();
    let before = g.clone();
    assert_eq!(g.variable(p).shape, vec![1, 2, 4, 3]);

    let result = NormalizeLayout.run(&mut g).unwrap();
    assert_eq!(result.rewrites_applied, 2);
    for op in g.operators() {
        match &op.kind {
            OperatorKind::Convolution2D(p) => {
                assert!(matches!(p.padding, Padding::Explicit { .. }));
                assert_eq!(p.filter_layout, FilterLayout::Ohwi);
            }
            OperatorKind::Pooling2D(p) => {
                assert!(!p.ceil_mode);
                assert!(matches!(p.padding, Padding::Explicit { bottom: 1, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(g.get_variable(w).is_none());
    g.validate().unwrap();
    assert_equivalent(&before, &g, &[ramp(84)]);

    // a second run finds nothing left to do
    assert!(!NormalizeLayout.run(&mut g).unwrap().changed);
}

#[test]
fn test_disabled_pass_is_skipped() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 2]);
    let w = b.constant("w", &[2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
    let h = b.op(OperatorKind::Linear { activation: None }, &[x, w]).unwrap();
    let y = b.op(OperatorKind::Sigmoid, &[h]).unwrap();
    let g = b.finish(&[y]).unwrap();

    let optimizer = Optimizer::new(OptimizerOptions {
        disabled_passes: vec!["fuse_activation".to_string()],
        ..Default::default()
    });
    assert!(!optimizer.pass_names().contains(&"fuse_activation"));
    let out = optimizer.optimize(g, &mut NullSink).unwrap();
    assert_eq!(kinds(&out), vec!["linear", "sigmoid"]);
}

#[test]
fn test_snapshots_follow_changing_passes() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 2]);
    let w = b.constant("w", &[2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
    let h = b.op(OperatorKind::Linear { activation: None }, &[x, w]).unwrap();
    let y = b.op(OperatorKind::Relu, &[h]).unwrap();
    let g = b.finish(&[y]).unwrap();

    let mut sink = CollectingSink::new();
    Optimizer::default().optimize(g, &mut sink).unwrap();
    assert_eq!(sink.stages(), vec!["after fuse_activation"]);
    assert!(sink.snapshots[0].1.contains("+relu"));
}

#[test]
fn test_dead_operators_are_removed() {
    let mut g = Graph::new();
    let x = g.add_variable("x", vec![2]);
    let y = g.add_variable("y", vec![2]);
    let t = g.add_variable("t", vec![2]);
    let z = g.add_variable("z", vec![2]);
    g.add_operator(OperatorKind::Relu, vec![x], vec![y]).unwrap();
    g.add_operator(OperatorKind::Tanh, vec![x], vec![t]).unwrap();
    g.add_operator(OperatorKind::Sigmoid, vec![t], vec![z]).unwrap();
    g.set_inputs(vec![x]).unwrap();
    g.set_outputs(vec![y]).unwrap();
    assert!(g.validate().is_err());

    let result = EliminateDeadCode.run(&mut g).unwrap();
    assert_eq!(result.erased_operators, 2);
    assert_eq!(kinds(&g), vec!["relu"]);
    assert!(g.get_variable(t).is_none() && g.get_variable(z).is_none());
    g.validate().unwrap();
}

struct DetachOutput;

impl OptimizePass for DetachOutput {
    fn name(&self) -> &'static str {
        "detach_output"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let last = graph.topological_order()?.pop();
        if let Some(id) = last {
            graph.remove_operator(id)?;
        }
        Ok(PassResult {
            changed: true,
            ..Default::default()
        })
    }
}

#[test]
fn test_broken_pass_is_reported() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[2]);
    let h = b.op(OperatorKind::Relu, &[x]).unwrap();
    let y = b.op(OperatorKind::Tanh, &[h]).unwrap();
    let g = b.finish(&[y]).unwrap();

    let optimizer = Optimizer {
        options: OptimizerOptions::default(),
        passes: vec![Box::new(DetachOutput)],
    };
    match optimizer.optimize(g, &mut NullSink) {
        Err(GraphError::OptimizationInvariantViolation { pass, node, .. }) => {
            assert_eq!(pass, "detach_output");
            assert!(!node.is_empty());
        }
        other => panic!("expected invariant violation, got {:?}", other.map(|_| ())),
    }
}
