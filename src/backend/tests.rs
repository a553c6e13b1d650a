use super::webgpu::{dispatch, kernels, signature};
use super::*;
use crate::ir::{
    Activation, Conv2DParams, FilterLayout, GraphBuilder, OperatorKind, Padding, Pool2DParams,
    PoolMode,
};

fn conv(activation: Option<Activation>) -> OperatorKind {
    OperatorKind::Convolution2D(Conv2DParams {
        kernel: [3, 3],
        stride: [1, 1],
        padding: Padding::Symmetric([1, 1]),
        filter_layout: FilterLayout::Oihw,
        activation,
    })
}

/// x → conv → relu → linear(+bias)
fn conv_relu_linear() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 1, 4, 4]);
    let w = b.constant_fn("w", &[2, 1, 3, 3], |i| i as f32 * 0.01).unwrap();
    let h = b.op(conv(None), &[x, w]).unwrap();
    let r = b.op(OperatorKind::Relu, &[h]).unwrap();
    let w2 = b.constant_fn("w2", &[3, 32], |i| (i % 5) as f32).unwrap();
    let b2 = b.constant("b2", &[3], vec![0.5, 1.5, 2.5]).unwrap();
    let y = b.op(OperatorKind::Linear { activation: None }, &[r, w2, b2]).unwrap();
    b.finish(&[y]).unwrap()
}

fn with_lrn() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 4, 2, 2]);
    let n = b
        .op(
            OperatorKind::LocalResponseNormalization {
                size: 5,
                k: 2.0,
                alpha: 1e-4,
                beta: 0.75,
            },
            &[x],
        )
        .unwrap();
    let y = b.op(OperatorKind::Relu, &[n]).unwrap();
    b.finish(&[y]).unwrap()
}

fn fallback(artifacts: &Artifacts) -> &FallbackDescriptor {
    match &artifacts.descriptor {
        Descriptor::Fallback(d) => d,
        other => panic!("expected fallback descriptor, got {}", other.backend()),
    }
}

fn webgpu(artifacts: &Artifacts) -> &WebGpuDescriptor {
    match &artifacts.descriptor {
        Descriptor::WebGpu(d) => d,
        other => panic!("expected webgpu descriptor, got {}", other.backend()),
    }
}

#[test]
fn test_fallback_kernels_follow_operator_order() {
    let g = conv_relu_linear();
    let artifacts = FallbackGenerator::new().generate(&g).unwrap();
    let d = fallback(&artifacts);
    let names: Vec<&str> = d.kernels.iter().map(|k| k.implementation).collect();
    assert_eq!(names, vec!["convolution_2d", "relu", "linear"]);
    assert_eq!(d.kernels[0].params["padding"], serde_json::json!([1, 1, 1, 1]));
    assert_eq!(d.kernels[0].params["filter_layout"], "oihw");
    assert!(d.kernels[2].params["activation"].is_null());
    assert_eq!(d.inputs, vec!["v0"]);
    assert_eq!(artifacts.backend(), "fallback");
}

#[test]
fn test_weight_buffer_packs_constants_in_first_use_order() {
    let g = conv_relu_linear();
    let artifacts = FallbackGenerator::new().generate(&g).unwrap();
    let w = &artifacts.weights;
    let order: Vec<&str> = w.entries.iter().map(|e| e.variable.as_str()).collect();
    assert_eq!(order, vec!["v1", "v4", "v5"]);
    assert_eq!(w.entries[0].offset, 0);
    assert_eq!(w.entries[0].length, 18 * 4);
    assert_eq!(w.entries[1].offset, 18 * 4);
    assert_eq!(w.entries[2].offset, (18 + 96) * 4);
    assert_eq!(w.byte_len(), (18 + 96 + 3) * 4);

    // every constant is present with its exact payload
    for var in g.variables().filter(|v| v.is_constant()) {
        let entry = w.entry(&var.id.to_string()).unwrap();
        assert_eq!(w.values(entry), var.data.as_deref().unwrap());
    }
    let bias = &w.as_bytes()[(18 + 96) * 4..];
    assert_eq!(bias, bytemuck::cast_slice::<f32, u8>(&[0.5, 1.5, 2.5]));
}

#[test]
fn test_shared_constant_is_packed_once() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 4]);
    let w = b.constant_fn("w", &[4, 4], |i| i as f32).unwrap();
    let h = b.op(OperatorKind::Linear { activation: None }, &[x, w]).unwrap();
    let y = b.op(OperatorKind::Linear { activation: None }, &[h, w]).unwrap();
    let g = b.finish(&[y]).unwrap();
    let artifacts = FallbackGenerator::new().generate(&g).unwrap();
    assert_eq!(artifacts.weights.entries.len(), 1);
    assert_eq!(artifacts.weights.byte_len(), 16 * 4);
}

#[test]
fn test_lrn_is_unsupported_on_webgpu_only() {
    let g = with_lrn();
    let err = WebGpuGenerator::default().generate(&g).unwrap_err();
    assert_eq!(
        err,
        GraphError::UnsupportedBackendOperator {
            backend: "webgpu",
            kind: "local_response_normalization",
            operator: "op0(local_response_normalization)".to_string(),
        }
    );

    let artifacts = FallbackGenerator::new().generate(&g).unwrap();
    let d = fallback(&artifacts);
    assert_eq!(d.kernels[0].implementation, "local_response_normalization");
    assert_eq!(d.kernels[0].params["size"], 5);
}

#[test]
fn test_generation_states() {
    let g = conv_relu_linear();
    let mut run = Generation::new("fallback", &g);
    let order = run.traverse(|_| Ok(())).unwrap();
    run.lower(&order, |op| Ok(op.id)).unwrap();
    run.pack(&order);
    run.finish();
    assert_eq!(
        run.history(),
        &[
            GeneratorState::Start,
            GeneratorState::Traversing,
            GeneratorState::Lowering(order[0]),
            GeneratorState::Lowering(order[1]),
            GeneratorState::Lowering(order[2]),
            GeneratorState::Packing,
            GeneratorState::Done,
        ]
    );
}

#[test]
fn test_failed_lowering_is_final() {
    let g = with_lrn();
    let mut run = Generation::new("webgpu", &g);
    let order = run.traverse(|_| Ok(())).unwrap();
    let err = run
        .lower(&order, |op| kernels::plan(&g, op, 64))
        .unwrap_err();
    assert_eq!(err.kind(), "UnsupportedBackendOperator");
    assert!(matches!(run.state(), GeneratorState::Failed(reason) if reason.contains("webgpu")));
    assert_eq!(run.history().len(), 4);
}

#[test]
fn test_traversal_limits_can_reject() {
    let g = conv_relu_linear();
    let mut run = Generation::new("webgpu", &g);
    let err = run
        .traverse(|_| Err(GraphError::invalid("graph", "too large")))
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidGraph");
    assert!(matches!(run.state(), GeneratorState::Failed(_)));
}

#[test]
fn test_webgpu_descriptor_layout() {
    let g = conv_relu_linear();
    let artifacts = WebGpuGenerator::new(32).generate(&g).unwrap();
    let d = webgpu(&artifacts);
    assert_eq!(d.kernels.len(), 3);

    // x, conv out, relu out, linear out
    let alloc: Vec<(&str, usize, usize)> = d
        .data_allocation
        .iter()
        .map(|a| (a.variable.as_str(), a.offset, a.length))
        .collect();
    assert_eq!(
        alloc,
        vec![("v0", 0, 16), ("v2", 16, 32), ("v3", 48, 32), ("v6", 80, 3)]
    );
    assert_eq!(d.data_elements, 83);

    // conv reads x from data and the filter from weights, writes at 16
    assert_eq!(d.kernels[0].params, vec![0, 0, 16]);
    // linear: relu output, w2 after the 18 conv weights, b2 after w2
    assert_eq!(d.kernels[2].params, vec![48, 18, 18 + 96, 80]);
    assert_eq!(d.kernels[0].workgroups, [1, 1, 1]);
    assert_eq!(d.kernels[0].workgroup_size, 32);
    assert!(d.kernels[0].entry_point.starts_with("convolution_2d_"));
}

#[test]
fn test_identical_operators_share_a_kernel() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 8]);
    let a = b.op(OperatorKind::Relu, &[x]).unwrap();
    let c = b.op(OperatorKind::Relu, &[a]).unwrap();
    let t = b.op(OperatorKind::Tanh, &[c]).unwrap();
    let g = b.finish(&[t]).unwrap();

    let artifacts = WebGpuGenerator::default().generate(&g).unwrap();
    let d = webgpu(&artifacts);
    assert_eq!(d.kernels.len(), 3);
    assert_eq!(d.kernels[0].entry_point, d.kernels[1].entry_point);
    assert_ne!(d.kernels[1].entry_point, d.kernels[2].entry_point);
    assert_eq!(d.kernel_sources.len(), 2);

    let module = d.concat_kernel_sources();
    assert!(module.starts_with(kernels::PRELUDE));
    assert_eq!(module.matches("@compute").count(), 2);
    assert_eq!(module.matches(&format!("fn {}(", d.kernels[0].entry_point)).count(), 1);
}

#[test]
fn test_kernel_names_are_content_addressed() {
    let g = conv_relu_linear();
    let specs: Vec<_> = g
        .operators()
        .map(|op| kernels::plan(&g, op, 64).unwrap())
        .collect();
    let parallel = signature::kernel_names(&specs);
    let sequential: Vec<String> = specs.iter().map(signature::kernel_name).collect();
    assert_eq!(parallel, sequential);
    assert!(parallel[1].starts_with("relu_"));
    assert_eq!(parallel[1].len(), "relu_".len() + 12);

    // a different workgroup size is a different kernel
    let other = kernels::plan(&g, g.operators().nth(1).unwrap(), 128).unwrap();
    assert_ne!(signature::kernel_name(&other), parallel[1]);
}

#[test]
fn test_padding_conventions_share_a_kernel() {
    let symmetric = {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[1, 1, 5, 5]);
        let w = b.constant_fn("w", &[1, 1, 3, 3], |_| 1.0).unwrap();
        let y = b.op(conv(None), &[x, w]).unwrap();
        b.finish(&[y]).unwrap()
    };
    let same = {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[1, 1, 5, 5]);
        let w = b.constant_fn("w", &[1, 1, 3, 3], |_| 1.0).unwrap();
        let mut kind = conv(None);
        if let OperatorKind::Convolution2D(p) = &mut kind {
            p.padding = Padding::Same;
        }
        let y = b.op(kind, &[x, w]).unwrap();
        b.finish(&[y]).unwrap()
    };
    let name = |g: &Graph| {
        let artifacts = WebGpuGenerator::default().generate(g).unwrap();
        webgpu(&artifacts).kernels[0].entry_point.clone()
    };
    assert_eq!(name(&symmetric), name(&same));
}

#[test]
fn test_dispatch_spills_into_y() {
    assert_eq!(dispatch(1, 64), [1, 1, 1]);
    assert_eq!(dispatch(64, 64), [1, 1, 1]);
    assert_eq!(dispatch(65, 64), [2, 1, 1]);
    assert_eq!(dispatch(65_535 * 64, 64), [65_535, 1, 1]);
    assert_eq!(dispatch(65_535 * 64 + 1, 64), [65_535, 2, 1]);
}

#[test]
fn test_workgroup_size_is_clamped() {
    assert_eq!(WebGpuGenerator::new(0).workgroup_size(), 1);
    assert_eq!(WebGpuGenerator::new(1024).workgroup_size(), 256);
}

#[test]
fn test_emitted_kernels_cover_every_kind() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, 2, 4, 4]);
    let w = b.constant_fn("w", &[2, 2, 3, 3], |i| i as f32 * 0.01).unwrap();
    let c = b.op(conv(Some(Activation::LeakyRelu { slope: -0.5 })), &[x, w]).unwrap();
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
    let s = b.op(OperatorKind::Softmax { axis: 1 }, &[p]).unwrap();
    let a = b.op(OperatorKind::ScalarAffine { scale: -2.0, bias: 0.5 }, &[s]).unwrap();
    let g = b.finish(&[a]).unwrap();

    let artifacts = WebGpuGenerator::default().generate(&g).unwrap();
    let module = artifacts.descriptor.kernel_source().unwrap();
    assert!(module.contains("select(acc * (-0.5), acc, acc > 0.0)"));
    assert!(module.contains("acc / 4.0"));
    assert!(module.contains("exp("));
    assert!(module.contains("* (-2.0) + 0.5"));
    assert!(!module.contains("meta"));

    // softmax runs one invocation per row: 1 * 2 * 2 outputs over 2 channels
    let d = webgpu(&artifacts);
    assert_eq!(d.kernels[2].entry_point.split('_').next(), Some("softmax"));
}

#[test]
fn test_descriptor_json_fields() {
    let g = conv_relu_linear();
    let webgpu = WebGpuGenerator::default().generate(&g).unwrap();
    let json: serde_json::Value = serde_json::from_str(&webgpu.descriptor.to_json()).unwrap();
    assert_eq!(json["backend"], "webgpu");
    assert_eq!(json["kernels"].as_array().unwrap().len(), 3);
    assert!(json["data_allocation"].is_array());
    assert_eq!(json["variables"][1]["role"], "constant");
    assert_eq!(json["variables"][0]["role"], "input");
    assert_eq!(json["variables"][6]["role"], "output");
    assert_eq!(json["variables"][2]["role"], "intermediate");

    let fallback = FallbackGenerator::new().generate(&g).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fallback.descriptor.to_json()).unwrap();
    assert_eq!(json["backend"], "fallback");
    assert_eq!(json["weight_bytes"], (18 + 96 + 3) * 4);
    assert!(fallback.descriptor.kernel_source().is_none());
}

#[test]
fn test_create_generator_follows_options() {
    let options = PipelineOptions::default();
    assert_eq!(create_generator(Backend::Webgpu, &options).backend_name(), "webgpu");
    assert_eq!(create_generator(Backend::Fallback, &options).backend_name(), "fallback");
}

// ── fused activations ──

const ACTIVATIONS: [Activation; 4] = [
    Activation::Relu,
    Activation::Sigmoid,
    Activation::Tanh,
    Activation::LeakyRelu { slope: 0.1 },
];

fn expected_activation(act: Activation, v: &str) -> String {
    match act {
        Activation::Relu => format!("max({v}, 0.0)"),
        Activation::Sigmoid => format!("1.0 / (1.0 + exp(-{v}))"),
        Activation::Tanh => format!("tanh({v})"),
        Activation::LeakyRelu { .. } => format!("select({v} * 0.1, {v}, {v} > 0.0)"),
    }
}

/// Single-operator graphs carrying `act`, with the value expression the
/// activation applies to.
fn fused_operators(act: Activation) -> Vec<(Graph, &'static str)> {
    let axiswise = {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[1, 2, 2, 2]);
        let s = b.constant("s", &[2], vec![2.0, -1.0]).unwrap();
        let t = b.constant("t", &[2], vec![0.5, 0.25]).unwrap();
        let kind = OperatorKind::AxiswiseAffine {
            axis: 1,
            activation: Some(act),
        };
        let y = b.op(kind, &[x, s, t]).unwrap();
        b.finish(&[y]).unwrap()
    };
    let add = {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[1, 4]);
        let z = b.input("z", &[1, 4]);
        let y = b
            .op(OperatorKind::ElementwiseAdd { activation: Some(act) }, &[x, z])
            .unwrap();
        b.finish(&[y]).unwrap()
    };
    let linear = {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[1, 4]);
        let w = b.constant_fn("w", &[3, 4], |i| i as f32).unwrap();
        let y = b.op(OperatorKind::Linear { activation: Some(act) }, &[x, w]).unwrap();
        b.finish(&[y]).unwrap()
    };
    let convolution = {
        let mut b = GraphBuilder::new();
        let x = b.input("x", &[1, 1, 4, 4]);
        let w = b.constant_fn("w", &[2, 1, 3, 3], |i| i as f32).unwrap();
        let y = b.op(conv(Some(act)), &[x, w]).unwrap();
        b.finish(&[y]).unwrap()
    };
    vec![
        (axiswise, "(data[p0 + i] * weights[p1 + c] + weights[p2 + c])"),
        (add, "acc"),
        (linear, "acc"),
        (convolution, "acc"),
    ]
}

#[test]
fn test_fused_activations_wrap_the_whole_value() {
    for act in ACTIVATIONS {
        for (g, value) in fused_operators(act) {
            let artifacts = WebGpuGenerator::default().generate(&g).unwrap();
            let module = artifacts.descriptor.kernel_source().unwrap();
            let store = format!("data[o + i] = {};", expected_activation(act, value));
            assert!(module.contains(&store), "{act:?}: missing `{store}` in\n{module}");
        }
    }
}

#[test]
fn test_axiswise_affine_sigmoid_and_leaky_relu() {
    let (g, _) = fused_operators(Activation::Sigmoid).remove(0);
    let module = WebGpuGenerator::default().generate(&g).unwrap().descriptor.kernel_source().unwrap();
    assert!(module.contains("exp(-(data[p0 + i] * weights[p1 + c] + weights[p2 + c]))"));
    assert!(!module.contains("exp(-data"));

    let (g, _) = fused_operators(Activation::LeakyRelu { slope: 0.1 }).remove(0);
    let module = WebGpuGenerator::default().generate(&g).unwrap().descriptor.kernel_source().unwrap();
    assert!(module.contains("select((data[p0 + i] * weights[p1 + c] + weights[p2 + c]) * 0.1"));
}

#[test]
fn test_kernels_differing_only_in_dims_are_emitted_once() {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[2, 3]);
    let a = b.op(OperatorKind::Relu, &[x]).unwrap();
    let r = b.op(OperatorKind::Reshape { shape: vec![3, 2] }, &[a]).unwrap();
    let y = b.op(OperatorKind::Relu, &[r]).unwrap();
    let g = b.finish(&[y]).unwrap();

    let artifacts = WebGpuGenerator::default().generate(&g).unwrap();
    let d = webgpu(&artifacts);
    assert_eq!(d.kernels.len(), 3);
    assert_eq!(d.kernels[0].entry_point, d.kernels[2].entry_point);
    assert_eq!(d.kernel_sources.len(), 2);
    assert_eq!(d.concat_kernel_sources().matches("@compute").count(), 2);
}
