//! WGSL compute kernel synthesis.
//!
//! A kernel is generated from its `KernelSpec`: operator kind with
//! resolved parameters, operand shapes and placements, output shape and
//! workgroup size. Buffer offsets are not part of it; each dispatch reads
//! them from the `params` table, so one kernel serves every operator whose
//! spec emits the same code.

use std::fmt::Write;

use crate::error::{GraphError, Result};
use crate::eval::kernels::inner_size;
use crate::ir::{Activation, FilterLayout, Graph, Operator, OperatorKind, Padding};

/// Bindings shared by every kernel in a module.
pub const PRELUDE: &str = "\
@group(0) @binding(0) var<storage, read> weights: array<f32>;
@group(0) @binding(1) var<storage, read_write> data: array<f32>;
@group(0) @binding(2) var<storage, read> params: array<u32>;
";

/// Where an operand lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Weights,
    Data,
}

impl Placement {
    fn buffer(self) -> &'static str {
        match self {
            Placement::Weights => "weights",
            Placement::Data => "data",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub shape: Vec<usize>,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelSpec {
    pub kind: OperatorKind,
    pub inputs: Vec<Operand>,
    pub output: Vec<usize>,
    /// Invocations per dispatch: one per output element, one per row for
    /// softmax.
    pub invocations: usize,
    pub workgroup_size: u32,
}

/// Describe the kernel `op` needs, with padding made explicit so that
/// equivalent conventions share a kernel.
pub fn plan(graph: &Graph, op: &Operator, workgroup_size: u32) -> Result<KernelSpec> {
    let inputs: Vec<Operand> = op
        .inputs
        .iter()
        .map(|&v| {
            let var = graph.variable(v);
            Operand {
                shape: var.shape.clone(),
                placement: if var.is_constant() {
                    Placement::Weights
                } else {
                    Placement::Data
                },
            }
        })
        .collect();
    let output = graph.variable(op.outputs[0]).shape.clone();
    let input_hw = match inputs[0].shape.as_slice() {
        [_, _, h, w] => [*h, *w],
        _ => [0, 0],
    };

    let kind = match &op.kind {
        OperatorKind::Convolution2D(p) => {
            let mut p = *p;
            p.padding = explicit(p.padding.resolve(input_hw, p.kernel, p.stride));
            OperatorKind::Convolution2D(p)
        }
        OperatorKind::Pooling2D(p) => {
            let mut p = *p;
            p.padding = explicit(p.effective_padding(input_hw));
            p.ceil_mode = false;
            OperatorKind::Pooling2D(p)
        }
        OperatorKind::LocalResponseNormalization { .. } => {
            return Err(GraphError::UnsupportedBackendOperator {
                backend: "webgpu",
                kind: op.kind.name(),
                operator: op.label(),
            })
        }
        other => other.clone(),
    };

    let total: usize = output.iter().product();
    let invocations = match &kind {
        OperatorKind::Softmax { axis } => total / output[*axis],
        _ => total,
    };
    Ok(KernelSpec {
        kind,
        inputs,
        output,
        invocations,
        workgroup_size,
    })
}

fn explicit([top, left, bottom, right]: [usize; 4]) -> Padding {
    Padding::Explicit {
        top,
        left,
        bottom,
        right,
    }
}

/// WGSL float literal.
fn lit(x: f32) -> String {
    let text = format!("{:?}", x);
    if x < 0.0 {
        format!("({})", text)
    } else {
        text
    }
}

/// Apply a fused activation to the value expression `v`.
fn activate(act: Option<Activation>, v: &str) -> String {
    let v = if v.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        v.to_string()
    } else {
        format!("({v})")
    };
    match act {
        None => v.to_string(),
        Some(Activation::Relu) => format!("max({v}, 0.0)"),
        Some(Activation::Sigmoid) => format!("1.0 / (1.0 + exp(-{v}))"),
        Some(Activation::Tanh) => format!("tanh({v})"),
        Some(Activation::LeakyRelu { slope }) => {
            format!("select({v} * {}, {v}, {v} > 0.0)", lit(slope))
        }
    }
}

impl KernelSpec {
    /// The emitted function with its entry-point name left blank. Specs
    /// that differ only in ways the code never sees (an elementwise
    /// operand's dims, say) have equal signatures.
    pub fn signature(&self) -> String {
        self.emit("")
    }

    /// Read expression for element `index` of input `k`.
    fn read(&self, k: usize, index: &str) -> String {
        format!("{}[p{} + {}]", self.inputs[k].placement.buffer(), k, index)
    }

    /// Complete entry-point function named `name`.
    pub fn emit(&self, name: &str) -> String {
        let wg = self.workgroup_size;
        let mut s = String::new();
        let _ = writeln!(s, "@compute @workgroup_size({wg})");
        let _ = writeln!(
            s,
            "fn {name}(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {{"
        );
        let _ = writeln!(s, "    let i = gid.x + gid.y * nwg.x * {wg}u;");
        let _ = writeln!(s, "    if (i >= {}u) {{", self.invocations);
        let _ = writeln!(s, "        return;");
        let _ = writeln!(s, "    }}");
        for k in 0..self.inputs.len() {
            let _ = writeln!(s, "    let p{k} = params[{k}u];");
        }
        let _ = writeln!(s, "    let o = params[{}u];", self.inputs.len());
        self.body(&mut s);
        s.push_str("}\n");
        s
    }

    fn body(&self, s: &mut String) {
        let x = self.read(0, "i");
        match &self.kind {
            OperatorKind::Relu
            | OperatorKind::Sigmoid
            | OperatorKind::Tanh
            | OperatorKind::LeakyRelu { .. } => {
                let _ = writeln!(s, "    let x = {x};");
                let _ = writeln!(s, "    data[o + i] = {};", activate(self.kind.as_activation(), "x"));
            }
            OperatorKind::Reshape { .. } => {
                let _ = writeln!(s, "    data[o + i] = {x};");
            }
            OperatorKind::ScalarAffine { scale, bias } => {
                let _ = writeln!(s, "    data[o + i] = {x} * {} + {};", lit(*scale), lit(*bias));
            }
            OperatorKind::ElementwiseAdd { activation } => {
                let _ = writeln!(s, "    var acc: f32 = {x};");
                for k in 1..self.inputs.len() {
                    let _ = writeln!(s, "    acc = acc + {};", self.read(k, "i"));
                }
                let _ = writeln!(s, "    data[o + i] = {};", activate(*activation, "acc"));
            }
            OperatorKind::AxiswiseAffine { axis, activation } => {
                let shape = &self.inputs[0].shape;
                let _ = writeln!(
                    s,
                    "    let c = (i / {}u) % {}u;",
                    inner_size(shape, *axis),
                    shape[*axis]
                );
                let v = format!("{x} * {} + {}", self.read(1, "c"), self.read(2, "c"));
                let _ = writeln!(s, "    data[o + i] = {};", activate(*activation, &v));
            }
            OperatorKind::BatchNormalization { eps } => {
                let shape = &self.inputs[0].shape;
                let _ = writeln!(s, "    let c = (i / {}u) % {}u;", inner_size(shape, 1), shape[1]);
                let _ = writeln!(
                    s,
                    "    data[o + i] = ({x} - {}) / sqrt({} + {}) * {} + {};",
                    self.read(3, "c"),
                    self.read(4, "c"),
                    lit(*eps),
                    self.read(1, "c"),
                    self.read(2, "c")
                );
            }
            OperatorKind::Linear { activation } => self.linear(s, *activation),
            OperatorKind::Convolution2D(p) => self.conv2d(s, p.filter_layout, p.activation),
            OperatorKind::Pooling2D(_) => self.pool2d(s),
            OperatorKind::Softmax { axis } => self.softmax(s, *axis),
            // never planned
            OperatorKind::LocalResponseNormalization { .. } => {}
        }
    }

    fn bias_init(&self, index: &str) -> String {
        if self.inputs.len() > 2 {
            self.read(2, index)
        } else {
            "0.0".to_string()
        }
    }

    fn linear(&self, s: &mut String, activation: Option<Activation>) {
        let outputs = self.output[1];
        let features = self.inputs[1].shape[1];
        let _ = writeln!(s, "    let n = i / {outputs}u;");
        let _ = writeln!(s, "    let oc = i % {outputs}u;");
        let _ = writeln!(s, "    var acc: f32 = {};", self.bias_init("oc"));
        let _ = writeln!(s, "    for (var k: u32 = 0u; k < {features}u; k = k + 1u) {{");
        let _ = writeln!(
            s,
            "        acc = acc + {} * {};",
            self.read(0, &format!("n * {features}u + k")),
            self.read(1, &format!("oc * {features}u + k"))
        );
        let _ = writeln!(s, "    }}");
        let _ = writeln!(s, "    data[o + i] = {};", activate(activation, "acc"));
    }

    /// `[top, left, kernel_h, kernel_w, stride_h, stride_w]` of a sliding window.
    fn window(&self) -> [usize; 6] {
        let (kernel, stride, padding) = match &self.kind {
            OperatorKind::Convolution2D(p) => (p.kernel, p.stride, p.padding),
            OperatorKind::Pooling2D(p) => (p.kernel, p.stride, p.padding),
            _ => ([1, 1], [1, 1], Padding::NONE),
        };
        let [top, left, _, _] = padding.resolve([0, 0], kernel, stride);
        [top, left, kernel[0], kernel[1], stride[0], stride[1]]
    }

    /// Loop header over the window, skipping padded positions.
    fn window_loops(&self, s: &mut String, h: usize, w: usize) {
        let [pt, pl, kh, kw, sh, sw] = self.window();
        let _ = writeln!(s, "        for (var ky: u32 = 0u; ky < {kh}u; ky = ky + 1u) {{");
        let _ = writeln!(s, "            let iy = oy * {sh}u + ky;");
        let _ = writeln!(s, "            if (iy < {pt}u || iy - {pt}u >= {h}u) {{");
        let _ = writeln!(s, "                continue;");
        let _ = writeln!(s, "            }}");
        let _ = writeln!(s, "            for (var kx: u32 = 0u; kx < {kw}u; kx = kx + 1u) {{");
        let _ = writeln!(s, "                let ix = ox * {sw}u + kx;");
        let _ = writeln!(s, "                if (ix < {pl}u || ix - {pl}u >= {w}u) {{");
        let _ = writeln!(s, "                    continue;");
        let _ = writeln!(s, "                }}");
    }

    fn conv2d(&self, s: &mut String, layout: FilterLayout, activation: Option<Activation>) {
        let [_, c, h, w] = nchw(&self.inputs[0].shape);
        let [_, oc, oh, ow] = nchw(&self.output);
        let [pt, pl, kh, kw, _, _] = self.window();
        let _ = writeln!(s, "    let ox = i % {ow}u;");
        let _ = writeln!(s, "    let oy = (i / {ow}u) % {oh}u;");
        let _ = writeln!(s, "    let oc = (i / {}u) % {oc}u;", ow * oh);
        let _ = writeln!(s, "    let n = i / {}u;", ow * oh * oc);
        let _ = writeln!(s, "    var acc: f32 = {};", self.bias_init("oc"));
        let _ = writeln!(s, "    for (var c: u32 = 0u; c < {c}u; c = c + 1u) {{");
        self.window_loops(s, h, w);
        let filter = match layout {
            FilterLayout::Oihw => format!("((oc * {c}u + c) * {kh}u + ky) * {kw}u + kx"),
            FilterLayout::Ohwi => format!("((oc * {kh}u + ky) * {kw}u + kx) * {c}u + c"),
        };
        let pixel = format!("((n * {c}u + c) * {h}u + iy - {pt}u) * {w}u + ix - {pl}u");
        let _ = writeln!(
            s,
            "                acc = acc + {} * {};",
            self.read(0, &pixel),
            self.read(1, &filter)
        );
        let _ = writeln!(s, "            }}");
        let _ = writeln!(s, "        }}");
        let _ = writeln!(s, "    }}");
        let _ = writeln!(s, "    data[o + i] = {};", activate(activation, "acc"));
    }

    fn pool2d(&self, s: &mut String) {
        let [_, _, h, w] = nchw(&self.inputs[0].shape);
        let [_, _, oh, ow] = nchw(&self.output);
        let [pt, pl, kh, kw, _, _] = self.window();
        let _ = writeln!(s, "    let ox = i % {ow}u;");
        let _ = writeln!(s, "    let oy = (i / {ow}u) % {oh}u;");
        let _ = writeln!(s, "    let plane = i / {}u;", ow * oh);
        let _ = writeln!(s, "    var best: f32 = -3.4028235e38;");
        let _ = writeln!(s, "    var acc: f32 = 0.0;");
        let _ = writeln!(s, "    {{");
        self.window_loops(s, h, w);
        let pixel = format!("(plane * {h}u + iy - {pt}u) * {w}u + ix - {pl}u");
        let _ = writeln!(s, "                let v = {};", self.read(0, &pixel));
        let _ = writeln!(s, "                best = max(best, v);");
        let _ = writeln!(s, "                acc = acc + v;");
        let _ = writeln!(s, "            }}");
        let _ = writeln!(s, "        }}");
        let _ = writeln!(s, "    }}");
        match &self.kind {
            OperatorKind::Pooling2D(p) if p.mode == crate::ir::PoolMode::Average => {
                let _ = writeln!(s, "    data[o + i] = acc / {};", lit((kh * kw) as f32));
            }
            _ => {
                let _ = writeln!(s, "    data[o + i] = best;");
            }
        }
    }

    fn softmax(&self, s: &mut String, axis: usize) {
        let shape = &self.inputs[0].shape;
        let inner = inner_size(shape, axis);
        let dim = shape[axis];
        let at = |v: &str| format!("row + {v} * {inner}u");
        let _ = writeln!(s, "    let row = (i / {inner}u) * {}u + i % {inner}u;", dim * inner);
        let _ = writeln!(s, "    var m: f32 = -3.4028235e38;");
        let _ = writeln!(s, "    for (var d: u32 = 0u; d < {dim}u; d = d + 1u) {{");
        let _ = writeln!(s, "        m = max(m, {});", self.read(0, &at("d")));
        let _ = writeln!(s, "    }}");
        let _ = writeln!(s, "    var denom: f32 = 0.0;");
        let _ = writeln!(s, "    for (var d: u32 = 0u; d < {dim}u; d = d + 1u) {{");
        let _ = writeln!(s, "        let e = exp({} - m);", self.read(0, &at("d")));
        let _ = writeln!(s, "        data[o + {}] = e;", at("d"));
        let _ = writeln!(s, "        denom = denom + e;");
        let _ = writeln!(s, "    }}");
        let _ = writeln!(s, "    for (var d: u32 = 0u; d < {dim}u; d = d + 1u) {{");
        let _ = writeln!(s, "        data[o + {0}] = data[o + {0}] / denom;", at("d"));
        let _ = writeln!(s, "    }}");
    }
}

fn nchw(shape: &[usize]) -> [usize; 4] {
    match shape {
        [n, c, h, w] => [*n, *c, *h, *w],
        _ => [0; 4],
    }
}
