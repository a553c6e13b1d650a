//! Portable `f32` implementations of every operator kind.
//!
//! Activations are NCHW, row-major. These are the semantics every backend
//! lowering must reproduce.

use crate::ir::{Activation, Conv2DParams, FilterLayout, Pool2DParams, PoolMode};

fn activate(v: f32, act: Option<Activation>) -> f32 {
    match act {
        Some(a) => a.apply(v),
        None => v,
    }
}

pub fn conv2d(
    x: &[f32],
    x_shape: [usize; 4],
    w: &[f32],
    w_shape: &[usize],
    bias: Option<&[f32]>,
    p: &Conv2DParams,
    out_hw: [usize; 2],
) -> Vec<f32> {
    let [n, c, h, wd] = x_shape;
    let dims = match p.filter_layout.dims(w_shape) {
        Some(d) => d,
        None => return Vec::new(),
    };
    let oc = dims[0];
    let [kh, kw] = p.kernel;
    let [sh, sw] = p.stride;
    let [pt, pl, _, _] = p.padding.resolve([h, wd], p.kernel, p.stride);
    let [oh, ow] = out_hw;
    let mut out = vec![0.0f32; n * oc * oh * ow];

    for b in 0..n {
        for o in 0..oc {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = bias.map_or(0.0, |bias| bias[o]);
                    for i in 0..c {
                        for ky in 0..kh {
                            let iy = oy * sh + ky;
                            if iy < pt || iy - pt >= h {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = ox * sw + kx;
                                if ix < pl || ix - pl >= wd {
                                    continue;
                                }
                                let xv = x[((b * c + i) * h + iy - pt) * wd + ix - pl];
                                let wv = w[p.filter_layout.offset(dims, o, i, ky, kx)];
                                acc += xv * wv;
                            }
                        }
                    }
                    out[((b * oc + o) * oh + oy) * ow + ox] = activate(acc, p.activation);
                }
            }
        }
    }
    out
}

/// `y[n, o] = act(Σ_k x[n, k] · w[o, k] + b[o])`.
pub fn linear(
    x: &[f32],
    batch: usize,
    features: usize,
    w: &[f32],
    outputs: usize,
    bias: Option<&[f32]>,
    act: Option<Activation>,
) -> Vec<f32> {
    let mut out = vec![0.0f32; batch * outputs];
    for b in 0..batch {
        let row = &x[b * features..(b + 1) * features];
        for o in 0..outputs {
            let wrow = &w[o * features..(o + 1) * features];
            let mut acc = bias.map_or(0.0, |bias| bias[o]);
            for (xv, wv) in row.iter().zip(wrow) {
                acc += xv * wv;
            }
            out[b * outputs + o] = activate(acc, act);
        }
    }
    out
}

pub fn unary(x: &[f32], act: Activation) -> Vec<f32> {
    x.iter().map(|&v| act.apply(v)).collect()
}

/// Number of elements after `axis` (stride of `axis` in a row-major tensor).
pub(crate) fn inner_size(shape: &[usize], axis: usize) -> usize {
    shape[axis + 1..].iter().product()
}

#[allow(clippy::too_many_arguments)]
pub fn batch_normalization(
    x: &[f32],
    shape: &[usize],
    gamma: &[f32],
    beta: &[f32],
    mean: &[f32],
    var: &[f32],
    eps: f32,
) -> Vec<f32> {
    let inner = inner_size(shape, 1);
    let channels = shape[1];
    x.iter()
        .enumerate()
        .map(|(i, &v)| {
            let c = (i / inner) % channels;
            (v - mean[c]) / (var[c] + eps).sqrt() * gamma[c] + beta[c]
        })
        .collect()
}

pub fn pool2d(x: &[f32], x_shape: [usize; 4], p: &Pool2DParams, out_hw: [usize; 2]) -> Vec<f32> {
    let [n, c, h, w] = x_shape;
    let [kh, kw] = p.kernel;
    let [sh, sw] = p.stride;
    let [pt, pl, _, _] = p.effective_padding([h, w]);
    let [oh, ow] = out_hw;
    let mut out = vec![0.0f32; n * c * oh * ow];

    for plane in 0..n * c {
        let src = &x[plane * h * w..(plane + 1) * h * w];
        for oy in 0..oh {
            for ox in 0..ow {
                let mut max = f32::NEG_INFINITY;
                let mut sum = 0.0f32;
                for ky in 0..kh {
                    let iy = oy * sh + ky;
                    if iy < pt || iy - pt >= h {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix = ox * sw + kx;
                        if ix < pl || ix - pl >= w {
                            continue;
                        }
                        let v = src[(iy - pt) * w + ix - pl];
                        max = max.max(v);
                        sum += v;
                    }
                }
                out[(plane * oh + oy) * ow + ox] = match p.mode {
                    PoolMode::Max => max,
                    PoolMode::Average => sum / (kh * kw) as f32,
                };
            }
        }
    }
    out
}

/// Cross-channel local response normalization.
pub fn lrn(x: &[f32], shape: [usize; 4], size: usize, k: f32, alpha: f32, beta: f32) -> Vec<f32> {
    let [n, c, h, w] = shape;
    let plane = h * w;
    let half = size / 2;
    let mut out = vec![0.0f32; x.len()];
    for b in 0..n {
        for ch in 0..c {
            let lo = ch.saturating_sub(half);
            let hi = (ch + size - half).min(c);
            for p in 0..plane {
                let mut sq = 0.0f32;
                for j in lo..hi {
                    let v = x[(b * c + j) * plane + p];
                    sq += v * v;
                }
                let idx = (b * c + ch) * plane + p;
                out[idx] = x[idx] / (k + alpha * sq).powf(beta);
            }
        }
    }
    out
}

pub fn elementwise_add(operands: &[&[f32]], act: Option<Activation>) -> Vec<f32> {
    let len = operands.first().map_or(0, |o| o.len());
    (0..len)
        .map(|i| activate(operands.iter().map(|o| o[i]).sum(), act))
        .collect()
}

pub fn scalar_affine(x: &[f32], scale: f32, bias: f32) -> Vec<f32> {
    x.iter().map(|&v| v * scale + bias).collect()
}

pub fn axiswise_affine(
    x: &[f32],
    shape: &[usize],
    axis: usize,
    scale: &[f32],
    bias: &[f32],
    act: Option<Activation>,
) -> Vec<f32> {
    let inner = inner_size(shape, axis);
    let dim = shape[axis];
    x.iter()
        .enumerate()
        .map(|(i, &v)| {
            let c = (i / inner) % dim;
            activate(v * scale[c] + bias[c], act)
        })
        .collect()
}

pub fn softmax(x: &[f32], shape: &[usize], axis: usize) -> Vec<f32> {
    let inner = inner_size(shape, axis);
    let dim = shape[axis];
    let outer = x.len() / (dim * inner);
    let mut out = vec![0.0f32; x.len()];
    for o in 0..outer {
        for i in 0..inner {
            let at = |d: usize| (o * dim + d) * inner + i;
            let max = (0..dim).map(|d| x[at(d)]).fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for d in 0..dim {
                let e = (x[at(d)] - max).exp();
                out[at(d)] = e;
                sum += e;
            }
            for d in 0..dim {
                out[at(d)] /= sum;
            }
        }
    }
    out
}

/// Reorder an `Oihw` filter into `Ohwi`.
pub fn oihw_to_ohwi(w: &[f32], dims: [usize; 4]) -> Vec<f32> {
    let [o, i, kh, kw] = dims;
    let mut out = vec![0.0f32; w.len()];
    for oc in 0..o {
        for ic in 0..i {
            for y in 0..kh {
                for x in 0..kw {
                    out[FilterLayout::Ohwi.offset(dims, oc, ic, y, x)] =
                        w[FilterLayout::Oihw.offset(dims, oc, ic, y, x)];
                }
            }
        }
    }
    out
}
