use std::fmt;

use serde::Serialize;

use super::VariableId;

/// Arena index of an operator. Ascending ids are insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperatorId(pub(crate) u32);

impl OperatorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

// ─── Parameters ───────────────────────────────────────────────────

/// Pointwise nonlinearity, either standalone or fused into a producer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu { slope: f32 },
}

impl Activation {
    pub fn apply(self, v: f32) -> f32 {
        match self {
            Activation::Relu => v.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-v).exp()),
            Activation::Tanh => v.tanh(),
            Activation::LeakyRelu { slope } => {
                if v > 0.0 {
                    v
                } else {
                    v * slope
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::LeakyRelu { .. } => "leaky_relu",
        }
    }
}

/// Spatial padding convention. `Explicit` is the canonical form; the
/// other two are resolved against the input extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Padding {
    Explicit {
        top: usize,
        left: usize,
        bottom: usize,
        right: usize,
    },
    /// `[pad_h, pad_w]` applied on both sides.
    Symmetric([usize; 2]),
    /// Output extent is `ceil(input / stride)`.
    Same,
}

impl Padding {
    pub const NONE: Padding = Padding::Explicit {
        top: 0,
        left: 0,
        bottom: 0,
        right: 0,
    };

    /// Resolve to `[top, left, bottom, right]` for an `[h, w]` input.
    pub fn resolve(self, input_hw: [usize; 2], kernel: [usize; 2], stride: [usize; 2]) -> [usize; 4] {
        match self {
            Padding::Explicit {
                top,
                left,
                bottom,
                right,
            } => [top, left, bottom, right],
            Padding::Symmetric([ph, pw]) => [ph, pw, ph, pw],
            Padding::Same => {
                let mut pads = [0usize; 4];
                for axis in 0..2 {
                    let out = input_hw[axis].div_ceil(stride[axis]);
                    let total = ((out - 1) * stride[axis] + kernel[axis])
                        .saturating_sub(input_hw[axis]);
                    pads[axis] = total / 2;
                    pads[axis + 2] = total - total / 2;
                }
                pads
            }
        }
    }
}

/// Storage order of a convolution filter. `O` output channels, `I` input
/// channels, `H`/`W` kernel extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLayout {
    Oihw,
    Ohwi,
}

impl FilterLayout {
    /// `[out, in, kh, kw]` of a filter shape stored in this layout.
    pub fn dims(self, shape: &[usize]) -> Option<[usize; 4]> {
        if shape.len() != 4 {
            return None;
        }
        Some(match self {
            FilterLayout::Oihw => [shape[0], shape[1], shape[2], shape[3]],
            FilterLayout::Ohwi => [shape[0], shape[3], shape[1], shape[2]],
        })
    }

    /// Flat offset of filter element `(o, i, y, x)`.
    pub fn offset(self, dims: [usize; 4], o: usize, i: usize, y: usize, x: usize) -> usize {
        let [_, ci, kh, kw] = dims;
        match self {
            FilterLayout::Oihw => ((o * ci + i) * kh + y) * kw + x,
            FilterLayout::Ohwi => ((o * kh + y) * kw + x) * ci + i,
        }
    }

    pub fn shape(self, dims: [usize; 4]) -> Vec<usize> {
        let [o, i, kh, kw] = dims;
        match self {
            FilterLayout::Oihw => vec![o, i, kh, kw],
            FilterLayout::Ohwi => vec![o, kh, kw, i],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Conv2DParams {
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub padding: Padding,
    pub filter_layout: FilterLayout,
    pub activation: Option<Activation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    Max,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pool2DParams {
    pub mode: PoolMode,
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub padding: Padding,
    /// Output extent rounds up, covering every input pixel.
    pub ceil_mode: bool,
}

impl Pool2DParams {
    /// Padding `[top, left, bottom, right]` with the ceil-mode extension folded
    /// into bottom/right, so that floor division yields the same extent.
    pub fn effective_padding(&self, input_hw: [usize; 2]) -> [usize; 4] {
        let mut pads = self.padding.resolve(input_hw, self.kernel, self.stride);
        if self.ceil_mode {
            for axis in 0..2 {
                let padded = input_hw[axis] + pads[axis] + pads[axis + 2];
                if padded < self.kernel[axis] {
                    continue;
                }
                let span = padded - self.kernel[axis];
                let remainder = span % self.stride[axis];
                if remainder != 0 {
                    pads[axis + 2] += self.stride[axis] - remainder;
                }
            }
        }
        pads
    }
}

// ─── Operator kinds ───────────────────────────────────────────────

/// Computation kind with its parameter payload.
///
/// Every match over this enum is exhaustive, so a new kind has to be handled
/// by shape checking, evaluation, optimization and both generators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorKind {
    /// Inputs: x `[N,C,H,W]`, filter, optional bias `[O]`.
    Convolution2D(Conv2DParams),
    /// Inputs: x `[N,...]`, weight `[O, I]`, optional bias `[O]`.
    Linear { activation: Option<Activation> },
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu { slope: f32 },
    /// Inputs: x, gamma, beta, mean, var. Channel axis 1.
    BatchNormalization { eps: f32 },
    Pooling2D(Pool2DParams),
    LocalResponseNormalization {
        size: usize,
        k: f32,
        alpha: f32,
        beta: f32,
    },
    Reshape { shape: Vec<usize> },
    /// Two or more inputs of identical shape.
    ElementwiseAdd { activation: Option<Activation> },
    ScalarAffine { scale: f32, bias: f32 },
    /// Inputs: x, scale `[D]`, bias `[D]` with `D = x.shape[axis]`.
    AxiswiseAffine {
        axis: usize,
        activation: Option<Activation>,
    },
    Softmax { axis: usize },
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Convolution2D(_) => "convolution_2d",
            OperatorKind::Linear { .. } => "linear",
            OperatorKind::Relu => "relu",
            OperatorKind::Sigmoid => "sigmoid",
            OperatorKind::Tanh => "tanh",
            OperatorKind::LeakyRelu { .. } => "leaky_relu",
            OperatorKind::BatchNormalization { .. } => "batch_normalization",
            OperatorKind::Pooling2D(p) => match p.mode {
                PoolMode::Max => "max_pooling_2d",
                PoolMode::Average => "average_pooling_2d",
            },
            OperatorKind::LocalResponseNormalization { .. } => "local_response_normalization",
            OperatorKind::Reshape { .. } => "reshape",
            OperatorKind::ElementwiseAdd { .. } => "elementwise_add",
            OperatorKind::ScalarAffine { .. } => "scalar_affine",
            OperatorKind::AxiswiseAffine { .. } => "axiswise_affine",
            OperatorKind::Softmax { .. } => "softmax",
        }
    }

    /// The standalone activation this operator computes, if it is one.
    pub fn as_activation(&self) -> Option<Activation> {
        match self {
            OperatorKind::Relu => Some(Activation::Relu),
            OperatorKind::Sigmoid => Some(Activation::Sigmoid),
            OperatorKind::Tanh => Some(Activation::Tanh),
            OperatorKind::LeakyRelu { slope } => Some(Activation::LeakyRelu { slope: *slope }),
            _ => None,
        }
    }

    /// Slot for a fused activation, for kinds that accept one.
    pub fn activation_slot(&mut self) -> Option<&mut Option<Activation>> {
        match self {
            OperatorKind::Convolution2D(p) => Some(&mut p.activation),
            OperatorKind::Linear { activation }
            | OperatorKind::ElementwiseAdd { activation }
            | OperatorKind::AxiswiseAffine { activation, .. } => Some(activation),
            _ => None,
        }
    }

    pub fn fused_activation(&self) -> Option<Activation> {
        match self {
            OperatorKind::Convolution2D(p) => p.activation,
            OperatorKind::Linear { activation }
            | OperatorKind::ElementwiseAdd { activation }
            | OperatorKind::AxiswiseAffine { activation, .. } => *activation,
            _ => None,
        }
    }
}

/// A computation node.
#[derive(Debug, Clone)]
pub struct Operator {
    pub id: OperatorId,
    pub kind: OperatorKind,
    pub inputs: Vec<VariableId>,
    pub outputs: Vec<VariableId>,
}

impl Operator {
    /// `op3(relu)` style label used in diagnostics.
    pub fn label(&self) -> String {
        format!("{}({})", self.id, self.kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_padding_resolution() {
        // 5x5 input, 3x3 kernel, stride 2 -> out 3, total pad 2
        let pads = Padding::Same.resolve([5, 5], [3, 3], [2, 2]);
        assert_eq!(pads, [1, 1, 1, 1]);
        // 4 wide, kernel 3, stride 2 -> out 2, total pad 1 -> bottom gets the odd pixel
        let pads = Padding::Same.resolve([4, 4], [3, 3], [2, 2]);
        assert_eq!(pads, [0, 0, 1, 1]);
    }

    #[test]
    fn test_ceil_mode_extends_bottom_right() {
        let p = Pool2DParams {
            mode: PoolMode::Max,
            kernel: [2, 2],
            stride: [2, 2],
            padding: Padding::NONE,
            ceil_mode: true,
        };
        assert_eq!(p.effective_padding([5, 4]), [0, 0, 1, 0]);
    }

    #[test]
    fn test_filter_layout_offsets_agree() {
        let dims = [2, 3, 2, 2];
        let oihw = FilterLayout::Oihw;
        let ohwi = FilterLayout::Ohwi;
        assert_eq!(oihw.offset(dims, 1, 2, 1, 0), ((1 * 3 + 2) * 2 + 1) * 2);
        assert_eq!(ohwi.offset(dims, 1, 2, 1, 0), ((1 * 2 + 1) * 2) * 3 + 2);
        assert_eq!(ohwi.dims(&ohwi.shape(dims)), Some(dims));
    }

    #[test]
    fn test_activation_slots() {
        let mut relu = OperatorKind::Relu;
        assert!(relu.activation_slot().is_none());
        assert_eq!(relu.as_activation(), Some(Activation::Relu));

        let mut linear = OperatorKind::Linear { activation: None };
        *linear.activation_slot().unwrap() = Some(Activation::Tanh);
        assert_eq!(linear.fused_activation(), Some(Activation::Tanh));
    }
}
