use super::{constant_data, schedule, OptimizePass, PassResult};
use crate::error::Result;
use crate::eval::kernels::oihw_to_ohwi;
use crate::ir::{FilterLayout, Graph, OperatorKind, Padding};

/// Canonical parameter conventions: explicit padding, no ceil-mode pooling,
/// `Ohwi` conv filters.
pub struct NormalizeLayout;

impl OptimizePass for NormalizeLayout {
    fn name(&self) -> &'static str {
        "normalize_layout"
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let mut result = PassResult::default();
        for id in schedule(graph)? {
            let op = graph.operator(id);
            let input_hw = match graph.variable(op.inputs[0]).shape.as_slice() {
                [_, _, h, w] => [*h, *w],
                _ => continue,
            };
            match op.kind.clone() {
                OperatorKind::Convolution2D(mut p) => {
                    let mut touched = false;
                    if !matches!(p.padding, Padding::Explicit { .. }) {
                        p.padding = explicit(p.padding.resolve(input_hw, p.kernel, p.stride));
                        touched = true;
                    }
                    let filter = op.inputs[1];
                    if p.filter_layout == FilterLayout::Oihw
                        && graph.single_use_consumer(filter) == Some(id)
                    {
                        let reordered = match (
                            constant_data(graph, filter),
                            FilterLayout::Oihw.dims(&graph.variable(filter).shape),
                        ) {
                            (Some(data), Some(dims)) => Some((oihw_to_ohwi(data, dims), dims)),
                            _ => None,
                        };
                        if let Some((data, dims)) = reordered {
                            let name = graph.derived_name(filter, "ohwi");
                            let ohwi =
                                graph.add_constant(name, FilterLayout::Ohwi.shape(dims), data)?;
                            graph.replace_input(id, filter, ohwi)?;
                            p.filter_layout = FilterLayout::Ohwi;
                            touched = true;
                        }
                    }
                    if touched {
                        graph.set_operator_kind(id, OperatorKind::Convolution2D(p))?;
                        result.rewrite(0);
                    }
                }
                OperatorKind::Pooling2D(mut p) => {
                    if p.ceil_mode || !matches!(p.padding, Padding::Explicit { .. }) {
                        p.padding = explicit(p.effective_padding(input_hw));
                        p.ceil_mode = false;
                        graph.set_operator_kind(id, OperatorKind::Pooling2D(p))?;
                        result.rewrite(0);
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

fn explicit([top, left, bottom, right]: [usize; 4]) -> Padding {
    Padding::Explicit {
        top,
        left,
        bottom,
        right,
    }
}
