//! Human-readable and Graphviz renderings of a graph.

use std::fmt::Write;

use petgraph::dot::{Config, Dot};

use super::{Graph, VariableId};

/// One line per operator in id order. Constant operands carry a `*`.
pub fn render(graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "graph: {} operators, {} variables",
        graph.operator_count(),
        graph.variable_count()
    );
    let _ = writeln!(out, "inputs: {}", list(graph, graph.inputs()));
    for op in graph.operators() {
        let _ = write!(out, "{} = {}({})", list(graph, &op.outputs), op.kind.name(), list(graph, &op.inputs));
        if let Some(act) = op.kind.fused_activation() {
            let _ = write!(out, " +{}", act.name());
        }
        out.push('\n');
    }
    let _ = writeln!(out, "outputs: {}", list(graph, graph.outputs()));
    out
}

fn list(graph: &Graph, ids: &[VariableId]) -> String {
    ids.iter()
        .map(|&id| {
            let var = graph.variable(id);
            let mark = if var.is_constant() { "*" } else { "" };
            format!("{}{}{:?}", id, mark, var.shape)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Operator dependency graph in Graphviz dot syntax.
pub fn to_dot(graph: &Graph) -> String {
    let deps = graph.dependency_graph();
    format!("{:?}", Dot::with_config(&deps, &[Config::EdgeNoLabel]))
}
