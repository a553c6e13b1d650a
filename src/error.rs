//! The single error type of the pipeline.
//!
//! Every variant is fatal for the invocation that raised it. Optimizer
//! passes that decline to rewrite a subgraph do not produce errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The converter met an operator tag it has no IR kind for.
    #[error("unsupported operator `{kind}`")]
    UnsupportedOperator { kind: String },

    /// The trace document is structurally broken (unknown ids, bad params).
    #[error("malformed trace: {detail}")]
    MalformedTrace { detail: String },

    /// A graph invariant does not hold. Always a bug in whoever built the graph.
    #[error("invalid graph at {node}: {detail}")]
    InvalidGraph { node: String, detail: String },

    #[error("backend `{backend}` has no lowering for `{kind}` ({operator})")]
    UnsupportedBackendOperator {
        backend: &'static str,
        kind: &'static str,
        operator: String,
    },

    #[error("shape mismatch in {operator}: {detail}")]
    ShapeMismatch { operator: String, detail: String },

    /// An optimizer pass left the graph in an invalid state.
    #[error("optimization pass `{pass}` broke the graph at {node}: {detail}")]
    OptimizationInvariantViolation {
        pass: &'static str,
        node: String,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub(crate) fn invalid(node: impl ToString, detail: impl Into<String>) -> Self {
        GraphError::InvalidGraph {
            node: node.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        GraphError::MalformedTrace {
            detail: detail.into(),
        }
    }

    pub(crate) fn shape(operator: impl ToString, detail: impl Into<String>) -> Self {
        GraphError::ShapeMismatch {
            operator: operator.to_string(),
            detail: detail.into(),
        }
    }

    /// Short machine-friendly name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::UnsupportedOperator { .. } => "UnsupportedOperator",
            GraphError::MalformedTrace { .. } => "MalformedTrace",
            GraphError::InvalidGraph { .. } => "InvalidGraph",
            GraphError::UnsupportedBackendOperator { .. } => "UnsupportedBackendOperator",
            GraphError::ShapeMismatch { .. } => "ShapeMismatch",
            GraphError::OptimizationInvariantViolation { .. } => "OptimizationInvariantViolation",
        }
    }
}
