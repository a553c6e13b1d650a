//! Debug introspection of pipeline stages.
//!
//! Stages report graph snapshots to a sink handed to them explicitly, so
//! concurrent pipeline runs never share debug state.

use tracing::debug;

use crate::ir::{dump, Graph};

pub trait DiagnosticSink {
    /// Whether the sink wants full graph snapshots. Rendering a dump is not
    /// free, so stages skip it when this is false.
    fn wants_snapshots(&self) -> bool {
        false
    }

    fn snapshot(&mut self, stage: &str, graph: &Graph);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn snapshot(&mut self, _stage: &str, _graph: &Graph) {}
}

/// Emits every snapshot as a `debug` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn wants_snapshots(&self) -> bool {
        true
    }

    fn snapshot(&mut self, stage: &str, graph: &Graph) {
        debug!(stage, "graph snapshot\n{}", dump::render(graph));
    }
}

/// Keeps `(stage, dump)` pairs in arrival order.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    pub snapshots: Vec<(String, String)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> Vec<&str> {
        self.snapshots.iter().map(|(s, _)| s.as_str()).collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn wants_snapshots(&self) -> bool {
        true
    }

    fn snapshot(&mut self, stage: &str, graph: &Graph) {
        self.snapshots.push((stage.to_string(), dump::render(graph)));
    }
}
