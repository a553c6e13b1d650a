//! Converter → optimizer → generator, and artifact files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::backend::{create_generator, Artifacts};
use crate::config::PipelineOptions;
use crate::diagnostic::DiagnosticSink;
use crate::error::Result;
use crate::frontend::{GraphConverter, GraphTrace};
use crate::ir::Graph;
use crate::optimize::Optimizer;

/// Convert a trace and, when enabled, optimize the result.
pub fn convert_and_optimize(
    trace: &GraphTrace,
    options: &PipelineOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<Graph> {
    let graph = GraphConverter::new().convert(trace)?;
    info!(
        operators = graph.operator_count(),
        variables = graph.variable_count(),
        "trace converted"
    );
    if sink.wants_snapshots() {
        sink.snapshot("converted", &graph);
    }
    if !options.optimize {
        return Ok(graph);
    }
    let graph = Optimizer::new(options.optimizer.clone()).optimize(graph, sink)?;
    info!(
        operators = graph.operator_count(),
        variables = graph.variable_count(),
        "graph optimized"
    );
    Ok(graph)
}

/// Run the whole pipeline for `options.backend`.
pub fn build(
    trace: &GraphTrace,
    options: &PipelineOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<Artifacts> {
    let graph = convert_and_optimize(trace, options, sink)?;
    if sink.wants_snapshots() {
        sink.snapshot("before generation", &graph);
    }
    let artifacts = create_generator(options.backend, options).generate(&graph)?;
    info!(
        backend = artifacts.backend(),
        kernels = artifacts.descriptor.kernel_count(),
        weight_bytes = artifacts.weights.byte_len(),
        "descriptor generated"
    );
    Ok(artifacts)
}

/// Files written for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub descriptor: PathBuf,
    pub weights: PathBuf,
    pub kernels: Option<PathBuf>,
}

impl ArtifactPaths {
    pub fn all(&self) -> Vec<&Path> {
        let mut paths = vec![self.descriptor.as_path(), self.weights.as_path()];
        paths.extend(self.kernels.as_deref());
        paths
    }
}

/// Write `graph_<backend>.json`, `weight_<backend>.bin` and, for backends
/// with kernel source, `kernels_<backend>.wgsl` into `dir`.
pub fn write_artifacts(artifacts: &Artifacts, dir: &Path) -> io::Result<ArtifactPaths> {
    fs::create_dir_all(dir)?;
    let backend = artifacts.backend();

    let descriptor = dir.join(format!("graph_{backend}.json"));
    fs::write(&descriptor, artifacts.descriptor.to_json())?;

    let weights = dir.join(format!("weight_{backend}.bin"));
    fs::write(&weights, artifacts.weights.as_bytes())?;

    let kernels = match artifacts.descriptor.kernel_source() {
        Some(source) => {
            let path = dir.join(format!("kernels_{backend}.wgsl"));
            fs::write(&path, source)?;
            Some(path)
        }
        None => None,
    };

    Ok(ArtifactPaths {
        descriptor,
        weights,
        kernels,
    })
}
