//! Pipeline configuration.

use std::fmt;

use serde::Serialize;

use crate::optimize::OptimizerOptions;

/// Target backend of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Webgpu,
    Fallback,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Webgpu, Backend::Fallback];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Webgpu => "webgpu",
            Backend::Fallback => "fallback",
        }
    }

    /// Whether the backend writes a kernel source file.
    pub fn emits_source(self) -> bool {
        matches!(self, Backend::Webgpu)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub backend: Backend,
    /// Run the optimizer between conversion and generation.
    pub optimize: bool,
    /// Report graph snapshots to the diagnostic sink.
    pub debug: bool,
    pub optimizer: OptimizerOptions,
    /// Invocations per WebGPU workgroup, clamped to `1..=256`.
    pub workgroup_size: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            optimize: false,
            debug: false,
            optimizer: OptimizerOptions::default(),
            workgroup_size: 64,
        }
    }
}

impl PipelineOptions {
    pub fn for_backend(backend: Backend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    pub fn optimized(mut self) -> Self {
        self.optimize = true;
        self
    }
}
