//! Library entry points: trace in, artifacts out.

pub mod pipeline;


pub use pipeline::{build, convert_and_optimize, write_artifacts, ArtifactPaths};
