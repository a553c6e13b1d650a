pub mod api;
pub mod backend;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod eval;
pub mod frontend;
pub mod gpu;
pub mod ir;
pub mod logging;
pub mod optimize;

// Re-exports: the types a caller needs to run a build
pub use backend::{create_generator, Artifacts, Descriptor, DescriptorGenerator, WeightBuffer};
pub use config::{Backend, PipelineOptions};
pub use diagnostic::{CollectingSink, DiagnosticSink, NullSink, TracingSink};
pub use error::{GraphError, Result};
pub use frontend::{GraphConverter, GraphTrace};
pub use ir::{Graph, GraphBuilder};
pub use optimize::{Optimizer, OptimizerOptions, PASS_NAMES};

// Re-export public API: `graph_builder::build()` etc.
pub use api::*;
