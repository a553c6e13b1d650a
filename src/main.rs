use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use tracing::{info, warn};

use graph_builder::diagnostic::{DiagnosticSink, NullSink, TracingSink};
use graph_builder::{
    api, create_generator, gpu, ir, logging, Backend, GraphTrace, OptimizerOptions,
    PipelineOptions, PASS_NAMES,
};

#[derive(Parser)]
#[command(
    name = "graph-builder",
    version,
    about = "Compile a neural-network graph trace into a backend descriptor and weight buffer"
)]
struct Cli {
    /// Graph trace (JSON)
    trace: PathBuf,
    /// Target backend
    #[arg(long, value_enum, default_value_t = Backend::Webgpu)]
    backend: Backend,
    /// Run the graph optimizer before generation
    #[arg(long)]
    optimize: bool,
    /// Output directory for the artifacts
    #[arg(short, long, value_name = "DIR", default_value = "output")]
    out_dir: PathBuf,
    /// Log graph snapshots after every stage
    #[arg(long)]
    debug: bool,
    /// Write the final graph in Graphviz dot syntax
    #[arg(long, value_name = "PATH")]
    dump_dot: Option<PathBuf>,
    /// Skip an optimizer pass (repeatable)
    #[arg(long, value_name = "NAME", value_parser = PossibleValuesParser::new(PASS_NAMES))]
    disable_pass: Vec<String>,
    /// Invocations per WebGPU workgroup
    #[arg(long, value_name = "N", default_value_t = 64,
          value_parser = clap::value_parser!(u32).range(1..=256))]
    workgroup_size: u32,
    /// Compile the generated WGSL on a GPU device, if one is available
    #[arg(long)]
    validate: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&cli.trace)
        .with_context(|| format!("cannot read trace '{}'", cli.trace.display()))?;
    let trace = GraphTrace::from_json(&text)?;

    let options = PipelineOptions {
        backend: cli.backend,
        optimize: cli.optimize,
        debug: cli.debug,
        optimizer: OptimizerOptions {
            disabled_passes: cli.disable_pass,
            ..OptimizerOptions::default()
        },
        workgroup_size: cli.workgroup_size,
    };
    let mut sink: Box<dyn DiagnosticSink> = if options.debug {
        Box::new(TracingSink)
    } else {
        Box::new(NullSink)
    };

    let graph = api::convert_and_optimize(&trace, &options, sink.as_mut())?;
    if let Some(path) = &cli.dump_dot {
        std::fs::write(path, ir::dump::to_dot(&graph))
            .with_context(|| format!("cannot write '{}'", path.display()))?;
    }
    if sink.wants_snapshots() {
        sink.snapshot("before generation", &graph);
    }
    let artifacts = create_generator(options.backend, &options).generate(&graph)?;

    if cli.validate {
        validate(&artifacts)?;
    }

    let paths = api::write_artifacts(&artifacts, &cli.out_dir)
        .with_context(|| format!("cannot write artifacts to '{}'", cli.out_dir.display()))?;
    for path in paths.all() {
        info!(path = %path.display(), "wrote");
    }
    eprintln!(
        "Built {} kernels for {} ({} weight bytes) into {}",
        artifacts.descriptor.kernel_count(),
        artifacts.backend(),
        artifacts.weights.byte_len(),
        cli.out_dir.display()
    );
    Ok(())
}

fn validate(artifacts: &graph_builder::Artifacts) -> anyhow::Result<()> {
    let Some(source) = artifacts.descriptor.kernel_source() else {
        return Ok(());
    };
    let Some((device, _queue)) = gpu::try_create_device() else {
        warn!("no GPU adapter available, skipping WGSL validation");
        return Ok(());
    };
    if let Err(message) = gpu::validate_wgsl(&device, &source) {
        bail!("generated WGSL failed validation: {}", message);
    }
    info!("WGSL module validated");
    Ok(())
}
