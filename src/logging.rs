//! Logging initialization for the command-line driver.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter, takes precedence
//! - `GRAPH_BUILDER_LOG`: filter used when `RUST_LOG` is unset
//! - `GRAPH_BUILDER_LOG_FORMAT`: `human` (default) or `json`

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "GRAPH_BUILDER_LOG";
const LOG_FORMAT_ENV: &str = "GRAPH_BUILDER_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Filter directive used when neither environment variable is set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|s| LogFormat::parse(&s))
        .unwrap_or_default();
    let filter = env_filter(debug);
    let registry = tracing_subscriber::registry().with(filter);
    let _ = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Human => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };
}
