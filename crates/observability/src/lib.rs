// crates/observability/src/lib.rs
//! Logging setup shared by the NVR binaries.
//!
//! Console output is compact text by default or JSON lines on request. An
//! optional log directory adds a daily-rolling file sink written through a
//! non-blocking appender; the returned [`WorkerGuard`] must be kept alive
//! for as long as the process logs.

use std::path::PathBuf;

use anyhow::Context;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,nvr_server=info,nvr_server_jobs=info";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Also write `<file_prefix>.<date>` files here, rotated daily.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            json: false,
            log_dir: None,
            file_prefix: "nvr-server.log".to_string(),
        }
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let console_text = (!config.json).then(|| fmt::layer().compact().with_target(true));
    let console_json = config.json.then(|| fmt::layer().json().with_current_span(false));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.default_filter))
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

/// Request/response tracing for the HTTP router.
pub fn http_trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
