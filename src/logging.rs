//! Structured logging setup, built on `tracing` + `tracing-subscriber`'s
//! `json`/`env-filter` features: a layered `tracing_subscriber` registry
//! with two JSON-formatted layers split by severity.

use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Holds nothing today, but gives callers a named type to hold onto for
/// the lifetime of the process (and a natural place to add flush-on-exit
/// behavior if a future exporter needs one).
pub struct LoggingHandle;

/// Initializes global JSON logging. INFO/WARN/DEBUG go to stdout, ERROR
/// and above go to stderr. `RUST_LOG` overrides the level implied by
/// `debug`.
pub fn init(debug: bool) -> LoggingHandle {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stdout)
        .with_filter(filter_fn(|metadata| {
            metadata.level() > &tracing::Level::ERROR && metadata.level() <= &tracing::Level::DEBUG
        }));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_filter(filter_fn(|metadata| metadata.level() == &tracing::Level::ERROR));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(stderr_layer)
        .init();

    LoggingHandle
}
