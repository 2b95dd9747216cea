//! Tracing subscriber setup.

use super::config::{LogFormat, TracingConfig};
use anyhow::{Context, Result};
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install a global subscriber for `config`.
///
/// Fails if a global subscriber is already set. Invalid filter directives
/// fall back to `info`.
///
/// ```no_run
/// use phibridge_host::observability::{TracingConfig, init_tracing};
///
/// init_tracing(&TracingConfig::from_env())?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt_layer(config).with_filter(filter))
        .try_init()
        .context("Failed to initialize tracing subscriber")
}

fn fmt_layer(config: &TracingConfig) -> BoxedLayer {
    let layer = fmt::layer()
        .with_file(config.include_location())
        .with_line_number(config.include_location())
        .with_target(config.include_target())
        .with_thread_ids(config.include_thread_ids());

    match config.log_format() {
        LogFormat::Json => layer
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}
