//! Tracing subscriber setup with layered architecture
//!
//! The global subscriber combines:
//! - **Fmt layer**: console output, filtered by `RUST_LOG` (default `info`)
//! - **OpenTelemetry layer**: spans to the tracer provider (tracing enabled)
//! - **Log bridge**: events to the logger provider (logging enabled)
//!
//! ```text
//! Registry
//!   ├── OpenTelemetry Layer  (filter: everything but exporter internals)
//!   ├── Log Bridge Layer     (filter: logger_name at logging_level)
//!   └── Fmt Layer            (filter: RUST_LOG, text or JSON)
//! ```
//!
//! Every layer carries its own filter, so the bridge level is independent of
//! what the console shows.

use super::{BoxedLayer, SetupError};
use crate::config::ConsoleFormat;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_subscriber::filter::{filter_fn, FilterFn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Targets the OTLP export path itself emits on. Feeding them back into the
/// pipelines would export the exporter.
pub const EXPORTER_TARGETS: &[&str] = &[
    "opentelemetry",
    "opentelemetry_sdk",
    "opentelemetry_otlp",
    "tonic",
    "h2",
    "hyper",
    "hyper_util",
    "tower",
];

/// Whether `target` is `module` or one of its submodules.
///
/// `checkout` covers `checkout::payment` but not `checkoutservice`.
pub fn within_module(target: &str, module: &str) -> bool {
    match target.strip_prefix(module) {
        Some(rest) => rest.is_empty() || rest.starts_with("::"),
        None => false,
    }
}

/// Whether `target` belongs to the export path
pub fn is_exporter_target(target: &str) -> bool {
    EXPORTER_TARGETS
        .iter()
        .any(|module| within_module(target, module))
}

/// Whether the log bridge forwards an event.
///
/// A named logger receives its own target and children at `level`. The root
/// logger (empty name) receives every target except the exporter's own.
pub fn bridge_enabled(
    logger_name: &str,
    level: LevelFilter,
    target: &str,
    event: &Level,
) -> bool {
    if *event > level {
        return false;
    }
    if logger_name.is_empty() {
        !is_exporter_target(target)
    } else {
        within_module(target, logger_name)
    }
}

/// Filter for the log bridge, see [`bridge_enabled`]
pub fn bridge_filter(
    logger_name: &str,
    level: LevelFilter,
) -> FilterFn<impl Fn(&Metadata<'_>) -> bool + Send + Sync + 'static> {
    let logger_name = logger_name.to_string();
    filter_fn(move |meta: &Metadata<'_>| {
        bridge_enabled(&logger_name, level, meta.target(), meta.level())
    })
}

/// Filter for the span layer: everything but the exporter's own spans
pub fn telemetry_filter() -> FilterFn<impl Fn(&Metadata<'_>) -> bool + Send + Sync + 'static> {
    filter_fn(|meta: &Metadata<'_>| !is_exporter_target(meta.target()))
}

/// Console layer on stdout honouring `RUST_LOG`
pub fn console_layer(format: ConsoleFormat) -> BoxedLayer {
    console_layer_with_writer(format, std::io::stdout)
}

/// Console layer writing to `writer`
pub fn console_layer_with_writer<W>(format: ConsoleFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    match format {
        ConsoleFormat::Text => layer.with_filter(env_filter).boxed(),
        ConsoleFormat::Json => layer.json().with_filter(env_filter).boxed(),
    }
}

/// Install the global subscriber with the console layer plus `layers`
pub fn init_subscriber(
    format: ConsoleFormat,
    mut layers: Vec<BoxedLayer>,
) -> Result<(), SetupError> {
    layers.push(console_layer(format));

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| {
            SetupError::SubscriberError(format!(
                "Failed to set global subscriber (may already be initialized): {}",
                e
            ))
        })
}
