//! OpenTelemetry Distro Library
//!
//! One call turns a flat configuration into running telemetry pipelines.
//!
//! # Features
//!
//! - **Traces**: OTLP span export with ratio-based, trace-id-deterministic sampling
//! - **Logs**: `tracing` events bridged to the OpenTelemetry logs pipeline
//! - **Metrics**: OTLP metric export on a periodic reader
//! - **Auto-instrumentation**: best-effort activation of `hyper` and `reqwest`
//! - **Status file**: a JSON record of whether initialization succeeded
//!
//! # Example
//!
//! ```no_run
//! use otel_distro::{config::DistroConfig, status::StatusReporter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DistroConfig::load("otel.yaml")?;
//!     let telemetry = otel_distro::configure(&config)?;
//!     StatusReporter::from_env().log_status(true, None)?;
//!
//!     tracing::info!("service started");
//!
//!     telemetry.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod instrumentation;
pub mod pipeline;
pub mod status;

// Re-export commonly used types
pub use config::DistroConfig;
pub use pipeline::{
    configure_with, configure_with_loader, OpenTelemetrySdk, SetupError, Signal, Telemetry,
    TelemetrySdk,
};
pub use status::{StatusError, StatusReporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configure traces, logs and metrics with the OpenTelemetry SDK.
///
/// Must be called from within a Tokio runtime, either flavor; outside of one
/// it fails with [`SetupError::ProviderError`].
pub fn configure(config: &DistroConfig) -> Result<Telemetry, SetupError> {
    configure_with(config, &OpenTelemetrySdk::new())
}
