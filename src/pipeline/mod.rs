//! Telemetry pipeline orchestration
//!
//! Turns a [`DistroConfig`] into installed OpenTelemetry pipelines.
//!
//! # Setup order
//!
//! ```text
//! DistroConfig
//!   ├── ResourceDescriptor (service name / namespace / instance id)
//!   ├── Tracing  (sampler + provider + OTLP exporter + batch processor)
//!   ├── Logging  (provider + OTLP exporter + batch processor + log bridge)
//!   ├── Metrics  (meter provider + OTLP exporter + periodic reader)
//!   ├── Subscriber (fmt layer + layers contributed by the pipelines)
//!   └── Instrumentations (best effort, never fails setup)
//! ```
//!
//! Each signal can be disabled on its own. Construction goes through the
//! [`TelemetrySdk`] trait so the orchestration can be exercised without
//! touching process-wide state.
//!
//! # Example
//!
//! ```no_run
//! use otel_distro::config::DistroConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DistroConfig {
//!     service_name: Some("checkout".to_string()),
//!     disable_metrics: true,
//!     ..Default::default()
//! };
//!
//! let telemetry = otel_distro::configure(&config)?;
//! tracing::info!("telemetry is live");
//! telemetry.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod otel;
pub mod resource;
pub mod sampling;
pub mod subscriber;

pub use otel::{ExporterFactory, OpenTelemetrySdk, OtlpExporters};
pub use resource::ResourceDescriptor;
pub use sampling::ApplicationInsightsSampler;

use crate::config::{ConfigError, ConfigLoader, DistroConfig};
use crate::instrumentation::{InstrumentationLoader, InstrumentationReport, Instrumentor};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{Layer, Registry};

/// Layer a pipeline contributes to the global subscriber
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Errors that can occur while installing pipelines
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to initialize OTLP exporter: {0}")]
    ExporterError(String),

    #[error("Failed to initialize provider: {0}")]
    ProviderError(String),

    #[error("Failed to install subscriber: {0}")]
    SubscriberError(String),

    #[error("Failed to shut down {signal} pipeline: {reason}")]
    ShutdownError { signal: Signal, reason: String },
}

/// Telemetry signal kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Traces,
    Logs,
    Metrics,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Traces => write!(f, "traces"),
            Signal::Logs => write!(f, "logs"),
            Signal::Metrics => write!(f, "metrics"),
        }
    }
}

/// An installed pipeline for one signal
pub trait PipelineHandle: Send + Sync {
    fn signal(&self) -> Signal;

    /// Hand over the subscriber layer, if the pipeline feeds on `tracing` data.
    /// Called once, right after installation.
    fn take_layer(&mut self) -> Option<BoxedLayer> {
        None
    }

    /// Export everything buffered so far
    fn force_flush(&self) -> Result<(), SetupError>;

    /// Flush and release the pipeline. Later signals are dropped.
    fn shutdown(&self) -> Result<(), SetupError>;
}

/// Construction seam between the orchestrator and a telemetry SDK
pub trait TelemetrySdk {
    /// Build the sampler, tracer provider, exporter and batch processor,
    /// and register the provider as the active one
    fn install_tracing(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError>;

    /// Build the logger provider, exporter, batch processor and the bridge
    /// bound to `config.logger_name` at `config.logging_level`
    fn install_logging(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError>;

    /// Build the meter provider, exporter and periodic reader
    fn install_metrics(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError>;

    /// Install the process-wide `tracing` subscriber with the given layers
    fn install_subscriber(
        &self,
        config: &DistroConfig,
        layers: Vec<BoxedLayer>,
    ) -> Result<(), SetupError>;
}

/// Handle to the configured telemetry.
///
/// Holds the installed pipelines and the activated instrumentors. Dropping
/// it flushes and shuts down every pipeline; use [`Telemetry::shutdown`] to
/// observe failures.
pub struct Telemetry {
    config: DistroConfig,
    resource: ResourceDescriptor,
    pipelines: Vec<Box<dyn PipelineHandle>>,
    instrumentors: Vec<Box<dyn Instrumentor>>,
    report: InstrumentationReport,
    active: bool,
}

impl Telemetry {
    /// Configuration the telemetry was built from
    pub fn config(&self) -> &DistroConfig {
        &self.config
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    /// Signals with an installed pipeline, in installation order
    pub fn signals(&self) -> Vec<Signal> {
        self.pipelines.iter().map(|p| p.signal()).collect()
    }

    pub fn is_enabled(&self, signal: Signal) -> bool {
        self.pipelines.iter().any(|p| p.signal() == signal)
    }

    /// What happened to each requested instrumentation
    pub fn instrumentation_report(&self) -> &InstrumentationReport {
        &self.report
    }

    /// Look up an activated instrumentor by its concrete type
    pub fn instrumentor<T: Instrumentor>(&self) -> Option<&T> {
        self.instrumentors
            .iter()
            .find_map(|i| i.as_any().downcast_ref::<T>())
    }

    /// Force-flush every pipeline, stopping at the first failure
    pub fn force_flush(&self) -> Result<(), SetupError> {
        for pipeline in &self.pipelines {
            pipeline.force_flush()?;
        }
        Ok(())
    }

    /// Flush and shut down every pipeline.
    ///
    /// All pipelines are shut down even if one fails; the first error is
    /// returned.
    pub fn shutdown(mut self) -> Result<(), SetupError> {
        self.active = false;
        let mut first_error = None;
        for pipeline in &self.pipelines {
            if let Err(e) = pipeline.force_flush().and_then(|_| pipeline.shutdown()) {
                warn!(signal = %pipeline.signal(), error = %e, "Pipeline shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("resource", &self.resource)
            .field("signals", &self.signals())
            .field("instrumentations", &self.report)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if self.active {
            for pipeline in &self.pipelines {
                let _ = pipeline.force_flush();
                let _ = pipeline.shutdown();
            }
        }
    }
}

/// Configure telemetry through `sdk` with the built-in instrumentations
pub fn configure_with(
    config: &DistroConfig,
    sdk: &dyn TelemetrySdk,
) -> Result<Telemetry, SetupError> {
    configure_with_loader(config, sdk, &InstrumentationLoader::default())
}

/// Configure telemetry through `sdk`, activating instrumentations with `loader`.
///
/// A missing connection string is taken from the environment, as when the
/// configuration is loaded from a file. When a step fails, the pipelines
/// installed before it are shut down again.
pub fn configure_with_loader(
    config: &DistroConfig,
    sdk: &dyn TelemetrySdk,
    loader: &InstrumentationLoader<'_>,
) -> Result<Telemetry, SetupError> {
    let mut config = config.clone();
    ConfigLoader::apply_env_fallbacks(&mut config);
    config.validate()?;

    let resource = ResourceDescriptor::from_config(&config);
    let mut pipelines = match install_pipelines(sdk, &resource, &config) {
        Ok(pipelines) => pipelines,
        Err((installed, e)) => return Err(unwind(installed, e)),
    };

    let layers = pipelines
        .iter_mut()
        .filter_map(|pipeline| pipeline.take_layer())
        .collect();
    if let Err(e) = sdk.install_subscriber(&config, layers) {
        return Err(unwind(pipelines, e));
    }

    let signals: Vec<String> = pipelines.iter().map(|p| p.signal().to_string()).collect();
    info!(
        service.name = %resource.service_name,
        signals = ?signals,
        sampling_ratio = config.sampling_ratio,
        "Telemetry pipelines installed"
    );

    let loaded = loader.load(&config);

    Ok(Telemetry {
        config,
        resource,
        pipelines,
        instrumentors: loaded.instrumentors,
        report: loaded.report,
        active: true,
    })
}

type Installed = Vec<Box<dyn PipelineHandle>>;

fn install_pipelines(
    sdk: &dyn TelemetrySdk,
    resource: &ResourceDescriptor,
    config: &DistroConfig,
) -> Result<Installed, (Installed, SetupError)> {
    let mut pipelines: Installed = Vec::new();

    let steps: [(bool, Signal); 3] = [
        (config.disable_tracing, Signal::Traces),
        (config.disable_logging, Signal::Logs),
        (config.disable_metrics, Signal::Metrics),
    ];
    for (disabled, signal) in steps {
        if disabled {
            continue;
        }
        let installed = match signal {
            Signal::Traces => sdk.install_tracing(resource, config),
            Signal::Logs => sdk.install_logging(resource, config),
            Signal::Metrics => sdk.install_metrics(resource, config),
        };
        match installed {
            Ok(pipeline) => pipelines.push(pipeline),
            Err(e) => return Err((pipelines, e)),
        }
    }

    Ok(pipelines)
}

/// Shut down `pipelines` after a failed setup and hand back the cause
fn unwind(pipelines: Installed, cause: SetupError) -> SetupError {
    for pipeline in pipelines.iter().rev() {
        if let Err(e) = pipeline.shutdown() {
            warn!(signal = %pipeline.signal(), error = %e, "Pipeline shutdown after failed setup");
        }
    }
    cause
}
