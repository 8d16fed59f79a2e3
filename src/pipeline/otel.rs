//! OpenTelemetry SDK backed pipelines
//!
//! By default every signal is exported over OTLP/gRPC to the ingestion
//! endpoint of the connection string; [`ExporterFactory`] swaps the exporters
//! while keeping the rest of the wiring.
//!
//! Batch processors and the periodic metric reader run on the Tokio runtime
//! that is current at install time, so installation must happen inside one.
//! On a current-thread runtime the background work moves to a dedicated
//! thread, otherwise flushing from the runtime thread would block forever.

use super::sampling::ApplicationInsightsSampler;
use super::subscriber::{bridge_filter, init_subscriber, telemetry_filter};
use super::{BoxedLayer, PipelineHandle, ResourceDescriptor, SetupError, Signal, TelemetrySdk};
use crate::config::DistroConfig;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::logs::LogExporter;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::logs::{self as sdk_logs, BatchLogProcessor, LoggerProvider};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime::{self, Runtime, RuntimeChannel};
use opentelemetry_sdk::trace::{self as sdk_trace, BatchSpanProcessor, TracerProvider};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;
use tracing_subscriber::Layer;

/// Instrumentation scope of the tracer handed to `tracing-opentelemetry`
pub const INSTRUMENTATION_SCOPE: &str = "otel-distro";

/// Builds the exporter behind each pipeline
pub trait ExporterFactory {
    type Spans: SpanExporter + 'static;
    type Logs: LogExporter + 'static;
    type Metrics: PushMetricExporter;

    fn span_exporter(&self, config: &DistroConfig) -> Result<Self::Spans, SetupError>;

    fn log_exporter(&self, config: &DistroConfig) -> Result<Self::Logs, SetupError>;

    fn metric_exporter(&self, config: &DistroConfig) -> Result<Self::Metrics, SetupError>;
}

/// OTLP/gRPC exporters pointed at [`DistroConfig::ingestion_endpoint`]
#[derive(Debug, Default, Clone, Copy)]
pub struct OtlpExporters;

impl ExporterFactory for OtlpExporters {
    type Spans = opentelemetry_otlp::SpanExporter;
    type Logs = opentelemetry_otlp::LogExporter;
    type Metrics = opentelemetry_otlp::MetricExporter;

    fn span_exporter(&self, config: &DistroConfig) -> Result<Self::Spans, SetupError> {
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.ingestion_endpoint()?)
            .build()
            .map_err(|e| SetupError::ExporterError(e.to_string()))
    }

    fn log_exporter(&self, config: &DistroConfig) -> Result<Self::Logs, SetupError> {
        opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(config.ingestion_endpoint()?)
            .build()
            .map_err(|e| SetupError::ExporterError(e.to_string()))
    }

    fn metric_exporter(&self, config: &DistroConfig) -> Result<Self::Metrics, SetupError> {
        opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(config.ingestion_endpoint()?)
            .build()
            .map_err(|e| SetupError::ExporterError(e.to_string()))
    }
}

/// Production [`TelemetrySdk`] built on `opentelemetry_sdk`
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenTelemetrySdk<X = OtlpExporters> {
    exporters: X,
}

impl OpenTelemetrySdk {
    /// SDK exporting over OTLP
    pub fn new() -> Self {
        Self::default()
    }
}

impl<X: ExporterFactory> OpenTelemetrySdk<X> {
    /// SDK exporting through `exporters`
    pub fn with_exporters(exporters: X) -> Self {
        Self { exporters }
    }
}

/// Flavor of the Tokio runtime the background work is spawned on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackgroundRuntime {
    MultiThread,
    CurrentThread,
}

fn background_runtime() -> Result<BackgroundRuntime, SetupError> {
    let handle = Handle::try_current().map_err(|_| {
        SetupError::ProviderError(
            "pipelines must be installed from within a Tokio runtime".to_string(),
        )
    })?;
    Ok(match handle.runtime_flavor() {
        RuntimeFlavor::CurrentThread => BackgroundRuntime::CurrentThread,
        _ => BackgroundRuntime::MultiThread,
    })
}

fn span_processor<E, R>(exporter: E, runtime: R, delay: Duration) -> BatchSpanProcessor<R>
where
    E: SpanExporter + 'static,
    R: RuntimeChannel,
{
    let batch_config = sdk_trace::BatchConfigBuilder::default()
        .with_scheduled_delay(delay)
        .build();
    BatchSpanProcessor::builder(exporter, runtime)
        .with_batch_config(batch_config)
        .build()
}

fn log_processor<E, R>(exporter: E, runtime: R, delay: Duration) -> BatchLogProcessor<R>
where
    E: LogExporter + 'static,
    R: RuntimeChannel,
{
    let batch_config = sdk_logs::BatchConfigBuilder::default()
        .with_scheduled_delay(delay)
        .build();
    BatchLogProcessor::builder(exporter, runtime)
        .with_batch_config(batch_config)
        .build()
}

fn metric_reader<E, R>(exporter: E, runtime: R, interval: Duration) -> PeriodicReader
where
    E: PushMetricExporter,
    R: Runtime,
{
    PeriodicReader::builder(exporter, runtime)
        .with_interval(interval)
        .build()
}

struct TracingPipeline {
    provider: TracerProvider,
    layer: Option<BoxedLayer>,
}

impl PipelineHandle for TracingPipeline {
    fn signal(&self) -> Signal {
        Signal::Traces
    }

    fn take_layer(&mut self) -> Option<BoxedLayer> {
        self.layer.take()
    }

    fn force_flush(&self) -> Result<(), SetupError> {
        for result in self.provider.force_flush() {
            result.map_err(|e| SetupError::ProviderError(e.to_string()))?;
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), SetupError> {
        self.provider
            .shutdown()
            .map_err(|e| SetupError::ShutdownError {
                signal: Signal::Traces,
                reason: e.to_string(),
            })
    }
}

struct LoggingPipeline {
    provider: LoggerProvider,
    layer: Option<BoxedLayer>,
}

impl PipelineHandle for LoggingPipeline {
    fn signal(&self) -> Signal {
        Signal::Logs
    }

    fn take_layer(&mut self) -> Option<BoxedLayer> {
        self.layer.take()
    }

    fn force_flush(&self) -> Result<(), SetupError> {
        for result in self.provider.force_flush() {
            result.map_err(|e| SetupError::ProviderError(e.to_string()))?;
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), SetupError> {
        self.provider
            .shutdown()
            .map_err(|e| SetupError::ShutdownError {
                signal: Signal::Logs,
                reason: e.to_string(),
            })
    }
}

struct MetricsPipeline {
    provider: SdkMeterProvider,
}

impl PipelineHandle for MetricsPipeline {
    fn signal(&self) -> Signal {
        Signal::Metrics
    }

    fn force_flush(&self) -> Result<(), SetupError> {
        self.provider
            .force_flush()
            .map_err(|e| SetupError::ProviderError(e.to_string()))
    }

    fn shutdown(&self) -> Result<(), SetupError> {
        self.provider
            .shutdown()
            .map_err(|e| SetupError::ShutdownError {
                signal: Signal::Metrics,
                reason: e.to_string(),
            })
    }
}

impl<X: ExporterFactory> TelemetrySdk for OpenTelemetrySdk<X> {
    fn install_tracing(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError> {
        let background = background_runtime()?;
        let exporter = self.exporters.span_exporter(config)?;
        let delay = Duration::from_millis(config.tracing_export_interval_millis);

        let builder = TracerProvider::builder()
            .with_sampler(ApplicationInsightsSampler::new(config.sampling_ratio))
            .with_resource(resource.to_resource());
        let provider = match background {
            BackgroundRuntime::CurrentThread => builder
                .with_span_processor(span_processor(exporter, runtime::TokioCurrentThread, delay)),
            BackgroundRuntime::MultiThread => {
                builder.with_span_processor(span_processor(exporter, runtime::Tokio, delay))
            }
        }
        .build();

        global::set_tracer_provider(provider.clone());

        let tracer = provider.tracer(INSTRUMENTATION_SCOPE);
        let layer: BoxedLayer = tracing_opentelemetry::layer()
            .with_tracer(tracer)
            .with_filter(telemetry_filter())
            .boxed();

        debug!(
            runtime = ?background,
            interval_ms = config.tracing_export_interval_millis,
            sampling_ratio = config.sampling_ratio,
            "Tracing pipeline installed"
        );

        Ok(Box::new(TracingPipeline {
            provider,
            layer: Some(layer),
        }))
    }

    fn install_logging(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError> {
        let background = background_runtime()?;
        let level = config.log_level_filter()?;
        let exporter = self.exporters.log_exporter(config)?;
        let delay = Duration::from_millis(config.logging_export_interval_millis);

        let builder = LoggerProvider::builder().with_resource(resource.to_resource());
        let provider = match background {
            BackgroundRuntime::CurrentThread => builder
                .with_log_processor(log_processor(exporter, runtime::TokioCurrentThread, delay)),
            BackgroundRuntime::MultiThread => {
                builder.with_log_processor(log_processor(exporter, runtime::Tokio, delay))
            }
        }
        .build();

        let layer: BoxedLayer = OpenTelemetryTracingBridge::new(&provider)
            .with_filter(bridge_filter(&config.logger_name, level))
            .boxed();

        debug!(
            runtime = ?background,
            logger = %config.logger_name,
            level = %level,
            "Logging pipeline installed"
        );

        Ok(Box::new(LoggingPipeline {
            provider,
            layer: Some(layer),
        }))
    }

    fn install_metrics(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError> {
        let background = background_runtime()?;
        let exporter = self.exporters.metric_exporter(config)?;
        let interval = Duration::from_millis(config.metrics_export_interval_millis);

        let reader = match background {
            BackgroundRuntime::CurrentThread => {
                metric_reader(exporter, runtime::TokioCurrentThread, interval)
            }
            BackgroundRuntime::MultiThread => metric_reader(exporter, runtime::Tokio, interval),
        };

        let provider = SdkMeterProvider::builder()
            .with_resource(resource.to_resource())
            .with_reader(reader)
            .build();

        global::set_meter_provider(provider.clone());

        debug!(
            runtime = ?background,
            interval_ms = config.metrics_export_interval_millis,
            "Metrics pipeline installed"
        );

        Ok(Box::new(MetricsPipeline { provider }))
    }

    fn install_subscriber(
        &self,
        config: &DistroConfig,
        layers: Vec<BoxedLayer>,
    ) -> Result<(), SetupError> {
        init_subscriber(config.console_format, layers)
    }
}
