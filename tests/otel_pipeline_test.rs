//! Tests for the OpenTelemetry SDK backed pipelines
//!
//! Most tests swap the OTLP exporters for the SDK's in-memory ones and read
//! back what the pipelines exported. Layers are installed with a scoped
//! subscriber; only `test_real_pipelines_install_once` sets the global one,
//! which can happen once per process.

use opentelemetry::logs::Severity;
use opentelemetry::Value;
use opentelemetry_sdk::testing::logs::InMemoryLogExporter;
use opentelemetry_sdk::testing::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use otel_distro::config::DistroConfig;
use otel_distro::pipeline::sampling::SAMPLE_RATE_ATTRIBUTE;
use otel_distro::pipeline::{
    BoxedLayer, ExporterFactory, OpenTelemetrySdk, PipelineHandle, ResourceDescriptor,
};
use otel_distro::{configure, configure_with, SetupError, Signal, TelemetrySdk};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Clone, Default)]
struct MemoryExporters {
    spans: InMemorySpanExporter,
    logs: InMemoryLogExporter,
    metrics: InMemoryMetricExporter,
}

impl ExporterFactory for MemoryExporters {
    type Spans = InMemorySpanExporter;
    type Logs = InMemoryLogExporter;
    type Metrics = InMemoryMetricExporter;

    fn span_exporter(&self, _config: &DistroConfig) -> Result<Self::Spans, SetupError> {
        Ok(self.spans.clone())
    }

    fn log_exporter(&self, _config: &DistroConfig) -> Result<Self::Logs, SetupError> {
        Ok(self.logs.clone())
    }

    fn metric_exporter(&self, _config: &DistroConfig) -> Result<Self::Metrics, SetupError> {
        Ok(self.metrics.clone())
    }
}

/// Real pipelines without the global subscriber
struct DetachedSdk(OpenTelemetrySdk<MemoryExporters>);

impl TelemetrySdk for DetachedSdk {
    fn install_tracing(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError> {
        self.0.install_tracing(resource, config)
    }

    fn install_logging(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError> {
        self.0.install_logging(resource, config)
    }

    fn install_metrics(
        &self,
        resource: &ResourceDescriptor,
        config: &DistroConfig,
    ) -> Result<Box<dyn PipelineHandle>, SetupError> {
        self.0.install_metrics(resource, config)
    }

    fn install_subscriber(
        &self,
        _config: &DistroConfig,
        _layers: Vec<BoxedLayer>,
    ) -> Result<(), SetupError> {
        Ok(())
    }
}

fn base_config() -> DistroConfig {
    DistroConfig {
        service_name: Some("pipeline-test".to_string()),
        ..Default::default()
    }
}

fn tracing_pipeline(
    exporters: &MemoryExporters,
    config: &DistroConfig,
) -> (Box<dyn PipelineHandle>, BoxedLayer) {
    let sdk = OpenTelemetrySdk::with_exporters(exporters.clone());
    let mut pipeline = sdk
        .install_tracing(&ResourceDescriptor::from_config(config), config)
        .unwrap();
    let layer = pipeline.take_layer().unwrap();
    (pipeline, layer)
}

fn logging_pipeline(
    exporters: &MemoryExporters,
    config: &DistroConfig,
) -> (Box<dyn PipelineHandle>, BoxedLayer) {
    let sdk = OpenTelemetrySdk::with_exporters(exporters.clone());
    let mut pipeline = sdk
        .install_logging(&ResourceDescriptor::from_config(config), config)
        .unwrap();
    let layer = pipeline.take_layer().unwrap();
    (pipeline, layer)
}

fn emit_spans(layer: BoxedLayer, count: usize) {
    tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
        for _ in 0..count {
            tracing::info_span!("GET /orders").in_scope(|| {});
        }
    });
}

fn sample_rate(span: &opentelemetry_sdk::export::trace::SpanData) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == SAMPLE_RATE_ATTRIBUTE)
        .map(|kv| kv.value.clone())
}

// ----------------------------------------------------------------------------
// Runtime handling
// ----------------------------------------------------------------------------

#[test]
fn test_configure_outside_runtime_is_an_error() {
    let result = configure(&base_config());
    assert!(matches!(result, Err(SetupError::ProviderError(_))));
}

#[test]
fn test_install_outside_runtime_is_an_error() {
    let config = base_config();
    let sdk = OpenTelemetrySdk::with_exporters(MemoryExporters::default());
    let resource = ResourceDescriptor::from_config(&config);

    assert!(matches!(
        sdk.install_tracing(&resource, &config),
        Err(SetupError::ProviderError(_))
    ));
    assert!(matches!(
        sdk.install_logging(&resource, &config),
        Err(SetupError::ProviderError(_))
    ));
    assert!(matches!(
        sdk.install_metrics(&resource, &config),
        Err(SetupError::ProviderError(_))
    ));
}

#[tokio::test]
async fn test_current_thread_shutdown_completes() {
    let sdk = DetachedSdk(OpenTelemetrySdk::with_exporters(MemoryExporters::default()));
    let telemetry = configure_with(&base_config(), &sdk).unwrap();

    assert_eq!(
        telemetry.signals(),
        vec![Signal::Traces, Signal::Logs, Signal::Metrics]
    );
    telemetry.shutdown().unwrap();
}

#[tokio::test]
async fn test_current_thread_drop_completes() {
    let sdk = DetachedSdk(OpenTelemetrySdk::with_exporters(MemoryExporters::default()));
    let telemetry = configure_with(&base_config(), &sdk).unwrap();

    telemetry.force_flush().unwrap();
    drop(telemetry);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_multi_thread_shutdown_completes() {
    let sdk = DetachedSdk(OpenTelemetrySdk::with_exporters(MemoryExporters::default()));
    let telemetry = configure_with(&base_config(), &sdk).unwrap();

    telemetry.shutdown().unwrap();
}

// ----------------------------------------------------------------------------
// Tracing: sampler and export interval
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_sampled_spans_carry_sample_rate() {
    let exporters = MemoryExporters::default();
    let (pipeline, layer) = tracing_pipeline(&exporters, &base_config());

    emit_spans(layer, 3);
    pipeline.force_flush().unwrap();

    let spans = exporters.spans.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 3);
    assert!(spans
        .iter()
        .all(|s| sample_rate(s) == Some(Value::F64(100.0))));
    assert_eq!(spans[0].name, "GET /orders");

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_zero_ratio_exports_no_spans() {
    let exporters = MemoryExporters::default();
    let config = DistroConfig {
        sampling_ratio: 0.0,
        ..base_config()
    };
    let (pipeline, layer) = tracing_pipeline(&exporters, &config);

    emit_spans(layer, 50);
    pipeline.force_flush().unwrap();

    assert!(exporters.spans.get_finished_spans().unwrap().is_empty());
    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_partial_ratio_keeps_some_spans() {
    let exporters = MemoryExporters::default();
    let config = DistroConfig {
        sampling_ratio: 0.5,
        ..base_config()
    };
    let (pipeline, layer) = tracing_pipeline(&exporters, &config);

    emit_spans(layer, 200);
    pipeline.force_flush().unwrap();

    let spans = exporters.spans.get_finished_spans().unwrap();
    assert!(!spans.is_empty() && spans.len() < 200, "kept {}", spans.len());
    assert!(spans.iter().all(|s| sample_rate(s) == Some(Value::F64(50.0))));
    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_short_export_interval_exports_without_flush() {
    let exporters = MemoryExporters::default();
    let config = DistroConfig {
        tracing_export_interval_millis: 50,
        ..base_config()
    };
    let (pipeline, layer) = tracing_pipeline(&exporters, &config);

    emit_spans(layer, 1);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(exporters.spans.get_finished_spans().unwrap().len(), 1);
    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_long_export_interval_holds_spans_until_flush() {
    let exporters = MemoryExporters::default();
    let config = DistroConfig {
        tracing_export_interval_millis: 60_000,
        ..base_config()
    };
    let (pipeline, layer) = tracing_pipeline(&exporters, &config);

    emit_spans(layer, 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(exporters.spans.get_finished_spans().unwrap().is_empty());

    pipeline.force_flush().unwrap();
    assert_eq!(exporters.spans.get_finished_spans().unwrap().len(), 1);
    pipeline.shutdown().unwrap();
}

// ----------------------------------------------------------------------------
// Logging: bridge filter
// ----------------------------------------------------------------------------

fn emitted_targets(exporters: &MemoryExporters) -> Vec<(String, Option<Severity>)> {
    exporters
        .logs
        .get_emitted_logs()
        .unwrap()
        .into_iter()
        .map(|log| {
            (
                log.record.target.map(|t| t.to_string()).unwrap_or_default(),
                log.record.severity_number,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_named_logger_bridges_only_its_targets() {
    let exporters = MemoryExporters::default();
    let config = DistroConfig {
        logger_name: "checkout".to_string(),
        logging_level: "warn".to_string(),
        ..base_config()
    };
    let (pipeline, layer) = logging_pipeline(&exporters, &config);

    tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
        tracing::warn!(target: "checkout", "payment declined");
        tracing::info!(target: "checkout", "cart viewed");
        tracing::error!(target: "checkout::payment", "card rejected");
        tracing::error!(target: "checkoutservice", "sibling service");
        tracing::error!(target: "inventory", "out of stock");
    });
    pipeline.force_flush().unwrap();

    assert_eq!(
        emitted_targets(&exporters),
        vec![
            ("checkout".to_string(), Some(Severity::Warn)),
            ("checkout::payment".to_string(), Some(Severity::Error)),
        ]
    );
    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_root_logger_bridges_all_but_exporter() {
    let exporters = MemoryExporters::default();
    let config = DistroConfig {
        logging_level: "info".to_string(),
        ..base_config()
    };
    let (pipeline, layer) = logging_pipeline(&exporters, &config);

    tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
        tracing::info!(target: "my_app", "started");
        tracing::debug!(target: "my_app", "verbose");
        tracing::error!(target: "tonic::transport", "connection refused");
        tracing::warn!(target: "opentelemetry_sdk", "queue full");
    });
    pipeline.force_flush().unwrap();

    assert_eq!(
        emitted_targets(&exporters),
        vec![("my_app".to_string(), Some(Severity::Info))]
    );
    pipeline.shutdown().unwrap();
}

// ----------------------------------------------------------------------------
// OTLP exporters and the global subscriber
// ----------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_real_pipelines_install_once() {
    let config = DistroConfig {
        connection_string: Some(
            "InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=http://127.0.0.1:4317"
                .to_string(),
        ),
        disable_metrics: true,
        sampling_ratio: 0.5,
        ..base_config()
    };

    let telemetry = configure(&config).unwrap();

    assert_eq!(telemetry.signals(), vec![Signal::Traces, Signal::Logs]);
    assert_eq!(telemetry.resource().service_name, "pipeline-test");

    let second = configure(&config);
    assert!(matches!(second, Err(SetupError::SubscriberError(_))));

    drop(telemetry);
}
