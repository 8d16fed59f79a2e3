//! reqwest client instrumentation
//!
//! Propagates the current trace context to outgoing requests so downstream
//! services join the same trace.
//!
//! ```no_run
//! use otel_distro::instrumentation::reqwest_client::ReqwestInstrumentor;
//!
//! # async fn call(telemetry: &otel_distro::Telemetry) -> Result<(), reqwest::Error> {
//! let client = reqwest::Client::new();
//! let mut request = client.get("http://inventory:8080/items").build()?;
//! if let Some(reqwest) = telemetry.instrumentor::<ReqwestInstrumentor>() {
//!     reqwest.inject(&mut request);
//! }
//! client.execute(request).await?;
//! # Ok(())
//! # }
//! ```

use super::http_common::{ExcludedUrls, HeaderInjector, HttpOptions};
use super::{InstrumentationError, Instrumentor};
use crate::config::DistroConfig;
use opentelemetry::global;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::any::Any;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const NAME: &str = "reqwest";
const TRACEPARENT: &str = "traceparent";

/// Client-side instrumentation for `reqwest` requests
#[derive(Debug)]
pub struct ReqwestInstrumentor {
    propagator: TraceContextPropagator,
    excluded: ExcludedUrls,
    active: bool,
}

impl ReqwestInstrumentor {
    pub fn new() -> Self {
        Self {
            propagator: TraceContextPropagator::new(),
            excluded: ExcludedUrls::default(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Inject the context of the current `tracing` span
    pub fn inject(&self, request: &mut ::reqwest::Request) -> bool {
        let cx = tracing::Span::current().context();
        self.inject_context(&cx, request)
    }

    /// Inject `cx` into the request headers.
    ///
    /// Returns whether a `traceparent` header was written. Nothing is written
    /// before activation, for excluded URLs, or when `cx` has no valid span.
    pub fn inject_context(&self, cx: &Context, request: &mut ::reqwest::Request) -> bool {
        if !self.active || self.excluded.is_excluded(request.url().as_str()) {
            return false;
        }

        self.propagator
            .inject_context(cx, &mut HeaderInjector(request.headers_mut()));
        request.headers().contains_key(TRACEPARENT)
    }
}

impl Default for ReqwestInstrumentor {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrumentor for ReqwestInstrumentor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn instrument(&mut self, config: &DistroConfig) -> Result<(), InstrumentationError> {
        let options = HttpOptions::from_config(NAME, config)?;
        self.excluded = ExcludedUrls::from_options(NAME, &options)?;

        global::set_text_map_propagator(TraceContextPropagator::new());
        self.active = true;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
