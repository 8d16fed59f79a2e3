//! hyper server instrumentation
//!
//! Creates one server span per incoming request, following the
//! [OpenTelemetry Semantic Conventions for HTTP](https://opentelemetry.io/docs/specs/semconv/http/),
//! with its parent taken from the request's W3C Trace Context headers.
//!
//! | Attribute | Example |
//! |-----------|---------|
//! | `http.request.method` | `PUT` |
//! | `url.path` | `/orders/42` |
//! | `url.scheme` | `http` |
//! | `server.address` | `localhost:8080` |
//! | `user_agent.original` | `curl/8.0` |
//!
//! # Example
//!
//! ```no_run
//! use otel_distro::instrumentation::hyper_server::HyperInstrumentor;
//!
//! # fn handle(telemetry: &otel_distro::Telemetry, req: hyper::Request<()>) {
//! if let Some(hyper) = telemetry.instrumentor::<HyperInstrumentor>() {
//!     if let Some(span) = hyper.request_span(&req) {
//!         let _entered = span.enter();
//!         // handle the request
//!     }
//! }
//! # }
//! ```

use super::http_common::{ExcludedUrls, HeaderExtractor, HttpOptions};
use super::{InstrumentationError, Instrumentor};
use crate::config::DistroConfig;
use opentelemetry::global;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::any::Any;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const NAME: &str = "hyper";

/// Server-side instrumentation for `hyper` requests
#[derive(Debug)]
pub struct HyperInstrumentor {
    propagator: TraceContextPropagator,
    excluded: ExcludedUrls,
    active: bool,
}

impl HyperInstrumentor {
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

    pub fn is_excluded(&self, url: &str) -> bool {
        self.excluded.is_excluded(url)
    }

    /// Remote parent carried by the request headers
    pub fn parent_context<B>(&self, request: &::hyper::Request<B>) -> Context {
        self.propagator
            .extract(&HeaderExtractor(request.headers()))
    }

    /// Server span for `request`.
    ///
    /// `None` before activation and for excluded URLs.
    pub fn request_span<B>(&self, request: &::hyper::Request<B>) -> Option<Span> {
        if !self.active {
            return None;
        }

        let uri = request.uri();
        if self.is_excluded(&uri.to_string()) {
            return None;
        }

        let header = |name: ::hyper::header::HeaderName| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        let host = uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| header(::hyper::header::HOST));

        let span = tracing::info_span!(
            "http.request",
            otel.kind = "server",
            http.request.method = %request.method(),
            url.path = %uri.path(),
            url.scheme = uri.scheme_str().unwrap_or("http"),
            server.address = %host,
            user_agent.original = %header(::hyper::header::USER_AGENT),
            http.response.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        );
        span.set_parent(self.parent_context(request));

        Some(span)
    }
}

impl Default for HyperInstrumentor {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrumentor for HyperInstrumentor {
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

/// Record the response status on a span created by [`HyperInstrumentor::request_span`]
pub fn record_status(span: &Span, status: ::hyper::StatusCode) {
    span.record("http.response.status_code", status.as_u16());
    if status.is_server_error() {
        span.record("otel.status_code", "ERROR");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;

    fn request(uri: &str) -> ::hyper::Request<()> {
        ::hyper::Request::builder()
            .method("GET")
            .uri(uri)
            .header(
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )
            .body(())
            .unwrap()
    }

    fn activated(excluded_urls: Option<&str>) -> HyperInstrumentor {
        let mut config = DistroConfig::default();
        if let Some(list) = excluded_urls {
            config
                .instrumentation_config
                .insert(NAME.to_string(), serde_json::json!({ "excluded_urls": list }));
        }
        let mut instrumentor = HyperInstrumentor::new();
        instrumentor.instrument(&config).unwrap();
        instrumentor
    }

    #[test]
    fn test_no_span_before_instrument() {
        let instrumentor = HyperInstrumentor::new();
        assert!(!instrumentor.is_active());
        assert!(instrumentor.request_span(&request("/orders")).is_none());
    }

    #[test]
    fn test_span_for_included_url() {
        let instrumentor = activated(Some("/healthz"));
        assert!(instrumentor.request_span(&request("/orders")).is_some());
        assert!(instrumentor.request_span(&request("/healthz")).is_none());
    }

    #[test]
    fn test_parent_context_from_traceparent() {
        let instrumentor = activated(None);
        let cx = instrumentor.parent_context(&request("/orders"));
        let span_context = cx.span().span_context().clone();

        assert!(span_context.is_remote());
        assert_eq!(
            span_context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert_eq!(span_context.span_id().to_string(), "b7ad6b7169203331");
        assert!(span_context.is_sampled());
    }

    #[test]
    fn test_bad_exclusion_pattern_fails_activation() {
        let mut config = DistroConfig::default();
        config
            .instrumentation_config
            .insert(NAME.to_string(), serde_json::json!({ "excluded_urls": "([" }));

        let mut instrumentor = HyperInstrumentor::new();
        assert!(instrumentor.instrument(&config).is_err());
        assert!(!instrumentor.is_active());
    }
}
