//! Shared pieces of the HTTP instrumentations
//!
//! - W3C Trace Context propagation over `http::HeaderMap`
//! - `excluded_urls` option handling
//!
//! ## Headers
//!
//! - **traceparent**: `00-{trace-id}-{span-id}-{trace-flags}`
//! - **tracestate**: optional vendor data, `vendor1=value1,vendor2=value2`

use super::InstrumentationError;
use crate::config::DistroConfig;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};
use regex_lite::Regex;
use serde::Deserialize;

/// Reads propagation fields from request headers
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Writes propagation fields into request headers
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Options understood by the HTTP instrumentations.
///
/// ```yaml
/// instrumentation_config:
///   hyper:
///     excluded_urls: "/healthz,^/internal/"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpOptions {
    /// Comma-separated regular expressions matched anywhere in the URL
    #[serde(default)]
    pub excluded_urls: Option<String>,
}

impl HttpOptions {
    /// Read the options of `library` from the distro config
    pub fn from_config(library: &str, config: &DistroConfig) -> Result<Self, InstrumentationError> {
        match config.instrumentation_options(library) {
            None => Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                InstrumentationError::Activation {
                    name: library.to_string(),
                    reason: format!("invalid options: {}", e),
                }
            }),
        }
    }
}

/// URLs that must not be traced
#[derive(Debug, Clone, Default)]
pub struct ExcludedUrls {
    patterns: Vec<Regex>,
}

impl ExcludedUrls {
    /// Compile a comma-separated pattern list; blank entries are ignored
    pub fn parse(library: &str, list: &str) -> Result<Self, InstrumentationError> {
        let patterns = list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).map_err(|e| InstrumentationError::Activation {
                    name: library.to_string(),
                    reason: format!("invalid excluded_urls pattern '{}': {}", p, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn from_options(library: &str, options: &HttpOptions) -> Result<Self, InstrumentationError> {
        match options.excluded_urls {
            Some(ref list) => Self::parse(library, list),
            None => Ok(Self::default()),
        }
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
