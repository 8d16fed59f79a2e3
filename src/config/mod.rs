//! Configuration module for the distro
//!
//! A single flat [`DistroConfig`] carries every recognized option. It can be
//! built in code or loaded from a YAML file with support for environment
//! variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod connection_string;
mod loader;

pub use connection_string::{ConnectionString, DEFAULT_INGESTION_ENDPOINT};
pub use loader::{ConfigLoader, CONNECTION_STRING_ENV};

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Deserialize an optional string, expanding environment variables.
fn deserialize_opt_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| expand_env_vars(&s)))
}

/// Deserialize a string, expanding environment variables.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Distro configuration.
///
/// Every field is optional in the file; see the `default_*` functions for
/// the values used when a key is absent.
///
/// # Example
///
/// ```yaml
/// connection_string: "InstrumentationKey=${IKEY};IngestionEndpoint=http://collector:4317"
/// service_name: "checkout"
/// service_namespace: "shop"
/// sampling_ratio: 0.25
/// disable_metrics: true
/// logging_level: "warn"
/// logger_name: "checkout"
/// instrumentations: ["hyper", "reqwest"]
/// instrumentation_config:
///   hyper:
///     excluded_urls: "/healthz,/metrics"
/// console_format: "json"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistroConfig {
    /// `InstrumentationKey=...;IngestionEndpoint=...`
    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub connection_string: Option<String>,

    #[serde(default)]
    pub disable_tracing: bool,

    #[serde(default)]
    pub disable_logging: bool,

    #[serde(default)]
    pub disable_metrics: bool,

    /// Delay between batch span exports. Default: 5000
    #[serde(default = "default_tracing_export_interval")]
    pub tracing_export_interval_millis: u64,

    /// Delay between batch log exports. Default: 5000
    #[serde(default = "default_logging_export_interval")]
    pub logging_export_interval_millis: u64,

    /// Interval of the periodic metric reader. Default: 60000
    #[serde(default = "default_metrics_export_interval")]
    pub metrics_export_interval_millis: u64,

    /// Minimum level forwarded by the log bridge. Default: "info"
    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    /// Target prefix the log bridge is bound to. Empty means every target.
    #[serde(default, deserialize_with = "deserialize_with_env")]
    pub logger_name: String,

    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub service_name: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub service_namespace: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub service_instance_id: Option<String>,

    /// Fraction of traces kept (0.0 to 1.0). Default: 1.0
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,

    /// Libraries to auto-instrument
    #[serde(default)]
    pub instrumentations: Vec<String>,

    /// Per-library instrumentation options, keyed by library name
    #[serde(default)]
    pub instrumentation_config: HashMap<String, serde_json::Value>,

    /// Console output format. Default: "text"
    #[serde(default)]
    pub console_format: ConsoleFormat,
}

/// Output format of the console layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    #[default]
    Text,
    Json,
}

impl Default for DistroConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            disable_tracing: false,
            disable_logging: false,
            disable_metrics: false,
            tracing_export_interval_millis: default_tracing_export_interval(),
            logging_export_interval_millis: default_logging_export_interval(),
            metrics_export_interval_millis: default_metrics_export_interval(),
            logging_level: default_logging_level(),
            logger_name: String::new(),
            service_name: None,
            service_namespace: None,
            service_instance_id: None,
            sampling_ratio: default_sampling_ratio(),
            instrumentations: Vec::new(),
            instrumentation_config: HashMap::new(),
            console_format: ConsoleFormat::default(),
        }
    }
}

impl DistroConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sampling_ratio) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sampling ratio {}: must be between 0.0 and 1.0",
                self.sampling_ratio
            )));
        }

        for (key, value) in [
            ("tracing_export_interval_millis", self.tracing_export_interval_millis),
            ("logging_export_interval_millis", self.logging_export_interval_millis),
            ("metrics_export_interval_millis", self.metrics_export_interval_millis),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }

        self.log_level_filter()?;

        if let Some(ref name) = self.service_name {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Service name cannot be empty when set".into(),
                ));
            }
        }

        self.parsed_connection_string()?;

        Ok(())
    }

    /// Parse `logging_level` into a level filter
    pub fn log_level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.logging_level.trim().parse::<LevelFilter>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "Invalid logging level '{}': must be one of trace, debug, info, warn, error, off",
                self.logging_level
            ))
        })
    }

    /// Parse the connection string, if one is configured
    pub fn parsed_connection_string(&self) -> Result<Option<ConnectionString>, ConfigError> {
        self.connection_string
            .as_deref()
            .map(str::parse::<ConnectionString>)
            .transpose()
    }

    /// OTLP endpoint the exporters send to
    pub fn ingestion_endpoint(&self) -> Result<String, ConfigError> {
        Ok(self
            .parsed_connection_string()?
            .and_then(|cs| cs.ingestion_endpoint)
            .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string()))
    }

    /// Options for a single instrumented library
    pub fn instrumentation_options(&self, library: &str) -> Option<&serde_json::Value> {
        self.instrumentation_config.get(library)
    }
}

fn default_tracing_export_interval() -> u64 {
    5000
}

fn default_logging_export_interval() -> u64 {
    5000
}

fn default_metrics_export_interval() -> u64 {
    60000
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}
