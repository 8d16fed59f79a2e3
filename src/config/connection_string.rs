//! Connection string parsing
//!
//! Format: `InstrumentationKey=<ikey>;IngestionEndpoint=<url>`. Keys are
//! case-insensitive, unknown keys are ignored and empty segments (a trailing
//! `;`) are allowed.

use super::ConfigError;
use std::str::FromStr;

/// Endpoint used when the connection string does not name one
pub const DEFAULT_INGESTION_ENDPOINT: &str = "http://localhost:4317";

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    pub instrumentation_key: Option<String>,
    pub ingestion_endpoint: Option<String>,
}

impl FromStr for ConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parsed = ConnectionString::default();

        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Invalid connection string segment '{}': expected Key=Value",
                    segment
                ))
            })?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" if !value.is_empty() => {
                    parsed.instrumentation_key = Some(value.to_string());
                }
                "ingestionendpoint" if !value.is_empty() => {
                    if !value.starts_with("http://") && !value.starts_with("https://") {
                        return Err(ConfigError::ValidationError(format!(
                            "Invalid IngestionEndpoint '{}': must start with http:// or https://",
                            value
                        )));
                    }
                    parsed.ingestion_endpoint = Some(value.trim_end_matches('/').to_string());
                }
                _ => {}
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_connection_string() {
        let cs: ConnectionString =
            "InstrumentationKey=1234-abcd;IngestionEndpoint=https://collector.example:4317/"
                .parse()
                .unwrap();
        assert_eq!(cs.instrumentation_key.as_deref(), Some("1234-abcd"));
        assert_eq!(
            cs.ingestion_endpoint.as_deref(),
            Some("https://collector.example:4317")
        );
    }

    #[test]
    fn test_keys_are_case_insensitive_and_unknown_ignored() {
        let cs: ConnectionString = "instrumentationkey=abc;EndpointSuffix=example.com;"
            .parse()
            .unwrap();
        assert_eq!(cs.instrumentation_key.as_deref(), Some("abc"));
        assert_eq!(cs.ingestion_endpoint, None);
    }

    #[test]
    fn test_segment_without_equals_is_rejected() {
        let result = "InstrumentationKey=abc;garbage".parse::<ConnectionString>();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("garbage"));
    }

    #[test]
    fn test_non_http_endpoint_is_rejected() {
        let result = "IngestionEndpoint=grpc://collector:4317".parse::<ConnectionString>();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_string_parses_to_nothing() {
        let cs: ConnectionString = "".parse().unwrap();
        assert_eq!(cs, ConnectionString::default());
    }
}
