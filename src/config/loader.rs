//! Configuration loader with environment variable expansion

use super::{expand_env_vars, ConfigError, DistroConfig};
use std::path::Path;

/// Environment variable consulted when no connection string is configured
pub const CONNECTION_STRING_ENV: &str = "APPLICATIONINSIGHTS_CONNECTION_STRING";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DistroConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse, apply environment fallbacks and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<DistroConfig, ConfigError> {
        let expanded = expand_env_vars(content);
        let mut config: DistroConfig = serde_yaml::from_str(&expanded)?;
        Self::apply_env_fallbacks(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Fill options the file left unset from the environment
    pub fn apply_env_fallbacks(config: &mut DistroConfig) {
        if config.connection_string.is_none() {
            if let Ok(value) = std::env::var(CONNECTION_STRING_ENV) {
                if !value.trim().is_empty() {
                    config.connection_string = Some(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_connection_string_from_env() {
        std::env::set_var(CONNECTION_STRING_ENV, "InstrumentationKey=from-env");
        let config = ConfigLoader::from_yaml("service_name: \"svc\"\n").unwrap();
        assert_eq!(
            config.connection_string.as_deref(),
            Some("InstrumentationKey=from-env")
        );
        std::env::remove_var(CONNECTION_STRING_ENV);
    }

    #[test]
    #[serial_test::serial]
    fn test_file_connection_string_wins_over_env() {
        std::env::set_var(CONNECTION_STRING_ENV, "InstrumentationKey=from-env");
        let config =
            ConfigLoader::from_yaml("connection_string: \"InstrumentationKey=from-file\"\n")
                .unwrap();
        assert_eq!(
            config.connection_string.as_deref(),
            Some("InstrumentationKey=from-file")
        );
        std::env::remove_var(CONNECTION_STRING_ENV);
    }
}
