//! Initialization status file
//!
//! On hosted environments the platform tooling reads a small JSON file to
//! find out whether the distro came up. One file per process:
//!
//! ```text
//! <status dir>/status_<hostname>_<pid>.json
//! ```
//!
//! The file is rewritten on every call; nothing is appended or rotated.

use crate::config::{ConnectionString, CONNECTION_STRING_ENV};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Set by App Service; turns diagnostics on
pub const SITE_NAME_ENV: &str = "WEBSITE_SITE_NAME";

/// Version of the hosting extension, when installed through one
pub const EXTENSION_VERSION_ENV: &str = "ApplicationInsightsAgent_EXTENSION_VERSION";

const UNKNOWN: &str = "unknown";
const APP_TYPE: &str = "rust";

/// Errors raised while writing the status file
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Failed to create status directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write status file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize status record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Contents of a status file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "AgentInitializedSuccessfully")]
    pub agent_initialized_successfully: bool,
    #[serde(rename = "AppType")]
    pub app_type: String,
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    #[serde(rename = "PID")]
    pub pid: u32,
    #[serde(rename = "SdkVersion")]
    pub sdk_version: String,
    #[serde(rename = "Ikey")]
    pub ikey: String,
    #[serde(rename = "ExtensionVersion")]
    pub extension_version: String,
    #[serde(rename = "Reason", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Where and whether status files are written
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsSettings {
    pub enabled: bool,
    pub status_log_dir: Option<PathBuf>,
    pub ikey: String,
    pub extension_version: String,
    pub machine_name: String,
}

impl DiagnosticsSettings {
    /// Settings for writing into `dir`, with host details filled in
    pub fn enabled_in<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            enabled: true,
            status_log_dir: Some(dir.into()),
            ikey: UNKNOWN.to_string(),
            extension_version: UNKNOWN.to_string(),
            machine_name: hostname(),
        }
    }

    /// Settings read from the hosting environment
    pub fn from_env() -> Self {
        let ikey = std::env::var(CONNECTION_STRING_ENV)
            .ok()
            .and_then(|s| s.parse::<ConnectionString>().ok())
            .and_then(|cs| cs.instrumentation_key)
            .unwrap_or_else(|| UNKNOWN.to_string());

        Self {
            enabled: std::env::var_os(SITE_NAME_ENV).is_some(),
            status_log_dir: default_status_dir(),
            ikey,
            extension_version: std::env::var(EXTENSION_VERSION_ENV)
                .unwrap_or_else(|_| UNKNOWN.to_string()),
            machine_name: hostname(),
        }
    }
}

#[cfg(windows)]
fn default_status_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join("LogFiles")
            .join("ApplicationInsights")
            .join("status")
    })
}

#[cfg(not(windows))]
fn default_status_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/var/log/applicationinsights/status"))
}

/// Writes status files according to [`DiagnosticsSettings`]
#[derive(Debug, Clone)]
pub struct StatusReporter {
    settings: DiagnosticsSettings,
}

impl StatusReporter {
    pub fn new(settings: DiagnosticsSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(DiagnosticsSettings::from_env())
    }

    pub fn settings(&self) -> &DiagnosticsSettings {
        &self.settings
    }

    /// Record for the current process
    pub fn record(&self, success: bool, reason: Option<&str>) -> StatusRecord {
        StatusRecord {
            agent_initialized_successfully: success,
            app_type: APP_TYPE.to_string(),
            machine_name: self.settings.machine_name.clone(),
            pid: std::process::id(),
            sdk_version: crate::VERSION.to_string(),
            ikey: self.settings.ikey.clone(),
            extension_version: self.settings.extension_version.clone(),
            reason: reason.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }

    /// Path of this process's status file inside `dir`
    pub fn file_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!(
            "status_{}_{}.json",
            self.settings.machine_name,
            std::process::id()
        ))
    }

    /// Write the status file.
    ///
    /// Returns `Ok(None)` without touching the filesystem when diagnostics
    /// are disabled or no directory is configured.
    pub fn log_status(
        &self,
        success: bool,
        reason: Option<&str>,
    ) -> Result<Option<PathBuf>, StatusError> {
        let dir = match (self.settings.enabled, &self.settings.status_log_dir) {
            (true, Some(dir)) => dir,
            _ => {
                debug!("Diagnostics disabled, no status file written");
                return Ok(None);
            }
        };

        let json = serde_json::to_string(&self.record(success, reason))?;

        std::fs::create_dir_all(dir).map_err(|source| StatusError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let path = self.file_path(dir);
        std::fs::write(&path, json).map_err(|source| StatusError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), success, "Status file written");
        Ok(Some(path))
    }
}

/// Name of this machine, `unknown` when it cannot be determined
pub fn hostname() -> String {
    host_name().unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(unix)]
fn host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes for the duration of the call
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn host_name() -> Option<String> {
    std::env::var("COMPUTERNAME").ok().filter(|n| !n.is_empty())
}
