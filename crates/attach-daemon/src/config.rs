//! Daemon configuration.
//!
//! TOML configuration with every field defaulted, so an absent file or
//! an empty one yields a working daemon.
//!
//! ```toml
//! log_filter = "info"
//! max_sessions = 16
//!
//! [management]
//! local_address = "svc:attach://127.0.0.1:9010"
//!
//! [diagnostics]
//! enabled = true
//!
//! [agent_properties]
//! "vendor.name" = "example"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use attach_core::PropertyBundle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Tracing filter directive, overridable on the command line.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Maximum number of concurrently live sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Management endpoint configuration.
    #[serde(default)]
    pub management: ManagementConfig,

    /// Diagnostic command configuration.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Seed entries for the agent property bundle.
    #[serde(default)]
    pub agent_properties: BTreeMap<String, String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            max_sessions: default_max_sessions(),
            management: ManagementConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            agent_properties: BTreeMap::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// The agent property bundle seeded from this configuration.
    #[must_use]
    pub fn seed_properties(&self) -> PropertyBundle {
        self.agent_properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Management endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManagementConfig {
    /// Address of the in-process local management endpoint. Absent means
    /// management is unavailable.
    #[serde(default)]
    pub local_address: Option<String>,
}

/// Diagnostic command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Whether diagnostic commands may execute.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

const fn default_max_sessions() -> usize {
    16
}

const fn default_true() -> bool {
    true
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
