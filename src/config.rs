//! TOML settings for the relay and Computer processes.
//!
//! Values are taken as written; placeholders inside server parameters are
//! expected to be resolved before the file is read.

use crate::downstream::domain::DownstreamServerConfig;
use crate::registry::services::ManagerOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("cannot read settings from {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// The content is not valid settings TOML.
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two servers share a name.
    #[error("server '{0}' is configured more than once")]
    DuplicateServer(String),
}

/// Log output switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `"info,smcp::relay=debug"`.
    pub filter: String,
    /// Emit span enter and exit events.
    pub span_events: bool,
    /// Include file and line in log lines.
    pub file_line: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            span_events: false,
            file_line: false,
        }
    }
}

/// Settings of the relay process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Address the TCP listener binds.
    pub bind: String,
    /// Deadline for forwarded `get_tools` and `get_config` requests.
    pub default_rpc_timeout_ms: u64,
    /// Logging.
    pub log: LogSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7800".to_owned(),
            default_rpc_timeout_ms: 30_000,
            log: LogSettings::default(),
        }
    }
}

impl RelaySettings {
    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed input.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Read`] or [`SettingsError::Parse`].
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        Self::from_toml(&read(path)?)
    }

    /// Returns the forwarded request deadline.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.default_rpc_timeout_ms)
    }
}

/// Settings of a Computer process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputerSettings {
    /// Start servers as soon as they are installed.
    pub auto_connect: bool,
    /// Hot-swap active servers when their configuration changes.
    pub auto_reconnect: bool,
    /// Deadline for tool call confirmations; unset waits indefinitely.
    pub confirm_timeout_ms: Option<u64>,
    /// Downstream servers.
    pub servers: Vec<DownstreamServerConfig>,
    /// Input definitions, kept opaque.
    pub inputs: Vec<Value>,
    /// Logging.
    pub log: LogSettings,
}

impl Default for ComputerSettings {
    fn default() -> Self {
        let options = ManagerOptions::default();
        Self {
            auto_connect: options.auto_connect,
            auto_reconnect: options.auto_reconnect,
            confirm_timeout_ms: None,
            servers: Vec::new(),
            inputs: Vec::new(),
            log: LogSettings::default(),
        }
    }
}

impl ComputerSettings {
    /// Parses and validates settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed input, including
    /// invalid server configurations, and
    /// [`SettingsError::DuplicateServer`] when a name repeats.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text)?;
        let mut seen = BTreeSet::new();
        for server in &settings.servers {
            if !seen.insert(server.name()) {
                return Err(SettingsError::DuplicateServer(server.name().to_owned()));
            }
        }
        Ok(settings)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Read`] or the errors of
    /// [`Self::from_toml`].
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        Self::from_toml(&read(path)?)
    }

    /// Returns the manager switches.
    #[must_use]
    pub const fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            auto_connect: self.auto_connect,
            auto_reconnect: self.auto_reconnect,
        }
    }

    /// Returns the confirmation deadline.
    #[must_use]
    pub fn confirm_timeout(&self) -> Option<Duration> {
        self.confirm_timeout_ms.map(Duration::from_millis)
    }
}

fn read(path: &Path) -> Result<String, SettingsError> {
    std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
