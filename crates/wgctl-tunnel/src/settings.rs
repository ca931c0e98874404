//! Controller settings
//!
//! Loaded from a TOML or JSON file. Every field has a default, so an empty
//! file (or no file) yields a working setup.
//!
//! ```toml
//! [tunnel]
//! name = "home"
//! provider = "com.example.wgctl.tunnel"
//!
//! [log]
//! level = "debug"
//!
//! [simulation]
//! vocabulary = "go-backend"
//! consent = "prompt"
//! report_delay_ms = 250
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub tunnel: TunnelSettings,
    pub log: LogSettings,
    pub simulation: SimulationSettings,
}

/// Identity defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Tunnel name used when `init` is given none
    pub name: Option<String>,
    /// Platform provider reference
    pub provider: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            name: None,
            provider: default_provider(),
        }
    }
}

fn default_provider() -> String {
    "com.wgctl.tunnel".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive (`info`, `debug`, `wgctl_tunnel=trace`, ...)
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Status vocabulary the simulated platform speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Vocabulary {
    #[default]
    NetworkExtension,
    GoBackend,
    ServiceManager,
}

/// How the simulated platform answers consent requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Consent {
    /// Consent already held
    #[default]
    Granted,
    /// Prompt stays open until answered
    Prompt,
    /// Prompt shown and accepted
    AutoGrant,
    /// Prompt shown and refused
    AutoDeny,
}

/// Behavior knobs of the simulated backend and authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub vocabulary: Vocabulary,
    pub consent: Consent,
    /// Emit native status callbacks after bring-up and tear-down
    pub auto_report: bool,
    /// Delay before a native callback follows a completed operation
    pub report_delay_ms: u64,
    /// Time bring-up and tear-down take to complete
    pub operation_delay_ms: u64,
    /// Backend creation fails
    pub unavailable: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            consent: Consent::default(),
            auto_report: false,
            report_delay_ms: 0,
            operation_delay_ms: 0,
            unavailable: false,
        }
    }
}

impl ControllerSettings {
    /// Load from a file, picking the format by extension
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            Some("toml") | None => Self::from_toml_file(path),
            Some(other) => Err(SettingsError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        toml::from_str(content)
            .map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(content)
            .map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self)
            .map_err(|e| SettingsError::ParseError(e.to_string()))
    }
}

/// Settings errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported settings format: .{0}")]
    UnsupportedFormat(String),
}
