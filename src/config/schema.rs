//! Configuration schema for keel
//!
//! Configuration is stored at `~/.config/keel/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Default locations, overridden by flags and `KEEL_*` variables
    pub paths: PathsConfig,

    /// Release retention
    pub release: ReleaseConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,

    /// Audit log location; defaults to the state directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: false,
            audit_log_path: None,
        }
    }
}

/// Paths shared by every subcommand
///
/// Relative paths are resolved against the directory holding the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub builds_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
}

/// Release settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Previously released builds kept on disk besides the live one
    pub keep_builds: usize,
}
