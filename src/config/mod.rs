//! Configuration management for keel
//!
//! Settings resolve in order: command-line flag, `KEEL_*` environment
//! variable (both handled by clap), then the config file.

pub mod schema;

pub use schema::Config;

use crate::error::{KeelError, KeelResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keel")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keel")
    }

    /// Get the default audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Load configuration, falling back to defaults if the file is absent
    pub async fn load(&self) -> KeelResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> KeelResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KeelError::io(format!("reading config from {}", path.display()), e))?;

        let mut config: Config = toml::from_str(&content).map_err(|e| KeelError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !matches!(config.general.log_format.as_str(), "text" | "json") {
            return Err(KeelError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: format!(
                    "general.log_format must be \"text\" or \"json\", got \"{}\"",
                    config.general.log_format
                ),
            });
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for slot in [
            &mut config.paths.plugin,
            &mut config.paths.builds_path,
            &mut config.paths.db_path,
            &mut config.paths.repo_path,
            &mut config.general.audit_log_path,
        ] {
            if let Some(p) = slot.as_mut() {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Path options as given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub plugin: Option<PathBuf>,
    pub builds_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub repo_path: Option<PathBuf>,
}

/// Fully resolved, absolute locations for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub plugin: Option<PathBuf>,
    pub builds_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub repo_path: Option<PathBuf>,
}

impl ResolvedPaths {
    /// Merge overrides over file values and make every path absolute
    ///
    /// `db_path` defaults to `<builds_path>/.keel/keel.db`.
    pub fn resolve(overrides: &PathOverrides, config: &Config) -> KeelResult<Self> {
        let pick = |flag: &Option<PathBuf>, file: &Option<PathBuf>| -> KeelResult<Option<PathBuf>> {
            flag.as_ref().or(file.as_ref()).map(|p| absolutize(p)).transpose()
        };

        let builds_path = pick(&overrides.builds_path, &config.paths.builds_path)?;
        let db_path = match pick(&overrides.db_path, &config.paths.db_path)? {
            Some(db_path) => Some(db_path),
            None => builds_path.as_ref().map(|b| b.join(".keel").join("keel.db")),
        };

        Ok(Self {
            plugin: pick(&overrides.plugin, &config.paths.plugin)?,
            builds_path,
            db_path,
            repo_path: pick(&overrides.repo_path, &config.paths.repo_path)?,
        })
    }

    pub fn plugin(&self) -> KeelResult<&Path> {
        self.plugin.as_deref().ok_or(KeelError::ConfigMissing("plugin"))
    }

    pub fn builds_path(&self) -> KeelResult<&Path> {
        self.builds_path
            .as_deref()
            .ok_or(KeelError::ConfigMissing("builds_path"))
    }

    pub fn db_path(&self) -> KeelResult<&Path> {
        self.db_path.as_deref().ok_or(KeelError::ConfigMissing("db_path"))
    }

    pub fn repo_path(&self) -> KeelResult<&Path> {
        self.repo_path
            .as_deref()
            .ok_or(KeelError::ConfigMissing("repo_path"))
    }
}

/// Absolute form of `path` without requiring it to exist
pub fn absolutize(path: &Path) -> KeelResult<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| KeelError::io(format!("resolving {}", path.display()), e))
}
