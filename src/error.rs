//! Error types for keel
//!
//! All modules use `KeelResult<T>` as their return type.

use crate::ledger::PhaseGroup;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for keel operations
pub type KeelResult<T> = Result<T, KeelError>;

/// All errors that can occur in keel
#[derive(Error, Debug)]
pub enum KeelError {
    // Resolution errors
    #[error("Repository does not exist: {0}")]
    RepositoryNotFound(PathBuf),

    #[error("Repository is not bare: {0}")]
    NotBareRepository(PathBuf),

    #[error("Reference not found: {reference}: {reason}")]
    RefNotFound { reference: String, reason: String },

    // Lock errors
    #[error("Previous {group} of {sha} failed; re-run with --retry to claim it again")]
    LockConflict { sha: String, group: PhaseGroup },

    // Registration errors
    #[error("Plugin registration failed: {0}")]
    Registration(String),

    #[error("Invalid plugin manifest at {path}: {reason}")]
    PluginInvalid { path: PathBuf, reason: String },

    // Pipeline errors
    #[error("{group} failed at phase '{phase}' after {elapsed_ms}ms: {reason}")]
    Phase {
        group: PhaseGroup,
        phase: String,
        elapsed_ms: u64,
        reason: String,
    },

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Template error: {0}")]
    Template(String),

    // Ledger errors
    #[error("Ledger entry ({sha}, {group}) is not owned by this invocation")]
    NotOwner { sha: String, group: PhaseGroup },

    #[error("Corrupt ledger row: {0}")]
    LedgerCorrupt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    // Release errors
    #[error("Release failed: {0}")]
    Release(String),

    #[error("No successful build for {sha}; run the build first")]
    BuildNotReady { sha: String },

    // Cache errors
    #[error("Cache key not found: {0}")]
    CacheMiss(String),

    #[error("Cache entry '{0}' does not match the given checksum")]
    CacheStale(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Missing required setting: {0}")]
    ConfigMissing(&'static str),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KeelError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Check if error is retryable by re-invocation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. } | Self::Phase { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotBareRepository(_) => Some("Create the repository with: git init --bare <path>"),
            Self::LockConflict { .. } => Some("Fix the cause of the failure, then pass --retry"),
            Self::BuildNotReady { .. } => Some("Run: keel build <ref> <actor>"),
            Self::ConfigMissing(_) => {
                Some("Pass the flag, set the KEEL_* variable, or add it to config.toml")
            }
            Self::Registration(_) => Some("Every plugin needs configure, build and release hooks"),
            _ => None,
        }
    }
}
