//! Reference resolution against a bare git repository

use crate::error::{KeelError, KeelResult};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Resolves a reference name to an immutable snapshot
#[async_trait]
pub trait SnapshotResolver: Send + Sync {
    /// Resolve `reference` in the repository at `repo_path`
    async fn resolve(&self, repo_path: &Path, reference: &str) -> KeelResult<Snapshot>;
}

/// Resolver backed by the system `git` binary
#[derive(Debug, Clone)]
pub struct GitResolver {
    git: PathBuf,
}

impl GitResolver {
    pub fn new() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }

    /// Run git with an isolated environment, returning trimmed stdout
    async fn git(&self, repo_path: &Path, args: &[&str]) -> KeelResult<Result<String, String>> {
        let mut cmd = Command::new(&self.git);
        cmd.arg("-C").arg(repo_path).args(args);
        // Hooks export GIT_DIR and friends; they must not redirect our queries
        for var in ["GIT_DIR", "GIT_WORK_TREE", "GIT_INDEX_FILE", "GIT_QUARANTINE_PATH"] {
            cmd.env_remove(var);
        }

        let command = format!("git -C {} {}", repo_path.display(), args.join(" "));
        debug!("Running {}", command);
        let output = cmd
            .output()
            .await
            .map_err(|e| KeelError::command_failed(command, e))?;

        if output.status.success() {
            Ok(Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(Err(String::from_utf8_lossy(&output.stderr).trim().to_string()))
        }
    }

    /// Whether the repository has no working tree
    pub async fn is_bare(&self, repo_path: &Path) -> KeelResult<bool> {
        match self.git(repo_path, &["rev-parse", "--is-bare-repository"]).await? {
            Ok(stdout) => Ok(stdout == "true"),
            Err(_) => Err(KeelError::RepositoryNotFound(repo_path.to_path_buf())),
        }
    }
}

impl Default for GitResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotResolver for GitResolver {
    async fn resolve(&self, repo_path: &Path, reference: &str) -> KeelResult<Snapshot> {
        if !repo_path.exists() {
            return Err(KeelError::RepositoryNotFound(repo_path.to_path_buf()));
        }
        if !self.is_bare(repo_path).await? {
            return Err(KeelError::NotBareRepository(repo_path.to_path_buf()));
        }

        let spec = format!("{reference}^{{commit}}");
        match self
            .git(repo_path, &["rev-parse", "--verify", "--quiet", spec.as_str()])
            .await?
        {
            Ok(sha) if !sha.is_empty() => {
                debug!("Resolved {} to {}", reference, sha);
                Ok(Snapshot::new(reference, sha))
            }
            Ok(_) => Err(KeelError::RefNotFound {
                reference: reference.to_string(),
                reason: "empty rev-parse output".to_string(),
            }),
            Err(stderr) => Err(KeelError::RefNotFound {
                reference: reference.to_string(),
                reason: if stderr.is_empty() {
                    "no such commit".to_string()
                } else {
                    stderr
                },
            }),
        }
    }
}

/// Fixed reference table, for tests and embedders without git
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    refs: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ref(mut self, reference: impl Into<String>, sha: impl Into<String>) -> Self {
        self.refs.insert(reference.into(), sha.into());
        self
    }
}

#[async_trait]
impl SnapshotResolver for StaticResolver {
    async fn resolve(&self, _repo_path: &Path, reference: &str) -> KeelResult<Snapshot> {
        self.refs
            .get(reference)
            .map(|sha| Snapshot::new(reference, sha.clone()))
            .ok_or_else(|| KeelError::RefNotFound {
                reference: reference.to_string(),
                reason: "not in static table".to_string(),
            })
    }
}
