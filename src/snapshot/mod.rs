//! Snapshots: a reference pinned to an immutable commit id

mod resolver;

pub use resolver::{GitResolver, SnapshotResolver, StaticResolver};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One buildable state of the source tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Reference name as given by the invoker (e.g. `main`, `refs/heads/main`)
    pub reference: String,
    /// Commit id the reference pointed at when resolved
    pub sha: String,
}

impl Snapshot {
    pub fn new(reference: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            sha: sha.into(),
        }
    }

    /// Abbreviated id for log lines
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(12)]
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.reference, self.short_sha())
    }
}
