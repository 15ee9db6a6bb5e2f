//! Audit log of orchestration events
//!
//! Appends one JSON line per event to the configured path. Write failures
//! are reported as warnings and never interrupt a build or release.

use crate::events::{Event, EventSink};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File-based event sink that appends JSON lines
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // One write per line keeps concurrent appenders from interleaving
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

impl EventSink for AuditLog {
    fn emit(&self, event: &Event) {
        let data = match serde_json::to_value(event) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event.name(),
            "pid": std::process::id(),
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line) {
            warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }
}
