//! CLI command implementations

pub mod build;
pub mod cache;
pub mod init;
pub mod install;
pub mod release;
pub mod status;

pub use build::execute as build;
pub use cache::execute as cache;
pub use init::execute as init;
pub use install::execute as install;
pub use release::execute as release;
pub use status::execute as status;

use crate::config::{Config, ResolvedPaths};
use crate::error::{KeelError, KeelResult};
use crate::events::EventSink;
use crate::ledger::PhaseGroup;
use crate::orchestrator::{Orchestrator, Outcome, Workspace};
use crate::pipeline::load_registry;
use crate::ui::{self, UiContext};
use std::path::PathBuf;
use std::sync::Arc;

/// Loaded configuration and collaborators shared by commands
pub struct Settings {
    pub config: Config,
    pub paths: ResolvedPaths,
    pub events: Arc<dyn EventSink>,
}

impl Settings {
    fn workspace(&self) -> KeelResult<Workspace> {
        Ok(Workspace {
            repo_path: self.paths.repo_path()?.to_path_buf(),
            builds_path: self.paths.builds_path()?.to_path_buf(),
            db_path: self.paths.db_path()?.to_path_buf(),
        })
    }

    /// Validate the plugin and open the ledger
    ///
    /// Registration errors surface here, before any claim is attempted.
    pub fn orchestrator(&self) -> KeelResult<Orchestrator> {
        let workspace = self.workspace()?;
        let registry = load_registry(self.paths.plugin()?, &keel_bin()?)?;

        Ok(Orchestrator::open(workspace, registry)?
            .with_events(self.events.clone())
            .with_keep_builds(self.config.release.keep_builds))
    }
}

/// Path of the running keel executable
pub(crate) fn keel_bin() -> KeelResult<PathBuf> {
    std::env::current_exe().map_err(|e| KeelError::io("locating the keel executable", e))
}

/// Print what a build or release flow did
pub(crate) fn report_outcome(ctx: &UiContext, group: PhaseGroup, outcome: &Outcome) {
    let snapshot = outcome.snapshot();
    ui::section(ctx, &format!("{} {}", capitalize(group.as_str()), snapshot));

    match outcome {
        Outcome::Completed {
            report, release, ..
        } => {
            for timing in &report.timings {
                ui::step_ok_detail(
                    ctx,
                    timing.phase.as_str(),
                    &ui::format_duration(timing.elapsed),
                );
            }
            ui::key_value(ctx, "total", &ui::format_duration(report.total));

            if let Some(summary) = release {
                let pointer = match &summary.previous {
                    Some(previous) if previous != &summary.sha => {
                        format!("{} (was {})", summary.sha, previous)
                    }
                    _ => summary.sha.clone(),
                };
                ui::key_value_status(ctx, "latest", &pointer, true);
                if !summary.gc.removed.is_empty() {
                    ui::key_value(ctx, "removed", &summary.gc.removed.len().to_string());
                }
                for (path, reason) in &summary.gc.skipped {
                    ui::step_warn_hint(ctx, &format!("kept {}", path.display()), reason);
                }
            }
        }
        Outcome::AlreadyDone { .. } => {
            ui::step_ok(ctx, &format!("{} already succeeded; nothing to do", group));
        }
        Outcome::InProgress { .. } => {
            ui::step_warn_hint(
                ctx,
                &format!("{} already in progress", group),
                "another invocation holds the claim",
            );
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_group() {
        assert_eq!(capitalize("build"), "Build");
        assert_eq!(capitalize(""), "");
    }
}
