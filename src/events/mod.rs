//! Orchestration events and the sinks that receive them
//!
//! The orchestrator and pipeline executor never log claim outcomes or phase
//! timings directly; they emit [`Event`]s to an injected [`EventSink`].

mod audit;

pub use audit::AuditLog;

use crate::ledger::{ClaimStatus, PhaseGroup};
use crate::pipeline::Phase;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Something worth recording that happened during an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ClaimWon {
        sha: String,
        group: PhaseGroup,
    },
    ClaimAdopted {
        sha: String,
        group: PhaseGroup,
        previous_owner: String,
    },
    ClaimLost {
        sha: String,
        group: PhaseGroup,
        status: ClaimStatus,
    },
    PhaseStarted {
        sha: String,
        group: PhaseGroup,
        phase: Phase,
    },
    PhaseFinished {
        sha: String,
        group: PhaseGroup,
        phase: Phase,
        elapsed_ms: u64,
        ok: bool,
    },
    PipelineFinished {
        sha: String,
        group: PhaseGroup,
        total_ms: u64,
        ok: bool,
    },
    Promoted {
        sha: String,
        previous: Option<String>,
    },
    StaleRemoved {
        path: PathBuf,
    },
    StaleSkipped {
        path: PathBuf,
        reason: String,
    },
}

impl Event {
    /// Dotted name used in the audit log
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClaimWon { .. } => "claim.won",
            Self::ClaimAdopted { .. } => "claim.adopted",
            Self::ClaimLost { .. } => "claim.lost",
            Self::PhaseStarted { .. } => "phase.started",
            Self::PhaseFinished { .. } => "phase.finished",
            Self::PipelineFinished { .. } => "pipeline.finished",
            Self::Promoted { .. } => "release.promoted",
            Self::StaleRemoved { .. } => "gc.removed",
            Self::StaleSkipped { .. } => "gc.skipped",
        }
    }
}

/// Receiver of orchestration events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes events as human-readable `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::ClaimWon { sha, group } => info!("{} claim won for {}", group, sha),
            Event::ClaimAdopted {
                sha,
                group,
                previous_owner,
            } => warn!(
                "{} claim won for {} by adopting stale claim of dead owner {}",
                group, sha, previous_owner
            ),
            Event::ClaimLost { sha, group, status } => match status {
                ClaimStatus::Claimed => {
                    info!("{} claim lost, already in progress for {}", group, sha)
                }
                ClaimStatus::Succeeded => {
                    info!("{} claim lost, already succeeded for {}", group, sha)
                }
                ClaimStatus::Failed => {
                    warn!("{} claim lost, previous attempt failed for {}", group, sha)
                }
            },
            Event::PhaseStarted { group, phase, .. } => info!("{} {} started", group, phase),
            Event::PhaseFinished {
                group,
                phase,
                elapsed_ms,
                ok,
                ..
            } => {
                if *ok {
                    info!("{} {} execution time {}ms", group, phase, elapsed_ms)
                } else {
                    warn!("{} {} failed after {}ms", group, phase, elapsed_ms)
                }
            }
            Event::PipelineFinished {
                sha,
                group,
                total_ms,
                ok,
            } => {
                if *ok {
                    info!("{} of {} finished in {}ms", group, sha, total_ms)
                } else {
                    warn!("{} of {} failed after {}ms", group, sha, total_ms)
                }
            }
            Event::Promoted { sha, previous } => match previous {
                Some(previous) => info!("Release pointer moved {} -> {}", previous, sha),
                None => info!("Release pointer created -> {}", sha),
            },
            Event::StaleRemoved { path } => info!("Removed stale build {}", path.display()),
            Event::StaleSkipped { path, reason } => {
                warn!("Could not remove stale build {}: {}", path.display(), reason)
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Phases that finished, in order, with their outcome
    pub fn finished_phases(&self) -> Vec<(Phase, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PhaseFinished { phase, ok, .. } => Some((phase, ok)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards each event to several sinks
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
