//! Sequential phase execution for one pipeline run

use crate::cache::Cache;
use crate::error::{KeelError, KeelResult};
use crate::events::{Event, EventSink};
use crate::ledger::PhaseGroup;
use crate::pipeline::{HookRegistry, Phase, PhaseContext, PipelineConfig, PipelineInputs};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Wall time spent in one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed: Duration,
}

/// Result of a pipeline run that reached the end of its sequence
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub group: PhaseGroup,
    pub config: PipelineConfig,
    pub timings: Vec<PhaseTiming>,
    pub total: Duration,
}

impl PipelineReport {
    pub fn total_ms(&self) -> u64 {
        duration_ms(self.total)
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.timings.iter().map(|t| t.phase).collect()
    }
}

/// Replace whatever is at `path` with an empty directory
fn reset_dir(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            debug!("Clearing leftover {}", path.display());
            std::fs::remove_dir_all(path)?;
        }
        Ok(_) => std::fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(path)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs the phases of a group against a hook registry
pub struct PipelineExecutor<'a> {
    registry: &'a HookRegistry,
    cache: &'a Cache,
    events: &'a dyn EventSink,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(registry: &'a HookRegistry, cache: &'a Cache, events: &'a dyn EventSink) -> Self {
        Self {
            registry,
            cache,
            events,
        }
    }

    /// Run every phase of `group` in order, halting at the first failure
    ///
    /// The build group starts `<builds_path>/<sha>` empty after `configure`,
    /// removing anything a previous attempt left there. Callers hold the
    /// build claim. A failure leaves whatever the hooks wrote in place.
    pub async fn run(
        &self,
        group: PhaseGroup,
        inputs: &PipelineInputs,
    ) -> KeelResult<PipelineReport> {
        let started = Instant::now();
        let sequence = Phase::sequence(group);
        let mut timings = Vec::with_capacity(sequence.len());

        // configure runs without config or build_path
        let base_env = inputs.base_template_env();
        let ctx = PhaseContext {
            phase: Phase::Configure,
            group,
            inputs,
            build_path: None,
            config: None,
            template_env: &base_env,
            cache: self.cache,
            events: self.events,
        };
        let config = self
            .run_phase(&ctx, &mut timings, started)
            .await?
            .unwrap_or_default();
        debug!("{} config: {:?}", group, config);

        let build_path = inputs.build_path();
        if group == PhaseGroup::Build {
            self.prepare_build_path(&build_path, &inputs.snapshot.sha, started)?;
        }

        let env = inputs.configured_template_env(&config);
        for &phase in &sequence[1..] {
            let ctx = PhaseContext {
                phase,
                group,
                inputs,
                build_path: Some(&build_path),
                config: Some(&config),
                template_env: &env,
                cache: self.cache,
                events: self.events,
            };
            self.run_phase(&ctx, &mut timings, started).await?;
        }

        let total = started.elapsed();
        self.events.emit(&Event::PipelineFinished {
            sha: inputs.snapshot.sha.clone(),
            group,
            total_ms: duration_ms(total),
            ok: true,
        });

        Ok(PipelineReport {
            group,
            config,
            timings,
            total,
        })
    }

    async fn run_phase(
        &self,
        ctx: &PhaseContext<'_>,
        timings: &mut Vec<PhaseTiming>,
        pipeline_started: Instant,
    ) -> KeelResult<Option<PipelineConfig>> {
        let sha = ctx.sha().to_string();
        self.events.emit(&Event::PhaseStarted {
            sha: sha.clone(),
            group: ctx.group,
            phase: ctx.phase,
        });

        let started = Instant::now();
        let result = self.registry.get(ctx.phase).run(ctx).await;
        let elapsed = started.elapsed();
        timings.push(PhaseTiming {
            phase: ctx.phase,
            elapsed,
        });

        self.events.emit(&Event::PhaseFinished {
            sha: sha.clone(),
            group: ctx.group,
            phase: ctx.phase,
            elapsed_ms: duration_ms(elapsed),
            ok: result.is_ok(),
        });

        result.map_err(|e| {
            self.fail(&sha, ctx.group, pipeline_started);
            KeelError::Phase {
                group: ctx.group,
                phase: ctx.phase.to_string(),
                elapsed_ms: duration_ms(elapsed),
                reason: e.to_string(),
            }
        })
    }

    fn prepare_build_path(
        &self,
        build_path: &Path,
        sha: &str,
        pipeline_started: Instant,
    ) -> KeelResult<()> {
        reset_dir(build_path).map_err(|e| {
            self.fail(sha, PhaseGroup::Build, pipeline_started);
            KeelError::Phase {
                group: PhaseGroup::Build,
                phase: Phase::PreBuild.to_string(),
                elapsed_ms: 0,
                reason: format!("preparing {}: {}", build_path.display(), e),
            }
        })
    }

    fn fail(&self, sha: &str, group: PhaseGroup, pipeline_started: Instant) {
        self.events.emit(&Event::PipelineFinished {
            sha: sha.to_string(),
            group,
            total_ms: duration_ms(pipeline_started.elapsed()),
            ok: false,
        });
    }
}
