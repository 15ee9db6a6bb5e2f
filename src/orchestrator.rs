//! Build and release flows
//!
//! Each flow resolves the reference, claims `(sha, group)` in the ledger and
//! only then runs hooks. Losing a claim is not an error: the flow reports
//! [`Outcome::AlreadyDone`] or [`Outcome::InProgress`] and does nothing.
//!
//! A succeeded build whose directory was collected is rebuilt: its entry is
//! moved back to `claimed` with a compare-and-set, so exactly one invocation
//! redoes the work.

use crate::cache::Cache;
use crate::error::{KeelError, KeelResult};
use crate::events::{Event, EventSink, TracingSink};
use crate::ledger::{ClaimOutcome, ClaimStatus, Ledger, Owner, PhaseGroup};
use crate::pipeline::{HookRegistry, PipelineExecutor, PipelineInputs, PipelineReport};
use crate::release::{ReleaseLock, ReleaseManager, ReleaseSummary};
use crate::snapshot::{GitResolver, Snapshot, SnapshotResolver};
use crate::store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Locations an orchestrator works against
#[derive(Debug, Clone)]
pub struct Workspace {
    pub repo_path: PathBuf,
    pub builds_path: PathBuf,
    pub db_path: PathBuf,
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub actor: String,
    /// Re-claim a `failed` entry instead of reporting a lock conflict
    pub retry: bool,
}

impl RunOptions {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            retry: false,
        }
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of one flow that did not error
#[derive(Debug)]
pub enum Outcome {
    /// This invocation owned the claim and ran the pipeline to the end
    Completed {
        snapshot: Snapshot,
        report: PipelineReport,
        release: Option<ReleaseSummary>,
    },
    /// The work already succeeded; nothing was done
    AlreadyDone { snapshot: Snapshot },
    /// Another live invocation holds the claim
    InProgress { snapshot: Snapshot },
}

impl Outcome {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Completed { snapshot, .. }
            | Self::AlreadyDone { snapshot }
            | Self::InProgress { snapshot } => snapshot,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Build outcome plus the chained release, when one was requested and ran
#[derive(Debug)]
pub struct BuildRun {
    pub build: Outcome,
    pub release: Option<Outcome>,
}

enum Claimed {
    Proceed,
    Skip(Outcome),
}

/// Drives build and release pipelines for one repository
pub struct Orchestrator {
    workspace: Workspace,
    resolver: Arc<dyn SnapshotResolver>,
    registry: HookRegistry,
    ledger: Ledger,
    cache: Cache,
    releases: ReleaseManager,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Open the ledger database and prepare a git-backed orchestrator
    pub fn open(workspace: Workspace, registry: HookRegistry) -> KeelResult<Self> {
        let store = Store::open(&workspace.db_path)?;
        let releases = ReleaseManager::new(&workspace.builds_path);
        Ok(Self {
            resolver: Arc::new(GitResolver::new()),
            registry,
            ledger: Ledger::new(store.clone()),
            cache: Cache::new(store),
            releases,
            events: Arc::new(TracingSink),
            workspace,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SnapshotResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_keep_builds(mut self, keep_builds: usize) -> Self {
        self.releases = self.releases.with_keep_builds(keep_builds);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn releases(&self) -> &ReleaseManager {
        &self.releases
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    async fn resolve(&self, reference: &str) -> KeelResult<Snapshot> {
        let snapshot = self
            .resolver
            .resolve(&self.workspace.repo_path, reference)
            .await?;
        info!("Resolved {}", snapshot);
        Ok(snapshot)
    }

    fn inputs(&self, snapshot: &Snapshot, opts: &RunOptions) -> PipelineInputs {
        PipelineInputs {
            snapshot: snapshot.clone(),
            actor: opts.actor.clone(),
            repo_path: self.workspace.repo_path.clone(),
            builds_path: self.workspace.builds_path.clone(),
            db_path: self.workspace.db_path.clone(),
        }
    }

    /// Build `reference`
    pub async fn build(&self, reference: &str, opts: &RunOptions) -> KeelResult<Outcome> {
        let snapshot = self.resolve(reference).await?;
        self.build_snapshot(snapshot, opts).await
    }

    /// Build `reference` and, unless the build is still running elsewhere,
    /// release the same snapshot
    pub async fn build_and_release(
        &self,
        reference: &str,
        opts: &RunOptions,
    ) -> KeelResult<BuildRun> {
        let snapshot = self.resolve(reference).await?;
        let build = self.build_snapshot(snapshot.clone(), opts).await?;

        let release = match build {
            Outcome::InProgress { .. } => {
                info!("Build of {} still running elsewhere; not releasing", snapshot);
                None
            }
            _ => Some(self.release_snapshot(snapshot, opts).await?),
        };
        Ok(BuildRun { build, release })
    }

    /// Release `reference`, which must already have a successful build
    pub async fn release(&self, reference: &str, opts: &RunOptions) -> KeelResult<Outcome> {
        let snapshot = self.resolve(reference).await?;
        self.release_snapshot(snapshot, opts).await
    }

    async fn build_snapshot(&self, snapshot: Snapshot, opts: &RunOptions) -> KeelResult<Outcome> {
        let builds_path = &self.workspace.builds_path;
        std::fs::create_dir_all(builds_path)
            .map_err(|e| KeelError::io(format!("creating {}", builds_path.display()), e))?;

        let owner = Owner::current(&opts.actor);
        if let Claimed::Skip(outcome) = self.claim(&snapshot, PhaseGroup::Build, &owner, opts)? {
            return Ok(outcome);
        }

        let inputs = self.inputs(&snapshot, opts);
        let executor = PipelineExecutor::new(&self.registry, &self.cache, self.events.as_ref());
        let report = match executor.run(PhaseGroup::Build, &inputs).await {
            Ok(report) => report,
            Err(e) => {
                self.finish(&snapshot, PhaseGroup::Build, &owner, ClaimStatus::Failed);
                return Err(e);
            }
        };

        self.ledger
            .complete(&snapshot.sha, PhaseGroup::Build, &owner, ClaimStatus::Succeeded)?;
        Ok(Outcome::Completed {
            snapshot,
            report,
            release: None,
        })
    }

    async fn release_snapshot(
        &self,
        snapshot: Snapshot,
        opts: &RunOptions,
    ) -> KeelResult<Outcome> {
        let owner = Owner::current(&opts.actor);
        if let Claimed::Skip(outcome) = self.claim_release(&snapshot, &owner, opts).await? {
            return Ok(outcome);
        }

        let inputs = self.inputs(&snapshot, opts);
        let executor = PipelineExecutor::new(&self.registry, &self.cache, self.events.as_ref());
        let report = match executor.run(PhaseGroup::Release, &inputs).await {
            Ok(report) => report,
            Err(e) => {
                self.finish(&snapshot, PhaseGroup::Release, &owner, ClaimStatus::Failed);
                return Err(e);
            }
        };

        let summary = match self.promote(&snapshot.sha).await {
            Ok(summary) => summary,
            Err(e) => {
                self.finish(&snapshot, PhaseGroup::Release, &owner, ClaimStatus::Failed);
                return Err(e);
            }
        };

        self.ledger
            .complete(&snapshot.sha, PhaseGroup::Release, &owner, ClaimStatus::Succeeded)?;
        Ok(Outcome::Completed {
            snapshot,
            report,
            release: Some(summary),
        })
    }

    /// Swap the pointer and collect stale builds off the async runtime
    async fn promote(&self, sha: &str) -> KeelResult<ReleaseSummary> {
        let releases = self.releases.clone();
        let ledger = self.ledger.clone();
        let events = self.events.clone();
        let sha = sha.to_string();

        tokio::task::spawn_blocking(move || {
            releases.promote_and_collect(&sha, &ledger, events.as_ref())
        })
        .await
        .map_err(|e| KeelError::Internal(format!("release task failed: {e}")))?
    }

    /// Check the build and claim the release under the release lock
    ///
    /// Holding the lock keeps collection from removing the build between the
    /// check and the claim; once claimed, the sha is in flight and retained.
    /// A build that succeeded but was collected is rebuilt first.
    async fn claim_release(
        &self,
        snapshot: &Snapshot,
        owner: &Owner,
        opts: &RunOptions,
    ) -> KeelResult<Claimed> {
        let lock = self.release_lock().await?;
        // A finished release stays a no-op even after its build was collected
        if self.succeeded(&snapshot.sha, PhaseGroup::Release)?
            || self.build_ready(&snapshot.sha)?
        {
            return self.claim(snapshot, PhaseGroup::Release, owner, opts);
        }
        drop(lock);

        if !self.succeeded(&snapshot.sha, PhaseGroup::Build)? {
            return Err(KeelError::BuildNotReady {
                sha: snapshot.sha.clone(),
            });
        }

        info!("Build of {} was collected before release; rebuilding", snapshot);
        self.build_snapshot(snapshot.clone(), opts).await?;

        let _lock = self.release_lock().await?;
        if !self.build_ready(&snapshot.sha)? {
            return Err(KeelError::BuildNotReady {
                sha: snapshot.sha.clone(),
            });
        }
        self.claim(snapshot, PhaseGroup::Release, owner, opts)
    }

    async fn release_lock(&self) -> KeelResult<ReleaseLock> {
        let releases = self.releases.clone();
        tokio::task::spawn_blocking(move || releases.lock())
            .await
            .map_err(|e| KeelError::Internal(format!("release lock task failed: {e}")))?
    }

    fn succeeded(&self, sha: &str, group: PhaseGroup) -> KeelResult<bool> {
        Ok(self
            .ledger
            .get(sha, group)?
            .is_some_and(|entry| entry.status == ClaimStatus::Succeeded))
    }

    fn build_ready(&self, sha: &str) -> KeelResult<bool> {
        Ok(self.succeeded(sha, PhaseGroup::Build)? && self.releases.build_path(sha).is_dir())
    }

    fn claim(
        &self,
        snapshot: &Snapshot,
        group: PhaseGroup,
        owner: &Owner,
        opts: &RunOptions,
    ) -> KeelResult<Claimed> {
        let sha = &snapshot.sha;
        let outcome = self
            .ledger
            .claim(sha, group, &snapshot.reference, owner)?;

        let outcome = match outcome {
            ClaimOutcome::Lost(ClaimStatus::Failed) if opts.retry => {
                debug!("Retrying failed {} of {}", group, sha);
                self.ledger
                    .retry_failed(sha, group, &snapshot.reference, owner)?
            }
            ClaimOutcome::Lost(ClaimStatus::Succeeded)
                if group == PhaseGroup::Build && !self.releases.build_path(sha).is_dir() =>
            {
                info!("Build directory of {} is gone; rebuilding", snapshot);
                self.ledger
                    .reclaim_succeeded(sha, group, &snapshot.reference, owner)?
            }
            other => other,
        };

        match outcome {
            ClaimOutcome::Won => {
                self.events.emit(&Event::ClaimWon {
                    sha: sha.clone(),
                    group,
                });
                Ok(Claimed::Proceed)
            }
            ClaimOutcome::Adopted { previous_owner } => {
                self.events.emit(&Event::ClaimAdopted {
                    sha: sha.clone(),
                    group,
                    previous_owner,
                });
                Ok(Claimed::Proceed)
            }
            ClaimOutcome::Lost(status) => {
                self.events.emit(&Event::ClaimLost {
                    sha: sha.clone(),
                    group,
                    status,
                });
                match status {
                    ClaimStatus::Succeeded => Ok(Claimed::Skip(Outcome::AlreadyDone {
                        snapshot: snapshot.clone(),
                    })),
                    ClaimStatus::Claimed => Ok(Claimed::Skip(Outcome::InProgress {
                        snapshot: snapshot.clone(),
                    })),
                    ClaimStatus::Failed => Err(KeelError::LockConflict {
                        sha: sha.clone(),
                        group,
                    }),
                }
            }
        }
    }

    /// Record a terminal status, logging rather than masking the caller's error
    fn finish(&self, snapshot: &Snapshot, group: PhaseGroup, owner: &Owner, status: ClaimStatus) {
        if let Err(e) = self.ledger.complete(&snapshot.sha, group, owner, status) {
            warn!("Could not mark {} of {} as {}: {}", group, snapshot, status, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::pipeline::{from_fn, step_fn, Phase, PipelineConfig};
    use crate::snapshot::StaticResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct Fixture {
        _dir: TempDir,
        orchestrator: Orchestrator,
        events: Arc<MemorySink>,
        builds: Arc<AtomicUsize>,
    }

    fn registry(builds: Arc<AtomicUsize>, fail_pre_build: bool) -> HookRegistry {
        HookRegistry::builder()
            .with(
                Phase::Configure,
                from_fn(|ctx| Ok(Some(PipelineConfig::new().with("ref", ctx.reference())))),
            )
            .unwrap()
            .with(
                Phase::PreBuild,
                step_fn(move |_| {
                    if fail_pre_build {
                        Err(KeelError::Hook("lint failed".to_string()))
                    } else {
                        Ok(())
                    }
                }),
            )
            .unwrap()
            .with(
                Phase::Build,
                step_fn(move |ctx| {
                    builds.fetch_add(1, Ordering::SeqCst);
                    let path = ctx.require_build_path()?;
                    std::fs::write(path.join("artifact"), ctx.sha())
                        .map_err(|e| KeelError::io("writing artifact", e))
                }),
            )
            .unwrap()
            .with(Phase::Release, step_fn(|_| Ok(())))
            .unwrap()
            .build()
            .unwrap()
    }

    fn fixture(fail_pre_build: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace {
            repo_path: dir.path().join("repo.git"),
            builds_path: dir.path().join("builds"),
            db_path: dir.path().join("keel.db"),
        };
        let builds = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(MemorySink::new());
        let resolver = StaticResolver::new()
            .with_ref("main", SHA_A)
            .with_ref("next", SHA_B);

        let orchestrator = Orchestrator::open(workspace, registry(builds.clone(), fail_pre_build))
            .unwrap()
            .with_resolver(Arc::new(resolver))
            .with_events(events.clone());

        Fixture {
            _dir: dir,
            orchestrator,
            events,
            builds,
        }
    }

    #[tokio::test]
    async fn second_build_is_idempotent() {
        let fx = fixture(false);
        let opts = RunOptions::new("tester");

        let first = fx.orchestrator.build("main", &opts).await.unwrap();
        assert!(first.is_completed());
        let second = fx.orchestrator.build("main", &opts).await.unwrap();
        assert!(matches!(second, Outcome::AlreadyDone { .. }));

        assert_eq!(fx.builds.load(Ordering::SeqCst), 1);
        let entry = fx
            .orchestrator
            .ledger()
            .get(SHA_A, PhaseGroup::Build)
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, ClaimStatus::Succeeded);
    }

    #[tokio::test]
    async fn failed_phase_marks_entry_failed() {
        let fx = fixture(true);
        let opts = RunOptions::new("tester");

        let err = fx.orchestrator.build("main", &opts).await.unwrap_err();
        assert!(err.to_string().contains("pre_build"));
        assert_eq!(fx.builds.load(Ordering::SeqCst), 0);

        let entry = fx
            .orchestrator
            .ledger()
            .get(SHA_A, PhaseGroup::Build)
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, ClaimStatus::Failed);

        // Without --retry the failed entry is a lock conflict
        let err = fx.orchestrator.build("main", &opts).await.unwrap_err();
        assert!(matches!(err, KeelError::LockConflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn retry_reclaims_failed_build() {
        let fx = fixture(true);
        let opts = RunOptions::new("tester");
        fx.orchestrator.build("main", &opts).await.unwrap_err();

        // Still failing, but the retry did claim and run the pipeline again
        let err = fx
            .orchestrator
            .build("main", &opts.clone().with_retry(true))
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::Phase { .. }));
        let claims = fx
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::ClaimWon { .. }))
            .count();
        assert_eq!(claims, 2);
    }

    #[tokio::test]
    async fn in_progress_claim_is_skipped() {
        let fx = fixture(false);
        let holder = Owner::current("someone-else");
        fx.orchestrator
            .ledger()
            .claim(SHA_A, PhaseGroup::Build, "main", &holder)
            .unwrap();

        let run = fx
            .orchestrator
            .build_and_release("main", &RunOptions::new("tester"))
            .await
            .unwrap();
        assert!(matches!(run.build, Outcome::InProgress { .. }));
        assert!(run.release.is_none());
        assert_eq!(fx.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_requires_successful_build() {
        let fx = fixture(false);
        let err = fx
            .orchestrator
            .release("main", &RunOptions::new("tester"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::BuildNotReady { .. }));
        assert!(fx
            .orchestrator
            .ledger()
            .get(SHA_A, PhaseGroup::Release)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn build_and_release_promotes_and_collects() {
        let fx = fixture(false);
        let opts = RunOptions::new("tester");

        let run = fx.orchestrator.build_and_release("main", &opts).await.unwrap();
        assert!(run.build.is_completed());
        assert!(matches!(run.release, Some(Outcome::Completed { .. })));
        assert_eq!(
            fx.orchestrator.releases().current().unwrap().as_deref(),
            Some(SHA_A)
        );

        let run = fx.orchestrator.build_and_release("next", &opts).await.unwrap();
        match run.release {
            Some(Outcome::Completed { release: Some(summary), .. }) => {
                assert_eq!(summary.previous.as_deref(), Some(SHA_A));
                assert_eq!(
                    summary.gc.removed,
                    vec![fx.orchestrator.releases().build_path(SHA_A)]
                );
            }
            other => panic!("unexpected release outcome: {other:?}"),
        }
        assert_eq!(
            fx.orchestrator.releases().current().unwrap().as_deref(),
            Some(SHA_B)
        );

        // Releasing again is a no-op
        let again = fx.orchestrator.release("next", &opts).await.unwrap();
        assert!(matches!(again, Outcome::AlreadyDone { .. }));
    }

    #[tokio::test]
    async fn unreleased_newer_build_can_still_be_released() {
        let fx = fixture(false);
        let opts = RunOptions::new("tester");

        // next is built first, then main is built and released
        assert!(fx.orchestrator.build("next", &opts).await.unwrap().is_completed());
        let run = fx.orchestrator.build_and_release("main", &opts).await.unwrap();
        assert!(matches!(run.release, Some(Outcome::Completed { .. })));
        assert!(fx.orchestrator.releases().build_path(SHA_B).is_dir());

        let released = fx.orchestrator.release("next", &opts).await.unwrap();
        assert!(released.is_completed());
        assert_eq!(
            fx.orchestrator.releases().current().unwrap().as_deref(),
            Some(SHA_B)
        );
        assert_eq!(fx.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn collected_build_is_rebuilt_once() {
        let fx = fixture(false);
        let opts = RunOptions::new("tester");
        fx.orchestrator.build("next", &opts).await.unwrap();
        std::fs::remove_dir_all(fx.orchestrator.releases().build_path(SHA_B)).unwrap();

        // Release rebuilds the missing directory, then promotes it
        let released = fx.orchestrator.release("next", &opts).await.unwrap();
        assert!(released.is_completed());
        assert_eq!(fx.builds.load(Ordering::SeqCst), 2);
        assert!(fx
            .orchestrator
            .releases()
            .build_path(SHA_B)
            .join("artifact")
            .is_file());

        let history = fx.orchestrator.ledger().history(SHA_B).unwrap();
        assert!(history.iter().any(|record| record.event == "rebuild"));

        // With the directory back, building is a no-op again
        let again = fx.orchestrator.build("next", &opts).await.unwrap();
        assert!(matches!(again, Outcome::AlreadyDone { .. }));
        assert_eq!(fx.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_does_not_see_output_of_failed_attempt() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace {
            repo_path: dir.path().join("repo.git"),
            builds_path: dir.path().join("builds"),
            db_path: dir.path().join("keel.db"),
        };
        let attempts = Arc::new(AtomicUsize::new(0));
        let leftover_seen = Arc::new(AtomicUsize::new(0));
        let registry = {
            let attempts = attempts.clone();
            let leftover_seen = leftover_seen.clone();
            HookRegistry::builder()
                .with(Phase::Configure, step_fn(|_| Ok(())))
                .unwrap()
                .with(
                    Phase::Build,
                    step_fn(move |ctx| {
                        let path = ctx.require_build_path()?;
                        if path.join("half-written").exists() {
                            leftover_seen.fetch_add(1, Ordering::SeqCst);
                        }
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            std::fs::write(path.join("half-written"), "partial")
                                .map_err(|e| KeelError::io("writing", e))?;
                            return Err(KeelError::Hook("disk full".to_string()));
                        }
                        Ok(())
                    }),
                )
                .unwrap()
                .with(Phase::Release, step_fn(|_| Ok(())))
                .unwrap()
                .build()
                .unwrap()
        };
        let orchestrator = Orchestrator::open(workspace, registry)
            .unwrap()
            .with_resolver(Arc::new(StaticResolver::new().with_ref("main", SHA_A)))
            .with_events(Arc::new(MemorySink::new()));
        let opts = RunOptions::new("tester");

        orchestrator.build("main", &opts).await.unwrap_err();
        assert!(orchestrator.releases().build_path(SHA_A).join("half-written").exists());

        let retried = orchestrator
            .build("main", &opts.clone().with_retry(true))
            .await
            .unwrap();
        assert!(retried.is_completed());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(leftover_seen.load(Ordering::SeqCst), 0);
        assert!(!orchestrator.releases().build_path(SHA_A).join("half-written").exists());
    }

    #[tokio::test]
    async fn unknown_reference_fails_before_claim() {
        let fx = fixture(false);
        let err = fx
            .orchestrator
            .build("missing", &RunOptions::new("tester"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::RefNotFound { .. }));
        assert!(fx.orchestrator.ledger().list(10).unwrap().is_empty());
    }
}
