//! Release pointer management and build retention
//!
//! `<builds_path>/latest` is a symlink naming the live build. It is only
//! ever replaced by renaming a freshly created link over it. Stale build
//! directories are removed afterwards, keeping:
//!
//! - the build `latest` points at
//! - every sha with a ledger entry still `claimed`
//! - the `keep_builds` shas released before the live one
//! - succeeded builds not yet released that finished after the release
//!   preceding the live one
//!
//! Only directories named after a sha the ledger knows are ever removed.
//! Promotion and collection run under [`ReleaseLock`].

mod gc;
mod lock;
mod pointer;

pub use gc::GcReport;
pub use lock::ReleaseLock;

use crate::error::{KeelError, KeelResult};
use crate::events::{Event, EventSink};
use crate::ledger::{ClaimStatus, Ledger, PhaseGroup};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of a promote + collect cycle
#[derive(Debug, Clone)]
pub struct ReleaseSummary {
    pub sha: String,
    pub previous: Option<String>,
    pub gc: GcReport,
}

/// Owns the release pointer and build retention for one builds directory
#[derive(Debug, Clone)]
pub struct ReleaseManager {
    builds_path: PathBuf,
    keep_builds: usize,
}

impl ReleaseManager {
    pub fn new(builds_path: impl Into<PathBuf>) -> Self {
        Self {
            builds_path: builds_path.into(),
            keep_builds: 0,
        }
    }

    /// Also retain this many builds released before the live one
    pub fn with_keep_builds(mut self, keep_builds: usize) -> Self {
        self.keep_builds = keep_builds;
        self
    }

    pub fn builds_path(&self) -> &Path {
        &self.builds_path
    }

    pub fn pointer_path(&self) -> PathBuf {
        pointer::pointer_path(&self.builds_path)
    }

    pub fn build_path(&self, sha: &str) -> PathBuf {
        self.builds_path.join(sha)
    }

    /// Sha of the live build
    pub fn current(&self) -> KeelResult<Option<String>> {
        pointer::read(&self.builds_path)
    }

    /// Take the release lock, blocking behind any other holder
    pub fn lock(&self) -> KeelResult<ReleaseLock> {
        if let Some(lock) = ReleaseLock::try_acquire(&self.builds_path)? {
            return Ok(lock);
        }
        info!("Waiting for another release of {} to finish", self.builds_path.display());
        ReleaseLock::acquire(&self.builds_path)
    }

    /// Point `latest` at the build for `sha`, returning the previous sha
    ///
    /// Callers hold the release lock.
    pub fn promote(&self, sha: &str, events: &dyn EventSink) -> KeelResult<Option<String>> {
        let build_path = self.build_path(sha);
        if !build_path.is_dir() {
            return Err(KeelError::Release(format!(
                "build directory {} does not exist",
                build_path.display()
            )));
        }

        let previous = self.current()?;
        if previous.as_deref() == Some(sha) {
            debug!("Release pointer already at {}", sha);
        }
        pointer::swap(&self.builds_path, sha)?;

        events.emit(&Event::Promoted {
            sha: sha.to_string(),
            previous: previous.clone(),
        });
        Ok(previous)
    }

    /// Shas that garbage collection must not touch
    pub fn retain_set(&self, ledger: &Ledger) -> KeelResult<BTreeSet<String>> {
        let mut retain = ledger.in_flight()?;
        let current = self.current()?;

        // Releases before the live one, newest first
        let earlier: Vec<String> = ledger
            .recent(
                PhaseGroup::Release,
                ClaimStatus::Succeeded,
                self.keep_builds + 2,
            )?
            .into_iter()
            .filter(|sha| Some(sha) != current.as_ref())
            .collect();
        retain.extend(earlier.iter().take(self.keep_builds).cloned());

        // Builds finished since the previous release are still release candidates
        let cutoff = match earlier.first() {
            Some(sha) => ledger
                .get(sha, PhaseGroup::Release)?
                .and_then(|entry| entry.finished_at),
            None => None,
        };
        retain.extend(
            ledger
                .unreleased_builds()?
                .into_iter()
                .filter(|(_, finished_at)| cutoff.map_or(true, |cutoff| *finished_at > cutoff))
                .map(|(sha, _)| sha),
        );

        retain.extend(current);
        Ok(retain)
    }

    /// Delete ledger-known build directories outside `retain`
    ///
    /// Callers hold the release lock.
    pub fn collect_stale(
        &self,
        ledger: &Ledger,
        retain: &BTreeSet<String>,
        events: &dyn EventSink,
    ) -> KeelResult<GcReport> {
        let known = ledger.shas()?;
        gc::collect(&self.builds_path, &known, retain, events)
    }

    /// Promote `sha` and collect stale builds under the release lock
    pub fn promote_and_collect(
        &self,
        sha: &str,
        ledger: &Ledger,
        events: &dyn EventSink,
    ) -> KeelResult<ReleaseSummary> {
        let _lock = self.lock()?;
        let previous = self.promote(sha, events)?;
        let retain = self.retain_set(ledger)?;
        debug!("Retaining builds: {:?}", retain);
        let gc = self.collect_stale(ledger, &retain, events)?;

        Ok(ReleaseSummary {
            sha: sha.to_string(),
            previous,
            gc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::ledger::Owner;
    use crate::store::Store;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(shas: &[&str]) -> (TempDir, ReleaseManager, Ledger) {
        let dir = TempDir::new().unwrap();
        let builds = dir.path().join("builds");
        for sha in shas {
            std::fs::create_dir_all(builds.join(sha)).unwrap();
        }
        let ledger = Ledger::new(Store::open(&dir.path().join("keel.db")).unwrap());
        (dir, ReleaseManager::new(builds), ledger)
    }

    fn finish(ledger: &Ledger, sha: &str, group: PhaseGroup) {
        let owner = Owner::current("tester");
        ledger.claim(sha, group, "main", &owner).unwrap();
        ledger
            .complete(sha, group, &owner, ClaimStatus::Succeeded)
            .unwrap();
        // Orders finish timestamps
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    fn build(ledger: &Ledger, sha: &str) {
        finish(ledger, sha, PhaseGroup::Build);
    }

    fn release(ledger: &Ledger, sha: &str) {
        finish(ledger, sha, PhaseGroup::Release);
    }

    #[test]
    fn promote_requires_build_directory() {
        let (_dir, manager, _ledger) = setup(&[]);
        std::fs::create_dir_all(manager.builds_path()).unwrap();
        let err = manager.promote("missing", &MemorySink::new()).unwrap_err();
        assert!(matches!(err, KeelError::Release(_)));
        assert_eq!(manager.current().unwrap(), None);
    }

    #[test]
    fn promote_and_collect_keeps_live_and_in_flight() {
        let (_dir, manager, ledger) = setup(&["old", "busy", "new"]);
        build(&ledger, "old");
        release(&ledger, "old");
        build(&ledger, "new");
        let busy_owner = Owner::current("other");
        ledger
            .claim("busy", PhaseGroup::Build, "feature", &busy_owner)
            .unwrap();

        let events = MemorySink::new();
        manager.promote("old", &events).unwrap();
        let summary = manager.promote_and_collect("new", &ledger, &events).unwrap();

        assert_eq!(summary.previous.as_deref(), Some("old"));
        assert_eq!(manager.current().unwrap().as_deref(), Some("new"));
        assert!(manager.build_path("new").is_dir());
        assert!(manager.build_path("busy").is_dir());
        assert!(!manager.build_path("old").exists());
        assert_eq!(summary.gc.removed, vec![manager.build_path("old")]);
    }

    #[test]
    fn keep_builds_retains_recent_releases() {
        let (_dir, manager, ledger) = setup(&["r1", "r2", "r3"]);
        let manager = manager.with_keep_builds(1);
        let events = MemorySink::new();

        build(&ledger, "r1");
        release(&ledger, "r1");
        build(&ledger, "r2");
        release(&ledger, "r2");
        manager.promote_and_collect("r2", &ledger, &events).unwrap();
        assert!(manager.build_path("r1").exists());

        build(&ledger, "r3");
        release(&ledger, "r3");
        manager.promote_and_collect("r3", &ledger, &events).unwrap();

        assert!(manager.build_path("r3").is_dir());
        assert!(manager.build_path("r2").is_dir());
        assert!(!manager.build_path("r1").exists());
    }

    #[test]
    fn newer_unreleased_build_survives_release_of_older_one() {
        let (_dir, manager, ledger) = setup(&["prev", "main", "next", "stale"]);
        let events = MemorySink::new();

        build(&ledger, "stale");
        build(&ledger, "prev");
        release(&ledger, "prev");
        manager.promote_and_collect("prev", &ledger, &events).unwrap();
        assert!(manager.build_path("stale").is_dir());

        // next finished before main, but after the previous release
        build(&ledger, "next");
        build(&ledger, "main");
        release(&ledger, "main");
        manager.promote_and_collect("main", &ledger, &events).unwrap();

        assert!(manager.build_path("next").is_dir());
        assert!(!manager.build_path("stale").exists());
        assert!(!manager.build_path("prev").exists());

        // Releasing the newer build later still works
        release(&ledger, "next");
        let summary = manager.promote_and_collect("next", &ledger, &events).unwrap();
        assert_eq!(summary.previous.as_deref(), Some("main"));
        assert!(!manager.build_path("main").exists());
    }

    #[test]
    fn collection_ignores_directories_keel_did_not_create() {
        let (_dir, manager, ledger) = setup(&["live", "shared-media"]);
        std::fs::write(manager.build_path("shared-media").join("logo.png"), "png").unwrap();
        build(&ledger, "live");
        release(&ledger, "live");

        let summary = manager
            .promote_and_collect("live", &ledger, &MemorySink::new())
            .unwrap();

        assert!(summary.gc.removed.is_empty());
        assert!(manager.build_path("shared-media").join("logo.png").exists());
    }

    #[test]
    fn concurrent_reader_never_sees_missing_pointer() {
        let (_dir, manager, _ledger) = setup(&["aaa", "bbb"]);
        let events = MemorySink::new();
        manager.promote("aaa", &events).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let manager = manager.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut reads = 0usize;
                loop {
                    let current = manager.current().unwrap();
                    assert!(matches!(current.as_deref(), Some("aaa") | Some("bbb")));
                    reads += 1;
                    if stop.load(Ordering::Relaxed) {
                        return reads;
                    }
                }
            })
        };

        for i in 0..200 {
            let sha = if i % 2 == 0 { "bbb" } else { "aaa" };
            manager.promote(sha, &events).unwrap();
        }
        stop.store(true, Ordering::Relaxed);

        assert!(reader.join().unwrap() > 0);
    }
}
