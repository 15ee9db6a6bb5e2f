//! Removal of build directories outside the retain set

use crate::error::{KeelError, KeelResult};
use crate::events::{Event, EventSink};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What a collection pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
    pub retained: Vec<PathBuf>,
}

/// Delete every build directory whose name is not in `retain`
///
/// Only real directories directly under `builds_path` named after a sha in
/// `known` are candidates. The pointer, hidden entries, plain files and
/// directories keel never created are left alone. A directory that cannot be
/// removed is reported and skipped.
pub(crate) fn collect(
    builds_path: &Path,
    known: &BTreeSet<String>,
    retain: &BTreeSet<String>,
    events: &dyn EventSink,
) -> KeelResult<GcReport> {
    let mut report = GcReport::default();
    let entries = std::fs::read_dir(builds_path)
        .map_err(|e| KeelError::io(format!("reading {}", builds_path.display()), e))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| KeelError::io(format!("reading {}", builds_path.display()), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| KeelError::io(format!("inspecting {}", entry.path().display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if !file_type.is_dir() || name.starts_with('.') || !known.contains(&name) {
            continue;
        }
        if retain.contains(&name) {
            report.retained.push(entry.path());
        } else {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    for path in candidates {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                events.emit(&Event::StaleRemoved { path: path.clone() });
                report.removed.push(path);
            }
            Err(e) => {
                let reason = e.to_string();
                events.emit(&Event::StaleSkipped {
                    path: path.clone(),
                    reason: reason.clone(),
                });
                report.skipped.push((path, reason));
            }
        }
    }

    report.retained.sort();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use tempfile::TempDir;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn removes_only_unretained_directories() {
        let dir = TempDir::new().unwrap();
        for name in ["aaa", "bbb", "ccc", ".hidden"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("bbb", dir.path().join("latest")).unwrap();

        let known = set(&["aaa", "bbb", "ccc"]);
        let events = MemorySink::new();
        let report = collect(dir.path(), &known, &set(&["bbb"]), &events).unwrap();

        assert_eq!(
            report.removed,
            vec![dir.path().join("aaa"), dir.path().join("ccc")]
        );
        assert_eq!(report.retained, vec![dir.path().join("bbb")]);
        assert!(dir.path().join("bbb").is_dir());
        assert!(dir.path().join(".hidden").is_dir());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(events.events().len(), 2);
    }

    #[test]
    fn directories_without_ledger_entries_survive() {
        let dir = TempDir::new().unwrap();
        for name in ["aaa", "shared-media", "uploads"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("shared-media/avatar.png"), "png").unwrap();

        let report = collect(dir.path(), &set(&["aaa"]), &BTreeSet::new(), &MemorySink::new())
            .unwrap();

        assert_eq!(report.removed, vec![dir.path().join("aaa")]);
        assert!(dir.path().join("shared-media/avatar.png").exists());
        assert!(dir.path().join("uploads").is_dir());
    }

    #[test]
    fn empty_builds_path_is_noop() {
        let dir = TempDir::new().unwrap();
        let report = collect(
            dir.path(),
            &BTreeSet::new(),
            &BTreeSet::new(),
            &MemorySink::new(),
        )
        .unwrap();
        assert_eq!(report, GcReport::default());
    }
}
