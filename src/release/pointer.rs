//! The `latest` symlink

use crate::error::{KeelError, KeelResult};
use std::path::{Path, PathBuf};
use tracing::debug;

pub(crate) const POINTER_NAME: &str = "latest";

pub(crate) fn pointer_path(builds_path: &Path) -> PathBuf {
    builds_path.join(POINTER_NAME)
}

/// Sha the pointer currently names, if the pointer exists
pub(crate) fn read(builds_path: &Path) -> KeelResult<Option<String>> {
    let pointer = pointer_path(builds_path);
    match std::fs::read_link(&pointer) {
        Ok(target) => {
            let sha = target
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    KeelError::Release(format!(
                        "{} points at unexpected target {}",
                        pointer.display(),
                        target.display()
                    ))
                })?;
            Ok(Some(sha.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeelError::io(format!("reading {}", pointer.display()), e)),
    }
}

/// Repoint `latest` at `<builds_path>/<sha>` with a single rename
///
/// A temporary link is created beside the pointer and renamed over it, so a
/// reader sees either the old or the new target and never a missing link.
pub(crate) fn swap(builds_path: &Path, sha: &str) -> KeelResult<()> {
    let pointer = pointer_path(builds_path);
    let tmp = builds_path.join(format!(".{}.tmp-{}", POINTER_NAME, uuid::Uuid::new_v4()));

    // Relative target keeps the link valid if the builds directory moves
    symlink_dir(Path::new(sha), &tmp)
        .map_err(|e| KeelError::io(format!("creating {}", tmp.display()), e))?;

    if let Err(e) = std::fs::rename(&tmp, &pointer) {
        let _ = std::fs::remove_file(&tmp);
        return Err(KeelError::Release(format!(
            "replacing {}: {}",
            pointer.display(),
            e
        )));
    }
    debug!("{} -> {}", pointer.display(), sha);
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_pointer_reads_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read(dir.path()).unwrap(), None);
    }

    #[test]
    fn swap_replaces_existing_pointer() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("aaa")).unwrap();
        std::fs::create_dir(dir.path().join("bbb")).unwrap();

        swap(dir.path(), "aaa").unwrap();
        assert_eq!(read(dir.path()).unwrap().as_deref(), Some("aaa"));

        swap(dir.path(), "bbb").unwrap();
        assert_eq!(read(dir.path()).unwrap().as_deref(), Some("bbb"));
        assert!(pointer_path(dir.path()).join(".").is_dir());

        // No temporary links left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn swap_over_real_directory_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("aaa")).unwrap();
        std::fs::create_dir(dir.path().join(POINTER_NAME)).unwrap();
        std::fs::write(dir.path().join(POINTER_NAME).join("keep"), "x").unwrap();

        let err = swap(dir.path(), "aaa").unwrap_err();
        assert!(matches!(err, KeelError::Release(_)));
    }
}
