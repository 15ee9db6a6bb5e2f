//! Exclusive lock serializing pointer swaps and garbage collection

use crate::error::{KeelError, KeelResult};
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = ".keel-release.lock";

/// Held for the duration of a promote + collect cycle; released on drop
#[derive(Debug)]
pub struct ReleaseLock {
    _file: File,
    path: PathBuf,
}

impl ReleaseLock {
    pub fn path_for(builds_path: &Path) -> PathBuf {
        builds_path.join(LOCK_FILE)
    }

    fn open(builds_path: &Path) -> KeelResult<(File, PathBuf)> {
        std::fs::create_dir_all(builds_path)
            .map_err(|e| KeelError::io(format!("creating {}", builds_path.display()), e))?;
        let path = Self::path_for(builds_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| KeelError::io(format!("opening {}", path.display()), e))?;
        Ok((file, path))
    }

    /// Block until the lock is held
    pub fn acquire(builds_path: &Path) -> KeelResult<Self> {
        let (file, path) = Self::open(builds_path)?;
        file.lock_exclusive()
            .map_err(|e| KeelError::io(format!("locking {}", path.display()), e))?;
        debug!("Acquired release lock {}", path.display());
        Ok(Self { _file: file, path })
    }

    /// Take the lock only if nobody else holds it
    pub fn try_acquire(builds_path: &Path) -> KeelResult<Option<Self>> {
        let (file, path) = Self::open(builds_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file, path })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(KeelError::io(format!("locking {}", path.display()), err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
