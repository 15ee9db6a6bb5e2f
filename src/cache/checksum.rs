//! Content checksums for cache keys
//!
//! Plugins hash the inputs of an expensive step (templates, requirement
//! files, asset sources) and skip the step when the stored checksum matches.

use crate::error::{KeelError, KeelResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// SHA-256 of a file's contents as lowercase hex
pub fn checksum_file(path: &Path) -> KeelResult<String> {
    let contents = fs::read(path)
        .map_err(|e| KeelError::io(format!("reading {} for checksum", path.display()), e))?;
    Ok(checksum_bytes(&contents))
}

/// SHA-256 of a byte slice as lowercase hex
pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Combined checksum over several files
///
/// Paths are sorted first so argument order does not matter, and each path
/// is mixed into the digest so renaming a file changes the checksum.
pub fn checksum_paths(paths: &[PathBuf]) -> KeelResult<String> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for path in sorted {
        let contents = fs::read(path)
            .map_err(|e| KeelError::io(format!("reading {} for checksum", path.display()), e))?;
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(&contents);
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn checksum_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.service");
        fs::write(&path, b"[Unit]\nDescription=app\n").unwrap();

        let first = checksum_file(&path).unwrap();
        let second = checksum_file(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn checksum_known_value() {
        assert_eq!(
            checksum_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn checksum_paths_ignores_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "one").unwrap();
        fs::write(&b, "two").unwrap();

        let forward = checksum_paths(&[a.clone(), b.clone()]).unwrap();
        let backward = checksum_paths(&[b.clone(), a.clone()]).unwrap();
        assert_eq!(forward, backward);

        fs::write(&b, "three").unwrap();
        assert_ne!(forward, checksum_paths(&[a, b]).unwrap());
    }

    #[test]
    fn checksum_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(checksum_file(&dir.path().join("absent")).is_err());
    }
}
