//! Best-effort atomic move between two paths on the same filesystem, guarded by a lockfile.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A lockfile older than this is assumed abandoned by a crashed process
/// and is stolen rather than respected.
const MAX_LOCKFILE_AGE: Duration = Duration::from_secs(60);

/// Moves `src` to `dest`, taking `lock_path` as an exclusive lock first.
///
/// Returns `Ok(true)` if the move happened, `Ok(false)` if `src` no
/// longer existed (someone else got to it first) or the lock was already
/// held by a live process — both are expected races, not errors. Returns
/// `Err` only for unexpected I/O failures.
pub fn atomic_move(src: &Path, dest: &Path, lock_path: &Path) -> io::Result<bool> {
    let mut lock_path = lock_path.to_path_buf();
    let mut stolen_lock: Option<PathBuf> = None;

    if lock_path.exists() {
        let age = lock_path
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or(Duration::ZERO);
        if age >= MAX_LOCKFILE_AGE {
            let stolen = PathBuf::from(format!("{}.new", lock_path.display()));
            lock_path = stolen.clone();
            stolen_lock = Some(stolen);
        } else {
            return Ok(false);
        }
    }

    let lock_file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    drop(lock_file);

    let result = (|| -> io::Result<bool> {
        if !src.exists() {
            return Ok(false);
        }
        match std::fs::rename(src, dest) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                let _ = std::fs::remove_file(dest);
                Err(e)
            }
        }
    })();

    let _ = std::fs::remove_file(&lock_path);
    if let Some(stolen) = stolen_lock {
        let _ = std::fs::remove_file(stolen);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn moves_file_when_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        let lock = dir.path().join("dest.txt.lockfile");
        fs::write(&src, b"hello").unwrap();

        assert!(atomic_move(&src, &dest, &lock).unwrap());
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert!(!lock.exists());
    }

    #[test]
    fn refuses_when_lock_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        let lock = dir.path().join("dest.txt.lockfile");
        fs::write(&src, b"hello").unwrap();
        fs::write(&lock, b"").unwrap();

        assert!(!atomic_move(&src, &dest, &lock).unwrap());
        assert!(src.exists());
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("missing.txt");
        let dest = dir.path().join("dest.txt");
        let lock = dir.path().join("dest.txt.lockfile");

        assert!(!atomic_move(&src, &dest, &lock).unwrap());
    }
}
