//! Durable record of in-flight file reads, so a crashed process doesn't
//! lose messages it had moved into its temp folder but never committed.
//!
//! One journal file per manager instance, named `<manager_id>.transactionlog`
//! under the bookkeeping directory, holding a `tmp_path -> original_path`
//! JSON map. A background thread also scans for journal files left behind
//! by manager instances that died without calling [`TransactionJournal::rollback_all`],
//! and rolls those back too.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::FsDeviceError;

/// A journal stale enough to roll back must not have been touched for
/// this many multiples of the manager's own flush interval — otherwise a
/// live manager's journal could be stolen out from under it.
const STALENESS_MULTIPLE: u32 = 3;

pub struct TransactionJournal {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl TransactionJournal {
    /// Loads a journal from `path`, or starts empty if it doesn't exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, FsDeviceError> {
        let path = path.into();
        let entries = if path.exists() {
            let data = fs::read(&path).map_err(|e| FsDeviceError::Io {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_slice(&data).map_err(|e| FsDeviceError::Journal(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(TransactionJournal {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_transaction(&self, tmp_path: &str, org_path: &str) {
        self.entries
            .lock()
            .expect("journal lock poisoned")
            .insert(tmp_path.to_owned(), org_path.to_owned());
        if let Err(e) = self.write_log() {
            tracing::warn!(error = %e, "could not persist transaction journal");
        }
    }

    pub fn remove_transaction(&self, tmp_path: &str) {
        self.entries.lock().expect("journal lock poisoned").remove(tmp_path);
        if let Err(e) = self.write_log() {
            tracing::warn!(error = %e, "could not persist transaction journal");
        }
    }

    pub fn write_log(&self) -> Result<(), FsDeviceError> {
        let entries = self.entries.lock().expect("journal lock poisoned");
        if entries.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) | Err(_) => {}
            }
            return Ok(());
        }
        let data = serde_json::to_vec(&*entries).map_err(|e| FsDeviceError::Journal(e.to_string()))?;
        fs::write(&self.path, data).map_err(|e| FsDeviceError::Io {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Rolls back every entry still in the journal using `rollback`, then
    /// clears the journal. Used both on graceful manager shutdown and
    /// when [`scan_and_rollback_stale`] recovers an abandoned journal.
    pub fn rollback_all(&self, rollback: impl Fn(&str, &str)) {
        let entries = std::mem::take(&mut *self.entries.lock().expect("journal lock poisoned"));
        for (tmp_path, org_path) in &entries {
            rollback(tmp_path, org_path);
        }
        if let Err(e) = self.write_log() {
            tracing::warn!(error = %e, "could not persist transaction journal after rollback");
        }
    }
}

/// Scans `bookkeeping_dir` for `*.transactionlog` files whose last
/// modification is older than `refresh_interval * 3`, steals each with a
/// rename (so a concurrent scanner from another process loses the race
/// harmlessly), and rolls it back.
pub fn scan_and_rollback_stale(
    bookkeeping_dir: &Path,
    refresh_interval: Duration,
    rollback: impl Fn(&str, &str) + Clone,
) {
    let staleness = refresh_interval * STALENESS_MULTIPLE;
    let Ok(entries) = fs::read_dir(bookkeeping_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("transactionlog") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = modified.elapsed() else { continue };
        if age < staleness {
            continue;
        }

        let stolen_path = path.with_extension(format!(
            "transactionlog.rolling_back.{}",
            uuid::Uuid::new_v4().simple()
        ));
        if fs::rename(&path, &stolen_path).is_err() {
            continue; // another process/thread got to it first
        }

        match TransactionJournal::load(&stolen_path) {
            Ok(journal) => journal.rollback_all(rollback.clone()),
            Err(e) => tracing::error!(error = %e, path = %stolen_path.display(), "could not load stale transaction journal"),
        }
        let _ = fs::remove_file(&stolen_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_clears_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.transactionlog");
        let journal = TransactionJournal::load(&path).unwrap();

        journal.add_transaction("tmp/a", "org/a");
        assert!(path.exists());

        journal.remove_transaction("tmp/a");
        assert!(!path.exists());
    }

    #[test]
    fn rollback_all_invokes_callback_for_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.transactionlog");
        let journal = TransactionJournal::load(&path).unwrap();
        journal.add_transaction("tmp/a", "org/a");
        journal.add_transaction("tmp/b", "org/b");

        let seen = Mutex::new(Vec::new());
        journal.rollback_all(|tmp, org| seen.lock().unwrap().push((tmp.to_owned(), org.to_owned())));

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn reloading_journal_from_disk_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.transactionlog");
        {
            let journal = TransactionJournal::load(&path).unwrap();
            journal.add_transaction("tmp/a", "org/a");
        }

        let reloaded = TransactionJournal::load(&path).unwrap();
        let seen = Mutex::new(Vec::new());
        reloaded.rollback_all(|tmp, org| seen.lock().unwrap().push((tmp.to_owned(), org.to_owned())));
        assert_eq!(seen.into_inner().unwrap(), vec![("tmp/a".to_owned(), "org/a".to_owned())]);
    }
}
