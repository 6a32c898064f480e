//! Shared directory layout for file-system device managers.

use std::fs;
use std::path::PathBuf;

use crate::error::FsDeviceError;

pub const DEFAULT_QUEUES_SUBDIR: &str = "QUEUES";
pub const DEFAULT_TMP_SUBDIR: &str = "TMP";
pub const DEFAULT_BOOKKEEPING_SUBDIR: &str = "BOOKKEEPING";

/// The directory layout every file-system backed manager shares: a
/// `QUEUES/<name>` tree for messages at rest, a `TMP` scratch area for
/// in-flight reads/writes, and a `BOOKKEEPING` area for the transaction
/// journal.
#[derive(Debug, Clone)]
pub struct FsLayout {
    pub root: PathBuf,
    pub queues: PathBuf,
    pub tmp: PathBuf,
    pub bookkeeping: PathBuf,
    pub manager_id: String,
}

impl FsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        FsLayout {
            queues: root.join(DEFAULT_QUEUES_SUBDIR),
            tmp: root.join(DEFAULT_TMP_SUBDIR),
            bookkeeping: root.join(DEFAULT_BOOKKEEPING_SUBDIR),
            manager_id: format!(
                "{}-{}",
                hostname(),
                uuid::Uuid::new_v4().simple()
            ),
            root,
        }
    }

    pub fn queue_dir(&self, name: &str) -> PathBuf {
        self.queues.join(name)
    }

    pub fn create_all(&self) -> Result<(), FsDeviceError> {
        for dir in [&self.queues, &self.tmp, &self.bookkeeping] {
            fs::create_dir_all(dir).map_err(FsDeviceError::CreateDirectories)?;
        }
        Ok(())
    }

    pub fn create_queue_dir(&self, name: &str) -> Result<PathBuf, FsDeviceError> {
        let dir = self.queue_dir(name);
        fs::create_dir_all(&dir).map_err(FsDeviceError::CreateDirectories)?;
        Ok(dir)
    }

    /// Lists the names of queues currently present under [`Self::queues`].
    pub fn available_device_names(&self) -> Result<Vec<String>, FsDeviceError> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.queues).map_err(|e| FsDeviceError::Io {
            path: self.queues.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| FsDeviceError::Io {
                path: self.queues.clone(),
                source: e,
            })?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        Ok(names)
    }
}

fn hostname() -> String {
    hostname_from_env().unwrap_or_else(|| "localhost".to_owned())
}

fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
}
