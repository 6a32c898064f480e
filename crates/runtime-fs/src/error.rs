//! Error type for the file-system queue.

use std::io;
use std::path::PathBuf;

/// Error surfaced by the file-system device manager, its devices, and the
/// transaction journal.
#[derive(Debug)]
pub enum FsDeviceError {
    Io { path: PathBuf, source: io::Error },
    CreateDirectories(io::Error),
    Serialize(String),
    Deserialize(String),
    Journal(String),
}

impl std::fmt::Display for FsDeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsDeviceError::Io { path, source } => write!(f, "io error at {}: {}", path.display(), source),
            FsDeviceError::CreateDirectories(e) => write!(f, "error creating directories: {e}"),
            FsDeviceError::Serialize(s) => write!(f, "error serializing message: {s}"),
            FsDeviceError::Deserialize(s) => write!(f, "error deserializing message: {s}"),
            FsDeviceError::Journal(s) => write!(f, "transaction journal error: {s}"),
        }
    }
}

impl std::error::Error for FsDeviceError {}
