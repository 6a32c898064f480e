//! A durable, file-system backed message queue: atomic move semantics,
//! poison-message quarantine, and a crash-recoverable transaction journal.

mod atomic;
mod error;
mod input;
mod journal;
mod manager;
mod output;
mod serializer;

pub use error::FsDeviceError;
pub use input::{FileSystemInputDevice, FileSystemInputDeviceManager, Options as InputOptions};
pub use manager::{FsLayout, DEFAULT_BOOKKEEPING_SUBDIR, DEFAULT_QUEUES_SUBDIR, DEFAULT_TMP_SUBDIR};
pub use output::{FileSystemOutputDevice, FileSystemOutputDeviceManager};
pub use serializer::{ConcatFileSystemSerializer, FileSystemSerializer, ZipFileSystemSerializer};
