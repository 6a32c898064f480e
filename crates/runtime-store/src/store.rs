//! Content-addressed storage for message payloads too large to pass through
//! a queue transport directly.
//!
//! # A hypothetical `S3MessageStore`
//!
//! Object storage is deliberately not implemented here, but any
//! `MessageStore` backed by S3 (or another blob store) must honor the
//! same wire contract as [`FileSystemMessageStore`]: a key opaque to
//! callers, returned from [`MessageStore::put`] and round-tripped through
//! [`MessageStore::read`]/[`MessageStore::delete`] unchanged. Such a
//! store's `put` would typically record a small JSON pointer as the key,
//! e.g.:
//!
//! ```json
//! {"bucket": "my-bucket", "object_key": "2026/07/26/9c1b...-a41f.FSMS"}
//! ```
//!
//! so `magic || key_json` stays a self-describing envelope (see the
//! wrapper devices in [`crate::wrapper`]) without this crate depending on
//! an AWS SDK.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use runtime_core::Message;
use runtime_fs::{FileSystemSerializer, ZipFileSystemSerializer};

use crate::error::MessageStoreError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const FILE_EXTENSION: &str = "FSMS";

/// Puts, reads, and deletes message payloads by an opaque key.
pub trait MessageStore: Send + Sync {
    /// A constant byte prefix unique to this store implementation, used
    /// by the store wrapper devices to recognize a key envelope.
    fn magic(&self) -> &'static [u8];

    fn put_message(&self, device_name: &str, message: &mut Message) -> Result<String, MessageStoreError>;
    fn read_message(&self, key: &str) -> Result<Message, MessageStoreError>;
    fn delete_message(&self, key: &str) -> Result<(), MessageStoreError>;

    /// Deletes several messages, collecting (not stopping at) failures.
    fn delete_messages(&self, keys: &[String]) -> Result<(), MessageStoreError> {
        let mut failed = 0;
        for key in keys {
            if let Err(e) = self.delete_message(key) {
                tracing::warn!(error = %e, key = %key, "failed to delete message from store");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(MessageStoreError::PartialDelete {
                attempted: keys.len(),
                failed,
            });
        }
        Ok(())
    }
}

/// Stores message payloads as individual files under a root directory,
/// bucketed by date and a random subdirectory to keep any one directory
/// from growing unbounded.
pub struct FileSystemMessageStore {
    root: PathBuf,
    num_subdirs: u32,
    serializer: ZipFileSystemSerializer,
}

impl FileSystemMessageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSystemMessageStore::with_subdir_count(root, 4000)
    }

    pub fn with_subdir_count(root: impl Into<PathBuf>, num_subdirs: u32) -> Self {
        FileSystemMessageStore {
            root: root.into(),
            num_subdirs,
            serializer: ZipFileSystemSerializer,
        }
    }

    pub fn connect(&self) -> Result<(), MessageStoreError> {
        fs::create_dir_all(&self.root).map_err(|e| MessageStoreError::Io {
            path: self.root.clone(),
            source: e,
        })
    }

    fn generate_relative_path(&self) -> String {
        let filename = format!("{}.{FILE_EXTENSION}", uuid::Uuid::new_v4().simple());
        let date = Local::now().format(DATE_FORMAT);
        let bucket = rand::random::<u32>() % self.num_subdirs.max(1);
        format!("{date}-{bucket}/{filename}")
    }

    fn absolute_path(&self, relative: &str) -> Result<PathBuf, MessageStoreError> {
        if relative.contains("..") {
            return Err(MessageStoreError::InvalidKey(relative.to_owned()));
        }
        Ok(self.root.join(relative))
    }

    #[cfg(unix)]
    fn make_world_writable(path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o777))
    }

    #[cfg(not(unix))]
    fn make_world_writable(_path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

const MAGIC: &[u8] = b"__FS_MSGSTORE__";

impl MessageStore for FileSystemMessageStore {
    fn magic(&self) -> &'static [u8] {
        MAGIC
    }

    fn put_message(&self, _device_name: &str, message: &mut Message) -> Result<String, MessageStoreError> {
        let relative = self.generate_relative_path();
        let path = self.absolute_path(&relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MessageStoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let encoded = self
            .serializer
            .serialize(message)
            .map_err(|e| MessageStoreError::Serialize(e.to_string()))?;
        fs::write(&path, &encoded).map_err(|e| MessageStoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        Self::make_world_writable(&path).map_err(|e| MessageStoreError::Io {
            path: path.clone(),
            source: e,
        })?;

        Ok(relative)
    }

    fn read_message(&self, key: &str) -> Result<Message, MessageStoreError> {
        let path = self.absolute_path(key)?;
        let data = fs::read(&path).map_err(|e| MessageStoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.serializer
            .deserialize(&data)
            .map_err(|e| MessageStoreError::Deserialize(e.to_string()))
    }

    fn delete_message(&self, key: &str) -> Result<(), MessageStoreError> {
        let path = self.absolute_path(key)?;
        fs::remove_file(&path).map_err(|e| MessageStoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        if let Some(parent) = path.parent() {
            // Best-effort: only succeeds when this was the last file in the bucket.
            let _ = fs::remove_dir(parent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::Headers;

    #[test]
    fn put_then_read_round_trips_payload_and_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemMessageStore::new(dir.path());
        store.connect().unwrap();

        let mut headers = Headers::new();
        headers.insert("k".to_owned(), serde_json::Value::from("v"));
        let mut message = Message::new(b"payload".to_vec(), headers.clone());

        let key = store.put_message("dev", &mut message).unwrap();
        let read_back = store.read_message(&key).unwrap();
        assert_eq!(read_back.headers(), &headers);
    }

    #[test]
    fn delete_removes_file_and_empty_bucket_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemMessageStore::new(dir.path());
        store.connect().unwrap();

        let mut message = Message::from_bytes(b"x".to_vec());
        let key = store.put_message("dev", &mut message).unwrap();
        let path = store.absolute_path(&key).unwrap();
        assert!(path.exists());

        store.delete_message(&key).unwrap();
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn rejects_keys_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemMessageStore::new(dir.path());
        assert!(store.read_message("../../etc/passwd").is_err());
    }
}
