//! File-system backed output device: writes messages into a directory of files.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use runtime_core::{device_header_keys, MessageBundle, OutputDevice, OutputDeviceError, OutputDeviceManager};

use crate::manager::FsLayout;
use crate::serializer::{FileSystemSerializer, ZipFileSystemSerializer};

fn to_send_err(name: &str, e: impl std::error::Error + Send + Sync + 'static) -> OutputDeviceError {
    OutputDeviceError::SendFailed {
        device: name.to_owned(),
        source: Box::new(e),
    }
}

/// Moves `src` to `dest`, falling back to copy-then-delete when a plain
/// rename fails (e.g. the tmp and queue directories live on different
/// filesystems).
fn move_file(src: &std::path::Path, dest: &std::path::Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dest)?;
            fs::remove_file(src)?;
            Ok(())
        }
    }
}

#[cfg(unix)]
fn make_world_writable(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn make_world_writable(_path: &std::path::Path) -> io::Result<()> {
    Ok(())
}

/// Manages [`FileSystemOutputDevice`]s rooted at a shared [`FsLayout`].
pub struct FileSystemOutputDeviceManager {
    layout: FsLayout,
    serializer: Arc<dyn FileSystemSerializer>,
    filename_format: Option<String>,
}

impl FileSystemOutputDeviceManager {
    pub fn new(root_folder: impl Into<PathBuf>) -> Self {
        FileSystemOutputDeviceManager {
            layout: FsLayout::new(root_folder),
            serializer: Arc::new(ZipFileSystemSerializer),
            filename_format: None,
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn FileSystemSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// When set, output filenames are generated as `{message-id}` using
    /// the `MESSAGE_ID` device header, falling back to a random id when
    /// the header is absent.
    pub fn with_message_id_filenames(mut self) -> Self {
        self.filename_format = Some("message-id".to_owned());
        self
    }

    pub fn layout(&self) -> &FsLayout {
        &self.layout
    }
}

impl OutputDeviceManager for FileSystemOutputDeviceManager {
    type Device = FileSystemOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.layout.create_all().map_err(|e| OutputDeviceError::NotConnected {
            device: format!("filesystem-manager: {e}"),
        })
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        Ok(())
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let output_folder = self
            .layout
            .create_queue_dir(name)
            .map_err(|e| to_send_err(name, e))?;
        Ok(FileSystemOutputDevice {
            name: name.to_owned(),
            tmp_folder: self.layout.tmp.clone(),
            output_folder,
            serializer: self.serializer.clone(),
            use_message_id_filenames: self.filename_format.is_some(),
        })
    }
}

pub struct FileSystemOutputDevice {
    name: String,
    tmp_folder: PathBuf,
    output_folder: PathBuf,
    serializer: Arc<dyn FileSystemSerializer>,
    use_message_id_filenames: bool,
}

impl OutputDevice for FileSystemOutputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, mut bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        let message_id = bundle
            .device_headers
            .get(device_header_keys::MESSAGE_ID)
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        let filename = match (&message_id, self.use_message_id_filenames) {
            (Some(id), true) => format!("{id}.SBM"),
            (Some(id), false) => format!("{id}-{}.SBM", uuid::Uuid::new_v4().simple()),
            (None, _) => format!("{}.SBM", uuid::Uuid::new_v4().simple()),
        };

        let tmp_path = self.tmp_folder.join(&filename);
        let encoded = self
            .serializer
            .serialize(&mut bundle.message)
            .map_err(|e| to_send_err(&self.name, e))?;
        fs::write(&tmp_path, &encoded).map_err(|e| to_send_err(&self.name, e))?;
        make_world_writable(&tmp_path).map_err(|e| to_send_err(&self.name, e))?;

        let final_path = self.output_folder.join(&filename);
        move_file(&tmp_path, &final_path).map_err(|e| to_send_err(&self.name, e))?;

        tracing::debug!(path = %final_path.display(), device = %self.name, "wrote message to filesystem queue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{DeviceHeaders, Message};

    #[test]
    fn send_writes_a_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileSystemOutputDeviceManager::new(dir.path());
        manager.connect().unwrap();
        let mut device = manager.get_output_device("q").unwrap();

        let bundle = MessageBundle::new(Message::from_bytes(b"payload".to_vec()), DeviceHeaders::new());
        device.send(bundle).unwrap();

        let entries: Vec<_> = fs::read_dir(manager.layout().queue_dir("q")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn message_id_header_becomes_filename_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileSystemOutputDeviceManager::new(dir.path()).with_message_id_filenames();
        manager.connect().unwrap();
        let mut device = manager.get_output_device("q").unwrap();

        let mut headers = DeviceHeaders::new();
        headers.insert(device_header_keys::MESSAGE_ID, "abc123");
        let bundle = MessageBundle::new(Message::from_bytes(b"payload".to_vec()), headers);
        device.send(bundle).unwrap();

        let entries: Vec<_> = fs::read_dir(manager.layout().queue_dir("q")).unwrap().collect();
        let name = entries[0].as_ref().unwrap().file_name();
        assert_eq!(name.to_str().unwrap(), "abc123.SBM");
    }
}
