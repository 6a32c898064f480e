//! Picks, at startup, between writing output bundles straight to the
//! file-system queue or offloading them through a message store first.
//! An enum rather than a boxed trait object, so the pipeline service can
//! name a concrete `Device` associated type.

use std::sync::Arc;

use runtime_core::{OutputDevice, OutputDeviceError, OutputDeviceManager};
use runtime_fs::{FileSystemOutputDevice, FileSystemOutputDeviceManager};
use runtime_store::{FileSystemMessageStore, MessageStore, MessageStoreOutputDevice, MessageStoreOutputDeviceManager};

use crate::config::StoreConfig;

pub enum DemoOutputManager {
    Plain(FileSystemOutputDeviceManager),
    Stored(MessageStoreOutputDeviceManager<FileSystemOutputDeviceManager>),
}

impl DemoOutputManager {
    pub fn new(queues_root: impl Into<std::path::PathBuf>, store: Option<&StoreConfig>) -> Self {
        let inner = FileSystemOutputDeviceManager::new(queues_root);
        match store {
            None => DemoOutputManager::Plain(inner),
            Some(store) => {
                let backing: Arc<dyn MessageStore> = Arc::new(FileSystemMessageStore::new(store.root.clone()));
                DemoOutputManager::Stored(MessageStoreOutputDeviceManager::new(inner, backing, store.size_threshold_bytes))
            }
        }
    }
}

pub enum DemoOutputDevice {
    Plain(FileSystemOutputDevice),
    Stored(MessageStoreOutputDevice),
}

impl OutputDevice for DemoOutputDevice {
    fn name(&self) -> &str {
        match self {
            DemoOutputDevice::Plain(d) => d.name(),
            DemoOutputDevice::Stored(d) => d.name(),
        }
    }

    fn send(&mut self, bundle: runtime_core::MessageBundle) -> Result<(), OutputDeviceError> {
        match self {
            DemoOutputDevice::Plain(d) => d.send(bundle),
            DemoOutputDevice::Stored(d) => d.send(bundle),
        }
    }
}

impl OutputDeviceManager for DemoOutputManager {
    type Device = DemoOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        match self {
            DemoOutputManager::Plain(m) => m.connect(),
            DemoOutputManager::Stored(m) => m.connect(),
        }
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        match self {
            DemoOutputManager::Plain(m) => m.disconnect(),
            DemoOutputManager::Stored(m) => m.disconnect(),
        }
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        match self {
            DemoOutputManager::Plain(m) => m.get_output_device(name).map(DemoOutputDevice::Plain),
            DemoOutputManager::Stored(m) => m.get_output_device(name).map(DemoOutputDevice::Stored),
        }
    }
}
