//! Output/input device wrappers that transparently offload large message
//! bodies to a [`MessageStore`] and replace them on the wire with a small
//! key envelope.

use std::sync::Arc;
use std::time::Duration;

use runtime_core::{
    device_header_keys as keys, InputDevice, InputDeviceError, InputDeviceManager, Message, MessageBundle,
    OutputDevice, OutputDeviceError, OutputDeviceManager, ReadResult, Transaction, TransactionState,
};

use crate::store::MessageStore;

/// Prefix shared by every message-store envelope, regardless of which
/// concrete store produced it. Followed immediately by the store's own
/// `magic()` bytes and then the UTF-8 key — no further delimiter, since
/// the store magic has a fixed, known length to the wrapper that wrote it.
pub const WRAPPER_MAGIC: &[u8] = b"__MSGSTORE_WRAPPER__|";

fn build_envelope(store_magic: &[u8], key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(WRAPPER_MAGIC.len() + store_magic.len() + key.len());
    buf.extend_from_slice(WRAPPER_MAGIC);
    buf.extend_from_slice(store_magic);
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// Returns the key if `data` is an envelope for the given store magic.
/// A mismatched store magic (e.g. a chained wrapper belonging to a
/// different store) returns `None` so the payload passes through
/// unchanged rather than being misinterpreted.
fn parse_envelope<'a>(data: &'a [u8], store_magic: &[u8]) -> Option<&'a str> {
    let rest = data.strip_prefix(WRAPPER_MAGIC)?;
    let rest = rest.strip_prefix(store_magic)?;
    std::str::from_utf8(rest).ok()
}

/// Wraps an [`OutputDevice`], offloading any message whose payload
/// exceeds `size_threshold` bytes (or any message at all, if
/// `force_store` is set) into the backing [`MessageStore`] before
/// forwarding a key envelope to the inner device.
pub struct MessageStoreOutputDevice {
    inner: Box<dyn OutputDevice>,
    store: Arc<dyn MessageStore>,
    size_threshold: u64,
    force_store: bool,
}

impl MessageStoreOutputDevice {
    pub fn new(inner: Box<dyn OutputDevice>, store: Arc<dyn MessageStore>, size_threshold: u64) -> Self {
        MessageStoreOutputDevice {
            inner,
            store,
            size_threshold,
            force_store: false,
        }
    }

    pub fn with_force_store(mut self, force_store: bool) -> Self {
        self.force_store = force_store;
        self
    }
}

impl OutputDevice for MessageStoreOutputDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send(&mut self, mut bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        let size = bundle.message.len();
        if !self.force_store && size <= self.size_threshold {
            return self.inner.send(bundle);
        }

        let key = self
            .store
            .put_message(self.inner.name(), &mut bundle.message)
            .map_err(|e| OutputDeviceError::SendFailed {
                device: self.inner.name().to_owned(),
                source: Box::new(e),
            })?;

        let mut headers = bundle.message.headers().clone();
        headers.insert(
            keys::ORIGINAL_MESSAGE_SIZE.to_owned(),
            serde_json::Value::from(size),
        );
        let envelope = build_envelope(self.store.magic(), &key);
        let envelope_bundle = MessageBundle::new(Message::new(envelope, headers), bundle.device_headers);

        if let Err(e) = self.inner.send(envelope_bundle) {
            if let Err(delete_err) = self.store.delete_message(&key) {
                tracing::warn!(
                    error = %delete_err,
                    key = %key,
                    "failed to clean up stored message after a failed send"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

pub struct MessageStoreOutputDeviceManager<M> {
    inner: M,
    store: Arc<dyn MessageStore>,
    size_threshold: u64,
}

impl<M> MessageStoreOutputDeviceManager<M> {
    pub fn new(inner: M, store: Arc<dyn MessageStore>, size_threshold: u64) -> Self {
        MessageStoreOutputDeviceManager {
            inner,
            store,
            size_threshold,
        }
    }
}

impl<M> OutputDeviceManager for MessageStoreOutputDeviceManager<M>
where
    M: OutputDeviceManager,
    M::Device: 'static,
{
    type Device = MessageStoreOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        self.inner.disconnect()
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let device = self.inner.get_output_device(name)?;
        Ok(MessageStoreOutputDevice::new(
            Box::new(device),
            Arc::clone(&self.store),
            self.size_threshold,
        ))
    }
}

/// A read's transaction, extended to also delete the stored object once
/// the inner transaction commits. Rollback touches only the inner
/// device — the stored object is left in place for a future read.
struct MessageStoreTransaction {
    inner: Box<dyn Transaction>,
    store: Arc<dyn MessageStore>,
    key: String,
}

impl Transaction for MessageStoreTransaction {
    fn device_name(&self) -> &str {
        self.inner.device_name()
    }

    fn state(&self) -> TransactionState {
        self.inner.state()
    }

    fn commit(&self) -> Result<(), runtime_core::WrongTransactionStateError> {
        self.inner.commit()?;
        if let Err(e) = self.store.delete_message(&self.key) {
            tracing::warn!(error = %e, key = %self.key, "failed to delete committed message from store");
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), runtime_core::WrongTransactionStateError> {
        self.inner.rollback()
    }
}

/// Wraps an [`InputDevice`], detecting message-store envelopes on read
/// and transparently substituting the stored payload.
pub struct MessageStoreInputDevice {
    inner: Box<dyn InputDevice>,
    store: Arc<dyn MessageStore>,
}

impl MessageStoreInputDevice {
    pub fn new(inner: Box<dyn InputDevice>, store: Arc<dyn MessageStore>) -> Self {
        MessageStoreInputDevice { inner, store }
    }
}

impl InputDevice for MessageStoreInputDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        let result = self.inner.read(timeout, with_transaction)?;
        let Some(mut bundle) = result.bundle else {
            return Ok(result);
        };

        let payload = bundle.message.bytes();
        let Some(key) = parse_envelope(&payload, self.store.magic()) else {
            return Ok(ReadResult::new(bundle, result.transaction));
        };
        let key = key.to_owned();

        let stored = self.store.read_message(&key).map_err(|e| InputDeviceError::ReadFailed {
            device: self.inner.name().to_owned(),
            source: Box::new(e),
        })?;

        let mut merged = stored.headers().clone();
        merged.extend(bundle.message.headers().clone());
        let resolved = Message::new(stored_bytes(stored), merged);
        bundle.message = resolved;

        let transaction: Box<dyn Transaction> = Box::new(MessageStoreTransaction {
            inner: result.transaction,
            store: Arc::clone(&self.store),
            key,
        });
        Ok(ReadResult::new(bundle, transaction))
    }
}

fn stored_bytes(mut message: Message) -> Vec<u8> {
    message.bytes()
}

pub struct MessageStoreInputDeviceManager<M> {
    inner: M,
    store: Arc<dyn MessageStore>,
}

impl<M> MessageStoreInputDeviceManager<M> {
    pub fn new(inner: M, store: Arc<dyn MessageStore>) -> Self {
        MessageStoreInputDeviceManager { inner, store }
    }
}

impl<M> InputDeviceManager for MessageStoreInputDeviceManager<M>
where
    M: InputDeviceManager,
    M::Device: 'static,
{
    type Device = MessageStoreInputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.disconnect()
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        let device = self.inner.get_input_device(name)?;
        Ok(MessageStoreInputDevice::new(Box::new(device), Arc::clone(&self.store)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{DeviceHeaders, Headers};
    use runtime_memdevice::InMemoryInputDevice;
    use std::time::Duration;

    use crate::store::FileSystemMessageStore;

    #[test]
    fn small_message_bypasses_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let concrete = FileSystemMessageStore::new(dir.path());
        concrete.connect().unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(concrete);

        let (input, output) = InMemoryInputDevice::standalone("dev");
        let mut wrapped_out = MessageStoreOutputDevice::new(Box::new(output), Arc::clone(&store), 1024);
        let mut wrapped_in = MessageStoreInputDevice::new(Box::new(input), Arc::clone(&store));

        let bundle = MessageBundle::new(Message::from_bytes(b"tiny".to_vec()), DeviceHeaders::new());
        wrapped_out.send(bundle).unwrap();

        let result = wrapped_in.read(Duration::from_millis(100), true).unwrap();
        let mut bundle = result.bundle.unwrap();
        assert_eq!(bundle.message.bytes(), b"tiny");
    }

    #[test]
    fn large_message_round_trips_through_the_store_and_deletes_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let concrete = FileSystemMessageStore::new(dir.path());
        concrete.connect().unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(concrete);

        let (input, output) = InMemoryInputDevice::standalone("dev");
        let mut wrapped_out = MessageStoreOutputDevice::new(Box::new(output), Arc::clone(&store), 2);
        let mut wrapped_in = MessageStoreInputDevice::new(Box::new(input), Arc::clone(&store));

        let mut headers = Headers::new();
        headers.insert("k".to_owned(), serde_json::Value::from("v"));
        let bundle = MessageBundle::new(Message::new(b"a big payload".to_vec(), headers), DeviceHeaders::new());
        wrapped_out.send(bundle).unwrap();

        let result = wrapped_in.read(Duration::from_millis(100), true).unwrap();
        let mut bundle = result.bundle.unwrap();
        assert_eq!(bundle.message.bytes(), b"a big payload");
        assert_eq!(
            bundle.message.headers().get("k"),
            Some(&serde_json::Value::from("v"))
        );

        result.transaction.commit().unwrap();
    }
}
