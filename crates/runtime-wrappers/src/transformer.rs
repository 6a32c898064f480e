//! A device wrapper that transforms message bodies in flight — the seam
//! used for compression, encryption, or any other byte-level codec.

use std::io::{Read, Write};
use std::time::Duration;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use runtime_core::{
    InputDevice, InputDeviceError, InputDeviceManager, Message, MessageBundle, OutputDevice, OutputDeviceError,
    OutputDeviceManager, ReadResult,
};

type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// Transforms message bodies on the way out to, and in from, an inner
/// device. Implementations that don't need connection lifecycle hooks
/// can leave `connect`/`disconnect` as no-ops.
pub trait Transformer: Send + Sync {
    fn connect(&self) {}
    fn disconnect(&self) {}

    fn transform_outgoing(&self, bundle: MessageBundle) -> Result<MessageBundle, TransformError>;
    fn transform_incoming(&self, result: ReadResult) -> Result<ReadResult, TransformError>;
}

pub struct TransformerOutputDevice<T> {
    inner: Box<dyn OutputDevice>,
    transformer: std::sync::Arc<T>,
}

impl<T: Transformer> TransformerOutputDevice<T> {
    pub fn new(inner: Box<dyn OutputDevice>, transformer: std::sync::Arc<T>) -> Self {
        TransformerOutputDevice { inner, transformer }
    }
}

impl<T: Transformer> OutputDevice for TransformerOutputDevice<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        let bundle = self
            .transformer
            .transform_outgoing(bundle)
            .map_err(|e| OutputDeviceError::SendFailed {
                device: self.inner.name().to_owned(),
                source: e,
            })?;
        self.inner.send(bundle)
    }
}

pub struct TransformerOutputDeviceManager<M, T> {
    inner: M,
    transformer: std::sync::Arc<T>,
}

impl<M, T> TransformerOutputDeviceManager<M, T> {
    pub fn new(inner: M, transformer: std::sync::Arc<T>) -> Self {
        TransformerOutputDeviceManager { inner, transformer }
    }
}

impl<M, T> OutputDeviceManager for TransformerOutputDeviceManager<M, T>
where
    M: OutputDeviceManager,
    M::Device: 'static,
    T: Transformer + 'static,
{
    type Device = TransformerOutputDevice<T>;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.transformer.connect();
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        let result = self.inner.disconnect();
        self.transformer.disconnect();
        result
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let device = self.inner.get_output_device(name)?;
        Ok(TransformerOutputDevice::new(Box::new(device), std::sync::Arc::clone(&self.transformer)))
    }
}

pub struct TransformerInputDevice<T> {
    inner: Box<dyn InputDevice>,
    transformer: std::sync::Arc<T>,
}

impl<T: Transformer> TransformerInputDevice<T> {
    pub fn new(inner: Box<dyn InputDevice>, transformer: std::sync::Arc<T>) -> Self {
        TransformerInputDevice { inner, transformer }
    }
}

impl<T: Transformer> InputDevice for TransformerInputDevice<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        let result = self.inner.read(timeout, with_transaction)?;
        if result.bundle.is_none() {
            return Ok(result);
        }
        self.transformer
            .transform_incoming(result)
            .map_err(|e| InputDeviceError::ReadFailed {
                device: self.inner.name().to_owned(),
                source: e,
            })
    }
}

pub struct TransformerInputDeviceManager<M, T> {
    inner: M,
    transformer: std::sync::Arc<T>,
}

impl<M, T> TransformerInputDeviceManager<M, T> {
    pub fn new(inner: M, transformer: std::sync::Arc<T>) -> Self {
        TransformerInputDeviceManager { inner, transformer }
    }
}

impl<M, T> InputDeviceManager for TransformerInputDeviceManager<M, T>
where
    M: InputDeviceManager,
    M::Device: 'static,
    T: Transformer + 'static,
{
    type Device = TransformerInputDevice<T>;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        self.transformer.connect();
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        let result = self.inner.disconnect();
        self.transformer.disconnect();
        result
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        let device = self.inner.get_input_device(name)?;
        Ok(TransformerInputDevice::new(Box::new(device), std::sync::Arc::clone(&self.transformer)))
    }
}

/// Compresses outgoing bodies with zlib, decompresses on the way in.
/// A body that doesn't start with the magic prefix is passed through
/// unchanged, so a `ZlibTransformer` can sit in front of devices that
/// also carry uncompressed traffic.
pub struct ZlibTransformer {
    level: Compression,
}

pub const ZLIB_TRANSFORMER_MAGIC: &[u8] = b"__ZLIBTRANSFORMER__";

impl ZlibTransformer {
    pub fn new(level: u32) -> Self {
        ZlibTransformer {
            level: Compression::new(level),
        }
    }
}

impl Default for ZlibTransformer {
    fn default() -> Self {
        ZlibTransformer::new(Compression::default().level())
    }
}

impl Transformer for ZlibTransformer {
    fn transform_outgoing(&self, mut bundle: MessageBundle) -> Result<MessageBundle, TransformError> {
        let payload = bundle.message.bytes();
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(&payload)?;
        let mut compressed = encoder.finish()?;

        let mut body = ZLIB_TRANSFORMER_MAGIC.to_vec();
        body.append(&mut compressed);

        let headers = bundle.message.headers().clone();
        bundle.message = Message::new(body, headers);
        Ok(bundle)
    }

    fn transform_incoming(&self, mut result: ReadResult) -> Result<ReadResult, TransformError> {
        let Some(mut bundle) = result.bundle.take() else {
            return Ok(result);
        };

        let payload = bundle.message.bytes();
        let Some(compressed) = payload.strip_prefix(ZLIB_TRANSFORMER_MAGIC) else {
            result.bundle = Some(bundle);
            return Ok(result);
        };

        let mut decoder = ZlibDecoder::new(compressed);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;

        let headers = bundle.message.headers().clone();
        bundle.message = Message::new(decompressed, headers);
        result.bundle = Some(bundle);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::DeviceHeaders;
    use runtime_memdevice::InMemoryInputDevice;
    use std::sync::Arc;

    #[test]
    fn compressed_round_trip_yields_original_bytes() {
        let transformer = Arc::new(ZlibTransformer::default());
        let (input, output) = InMemoryInputDevice::standalone("dev");
        let mut wrapped_out = TransformerOutputDevice::new(Box::new(output), Arc::clone(&transformer));
        let mut wrapped_in = TransformerInputDevice::new(Box::new(input), Arc::clone(&transformer));

        let bundle = MessageBundle::new(
            Message::from_bytes(b"hello hello hello hello".to_vec()),
            DeviceHeaders::new(),
        );
        wrapped_out.send(bundle).unwrap();

        let result = wrapped_in.read(Duration::from_millis(100), false).unwrap();
        let mut bundle = result.bundle.unwrap();
        assert_eq!(bundle.message.bytes(), b"hello hello hello hello");
    }

    #[test]
    fn non_magic_input_passes_through_unchanged() {
        let transformer = Arc::new(ZlibTransformer::default());
        let (input, output) = InMemoryInputDevice::standalone("dev");
        let mut raw_output = output;
        let mut wrapped_in = TransformerInputDevice::new(Box::new(input), transformer);

        raw_output
            .send(MessageBundle::new(Message::from_bytes(b"plain".to_vec()), DeviceHeaders::new()))
            .unwrap();

        let result = wrapped_in.read(Duration::from_millis(100), false).unwrap();
        let mut bundle = result.bundle.unwrap();
        assert_eq!(bundle.message.bytes(), b"plain");
    }
}
