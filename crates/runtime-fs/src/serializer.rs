//! On-disk encodings for a [`Message`].

use std::io::{Cursor, Read, Write};

use runtime_core::{Headers, Message};

use crate::error::FsDeviceError;

/// Converts a [`Message`] to and from the bytes stored in a queue file.
pub trait FileSystemSerializer: Send + Sync {
    fn serialize(&self, message: &mut Message) -> Result<Vec<u8>, FsDeviceError>;
    fn deserialize(&self, data: &[u8]) -> Result<Message, FsDeviceError>;
}

/// The default serializer: a ZIP archive with two entries, `headers`
/// (JSON) and `bytes` (the raw payload). Slightly heavier than the
/// concatenated format but keeps headers and payload independently
/// readable by tools outside this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipFileSystemSerializer;

const HEADERS_ENTRY: &str = "headers";
const BYTES_ENTRY: &str = "bytes";

impl FileSystemSerializer for ZipFileSystemSerializer {
    fn serialize(&self, message: &mut Message) -> Result<Vec<u8>, FsDeviceError> {
        let headers_json =
            serde_json::to_vec(message.headers()).map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
        let payload = message.bytes();

        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer
                .start_file(BYTES_ENTRY, options)
                .map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
            writer
                .write_all(&payload)
                .map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
            writer
                .start_file(HEADERS_ENTRY, options)
                .map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
            writer
                .write_all(&headers_json)
                .map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
            writer.finish().map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
        }
        Ok(buf)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Message, FsDeviceError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|e| FsDeviceError::Deserialize(e.to_string()))?;

        let mut bytes_data = Vec::new();
        archive
            .by_name(BYTES_ENTRY)
            .map_err(|e| FsDeviceError::Deserialize(e.to_string()))?
            .read_to_end(&mut bytes_data)
            .map_err(|e| FsDeviceError::Deserialize(e.to_string()))?;

        let mut headers_data = Vec::new();
        archive
            .by_name(HEADERS_ENTRY)
            .map_err(|e| FsDeviceError::Deserialize(e.to_string()))?
            .read_to_end(&mut headers_data)
            .map_err(|e| FsDeviceError::Deserialize(e.to_string()))?;

        let headers: Headers =
            serde_json::from_slice(&headers_data).map_err(|e| FsDeviceError::Deserialize(e.to_string()))?;

        Ok(Message::new(bytes_data, headers))
    }
}

/// A lighter-weight serializer: one line of JSON-encoded headers,
/// followed by a newline, followed by the raw payload. Pluggable in
/// place of the ZIP default when archive overhead isn't worth it — e.g.
/// very small, very high-throughput queues.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatFileSystemSerializer;

impl FileSystemSerializer for ConcatFileSystemSerializer {
    fn serialize(&self, message: &mut Message) -> Result<Vec<u8>, FsDeviceError> {
        let mut headers_json =
            serde_json::to_vec(message.headers()).map_err(|e| FsDeviceError::Serialize(e.to_string()))?;
        headers_json.push(b'\n');
        headers_json.extend_from_slice(&message.bytes());
        Ok(headers_json)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Message, FsDeviceError> {
        let newline = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| FsDeviceError::Deserialize("missing header line".to_owned()))?;
        let headers: Headers =
            serde_json::from_slice(&data[..newline]).map_err(|e| FsDeviceError::Deserialize(e.to_string()))?;
        Ok(Message::new(data[newline + 1..].to_vec(), headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trips_headers_and_payload() {
        let serializer = ZipFileSystemSerializer;
        let mut headers = Headers::new();
        headers.insert("k".to_owned(), serde_json::Value::from("v"));
        let mut message = Message::new(b"payload".to_vec(), headers.clone());

        let encoded = serializer.serialize(&mut message).unwrap();
        let decoded = serializer.deserialize(&encoded).unwrap();
        assert_eq!(decoded.headers(), &headers);
    }

    #[test]
    fn concat_round_trips_headers_and_payload() {
        let serializer = ConcatFileSystemSerializer;
        let mut headers = Headers::new();
        headers.insert("k".to_owned(), serde_json::Value::from(1));
        let mut message = Message::new(b"payload".to_vec(), headers.clone());

        let encoded = serializer.serialize(&mut message).unwrap();
        let decoded = serializer.deserialize(&encoded).unwrap();
        assert_eq!(decoded.headers(), &headers);
    }
}
