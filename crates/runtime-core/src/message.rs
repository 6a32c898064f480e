//! The message envelope exchanged between devices and handlers.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// The value type for both user headers and device headers.
///
/// Headers carry arbitrary JSON-shaped metadata (filenames, priorities,
/// timestamps, sizes, …) so `serde_json::Value` is reused rather than
/// inventing a narrower enum.
pub type HeaderValue = serde_json::Value;

/// A string-keyed header map. Used both for [`Message`] user headers and
/// for device headers on a [`crate::bundle::MessageBundle`] — the two
/// namespaces never mix.
pub type Headers = BTreeMap<String, HeaderValue>;

/// The basic unit read from, or sent to, a device: a seekable byte stream
/// plus a user headers map.
///
/// Equality compares full byte content and headers; copying resets the
/// stream position to zero on the copy, leaving the original untouched.
#[derive(Debug, Clone)]
pub struct Message {
    stream: Cursor<Vec<u8>>,
    headers: Headers,
}

impl Message {
    /// Builds a message from owned bytes and a headers map.
    pub fn new(data: impl Into<Vec<u8>>, headers: Headers) -> Self {
        Message {
            stream: Cursor::new(data.into()),
            headers,
        }
    }

    /// Builds a message with empty headers.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Message::new(data, Headers::new())
    }

    /// Read-only access to the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The full payload, read from the current stream position to the
    /// end, then restoring the original position.
    pub fn bytes(&mut self) -> Vec<u8> {
        let pos = self.stream.position();
        let mut buf = Vec::new();
        self.stream
            .read_to_end(&mut buf)
            .expect("reading from an in-memory Cursor never fails");
        self.stream
            .seek(SeekFrom::Start(pos))
            .expect("seeking an in-memory Cursor never fails");
        buf
    }

    /// Direct access to the underlying seekable stream.
    pub fn stream_mut(&mut self) -> &mut Cursor<Vec<u8>> {
        &mut self.stream
    }

    /// The payload length in bytes, independent of the current position.
    pub fn len(&self) -> u64 {
        self.stream.get_ref().len() as u64
    }

    /// `true` when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.stream.get_ref().is_empty()
    }

    /// Duplicates the message: bytes are copied and the copy's stream
    /// position is reset to zero; headers are cloned unless `new_headers`
    /// is given.
    pub fn copy(&self, new_headers: Option<Headers>) -> Self {
        Message {
            stream: Cursor::new(self.stream.get_ref().clone()),
            headers: new_headers.unwrap_or_else(|| self.headers.clone()),
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.stream.get_ref() == other.stream.get_ref() && self.headers == other.headers
    }
}

impl Eq for Message {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_restores_position() {
        let mut msg = Message::from_bytes(b"hello".to_vec());
        msg.stream_mut().seek(SeekFrom::Start(2)).unwrap();
        assert_eq!(msg.bytes(), b"hello");
        assert_eq!(msg.stream_mut().position(), 2);
    }

    #[test]
    fn copy_resets_position_and_preserves_headers() {
        let mut headers = Headers::new();
        headers.insert("k".to_owned(), HeaderValue::from("v"));
        let mut msg = Message::new(b"abc".to_vec(), headers);
        msg.stream_mut().seek(SeekFrom::Start(1)).unwrap();

        let copy = msg.copy(None);
        assert_eq!(copy.headers().get("k"), Some(&HeaderValue::from("v")));
        assert_eq!(copy, msg.copy(None));
    }

    #[test]
    fn equality_compares_bytes_and_headers() {
        let a = Message::from_bytes(b"x".to_vec());
        let b = Message::from_bytes(b"y".to_vec());
        assert_ne!(a, b);
    }
}
