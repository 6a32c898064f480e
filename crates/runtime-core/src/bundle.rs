//! Device-side metadata attached to a [`Message`] as it moves through a device.

use crate::message::{Headers, Message};

/// Transport metadata describing where a [`Message`] came from (or is
/// going to): device name, original filename, priority, and similar
/// fields that must never leak into the payload itself.
///
/// Shares the [`Headers`] map shape with [`Message`] but is a disjoint
/// namespace — a device reads and writes `DeviceHeaders`, a handler reads
/// and writes the message's own headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceHeaders(Headers);

/// Well-known device header keys.
pub mod keys {
    pub const INPUT_DEVICE_NAME: &str = "INPUT_DEVICE_NAME";
    pub const MESSAGE_ID: &str = "MESSAGE_ID";
    pub const PRIORITY: &str = "PRIORITY";
    pub const FILENAME: &str = "FILENAME";
    pub const ORIGINAL_MESSAGE_SIZE: &str = "__ORIGINAL_MESSAGE_SIZE_HEADER__";
}

impl DeviceHeaders {
    pub fn new() -> Self {
        DeviceHeaders::default()
    }

    pub fn get(&self, key: &str) -> Option<&crate::message::HeaderValue> {
        self.0.get(key)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<crate::message::HeaderValue>,
    ) {
        self.0.insert(key.into(), value.into());
    }

    pub fn device_name(&self) -> Option<&str> {
        self.get(keys::INPUT_DEVICE_NAME).and_then(|v| v.as_str())
    }

    pub fn as_map(&self) -> &Headers {
        &self.0
    }

    pub fn into_map(self) -> Headers {
        self.0
    }
}

impl From<Headers> for DeviceHeaders {
    fn from(map: Headers) -> Self {
        DeviceHeaders(map)
    }
}

/// A [`Message`] paired with the [`DeviceHeaders`] that describe where it
/// was read from (or where it should be sent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBundle {
    pub message: Message,
    pub device_headers: DeviceHeaders,
}

impl MessageBundle {
    pub fn new(message: Message, device_headers: DeviceHeaders) -> Self {
        MessageBundle {
            message,
            device_headers,
        }
    }
}
