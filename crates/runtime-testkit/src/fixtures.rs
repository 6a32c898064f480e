//! Small, repeatedly-needed test fixtures for the device/service stack.

use runtime_core::{DeviceHeaders, Message, MessageBundle};
use runtime_memdevice::InMemoryDeviceManager;

/// A [`MessageBundle`] wrapping `text` as UTF-8 bytes, with empty headers.
pub fn text_bundle(text: &str) -> MessageBundle {
    MessageBundle::new(Message::from_bytes(text.as_bytes().to_vec()), DeviceHeaders::new())
}

/// An [`InMemoryDeviceManager`] pre-seeded with one text message per
/// `(queue_name, text)` pair, in the order given.
pub fn seeded_manager(messages: impl IntoIterator<Item = (&'static str, &'static str)>) -> InMemoryDeviceManager {
    let manager = InMemoryDeviceManager::new();
    for (queue, text) in messages {
        manager.push(queue, text_bundle(text));
    }
    manager
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::InputDeviceManager;
    use std::time::Duration;

    #[test]
    fn seeded_manager_reads_back_messages_in_order() {
        let mut manager = seeded_manager([("queue", "one"), ("queue", "two")]);
        let mut device = manager.get_input_device("queue").unwrap();

        let first = device.read(Duration::from_millis(50), false).unwrap();
        let mut bundle = first.bundle.unwrap();
        assert_eq!(String::from_utf8(bundle.message.bytes()).unwrap(), "one");

        let second = device.read(Duration::from_millis(50), false).unwrap();
        let mut bundle = second.bundle.unwrap();
        assert_eq!(String::from_utf8(bundle.message.bytes()).unwrap(), "two");
    }
}
