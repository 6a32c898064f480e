//! The single-message handler contract: a convenience over
//! [`crate::device_reader_service::DeviceReaderService::handle_messages`]
//! for services that don't care about batch boundaries.

use crate::device_reader_service::BatchItem;
use crate::error::ServiceError;

/// Processes one batch item at a time. `handle_batch` (used by
/// `DeviceReaderService::handle_messages` implementations that forward
/// to it) stops at the first error, leaving the remaining items in the
/// batch unprocessed — the transaction scope then rolls every read in
/// the batch back, matching spec's "commits implicit" single-message
/// contract: there is no partial commit of a batch.
pub trait MessageHandler: Send {
    fn handle_message(&mut self, item: BatchItem) -> Result<(), ServiceError>;

    fn handle_batch(&mut self, batch: Vec<BatchItem>) -> Result<(), ServiceError> {
        for item in batch {
            self.handle_message(item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{DeviceHeaders, Message, MessageBundle};

    struct Uppercase {
        seen: Vec<String>,
    }

    impl MessageHandler for Uppercase {
        fn handle_message(&mut self, mut item: BatchItem) -> Result<(), ServiceError> {
            let text = String::from_utf8(item.bundle.message.bytes()).unwrap();
            self.seen.push(text.to_uppercase());
            Ok(())
        }
    }

    #[test]
    fn handle_batch_processes_every_item_in_order() {
        let mut handler = Uppercase { seen: Vec::new() };
        let batch = vec![
            BatchItem {
                input_device_name: "a".to_owned(),
                bundle: MessageBundle::new(Message::from_bytes(b"one".to_vec()), DeviceHeaders::new()),
            },
            BatchItem {
                input_device_name: "a".to_owned(),
                bundle: MessageBundle::new(Message::from_bytes(b"two".to_vec()), DeviceHeaders::new()),
            },
        ];

        handler.handle_batch(batch).unwrap();
        assert_eq!(handler.seen, vec!["ONE".to_owned(), "TWO".to_owned()]);
    }
}
