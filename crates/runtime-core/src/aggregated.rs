//! Round-robin fan-in across a fixed set of input devices.

use std::thread;
use std::time::{Duration, Instant};

use crate::bundle::MessageBundle;
use crate::device::{InputDevice, ReadResult};
use crate::error::InputDeviceError;
use crate::transaction::Transaction;

/// The interval between full empty cycles over all children, mirroring
/// the Python aggregator's ~100ms idle poll.
const EMPTY_CYCLE_SLEEP: Duration = Duration::from_millis(100);

/// Per-child poll timeout used while walking the ring; short enough that
/// one unresponsive child cannot dominate the aggregator's deadline.
const CHILD_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Fans a fixed set of [`InputDevice`]s into one: reads cycle through the
/// children starting just after whichever one produced the last message,
/// so no single child can starve its siblings. A full pass with nothing
/// to offer sleeps for [`EMPTY_CYCLE_SLEEP`] before trying again, bounded
/// by the caller's overall deadline.
pub struct AggregatedInputDevice {
    name: String,
    children: Vec<Box<dyn InputDevice>>,
    cursor: usize,
}

impl AggregatedInputDevice {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn InputDevice>>) -> Self {
        AggregatedInputDevice {
            name: name.into(),
            children,
            cursor: 0,
        }
    }

    /// The name of the device that produced the most recent non-empty
    /// read, if any read has succeeded yet.
    pub fn last_read_device(&self) -> Option<&str> {
        if self.children.is_empty() {
            None
        } else {
            let idx = (self.cursor + self.children.len() - 1) % self.children.len();
            Some(self.children[idx].name())
        }
    }

    fn read_one_cycle(
        &mut self,
        with_transaction: bool,
    ) -> Result<Option<(MessageBundle, Box<dyn Transaction>)>, InputDeviceError> {
        let n = self.children.len();
        for offset in 0..n {
            let idx = (self.cursor + offset) % n;
            let result = self.children[idx].read(CHILD_POLL_TIMEOUT, with_transaction)?;
            if let Some(bundle) = result.bundle {
                self.cursor = (idx + 1) % n;
                return Ok(Some((bundle, result.transaction)));
            }
        }
        Ok(None)
    }
}

impl InputDevice for AggregatedInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        if self.children.is_empty() {
            return Ok(ReadResult::empty());
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some((bundle, transaction)) = self.read_one_cycle(with_transaction)? {
                return Ok(ReadResult::new(bundle, transaction));
            }

            if Instant::now() >= deadline {
                return Ok(ReadResult::empty());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(EMPTY_CYCLE_SLEEP.min(remaining));

            if Instant::now() >= deadline {
                return Ok(ReadResult::empty());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::DeviceHeaders;
    use crate::message::Message;
    use crate::transaction::NullTransaction;

    struct StubDevice {
        name: String,
        responses: Vec<Option<&'static str>>,
    }

    impl InputDevice for StubDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn read(&mut self, _timeout: Duration, _with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
            if self.responses.is_empty() {
                return Ok(ReadResult::empty());
            }
            match self.responses.remove(0) {
                None => Ok(ReadResult::empty()),
                Some(payload) => Ok(ReadResult::new(
                    MessageBundle::new(Message::from_bytes(payload.as_bytes().to_vec()), DeviceHeaders::new()),
                    Box::new(NullTransaction::new()),
                )),
            }
        }
    }

    #[test]
    fn round_robins_across_children_after_a_hit() {
        let a = Box::new(StubDevice {
            name: "a".into(),
            responses: vec![Some("a1"), None],
        });
        let b = Box::new(StubDevice {
            name: "b".into(),
            responses: vec![Some("b1")],
        });
        let mut agg = AggregatedInputDevice::new("agg", vec![a, b]);

        let first = agg.read(Duration::from_millis(10), false).unwrap();
        assert_eq!(agg.last_read_device(), Some("a"));
        assert!(first.bundle.is_some());

        let second = agg.read(Duration::from_millis(10), false).unwrap();
        assert_eq!(agg.last_read_device(), Some("b"));
        assert!(second.bundle.is_some());
    }

    #[test]
    fn empty_children_returns_empty_immediately() {
        let mut agg = AggregatedInputDevice::new("agg", vec![]);
        let result = agg.read(Duration::from_millis(10), false).unwrap();
        assert!(result.is_empty());
    }
}
