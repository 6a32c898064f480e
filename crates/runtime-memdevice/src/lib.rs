//! An in-process, in-memory device manager.
//!
//! Useful standalone in tests, or as children of
//! [`runtime_core::AggregatedInputDevice`] when exercising fan-in logic
//! without touching the filesystem. Not durable: all state is lost when
//! the manager is dropped.

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use runtime_core::{
    DeviceHeaders, InputDevice, InputDeviceError, InputDeviceManager, MessageBundle, NullTransaction,
    OutputDevice, OutputDeviceError, OutputDeviceManager, ReadResult, Transaction, TransactionState,
};

/// A bundle tagged with a monotonic sequence number so the backing
/// `BinaryHeap` behaves as a FIFO (min-heap on sequence) rather than an
/// arbitrary max-heap.
struct SeqBundle {
    seq: u64,
    bundle: MessageBundle,
}

impl PartialEq for SeqBundle {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for SeqBundle {}
impl PartialOrd for SeqBundle {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for SeqBundle {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so `BinaryHeap::pop` returns the smallest (oldest) sequence first.
        other.seq.cmp(&self.seq)
    }
}

struct Queue {
    heap: Mutex<BinaryHeap<SeqBundle>>,
    not_empty: Condvar,
}

impl Queue {
    fn new() -> Self {
        Queue {
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
        }
    }

    fn push(&self, item: SeqBundle) {
        let mut heap = self.heap.lock().expect("queue lock poisoned");
        heap.push(item);
        self.not_empty.notify_one();
    }

    fn pop_wait(&self, timeout: Duration) -> Option<SeqBundle> {
        let heap = self.heap.lock().expect("queue lock poisoned");
        let deadline = Instant::now() + timeout;
        let mut heap = heap;
        loop {
            if let Some(item) = heap.pop() {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(heap, remaining)
                .expect("queue lock poisoned");
            heap = guard;
            if result.timed_out() && heap.peek().is_none() {
                return None;
            }
        }
    }
}

/// Manages a fixed set of named in-memory queues, created lazily on first
/// lookup and shared between every input/output device handed out under
/// that name.
#[derive(Default)]
pub struct InMemoryDeviceManager {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    next_seq: AtomicU64,
    connected: bool,
}

impl InMemoryDeviceManager {
    pub fn new() -> Self {
        InMemoryDeviceManager::default()
    }

    fn queue_for(&self, name: &str) -> Arc<Queue> {
        let mut queues = self.queues.lock().expect("manager lock poisoned");
        queues
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Directly enqueues a bundle under `name`, bypassing the
    /// [`OutputDevice`] trait — handy for seeding test fixtures.
    pub fn push(&self, name: &str, bundle: MessageBundle) {
        let queue = self.queue_for(name);
        let seq = self.next_seq();
        queue.push(SeqBundle { seq, bundle });
    }
}

impl InputDeviceManager for InMemoryDeviceManager {
    type Device = InMemoryInputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        self.connected = false;
        Ok(())
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        Ok(InMemoryInputDevice {
            name: name.to_owned(),
            queue: self.queue_for(name),
        })
    }
}

impl OutputDeviceManager for InMemoryDeviceManager {
    type Device = InMemoryOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        self.connected = false;
        Ok(())
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        Ok(InMemoryOutputDevice {
            name: name.to_owned(),
            queue: self.queue_for(name),
        })
    }
}

pub struct InMemoryInputDevice {
    name: String,
    queue: Arc<Queue>,
}

impl InMemoryInputDevice {
    /// Builds a device over a private, unshared queue — useful in unit
    /// tests that don't need a full [`InMemoryDeviceManager`].
    pub fn standalone(name: impl Into<String>) -> (Self, InMemoryOutputDevice) {
        let queue = Arc::new(Queue::new());
        let name = name.into();
        (
            InMemoryInputDevice {
                name: name.clone(),
                queue: queue.clone(),
            },
            InMemoryOutputDevice { name, queue },
        )
    }
}

impl InputDevice for InMemoryInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        match self.queue.pop_wait(timeout) {
            None => Ok(ReadResult::empty()),
            Some(item) => {
                let bundle = attach_device_name(item.bundle, &self.name);
                let transaction: Box<dyn Transaction> = if with_transaction {
                    Box::new(RequeueTransaction {
                        device_name: self.name.clone(),
                        queue: self.queue.clone(),
                        seq: item.seq,
                        pending: Mutex::new(Some(bundle.clone())),
                        state: Mutex::new(TransactionState::Active),
                    })
                } else {
                    Box::new(NullTransaction::new())
                };
                Ok(ReadResult::new(bundle, transaction))
            }
        }
    }
}

fn attach_device_name(mut bundle: MessageBundle, device_name: &str) -> MessageBundle {
    bundle
        .device_headers
        .insert(runtime_core::device_header_keys::INPUT_DEVICE_NAME, device_name);
    bundle
}

pub struct InMemoryOutputDevice {
    name: String,
    queue: Arc<Queue>,
}

impl OutputDevice for InMemoryOutputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        // Output devices created directly (not through the manager) generate
        // their own sequence so ordering is still well defined.
        let seq = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.queue.push(SeqBundle { seq, bundle });
        Ok(())
    }
}

/// Rolls back by pushing the bundle back onto the queue under its
/// original sequence number, so a rolled-back read is retried in its
/// original FIFO position rather than at the back of the queue.
struct RequeueTransaction {
    device_name: String,
    queue: Arc<Queue>,
    seq: u64,
    pending: Mutex<Option<MessageBundle>>,
    state: Mutex<TransactionState>,
}

impl Transaction for RequeueTransaction {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn state(&self) -> TransactionState {
        *self.state.lock().expect("transaction lock poisoned")
    }

    fn commit(&self) -> Result<(), runtime_core::WrongTransactionStateError> {
        let mut state = self.state.lock().expect("transaction lock poisoned");
        match *state {
            TransactionState::Committed => Ok(()),
            TransactionState::RolledBack => Err(runtime_core::WrongTransactionStateError {
                current: "rolled back",
                attempted: "commit",
            }),
            TransactionState::Active => {
                *state = TransactionState::Committed;
                self.pending.lock().expect("transaction lock poisoned").take();
                Ok(())
            }
        }
    }

    fn rollback(&self) -> Result<(), runtime_core::WrongTransactionStateError> {
        let mut state = self.state.lock().expect("transaction lock poisoned");
        match *state {
            TransactionState::RolledBack => Ok(()),
            TransactionState::Committed => Err(runtime_core::WrongTransactionStateError {
                current: "committed",
                attempted: "rollback",
            }),
            TransactionState::Active => {
                *state = TransactionState::RolledBack;
                if let Some(bundle) = self.pending.lock().expect("transaction lock poisoned").take() {
                    self.queue.push(SeqBundle { seq: self.seq, bundle });
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for InMemoryDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDeviceManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::Message;

    fn bundle(payload: &str) -> MessageBundle {
        MessageBundle::new(Message::from_bytes(payload.as_bytes().to_vec()), DeviceHeaders::new())
    }

    #[test]
    fn fifo_order_across_manager_queue() {
        let mut manager = InMemoryDeviceManager::new();
        manager.push("q", bundle("first"));
        manager.push("q", bundle("second"));

        let mut input = InputDeviceManager::get_input_device(&mut manager, "q").unwrap();
        let mut first = input.read(Duration::from_millis(10), false).unwrap();
        let mut second = input.read(Duration::from_millis(10), false).unwrap();

        assert_eq!(first.bundle.take().unwrap().message.bytes(), b"first");
        assert_eq!(second.bundle.take().unwrap().message.bytes(), b"second");
    }

    #[test]
    fn rollback_requeues_at_original_position() {
        let (mut input, output) = InMemoryInputDevice::standalone("q");
        let mut out = output;
        out.send(bundle("a")).unwrap();
        out.send(bundle("b")).unwrap();

        let result = input.read(Duration::from_millis(10), true).unwrap();
        result.transaction.rollback().unwrap();

        let mut replay = input.read(Duration::from_millis(10), false).unwrap();
        assert_eq!(replay.bundle.take().unwrap().message.bytes(), b"a");
    }

    #[test]
    fn empty_queue_times_out_without_error() {
        let (mut input, _output) = InMemoryInputDevice::standalone("q");
        let result = input.read(Duration::from_millis(20), false).unwrap();
        assert!(result.is_empty());
    }
}
