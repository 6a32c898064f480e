//! Reads a batch of messages from an aggregated set of named input
//! devices, inside one transaction scope, and hands the batch to a
//! handler before committing.

use std::time::{Duration, Instant};

use runtime_core::{AggregatedInputDevice, InputDevice, InputDeviceManager, MessageBundle, TransactionScope};

use crate::cancellation::CancellationToken;
use crate::error::ServiceError;
use crate::loop_service::LoopService;

/// One message read during a batch, paired with the name of the input
/// device it came from (taken from the `INPUT_DEVICE_NAME` device
/// header every device already attaches).
pub struct BatchItem {
    pub input_device_name: String,
    pub bundle: MessageBundle,
}

/// Shared state a [`DeviceReaderService`] implementor embeds: the
/// manager devices are acquired from, the batching knobs, and the
/// aggregated device built during `prepare`.
pub struct DeviceReaderCore<M: InputDeviceManager> {
    pub input_device_manager: M,
    pub input_device_names: Vec<String>,
    pub use_transactions: bool,
    pub read_timeout: Duration,
    pub max_batch_read_count: usize,
    pub wait_for_batch_count: bool,
    aggregated: Option<AggregatedInputDevice>,
}

impl<M> DeviceReaderCore<M>
where
    M: InputDeviceManager,
    M::Device: 'static,
{
    pub fn new(
        input_device_manager: M,
        input_device_names: Vec<String>,
        use_transactions: bool,
        read_timeout: Duration,
        max_batch_read_count: usize,
        wait_for_batch_count: bool,
    ) -> Self {
        DeviceReaderCore {
            input_device_manager,
            input_device_names,
            use_transactions,
            read_timeout,
            max_batch_read_count: max_batch_read_count.max(1),
            wait_for_batch_count,
            aggregated: None,
        }
    }

    /// Connects the manager and resolves every configured device name
    /// into a child of the aggregated reader. Must run before the first
    /// `server_loop` iteration.
    pub fn prepare(&mut self) -> Result<(), ServiceError> {
        self.input_device_manager
            .connect()
            .map_err(|source| ServiceError::InputDevice {
                device: "<manager>".to_owned(),
                source,
            })?;

        let mut children: Vec<Box<dyn InputDevice>> = Vec::with_capacity(self.input_device_names.len());
        for name in &self.input_device_names {
            let device = self
                .input_device_manager
                .get_input_device(name)
                .map_err(|source| ServiceError::InputDevice {
                    device: name.clone(),
                    source,
                })?;
            children.push(Box::new(device));
        }
        self.aggregated = Some(AggregatedInputDevice::new("aggregated-reader", children));
        Ok(())
    }

    pub fn finalize(&mut self) {
        if let Err(e) = self.input_device_manager.disconnect() {
            tracing::warn!(error = %e, "failed to disconnect input device manager");
        }
    }
}

/// Extends [`LoopService`] with the batched-read-then-dispatch loop body
/// of a reader service: one read bounded by `read_timeout`, up to
/// `max_batch_read_count - 1` further opportunistic (or patient, if
/// `wait_for_batch_count`) reads, then a single call to
/// [`DeviceReaderService::handle_messages`] before the transaction scope
/// commits. A handler error rolls the scope back instead.
pub trait DeviceReaderService: LoopService {
    type Manager: InputDeviceManager;

    fn reader_core(&self) -> &DeviceReaderCore<Self::Manager>;
    fn reader_core_mut(&mut self) -> &mut DeviceReaderCore<Self::Manager>;

    /// Processes one fully-read batch. Returning `Err` rolls back every
    /// transaction read during this iteration; returning `Ok` commits
    /// them.
    fn handle_messages(&mut self, batch: Vec<BatchItem>) -> Result<(), ServiceError>;

    fn prepare_reader_service(&mut self) -> Result<(), ServiceError> {
        self.reader_core_mut().prepare()
    }

    fn finalize_reader_service(&mut self) {
        self.reader_core_mut().finalize();
    }

    fn run_device_reader_loop(&mut self, _cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
        let core = self.reader_core_mut();
        let use_transactions = core.use_transactions;
        let read_timeout = core.read_timeout;
        let max_batch_read_count = core.max_batch_read_count;
        let wait_for_batch_count = core.wait_for_batch_count;
        let aggregated = core
            .aggregated
            .as_mut()
            .expect("prepare_reader_service must run before the reader loop starts");

        let scope = TransactionScope::new();
        let mut batch = Vec::new();

        let first = aggregated
            .read(read_timeout, use_transactions)
            .map_err(|source| ServiceError::InputDevice {
                device: "aggregated-reader".to_owned(),
                source,
            })?;
        if let Some(bundle) = first.bundle {
            scope.add(first.transaction);
            batch.push(BatchItem {
                input_device_name: bundle.device_headers.device_name().unwrap_or("unknown").to_owned(),
                bundle,
            });
        }

        let deadline = Instant::now() + read_timeout;
        for _ in 0..max_batch_read_count.saturating_sub(1) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let timeout = if wait_for_batch_count { remaining } else { Duration::ZERO };

            let next = aggregated
                .read(timeout, use_transactions)
                .map_err(|source| ServiceError::InputDevice {
                    device: "aggregated-reader".to_owned(),
                    source,
                })?;
            match next.bundle {
                Some(bundle) => {
                    scope.add(next.transaction);
                    batch.push(BatchItem {
                        input_device_name: bundle.device_headers.device_name().unwrap_or("unknown").to_owned(),
                        bundle,
                    });
                }
                None => break,
            }
        }

        if batch.is_empty() {
            scope.commit();
            return Ok(());
        }

        match self.handle_messages(batch) {
            Ok(()) => {
                scope.commit();
                Ok(())
            }
            Err(e) => {
                scope.rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_service::{BaseService, ServiceCore};
    use crate::loop_service::{LoopService, LoopServiceCore};
    use runtime_memdevice::InMemoryDeviceManager;
    use std::sync::{Arc, Mutex};

    struct Collector {
        core: ServiceCore,
        loop_core: LoopServiceCore,
        reader: DeviceReaderCore<InMemoryDeviceManager>,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl BaseService for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn prepare_service(&mut self) -> Result<(), ServiceError> {
            self.prepare_reader_service()
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.run_loop_service(cancellation_token)
        }

        fn finalize_service(&mut self, _error: Option<&ServiceError>) {
            self.finalize_reader_service();
        }
    }

    impl LoopService for Collector {
        fn loop_core(&self) -> &LoopServiceCore {
            &self.loop_core
        }

        fn server_loop(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.run_device_reader_loop(cancellation_token)
        }
    }

    impl DeviceReaderService for Collector {
        type Manager = InMemoryDeviceManager;

        fn reader_core(&self) -> &DeviceReaderCore<Self::Manager> {
            &self.reader
        }

        fn reader_core_mut(&mut self) -> &mut DeviceReaderCore<Self::Manager> {
            &mut self.reader
        }

        fn handle_messages(&mut self, batch: Vec<BatchItem>) -> Result<(), ServiceError> {
            let mut received = self.received.lock().unwrap();
            for mut item in batch {
                received.push(String::from_utf8(item.bundle.message.bytes()).unwrap());
            }
            if !received.is_empty() {
                self.core.cancellation_token().set();
            }
            Ok(())
        }
    }

    #[test]
    fn reads_a_message_and_hands_it_to_the_handler() {
        let manager = InMemoryDeviceManager::new();
        manager.push(
            "queue",
            MessageBundle::new(runtime_core::Message::from_bytes(b"hello".to_vec()), runtime_core::DeviceHeaders::new()),
        );

        let received = Arc::new(Mutex::new(Vec::new()));
        let mut service = Collector {
            core: ServiceCore::new(false),
            loop_core: LoopServiceCore::default(),
            reader: DeviceReaderCore::new(manager, vec!["queue".to_owned()], true, Duration::from_millis(200), 4, false),
            received: Arc::clone(&received),
        };

        service.start().unwrap();
        assert_eq!(received.lock().unwrap().as_slice(), &["hello".to_owned()]);
    }
}
