//! A [`DeviceReaderService`] that routes each batch item through a
//! [`PipelineRouter`] and forwards the results to named output devices.

use runtime_core::{OutputDeviceManager, PipelineRouter};

use crate::device_reader_service::{BatchItem, DeviceReaderService};
use crate::error::ServiceError;

/// Shared state a [`PipelineService`] implementor embeds alongside its
/// [`crate::device_reader_service::DeviceReaderCore`]: the output
/// manager results are sent through, and the router that picks a
/// handler by the input device name a batch item came from.
pub struct PipelineCore<M: OutputDeviceManager> {
    pub output_device_manager: M,
    pub router: PipelineRouter,
}

impl<M> PipelineCore<M>
where
    M: OutputDeviceManager,
    M::Device: 'static,
{
    pub fn new(output_device_manager: M, router: PipelineRouter) -> Self {
        PipelineCore {
            output_device_manager,
            router,
        }
    }

    pub fn prepare(&mut self) -> Result<(), ServiceError> {
        self.output_device_manager
            .connect()
            .map_err(|source| ServiceError::OutputDevice {
                device: "<manager>".to_owned(),
                source,
            })
    }

    pub fn finalize(&mut self) {
        if let Err(e) = self.output_device_manager.disconnect() {
            tracing::warn!(error = %e, "failed to disconnect output device manager");
        }
    }

    fn dispatch_one(&mut self, item: BatchItem) -> Result<(), ServiceError> {
        let handler = self
            .router
            .handler_for(&item.input_device_name)
            .ok_or_else(|| ServiceError::NoHandlerForDevice {
                device: item.input_device_name.clone(),
            })?;

        let results = handler.handle(item.bundle).map_err(ServiceError::Handler)?;

        for result in results {
            let mut device = self
                .output_device_manager
                .get_output_device(&result.output_device_name)
                .map_err(|source| ServiceError::OutputDevice {
                    device: result.output_device_name.clone(),
                    source,
                })?;
            device.send(result.bundle).map_err(|source| ServiceError::OutputDevice {
                device: result.output_device_name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Extends [`DeviceReaderService`] with pipeline dispatch: each item in
/// a read batch is routed, by the input device it came from, to a
/// [`runtime_core::PipelineHandler`] and the resulting bundles are sent
/// to their named output devices — all before the reader's transaction
/// scope commits, so a send failure rolls the whole batch back.
pub trait PipelineService: DeviceReaderService {
    type OutputManager: OutputDeviceManager;

    fn pipeline_core(&self) -> &PipelineCore<Self::OutputManager>;
    fn pipeline_core_mut(&mut self) -> &mut PipelineCore<Self::OutputManager>;

    fn prepare_pipeline_service(&mut self) -> Result<(), ServiceError> {
        self.prepare_reader_service()?;
        self.pipeline_core_mut().prepare()
    }

    fn finalize_pipeline_service(&mut self) {
        self.finalize_reader_service();
        self.pipeline_core_mut().finalize();
    }

    fn dispatch_batch(&mut self, batch: Vec<BatchItem>) -> Result<(), ServiceError> {
        for item in batch {
            self.pipeline_core_mut().dispatch_one(item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_service::{BaseService, ServiceCore};
    use crate::cancellation::CancellationToken;
    use crate::device_reader_service::DeviceReaderCore;
    use crate::loop_service::{LoopService, LoopServiceCore};
    use runtime_core::{InputDevice, Message, PipelineHandler, PipelineResult};
    use runtime_memdevice::InMemoryDeviceManager;
    use std::convert::Infallible;
    use std::time::Duration;

    struct Echo;

    impl PipelineHandler for Echo {
        type Error = Infallible;

        fn handle(&self, bundle: runtime_core::MessageBundle) -> Result<Vec<PipelineResult>, Infallible> {
            Ok(vec![PipelineResult::new("out", bundle)])
        }
    }

    struct Relay {
        core: ServiceCore,
        loop_core: LoopServiceCore,
        reader: DeviceReaderCore<InMemoryDeviceManager>,
        pipeline: PipelineCore<InMemoryDeviceManager>,
    }

    impl BaseService for Relay {
        fn name(&self) -> &str {
            "relay"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn prepare_service(&mut self) -> Result<(), ServiceError> {
            self.prepare_pipeline_service()
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.run_loop_service(cancellation_token)
        }

        fn finalize_service(&mut self, _error: Option<&ServiceError>) {
            self.finalize_pipeline_service();
        }
    }

    impl LoopService for Relay {
        fn loop_core(&self) -> &LoopServiceCore {
            &self.loop_core
        }

        fn server_loop(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            let outcome = self.run_device_reader_loop(cancellation_token);
            cancellation_token.set();
            outcome
        }
    }

    impl DeviceReaderService for Relay {
        type Manager = InMemoryDeviceManager;

        fn reader_core(&self) -> &DeviceReaderCore<Self::Manager> {
            &self.reader
        }

        fn reader_core_mut(&mut self) -> &mut DeviceReaderCore<Self::Manager> {
            &mut self.reader
        }

        fn handle_messages(&mut self, batch: Vec<BatchItem>) -> Result<(), ServiceError> {
            self.dispatch_batch(batch)
        }
    }

    impl PipelineService for Relay {
        type OutputManager = InMemoryDeviceManager;

        fn pipeline_core(&self) -> &PipelineCore<Self::OutputManager> {
            &self.pipeline
        }

        fn pipeline_core_mut(&mut self) -> &mut PipelineCore<Self::OutputManager> {
            &mut self.pipeline
        }
    }

    #[test]
    fn routes_a_batch_item_to_its_output_device() {
        let input_manager = InMemoryDeviceManager::new();
        input_manager.push("in", runtime_core::MessageBundle::new(Message::from_bytes(b"x".to_vec()), runtime_core::DeviceHeaders::new()));
        let output_manager = InMemoryDeviceManager::new();

        let mut router = PipelineRouter::new();
        router.register("in", Echo);

        let mut service = Relay {
            core: ServiceCore::new(false),
            loop_core: LoopServiceCore::default(),
            reader: DeviceReaderCore::new(input_manager, vec!["in".to_owned()], true, Duration::from_millis(200), 1, false),
            pipeline: PipelineCore::new(output_manager, router),
        };

        service.start().unwrap();

        let mut out_device =
            runtime_core::InputDeviceManager::get_input_device(&mut service.pipeline.output_device_manager, "out").unwrap();
        let result = out_device.read(Duration::from_millis(50), false).unwrap();
        assert!(!result.is_empty());
    }
}
