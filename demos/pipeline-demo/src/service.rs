//! The demo's concrete service: a [`PipelineService`] reading one named
//! file-system queue and routing every message to [`UppercaseHandler`].

use std::time::Duration;

use runtime_core::PipelineRouter;
use runtime_fs::FileSystemInputDeviceManager;
use runtime_service::{
    BaseService, CancellationToken, DeviceReaderCore, DeviceReaderService, LoopService, LoopServiceCore, PipelineCore,
    PipelineService, ServiceCore, ServiceError,
};

use crate::config::PipelineDemoConfig;
use crate::handler::UppercaseHandler;
use crate::output::DemoOutputManager;

pub struct PipelineDemoService {
    core: ServiceCore,
    loop_core: LoopServiceCore,
    reader: DeviceReaderCore<FileSystemInputDeviceManager>,
    pipeline: PipelineCore<DemoOutputManager>,
}

impl PipelineDemoService {
    pub fn new(config: &PipelineDemoConfig) -> Self {
        let input_manager = FileSystemInputDeviceManager::new(config.queues_root.clone());
        let output_manager = DemoOutputManager::new(config.queues_root.clone(), config.store.as_ref());

        let mut router = PipelineRouter::new();
        router.register(config.input_device.clone(), UppercaseHandler::new(config.output_device.clone()));

        PipelineDemoService {
            core: ServiceCore::new(true),
            loop_core: LoopServiceCore::new(Duration::from_millis(100), Duration::from_secs(1)),
            reader: DeviceReaderCore::new(
                input_manager,
                vec![config.input_device.clone()],
                config.use_transactions,
                config.read_timeout,
                config.max_batch_read_count,
                false,
            ),
            pipeline: PipelineCore::new(output_manager, router),
        }
    }
}

impl BaseService for PipelineDemoService {
    fn name(&self) -> &str {
        "pipeline-demo"
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

impl LoopService for PipelineDemoService {
    fn loop_core(&self) -> &LoopServiceCore {
        &self.loop_core
    }

    fn server_loop(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
        self.run_device_reader_loop(cancellation_token)
    }
}

impl DeviceReaderService for PipelineDemoService {
    type Manager = FileSystemInputDeviceManager;

    fn reader_core(&self) -> &DeviceReaderCore<Self::Manager> {
        &self.reader
    }

    fn reader_core_mut(&mut self) -> &mut DeviceReaderCore<Self::Manager> {
        &mut self.reader
    }

    fn handle_messages(&mut self, batch: Vec<runtime_service::BatchItem>) -> Result<(), ServiceError> {
        self.dispatch_batch(batch)
    }
}

impl PipelineService for PipelineDemoService {
    type OutputManager = DemoOutputManager;

    fn pipeline_core(&self) -> &PipelineCore<Self::OutputManager> {
        &self.pipeline
    }

    fn pipeline_core_mut(&mut self) -> &mut PipelineCore<Self::OutputManager> {
        &mut self.pipeline
    }
}
