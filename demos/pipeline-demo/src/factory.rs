//! Builds a [`PipelineDemoService`] from a loaded config — the one thing
//! a supervised worker process needs to know how to do, since everything
//! else about re-execing and watching it lives in `runtime-supervisor`.

use runtime_service::BaseService;
use runtime_supervisor::ServiceFactory;

use crate::config::PipelineDemoConfig;
use crate::service::PipelineDemoService;

pub struct PipelineDemoFactory {
    config: PipelineDemoConfig,
}

impl PipelineDemoFactory {
    pub fn new(config: PipelineDemoConfig) -> Self {
        PipelineDemoFactory { config }
    }
}

impl ServiceFactory for PipelineDemoFactory {
    fn create_service(&self) -> Box<dyn BaseService> {
        Box::new(PipelineDemoService::new(&self.config))
    }
}
