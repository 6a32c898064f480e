//! The blocking service lifecycle: a cancellable run loop, the batched
//! device-reader loop built on it, and a pipeline dispatcher built on
//! that. Mirrors a `threading`-based service framework rather than an
//! async one — every device in this workspace is a blocking, `Send`
//! trait object, so the service layer that drives them is too.

mod base_service;
mod cancellation;
mod device_reader_service;
mod error;
mod loop_service;
mod message_handler;
mod pipeline_service;
mod state;

pub use base_service::{BaseService, ServiceCore};
pub use cancellation::CancellationToken;
pub use device_reader_service::{BatchItem, DeviceReaderCore, DeviceReaderService};
pub use error::ServiceError;
pub use loop_service::{LoopMetrics, LoopService, LoopServiceCore};
pub use message_handler::MessageHandler;
pub use pipeline_service::{PipelineCore, PipelineService};
pub use state::{Event, ServiceState};
