//! The one thing a worker process needs to know how to do: build the
//! service it is responsible for running.

use runtime_service::BaseService;

/// Creates the [`BaseService`] a worker process runs. Implementors
/// typically read [`crate::worker::instance_index`] /
/// [`crate::worker::instance_count`] to shard work across instances.
pub trait ServiceFactory: Send + Sync {
    fn create_service(&self) -> Box<dyn BaseService>;
}
