//! Errors surfaced by the multi-process supervisor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),
}
