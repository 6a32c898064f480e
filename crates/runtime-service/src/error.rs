//! Errors surfaced by the service lifecycle and reader loops.

use thiserror::Error;

use runtime_core::{InputDeviceError, OutputDeviceError};

/// Errors that can abort a service's `prepare`/`finalize` hooks or a
/// single reader-loop iteration.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to acquire input device {device}: {source}")]
    InputDevice {
        device: String,
        #[source]
        source: InputDeviceError,
    },

    #[error("failed to acquire output device {device}: {source}")]
    OutputDevice {
        device: String,
        #[source]
        source: OutputDeviceError,
    },

    #[error("no pipeline handler registered for input device {device}")]
    NoHandlerForDevice { device: String },

    #[error("pipeline handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}
