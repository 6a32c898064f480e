//! Error taxonomy shared by device contracts and the transaction state machine.

use thiserror::Error;

/// Raised by [`crate::transaction::Transaction::commit`] or `rollback` when
/// called from a state that does not permit the requested move.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transaction is {current}, cannot {attempted}")]
pub struct WrongTransactionStateError {
    pub current: &'static str,
    pub attempted: &'static str,
}

/// Errors surfaced by [`crate::device::InputDevice::read`] and
/// [`crate::device::InputDeviceManager::connect`].
#[derive(Debug, Error)]
pub enum InputDeviceError {
    #[error("device {device} is not connected")]
    NotConnected { device: String },

    #[error("device {device} read failed: {source}")]
    ReadFailed {
        device: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("device {device} connect failed: {source}")]
    ConnectFailed {
        device: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    WrongTransactionState(#[from] WrongTransactionStateError),
}

/// Errors surfaced by [`crate::device::OutputDevice::send`].
#[derive(Debug, Error)]
pub enum OutputDeviceError {
    #[error("device {device} is not connected")]
    NotConnected { device: String },

    #[error("device {device} send failed: {source}")]
    SendFailed {
        device: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Raised when every child of a fan-out wrapper (aggregated reader,
/// failover, collection, round-robin) has failed; carries one error per
/// child that was attempted, in attempt order.
#[derive(Debug, Error)]
#[error("all {} children failed: {}", .errors.len(), .errors.iter().map(|(n, e)| format!("{n}: {e}")).collect::<Vec<_>>().join("; "))]
pub struct AggregatedError {
    pub errors: Vec<(String, Box<dyn std::error::Error + Send + Sync>)>,
}

impl AggregatedError {
    pub fn new(errors: Vec<(String, Box<dyn std::error::Error + Send + Sync>)>) -> Self {
        AggregatedError { errors }
    }
}
