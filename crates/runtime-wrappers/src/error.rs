//! Errors specific to the fan-out/resilience wrappers.

use thiserror::Error;

/// Raised by a [`crate::short_circuit`] device while it is cooling down
/// after too many consecutive failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("device {device} is short-circuited for {remaining_secs:.3}s")]
pub struct ShortCircuitError {
    pub device: String,
    pub remaining_secs: f64,
}
