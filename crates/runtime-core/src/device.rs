//! The input/output device and manager contracts every queue backend implements.

use std::time::Duration;

use crate::bundle::MessageBundle;
use crate::error::{InputDeviceError, OutputDeviceError};
use crate::transaction::{NullTransaction, Transaction};

/// The outcome of a single [`InputDevice::read`] call.
///
/// `bundle` is `None` when the device had nothing to offer within the
/// requested timeout — that is not an error, callers should simply try
/// again or move on to the next device.
pub struct ReadResult {
    pub bundle: Option<MessageBundle>,
    pub transaction: Box<dyn Transaction>,
}

impl ReadResult {
    pub fn empty() -> Self {
        ReadResult {
            bundle: None,
            transaction: Box::new(NullTransaction::new()),
        }
    }

    pub fn new(bundle: MessageBundle, transaction: Box<dyn Transaction>) -> Self {
        ReadResult {
            bundle: Some(bundle),
            transaction,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.is_none()
    }
}

/// A connected source of messages. Implementors are never required to be
/// thread-safe on their own — the reader loop that owns a device runs on
/// a single thread/task — but must be `Send` so a device can move between
/// worker threads across pipeline restarts.
pub trait InputDevice: Send {
    /// A name unique within the manager that produced this device; used
    /// as the `INPUT_DEVICE_NAME` device header and in log output.
    fn name(&self) -> &str;

    /// Reads at most one message, waiting up to `timeout` for one to
    /// become available. `with_transaction = false` short-circuits to a
    /// [`NullTransaction`] so callers that don't need commit/rollback
    /// semantics skip the bookkeeping.
    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError>;
}

/// A connected destination for messages.
pub trait OutputDevice: Send {
    fn name(&self) -> &str;

    /// Sends a single bundle. Devices that support their own commit
    /// semantics (e.g. the file-system queue's atomic rename) perform
    /// them synchronously within this call; there is no separate output
    /// transaction in the base contract.
    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError>;
}

/// Produces and owns named [`InputDevice`]s for a single backend.
/// `connect` must be idempotent: calling it on an already-connected
/// manager is a no-op, not an error.
pub trait InputDeviceManager: Send {
    type Device: InputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError>;
    fn disconnect(&mut self) -> Result<(), InputDeviceError>;
    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError>;
}

/// Produces and owns named [`OutputDevice`]s for a single backend.
pub trait OutputDeviceManager: Send {
    type Device: OutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError>;
    fn disconnect(&mut self) -> Result<(), OutputDeviceError>;
    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError>;
}
