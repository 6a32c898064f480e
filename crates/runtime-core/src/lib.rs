//! Core contracts shared by every device backend and service in the
//! runtime: messages, transactions, device traits, the round-robin
//! aggregator, and the pipeline handler/router.

mod aggregated;
mod bundle;
mod device;
mod error;
mod message;
mod pipeline;
mod transaction;
mod transaction_scope;

pub use aggregated::AggregatedInputDevice;
pub use bundle::{keys as device_header_keys, DeviceHeaders, MessageBundle};
pub use device::{InputDevice, InputDeviceManager, OutputDevice, OutputDeviceManager, ReadResult};
pub use error::{AggregatedError, InputDeviceError, OutputDeviceError, WrongTransactionStateError};
pub use message::{HeaderValue, Headers, Message};
pub use pipeline::{ErasedPipelineHandler, PipelineHandler, PipelineResult, PipelineRouter};
pub use transaction::{AtomicTransactionState, NullTransaction, Transaction, TransactionState};
pub use transaction_scope::TransactionScope;
