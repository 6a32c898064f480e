//! Umbrella crate tying together the device, service, and supervisor
//! layers published separately under `crates/`. Pulling in `msgflux`
//! alone is enough to build a message-processing service; each
//! re-exported module is also usable as its own standalone dependency.

pub use runtime_core as core;
pub use runtime_fs as fs;
pub use runtime_memdevice as memdevice;
pub use runtime_service as service;
pub use runtime_store as store;
pub use runtime_supervisor as supervisor;
pub use runtime_wrappers as wrappers;
