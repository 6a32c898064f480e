//! Runs `N` copies of a service as separate OS processes and keeps them
//! alive: a duplex pipe per worker carries a liveness ping and a
//! graceful-stop message, a watchdog thread restarts workers that die
//! unexpectedly, and a three-stage (stop, terminate, kill) sequence
//! tears everything down. Two optional addons stop an individual
//! service that is still running but unhealthy.

mod addons;
mod error;
mod factory;
mod protocol;
mod supervisor;
mod worker;

pub use addons::{InactivityAddon, LoopHealthAddon};
pub use error::SupervisorError;
pub use factory::ServiceFactory;
pub use supervisor::MultiProcessSupervisor;
pub use worker::{instance_count, instance_index, is_worker_process, run_worker, WorkerHandle};
