//! Optional health monitors that attach to a running [`LoopService`]
//! and request a stop when it looks unhealthy.
//!
//! [`LoopService`]: runtime_service::LoopService

mod inactivity;
mod loop_health;

pub use inactivity::InactivityAddon;
pub use loop_health::LoopHealthAddon;
