//! The line-based request/response protocol spoken over a worker's
//! stdin (supervisor to worker) and stdout (worker to supervisor).

pub const TEST_ALIVE: &str = "TEST_ALIVE";
pub const STOP: &str = "STOP";
pub const ALIVE: &str = "ALIVE";
