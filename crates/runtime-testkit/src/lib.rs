//! Fixtures and safety nets shared by this workspace's tests. Nothing in
//! this crate is itself under test here — it exists for the
//! integration tests one level up that exercise several crates together.

mod fixtures;
mod timeout;

pub use fixtures::{seeded_manager, text_bundle};
pub use timeout::stop_after;
