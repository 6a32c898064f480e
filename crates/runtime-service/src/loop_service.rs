//! A [`crate::base_service::BaseService`] whose work is a single
//! `server_loop` call repeated until cancelled.

use std::time::{Duration, Instant};

use crate::base_service::BaseService;
use crate::cancellation::CancellationToken;
use crate::error::ServiceError;
use crate::state::Event;

/// Timing and outcome of one `server_loop` iteration, fired on
/// [`LoopService::loop_ended_event`] after every iteration, successful
/// or not.
pub struct LoopMetrics {
    pub loop_duration: Duration,
    pub error: Option<String>,
}

/// Extends [`BaseService`] with a loop-shaped `run_service`: call
/// `server_loop` repeatedly, sleep `duration_after_loop_success` (or
/// `_failure`, interruptibly) between iterations, until the cancellation
/// token is set.
pub trait LoopService: BaseService {
    fn loop_core(&self) -> &LoopServiceCore;

    fn server_loop(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError>;

    fn loop_ended_event(&self) -> &Event<LoopMetrics> {
        &self.loop_core().loop_ended
    }

    fn run_loop_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
        while !cancellation_token.is_set() {
            let started = Instant::now();
            let result = self.server_loop(cancellation_token);
            let loop_duration = started.elapsed();

            let error_message = match &result {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "server loop raised an error");
                    Some(e.to_string())
                }
            };

            self.loop_ended_event().fire(LoopMetrics {
                loop_duration,
                error: error_message.clone(),
            });

            let wait_duration = if error_message.is_some() {
                self.loop_core().duration_after_loop_failure
            } else {
                self.loop_core().duration_after_loop_success
            };
            cancellation_token.wait(wait_duration);
        }
        Ok(())
    }
}

/// Shared state a [`LoopService`] implementor embeds alongside its
/// [`ServiceCore`].
pub struct LoopServiceCore {
    pub duration_after_loop_success: Duration,
    pub duration_after_loop_failure: Duration,
    loop_ended: Event<LoopMetrics>,
}

impl LoopServiceCore {
    pub fn new(duration_after_loop_success: Duration, duration_after_loop_failure: Duration) -> Self {
        LoopServiceCore {
            duration_after_loop_success,
            duration_after_loop_failure,
            loop_ended: Event::new(),
        }
    }
}

impl Default for LoopServiceCore {
    fn default() -> Self {
        LoopServiceCore::new(Duration::ZERO, Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_service::{BaseService, ServiceCore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingLoop {
        core: ServiceCore,
        loop_core: LoopServiceCore,
        iterations: Arc<AtomicU32>,
    }

    impl BaseService for CountingLoop {
        fn name(&self) -> &str {
            "counting-loop"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.run_loop_service(cancellation_token)
        }
    }

    impl LoopService for CountingLoop {
        fn loop_core(&self) -> &LoopServiceCore {
            &self.loop_core
        }

        fn server_loop(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            let count = self.iterations.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= 3 {
                cancellation_token.set();
            }
            Ok(())
        }
    }

    #[test]
    fn loop_runs_until_cancellation_is_set() {
        let iterations = Arc::new(AtomicU32::new(0));
        let mut service = CountingLoop {
            core: ServiceCore::new(false),
            loop_core: LoopServiceCore::default(),
            iterations: Arc::clone(&iterations),
        };

        service.start().unwrap();
        assert_eq!(iterations.load(Ordering::SeqCst), 3);
    }
}
