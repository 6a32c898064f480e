//! Stops a service after too many consecutive failed loop iterations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use runtime_service::{LoopService, LoopMetrics};

/// Subscribes to [`LoopService::loop_ended_event`] and requests a stop
/// once `stop_after_consecutive_failures` failed iterations have
/// happened in a row. A successful iteration resets the counter.
pub struct LoopHealthAddon {
    consecutive_failures: Arc<AtomicU32>,
}

impl LoopHealthAddon {
    /// Attaches to `service`, registering a handler on its
    /// `loop_ended_event`. `stop_after_consecutive_failures == None`
    /// disables the check (the addon then only tracks the count, which
    /// [`LoopHealthAddon::consecutive_failures`] still reports).
    pub fn attach<S: LoopService>(service: &S, stop_after_consecutive_failures: Option<u32>) -> Self {
        let consecutive_failures = Arc::new(AtomicU32::new(0));
        let token = service.core().token_arc();
        let counter = Arc::clone(&consecutive_failures);
        let service_name = service.name().to_owned();

        service.loop_ended_event().register_handler(move |metrics: &LoopMetrics| {
            let failures = if metrics.error.is_some() {
                counter.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                counter.store(0, Ordering::SeqCst);
                0
            };

            if let Some(threshold) = stop_after_consecutive_failures {
                if failures >= threshold {
                    tracing::warn!(service = service_name, failures, threshold, "service reached its consecutive-failure limit, stopping it");
                    token.set();
                }
            }
        });

        LoopHealthAddon { consecutive_failures }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_service::{BaseService, CancellationToken, LoopServiceCore, ServiceCore, ServiceError};
    use std::time::Duration;

    struct FailingLoop {
        core: ServiceCore,
        loop_core: LoopServiceCore,
        fail: bool,
    }

    impl BaseService for FailingLoop {
        fn name(&self) -> &str {
            "failing-loop"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.run_loop_service(cancellation_token)
        }
    }

    impl LoopService for FailingLoop {
        fn loop_core(&self) -> &LoopServiceCore {
            &self.loop_core
        }

        fn server_loop(&mut self, _cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            if self.fail {
                Err(ServiceError::NoHandlerForDevice { device: "x".to_owned() })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn stops_the_service_after_the_configured_number_of_failures() {
        let mut service = FailingLoop {
            core: ServiceCore::new(false),
            loop_core: LoopServiceCore::new(Duration::from_millis(1), Duration::from_millis(1)),
            fail: true,
        };
        let addon = LoopHealthAddon::attach(&service, Some(3));

        service.start().unwrap();
        assert_eq!(addon.consecutive_failures(), 3);
    }
}
