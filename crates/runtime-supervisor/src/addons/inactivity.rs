//! Stops a service that has gone quiet: no loop iteration (and so, for
//! a [`runtime_service::DeviceReaderService`], no message read) has
//! finished within a configured window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use runtime_service::{CancellationToken, LoopService, ServiceState};

/// Subscribes to `state_changed_event` and `loop_ended_event`: while the
/// service is started, a background thread wakes up whenever
/// `inactivity_timeout` has elapsed since the last loop iteration and,
/// if still true by the time it checks, stops the service.
pub struct InactivityAddon {
    watchdog_stop: Arc<CancellationToken>,
}

impl InactivityAddon {
    pub fn attach<S: LoopService>(service: &S, inactivity_timeout: Duration) -> Self {
        let watchdog_stop = Arc::new(CancellationToken::new());
        let last_loop = Arc::new(AtomicU64::new(0));
        let started_at = Instant::now();

        let last_loop_for_event = Arc::clone(&last_loop);
        service.loop_ended_event().register_handler(move |_metrics| {
            last_loop_for_event.store(started_at.elapsed().as_millis() as u64, Ordering::SeqCst);
        });

        let watchdog_stop_for_state = Arc::clone(&watchdog_stop);
        let last_loop_for_state = Arc::clone(&last_loop);
        let token = service.core().token_arc();
        let service_name = service.name().to_owned();

        service.state_changed_event().register_handler(move |state: &ServiceState| {
            match state {
                ServiceState::Starting => {
                    watchdog_stop_for_state.clear();
                    last_loop_for_state.store(started_at.elapsed().as_millis() as u64, Ordering::SeqCst);
                    spawn_watchdog(
                        Arc::clone(&watchdog_stop_for_state),
                        Arc::clone(&last_loop_for_state),
                        started_at,
                        inactivity_timeout,
                        Arc::clone(&token),
                        service_name.clone(),
                    );
                }
                ServiceState::Stopping => watchdog_stop_for_state.set(),
                _ => {}
            }
        });

        InactivityAddon { watchdog_stop }
    }
}

impl Drop for InactivityAddon {
    fn drop(&mut self) {
        self.watchdog_stop.set();
    }
}

fn spawn_watchdog(
    watchdog_stop: Arc<CancellationToken>,
    last_loop: Arc<AtomicU64>,
    started_at: Instant,
    inactivity_timeout: Duration,
    service_token: Arc<CancellationToken>,
    service_name: String,
) {
    std::thread::spawn(move || {
        loop {
            let elapsed_ms = started_at.elapsed().as_millis() as u64;
            let last_ms = last_loop.load(Ordering::SeqCst);
            let quiet_for = Duration::from_millis(elapsed_ms.saturating_sub(last_ms));

            if quiet_for >= inactivity_timeout {
                tracing::warn!(service = service_name, quiet_for_secs = quiet_for.as_secs(), "service exceeded its inactivity timeout, stopping it");
                service_token.set();
                return;
            }

            watchdog_stop.wait(inactivity_timeout - quiet_for);
            if watchdog_stop.is_set() {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_service::{BaseService, LoopServiceCore, ServiceCore, ServiceError};

    struct IdleLoop {
        core: ServiceCore,
        loop_core: LoopServiceCore,
    }

    impl BaseService for IdleLoop {
        fn name(&self) -> &str {
            "idle-loop"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.run_loop_service(cancellation_token)
        }
    }

    impl LoopService for IdleLoop {
        fn loop_core(&self) -> &LoopServiceCore {
            &self.loop_core
        }

        fn server_loop(&mut self, _cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        }
    }

    #[test]
    fn stops_a_service_that_stays_quiet_past_the_timeout() {
        let mut service = IdleLoop {
            core: ServiceCore::new(false),
            loop_core: LoopServiceCore::new(Duration::from_secs(60), Duration::from_secs(60)),
        };
        let _addon = InactivityAddon::attach(&service, Duration::from_millis(50));

        service.start().unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
