//! The lifecycle every service in this crate shares: a cancellation
//! token, a state machine with an observable event, and optional
//! SIGINT/SIGTERM registration.

use std::sync::{Arc, Mutex};

use crate::cancellation::CancellationToken;
use crate::error::ServiceError;
use crate::state::{Event, ServiceState};

/// Shared bookkeeping every [`BaseService`] implementor embeds as a
/// field. Kept separate from the trait itself so the cancellation token
/// can be cloned into a signal handler closure without borrowing the
/// service.
pub struct ServiceCore {
    token: Arc<CancellationToken>,
    state: Mutex<ServiceState>,
    state_changed: Event<ServiceState>,
    should_stop_on_signal: bool,
}

impl ServiceCore {
    pub fn new(should_stop_on_signal: bool) -> Self {
        ServiceCore {
            token: Arc::new(CancellationToken::new()),
            state: Mutex::new(ServiceState::Initialized),
            state_changed: Event::new(),
            should_stop_on_signal,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// A clone of the shared token, for code that needs to set or wait on
    /// it without an exclusive borrow of the owning service — a signal
    /// handler closure, or a supervisor's pipe-listener thread.
    pub fn token_arc(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.token)
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().expect("service state lock poisoned")
    }

    pub fn state_changed_event(&self) -> &Event<ServiceState> {
        &self.state_changed
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock().expect("service state lock poisoned") = state;
        self.state_changed.fire(state);
    }
}

impl Default for ServiceCore {
    fn default() -> Self {
        ServiceCore::new(true)
    }
}

/// Registers process-wide SIGINT/SIGTERM handlers that set `token`.
/// Unlike the Python original, this has no "main thread only" guard:
/// Rust's signal delivery is a process-level concern, not bound to a
/// particular OS thread, so `ctrlc::set_handler` works from any thread.
/// A second registration attempt (e.g. two services started in one
/// process) is logged and ignored rather than treated as fatal.
fn register_signals(service_name: &str, token: Arc<CancellationToken>) {
    let result = ctrlc::set_handler(move || {
        token.set();
    });
    if let Err(err) = result {
        tracing::warn!(service = service_name, error = %err, "could not register termination signal handler");
    } else {
        tracing::info!(service = service_name, "registered termination signal handlers");
    }
}

/// The base lifecycle contract: a named service with a `prepare` /
/// `run` / `finalize` sequence, a cancellation token that `stop()` sets,
/// and an observable [`ServiceState`].
pub trait BaseService: Send {
    fn name(&self) -> &str;

    fn core(&self) -> &ServiceCore;

    /// Runs once before `run_service`, e.g. to connect device managers.
    fn prepare_service(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// The service's actual work. Implementors decide whether this
    /// blocks until `cancellation_token` is set (as [`crate::loop_service::LoopService`]
    /// does) or returns quickly and lets `start` park on the token.
    fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError>;

    /// Runs once after `run_service` returns or errors.
    fn finalize_service(&mut self, _error: Option<&ServiceError>) {}

    fn state(&self) -> ServiceState {
        self.core().state()
    }

    fn state_changed_event(&self) -> &Event<ServiceState> {
        self.core().state_changed_event()
    }

    /// Requests a graceful stop; returns immediately. The thread blocked
    /// in `start()` wakes up once the current `run_service` iteration
    /// notices the token is set.
    fn stop(&self) {
        self.core().set_state(ServiceState::Stopping);
        self.core().cancellation_token().set();
    }

    /// Runs the service on the calling thread until `stop()` is called
    /// (by another thread, or by a registered signal handler) or
    /// `run_service` returns/errors on its own.
    fn start(&mut self) -> Result<(), ServiceError> {
        self.core().cancellation_token().clear();
        self.core().set_state(ServiceState::Starting);

        if self.core().should_stop_on_signal {
            register_signals(self.name(), self.core().token_arc());
        }

        tracing::info!(service = self.name(), "starting service");

        let run_result = match self.prepare_service() {
            Ok(()) => {
                self.core().set_state(ServiceState::Started);
                let token = self.core().token_arc();
                self.run_service(&token)
            }
            Err(e) => Err(e),
        };

        match &run_result {
            Ok(()) => {
                self.core().token_arc().wait_forever();
                self.core().set_state(ServiceState::Stopping);
                self.finalize_service(None);
            }
            Err(_) => {
                self.core().cancellation_token().set();
                self.core().set_state(ServiceState::Stopping);
                self.finalize_service(run_result.as_ref().err());
            }
        }

        self.core().set_state(ServiceState::Stopped);
        tracing::info!(service = self.name(), "service stopped");
        run_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Once {
        core: ServiceCore,
        ran: Arc<AtomicBool>,
    }

    impl BaseService for Once {
        fn name(&self) -> &str {
            "once"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            self.ran.store(true, Ordering::SeqCst);
            cancellation_token.set();
            Ok(())
        }
    }

    #[test]
    fn start_runs_once_and_reaches_stopped() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut service = Once {
            core: ServiceCore::new(false),
            ran: Arc::clone(&ran),
        };

        service.start().unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    struct Blocking {
        core: ServiceCore,
    }

    impl BaseService for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        fn run_service(&mut self, cancellation_token: &CancellationToken) -> Result<(), ServiceError> {
            while !cancellation_token.is_set() {
                cancellation_token.wait(Duration::from_millis(10));
            }
            Ok(())
        }
    }

    #[test]
    fn stop_unblocks_a_running_service() {
        let mut service = Blocking {
            core: ServiceCore::new(false),
        };
        let stopper_token = service.core().token_arc();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper_token.set();
        });

        service.start().unwrap();
        handle.join().unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
