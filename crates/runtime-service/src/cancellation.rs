//! A `threading.Event`-style cancellation flag: set once, waited on
//! with an optional bounded timeout, interruptible by a concurrent
//! `set()` call from a signal handler or another thread.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct CancellationToken {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn set(&self) {
        let mut state = self.state.lock().expect("cancellation token lock poisoned");
        *state = true;
        self.condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock().expect("cancellation token lock poisoned")
    }

    /// Blocks until the token is set or `timeout` elapses, whichever
    /// comes first. A zero timeout polls once without blocking.
    pub fn wait(&self, timeout: Duration) {
        let state = self.state.lock().expect("cancellation token lock poisoned");
        if *state || timeout.is_zero() {
            return;
        }
        let _ = self.condvar.wait_timeout(state, timeout);
    }

    /// Blocks until the token is set, with no deadline. Used by
    /// `BaseService::start` to keep the calling thread parked after the
    /// run loop returns, mirroring the Python original's unconditional
    /// `self._cancellation_token.wait()`.
    pub fn wait_forever(&self) {
        let mut state = self.state.lock().expect("cancellation token lock poisoned");
        while !*state {
            state = self
                .condvar
                .wait_timeout(state, Duration::from_secs(3600))
                .expect("cancellation token lock poisoned")
                .0;
        }
    }

    /// Resets the token to "not set", so a service instance can be
    /// restarted after a previous `stop()`.
    pub fn clear(&self) {
        *self.state.lock().expect("cancellation token lock poisoned") = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_once_set() {
        let token = CancellationToken::new();
        token.set();
        let started = std::time::Instant::now();
        token.wait(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn wait_is_interrupted_by_a_concurrent_set() {
        let token = Arc::new(CancellationToken::new());
        let setter = Arc::clone(&token);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        let started = std::time::Instant::now();
        token.wait(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(token.is_set());
    }
}
