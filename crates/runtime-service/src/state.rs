//! Service lifecycle state and a minimal observable-event type.

use std::sync::Mutex;

/// Lifecycle state of a [`crate::base_service::BaseService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// A list of handlers fired synchronously, in registration order, on
/// the thread that calls [`Event::fire`]. A handler that panics is not
/// caught — this mirrors the Python original's `continue_after_failure`
/// flag being off by default for fatal conditions, but unlike the
/// Python version a failing handler here does abort the remaining ones.
pub struct Event<T> {
    handlers: Mutex<Vec<Box<dyn Fn(&T) + Send>>>,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Event {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Event::default()
    }

    pub fn register_handler(&self, handler: impl Fn(&T) + Send + 'static) {
        self.handlers.lock().expect("event handler lock poisoned").push(Box::new(handler));
    }

    pub fn fire(&self, value: T) {
        let handlers = self.handlers.lock().expect("event handler lock poisoned");
        for handler in handlers.iter() {
            handler(&value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_every_registered_handler_in_order() {
        let event: Event<u32> = Event::new();
        let seen = Arc::new(AtomicU32::new(0));

        let seen_a = Arc::clone(&seen);
        event.register_handler(move |v| seen_a.store(*v, Ordering::SeqCst));

        event.fire(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
