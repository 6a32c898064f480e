//! A sliding-window rate limiter and the device wrappers built on it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use runtime_core::{
    InputDevice, InputDeviceError, InputDeviceManager, MessageBundle, OutputDevice, OutputDeviceError,
    OutputDeviceManager, ReadResult,
};

/// Allows at most `number_of_actions` actions within any trailing window
/// of `window` duration. `perform_action` blocks the calling thread, up
/// to `max_block` (if given), until an action is permitted.
pub struct RateLimiter {
    number_of_actions: usize,
    window: Duration,
    action_times: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(number_of_actions: usize, window: Duration) -> Self {
        RateLimiter {
            number_of_actions,
            window,
            action_times: Mutex::new(VecDeque::new()),
        }
    }

    fn trim(&self, times: &mut VecDeque<Instant>, now: Instant) {
        while times.front().is_some_and(|&t| now.duration_since(t) > self.window) {
            times.pop_front();
        }
    }

    /// Blocks (up to `max_block`, if given) until an action slot is
    /// free, then records one. Returns `true` if the call timed out
    /// before a slot became free.
    pub fn perform_action(&self, max_block: Option<Duration>) -> bool {
        if self.window.is_zero() {
            return false;
        }

        let mut times = self.action_times.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        self.trim(&mut times, now);

        if times.len() >= self.number_of_actions {
            let oldest = times.pop_front().expect("len checked above");
            let mut wait = self.window.saturating_sub(now.duration_since(oldest));
            if let Some(max) = max_block {
                if wait > max {
                    times.push_front(oldest);
                    return true;
                }
                wait = wait.min(max);
            }
            drop(times);
            std::thread::sleep(wait);
            let mut times = self.action_times.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            self.trim(&mut times, now);
            times.push_back(now);
            return false;
        }

        times.push_back(now);
        false
    }
}

pub struct RateLimitedInputDevice {
    inner: Box<dyn InputDevice>,
    limiter: std::sync::Arc<RateLimiter>,
    max_block: Option<Duration>,
}

impl RateLimitedInputDevice {
    pub fn new(inner: Box<dyn InputDevice>, limiter: std::sync::Arc<RateLimiter>, max_block: Option<Duration>) -> Self {
        RateLimitedInputDevice {
            inner,
            limiter,
            max_block,
        }
    }
}

impl InputDevice for RateLimitedInputDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        let block_for = match self.max_block {
            Some(max) => Some(max.min(timeout)),
            None => None,
        };
        let started = Instant::now();
        if self.limiter.perform_action(block_for) {
            return Ok(ReadResult::empty());
        }
        let remaining = timeout.saturating_sub(started.elapsed());
        self.inner.read(remaining, with_transaction)
    }
}

pub struct RateLimitedInputDeviceManager<M> {
    inner: M,
    limiter: std::sync::Arc<RateLimiter>,
    max_block: Option<Duration>,
}

impl<M> RateLimitedInputDeviceManager<M> {
    pub fn new(inner: M, limiter: std::sync::Arc<RateLimiter>, max_block: Option<Duration>) -> Self {
        RateLimitedInputDeviceManager {
            inner,
            limiter,
            max_block,
        }
    }
}

impl<M> InputDeviceManager for RateLimitedInputDeviceManager<M>
where
    M: InputDeviceManager,
    M::Device: 'static,
{
    type Device = RateLimitedInputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.disconnect()
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        let device = self.inner.get_input_device(name)?;
        Ok(RateLimitedInputDevice::new(Box::new(device), std::sync::Arc::clone(&self.limiter), self.max_block))
    }
}

pub struct RateLimitedOutputDevice {
    inner: Box<dyn OutputDevice>,
    limiter: std::sync::Arc<RateLimiter>,
    max_block: Option<Duration>,
}

impl RateLimitedOutputDevice {
    pub fn new(inner: Box<dyn OutputDevice>, limiter: std::sync::Arc<RateLimiter>, max_block: Option<Duration>) -> Self {
        RateLimitedOutputDevice {
            inner,
            limiter,
            max_block,
        }
    }
}

impl OutputDevice for RateLimitedOutputDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        self.limiter.perform_action(self.max_block);
        self.inner.send(bundle)
    }
}

pub struct RateLimitedOutputDeviceManager<M> {
    inner: M,
    limiter: std::sync::Arc<RateLimiter>,
    max_block: Option<Duration>,
}

impl<M> RateLimitedOutputDeviceManager<M> {
    pub fn new(inner: M, limiter: std::sync::Arc<RateLimiter>, max_block: Option<Duration>) -> Self {
        RateLimitedOutputDeviceManager {
            inner,
            limiter,
            max_block,
        }
    }
}

impl<M> OutputDeviceManager for RateLimitedOutputDeviceManager<M>
where
    M: OutputDeviceManager,
    M::Device: 'static,
{
    type Device = RateLimitedOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        self.inner.disconnect()
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let device = self.inner.get_output_device(name)?;
        Ok(RateLimitedOutputDevice::new(Box::new(device), std::sync::Arc::clone(&self.limiter), self.max_block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_actions_up_to_the_limit_without_blocking() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(!limiter.perform_action(Some(Duration::ZERO)));
        assert!(!limiter.perform_action(Some(Duration::ZERO)));
    }

    #[test]
    fn blocks_or_times_out_past_the_limit() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(!limiter.perform_action(Some(Duration::ZERO)));
        assert!(limiter.perform_action(Some(Duration::ZERO)));
    }
}
