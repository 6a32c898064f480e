//! Fails fast after a run of consecutive failures, instead of letting
//! every caller pay the full timeout of a device that's already down.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use runtime_core::{
    InputDevice, InputDeviceError, InputDeviceManager, MessageBundle, OutputDevice, OutputDeviceError,
    OutputDeviceManager, ReadResult,
};

use crate::error::ShortCircuitError;

/// Tracks consecutive failures and, once `fail_count` is reached in a
/// row, reports itself as short-circuited for `cooldown` before letting
/// another attempt through.
struct ShortCircuitState {
    fail_count: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
}

impl ShortCircuitState {
    fn new(fail_count: u32, cooldown: Duration) -> Self {
        ShortCircuitState {
            fail_count,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
        }
    }

    fn check(&self, device: &str) -> Result<(), ShortCircuitError> {
        let mut open_until = self.open_until.lock().expect("short circuit lock poisoned");
        if let Some(until) = *open_until {
            let now = Instant::now();
            if now < until {
                return Err(ShortCircuitError {
                    device: device.to_owned(),
                    remaining_secs: (until - now).as_secs_f64(),
                });
            }
            *open_until = None;
        }
        Ok(())
    }

    fn report_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn report_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.fail_count {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            let mut open_until = self.open_until.lock().expect("short circuit lock poisoned");
            *open_until = Some(Instant::now() + self.cooldown);
        }
    }
}

pub struct ShortCircuitInputDevice {
    inner: Box<dyn InputDevice>,
    state: ShortCircuitState,
}

impl ShortCircuitInputDevice {
    pub fn new(inner: Box<dyn InputDevice>, fail_count: u32, cooldown: Duration) -> Self {
        ShortCircuitInputDevice {
            inner,
            state: ShortCircuitState::new(fail_count, cooldown),
        }
    }
}

impl InputDevice for ShortCircuitInputDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        self.state.check(self.inner.name()).map_err(|e| InputDeviceError::ReadFailed {
            device: self.inner.name().to_owned(),
            source: Box::new(e),
        })?;

        match self.inner.read(timeout, with_transaction) {
            Ok(result) => {
                self.state.report_success();
                Ok(result)
            }
            Err(e) => {
                self.state.report_failure();
                Err(e)
            }
        }
    }
}

pub struct ShortCircuitInputDeviceManager<M> {
    inner: M,
    fail_count: u32,
    cooldown: Duration,
}

impl<M> ShortCircuitInputDeviceManager<M> {
    pub fn new(inner: M, fail_count: u32, cooldown: Duration) -> Self {
        ShortCircuitInputDeviceManager {
            inner,
            fail_count,
            cooldown,
        }
    }
}

impl<M> InputDeviceManager for ShortCircuitInputDeviceManager<M>
where
    M: InputDeviceManager,
    M::Device: 'static,
{
    type Device = ShortCircuitInputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        self.inner.disconnect()
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        let device = self.inner.get_input_device(name)?;
        Ok(ShortCircuitInputDevice::new(Box::new(device), self.fail_count, self.cooldown))
    }
}

pub struct ShortCircuitOutputDevice {
    inner: Box<dyn OutputDevice>,
    state: ShortCircuitState,
}

impl ShortCircuitOutputDevice {
    pub fn new(inner: Box<dyn OutputDevice>, fail_count: u32, cooldown: Duration) -> Self {
        ShortCircuitOutputDevice {
            inner,
            state: ShortCircuitState::new(fail_count, cooldown),
        }
    }
}

impl OutputDevice for ShortCircuitOutputDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        self.state.check(self.inner.name()).map_err(|e| OutputDeviceError::SendFailed {
            device: self.inner.name().to_owned(),
            source: Box::new(e),
        })?;

        match self.inner.send(bundle) {
            Ok(()) => {
                self.state.report_success();
                Ok(())
            }
            Err(e) => {
                self.state.report_failure();
                Err(e)
            }
        }
    }
}

pub struct ShortCircuitOutputDeviceManager<M> {
    inner: M,
    fail_count: u32,
    cooldown: Duration,
}

impl<M> ShortCircuitOutputDeviceManager<M> {
    pub fn new(inner: M, fail_count: u32, cooldown: Duration) -> Self {
        ShortCircuitOutputDeviceManager {
            inner,
            fail_count,
            cooldown,
        }
    }
}

impl<M> OutputDeviceManager for ShortCircuitOutputDeviceManager<M>
where
    M: OutputDeviceManager,
    M::Device: 'static,
{
    type Device = ShortCircuitOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        self.inner.disconnect()
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let device = self.inner.get_output_device(name)?;
        Ok(ShortCircuitOutputDevice::new(Box::new(device), self.fail_count, self.cooldown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{DeviceHeaders, Message};

    struct AlwaysFails;
    impl OutputDevice for AlwaysFails {
        fn name(&self) -> &str {
            "flaky"
        }
        fn send(&mut self, _bundle: MessageBundle) -> Result<(), OutputDeviceError> {
            Err(OutputDeviceError::NotConnected { device: "flaky".to_owned() })
        }
    }

    #[test]
    fn opens_after_consecutive_failures_then_fails_fast() {
        let mut device = ShortCircuitOutputDevice::new(Box::new(AlwaysFails), 2, Duration::from_secs(60));

        for _ in 0..2 {
            let bundle = MessageBundle::new(Message::from_bytes(b"x".to_vec()), DeviceHeaders::new());
            assert!(device.send(bundle).is_err());
        }

        let bundle = MessageBundle::new(Message::from_bytes(b"x".to_vec()), DeviceHeaders::new());
        let err = device.send(bundle).unwrap_err();
        assert!(matches!(err, OutputDeviceError::SendFailed { .. }));
    }

    #[test]
    fn success_resets_the_consecutive_failure_count() {
        use runtime_memdevice::InMemoryInputDevice;

        let (_input, output) = InMemoryInputDevice::standalone("q");
        let mut device = ShortCircuitOutputDevice::new(Box::new(output), 3, Duration::from_secs(60));

        for _ in 0..5 {
            let bundle = MessageBundle::new(Message::from_bytes(b"x".to_vec()), DeviceHeaders::new());
            device.send(bundle).unwrap();
        }
        assert_eq!(device.state.consecutive_failures.load(Ordering::SeqCst), 0);
    }
}
