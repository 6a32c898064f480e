//! Fan-out over an ordered collection of devices: first success wins.
//! The collection's iteration order is itself pluggable — a plain
//! collection visits children in a fixed order every pass, while the
//! round-robin variant ([`shuffled`]) rotates which child starts each
//! pass, continuing from wherever the previous pass left off.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use runtime_core::{
    AggregatedError, InputDevice, InputDeviceError, InputDeviceManager, MessageBundle, OutputDevice,
    OutputDeviceError, OutputDeviceManager, ReadResult,
};

const SLEEP_BETWEEN_ITERATIONS: Duration = Duration::from_millis(100);

/// An ordered collection of items with a position that persists across
/// calls: each pass starts where the previous pass's successful item
/// left off, rather than always restarting at index 0.
pub struct StatefulCollection<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> StatefulCollection<T> {
    /// Visits items in the order given.
    pub fn new(items: Vec<T>) -> Self {
        StatefulCollection {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Visits items in a random order fixed at construction time, then
    /// rotates the starting point of that order on every pass — the
    /// round-robin variant.
    pub fn shuffled(mut items: Vec<T>) -> Self {
        items.shuffle(&mut rand::thread_rng());
        StatefulCollection::new(items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Indices for one full pass, starting at the current cursor.
    fn pass_order(&self) -> Vec<usize> {
        if self.items.is_empty() {
            return Vec::new();
        }
        let start = self.cursor.load(Ordering::SeqCst) % self.items.len();
        (0..self.items.len()).map(|i| (start + i) % self.items.len()).collect()
    }

    /// Moves the cursor forward by `consumed` positions (mod length),
    /// so the next pass resumes right after the item that succeeded.
    fn advance(&self, consumed: usize) {
        if self.items.is_empty() {
            return;
        }
        self.cursor.fetch_add(consumed, Ordering::SeqCst);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

pub struct CollectionInputDevice {
    name: String,
    devices: StatefulCollection<Box<dyn InputDevice>>,
}

impl CollectionInputDevice {
    pub fn new(name: impl Into<String>, devices: StatefulCollection<Box<dyn InputDevice>>) -> Self {
        CollectionInputDevice {
            name: name.into(),
            devices,
        }
    }
}

impl InputDevice for CollectionInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, timeout: Duration, with_transaction: bool) -> Result<ReadResult, InputDeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let order = self.devices.pass_order();
            let mut failures = Vec::new();

            for (visited, &idx) in order.iter().enumerate() {
                let device = &mut self.devices.items[idx];
                match device.read(Duration::from_millis(0), with_transaction) {
                    Ok(result) if !result.is_empty() => {
                        self.devices.advance(visited + 1);
                        return Ok(result);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, device = %device.name(), "collection child read failed");
                        failures.push((device.name().to_owned(), Box::new(e) as Box<dyn std::error::Error + Send + Sync>));
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
            }

            if !failures.is_empty() && failures.len() >= order.len() {
                self.devices.advance(order.len());
                return Err(InputDeviceError::ReadFailed {
                    device: self.name.clone(),
                    source: Box::new(AggregatedError::new(failures)),
                });
            }

            if Instant::now() >= deadline {
                self.devices.advance(order.len());
                return Ok(ReadResult::empty());
            }
            std::thread::sleep(SLEEP_BETWEEN_ITERATIONS.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

pub struct CollectionInputDeviceManager<M> {
    inner: Vec<M>,
    round_robin: bool,
}

impl<M> CollectionInputDeviceManager<M> {
    pub fn new(inner: Vec<M>) -> Self {
        CollectionInputDeviceManager {
            inner,
            round_robin: false,
        }
    }

    pub fn round_robin(inner: Vec<M>) -> Self {
        CollectionInputDeviceManager {
            inner,
            round_robin: true,
        }
    }
}

impl<M> InputDeviceManager for CollectionInputDeviceManager<M>
where
    M: InputDeviceManager,
    M::Device: 'static,
{
    type Device = CollectionInputDevice;

    fn connect(&mut self) -> Result<(), InputDeviceError> {
        let mut failures = Vec::new();
        for manager in &mut self.inner {
            if let Err(e) = manager.connect() {
                failures.push(("manager".to_owned(), Box::new(e) as Box<dyn std::error::Error + Send + Sync>));
            }
        }
        if !failures.is_empty() && failures.len() >= self.inner.len() {
            return Err(InputDeviceError::ConnectFailed {
                device: "collection".to_owned(),
                source: Box::new(AggregatedError::new(failures)),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), InputDeviceError> {
        for manager in &mut self.inner {
            if let Err(e) = manager.disconnect() {
                tracing::warn!(error = %e, "error disconnecting collection child manager");
            }
        }
        Ok(())
    }

    fn get_input_device(&mut self, name: &str) -> Result<Self::Device, InputDeviceError> {
        let mut devices: Vec<Box<dyn InputDevice>> = Vec::new();
        let mut failures = Vec::new();
        for manager in &mut self.inner {
            match manager.get_input_device(name) {
                Ok(device) => devices.push(Box::new(device)),
                Err(e) => failures.push(("manager".to_owned(), Box::new(e) as Box<dyn std::error::Error + Send + Sync>)),
            }
        }
        if devices.is_empty() {
            return Err(InputDeviceError::ConnectFailed {
                device: name.to_owned(),
                source: Box::new(AggregatedError::new(failures)),
            });
        }
        let collection = if self.round_robin {
            StatefulCollection::shuffled(devices)
        } else {
            StatefulCollection::new(devices)
        };
        Ok(CollectionInputDevice::new(name, collection))
    }
}

pub struct CollectionOutputDevice {
    name: String,
    devices: StatefulCollection<Box<dyn OutputDevice>>,
}

impl CollectionOutputDevice {
    pub fn new(name: impl Into<String>, devices: StatefulCollection<Box<dyn OutputDevice>>) -> Self {
        CollectionOutputDevice {
            name: name.into(),
            devices,
        }
    }
}

impl OutputDevice for CollectionOutputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        let order = self.devices.pass_order();
        let mut failures = Vec::new();
        let mut remaining = Some(bundle);

        for (visited, &idx) in order.iter().enumerate() {
            let bundle = remaining.take().expect("bundle is re-copied for every retry");
            let retry_copy = bundle.message.copy(None);
            let device = &mut self.devices.items[idx];
            match device.send(bundle) {
                Ok(()) => {
                    self.devices.advance(visited + 1);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, device = %device.name(), "collection child send failed");
                    failures.push((device.name().to_owned(), Box::new(e) as Box<dyn std::error::Error + Send + Sync>));
                    remaining = Some(MessageBundle::new(retry_copy, runtime_core::DeviceHeaders::new()));
                }
            }
        }

        self.devices.advance(order.len());
        Err(OutputDeviceError::SendFailed {
            device: self.name.clone(),
            source: Box::new(AggregatedError::new(failures)),
        })
    }
}

pub struct CollectionOutputDeviceManager<M> {
    inner: Vec<M>,
    round_robin: bool,
}

impl<M> CollectionOutputDeviceManager<M> {
    pub fn new(inner: Vec<M>) -> Self {
        CollectionOutputDeviceManager {
            inner,
            round_robin: false,
        }
    }

    pub fn round_robin(inner: Vec<M>) -> Self {
        CollectionOutputDeviceManager {
            inner,
            round_robin: true,
        }
    }
}

impl<M> OutputDeviceManager for CollectionOutputDeviceManager<M>
where
    M: OutputDeviceManager,
    M::Device: 'static,
{
    type Device = CollectionOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        let mut failures = Vec::new();
        for manager in &mut self.inner {
            if let Err(e) = manager.connect() {
                failures.push(("manager".to_owned(), Box::new(e) as Box<dyn std::error::Error + Send + Sync>));
            }
        }
        if !failures.is_empty() && failures.len() >= self.inner.len() {
            return Err(OutputDeviceError::SendFailed {
                device: "collection".to_owned(),
                source: Box::new(AggregatedError::new(failures)),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        for manager in &mut self.inner {
            if let Err(e) = manager.disconnect() {
                tracing::warn!(error = %e, "error disconnecting collection child manager");
            }
        }
        Ok(())
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let mut devices: Vec<Box<dyn OutputDevice>> = Vec::new();
        let mut failures = Vec::new();
        for manager in &mut self.inner {
            match manager.get_output_device(name) {
                Ok(device) => devices.push(Box::new(device)),
                Err(e) => failures.push(("manager".to_owned(), Box::new(e) as Box<dyn std::error::Error + Send + Sync>)),
            }
        }
        if devices.is_empty() {
            return Err(OutputDeviceError::SendFailed {
                device: name.to_owned(),
                source: Box::new(AggregatedError::new(failures)),
            });
        }
        let collection = if self.round_robin {
            StatefulCollection::shuffled(devices)
        } else {
            StatefulCollection::new(devices)
        };
        Ok(CollectionOutputDevice::new(name, collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{DeviceHeaders, Message};
    use runtime_memdevice::InMemoryInputDevice;

    #[test]
    fn first_successful_child_wins_on_read() {
        let (empty_input, _empty_output) = InMemoryInputDevice::standalone("a");
        let (filled_input, mut filled_output) = InMemoryInputDevice::standalone("b");
        filled_output
            .send(MessageBundle::new(Message::from_bytes(b"hit".to_vec()), DeviceHeaders::new()))
            .unwrap();

        let mut device = CollectionInputDevice::new(
            "collection",
            StatefulCollection::new(vec![
                Box::new(empty_input) as Box<dyn InputDevice>,
                Box::new(filled_input) as Box<dyn InputDevice>,
            ]),
        );

        let result = device.read(Duration::from_millis(200), false).unwrap();
        assert!(!result.is_empty());
    }

    #[test]
    fn send_falls_through_to_second_device_in_the_collection() {
        struct AlwaysFails;
        impl OutputDevice for AlwaysFails {
            fn name(&self) -> &str {
                "a"
            }
            fn send(&mut self, _bundle: MessageBundle) -> Result<(), OutputDeviceError> {
                Err(OutputDeviceError::NotConnected { device: "a".to_owned() })
            }
        }

        let (mut input, output) = InMemoryInputDevice::standalone("b");
        let mut device = CollectionOutputDevice::new(
            "collection",
            StatefulCollection::new(vec![Box::new(AlwaysFails) as Box<dyn OutputDevice>, Box::new(output)]),
        );

        device
            .send(MessageBundle::new(Message::from_bytes(b"x".to_vec()), DeviceHeaders::new()))
            .unwrap();

        let result = input.read(Duration::from_millis(100), false).unwrap();
        assert!(!result.is_empty());
    }
}
