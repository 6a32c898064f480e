//! An output device that falls back to a secondary device when the
//! primary send fails.

use runtime_core::{AggregatedError, MessageBundle, OutputDevice, OutputDeviceError, OutputDeviceManager};

pub struct FailoverOutputDevice {
    name: String,
    primary: Box<dyn OutputDevice>,
    secondary: Box<dyn OutputDevice>,
}

impl FailoverOutputDevice {
    pub fn new(primary: Box<dyn OutputDevice>, secondary: Box<dyn OutputDevice>) -> Self {
        let name = primary.name().to_owned();
        FailoverOutputDevice {
            name,
            primary,
            secondary,
        }
    }
}

impl OutputDevice for FailoverOutputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bundle: MessageBundle) -> Result<(), OutputDeviceError> {
        let copy = bundle.message.copy(None);
        match self.primary.send(bundle) {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                tracing::warn!(error = %primary_err, device = %self.name, "primary send failed, trying failover");
                let failover_bundle = MessageBundle::new(copy, runtime_core::DeviceHeaders::new());
                match self.secondary.send(failover_bundle) {
                    Ok(()) => Ok(()),
                    Err(secondary_err) => Err(OutputDeviceError::SendFailed {
                        device: self.name.clone(),
                        source: Box::new(AggregatedError::new(vec![
                            ("primary".to_owned(), Box::new(primary_err)),
                            ("failover".to_owned(), Box::new(secondary_err)),
                        ])),
                    }),
                }
            }
        }
    }
}

pub struct FailoverOutputDeviceManager<M, F> {
    primary: M,
    failover: F,
}

impl<M, F> FailoverOutputDeviceManager<M, F> {
    pub fn new(primary: M, failover: F) -> Self {
        FailoverOutputDeviceManager { primary, failover }
    }
}

impl<M, F> OutputDeviceManager for FailoverOutputDeviceManager<M, F>
where
    M: OutputDeviceManager,
    M::Device: 'static,
    F: OutputDeviceManager,
    F::Device: 'static,
{
    type Device = FailoverOutputDevice;

    fn connect(&mut self) -> Result<(), OutputDeviceError> {
        self.primary.connect()?;
        self.failover.connect()
    }

    fn disconnect(&mut self) -> Result<(), OutputDeviceError> {
        let primary_result = self.primary.disconnect();
        let failover_result = self.failover.disconnect();
        primary_result.and(failover_result)
    }

    fn get_output_device(&mut self, name: &str) -> Result<Self::Device, OutputDeviceError> {
        let primary = self.primary.get_output_device(name)?;
        let failover = self.failover.get_output_device(name)?;
        Ok(FailoverOutputDevice::new(Box::new(primary), Box::new(failover)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{DeviceHeaders, Message};
    use runtime_memdevice::InMemoryInputDevice;

    #[test]
    fn falls_back_to_secondary_when_primary_errors() {
        struct AlwaysFails;
        impl OutputDevice for AlwaysFails {
            fn name(&self) -> &str {
                "primary"
            }
            fn send(&mut self, _bundle: MessageBundle) -> Result<(), OutputDeviceError> {
                Err(OutputDeviceError::NotConnected {
                    device: "primary".to_owned(),
                })
            }
        }

        let (mut input, secondary) = InMemoryInputDevice::standalone("secondary");
        let mut device = FailoverOutputDevice::new(Box::new(AlwaysFails), Box::new(secondary));

        let bundle = MessageBundle::new(Message::from_bytes(b"x".to_vec()), DeviceHeaders::new());
        device.send(bundle).unwrap();

        let result = input.read(std::time::Duration::from_millis(100), false).unwrap();
        assert!(!result.is_empty());
    }
}
