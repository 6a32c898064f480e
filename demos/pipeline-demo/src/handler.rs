//! The demo's only pipeline handler: upper-cases the payload and
//! forwards it to a fixed output device name. Stands in for whatever
//! real transform a deployment would register instead.

use std::convert::Infallible;

use runtime_core::{MessageBundle, PipelineHandler, PipelineResult};

pub struct UppercaseHandler {
    output_device_name: String,
}

impl UppercaseHandler {
    pub fn new(output_device_name: impl Into<String>) -> Self {
        UppercaseHandler {
            output_device_name: output_device_name.into(),
        }
    }
}

impl PipelineHandler for UppercaseHandler {
    type Error = Infallible;

    fn handle(&self, mut bundle: MessageBundle) -> Result<Vec<PipelineResult>, Infallible> {
        let upper = bundle.message.bytes().to_ascii_uppercase();
        let message = runtime_core::Message::new(upper, bundle.message.headers().clone());
        let out = MessageBundle::new(message, bundle.device_headers);
        Ok(vec![PipelineResult::new(self.output_device_name.clone(), out)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::DeviceHeaders;

    #[test]
    fn uppercases_the_payload_and_routes_to_the_configured_output() {
        let handler = UppercaseHandler::new("out");
        let bundle = MessageBundle::new(runtime_core::Message::from_bytes(b"hello".to_vec()), DeviceHeaders::new());

        let mut results = handler.handle(bundle).unwrap();
        assert_eq!(results.len(), 1);
        let mut result = results.remove(0);
        assert_eq!(result.output_device_name, "out");
        assert_eq!(result.bundle.message.bytes(), b"HELLO");
    }
}
