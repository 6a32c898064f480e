//! Handler contract and routing table that sit between a device read and its outputs.

use std::collections::HashMap;

use crate::bundle::MessageBundle;

/// One outgoing bundle produced by a [`PipelineHandler`], addressed to a
/// named output device. A handler returning zero results drops the
/// input; returning several fans it out to several outputs.
pub struct PipelineResult {
    pub output_device_name: String,
    pub bundle: MessageBundle,
}

impl PipelineResult {
    pub fn new(output_device_name: impl Into<String>, bundle: MessageBundle) -> Self {
        PipelineResult {
            output_device_name: output_device_name.into(),
            bundle,
        }
    }
}

/// Processes one input bundle into zero or more [`PipelineResult`]s.
pub trait PipelineHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn handle(&self, bundle: MessageBundle) -> Result<Vec<PipelineResult>, Self::Error>;
}

/// A boxed [`PipelineHandler`] with its error type erased, so a
/// [`PipelineRouter`] can hold handlers with different `Error` types in
/// one registry.
pub trait ErasedPipelineHandler: Send + Sync {
    fn handle(&self, bundle: MessageBundle) -> Result<Vec<PipelineResult>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<H: PipelineHandler> ErasedPipelineHandler for H {
    fn handle(&self, bundle: MessageBundle) -> Result<Vec<PipelineResult>, Box<dyn std::error::Error + Send + Sync>> {
        PipelineHandler::handle(self, bundle).map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// Routes a bundle read from a given input device name to the handler
/// registered for it. Supplements spec.md's single-handler contract with
/// a typed `input_name → handler` table, so one pipeline service can
/// multiplex several input devices without a decorator-based DSL.
#[derive(Default)]
pub struct PipelineRouter {
    handlers: HashMap<String, Box<dyn ErasedPipelineHandler>>,
}

impl PipelineRouter {
    pub fn new() -> Self {
        PipelineRouter::default()
    }

    /// Registers `handler` for bundles read from `input_name`. Replaces
    /// any handler previously registered for that name.
    pub fn register(&mut self, input_name: impl Into<String>, handler: impl ErasedPipelineHandler + 'static) {
        self.handlers.insert(input_name.into(), Box::new(handler));
    }

    pub fn handler_for(&self, input_name: &str) -> Option<&dyn ErasedPipelineHandler> {
        self.handlers.get(input_name).map(|h| h.as_ref())
    }

    pub fn is_registered(&self, input_name: &str) -> bool {
        self.handlers.contains_key(input_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::DeviceHeaders;
    use crate::message::Message;
    use std::convert::Infallible;

    struct Echo;

    impl PipelineHandler for Echo {
        type Error = Infallible;

        fn handle(&self, bundle: MessageBundle) -> Result<Vec<PipelineResult>, Infallible> {
            Ok(vec![PipelineResult::new("out", bundle)])
        }
    }

    #[test]
    fn router_dispatches_by_input_name() {
        let mut router = PipelineRouter::new();
        router.register("in", Echo);

        assert!(router.is_registered("in"));
        assert!(!router.is_registered("missing"));

        let bundle = MessageBundle::new(Message::from_bytes(b"x".to_vec()), DeviceHeaders::new());
        let results = router.handler_for("in").unwrap().handle(bundle).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output_device_name, "out");
    }
}
