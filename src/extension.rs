use crate::deviceinfo::DeviceInfoProvider;
use crate::response::StandardResponseCode;
use crate::storage::StorageFactory;

/// Outcome of an extension-handled operation.
#[derive(Debug, Clone)]
pub struct ExtensionReply {
    pub response: StandardResponseCode,
    pub params: Vec<u32>,
    /// Payload for a responder-to-initiator data phase, if any.
    pub data: Option<Vec<u8>>,
}

impl ExtensionReply {
    pub fn ok() -> ExtensionReply {
        ExtensionReply {
            response: StandardResponseCode::Ok,
            params: vec![],
            data: None,
        }
    }
}

/// A vendor extension contributing operations outside the standard
/// set. The responder consults registered extensions before answering
/// OperationNotSupported.
pub trait MtpExtension: Send {
    /// Operation codes claimed by this extension.
    fn operations(&self) -> &[u16];

    fn handle(
        &mut self,
        opcode: u16,
        params: &[u32],
        data: Option<&[u8]>,
        factory: &mut StorageFactory,
        device_info: &mut DeviceInfoProvider,
    ) -> ExtensionReply;
}

/// Registry of vendor extensions, dispatched in registration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn MtpExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> ExtensionRegistry {
        ExtensionRegistry::default()
    }

    pub fn register(&mut self, extension: Box<dyn MtpExtension>) {
        self.extensions.push(extension);
    }

    pub fn handles(&self, opcode: u16) -> bool {
        self.extensions
            .iter()
            .any(|e| e.operations().contains(&opcode))
    }

    pub fn dispatch(
        &mut self,
        opcode: u16,
        params: &[u32],
        data: Option<&[u8]>,
        factory: &mut StorageFactory,
        device_info: &mut DeviceInfoProvider,
    ) -> Option<ExtensionReply> {
        for extension in &mut self.extensions {
            if extension.operations().contains(&opcode) {
                return Some(extension.handle(opcode, params, data, factory, device_info));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExtension;

    impl MtpExtension for EchoExtension {
        fn operations(&self) -> &[u16] {
            &[0x9C01]
        }

        fn handle(
            &mut self,
            _opcode: u16,
            params: &[u32],
            _data: Option<&[u8]>,
            _factory: &mut StorageFactory,
            _device_info: &mut DeviceInfoProvider,
        ) -> ExtensionReply {
            ExtensionReply {
                response: StandardResponseCode::Ok,
                params: params.to_vec(),
                data: None,
            }
        }
    }

    #[test]
    fn registry_claims_and_dispatches() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(EchoExtension));
        assert!(registry.handles(0x9C01));
        assert!(!registry.handles(0x9C02));
    }
}
