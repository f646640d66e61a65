use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::{DeviceStatus, Transporter};
use crate::Error;

/// A transport that records outbound traffic instead of talking to a
/// kernel endpoint. Used by the test suite and for protocol bring-up
/// without USB hardware.
#[derive(Default)]
pub struct DummyTransport {
    pub sent_containers: Arc<Mutex<Vec<Vec<u8>>>>,
    pub sent_events: Arc<Mutex<Vec<Vec<u8>>>>,
    cancel: Arc<AtomicBool>,
    status: Arc<Mutex<Option<DeviceStatus>>>,
    partial: Vec<u8>,
}

impl DummyTransport {
    pub fn new() -> DummyTransport {
        DummyTransport::default()
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// All containers sent so far, one finished container per entry.
    pub fn containers(&self) -> Vec<Vec<u8>> {
        self.sent_containers.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Vec<u8>> {
        self.sent_events.lock().unwrap().clone()
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        *self.status.lock().unwrap()
    }

    pub fn clear(&mut self) {
        self.sent_containers.lock().unwrap().clear();
        self.sent_events.lock().unwrap().clear();
        self.partial.clear();
    }
}

impl Transporter for DummyTransport {
    fn send_container(&mut self, data: &[u8], last_packet: bool) -> Result<(), Error> {
        self.partial.extend_from_slice(data);
        if last_packet {
            let container = std::mem::take(&mut self.partial);
            self.sent_containers.lock().unwrap().push(container);
        }
        Ok(())
    }

    fn send_event(&mut self, data: &[u8]) -> Result<(), Error> {
        self.sent_events.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn cancel_pending(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn set_device_status(&mut self, status: DeviceStatus) {
        *self.status.lock().unwrap() = Some(status);
    }
}
