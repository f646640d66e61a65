use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use byteorder::{LittleEndian, WriteBytesExt};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, trace, warn};

use crate::container::{ContainerInfo, CONTAINER_HEADER_SIZE};
use crate::transport::descriptors;
use crate::transport::{ControlRequest, DeviceStatus, TransportIn, Transporter};
use crate::Error;

// FunctionFS event types delivered on ep0
const FFS_EVENT_BIND: u8 = 0;
const FFS_EVENT_UNBIND: u8 = 1;
const FFS_EVENT_ENABLE: u8 = 2;
const FFS_EVENT_DISABLE: u8 = 3;
const FFS_EVENT_SETUP: u8 = 4;
const FFS_EVENT_SUSPEND: u8 = 5;
const FFS_EVENT_RESUME: u8 = 6;

const FFS_EVENT_SIZE: usize = 12;

// MTP class-specific requests (MTP 1.1 §3.2)
const MTP_REQ_CANCEL: u8 = 0x64;
const MTP_REQ_GET_EXTENDED_EVENT_DATA: u8 = 0x65;
const MTP_REQ_DEVICE_RESET: u8 = 0x66;
const MTP_REQ_GET_DEVICE_STATUS: u8 = 0x67;

const USB_DIR_DEVICE_TO_HOST: u8 = 0x80;

/// Largest read issued against the bulk-out endpoint.
const BULK_READ_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
struct SetupPacket {
    request_type: u8,
    request: u8,
    #[allow(dead_code)]
    value: u16,
    #[allow(dead_code)]
    index: u16,
    length: u16,
}

impl SetupPacket {
    fn parse(buf: &[u8]) -> SetupPacket {
        SetupPacket {
            request_type: buf[0],
            request: buf[1],
            value: u16::from_le_bytes([buf[2], buf[3]]),
            index: u16::from_le_bytes([buf[4], buf[5]]),
            length: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }

    fn device_to_host(&self) -> bool {
        self.request_type & USB_DIR_DEVICE_TO_HOST != 0
    }
}

/// The USB FunctionFS transport: ep0 control handling plus bulk and
/// interrupt data endpoints, exposed through the [`Transporter`] trait
/// and a [`TransportIn`] channel.
pub struct FfsTransport {
    ep_in: Arc<Mutex<Option<File>>>,
    ep_int: Arc<Mutex<Option<File>>>,
    cancel: Arc<AtomicBool>,
    status: Arc<AtomicU16>,
}

impl FfsTransport {
    /// Opens a FunctionFS mount (e.g. `/dev/ffs-mtp`), writes the USB
    /// descriptors and strings to ep0 and spawns the control thread.
    /// Data endpoints open once the kernel reports ENABLE.
    pub fn open(dir: &Path) -> Result<(FfsTransport, Receiver<TransportIn>), Error> {
        let mut ep0 = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join("ep0"))
            .map_err(|e| Error::Transport(format!("cannot open ep0: {}", e)))?;
        ep0.write_all(&descriptors::descriptors_blob())
            .map_err(|e| Error::Transport(format!("descriptor write failed: {}", e)))?;
        ep0.write_all(&descriptors::strings_blob())
            .map_err(|e| Error::Transport(format!("strings write failed: {}", e)))?;
        info!("functionfs descriptors written to {}", dir.display());

        let (tx, rx) = bounded(64);
        let transport = FfsTransport {
            ep_in: Arc::new(Mutex::new(None)),
            ep_int: Arc::new(Mutex::new(None)),
            cancel: Arc::new(AtomicBool::new(false)),
            status: Arc::new(AtomicU16::new(DeviceStatus::Ok.code())),
        };

        let control = ControlTask {
            dir: dir.to_path_buf(),
            ep0,
            ep_in: Arc::clone(&transport.ep_in),
            ep_int: Arc::clone(&transport.ep_int),
            cancel: Arc::clone(&transport.cancel),
            status: Arc::clone(&transport.status),
            tx,
        };
        thread::Builder::new()
            .name("mtp-control".into())
            .spawn(move || control.run())
            .map_err(Error::Io)?;

        Ok((transport, rx))
    }
}

impl Transporter for FfsTransport {
    fn send_container(&mut self, data: &[u8], _last_packet: bool) -> Result<(), Error> {
        let mut guard = self.ep_in.lock().unwrap();
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("bulk-in endpoint not enabled".into()))?;
        file.write_all(data).map_err(Error::Io)?;
        Ok(())
    }

    fn send_event(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut guard = self.ep_int.lock().unwrap();
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("interrupt endpoint not enabled".into()))?;
        file.write_all(data).map_err(Error::Io)?;
        Ok(())
    }

    fn cancel_pending(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn set_device_status(&mut self, status: DeviceStatus) {
        self.status.store(status.code(), Ordering::SeqCst);
    }
}

struct ControlTask {
    dir: PathBuf,
    ep0: File,
    ep_in: Arc<Mutex<Option<File>>>,
    ep_int: Arc<Mutex<Option<File>>>,
    cancel: Arc<AtomicBool>,
    status: Arc<AtomicU16>,
    tx: Sender<TransportIn>,
}

impl ControlTask {
    fn run(mut self) {
        let mut buf = [0u8; FFS_EVENT_SIZE * 4];
        loop {
            let n = match self.ep0.read(&mut buf) {
                Ok(0) => {
                    debug!("ep0 closed");
                    return;
                }
                Ok(n) => n,
                Err(err) => {
                    warn!("ep0 read failed: {}", err);
                    return;
                }
            };
            for chunk in buf[..n].chunks_exact(FFS_EVENT_SIZE) {
                if !self.handle_event(chunk) {
                    return;
                }
            }
        }
    }

    /// Returns false when the responder side is gone.
    fn handle_event(&mut self, event: &[u8]) -> bool {
        let event_type = event[8];
        match event_type {
            FFS_EVENT_BIND => {
                debug!("functionfs BIND");
                true
            }
            FFS_EVENT_UNBIND => {
                debug!("functionfs UNBIND");
                self.close_endpoints();
                true
            }
            FFS_EVENT_ENABLE => {
                debug!("functionfs ENABLE");
                if let Err(err) = self.open_endpoints() {
                    warn!("cannot open data endpoints: {}", err);
                }
                self.tx.send(TransportIn::Control(ControlRequest::Resume)).is_ok()
            }
            FFS_EVENT_DISABLE => {
                debug!("functionfs DISABLE");
                self.close_endpoints();
                self.tx
                    .send(TransportIn::Control(ControlRequest::Suspend))
                    .is_ok()
            }
            FFS_EVENT_SUSPEND => self
                .tx
                .send(TransportIn::Control(ControlRequest::Suspend))
                .is_ok(),
            FFS_EVENT_RESUME => self
                .tx
                .send(TransportIn::Control(ControlRequest::Resume))
                .is_ok(),
            FFS_EVENT_SETUP => self.handle_setup(SetupPacket::parse(&event[0..8])),
            other => {
                trace!("unhandled functionfs event {}", other);
                true
            }
        }
    }

    fn handle_setup(&mut self, setup: SetupPacket) -> bool {
        trace!(
            "setup request {:#04x} type {:#04x} len {}",
            setup.request,
            setup.request_type,
            setup.length
        );
        match setup.request {
            MTP_REQ_CANCEL => {
                // Drain the cancellation data stage (code + transaction
                // id) before acknowledging.
                if !setup.device_to_host() && setup.length > 0 {
                    let mut stage = vec![0u8; setup.length as usize];
                    self.ep0.read_exact(&mut stage).ok();
                }
                self.cancel.store(true, Ordering::SeqCst);
                self.status
                    .store(DeviceStatus::TransactionCancelled.code(), Ordering::SeqCst);
                self.tx.send(TransportIn::Control(ControlRequest::Cancel)).is_ok()
            }
            MTP_REQ_DEVICE_RESET => {
                self.cancel.store(false, Ordering::SeqCst);
                self.status.store(DeviceStatus::Ok.code(), Ordering::SeqCst);
                self.tx
                    .send(TransportIn::Control(ControlRequest::DeviceReset))
                    .is_ok()
            }
            MTP_REQ_GET_DEVICE_STATUS => {
                let mut response = Vec::with_capacity(4);
                response.write_u16::<LittleEndian>(4).ok();
                response
                    .write_u16::<LittleEndian>(self.status.load(Ordering::SeqCst))
                    .ok();
                if let Err(err) = self.ep0.write_all(&response) {
                    warn!("device status reply failed: {}", err);
                }
                true
            }
            MTP_REQ_GET_EXTENDED_EVENT_DATA => {
                // No extended events are collected; report the request
                // as unsupported in the status word.
                let mut response = Vec::with_capacity(4);
                response.write_u16::<LittleEndian>(4).ok();
                response.write_u16::<LittleEndian>(0x2005).ok();
                self.ep0.write_all(&response).ok();
                true
            }
            other => {
                debug!("unsupported setup request {:#04x}", other);
                true
            }
        }
    }

    fn open_endpoints(&mut self) -> Result<(), Error> {
        let ep_in = OpenOptions::new()
            .write(true)
            .open(self.dir.join("ep1"))
            .map_err(Error::Io)?;
        let ep_out = OpenOptions::new()
            .read(true)
            .open(self.dir.join("ep2"))
            .map_err(Error::Io)?;
        let ep_int = OpenOptions::new()
            .write(true)
            .open(self.dir.join("ep3"))
            .map_err(Error::Io)?;
        *self.ep_in.lock().unwrap() = Some(ep_in);
        *self.ep_int.lock().unwrap() = Some(ep_int);

        let reader = ReaderTask {
            ep_out,
            tx: self.tx.clone(),
        };
        thread::Builder::new()
            .name("mtp-bulk-out".into())
            .spawn(move || reader.run())
            .map_err(Error::Io)?;
        Ok(())
    }

    fn close_endpoints(&mut self) {
        *self.ep_in.lock().unwrap() = None;
        *self.ep_int.lock().unwrap() = None;
        // the reader thread exits on its next failed read
    }
}

struct ReaderTask {
    ep_out: File,
    tx: Sender<TransportIn>,
}

impl ReaderTask {
    /// Blocks on the bulk-out endpoint, framing packets into container
    /// phases: a phase ends when the announced container length is
    /// reached, or on a short packet for extra-large transfers.
    fn run(mut self) {
        let mut buf = vec![0u8; BULK_READ_SIZE];
        // Bytes still expected for the current container; None between
        // containers, u64::MAX while inside an extra-large data phase.
        let mut remaining: Option<u64> = None;
        loop {
            let n = match self.ep_out.read(&mut buf) {
                Ok(0) => {
                    debug!("bulk-out endpoint closed");
                    return;
                }
                Ok(n) => n,
                Err(err) => {
                    debug!("bulk-out read ended: {}", err);
                    return;
                }
            };
            let data = buf[..n].to_vec();
            let (first, last) = match remaining.take() {
                None => {
                    if n < CONTAINER_HEADER_SIZE {
                        warn!("runt packet of {} bytes dropped", n);
                        continue;
                    }
                    match ContainerInfo::parse(&data[..CONTAINER_HEADER_SIZE]) {
                        Ok(info) if info.is_extra_large() => {
                            remaining = Some(u64::MAX);
                            (true, false)
                        }
                        Ok(info) => {
                            let total = info.len as u64;
                            if total <= n as u64 {
                                (true, true)
                            } else {
                                remaining = Some(total - n as u64);
                                (true, false)
                            }
                        }
                        Err(err) => {
                            warn!("unparsable container header: {}", err);
                            continue;
                        }
                    }
                }
                Some(u64::MAX) => {
                    // extra-large: a short packet ends the phase
                    if n < BULK_READ_SIZE {
                        (false, true)
                    } else {
                        remaining = Some(u64::MAX);
                        (false, false)
                    }
                }
                Some(left) => {
                    if left <= n as u64 {
                        (false, true)
                    } else {
                        remaining = Some(left - n as u64);
                        (false, false)
                    }
                }
            };
            if self
                .tx
                .send(TransportIn::Packet { data, first, last })
                .is_err()
            {
                return;
            }
        }
    }
}
