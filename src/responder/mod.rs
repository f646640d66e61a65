use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use log::{debug, trace, warn};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::command::{OperationCode, StandardOperationCode};
use crate::container::{RxContainer, TxContainer, CONTAINER_HEADER_SIZE, EXTRA_LARGE_CONTAINER_LEN};
use crate::datasets::ObjectInfo;
use crate::deviceinfo::DeviceInfoProvider;
use crate::event::StandardEventCode;
use crate::extension::ExtensionRegistry;
use crate::response::StandardResponseCode;
use crate::storage::{StorageEvent, StorageFactory, StorageSignal};
use crate::transport::{ControlRequest, DeviceStatus, TransportIn, Transporter};
use crate::{ContainerType, Error, ObjHandle, StorageId};

mod handlers;

/// Transaction id attached to events that are not part of a
/// transaction.
const EVENT_TID: u32 = 0xFFFF_FFFF;

/// Minimum spacing of StorageInfoChanged events per storage.
const STORAGE_INFO_EVENT_WINDOW: Duration = Duration::from_secs(1);

/// Directory entries processed per cooperative enumeration step.
const ENUMERATION_BUDGET: usize = 32;

/// Slice size for segmented object reads.
pub(crate) const SEND_SEGMENT_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Idle,
    WaitData,
    WaitResponse,
    TxCancel,
    Suspend,
    WaitStorage,
}

/// The current transaction's request phase.
#[derive(Debug, Clone)]
pub(crate) struct CurrentRequest {
    pub op: StandardOperationCode,
    pub raw_code: u16,
    pub tid: u32,
    pub params: Vec<u32>,
}

/// State carried from SendObjectInfo/SendObjectPropList to the
/// following SendObject.
#[derive(Debug, Clone)]
pub(crate) struct SendObjectSequence {
    pub handle: ObjHandle,
    pub expected_size: u64,
    pub bytes_written: u64,
    pub writing: bool,
}

/// The responder: one instance serves one USB function and at most one
/// MTP session.
pub struct Responder<T: Transporter> {
    transport: T,
    transport_rx: Receiver<TransportIn>,
    storage_rx: Receiver<StorageSignal>,
    pub(crate) factory: StorageFactory,
    pub(crate) device_info: DeviceInfoProvider,
    pub(crate) extensions: ExtensionRegistry,

    state: ResponderState,
    prev_state: ResponderState,
    session_id: Option<u32>,
    last_tid: u32,

    pub(crate) request: Option<CurrentRequest>,
    data_container: Option<RxContainer>,
    pub(crate) send_object: Option<SendObjectSequence>,
    pub(crate) copied_handle: Option<ObjHandle>,

    /// Raw packets that arrived before storage became ready.
    wait_storage_buf: Vec<(Vec<u8>, bool, bool)>,

    storage_info_last: HashMap<StorageId, Instant>,
    storage_info_pending: HashSet<StorageId>,
}

impl<T: Transporter> Responder<T> {
    pub fn new(
        transport: T,
        transport_rx: Receiver<TransportIn>,
        storage_rx: Receiver<StorageSignal>,
        factory: StorageFactory,
        device_info: DeviceInfoProvider,
    ) -> Responder<T> {
        let state = if factory.storage_count() > 0 && !factory.all_ready() {
            ResponderState::WaitStorage
        } else {
            ResponderState::Idle
        };
        Responder {
            transport,
            transport_rx,
            storage_rx,
            factory,
            device_info,
            extensions: ExtensionRegistry::new(),
            state,
            prev_state: state,
            session_id: None,
            last_tid: 0,
            request: None,
            data_container: None,
            send_object: None,
            copied_handle: None,
            wait_storage_buf: Vec::new(),
            storage_info_last: HashMap::new(),
            storage_info_pending: HashSet::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn session_open(&self) -> bool {
        self.session_id.is_some()
    }

    fn set_state(&mut self, state: ResponderState) {
        if state != self.state {
            trace!("responder state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// The main loop: serializes every transaction and event on the
    /// calling thread. Returns when the transport channel closes.
    pub fn run(&mut self) {
        let transport_rx = self.transport_rx.clone();
        let storage_rx = self.storage_rx.clone();
        loop {
            if self.state == ResponderState::WaitStorage {
                match self.factory.continue_enumeration(ENUMERATION_BUDGET) {
                    Ok(true) => self.storage_became_ready(),
                    Ok(false) => {}
                    Err(err) => warn!("enumeration error: {}", err),
                }
            }
            select! {
                recv(transport_rx) -> msg => match msg {
                    Ok(TransportIn::Packet { data, first, last }) => {
                        self.receive_container(&data, first, last);
                    }
                    Ok(TransportIn::Control(request)) => self.handle_control(request),
                    Err(_) => return,
                },
                recv(storage_rx) -> signal => match signal {
                    Ok(signal) => self.handle_storage_signal(signal),
                    Err(_) => return,
                },
                default(Duration::from_millis(100)) => {}
            }
            self.factory.tick();
            self.flush_pending_storage_info();
        }
    }

    /// Runs queued enumeration to completion; used at startup and by
    /// tests to reach the ready state synchronously.
    pub fn drive_enumeration(&mut self) {
        while self.state == ResponderState::WaitStorage {
            match self.factory.continue_enumeration(ENUMERATION_BUDGET) {
                Ok(done) => {
                    self.pump_storage_signals();
                    if done {
                        self.storage_became_ready();
                    }
                }
                Err(err) => {
                    warn!("enumeration error: {}", err);
                    return;
                }
            }
        }
    }

    /// Drains pending storage signals without blocking.
    pub fn pump_storage_signals(&mut self) {
        while let Ok(signal) = self.storage_rx.try_recv() {
            self.handle_storage_signal(signal);
        }
    }

    fn storage_became_ready(&mut self) {
        if self.state != ResponderState::WaitStorage {
            return;
        }
        debug!("all storages ready, replaying {} packets", self.wait_storage_buf.len());
        self.set_state(ResponderState::Idle);
        let buffered = std::mem::take(&mut self.wait_storage_buf);
        for (data, first, last) in buffered {
            self.receive_container(&data, first, last);
        }
    }

    // ---- inbound containers -------------------------------------------------

    /// Entry point for one bulk-out packet.
    pub fn receive_container(&mut self, data: &[u8], first: bool, last: bool) {
        match self.state {
            ResponderState::WaitStorage => self.receive_while_waiting(data, first, last),
            ResponderState::Suspend => {
                warn!("dropping {} bytes received while suspended", data.len());
            }
            ResponderState::TxCancel => {
                // Cancelled transactions are silent until the next
                // request container opens a fresh transaction.
                if first && data.len() >= CONTAINER_HEADER_SIZE {
                    if let Ok(info) = crate::container::ContainerInfo::parse(&data[..CONTAINER_HEADER_SIZE]) {
                        if info.kind == ContainerType::Command {
                            self.leave_cancelled_state();
                            self.receive_container(data, first, last);
                        }
                    }
                }
            }
            ResponderState::Idle | ResponderState::WaitResponse => {
                if !first {
                    warn!("continuation packet outside a data phase, dropped");
                    return;
                }
                self.receive_request(data, last);
            }
            ResponderState::WaitData => self.receive_data(data, first, last),
        }
    }

    fn receive_while_waiting(&mut self, data: &[u8], first: bool, last: bool) {
        if first && data.len() >= CONTAINER_HEADER_SIZE {
            if let Ok(info) = crate::container::ContainerInfo::parse(&data[..CONTAINER_HEADER_SIZE]) {
                // Only operations with neither a storage dependency nor
                // a data phase are served before storage_ready; data
                // phases must stay in arrival order with their request.
                let serve_now = StandardOperationCode::from_u16(info.code)
                    .map(|op| !op.needs_storage() && !op.has_data_phase())
                    .unwrap_or(false);
                if info.kind == ContainerType::Command && serve_now {
                    // served immediately; the state machine is
                    // borrowed into Idle for one transaction
                    self.receive_request(data, last);
                    self.set_state(ResponderState::WaitStorage);
                    return;
                }
            }
        }
        self.wait_storage_buf.push((data.to_vec(), first, last));
    }

    fn receive_request(&mut self, data: &[u8], _last: bool) {
        let mut container = match RxContainer::new(data) {
            Ok(container) => container,
            Err(err) => {
                warn!("dropping unparsable container: {}", err);
                return;
            }
        };
        if container.kind() != ContainerType::Command {
            warn!("expected a command container, got {:?}", container.kind());
            return;
        }
        let raw_code = container.code();
        let tid = container.tid();
        let params = container.read_params().unwrap_or_default();

        if let Some(code) = self.precheck(raw_code, tid) {
            self.send_response_with(raw_code, tid, code, &[]);
            return;
        }

        let op = match StandardOperationCode::from_u16(raw_code) {
            Some(op) => op,
            None => {
                // not a standard operation: offer it to extensions
                if self.extensions.handles(raw_code) {
                    self.request = Some(CurrentRequest {
                        op: StandardOperationCode::Undefined,
                        raw_code,
                        tid,
                        params,
                    });
                    self.last_tid = tid;
                    self.dispatch_extension(None);
                    return;
                }
                self.send_response_with(raw_code, tid, StandardResponseCode::OperationNotSupported, &[]);
                return;
            }
        };

        if !matches!(
            op,
            StandardOperationCode::OpenSession | StandardOperationCode::CloseSession
        ) {
            self.last_tid = tid;
        }

        self.request = Some(CurrentRequest {
            op,
            raw_code,
            tid,
            params,
        });
        self.transport.set_device_status(DeviceStatus::Busy);

        if op.has_data_phase() {
            if op == StandardOperationCode::SendObject && self.send_object.is_none() {
                // no preceding SendObjectInfo/SendObjectPropList
                self.finish_with(StandardResponseCode::NoValidObjectInfo, &[]);
                return;
            }
            self.set_state(ResponderState::WaitData);
            self.data_container = None;
            if op == StandardOperationCode::SendObject {
                self.begin_send_object();
            }
            return;
        }

        self.set_state(ResponderState::WaitResponse);
        self.dispatch_request();
        if self.state == ResponderState::WaitResponse {
            self.set_state(ResponderState::Idle);
        }
    }

    /// Preliminary checks before any dispatch: session, transaction id,
    /// operation support. Returns the failure code, if any.
    fn precheck(&self, raw_code: u16, tid: u32) -> Option<StandardResponseCode> {
        let op = StandardOperationCode::from_u16(raw_code);
        let session_free = matches!(
            op,
            Some(StandardOperationCode::OpenSession) | Some(StandardOperationCode::GetDeviceInfo)
        );
        if self.session_id.is_none() && !session_free {
            return Some(StandardResponseCode::SessionNotOpen);
        }
        let tid_free = matches!(
            op,
            Some(StandardOperationCode::OpenSession) | Some(StandardOperationCode::CloseSession)
        );
        if !tid_free && self.session_id.is_some() && !self.tid_acceptable(tid) {
            return Some(StandardResponseCode::InvalidTransactionId);
        }
        if let Some(op) = op {
            let known = self.device_info.operation_supported(raw_code);
            let implemented = !matches!(
                op,
                StandardOperationCode::Undefined
                    | StandardOperationCode::InitiateCapture
                    | StandardOperationCode::FormatStore
                    | StandardOperationCode::ResetDevice
                    | StandardOperationCode::SelfTest
                    | StandardOperationCode::SetObjectProtection
                    | StandardOperationCode::PowerDown
                    | StandardOperationCode::TerminateOpenCapture
                    | StandardOperationCode::InitiateOpenCapture
                    | StandardOperationCode::Skip
            );
            if !known || !implemented {
                return Some(StandardResponseCode::OperationNotSupported);
            }
        }
        None
    }

    /// Transaction ids are strictly monotonic; 0 is reserved and the
    /// counter wraps from 0xFFFFFFFF to exactly 1.
    fn tid_acceptable(&self, tid: u32) -> bool {
        if tid == 0 {
            return false;
        }
        if self.last_tid == 0xFFFF_FFFF {
            return tid == 1;
        }
        tid > self.last_tid
    }

    // ---- data phase ---------------------------------------------------------

    fn receive_data(&mut self, data: &[u8], first: bool, last: bool) {
        let op = match &self.request {
            Some(request) => request.op,
            None => {
                warn!("data phase with no pending request");
                self.set_state(ResponderState::Idle);
                return;
            }
        };
        if self.transport.cancel_pending() {
            self.cancel_transaction();
            return;
        }
        if op == StandardOperationCode::SendObject {
            self.receive_send_object_data(data, first, last);
            return;
        }

        if first {
            match RxContainer::new(data) {
                Ok(container) => {
                    if container.kind() != ContainerType::Data {
                        warn!("expected a data container, got {:?}", container.kind());
                        self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                        return;
                    }
                    self.data_container = Some(container);
                }
                Err(err) => {
                    warn!("bad data container: {}", err);
                    self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                    return;
                }
            }
        } else if let Some(container) = &mut self.data_container {
            container.append(data);
        } else {
            warn!("data continuation with no first packet, dropped");
            return;
        }

        let complete = self
            .data_container
            .as_ref()
            .map(|c| c.is_complete())
            .unwrap_or(false);
        if complete || last {
            let container = match self.data_container.take() {
                Some(container) => container,
                None => return,
            };
            if !container.is_complete() && !container.info().is_extra_large() {
                self.finish_with(StandardResponseCode::IncompleteTransfer, &[]);
                return;
            }
            self.dispatch_data(container);
            if self.state == ResponderState::WaitData || self.state == ResponderState::WaitResponse
            {
                self.set_state(ResponderState::Idle);
            }
        }
    }

    /// Prepares streaming for the SendObject data phase.
    fn begin_send_object(&mut self) {
        if let Some(sequence) = &mut self.send_object {
            sequence.bytes_written = 0;
            sequence.writing = false;
        }
    }

    fn receive_send_object_data(&mut self, data: &[u8], first: bool, last: bool) {
        let mut sequence = match self.send_object.take() {
            Some(sequence) => sequence,
            None => {
                self.finish_with(StandardResponseCode::NoValidObjectInfo, &[]);
                return;
            }
        };
        let payload = if first {
            if data.len() < CONTAINER_HEADER_SIZE {
                self.send_object = Some(sequence);
                warn!("runt SendObject data packet");
                return;
            }
            &data[CONTAINER_HEADER_SIZE..]
        } else {
            data
        };
        let first_segment = !sequence.writing;
        sequence.writing = true;
        let result =
            self.factory
                .write_data(sequence.handle, payload, first_segment, last);
        match result {
            Ok(()) => {
                sequence.bytes_written += payload.len() as u64;
                if last {
                    let handle = sequence.handle;
                    trace!(
                        "SendObject complete: {} bytes into handle {}",
                        sequence.bytes_written,
                        handle
                    );
                    self.finish_with(StandardResponseCode::Ok, &[]);
                } else {
                    self.send_object = Some(sequence);
                }
            }
            Err(err) => {
                warn!("SendObject write failed: {}", err);
                self.factory.delete_item(sequence.handle, None).ok();
                self.finish_with(err.response_code(), &[]);
            }
        }
    }

    // ---- outbound -----------------------------------------------------------

    /// Sends a data container for the current transaction.
    pub(crate) fn send_data(&mut self, container: TxContainer) -> Result<(), Error> {
        if self.transport.cancel_pending() {
            return Err(StandardResponseCode::TransactionCancelled.into());
        }
        let bytes = container.finish();
        self.transport.send_container(&bytes, true)
    }

    /// Sends the response for the current transaction and returns the
    /// engine to Idle.
    pub(crate) fn finish_with(&mut self, code: StandardResponseCode, params: &[u32]) {
        let (raw_code, tid) = match &self.request {
            Some(request) => (request.raw_code, request.tid),
            None => return,
        };
        self.send_response_with(raw_code, tid, code, params);
    }

    fn send_response_with(
        &mut self,
        _raw_code: u16,
        tid: u32,
        code: StandardResponseCode,
        params: &[u32],
    ) {
        if self.transport.cancel_pending() {
            // a cancelled transaction gets no response
            self.cancel_transaction();
            return;
        }
        let mut container = TxContainer::new(
            ContainerType::Response,
            code.to_u16().unwrap_or(0x2002),
            tid,
        );
        if let Err(err) = container.write_params(params) {
            warn!("response build failed: {}", err);
        }
        let bytes = container.finish();
        if let Err(err) = self.transport.send_container(&bytes, true) {
            warn!("response send failed: {}", err);
        }
        trace!("response {:?} for tid {}", code, tid);
        self.transport.set_device_status(DeviceStatus::Ok);
        self.request = None;
        self.data_container = None;
        if self.state != ResponderState::WaitStorage {
            self.set_state(ResponderState::Idle);
        }
    }

    /// Streams an object to the initiator in segments, polling the
    /// cancel flag between slices. Objects of 4 GiB and more announce
    /// the extra-large sentinel length.
    pub(crate) fn send_object_segmented(
        &mut self,
        handle: ObjHandle,
        total: u64,
        offset: u64,
    ) -> Result<u64, Error> {
        let raw_code = self.request.as_ref().map(|r| r.raw_code).unwrap_or(0);
        let tid = self.request.as_ref().map(|r| r.tid).unwrap_or(0);

        let announced = total + CONTAINER_HEADER_SIZE as u64;
        let mut header = TxContainer::new(ContainerType::Data, raw_code, tid);
        if announced >= EXTRA_LARGE_CONTAINER_LEN as u64 {
            header.mark_extra_large();
        } else {
            header.pin_length(announced as u32);
        }
        let header_bytes = header.finish();

        let mut buf = vec![0u8; SEND_SEGMENT_SIZE];
        let mut sent = 0u64;
        let mut first = true;
        loop {
            if self.transport.cancel_pending() {
                return Err(StandardResponseCode::TransactionCancelled.into());
            }
            let want = ((total - sent) as usize).min(SEND_SEGMENT_SIZE);
            let got = self.factory.read_data(handle, offset + sent, &mut buf[..want])?;
            let last = sent + got as u64 >= total || got == 0;
            if first {
                let mut packet = Vec::with_capacity(header_bytes.len() + got);
                packet.extend_from_slice(&header_bytes);
                packet.extend_from_slice(&buf[..got]);
                self.transport.send_container(&packet, last)?;
                first = false;
            } else {
                self.transport.send_container(&buf[..got], last)?;
            }
            sent += got as u64;
            if last {
                break;
            }
        }
        Ok(sent)
    }

    // ---- control & events ---------------------------------------------------

    pub fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Cancel => self.cancel_transaction(),
            ControlRequest::DeviceReset => self.device_reset(),
            ControlRequest::Suspend => {
                if self.state != ResponderState::Suspend {
                    self.prev_state = self.state;
                    self.set_state(ResponderState::Suspend);
                }
            }
            ControlRequest::Resume => {
                if self.state == ResponderState::Suspend {
                    let prev = self.prev_state;
                    self.set_state(prev);
                }
            }
        }
    }

    /// Rolls back speculative work and silences the transaction.
    fn cancel_transaction(&mut self) {
        debug!("transaction cancelled");
        if let Some(sequence) = self.send_object.take() {
            self.factory.delete_item(sequence.handle, None).ok();
        }
        if let Some(copied) = self.copied_handle.take() {
            self.factory.delete_item(copied, None).ok();
        }
        self.request = None;
        self.data_container = None;
        self.transport.set_device_status(DeviceStatus::TransactionCancelled);
        self.set_state(ResponderState::TxCancel);
    }

    fn leave_cancelled_state(&mut self) {
        self.transport.clear_cancel();
        self.transport.set_device_status(DeviceStatus::Ok);
        self.set_state(ResponderState::Idle);
    }

    fn device_reset(&mut self) {
        debug!("device reset");
        self.transport.clear_cancel();
        self.transport.set_device_status(DeviceStatus::Ok);
        if self.session_id.take().is_some() {
            self.factory.set_session_open(false);
        }
        self.request = None;
        self.data_container = None;
        self.send_object = None;
        self.copied_handle = None;
        self.last_tid = 0;
        if self.state != ResponderState::WaitStorage {
            self.set_state(ResponderState::Idle);
        }
    }

    pub fn handle_storage_signal(&mut self, signal: StorageSignal) {
        match signal {
            StorageSignal::Ready(storage_id) => {
                debug!("storage {:08x} ready", storage_id);
                if self.factory.all_ready() {
                    self.storage_became_ready();
                }
            }
            StorageSignal::Event(event) => {
                self.factory.note_event(&event);
                self.forward_event(event);
            }
            StorageSignal::Watch { storage_id, event } => {
                self.factory.dispatch_watch_event(storage_id, event);
            }
        }
    }

    fn forward_event(&mut self, event: StorageEvent) {
        if self.session_id.is_none() {
            return;
        }
        if event.code == StandardEventCode::StorageInfoChanged {
            if let Some(&storage_id) = event.params.first() {
                let now = Instant::now();
                let recent = self
                    .storage_info_last
                    .get(&storage_id)
                    .map(|at| now.duration_since(*at) < STORAGE_INFO_EVENT_WINDOW)
                    .unwrap_or(false);
                if recent {
                    self.storage_info_pending.insert(storage_id);
                    return;
                }
                self.storage_info_last.insert(storage_id, now);
            }
        }
        self.emit_event(event.code, &event.params);
    }

    fn flush_pending_storage_info(&mut self) {
        if self.storage_info_pending.is_empty() || self.session_id.is_none() {
            return;
        }
        let now = Instant::now();
        let due: Vec<StorageId> = self
            .storage_info_pending
            .iter()
            .copied()
            .filter(|sid| {
                self.storage_info_last
                    .get(sid)
                    .map(|at| now.duration_since(*at) >= STORAGE_INFO_EVENT_WINDOW)
                    .unwrap_or(true)
            })
            .collect();
        for storage_id in due {
            self.storage_info_pending.remove(&storage_id);
            self.storage_info_last.insert(storage_id, now);
            self.emit_event(StandardEventCode::StorageInfoChanged, &[storage_id]);
        }
    }

    fn emit_event(&mut self, code: StandardEventCode, params: &[u32]) {
        let mut container = TxContainer::new(
            ContainerType::Event,
            code.to_u16().unwrap_or(0x4000),
            EVENT_TID,
        );
        if container.write_params(params).is_err() {
            return;
        }
        let bytes = container.finish();
        if let Err(err) = self.transport.send_event(&bytes) {
            debug!("event send failed: {}", err);
        }
    }

    // ---- session bookkeeping (used by handlers) -----------------------------

    pub(crate) fn open_session(&mut self, session_id: u32) -> Result<(), StandardResponseCode> {
        if session_id == 0 {
            return Err(StandardResponseCode::InvalidParameter);
        }
        if self.session_id.is_some() {
            return Err(StandardResponseCode::SessionAlreadyOpen);
        }
        self.session_id = Some(session_id);
        self.last_tid = 0;
        self.factory.set_session_open(true);
        debug!("session {} opened", session_id);
        Ok(())
    }

    pub(crate) fn close_session(&mut self) -> Result<(), StandardResponseCode> {
        if self.session_id.take().is_none() {
            return Err(StandardResponseCode::SessionNotOpen);
        }
        self.factory.set_session_open(false);
        self.send_object = None;
        self.copied_handle = None;
        self.last_tid = 0;
        debug!("session closed");
        Ok(())
    }

    pub(crate) fn current_session(&self) -> u32 {
        self.session_id.unwrap_or(0)
    }

    /// The expected data-phase size of the SendObject in flight, used
    /// by transports that need to frame reads ahead of time.
    pub fn pending_object_size(&self) -> Option<u64> {
        self.send_object.as_ref().map(|s| s.expected_size)
    }

    // ---- extension dispatch -------------------------------------------------

    pub(crate) fn dispatch_extension(&mut self, data: Option<RxContainer>) {
        let request = match self.request.clone() {
            Some(request) => request,
            None => return,
        };
        let payload = data.map(|c| c.payload().to_vec());
        let reply = self.extensions.dispatch(
            request.raw_code,
            &request.params,
            payload.as_deref(),
            &mut self.factory,
            &mut self.device_info,
        );
        match reply {
            Some(reply) => {
                if let Some(data) = reply.data {
                    let mut container =
                        TxContainer::new(ContainerType::Data, request.raw_code, request.tid);
                    use std::io::Write;
                    container.write_all(&data).ok();
                    self.send_data(container).ok();
                }
                self.finish_with(reply.response, &reply.params);
            }
            None => self.finish_with(StandardResponseCode::OperationNotSupported, &[]),
        }
    }

    // ---- helpers shared with handlers ---------------------------------------

    pub(crate) fn decode_object_info(container: &mut RxContainer) -> Result<ObjectInfo, Error> {
        ObjectInfo::decode(container)
    }

    pub(crate) fn response_for(err: &Error) -> StandardResponseCode {
        err.response_code()
    }

    /// Operation codes announced in the DeviceInfo dataset but coming
    /// from an initiator (for diagnostics).
    pub(crate) fn describe_op(raw_code: u16) -> String {
        match OperationCode::from_u16(raw_code) {
            Some(code) => format!("{:x}", code),
            None => format!("{:04x}", raw_code),
        }
    }
}
