use log::{trace, warn};
use num_traits::ToPrimitive;

use crate::command::StandardOperationCode;
use crate::container::{RxContainer, TxContainer};
use crate::data::{MtpData, MtpRead, MtpWrite};
use crate::datasets::{
    read_prop_list, write_dev_prop_desc, write_obj_prop_desc, write_prop_list_element,
    PropListElement,
};
use crate::format::FormatCode;
use crate::properties::{object_prop_desc, supported_object_props, ObjPropDescVal, ObjectPropCode};
use crate::response::StandardResponseCode;
use crate::responder::{CurrentRequest, Responder, SendObjectSequence};
use crate::transport::Transporter;
use crate::{ContainerType, Error, ObjHandle, OBJ_HANDLE_ALL, STORAGE_ID_ALL};

impl<T: Transporter> Responder<T> {
    /// Routes the request phase of the current transaction.
    pub(crate) fn dispatch_request(&mut self) {
        let request = match self.request.clone() {
            Some(request) => request,
            None => return,
        };
        trace!(
            "dispatch {} tid {} params {:?}",
            Self::describe_op(request.raw_code),
            request.tid,
            request.params
        );
        use StandardOperationCode::*;
        match request.op {
            GetDeviceInfo => self.on_get_device_info(&request),
            OpenSession => self.on_open_session(&request),
            CloseSession => self.on_close_session(&request),
            GetStorageIDs => self.on_get_storage_ids(&request),
            GetStorageInfo => self.on_get_storage_info(&request),
            GetNumObjects => self.on_get_num_objects(&request),
            GetObjectHandles => self.on_get_object_handles(&request),
            GetObjectInfo => self.on_get_object_info(&request),
            GetObject => self.on_get_object(&request),
            GetPartialObject => self.on_get_partial_object(&request),
            GetThumb => self.on_get_thumb(&request),
            DeleteObject => self.on_delete_object(&request),
            SendObjectInfo => { /* resolved in the data phase */ }
            MoveObject => self.on_move_object(&request),
            CopyObject => self.on_copy_object(&request),
            GetDevicePropDesc => self.on_get_device_prop_desc(&request),
            GetDevicePropValue => self.on_get_device_prop_value(&request),
            ResetDevicePropValue => self.on_reset_device_prop_value(&request),
            GetObjectPropsSupported => self.on_get_object_props_supported(&request),
            GetObjectPropDesc => self.on_get_object_prop_desc(&request),
            GetObjectPropValue => self.on_get_object_prop_value(&request),
            GetObjectPropList => self.on_get_object_prop_list(&request),
            GetInterdependentPropDesc => self.on_get_interdependent_prop_desc(&request),
            GetObjectReferences => self.on_get_object_references(&request),
            _ => self.finish_with(StandardResponseCode::OperationNotSupported, &[]),
        }
    }

    /// Routes a completed initiator-to-responder data phase.
    pub(crate) fn dispatch_data(&mut self, mut container: RxContainer) {
        let request = match self.request.clone() {
            Some(request) => request,
            None => return,
        };
        use StandardOperationCode::*;
        match request.op {
            SendObjectInfo => self.on_send_object_info_data(&request, &mut container),
            SendObjectPropList => self.on_send_object_prop_list_data(&request, &mut container),
            SetDevicePropValue => self.on_set_device_prop_value_data(&request, &mut container),
            SetObjectPropValue => self.on_set_object_prop_value_data(&request, &mut container),
            SetObjectPropList => self.on_set_object_prop_list_data(&request, &mut container),
            SetObjectReferences => self.on_set_object_references_data(&request, &mut container),
            Undefined => self.dispatch_extension(Some(container)),
            _ => self.finish_with(StandardResponseCode::OperationNotSupported, &[]),
        }
    }

    fn data_container(&self, request: &CurrentRequest) -> TxContainer {
        TxContainer::new(ContainerType::Data, request.raw_code, request.tid)
    }

    // ---- device & session ---------------------------------------------------

    fn on_get_device_info(&mut self, request: &CurrentRequest) {
        let dataset = self.device_info.dataset();
        let mut data = self.data_container(request);
        if let Err(err) = dataset.encode(&mut data) {
            warn!("device info encode failed: {}", err);
            self.finish_with(StandardResponseCode::GeneralError, &[]);
            return;
        }
        if self.send_data(data).is_err() {
            return;
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    fn on_open_session(&mut self, request: &CurrentRequest) {
        let session_id = request.params.first().copied().unwrap_or(0);
        match self.open_session(session_id) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(StandardResponseCode::SessionAlreadyOpen) => {
                let current = self.current_session();
                self.finish_with(StandardResponseCode::SessionAlreadyOpen, &[current]);
            }
            Err(code) => self.finish_with(code, &[]),
        }
    }

    fn on_close_session(&mut self, request: &CurrentRequest) {
        let _ = request;
        match self.close_session() {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(code) => self.finish_with(code, &[]),
        }
    }

    // ---- storage enumeration ------------------------------------------------

    fn on_get_storage_ids(&mut self, request: &CurrentRequest) {
        let ids = self.factory.storage_ids();
        let mut data = self.data_container(request);
        if data.write_mtp_slice(&ids, |w, v| w.write_mtp_u32(*v)).is_err() {
            self.finish_with(StandardResponseCode::GeneralError, &[]);
            return;
        }
        if self.send_data(data).is_err() {
            return;
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    fn on_get_storage_info(&mut self, request: &CurrentRequest) {
        let storage_id = request.params.first().copied().unwrap_or(0);
        match self.factory.storage_info(storage_id) {
            Ok(info) => {
                let mut data = self.data_container(request);
                if info.encode(&mut data).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn handles_query(
        &self,
        request: &CurrentRequest,
    ) -> Result<Vec<ObjHandle>, Error> {
        let storage_id = request.params.first().copied().unwrap_or(STORAGE_ID_ALL);
        let format = match request.params.get(1).copied().unwrap_or(0) {
            0 => None,
            f => Some(f as u16),
        };
        let parent = match request.params.get(2).copied().unwrap_or(0) {
            0 => None,
            p => Some(p),
        };
        if storage_id != STORAGE_ID_ALL && !self.factory.check_storage(storage_id) {
            return Err(StandardResponseCode::InvalidStorageId.into());
        }
        self.factory.object_handles(storage_id, format, parent)
    }

    fn on_get_num_objects(&mut self, request: &CurrentRequest) {
        match self.handles_query(request) {
            Ok(handles) => {
                self.finish_with(StandardResponseCode::Ok, &[handles.len() as u32])
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_get_object_handles(&mut self, request: &CurrentRequest) {
        match self.handles_query(request) {
            Ok(handles) => {
                let mut data = self.data_container(request);
                if data
                    .write_mtp_slice(&handles, |w, v| w.write_mtp_u32(*v))
                    .is_err()
                {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    // ---- object info & content ----------------------------------------------

    fn on_get_object_info(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        match self.factory.object_info(handle) {
            Ok(info) => {
                let mut data = self.data_container(request);
                if info.encode(&mut data).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_get_object(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let info = match self.factory.object_info(handle) {
            Ok(info) => info,
            Err(err) => {
                self.finish_with(Self::response_for(&err), &[]);
                return;
            }
        };
        match self.send_object_segmented(handle, info.object_compressed_size, 0) {
            Ok(_) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(Error::Response(StandardResponseCode::TransactionCancelled)) => {
                self.handle_control(crate::transport::ControlRequest::Cancel);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_get_partial_object(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let offset = request.params.get(1).copied().unwrap_or(0) as u64;
        let max_bytes = request.params.get(2).copied().unwrap_or(0) as u64;
        let info = match self.factory.object_info(handle) {
            Ok(info) => info,
            Err(err) => {
                self.finish_with(Self::response_for(&err), &[]);
                return;
            }
        };
        if offset > info.object_compressed_size {
            self.finish_with(StandardResponseCode::InvalidParameter, &[]);
            return;
        }
        let available = info.object_compressed_size - offset;
        let length = available.min(max_bytes);
        match self.send_object_segmented(handle, length, offset) {
            Ok(sent) => self.finish_with(StandardResponseCode::Ok, &[sent as u32]),
            Err(Error::Response(StandardResponseCode::TransactionCancelled)) => {
                self.handle_control(crate::transport::ControlRequest::Cancel);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_get_thumb(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        match self.factory.thumbnail(handle) {
            Ok(thumb) => {
                let mut data = self.data_container(request);
                use std::io::Write;
                if data.write_all(&thumb).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_delete_object(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let format = match request.params.get(1).copied().unwrap_or(0) {
            0 => None,
            f => Some(f as u16),
        };
        if format.is_some() && handle != OBJ_HANDLE_ALL {
            // a format filter only applies to the "all objects" form
            self.finish_with(StandardResponseCode::InvalidParameter, &[]);
            return;
        }
        match self.factory.delete_item(handle, format) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_move_object(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let storage_id = request.params.get(1).copied().unwrap_or(0);
        let parent = request.params.get(2).copied().unwrap_or(0);
        if !self.factory.check_storage(storage_id) {
            self.finish_with(StandardResponseCode::InvalidStorageId, &[]);
            return;
        }
        match self.factory.move_object(handle, parent, storage_id) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_copy_object(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let storage_id = request.params.get(1).copied().unwrap_or(0);
        let parent = request.params.get(2).copied().unwrap_or(0);
        if storage_id != 0 && !self.factory.check_storage(storage_id) {
            self.finish_with(StandardResponseCode::InvalidStorageId, &[]);
            return;
        }
        match self.factory.copy_object(handle, parent, storage_id) {
            Ok(new_handle) => {
                // a Cancel racing the response must take the copy with it
                self.copied_handle = Some(new_handle);
                self.finish_with(StandardResponseCode::Ok, &[new_handle]);
                self.copied_handle = None;
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    // ---- device properties --------------------------------------------------

    fn on_get_device_prop_desc(&mut self, request: &CurrentRequest) {
        let prop = request.params.first().copied().unwrap_or(0) as u16;
        match self.device_info.prop_desc(prop) {
            Ok(desc) => {
                let mut data = self.data_container(request);
                if write_dev_prop_desc(&mut data, &desc).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_get_device_prop_value(&mut self, request: &CurrentRequest) {
        let prop = request.params.first().copied().unwrap_or(0) as u16;
        match self.device_info.prop_value(prop) {
            Ok(value) => {
                let mut data = self.data_container(request);
                if value.write_to(&mut data).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_reset_device_prop_value(&mut self, request: &CurrentRequest) {
        let prop = request.params.first().copied().unwrap_or(0) as u16;
        match self.device_info.reset_prop_value(prop) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_set_device_prop_value_data(
        &mut self,
        request: &CurrentRequest,
        container: &mut RxContainer,
    ) {
        let prop = request.params.first().copied().unwrap_or(0) as u16;
        let desc = match self.device_info.prop_desc(prop) {
            Ok(desc) => desc,
            Err(err) => {
                self.finish_with(Self::response_for(&err), &[]);
                return;
            }
        };
        let kind = desc.data_type.to_u16().unwrap_or(0);
        let value = match MtpData::read_type(kind, container) {
            Ok(value) => value,
            Err(_) => {
                self.finish_with(StandardResponseCode::InvalidDevicePropFormat, &[]);
                return;
            }
        };
        match self.device_info.set_prop_value(prop, value) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    // ---- object properties --------------------------------------------------

    fn on_get_object_props_supported(&mut self, request: &CurrentRequest) {
        let format = request.params.first().copied().unwrap_or(0) as u16;
        let props: Vec<u16> = supported_object_props(FormatCode::from_u16_lossy(format))
            .into_iter()
            .map(|p| p as u16)
            .collect();
        let mut data = self.data_container(request);
        if data.write_mtp_slice(&props, |w, v| w.write_mtp_u16(*v)).is_err() {
            self.finish_with(StandardResponseCode::GeneralError, &[]);
            return;
        }
        if self.send_data(data).is_err() {
            return;
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    fn on_get_object_prop_desc(&mut self, request: &CurrentRequest) {
        let prop = request.params.first().copied().unwrap_or(0) as u16;
        let format = request.params.get(1).copied().unwrap_or(0) as u16;
        let desc = match object_prop_desc(prop) {
            Some(desc) => desc,
            None => {
                self.finish_with(StandardResponseCode::InvalidObjectPropCode, &[]);
                return;
            }
        };
        let supported = supported_object_props(FormatCode::from_u16_lossy(format))
            .contains(&desc.prop_code);
        if !supported {
            self.finish_with(StandardResponseCode::ObjectPropNotSupported, &[]);
            return;
        }
        let mut data = self.data_container(request);
        if write_obj_prop_desc(&mut data, &desc).is_err() {
            self.finish_with(StandardResponseCode::GeneralError, &[]);
            return;
        }
        if self.send_data(data).is_err() {
            return;
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    fn on_get_object_prop_value(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let prop = request.params.get(1).copied().unwrap_or(0) as u16;
        let desc = match object_prop_desc(prop) {
            Some(desc) => desc,
            None => {
                self.finish_with(StandardResponseCode::InvalidObjectPropCode, &[]);
                return;
            }
        };
        let mut vals = vec![ObjPropDescVal::new(desc)];
        match self.factory.object_property_values(handle, &mut vals) {
            Ok(()) => {
                let value = vals[0]
                    .value
                    .clone()
                    .unwrap_or_else(|| MtpData::default_for(vals[0].desc.data_type));
                let mut data = self.data_container(request);
                if value.write_to(&mut data).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_set_object_prop_value_data(
        &mut self,
        request: &CurrentRequest,
        container: &mut RxContainer,
    ) {
        let handle = request.params.first().copied().unwrap_or(0);
        let prop = request.params.get(1).copied().unwrap_or(0) as u16;
        let desc = match object_prop_desc(prop) {
            Some(desc) => desc,
            None => {
                self.finish_with(StandardResponseCode::InvalidObjectPropCode, &[]);
                return;
            }
        };
        let kind = desc.data_type.to_u16().unwrap_or(0);
        let value = match MtpData::read_type(kind, container) {
            Ok(value) => value,
            Err(_) => {
                self.finish_with(StandardResponseCode::InvalidObjectPropFormat, &[]);
                return;
            }
        };
        match self.factory.set_object_property_value(handle, &desc, &value) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_get_object_prop_list(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        let format = request.params.get(1).copied().unwrap_or(0) as u16;
        let prop = request.params.get(2).copied().unwrap_or(0);
        let group = request.params.get(3).copied().unwrap_or(0);
        let depth = request.params.get(4).copied().unwrap_or(0);

        if prop == 0 {
            let code = if group != 0 {
                StandardResponseCode::SpecificationByGroupUnsupported
            } else {
                StandardResponseCode::InvalidObjectPropCode
            };
            self.finish_with(code, &[]);
            return;
        }

        let targets: Vec<ObjHandle> = match depth {
            0 => {
                if !self.factory.has_handle(handle) {
                    self.finish_with(StandardResponseCode::InvalidObjectHandle, &[]);
                    return;
                }
                vec![handle]
            }
            1 => {
                let parent = if handle == 0 { None } else { Some(handle) };
                match self.factory.object_handles(STORAGE_ID_ALL, None, parent.or(Some(crate::OBJ_HANDLE_ROOT_LEVEL))) {
                    Ok(handles) => handles,
                    Err(err) => {
                        self.finish_with(Self::response_for(&err), &[]);
                        return;
                    }
                }
            }
            _ => {
                self.finish_with(StandardResponseCode::SpecificationByDepthUnsupported, &[]);
                return;
            }
        };

        let mut elements: Vec<PropListElement> = Vec::new();
        for target in targets {
            let info = match self.factory.object_info(target) {
                Ok(info) => info,
                Err(_) => continue,
            };
            let target_format = info.object_format.to_u64().unwrap_or(0) as u16;
            if format != 0 && target_format != format {
                continue;
            }
            let descs = if prop == 0xFFFF_FFFF {
                supported_object_props(info.object_format)
                    .into_iter()
                    .filter_map(|p| object_prop_desc(p as u16))
                    .collect::<Vec<_>>()
            } else {
                match object_prop_desc(prop as u16) {
                    Some(desc) => vec![desc],
                    None => {
                        self.finish_with(StandardResponseCode::InvalidObjectPropCode, &[]);
                        return;
                    }
                }
            };
            let mut vals: Vec<ObjPropDescVal> =
                descs.into_iter().map(ObjPropDescVal::new).collect();
            if let Err(err) = self.factory.object_property_values(target, &mut vals) {
                self.finish_with(Self::response_for(&err), &[]);
                return;
            }
            for val in vals {
                if let Some(value) = val.value {
                    elements.push(PropListElement {
                        handle: target,
                        prop_code: val.desc.prop_code as u16,
                        data_type: val.desc.data_type.to_u16().unwrap_or(0),
                        value,
                    });
                }
            }
        }

        let mut data = self.data_container(request);
        let write_result = data
            .write_mtp_u32(elements.len() as u32)
            .and_then(|_| {
                elements
                    .iter()
                    .try_for_each(|e| write_prop_list_element(&mut data, e))
            });
        if write_result.is_err() {
            self.finish_with(StandardResponseCode::GeneralError, &[]);
            return;
        }
        if self.send_data(data).is_err() {
            return;
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    fn on_set_object_prop_list_data(
        &mut self,
        _request: &CurrentRequest,
        container: &mut RxContainer,
    ) {
        let elements = match read_prop_list(container) {
            Ok(elements) => elements,
            Err(_) => {
                self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                return;
            }
        };
        for (index, element) in elements.iter().enumerate() {
            let desc = match object_prop_desc(element.prop_code) {
                Some(desc) => desc,
                None => {
                    self.finish_with(
                        StandardResponseCode::InvalidObjectPropCode,
                        &[index as u32],
                    );
                    return;
                }
            };
            if let Err(err) =
                self.factory
                    .set_object_property_value(element.handle, &desc, &element.value)
            {
                self.finish_with(Self::response_for(&err), &[index as u32]);
                return;
            }
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    fn on_get_interdependent_prop_desc(&mut self, request: &CurrentRequest) {
        // no interdependencies are declared
        let mut data = self.data_container(request);
        if data.write_mtp_u32(0).is_err() {
            self.finish_with(StandardResponseCode::GeneralError, &[]);
            return;
        }
        if self.send_data(data).is_err() {
            return;
        }
        self.finish_with(StandardResponseCode::Ok, &[]);
    }

    // ---- object creation ----------------------------------------------------

    fn on_send_object_info_data(
        &mut self,
        request: &CurrentRequest,
        container: &mut RxContainer,
    ) {
        let storage_id = request.params.first().copied().unwrap_or(0);
        let parent = request.params.get(1).copied().unwrap_or(0);
        let info = match Self::decode_object_info(container) {
            Ok(info) => info,
            Err(Error::BadObjectFormat) => {
                self.finish_with(StandardResponseCode::InvalidObjectFormatCode, &[]);
                return;
            }
            Err(_) => {
                self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                return;
            }
        };
        let is_association = info.object_format.is_association();
        let expected_size = info.object_compressed_size;
        match self.factory.add_item(storage_id, parent, info) {
            Ok((sid, parent_handle, handle)) => {
                if !is_association {
                    self.send_object = Some(SendObjectSequence {
                        handle,
                        expected_size,
                        bytes_written: 0,
                        writing: false,
                    });
                }
                self.finish_with(StandardResponseCode::Ok, &[sid, parent_handle, handle]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_send_object_prop_list_data(
        &mut self,
        request: &CurrentRequest,
        container: &mut RxContainer,
    ) {
        let storage_id = request.params.first().copied().unwrap_or(0);
        let parent = request.params.get(1).copied().unwrap_or(0);
        let format = request.params.get(2).copied().unwrap_or(0) as u16;
        let size_high = request.params.get(3).copied().unwrap_or(0) as u64;
        let size_low = request.params.get(4).copied().unwrap_or(0) as u64;
        let size = (size_high << 32) | size_low;

        let elements = match read_prop_list(container) {
            Ok(elements) => elements,
            Err(_) => {
                self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                return;
            }
        };
        let filename = elements.iter().find_map(|e| {
            if e.prop_code == ObjectPropCode::ObjectFileName as u16 {
                match &e.value {
                    MtpData::Str(name) => Some(name.clone()),
                    _ => None,
                }
            } else {
                None
            }
        });
        let filename = match filename {
            Some(name) => name,
            None => {
                self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                return;
            }
        };

        let format = FormatCode::from_u16_lossy(format);
        let info = crate::datasets::ObjectInfo {
            object_format: format,
            object_compressed_size: size,
            filename,
            association_type: if format.is_association() { 0x0001 } else { 0 },
            ..crate::datasets::ObjectInfo::default()
        };
        match self.factory.add_item(storage_id, parent, info) {
            Ok((sid, parent_handle, handle)) => {
                // creation attributes beyond the filename are seeded
                // into the property cache
                for element in &elements {
                    if element.prop_code != ObjectPropCode::ObjectFileName as u16 {
                        self.factory
                            .seed_property(handle, element.prop_code, element.value.clone());
                    }
                }
                if !format.is_association() {
                    self.send_object = Some(SendObjectSequence {
                        handle,
                        expected_size: size,
                        bytes_written: 0,
                        writing: false,
                    });
                }
                self.finish_with(StandardResponseCode::Ok, &[sid, parent_handle, handle]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    // ---- references ---------------------------------------------------------

    fn on_get_object_references(&mut self, request: &CurrentRequest) {
        let handle = request.params.first().copied().unwrap_or(0);
        match self.factory.references(handle) {
            Ok(refs) => {
                let mut data = self.data_container(request);
                if data.write_mtp_slice(&refs, |w, v| w.write_mtp_u32(*v)).is_err() {
                    self.finish_with(StandardResponseCode::GeneralError, &[]);
                    return;
                }
                if self.send_data(data).is_err() {
                    return;
                }
                self.finish_with(StandardResponseCode::Ok, &[]);
            }
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }

    fn on_set_object_references_data(
        &mut self,
        request: &CurrentRequest,
        container: &mut RxContainer,
    ) {
        let handle = request.params.first().copied().unwrap_or(0);
        let refs = match container.read_mtp_u32_vec() {
            Ok(refs) => refs,
            Err(_) => {
                self.finish_with(StandardResponseCode::InvalidDataset, &[]);
                return;
            }
        };
        match self.factory.set_references(handle, refs) {
            Ok(()) => self.finish_with(StandardResponseCode::Ok, &[]),
            Err(err) => self.finish_with(Self::response_for(&err), &[]),
        }
    }
}
