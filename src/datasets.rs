use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::data::{MtpData, MtpRead, MtpWrite};
use crate::format::FormatCode;
use crate::properties::{DevPropDesc, FormData, ObjPropDesc};
use crate::Error;

/// On-wire sentinel for object sizes of 4 GiB and above; the in-memory
/// size stays a u64.
pub const OBJECT_SIZE_SENTINEL: u32 = 0xFFFF_FFFF;

/// The MTP 1.1 ObjectInfo dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: FormatCode,
    pub protection_status: u16,
    pub object_compressed_size: u64,
    pub thumb_format: FormatCode,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
    pub keywords: String,
}

impl Default for ObjectInfo {
    fn default() -> Self {
        ObjectInfo {
            storage_id: 0,
            object_format: FormatCode::from_u16_lossy(0x3000),
            protection_status: 0,
            object_compressed_size: 0,
            thumb_format: FormatCode::from_u16_lossy(0x3000),
            thumb_compressed_size: 0,
            thumb_pix_width: 0,
            thumb_pix_height: 0,
            image_pix_width: 0,
            image_pix_height: 0,
            image_bit_depth: 0,
            parent_object: 0,
            association_type: 0,
            association_desc: 0,
            sequence_number: 0,
            filename: String::new(),
            capture_date: String::new(),
            modification_date: String::new(),
            keywords: String::new(),
        }
    }
}

impl ObjectInfo {
    pub fn decode<R: MtpRead>(cur: &mut R) -> Result<ObjectInfo, Error> {
        Ok(ObjectInfo {
            storage_id: cur.read_mtp_u32()?,
            object_format: FormatCode::from_u16(cur.read_mtp_u16()?)
                .ok_or(Error::BadObjectFormat)?,
            protection_status: cur.read_mtp_u16()?,
            object_compressed_size: cur.read_mtp_u32()? as u64,
            thumb_format: FormatCode::from_u16_lossy(cur.read_mtp_u16()?),
            thumb_compressed_size: cur.read_mtp_u32()?,
            thumb_pix_width: cur.read_mtp_u32()?,
            thumb_pix_height: cur.read_mtp_u32()?,
            image_pix_width: cur.read_mtp_u32()?,
            image_pix_height: cur.read_mtp_u32()?,
            image_bit_depth: cur.read_mtp_u32()?,
            parent_object: cur.read_mtp_u32()?,
            association_type: cur.read_mtp_u16()?,
            association_desc: cur.read_mtp_u32()?,
            sequence_number: cur.read_mtp_u32()?,
            filename: cur.read_mtp_str()?,
            capture_date: cur.read_mtp_str()?,
            modification_date: cur.read_mtp_str()?,
            keywords: cur.read_mtp_str()?,
        })
    }

    pub fn encode<W: MtpWrite>(&self, w: &mut W) -> Result<(), Error> {
        let wire_size = if self.object_compressed_size >= OBJECT_SIZE_SENTINEL as u64 {
            OBJECT_SIZE_SENTINEL
        } else {
            self.object_compressed_size as u32
        };
        w.write_mtp_u32(self.storage_id)?;
        w.write_mtp_u16(self.object_format.to_u16())?;
        w.write_mtp_u16(self.protection_status)?;
        w.write_mtp_u32(wire_size)?;
        w.write_mtp_u16(self.thumb_format.to_u16())?;
        w.write_mtp_u32(self.thumb_compressed_size)?;
        w.write_mtp_u32(self.thumb_pix_width)?;
        w.write_mtp_u32(self.thumb_pix_height)?;
        w.write_mtp_u32(self.image_pix_width)?;
        w.write_mtp_u32(self.image_pix_height)?;
        w.write_mtp_u32(self.image_bit_depth)?;
        w.write_mtp_u32(self.parent_object)?;
        w.write_mtp_u16(self.association_type)?;
        w.write_mtp_u32(self.association_desc)?;
        w.write_mtp_u32(self.sequence_number)?;
        w.write_mtp_str(&self.filename)?;
        w.write_mtp_str(&self.capture_date)?;
        w.write_mtp_str(&self.modification_date)?;
        w.write_mtp_str(&self.keywords)?;
        Ok(())
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum StorageType {
    Undefined = 0x0000,
    FixedRom = 0x0001,
    RemovableRom = 0x0002,
    FixedRam = 0x0003,
    RemovableRam = 0x0004,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FilesystemType {
    Undefined = 0x0000,
    GenericFlat = 0x0001,
    GenericHierarchical = 0x0002,
    Dcf = 0x0003,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AccessCapability {
    ReadWrite = 0x0000,
    ReadOnlyWithoutDeletion = 0x0001,
    ReadOnlyWithDeletion = 0x0002,
}

/// The StorageInfo dataset.
#[derive(Debug, Clone)]
pub struct StorageInfo {
    pub storage_type: StorageType,
    pub filesystem_type: FilesystemType,
    pub access_capability: AccessCapability,
    pub max_capacity: u64,
    pub free_space_in_bytes: u64,
    pub free_space_in_objects: u32,
    pub storage_description: String,
    pub volume_label: String,
}

impl StorageInfo {
    pub fn decode<R: MtpRead>(cur: &mut R) -> Result<StorageInfo, Error> {
        Ok(StorageInfo {
            storage_type: StorageType::from_u16(cur.read_mtp_u16()?)
                .unwrap_or(StorageType::Undefined),
            filesystem_type: FilesystemType::from_u16(cur.read_mtp_u16()?)
                .unwrap_or(FilesystemType::Undefined),
            access_capability: AccessCapability::from_u16(cur.read_mtp_u16()?)
                .unwrap_or(AccessCapability::ReadWrite),
            max_capacity: cur.read_mtp_u64()?,
            free_space_in_bytes: cur.read_mtp_u64()?,
            free_space_in_objects: cur.read_mtp_u32()?,
            storage_description: cur.read_mtp_str()?,
            volume_label: cur.read_mtp_str()?,
        })
    }

    pub fn encode<W: MtpWrite>(&self, w: &mut W) -> Result<(), Error> {
        w.write_mtp_u16(self.storage_type.to_u16().unwrap_or(0))?;
        w.write_mtp_u16(self.filesystem_type.to_u16().unwrap_or(0))?;
        w.write_mtp_u16(self.access_capability.to_u16().unwrap_or(0))?;
        w.write_mtp_u64(self.max_capacity)?;
        w.write_mtp_u64(self.free_space_in_bytes)?;
        w.write_mtp_u32(self.free_space_in_objects)?;
        w.write_mtp_str(&self.storage_description)?;
        w.write_mtp_str(&self.volume_label)?;
        Ok(())
    }
}

/// The DeviceInfo dataset.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub capture_formats: Vec<u16>,
    pub playback_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn decode<R: MtpRead>(cur: &mut R) -> Result<DeviceInfo, Error> {
        Ok(DeviceInfo {
            standard_version: cur.read_mtp_u16()?,
            vendor_extension_id: cur.read_mtp_u32()?,
            vendor_extension_version: cur.read_mtp_u16()?,
            vendor_extension_desc: cur.read_mtp_str()?,
            functional_mode: cur.read_mtp_u16()?,
            operations_supported: cur.read_mtp_u16_vec()?,
            events_supported: cur.read_mtp_u16_vec()?,
            device_properties_supported: cur.read_mtp_u16_vec()?,
            capture_formats: cur.read_mtp_u16_vec()?,
            playback_formats: cur.read_mtp_u16_vec()?,
            manufacturer: cur.read_mtp_str()?,
            model: cur.read_mtp_str()?,
            device_version: cur.read_mtp_str()?,
            serial_number: cur.read_mtp_str()?,
        })
    }

    pub fn encode<W: MtpWrite>(&self, w: &mut W) -> Result<(), Error> {
        w.write_mtp_u16(self.standard_version)?;
        w.write_mtp_u32(self.vendor_extension_id)?;
        w.write_mtp_u16(self.vendor_extension_version)?;
        w.write_mtp_str(&self.vendor_extension_desc)?;
        w.write_mtp_u16(self.functional_mode)?;
        w.write_mtp_slice(&self.operations_supported, |w, v| w.write_mtp_u16(*v))?;
        w.write_mtp_slice(&self.events_supported, |w, v| w.write_mtp_u16(*v))?;
        w.write_mtp_slice(&self.device_properties_supported, |w, v| w.write_mtp_u16(*v))?;
        w.write_mtp_slice(&self.capture_formats, |w, v| w.write_mtp_u16(*v))?;
        w.write_mtp_slice(&self.playback_formats, |w, v| w.write_mtp_u16(*v))?;
        w.write_mtp_str(&self.manufacturer)?;
        w.write_mtp_str(&self.model)?;
        w.write_mtp_str(&self.device_version)?;
        w.write_mtp_str(&self.serial_number)?;
        Ok(())
    }
}

/// Serializes the form-flag byte followed by the form field of a
/// property description.
pub fn write_form_field<W: MtpWrite>(w: &mut W, form: &FormData) -> Result<(), Error> {
    w.write_mtp_u8(form.flag())?;
    match form {
        FormData::None | FormData::DateTime => {}
        FormData::Range {
            min_value,
            max_value,
            step,
        } => {
            min_value.write_to(w)?;
            max_value.write_to(w)?;
            step.write_to(w)?;
        }
        FormData::Enumeration(values) => {
            w.write_mtp_u16(values.len() as u16)?;
            for value in values {
                value.write_to(w)?;
            }
        }
        FormData::FixedArray(len) => w.write_mtp_u16(*len)?,
        FormData::RegEx(pattern) => w.write_mtp_str(pattern)?,
        FormData::ByteArray(len) | FormData::LongString(len) => w.write_mtp_u32(*len)?,
    }
    Ok(())
}

/// Serializes an ObjectPropDesc dataset.
pub fn write_obj_prop_desc<W: MtpWrite>(w: &mut W, desc: &ObjPropDesc) -> Result<(), Error> {
    w.write_mtp_u16(desc.prop_code.to_u16().unwrap_or(0))?;
    w.write_mtp_u16(desc.data_type.to_u16().unwrap_or(0))?;
    w.write_mtp_u8(desc.get_set)?;
    desc.default.write_to(w)?;
    w.write_mtp_u32(desc.group_code)?;
    write_form_field(w, &desc.form)?;
    Ok(())
}

/// Serializes a DevicePropDesc dataset.
pub fn write_dev_prop_desc<W: MtpWrite>(w: &mut W, desc: &DevPropDesc) -> Result<(), Error> {
    w.write_mtp_u16(desc.prop_code.to_u16().unwrap_or(0))?;
    w.write_mtp_u16(desc.data_type.to_u16().unwrap_or(0))?;
    w.write_mtp_u8(desc.get_set)?;
    desc.factory_default.write_to(w)?;
    desc.current.write_to(w)?;
    write_form_field(w, &desc.form)?;
    Ok(())
}

/// One element of an ObjectPropList dataset (MTP 1.1 E.2.1.1).
#[derive(Debug, Clone, PartialEq)]
pub struct PropListElement {
    pub handle: u32,
    pub prop_code: u16,
    pub data_type: u16,
    pub value: MtpData,
}

pub fn write_prop_list_element<W: MtpWrite>(
    w: &mut W,
    element: &PropListElement,
) -> Result<(), Error> {
    w.write_mtp_u32(element.handle)?;
    w.write_mtp_u16(element.prop_code)?;
    w.write_mtp_u16(element.data_type)?;
    element.value.write_to(w)?;
    Ok(())
}

/// Reads an ObjectPropList dataset: element count, then quadruples.
pub fn read_prop_list<R: MtpRead>(cur: &mut R) -> Result<Vec<PropListElement>, Error> {
    let count = cur.read_mtp_u32()?;
    let mut elements = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let handle = cur.read_mtp_u32()?;
        let prop_code = cur.read_mtp_u16()?;
        let data_type = cur.read_mtp_u16()?;
        let value = MtpData::read_type(data_type, cur)?;
        elements.push(PropListElement {
            handle,
            prop_code,
            data_type,
            value,
        });
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::format::StandardFormatCode;
    use crate::properties::{DevicePropCode, ObjectPropCode, PROP_GET, PROP_GET_SET};
    use std::io::Cursor;

    fn sample_info() -> ObjectInfo {
        ObjectInfo {
            storage_id: 0x0001_0001,
            object_format: FormatCode::Standard(StandardFormatCode::Text),
            object_compressed_size: 5,
            parent_object: 0,
            filename: "tmpfile".into(),
            modification_date: "20260801T120000".into(),
            ..ObjectInfo::default()
        }
    }

    #[test]
    fn object_info_round_trips() {
        let info = sample_info();
        let mut buf = vec![];
        info.encode(&mut buf).unwrap();
        let mut cur = Cursor::new(&buf);
        let decoded = ObjectInfo::decode(&mut cur).unwrap();
        cur.expect_end().unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn oversize_objects_encode_the_sentinel() {
        let mut info = sample_info();
        info.object_compressed_size = 5 * 1024 * 1024 * 1024;
        let mut buf = vec![];
        info.encode(&mut buf).unwrap();
        // storage id (4) + format (2) + protection (2) precede the size
        assert_eq!(&buf[8..12], &OBJECT_SIZE_SENTINEL.to_le_bytes());
    }

    #[test]
    fn storage_info_round_trips() {
        let info = StorageInfo {
            storage_type: StorageType::FixedRam,
            filesystem_type: FilesystemType::GenericHierarchical,
            access_capability: AccessCapability::ReadWrite,
            max_capacity: 1 << 40,
            free_space_in_bytes: 1 << 39,
            free_space_in_objects: 0xFFFF_FFFF,
            storage_description: "Phone memory".into(),
            volume_label: "fsstorage".into(),
        };
        let mut buf = vec![];
        info.encode(&mut buf).unwrap();
        let mut cur = Cursor::new(&buf);
        let decoded = StorageInfo::decode(&mut cur).unwrap();
        cur.expect_end().unwrap();
        assert_eq!(decoded.max_capacity, info.max_capacity);
        assert_eq!(decoded.storage_description, info.storage_description);
    }

    #[test]
    fn device_info_round_trips() {
        let info = DeviceInfo {
            standard_version: 100,
            vendor_extension_id: 0x0000_0006,
            vendor_extension_version: 100,
            vendor_extension_desc: "microsoft.com: 1.0;".into(),
            functional_mode: 0,
            operations_supported: vec![0x1001, 0x1002, 0x9801],
            events_supported: vec![0x4002, 0xC801],
            device_properties_supported: vec![0x5001, 0xD402],
            capture_formats: vec![],
            playback_formats: vec![0x3001, 0x3009],
            manufacturer: "Acme".into(),
            model: "Widget".into(),
            device_version: "1.0".into(),
            serial_number: "0123456789".into(),
        };
        let mut buf = vec![];
        info.encode(&mut buf).unwrap();
        let mut cur = Cursor::new(&buf);
        let decoded = DeviceInfo::decode(&mut cur).unwrap();
        cur.expect_end().unwrap();
        assert_eq!(decoded.operations_supported, info.operations_supported);
        assert_eq!(decoded.serial_number, info.serial_number);
    }

    #[test]
    fn battery_desc_serializes_range_form() {
        let desc = DevPropDesc {
            prop_code: DevicePropCode::BatteryLevel,
            data_type: DataType::Uint8,
            get_set: PROP_GET,
            factory_default: MtpData::Uint8(0),
            current: MtpData::Uint8(70),
            form: FormData::Range {
                min_value: MtpData::Uint8(0),
                max_value: MtpData::Uint8(100),
                step: MtpData::Uint8(10),
            },
        };
        let mut buf = vec![];
        write_dev_prop_desc(&mut buf, &desc).unwrap();
        assert_eq!(
            buf,
            vec![0x01, 0x50, 0x02, 0x00, 0x00, 0x00, 70, 0x01, 0, 100, 10]
        );
    }

    #[test]
    fn obj_prop_desc_field_order() {
        let desc = ObjPropDesc {
            prop_code: ObjectPropCode::ObjectFileName,
            data_type: DataType::Str,
            get_set: PROP_GET_SET,
            default: MtpData::Str(String::new()),
            group_code: 0,
            form: FormData::None,
        };
        let mut buf = vec![];
        write_obj_prop_desc(&mut buf, &desc).unwrap();
        assert_eq!(
            buf,
            vec![0x07, 0xDC, 0xFF, 0xFF, 0x01, 0x00, 0, 0, 0, 0, 0x00]
        );
    }

    #[test]
    fn prop_list_round_trips() {
        let elements = vec![
            PropListElement {
                handle: 0,
                prop_code: 0xDC07,
                data_type: 0xFFFF,
                value: MtpData::Str("tmpfile".into()),
            },
            PropListElement {
                handle: 0,
                prop_code: 0xDC04,
                data_type: 0x0008,
                value: MtpData::Uint64(5),
            },
        ];
        let mut buf = vec![];
        buf.write_mtp_u32(elements.len() as u32).unwrap();
        for e in &elements {
            write_prop_list_element(&mut buf, e).unwrap();
        }
        let mut cur = Cursor::new(&buf);
        let decoded = read_prop_list(&mut cur).unwrap();
        cur.expect_end().unwrap();
        assert_eq!(decoded, elements);
    }
}
