use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::data::{DataType, MtpData};
use crate::format::{FormatCategory, FormatCode};

/// Object property codes (MTP 1.1 annex B).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ObjectPropCode {
    StorageId = 0xDC01,
    ObjectFormat = 0xDC02,
    ProtectionStatus = 0xDC03,
    ObjectSize = 0xDC04,
    ObjectFileName = 0xDC07,
    DateCreated = 0xDC08,
    DateModified = 0xDC09,
    ParentObject = 0xDC0B,
    PersistentUniqueObjectIdentifier = 0xDC41,
    Name = 0xDC44,
    Artist = 0xDC46,
    NonConsumable = 0xDC4F,
    RepresentativeSampleFormat = 0xDC81,
    Width = 0xDC87,
    Height = 0xDC88,
    Duration = 0xDC89,
    Rating = 0xDC8A,
    Track = 0xDC8B,
    Genre = 0xDC8C,
    UseCount = 0xDC91,
    OriginalReleaseDate = 0xDC99,
    AlbumName = 0xDC9A,
    AlbumArtist = 0xDC9B,
    SampleRate = 0xDE93,
    NumberOfChannels = 0xDE94,
    AudioWaveCodec = 0xDE99,
    AudioBitRate = 0xDE9A,
    VideoFourCcCodec = 0xDE9B,
    VideoBitRate = 0xDE9C,
}

/// Device property codes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum DevicePropCode {
    BatteryLevel = 0x5001,
    DateTime = 0x5011,
    SynchronizationPartner = 0xD401,
    DeviceFriendlyName = 0xD402,
    VolumeLevel = 0xD403,
    DeviceIcon = 0xD405,
    PerceivedDeviceType = 0xD407,
}

/// Protection status values carried in ObjectInfo.
pub const PROTECTION_NONE: u16 = 0x0000;
pub const PROTECTION_READ_ONLY: u16 = 0x0001;

/// Form flag values in property description datasets.
pub const FORM_FLAG_NONE: u8 = 0x00;
pub const FORM_FLAG_RANGE: u8 = 0x01;
pub const FORM_FLAG_ENUM: u8 = 0x02;
pub const FORM_FLAG_DATE_TIME: u8 = 0x03;
pub const FORM_FLAG_FIXED_ARRAY: u8 = 0x04;
pub const FORM_FLAG_REGEX: u8 = 0x05;
pub const FORM_FLAG_BYTE_ARRAY: u8 = 0x06;
pub const FORM_FLAG_LONG_STRING: u8 = 0xFF;

/// The form field of a property description dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum FormData {
    None,
    Range {
        min_value: MtpData,
        max_value: MtpData,
        step: MtpData,
    },
    Enumeration(Vec<MtpData>),
    DateTime,
    FixedArray(u16),
    RegEx(String),
    ByteArray(u32),
    LongString(u32),
}

impl FormData {
    pub fn flag(&self) -> u8 {
        match self {
            FormData::None => FORM_FLAG_NONE,
            FormData::Range { .. } => FORM_FLAG_RANGE,
            FormData::Enumeration(_) => FORM_FLAG_ENUM,
            FormData::DateTime => FORM_FLAG_DATE_TIME,
            FormData::FixedArray(_) => FORM_FLAG_FIXED_ARRAY,
            FormData::RegEx(_) => FORM_FLAG_REGEX,
            FormData::ByteArray(_) => FORM_FLAG_BYTE_ARRAY,
            FormData::LongString(_) => FORM_FLAG_LONG_STRING,
        }
    }
}

pub const PROP_GET: u8 = 0x00;
pub const PROP_GET_SET: u8 = 0x01;

/// An object property description dataset (MTP 1.1 table 5.1.2.3).
#[derive(Debug, Clone)]
pub struct ObjPropDesc {
    pub prop_code: ObjectPropCode,
    pub data_type: DataType,
    pub get_set: u8,
    pub default: MtpData,
    pub group_code: u32,
    pub form: FormData,
}

/// A device property description dataset.
#[derive(Debug, Clone)]
pub struct DevPropDesc {
    pub prop_code: DevicePropCode,
    pub data_type: DataType,
    pub get_set: u8,
    pub factory_default: MtpData,
    pub current: MtpData,
    pub form: FormData,
}

/// A property description paired with a value, the unit the storage
/// layer fills in during property queries.
#[derive(Debug, Clone)]
pub struct ObjPropDescVal {
    pub desc: ObjPropDesc,
    pub value: Option<MtpData>,
}

impl ObjPropDescVal {
    pub fn new(desc: ObjPropDesc) -> ObjPropDescVal {
        ObjPropDescVal { desc, value: None }
    }
}

impl ObjPropDesc {
    fn new(prop_code: ObjectPropCode, data_type: DataType, get_set: u8) -> ObjPropDesc {
        ObjPropDesc {
            prop_code,
            data_type,
            get_set,
            default: MtpData::default_for(data_type),
            group_code: 0,
            form: FormData::None,
        }
    }
}

/// Properties every object carries regardless of format.
const COMMON_PROPS: &[ObjectPropCode] = &[
    ObjectPropCode::StorageId,
    ObjectPropCode::ObjectFormat,
    ObjectPropCode::ProtectionStatus,
    ObjectPropCode::ObjectSize,
    ObjectPropCode::ObjectFileName,
    ObjectPropCode::DateCreated,
    ObjectPropCode::DateModified,
    ObjectPropCode::ParentObject,
    ObjectPropCode::PersistentUniqueObjectIdentifier,
    ObjectPropCode::Name,
    ObjectPropCode::NonConsumable,
];

const AUDIO_PROPS: &[ObjectPropCode] = &[
    ObjectPropCode::Artist,
    ObjectPropCode::Duration,
    ObjectPropCode::Rating,
    ObjectPropCode::Track,
    ObjectPropCode::Genre,
    ObjectPropCode::UseCount,
    ObjectPropCode::OriginalReleaseDate,
    ObjectPropCode::AlbumName,
    ObjectPropCode::AlbumArtist,
    ObjectPropCode::SampleRate,
    ObjectPropCode::NumberOfChannels,
    ObjectPropCode::AudioWaveCodec,
    ObjectPropCode::AudioBitRate,
];

const VIDEO_PROPS: &[ObjectPropCode] = &[
    ObjectPropCode::Artist,
    ObjectPropCode::Duration,
    ObjectPropCode::Width,
    ObjectPropCode::Height,
    ObjectPropCode::Genre,
    ObjectPropCode::AlbumName,
    ObjectPropCode::SampleRate,
    ObjectPropCode::NumberOfChannels,
    ObjectPropCode::VideoFourCcCodec,
    ObjectPropCode::VideoBitRate,
];

const IMAGE_PROPS: &[ObjectPropCode] = &[
    ObjectPropCode::Width,
    ObjectPropCode::Height,
    ObjectPropCode::RepresentativeSampleFormat,
];

/// The object properties supported for a given format, common set first.
pub fn supported_object_props(format: FormatCode) -> Vec<ObjectPropCode> {
    let mut props = COMMON_PROPS.to_vec();
    let extra: &[ObjectPropCode] = match format.category() {
        FormatCategory::Audio => AUDIO_PROPS,
        FormatCategory::Video => VIDEO_PROPS,
        FormatCategory::Image => IMAGE_PROPS,
        _ => &[],
    };
    props.extend_from_slice(extra);
    props
}

/// The description dataset for one object property, or None for codes
/// the responder does not support.
pub fn object_prop_desc(code: u16) -> Option<ObjPropDesc> {
    let prop = ObjectPropCode::from_u16(code)?;
    let desc = match prop {
        ObjectPropCode::StorageId => ObjPropDesc::new(prop, DataType::Uint32, PROP_GET),
        ObjectPropCode::ObjectFormat => ObjPropDesc::new(prop, DataType::Uint16, PROP_GET),
        ObjectPropCode::ProtectionStatus => ObjPropDesc::new(prop, DataType::Uint16, PROP_GET),
        ObjectPropCode::ObjectSize => ObjPropDesc::new(prop, DataType::Uint64, PROP_GET),
        ObjectPropCode::ObjectFileName => {
            ObjPropDesc::new(prop, DataType::Str, PROP_GET_SET)
        }
        ObjectPropCode::DateCreated => {
            let mut d = ObjPropDesc::new(prop, DataType::Str, PROP_GET);
            d.form = FormData::DateTime;
            d
        }
        ObjectPropCode::DateModified => {
            let mut d = ObjPropDesc::new(prop, DataType::Str, PROP_GET);
            d.form = FormData::DateTime;
            d
        }
        ObjectPropCode::ParentObject => ObjPropDesc::new(prop, DataType::Uint32, PROP_GET),
        ObjectPropCode::PersistentUniqueObjectIdentifier => {
            ObjPropDesc::new(prop, DataType::Uint128, PROP_GET)
        }
        ObjectPropCode::Name => ObjPropDesc::new(prop, DataType::Str, PROP_GET),
        ObjectPropCode::NonConsumable => {
            let mut d = ObjPropDesc::new(prop, DataType::Uint8, PROP_GET);
            d.form = FormData::Enumeration(vec![MtpData::Uint8(0), MtpData::Uint8(1)]);
            d
        }
        ObjectPropCode::Artist
        | ObjectPropCode::Genre
        | ObjectPropCode::AlbumName
        | ObjectPropCode::AlbumArtist
        | ObjectPropCode::AudioWaveCodec
        | ObjectPropCode::VideoFourCcCodec => ObjPropDesc::new(prop, DataType::Str, PROP_GET),
        ObjectPropCode::OriginalReleaseDate => {
            let mut d = ObjPropDesc::new(prop, DataType::Str, PROP_GET);
            d.form = FormData::DateTime;
            d
        }
        ObjectPropCode::Duration
        | ObjectPropCode::UseCount
        | ObjectPropCode::SampleRate
        | ObjectPropCode::AudioBitRate
        | ObjectPropCode::VideoBitRate
        | ObjectPropCode::Width
        | ObjectPropCode::Height => ObjPropDesc::new(prop, DataType::Uint32, PROP_GET),
        ObjectPropCode::Rating
        | ObjectPropCode::Track
        | ObjectPropCode::NumberOfChannels
        | ObjectPropCode::RepresentativeSampleFormat => {
            ObjPropDesc::new(prop, DataType::Uint16, PROP_GET)
        }
    };
    Some(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::StandardFormatCode;

    #[test]
    fn common_props_present_for_every_format() {
        let props = supported_object_props(FormatCode::Standard(StandardFormatCode::Text));
        assert!(props.contains(&ObjectPropCode::ObjectFileName));
        assert!(props.contains(&ObjectPropCode::PersistentUniqueObjectIdentifier));
        assert!(!props.contains(&ObjectPropCode::AudioBitRate));
    }

    #[test]
    fn audio_formats_report_media_props() {
        let props = supported_object_props(FormatCode::Standard(StandardFormatCode::Mp3));
        assert!(props.contains(&ObjectPropCode::Artist));
        assert!(props.contains(&ObjectPropCode::Duration));
    }

    #[test]
    fn filename_is_the_only_settable_common_prop() {
        let desc = object_prop_desc(0xDC07).unwrap();
        assert_eq!(desc.get_set, PROP_GET_SET);
        let size = object_prop_desc(0xDC04).unwrap();
        assert_eq!(size.get_set, PROP_GET);
    }

    #[test]
    fn unknown_prop_code_is_unsupported() {
        assert!(object_prop_desc(0xDCFE).is_none());
    }
}
