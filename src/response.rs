use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::fmt::{self, LowerHex};

use serde::Serialize;

#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize)]
pub enum ResponseCode {
    Standard(StandardResponseCode),
    Other(u16),
}

impl FromPrimitive for ResponseCode {
    fn from_i64(n: i64) -> Option<Self> {
        Some(StandardResponseCode::from_i64(n).map_or_else(
            || ResponseCode::Other(n as u16),
            ResponseCode::Standard,
        ))
    }

    fn from_u64(n: u64) -> Option<Self> {
        Some(StandardResponseCode::from_u64(n).map_or_else(
            || ResponseCode::Other(n as u16),
            ResponseCode::Standard,
        ))
    }
}

impl LowerHex for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Standard(code) => fmt::LowerHex::fmt(code, f),
            ResponseCode::Other(code) => fmt::LowerHex::fmt(code, f),
        }
    }
}

impl From<StandardResponseCode> for ResponseCode {
    fn from(code: StandardResponseCode) -> Self {
        ResponseCode::Standard(code)
    }
}

/// Response codes from PIMA 15740 (0x20xx) and the MTP 1.1 extension
/// range (0xA8xx) used by the property and reference operations.
#[repr(u16)]
#[derive(FromPrimitive, ToPrimitive, Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub enum StandardResponseCode {
    Undefined = 0x2000,
    Ok = 0x2001,
    GeneralError = 0x2002,
    SessionNotOpen = 0x2003,
    InvalidTransactionId = 0x2004,
    OperationNotSupported = 0x2005,
    ParameterNotSupported = 0x2006,
    IncompleteTransfer = 0x2007,
    InvalidStorageId = 0x2008,
    InvalidObjectHandle = 0x2009,
    DevicePropNotSupported = 0x200A,
    InvalidObjectFormatCode = 0x200B,
    StoreFull = 0x200C,
    ObjectWriteProtected = 0x200D,
    StoreReadOnly = 0x200E,
    AccessDenied = 0x200F,
    NoThumbnailPresent = 0x2010,
    SelfTestFailed = 0x2011,
    PartialDeletion = 0x2012,
    StoreNotAvailable = 0x2013,
    SpecificationByFormatUnsupported = 0x2014,
    NoValidObjectInfo = 0x2015,
    InvalidCodeFormat = 0x2016,
    UnknownVendorCode = 0x2017,
    CaptureAlreadyTerminated = 0x2018,
    DeviceBusy = 0x2019,
    InvalidParentObject = 0x201A,
    InvalidDevicePropFormat = 0x201B,
    InvalidDevicePropValue = 0x201C,
    InvalidParameter = 0x201D,
    SessionAlreadyOpen = 0x201E,
    TransactionCancelled = 0x201F,
    SpecificationOfDestinationUnsupported = 0x2020,
    InvalidObjectPropCode = 0xA801,
    InvalidObjectPropFormat = 0xA802,
    InvalidObjectPropValue = 0xA803,
    InvalidObjectReference = 0xA804,
    GroupNotSupported = 0xA805,
    InvalidDataset = 0xA806,
    SpecificationByGroupUnsupported = 0xA807,
    SpecificationByDepthUnsupported = 0xA808,
    ObjectTooLarge = 0xA809,
    ObjectPropNotSupported = 0xA80A,
}

impl LowerHex for StandardResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = self.to_u16().unwrap();
        fmt::LowerHex::fmt(&val, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_codes_decode() {
        assert_eq!(
            ResponseCode::from_u64(0xA804),
            Some(ResponseCode::Standard(
                StandardResponseCode::InvalidObjectReference
            ))
        );
    }

    #[test]
    fn vendor_codes_stay_other() {
        assert_eq!(
            ResponseCode::from_u64(0xA1FF),
            Some(ResponseCode::Other(0xA1FF))
        );
    }
}
