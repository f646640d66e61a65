use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::fmt::{self, LowerHex};

use serde::Serialize;

/// An MTP operation code as found in the `code` field of a command
/// container. Codes outside the known set are preserved as `Other` so
/// that extension dispatch can still see them.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Serialize)]
pub enum OperationCode {
    Standard(StandardOperationCode),
    Other(u16),
}

impl LowerHex for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationCode::Standard(code) => fmt::LowerHex::fmt(code, f),
            OperationCode::Other(code) => fmt::LowerHex::fmt(code, f),
        }
    }
}

impl FromPrimitive for OperationCode {
    fn from_i64(n: i64) -> Option<Self> {
        Some(StandardOperationCode::from_i64(n).map_or_else(
            || OperationCode::Other(n as u16),
            OperationCode::Standard,
        ))
    }

    fn from_u64(n: u64) -> Option<Self> {
        Some(StandardOperationCode::from_u64(n).map_or_else(
            || OperationCode::Other(n as u16),
            OperationCode::Standard,
        ))
    }
}

impl ToPrimitive for OperationCode {
    fn to_i64(&self) -> Option<i64> {
        match self {
            OperationCode::Standard(code) => code.to_i64(),
            OperationCode::Other(code) => Some(*code as i64),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            OperationCode::Standard(code) => code.to_u64(),
            OperationCode::Other(code) => Some(*code as u64),
        }
    }
}

impl From<StandardOperationCode> for OperationCode {
    fn from(code: StandardOperationCode) -> Self {
        OperationCode::Standard(code)
    }
}

/// Operation codes from PIMA 15740 plus the MTP 1.1 extension set.
#[repr(u16)]
#[derive(FromPrimitive, ToPrimitive, Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub enum StandardOperationCode {
    Undefined = 0x1000,
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIDs = 0x1004,
    GetStorageInfo = 0x1005,
    GetNumObjects = 0x1006,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    GetThumb = 0x100A,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    InitiateCapture = 0x100E,
    FormatStore = 0x100F,
    ResetDevice = 0x1010,
    SelfTest = 0x1011,
    SetObjectProtection = 0x1012,
    PowerDown = 0x1013,
    GetDevicePropDesc = 0x1014,
    GetDevicePropValue = 0x1015,
    SetDevicePropValue = 0x1016,
    ResetDevicePropValue = 0x1017,
    TerminateOpenCapture = 0x1018,
    MoveObject = 0x1019,
    CopyObject = 0x101A,
    GetPartialObject = 0x101B,
    InitiateOpenCapture = 0x101C,
    GetObjectPropsSupported = 0x9801,
    GetObjectPropDesc = 0x9802,
    GetObjectPropValue = 0x9803,
    SetObjectPropValue = 0x9804,
    GetObjectPropList = 0x9805,
    SetObjectPropList = 0x9806,
    GetInterdependentPropDesc = 0x9807,
    SendObjectPropList = 0x9808,
    GetObjectReferences = 0x9810,
    SetObjectReferences = 0x9811,
    Skip = 0x9820,
}

impl LowerHex for StandardOperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = self.to_u16().unwrap();
        fmt::LowerHex::fmt(&val, f)
    }
}

impl StandardOperationCode {
    /// Whether the operation carries an initiator-to-responder data phase.
    pub fn has_data_phase(self) -> bool {
        matches!(
            self,
            StandardOperationCode::SendObjectInfo
                | StandardOperationCode::SendObject
                | StandardOperationCode::SetDevicePropValue
                | StandardOperationCode::SetObjectPropValue
                | StandardOperationCode::SetObjectPropList
                | StandardOperationCode::SendObjectPropList
                | StandardOperationCode::SetObjectReferences
        )
    }

    /// Whether handling the operation touches the storage layer. Operations
    /// for which this returns false may be served before enumeration has
    /// finished; the rest are held back until every storage is ready.
    pub fn needs_storage(self) -> bool {
        !matches!(
            self,
            StandardOperationCode::GetDeviceInfo
                | StandardOperationCode::OpenSession
                | StandardOperationCode::CloseSession
                | StandardOperationCode::GetDevicePropDesc
                | StandardOperationCode::GetDevicePropValue
                | StandardOperationCode::SetDevicePropValue
                | StandardOperationCode::ResetDevicePropValue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes_round_trip() {
        let code = OperationCode::from_u64(0x9805).unwrap();
        assert_eq!(
            code,
            OperationCode::Standard(StandardOperationCode::GetObjectPropList)
        );
        assert_eq!(code.to_u64(), Some(0x9805));
    }

    #[test]
    fn unknown_codes_become_other() {
        let code = OperationCode::from_u64(0x9921).unwrap();
        assert_eq!(code, OperationCode::Other(0x9921));
        assert_eq!(code.to_u64(), Some(0x9921));
    }

    #[test]
    fn data_phase_set_matches_send_operations() {
        assert!(StandardOperationCode::SendObject.has_data_phase());
        assert!(StandardOperationCode::SendObjectPropList.has_data_phase());
        assert!(!StandardOperationCode::GetObject.has_data_phase());
    }

    #[test]
    fn session_operations_do_not_need_storage() {
        assert!(!StandardOperationCode::OpenSession.needs_storage());
        assert!(!StandardOperationCode::GetDeviceInfo.needs_storage());
        assert!(StandardOperationCode::GetObjectHandles.needs_storage());
    }
}
