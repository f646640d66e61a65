use std::fmt::{self, LowerHex};

use serde::Serialize;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::Error;

#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Serialize)]
pub enum EventCode {
    Standard(StandardEventCode),
    Vendor(u16),
    Reserved(u16),
}

impl FromPrimitive for EventCode {
    fn from_i64(_: i64) -> Option<Self> {
        None
    }

    fn from_u64(n: u64) -> Option<Self> {
        let n = n as u16;

        const MSN_MASK: u16 = 0b1111_0000_0000_0000;
        const RESERVED_MSN: u16 = 0b0100;
        const VENDOR_MSN: u16 = 0b1100;

        if let Some(ec) = StandardEventCode::from_u16(n) {
            return Some(EventCode::Standard(ec));
        }

        let msn = (n & MSN_MASK) >> 12;

        if msn == VENDOR_MSN {
            return Some(EventCode::Vendor(n));
        }

        if msn == RESERVED_MSN {
            return Some(EventCode::Reserved(n));
        }

        None
    }
}

impl ToPrimitive for EventCode {
    fn to_i64(&self) -> Option<i64> {
        None
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            EventCode::Standard(ec) => ec.to_u64(),
            EventCode::Reserved(n) | EventCode::Vendor(n) => Some(*n as u64),
        }
    }
}

impl LowerHex for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCode::Standard(code) => fmt::LowerHex::fmt(code, f),
            EventCode::Reserved(code) | EventCode::Vendor(code) => fmt::LowerHex::fmt(code, f),
        }
    }
}

impl From<StandardEventCode> for EventCode {
    fn from(code: StandardEventCode) -> Self {
        EventCode::Standard(code)
    }
}

/// Event codes from PIMA 15740 (0x40xx) and MTP 1.1 (0xC8xx).
#[repr(u16)]
#[derive(FromPrimitive, ToPrimitive, Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub enum StandardEventCode {
    Undefined = 0x4000,
    CancelTransaction = 0x4001,
    ObjectAdded = 0x4002,
    ObjectRemoved = 0x4003,
    StoreAdded = 0x4004,
    StoreRemoved = 0x4005,
    DevicePropChanged = 0x4006,
    ObjectInfoChanged = 0x4007,
    DeviceInfoChanged = 0x4008,
    RequestObjectTransfer = 0x4009,
    StoreFull = 0x400A,
    DeviceReset = 0x400B,
    StorageInfoChanged = 0x400C,
    CaptureComplete = 0x400D,
    UnreportedStatus = 0x400E,
    ObjectPropChanged = 0xC801,
    ObjectPropDescChanged = 0xC802,
    ObjectReferencesChanged = 0xC803,
}

impl LowerHex for StandardEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = self.to_u16().unwrap();
        fmt::LowerHex::fmt(&val, f)
    }
}

/// An asynchronous event, sent to the initiator on the interrupt
/// endpoint as a type-4 container with up to three u32 parameters.
#[derive(Debug, Clone, Hash, Serialize)]
pub struct Event {
    pub code: EventCode,
    pub params: Vec<u32>,
}

impl Event {
    pub fn new(code: EventCode, params: Vec<u32>) -> Event {
        Event { code, params }
    }

    /// Decodes an event payload (the container header is handled by the
    /// caller). Parameters are little-endian per PIMA 15740.
    pub fn decode(code: u16, params: &[u8]) -> Result<Self, Error> {
        Ok(Event {
            code: EventCode::from_u16(code).ok_or(Error::BadEventCode)?,
            params: params
                .chunks_exact(4)
                .map(|c| {
                    let mut b = [0u8; 4];
                    b.copy_from_slice(c);
                    u32::from_le_bytes(b)
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_params_are_little_endian() {
        let ev = Event::decode(0x4002, &[0x01, 0x00, 0x00, 0xA0]).unwrap();
        assert_eq!(ev.code, EventCode::Standard(StandardEventCode::ObjectAdded));
        assert_eq!(ev.params, vec![0xA000_0001]);
    }

    #[test]
    fn mtp_event_codes_decode() {
        assert_eq!(
            EventCode::from_u16(0xC801),
            Some(EventCode::Standard(StandardEventCode::ObjectPropChanged))
        );
    }

    #[test]
    fn vendor_event_nibble() {
        assert_eq!(EventCode::from_u16(0xC9FF), Some(EventCode::Vendor(0xC9FF)));
    }
}
