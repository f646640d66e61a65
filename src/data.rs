use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::ToPrimitive;

use crate::Error;

/// MTP dataset field type codes (MTP 1.1 table D.1).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum DataType {
    Undefined = 0x0000,
    Int8 = 0x0001,
    Uint8 = 0x0002,
    Int16 = 0x0003,
    Uint16 = 0x0004,
    Int32 = 0x0005,
    Uint32 = 0x0006,
    Int64 = 0x0007,
    Uint64 = 0x0008,
    Int128 = 0x0009,
    Uint128 = 0x000A,
    ArrayInt8 = 0x4001,
    ArrayUint8 = 0x4002,
    ArrayInt16 = 0x4003,
    ArrayUint16 = 0x4004,
    ArrayInt32 = 0x4005,
    ArrayUint32 = 0x4006,
    ArrayInt64 = 0x4007,
    ArrayUint64 = 0x4008,
    ArrayInt128 = 0x4009,
    ArrayUint128 = 0x400A,
    Str = 0xFFFF,
}

/// Maximum number of UTF-16 code units in an MTP string, terminator
/// included in the on-wire count byte but not in this limit.
pub const MAX_STRING_CHARS: usize = 254;

pub trait MtpRead: ReadBytesExt {
    fn read_mtp_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_u8()?)
    }

    fn read_mtp_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_i8()?)
    }

    fn read_mtp_u16(&mut self) -> Result<u16, Error> {
        Ok(self.read_u16::<LittleEndian>()?)
    }

    fn read_mtp_i16(&mut self) -> Result<i16, Error> {
        Ok(self.read_i16::<LittleEndian>()?)
    }

    fn read_mtp_u32(&mut self) -> Result<u32, Error> {
        Ok(self.read_u32::<LittleEndian>()?)
    }

    fn read_mtp_i32(&mut self) -> Result<i32, Error> {
        Ok(self.read_i32::<LittleEndian>()?)
    }

    fn read_mtp_u64(&mut self) -> Result<u64, Error> {
        Ok(self.read_u64::<LittleEndian>()?)
    }

    fn read_mtp_i64(&mut self) -> Result<i64, Error> {
        Ok(self.read_i64::<LittleEndian>()?)
    }

    fn read_mtp_u128(&mut self) -> Result<u128, Error> {
        let lo = self.read_u64::<LittleEndian>()?;
        let hi = self.read_u64::<LittleEndian>()?;
        Ok(((hi as u128) << 64) | lo as u128)
    }

    fn read_mtp_i128(&mut self) -> Result<i128, Error> {
        Ok(self.read_mtp_u128()? as i128)
    }

    #[inline(always)]
    fn read_mtp_vec<T: Sized, U: Fn(&mut Self) -> Result<T, Error>>(
        &mut self,
        func: U,
    ) -> Result<Vec<T>, Error> {
        let len = self.read_u32::<LittleEndian>()? as usize;
        (0..len).map(|_| func(self)).collect()
    }

    fn read_mtp_u8_vec(&mut self) -> Result<Vec<u8>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_u8())
    }

    fn read_mtp_i8_vec(&mut self) -> Result<Vec<i8>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_i8())
    }

    fn read_mtp_u16_vec(&mut self) -> Result<Vec<u16>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_u16())
    }

    fn read_mtp_i16_vec(&mut self) -> Result<Vec<i16>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_i16())
    }

    fn read_mtp_u32_vec(&mut self) -> Result<Vec<u32>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_u32())
    }

    fn read_mtp_i32_vec(&mut self) -> Result<Vec<i32>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_i32())
    }

    fn read_mtp_u64_vec(&mut self) -> Result<Vec<u64>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_u64())
    }

    fn read_mtp_i64_vec(&mut self) -> Result<Vec<i64>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_i64())
    }

    fn read_mtp_u128_vec(&mut self) -> Result<Vec<u128>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_u128())
    }

    fn read_mtp_i128_vec(&mut self) -> Result<Vec<i128>, Error> {
        self.read_mtp_vec(|cur| cur.read_mtp_i128())
    }

    /// Reads an MTP string: one count byte (UTF-16 code units including
    /// the trailing NUL, 0 for an empty string), then the code units.
    fn read_mtp_str(&mut self) -> Result<String, Error> {
        let len = self.read_u8()?;
        if len > 0 {
            // len includes the trailing null u16
            let data: Vec<u16> = (0..(len - 1))
                .map(|_| self.read_u16::<LittleEndian>())
                .collect::<Result<Vec<_>, _>>()?;

            self.read_u16::<LittleEndian>()?;
            String::from_utf16(&data)
                .map_err(|_| Error::MalformedContainer(format!("invalid UTF16 data: {:?}", data)))
        } else {
            Ok("".into())
        }
    }

    fn expect_end(&mut self) -> Result<(), Error>;
}

impl<T: AsRef<[u8]>> MtpRead for Cursor<T> {
    fn expect_end(&mut self) -> Result<(), Error> {
        let len = self.get_ref().as_ref().len();
        if len as u64 != self.position() {
            Err(Error::MalformedContainer(format!(
                "payload {} bytes, consumed {} bytes",
                len,
                self.position()
            )))
        } else {
            Ok(())
        }
    }
}

/// Truncates a string so that its UTF-16 encoding fits in
/// [`MAX_STRING_CHARS`] code units, cutting whole characters from the
/// right.
fn fit_utf16(s: &str) -> Vec<u16> {
    let mut units: Vec<u16> = s.encode_utf16().collect();
    if units.len() <= MAX_STRING_CHARS {
        return units;
    }
    let mut cutoff = MAX_STRING_CHARS;
    loop {
        units = s.chars().take(cutoff).collect::<String>().encode_utf16().collect();
        if units.len() <= MAX_STRING_CHARS {
            return units;
        }
        cutoff -= 1;
    }
}

pub trait MtpWrite: WriteBytesExt {
    fn write_mtp_u8(&mut self, val: u8) -> Result<(), Error> {
        Ok(self.write_u8(val)?)
    }

    fn write_mtp_i8(&mut self, val: i8) -> Result<(), Error> {
        Ok(self.write_i8(val)?)
    }

    fn write_mtp_u16(&mut self, val: u16) -> Result<(), Error> {
        Ok(self.write_u16::<LittleEndian>(val)?)
    }

    fn write_mtp_i16(&mut self, val: i16) -> Result<(), Error> {
        Ok(self.write_i16::<LittleEndian>(val)?)
    }

    fn write_mtp_u32(&mut self, val: u32) -> Result<(), Error> {
        Ok(self.write_u32::<LittleEndian>(val)?)
    }

    fn write_mtp_i32(&mut self, val: i32) -> Result<(), Error> {
        Ok(self.write_i32::<LittleEndian>(val)?)
    }

    fn write_mtp_u64(&mut self, val: u64) -> Result<(), Error> {
        Ok(self.write_u64::<LittleEndian>(val)?)
    }

    fn write_mtp_i64(&mut self, val: i64) -> Result<(), Error> {
        Ok(self.write_i64::<LittleEndian>(val)?)
    }

    fn write_mtp_u128(&mut self, val: u128) -> Result<(), Error> {
        self.write_u64::<LittleEndian>(val as u64)?;
        self.write_u64::<LittleEndian>((val >> 64) as u64)?;
        Ok(())
    }

    fn write_mtp_i128(&mut self, val: i128) -> Result<(), Error> {
        self.write_mtp_u128(val as u128)
    }

    #[inline(always)]
    fn write_mtp_slice<T, U: Fn(&mut Self, &T) -> Result<(), Error>>(
        &mut self,
        vals: &[T],
        func: U,
    ) -> Result<(), Error> {
        self.write_u32::<LittleEndian>(vals.len() as u32)?;
        for val in vals {
            func(self, val)?;
        }
        Ok(())
    }

    /// Writes an MTP string, truncating to fit the 254 code-unit limit.
    fn write_mtp_str(&mut self, val: &str) -> Result<(), Error> {
        let units = fit_utf16(val);
        if units.is_empty() {
            self.write_u8(0)?;
            return Ok(());
        }
        self.write_u8((units.len() + 1) as u8)?;
        for unit in &units {
            self.write_u16::<LittleEndian>(*unit)?;
        }
        self.write_u16::<LittleEndian>(0)?;
        Ok(())
    }
}

impl<W: WriteBytesExt + ?Sized> MtpWrite for W {}

/// A dynamically typed MTP value, used for property values and the
/// variant fields of datasets.
#[derive(Debug, Eq, PartialEq, PartialOrd, Clone)]
pub enum MtpData {
    Undef,
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Int128(i128),
    Uint128(u128),
    AInt8(Vec<i8>),
    AUint8(Vec<u8>),
    AInt16(Vec<i16>),
    AUint16(Vec<u16>),
    AInt32(Vec<i32>),
    AUint32(Vec<u32>),
    AInt64(Vec<i64>),
    AUint64(Vec<u64>),
    AInt128(Vec<i128>),
    AUint128(Vec<u128>),
    Str(String),
}

impl MtpData {
    /// The default (zero) value for a data type, used when a property
    /// has no better answer.
    pub fn default_for(kind: DataType) -> MtpData {
        use self::MtpData::*;
        match kind {
            DataType::Int8 => Int8(0),
            DataType::Uint8 => Uint8(0),
            DataType::Int16 => Int16(0),
            DataType::Uint16 => Uint16(0),
            DataType::Int32 => Int32(0),
            DataType::Uint32 => Uint32(0),
            DataType::Int64 => Int64(0),
            DataType::Uint64 => Uint64(0),
            DataType::Int128 => Int128(0),
            DataType::Uint128 => Uint128(0),
            DataType::ArrayInt8 => AInt8(vec![]),
            DataType::ArrayUint8 => AUint8(vec![]),
            DataType::ArrayInt16 => AInt16(vec![]),
            DataType::ArrayUint16 => AUint16(vec![]),
            DataType::ArrayInt32 => AInt32(vec![]),
            DataType::ArrayUint32 => AUint32(vec![]),
            DataType::ArrayInt64 => AInt64(vec![]),
            DataType::ArrayUint64 => AUint64(vec![]),
            DataType::ArrayInt128 => AInt128(vec![]),
            DataType::ArrayUint128 => AUint128(vec![]),
            DataType::Str => Str(String::new()),
            DataType::Undefined => Undef,
        }
    }

    pub fn data_type(&self) -> DataType {
        use self::MtpData::*;
        match self {
            Undef => DataType::Undefined,
            Int8(_) => DataType::Int8,
            Uint8(_) => DataType::Uint8,
            Int16(_) => DataType::Int16,
            Uint16(_) => DataType::Uint16,
            Int32(_) => DataType::Int32,
            Uint32(_) => DataType::Uint32,
            Int64(_) => DataType::Int64,
            Uint64(_) => DataType::Uint64,
            Int128(_) => DataType::Int128,
            Uint128(_) => DataType::Uint128,
            AInt8(_) => DataType::ArrayInt8,
            AUint8(_) => DataType::ArrayUint8,
            AInt16(_) => DataType::ArrayInt16,
            AUint16(_) => DataType::ArrayUint16,
            AInt32(_) => DataType::ArrayInt32,
            AUint32(_) => DataType::ArrayUint32,
            AInt64(_) => DataType::ArrayInt64,
            AUint64(_) => DataType::ArrayUint64,
            AInt128(_) => DataType::ArrayInt128,
            AUint128(_) => DataType::ArrayUint128,
            Str(_) => DataType::Str,
        }
    }

    pub fn write_to<W: MtpWrite>(&self, w: &mut W) -> Result<(), Error> {
        use self::MtpData::*;
        match self {
            Undef => Ok(()),
            Int8(val) => w.write_mtp_i8(*val),
            Uint8(val) => w.write_mtp_u8(*val),
            Int16(val) => w.write_mtp_i16(*val),
            Uint16(val) => w.write_mtp_u16(*val),
            Int32(val) => w.write_mtp_i32(*val),
            Uint32(val) => w.write_mtp_u32(*val),
            Int64(val) => w.write_mtp_i64(*val),
            Uint64(val) => w.write_mtp_u64(*val),
            Int128(val) => w.write_mtp_i128(*val),
            Uint128(val) => w.write_mtp_u128(*val),
            AInt8(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_i8(*v)),
            AUint8(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_u8(*v)),
            AInt16(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_i16(*v)),
            AUint16(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_u16(*v)),
            AInt32(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_i32(*v)),
            AUint32(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_u32(*v)),
            AInt64(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_i64(*v)),
            AUint64(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_u64(*v)),
            AInt128(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_i128(*v)),
            AUint128(vals) => w.write_mtp_slice(vals, |w, v| w.write_mtp_u128(*v)),
            Str(val) => w.write_mtp_str(val),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![];
        // Vec writes cannot fail
        self.write_to(&mut out).ok();
        out
    }

    /// Reads a value of the given data-type code. Unknown codes are an
    /// [`Error::UnsupportedType`].
    pub fn read_type<T: MtpRead>(kind: u16, reader: &mut T) -> Result<MtpData, Error> {
        use self::MtpData::*;
        Ok(match kind {
            0x0001 => Int8(reader.read_mtp_i8()?),
            0x0002 => Uint8(reader.read_mtp_u8()?),
            0x0003 => Int16(reader.read_mtp_i16()?),
            0x0004 => Uint16(reader.read_mtp_u16()?),
            0x0005 => Int32(reader.read_mtp_i32()?),
            0x0006 => Uint32(reader.read_mtp_u32()?),
            0x0007 => Int64(reader.read_mtp_i64()?),
            0x0008 => Uint64(reader.read_mtp_u64()?),
            0x0009 => Int128(reader.read_mtp_i128()?),
            0x000A => Uint128(reader.read_mtp_u128()?),
            0x4001 => AInt8(reader.read_mtp_i8_vec()?),
            0x4002 => AUint8(reader.read_mtp_u8_vec()?),
            0x4003 => AInt16(reader.read_mtp_i16_vec()?),
            0x4004 => AUint16(reader.read_mtp_u16_vec()?),
            0x4005 => AInt32(reader.read_mtp_i32_vec()?),
            0x4006 => AUint32(reader.read_mtp_u32_vec()?),
            0x4007 => AInt64(reader.read_mtp_i64_vec()?),
            0x4008 => AUint64(reader.read_mtp_u64_vec()?),
            0x4009 => AInt128(reader.read_mtp_i128_vec()?),
            0x400A => AUint128(reader.read_mtp_u128_vec()?),
            0xFFFF => Str(reader.read_mtp_str()?),
            other => return Err(Error::UnsupportedType(other)),
        })
    }
}

impl ToPrimitive for MtpData {
    fn to_i64(&self) -> Option<i64> {
        match self {
            MtpData::Int8(v) => Some(*v as i64),
            MtpData::Uint8(v) => Some(*v as i64),
            MtpData::Int16(v) => Some(*v as i64),
            MtpData::Uint16(v) => Some(*v as i64),
            MtpData::Int32(v) => Some(*v as i64),
            MtpData::Uint32(v) => Some(*v as i64),
            MtpData::Int64(v) => Some(*v),
            _ => None,
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            MtpData::Uint8(v) => Some(*v as u64),
            MtpData::Uint16(v) => Some(*v as u64),
            MtpData::Uint32(v) => Some(*v as u64),
            MtpData::Uint64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i8> for MtpData {
    fn from(value: i8) -> Self {
        MtpData::Int8(value)
    }
}

impl From<u8> for MtpData {
    fn from(value: u8) -> Self {
        MtpData::Uint8(value)
    }
}

impl From<i16> for MtpData {
    fn from(value: i16) -> Self {
        MtpData::Int16(value)
    }
}

impl From<u16> for MtpData {
    fn from(value: u16) -> Self {
        MtpData::Uint16(value)
    }
}

impl From<i32> for MtpData {
    fn from(value: i32) -> Self {
        MtpData::Int32(value)
    }
}

impl From<u32> for MtpData {
    fn from(value: u32) -> Self {
        MtpData::Uint32(value)
    }
}

impl From<i64> for MtpData {
    fn from(value: i64) -> Self {
        MtpData::Int64(value)
    }
}

impl From<u64> for MtpData {
    fn from(value: u64) -> Self {
        MtpData::Uint64(value)
    }
}

impl From<u128> for MtpData {
    fn from(value: u128) -> Self {
        MtpData::Uint128(value)
    }
}

impl<'a> From<&'a str> for MtpData {
    fn from(value: &'a str) -> Self {
        MtpData::Str(value.to_owned())
    }
}

impl From<String> for MtpData {
    fn from(value: String) -> Self {
        MtpData::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: MtpData) -> MtpData {
        let kind = data.data_type().to_u64().unwrap() as u16;
        let encoded = data.encode();
        let mut cur = Cursor::new(&encoded);
        let decoded = MtpData::read_type(kind, &mut cur).unwrap();
        cur.expect_end().unwrap();
        decoded
    }

    #[test]
    fn scalar_round_trips() {
        assert_eq!(round_trip(MtpData::Uint8(0xAB)), MtpData::Uint8(0xAB));
        assert_eq!(round_trip(MtpData::Int16(-2)), MtpData::Int16(-2));
        assert_eq!(
            round_trip(MtpData::Uint64(0x1122_3344_5566_7788)),
            MtpData::Uint64(0x1122_3344_5566_7788)
        );
        let big = 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10u128;
        assert_eq!(round_trip(MtpData::Uint128(big)), MtpData::Uint128(big));
    }

    #[test]
    fn u128_wire_order_is_low_word_first() {
        let encoded = MtpData::Uint128(0x1).encode();
        assert_eq!(encoded[0], 0x01);
        assert!(encoded[1..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn array_round_trips() {
        let arr = MtpData::AUint32(vec![1, 2, 0xFFFF_FFFF]);
        assert_eq!(round_trip(arr.clone()), arr);
    }

    #[test]
    fn string_round_trips() {
        let s = MtpData::Str("tmpfile".into());
        assert_eq!(round_trip(s.clone()), s);
        assert_eq!(round_trip(MtpData::Str("".into())), MtpData::Str("".into()));
    }

    #[test]
    fn empty_string_is_one_zero_byte() {
        assert_eq!(MtpData::Str("".into()).encode(), vec![0]);
    }

    #[test]
    fn long_string_is_truncated_to_limit() {
        let long: String = std::iter::repeat('x').take(500).collect();
        let encoded = MtpData::Str(long).encode();
        // count byte holds 254 units + terminator
        assert_eq!(encoded[0], 255);
        assert_eq!(encoded.len(), 1 + 255 * 2);
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let mut cur = Cursor::new([0u8; 4]);
        match MtpData::read_type(0x0077, &mut cur) {
            Err(Error::UnsupportedType(0x0077)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
