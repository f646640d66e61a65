use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;

use crate::data::{MtpRead, MtpWrite};
use crate::{ContainerType, Error};

/// Size of the container header: length, type, code, transaction id.
pub const CONTAINER_HEADER_SIZE: usize = 12;

/// Length value announcing an extra-large (>= 4 GiB) data phase. The
/// true length is known from the preceding request; the payload is
/// terminated by a short packet.
pub const EXTRA_LARGE_CONTAINER_LEN: u32 = 0xFFFF_FFFF;

const EXPANSION_STEP: usize = 512;

/// A parsed container header.
#[derive(Debug, Clone, Copy)]
pub struct ContainerInfo {
    /// Raw value of the length field; may be [`EXTRA_LARGE_CONTAINER_LEN`].
    pub len: u32,

    /// Container kind
    pub kind: ContainerType,

    /// Operation, response or event code, depending on `kind`
    pub code: u16,

    /// Transaction ID that this container belongs to
    pub tid: u32,
}

impl ContainerInfo {
    pub fn parse<R: ReadBytesExt>(mut r: R) -> Result<ContainerInfo, Error> {
        let len = r.read_u32::<LittleEndian>()?;
        let kind_u16 = r.read_u16::<LittleEndian>()?;
        let kind = ContainerType::from_u16(kind_u16).ok_or_else(|| {
            Error::MalformedContainer(format!("invalid container type {:x}", kind_u16))
        })?;
        let code = r.read_u16::<LittleEndian>()?;
        let tid = r.read_u32::<LittleEndian>()?;

        Ok(ContainerInfo { len, kind, code, tid })
    }

    pub fn is_extra_large(&self) -> bool {
        self.len == EXTRA_LARGE_CONTAINER_LEN
    }

    /// Payload length announced by the header, None for extra-large
    /// containers.
    pub fn payload_len(&self) -> Option<usize> {
        if self.is_extra_large() {
            None
        } else {
            Some((self.len as usize).saturating_sub(CONTAINER_HEADER_SIZE))
        }
    }

    pub fn belongs_to(&self, tid: u32) -> bool {
        self.tid == tid
    }
}

/// An outbound container under construction. The header is laid down
/// first with a zero length; the length field is filled in when the
/// buffer is taken, unless a caller pinned an explicit value (used to
/// mark extra-large data phases).
pub struct TxContainer {
    buf: Vec<u8>,
    pinned_len: Option<u32>,
}

impl TxContainer {
    pub fn new(kind: ContainerType, code: u16, tid: u32) -> TxContainer {
        let mut buf = Vec::with_capacity(EXPANSION_STEP);
        buf.write_u32::<LittleEndian>(0).ok();
        buf.write_u16::<LittleEndian>(kind as u16).ok();
        buf.write_u16::<LittleEndian>(code).ok();
        buf.write_u32::<LittleEndian>(tid).ok();
        TxContainer { buf, pinned_len: None }
    }

    /// Pins the header length field to an explicit value instead of the
    /// computed buffer size.
    pub fn pin_length(&mut self, len: u32) {
        self.pinned_len = Some(len);
    }

    pub fn mark_extra_large(&mut self) {
        self.pinned_len = Some(EXTRA_LARGE_CONTAINER_LEN);
    }

    pub fn write_param(&mut self, param: u32) -> Result<(), Error> {
        self.write_mtp_u32(param)
    }

    pub fn write_params(&mut self, params: &[u32]) -> Result<(), Error> {
        for p in params {
            self.write_mtp_u32(*p)?;
        }
        Ok(())
    }

    pub fn payload_len(&self) -> usize {
        self.buf.len() - CONTAINER_HEADER_SIZE
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len() == 0
    }

    /// Finalizes the length field and returns the wire bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.pinned_len.unwrap_or(self.buf.len() as u32);
        self.buf[0..4].copy_from_slice(&len.to_le_bytes());
        self.buf
    }

    fn grow(&mut self, need: usize) {
        let free = self.buf.capacity() - self.buf.len();
        if need > free {
            self.buf.reserve(need.max(EXPANSION_STEP));
        }
    }
}

impl io::Write for TxContainer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.grow(data.len());
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An inbound container being reassembled. The first fragment carries
/// the header announcing the total length; fragments are appended until
/// the announced length is reached. Extra-large containers accept
/// fragments until the transport reports the final (short) packet.
pub struct RxContainer {
    buf: Vec<u8>,
    info: ContainerInfo,
    pos: usize,
}

impl RxContainer {
    pub fn new(first_fragment: &[u8]) -> Result<RxContainer, Error> {
        if first_fragment.len() < CONTAINER_HEADER_SIZE {
            return Err(Error::MalformedContainer(format!(
                "first fragment of {} bytes cannot hold a header",
                first_fragment.len()
            )));
        }
        let info = ContainerInfo::parse(&first_fragment[..CONTAINER_HEADER_SIZE])?;
        let mut buf = Vec::with_capacity(if info.is_extra_large() {
            first_fragment.len()
        } else {
            info.len as usize
        });
        buf.extend_from_slice(first_fragment);
        Ok(RxContainer {
            buf,
            info,
            pos: CONTAINER_HEADER_SIZE,
        })
    }

    /// Appends a follow-up fragment. Bytes beyond the announced length
    /// are ignored, matching the transport's framing contract.
    pub fn append(&mut self, fragment: &[u8]) {
        if self.info.is_extra_large() {
            self.buf.extend_from_slice(fragment);
            return;
        }
        let want = (self.info.len as usize).saturating_sub(self.buf.len());
        let take = fragment.len().min(want);
        self.buf.extend_from_slice(&fragment[..take]);
    }

    /// Whether the announced length has been accumulated. Extra-large
    /// containers are complete only when the transport says so.
    pub fn is_complete(&self) -> bool {
        !self.info.is_extra_large() && self.buf.len() >= self.info.len as usize
    }

    pub fn info(&self) -> &ContainerInfo {
        &self.info
    }

    pub fn kind(&self) -> ContainerType {
        self.info.kind
    }

    pub fn code(&self) -> u16 {
        self.info.code
    }

    pub fn tid(&self) -> u32 {
        self.info.tid
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[CONTAINER_HEADER_SIZE..]
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads the request parameters: every remaining u32 in the payload,
    /// at most five.
    pub fn read_params(&mut self) -> Result<Vec<u32>, Error> {
        let mut params = Vec::with_capacity(5);
        while self.remaining() >= 4 && params.len() < 5 {
            params.push(self.read_mtp_u32()?);
        }
        Ok(params)
    }
}

impl io::Read for RxContainer {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl MtpRead for RxContainer {
    fn expect_end(&mut self) -> Result<(), Error> {
        if self.remaining() != 0 {
            Err(Error::MalformedContainer(format!(
                "{} bytes of trailing payload",
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MtpWrite;

    #[test]
    fn tx_header_layout() {
        let mut tx = TxContainer::new(ContainerType::Response, 0x2001, 7);
        tx.write_params(&[0x00010001, 0, 42]).unwrap();
        let bytes = tx.finish();
        assert_eq!(bytes.len(), CONTAINER_HEADER_SIZE + 12);
        assert_eq!(&bytes[0..4], &24u32.to_le_bytes());
        assert_eq!(&bytes[4..6], &3u16.to_le_bytes());
        assert_eq!(&bytes[6..8], &0x2001u16.to_le_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
    }

    #[test]
    fn pinned_length_survives_finish() {
        let mut tx = TxContainer::new(ContainerType::Data, 0x1009, 3);
        tx.mark_extra_large();
        tx.write_mtp_u32(1).unwrap();
        let bytes = tx.finish();
        assert_eq!(&bytes[0..4], &EXTRA_LARGE_CONTAINER_LEN.to_le_bytes());
    }

    #[test]
    fn rx_accumulates_fragments_until_complete() {
        let mut tx = TxContainer::new(ContainerType::Data, 0x100D, 9);
        tx.write_mtp_str("hello world").unwrap();
        let bytes = tx.finish();

        let (head, tail) = bytes.split_at(CONTAINER_HEADER_SIZE + 3);
        let mut rx = RxContainer::new(head).unwrap();
        assert!(!rx.is_complete());
        rx.append(tail);
        assert!(rx.is_complete());
        assert_eq!(rx.read_mtp_str().unwrap(), "hello world");
        rx.expect_end().unwrap();
    }

    #[test]
    fn rx_truncated_payload_is_malformed() {
        let mut tx = TxContainer::new(ContainerType::Command, 0x1008, 1);
        tx.write_mtp_u32(5).unwrap();
        let bytes = tx.finish();
        let mut rx = RxContainer::new(&bytes).unwrap();
        rx.read_mtp_u32().unwrap();
        match rx.read_mtp_u32() {
            Err(Error::MalformedContainer(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rx_ignores_overlong_fragments() {
        let mut tx = TxContainer::new(ContainerType::Command, 0x1001, 1);
        tx.write_mtp_u32(1).unwrap();
        let bytes = tx.finish();
        let mut rx = RxContainer::new(&bytes[..CONTAINER_HEADER_SIZE]).unwrap();
        let mut tail = bytes[CONTAINER_HEADER_SIZE..].to_vec();
        tail.extend_from_slice(&[0xEE; 8]);
        rx.append(&tail);
        assert!(rx.is_complete());
        assert_eq!(rx.payload().len(), 4);
    }

    #[test]
    fn short_first_fragment_is_rejected() {
        match RxContainer::new(&[0u8; 4]) {
            Err(Error::MalformedContainer(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn request_params_capped_at_five() {
        let mut tx = TxContainer::new(ContainerType::Command, 0x1006, 2);
        tx.write_params(&[1, 2, 3, 4, 5]).unwrap();
        let bytes = tx.finish();
        let mut rx = RxContainer::new(&bytes).unwrap();
        assert_eq!(rx.read_params().unwrap(), vec![1, 2, 3, 4, 5]);
    }
}
