use byteorder::{LittleEndian, WriteBytesExt};

// FunctionFS blob magics
const FUNCTIONFS_DESCRIPTORS_MAGIC: u32 = 1;
const FUNCTIONFS_STRINGS_MAGIC: u32 = 2;

// Descriptor types
const USB_DT_INTERFACE: u8 = 0x04;
const USB_DT_ENDPOINT: u8 = 0x05;

// Interface identity: still image capture class, PTP subclass and
// protocol
const USB_CLASS_STILL_IMAGE: u8 = 0x06;
const USB_SUBCLASS_PTP: u8 = 0x01;
const USB_PROTOCOL_PTP: u8 = 0x01;

const USB_DIR_IN: u8 = 0x80;
const USB_ENDPOINT_XFER_BULK: u8 = 0x02;
const USB_ENDPOINT_XFER_INT: u8 = 0x03;

const FS_DATA_PACKET_SIZE: u16 = 64;
const HS_DATA_PACKET_SIZE: u16 = 512;
const EVENT_PACKET_SIZE: u16 = 28;

const ENGLISH_US: u16 = 0x0409;
const INTERFACE_STRING: &str = "MTP";

fn write_interface(out: &mut Vec<u8>) {
    out.push(9); // bLength
    out.push(USB_DT_INTERFACE);
    out.push(0); // bInterfaceNumber
    out.push(0); // bAlternateSetting
    out.push(3); // bNumEndpoints
    out.push(USB_CLASS_STILL_IMAGE);
    out.push(USB_SUBCLASS_PTP);
    out.push(USB_PROTOCOL_PTP);
    out.push(1); // iInterface
}

fn write_endpoint(out: &mut Vec<u8>, address: u8, attributes: u8, packet_size: u16, interval: u8) {
    out.push(7); // bLength
    out.push(USB_DT_ENDPOINT);
    out.push(address);
    out.push(attributes);
    out.write_u16::<LittleEndian>(packet_size).ok();
    out.push(interval);
}

fn write_speed_descs(out: &mut Vec<u8>, data_packet_size: u16, int_interval: u8) {
    write_interface(out);
    write_endpoint(out, 1 | USB_DIR_IN, USB_ENDPOINT_XFER_BULK, data_packet_size, 0);
    write_endpoint(out, 2, USB_ENDPOINT_XFER_BULK, data_packet_size, 0);
    write_endpoint(
        out,
        3 | USB_DIR_IN,
        USB_ENDPOINT_XFER_INT,
        EVENT_PACKET_SIZE,
        int_interval,
    );
}

/// The descriptor blob written to ep0 at startup: full-speed and
/// high-speed alternatives of one interface with bulk-in, bulk-out and
/// interrupt-in endpoints.
pub fn descriptors_blob() -> Vec<u8> {
    let mut body = Vec::new();
    write_speed_descs(&mut body, FS_DATA_PACKET_SIZE, 255);
    write_speed_descs(&mut body, HS_DATA_PACKET_SIZE, 12);

    let mut out = Vec::with_capacity(16 + body.len());
    out.write_u32::<LittleEndian>(FUNCTIONFS_DESCRIPTORS_MAGIC).ok();
    out.write_u32::<LittleEndian>((16 + body.len()) as u32).ok();
    out.write_u32::<LittleEndian>(4).ok(); // fs_count
    out.write_u32::<LittleEndian>(4).ok(); // hs_count
    out.extend_from_slice(&body);
    out
}

/// The strings blob: a single "MTP" interface string in US English.
pub fn strings_blob() -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u16::<LittleEndian>(ENGLISH_US).ok();
    body.extend_from_slice(INTERFACE_STRING.as_bytes());
    body.push(0);

    let mut out = Vec::with_capacity(16 + body.len());
    out.write_u32::<LittleEndian>(FUNCTIONFS_STRINGS_MAGIC).ok();
    out.write_u32::<LittleEndian>((16 + body.len()) as u32).ok();
    out.write_u32::<LittleEndian>(1).ok(); // str_count
    out.write_u32::<LittleEndian>(1).ok(); // lang_count
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_blob_layout() {
        let blob = descriptors_blob();
        // header + 2 speeds x (interface 9 + 3 endpoints x 7)
        assert_eq!(blob.len(), 16 + 2 * 30);
        assert_eq!(&blob[0..4], &1u32.to_le_bytes());
        assert_eq!(&blob[4..8], &(blob.len() as u32).to_le_bytes());
        // first interface descriptor announces the still-image class
        assert_eq!(blob[16], 9);
        assert_eq!(blob[17], USB_DT_INTERFACE);
        assert_eq!(blob[21], USB_CLASS_STILL_IMAGE);
    }

    #[test]
    fn high_speed_endpoints_use_512_byte_packets() {
        let blob = descriptors_blob();
        let hs_bulk_in = &blob[16 + 30 + 9..16 + 30 + 16];
        assert_eq!(hs_bulk_in[2], 0x81);
        assert_eq!(&hs_bulk_in[4..6], &512u16.to_le_bytes());
    }

    #[test]
    fn strings_blob_carries_mtp_label() {
        let blob = strings_blob();
        assert_eq!(&blob[0..4], &2u32.to_le_bytes());
        assert_eq!(&blob[4..8], &(blob.len() as u32).to_le_bytes());
        assert_eq!(&blob[16..18], &0x0409u16.to_le_bytes());
        assert_eq!(&blob[18..22], b"MTP\0");
    }
}
