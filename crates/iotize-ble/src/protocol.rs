//! Wire constants of the IoTize SPP-over-LE service.

/// SPP over LE service advertised by IoTize devices.
pub const SPP_SERVICE_UUID: &str = "6c7b16c2-2a5b-8c9f-cf42-d31425470e7b";
/// Buffer characteristic carrying both written and notified packets.
pub const BUFFER_CHAR_UUID: &str = "cc5c5491-b3be-9287-cb42-f7a6a29a50d5";
/// Firmware upgrade service.
pub const UPGRADE_SERVICE_UUID: &str = "9e5d1e47-5c13-43a0-8635-82ad38a1386f";
/// App info characteristic of the upgrade service (firmware version).
pub const APP_INFO_CHAR_UUID: &str = "347f7608-2e2d-47eb-913b-75d4edc4de3b";

pub const PACKET_HEADER_LEN: usize = 1;
/// Frame bytes per packet: ATT MTU 23, minus 3 bytes of ATT header, minus the offset byte.
pub const PACKET_DATA_LEN: usize = 19;
pub const RX_BUFFER_CAPACITY: usize = 300;
/// Largest frame offset expressible in the one-byte packet header.
pub const MAX_HEADER_OFFSET: usize = u8::MAX as usize;

/// In-band application error code written over the tail of a frame whose
/// checksum does not match.
pub const CHECKSUM_ERROR_CODE: [u8; 2] = [0x66, 0x02];

/// Low 8 bits of the sum of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::checksum;

    #[test]
    fn checksum_wraps_modulo_256() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0x06);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[0x80; 4]), 0x00);
    }
}
