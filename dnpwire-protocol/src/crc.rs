//! CRC-16 checksums for headers and data chunks.

use ::crc::{Crc, CRC_16_DNP, CRC_16_MODBUS};

const DNP: Crc<u16> = Crc::<u16>::new(&CRC_16_DNP);
const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Polynomial selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcKind {
    /// Reflected 0x3D65, complemented. Sent low byte first.
    #[default]
    Dnp,
    Modbus,
}

impl CrcKind {
    pub fn checksum(&self, bytes: &[u8]) -> u16 {
        match self {
            CrcKind::Dnp => DNP.checksum(bytes),
            CrcKind::Modbus => MODBUS.checksum(bytes),
        }
    }
}

/// CRC of a fragment header or data chunk.
#[inline]
pub fn crc16(bytes: &[u8]) -> u16 {
    DNP.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_values() {
        assert_eq!(crc16(b"123456789"), 0xEA82);
        assert_eq!(CrcKind::Dnp.checksum(b"123456789"), 0xEA82);
        assert_eq!(CrcKind::Modbus.checksum(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_known_link_header() {
        // Reset-link request from master 1024 to outstation 1.
        let header = [0x05, 0x64, 0x05, 0xC0, 0x01, 0x00, 0x00, 0x04];
        assert_eq!(crc16(&header).to_le_bytes(), [0xE9, 0x21]);
    }

    #[test]
    fn test_detects_single_bit_flip() {
        let data = [0x11u8; 16];
        let crc = crc16(&data);
        for i in 0..data.len() * 8 {
            let mut flipped = data;
            flipped[i / 8] ^= 1 << (i % 8);
            assert_ne!(crc16(&flipped), crc);
        }
    }
}
