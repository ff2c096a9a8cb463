//! Integer/byte conversion at arbitrary buffer offsets.
//!
//! Bounds are the caller's responsibility: the builder and parser check
//! lengths before calling in, so these functions index directly.

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first. All DNP header and object fields.
    Little,
    /// Most significant byte first. Only the start marker.
    Big,
}

/// Writes `value` as 2 bytes at `offset`.
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16, endian: Endian) {
    let bytes = match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    };
    buf[offset..offset + 2].copy_from_slice(&bytes);
}

/// Writes `value` as 4 bytes at `offset`.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32, endian: Endian) {
    let bytes = match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    };
    buf[offset..offset + 4].copy_from_slice(&bytes);
}

/// Reads 2 bytes at `offset`.
pub fn read_u16(buf: &[u8], offset: usize, endian: Endian) -> u16 {
    let bytes = [buf[offset], buf[offset + 1]];
    match endian {
        Endian::Little => u16::from_le_bytes(bytes),
        Endian::Big => u16::from_be_bytes(bytes),
    }
}

/// Reads a `len`-byte unsigned value at `offset`. Lengths above 4 are
/// clamped to 4.
pub fn read_u32(buf: &[u8], offset: usize, len: usize, endian: Endian) -> u32 {
    let len = len.min(4);
    let field = &buf[offset..offset + len];
    match endian {
        Endian::Little => field
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
        Endian::Big => field.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_both_orders() {
        let mut buf = [0u8; 4];
        write_u16(&mut buf, 1, 0x0564, Endian::Big);
        assert_eq!(buf, [0x00, 0x05, 0x64, 0x00]);
        assert_eq!(read_u16(&buf, 1, Endian::Big), 0x0564);

        write_u16(&mut buf, 2, 0x0400, Endian::Little);
        assert_eq!(&buf[2..], &[0x00, 0x04]);
        assert_eq!(read_u16(&buf, 2, Endian::Little), 1024);
    }

    #[test]
    fn test_u32_both_orders() {
        let mut buf = [0u8; 6];
        write_u32(&mut buf, 1, 0x1122_3344, Endian::Little);
        assert_eq!(buf, [0x00, 0x44, 0x33, 0x22, 0x11, 0x00]);
        assert_eq!(read_u32(&buf, 1, 4, Endian::Little), 0x1122_3344);

        write_u32(&mut buf, 0, 0x1122_3344, Endian::Big);
        assert_eq!(&buf[..4], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(read_u32(&buf, 0, 4, Endian::Big), 0x1122_3344);
    }

    #[test]
    fn test_read_u32_short_lengths() {
        let buf = [0x34, 0x12, 0xFF, 0xEE, 0xDD];
        assert_eq!(read_u32(&buf, 0, 1, Endian::Little), 0x34);
        assert_eq!(read_u32(&buf, 0, 2, Endian::Little), 0x1234);
        assert_eq!(read_u32(&buf, 0, 2, Endian::Big), 0x3412);
        assert_eq!(read_u32(&buf, 0, 0, Endian::Little), 0);
    }

    #[test]
    fn test_read_u32_clamps_length() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(read_u32(&buf, 0, 8, Endian::Little), 0x0403_0201);
    }
}
