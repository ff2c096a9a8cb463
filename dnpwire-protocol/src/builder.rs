//! Builds framed wire bytes from a message's payload.

use crate::crc::crc16;
use crate::endian::{write_u16, Endian};
use crate::error::ProtocolError;
use crate::frame::{
    body_wire_len, AppControl, ControlCode, TransportHeader, CHUNK_SIZE, DATA_CONTROL_OFFSET,
    DEST_OFFSET, FIRST_FRAGMENT_PAYLOAD, HEADER_CRC_OFFSET, HEADER_LEN, LENGTH_OFFSET,
    MAX_FRAGMENT_DATA, MESSAGE_MAX, NEXT_FRAGMENT_PAYLOAD, SOURCE_OFFSET, START_MARKER,
};
use crate::message::Message;
use bytes::BufMut;

impl Message {
    /// Frames the payload into one or more fragments, replacing any
    /// previous wire contents.
    ///
    /// On `BufferTooSmall` the wire buffer is left empty. Building an
    /// unchanged message twice yields identical bytes.
    pub fn build(&mut self) -> Result<(), ProtocolError> {
        self.wire.clear();

        let total = self.user_data.len();
        let mut offset = 0;
        let mut fragment = 0usize;

        loop {
            let budget = if fragment == 0 {
                FIRST_FRAGMENT_PAYLOAD
            } else {
                NEXT_FRAGMENT_PAYLOAD
            };
            let take = budget.min(total - offset);
            let last = offset + take == total;

            let mut section = [0u8; MAX_FRAGMENT_DATA];
            let mut transport = TransportHeader::new()
                .with_seq(self.transport_seq.wrapping_add(fragment as u8));
            if fragment == 0 {
                transport = transport.with(TransportHeader::FIRST);
            }
            if last {
                transport = transport.with(TransportHeader::LAST);
            }
            section[0] = transport.bits();
            let mut len = 1;

            if fragment == 0 {
                section[1] = self.app_header().bits();
                section[2] = self.control.code();
                len = 3;
                if self.control.carries_indicators() {
                    write_u16(&mut section, 3, self.indicators.bits(), Endian::Little);
                    len = 5;
                }
            }

            section[len..len + take].copy_from_slice(&self.user_data[offset..offset + take]);
            len += take;

            let needed = self.wire.len() + HEADER_LEN + body_wire_len(len);
            if needed > MESSAGE_MAX {
                self.wire.clear();
                return Err(ProtocolError::BufferTooSmall {
                    needed,
                    capacity: MESSAGE_MAX,
                });
            }

            let mut header = [0u8; HEADER_LEN];
            write_u16(&mut header, 0, START_MARKER, Endian::Big);
            header[LENGTH_OFFSET] = len as u8;
            header[DATA_CONTROL_OFFSET] = self.data_control.bits();
            write_u16(&mut header, DEST_OFFSET, self.dest, Endian::Little);
            write_u16(&mut header, SOURCE_OFFSET, self.source, Endian::Little);
            let crc = crc16(&header[..HEADER_CRC_OFFSET]);
            write_u16(&mut header, HEADER_CRC_OFFSET, crc, Endian::Little);
            self.wire.put_slice(&header);

            for chunk in section[..len].chunks(CHUNK_SIZE) {
                self.wire.put_slice(chunk);
                self.wire.put_u16_le(crc16(chunk));
            }

            offset += take;
            fragment += 1;
            if last {
                return Ok(());
            }
        }
    }

    fn app_header(&self) -> AppControl {
        let app = AppControl::new()
            .with(AppControl::FIRST | AppControl::LAST)
            .with_seq(self.application_seq);
        if self.control == ControlCode::Response {
            app
        } else {
            app.with(AppControl::CONFIRM)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::read_u16;
    use crate::frame::{InternalIndicators, FRAGMENT_WIRE_MAX, START_BYTES, USERDATA_MAX};

    /// Splits built wire bytes into (header, data section) per fragment,
    /// checking every CRC on the way.
    fn split_fragments(wire: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < wire.len() {
            let header = &wire[pos..pos + HEADER_LEN];
            assert_eq!(&header[..2], &START_BYTES);
            assert_eq!(
                read_u16(header, HEADER_CRC_OFFSET, Endian::Little),
                crc16(&header[..HEADER_CRC_OFFSET])
            );
            let len = header[LENGTH_OFFSET] as usize;
            let mut data = Vec::new();
            let mut p = pos + HEADER_LEN;
            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(CHUNK_SIZE);
                let chunk = &wire[p..p + n];
                assert_eq!(read_u16(wire, p + n, Endian::Little), crc16(chunk));
                data.extend_from_slice(chunk);
                p += n + 2;
                remaining -= n;
            }
            out.push((header.to_vec(), data));
            pos = p;
        }
        out
    }

    #[test]
    fn test_build_single_read_request() {
        let mut msg = Message::request(1, 1024, ControlCode::Read);
        msg.push_bytes(&[0x01, 0x02, 0x06]).unwrap();
        msg.build().unwrap();

        let wire = msg.wire();
        assert_eq!(wire.len(), 18);
        assert_eq!(&wire[..8], &[0x05, 0x64, 0x06, 0xC4, 0x01, 0x00, 0x00, 0x04]);

        let frags = split_fragments(wire);
        assert_eq!(frags.len(), 1);
        let data = &frags[0].1;
        // FIR|FIN, seq 0
        assert_eq!(data[0], 0xC0);
        // FIR|FIN|CON, seq 0
        assert_eq!(data[1], 0xE0);
        assert_eq!(data[2], ControlCode::Read.code());
        assert_eq!(&data[3..], &[0x01, 0x02, 0x06]);
    }

    #[test]
    fn test_build_response_carries_indicators_without_confirm() {
        let mut msg = Message::request(1024, 1, ControlCode::Response);
        msg.application_seq = 4;
        msg.indicators = InternalIndicators::new().with(InternalIndicators::RESTART);
        msg.build().unwrap();

        let frags = split_fragments(msg.wire());
        let data = &frags[0].1;
        assert_eq!(data.len(), 5);
        assert_eq!(data[1], 0xC4);
        assert_eq!(data[2], 129);
        assert_eq!(read_u16(data, 3, Endian::Little), 0x0080);
    }

    #[test]
    fn test_build_empty_payload_makes_one_fragment() {
        let mut msg = Message::request(1, 2, ControlCode::ColdRestart);
        msg.build().unwrap();
        let frags = split_fragments(msg.wire());
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].0[LENGTH_OFFSET], 3);
    }

    #[test]
    fn test_build_fragments_600_bytes() {
        let payload: Vec<u8> = (0..600).map(|i| i as u8).collect();
        let mut msg = Message::request(1, 2, ControlCode::Write);
        msg.transport_seq = 62;
        msg.push_bytes(&payload).unwrap();
        msg.build().unwrap();

        let frags = split_fragments(msg.wire());
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].1.len(), 3 + 250);
        assert_eq!(frags[1].1.len(), 1 + 254);
        assert_eq!(frags[2].1.len(), 1 + 96);

        // FIR on the first, FIN on the last, sequence wrapping at 64
        assert_eq!(frags[0].1[0], 0x40 | 62);
        assert_eq!(frags[1].1[0], 63);
        assert_eq!(frags[2].1[0], 0x80);

        let mut rebuilt = frags[0].1[3..].to_vec();
        rebuilt.extend_from_slice(&frags[1].1[1..]);
        rebuilt.extend_from_slice(&frags[2].1[1..]);
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn test_build_capacity_boundary() {
        let mut msg = Message::request(1, 2, ControlCode::Response);
        msg.push_bytes(&vec![0x5A; USERDATA_MAX]).unwrap();
        msg.build().unwrap();
        assert_eq!(msg.wire().len(), MESSAGE_MAX);
        assert_eq!(split_fragments(msg.wire()).len(), 4);

        let err = msg.push_byte(0).unwrap_err();
        assert!(matches!(err, ProtocolError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_build_overflow_clears_wire() {
        let mut msg = Message::request(1, 2, ControlCode::Write);
        // Bypass the payload guard to exercise the wire guard.
        msg.user_data.put_slice(&vec![0u8; USERDATA_MAX + 1]);
        let err = msg.build().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BufferTooSmall {
                capacity: MESSAGE_MAX,
                ..
            }
        ));
        assert!(msg.wire().is_empty());
    }

    #[test]
    fn test_build_is_idempotent() {
        let mut msg = Message::request(3, 4, ControlCode::Write);
        msg.push_bytes(&[9u8; 300]).unwrap();
        msg.build().unwrap();
        let first = msg.wire().to_vec();
        msg.build().unwrap();
        assert_eq!(msg.wire(), &first[..]);
        assert!(first.len() <= 2 * FRAGMENT_WIRE_MAX);
    }
}
