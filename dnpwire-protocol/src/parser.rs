//! Incremental reassembly of received wire bytes.
//!
//! `feed` accepts whatever bytes the transport has, down to one at a time.
//! Bytes are copied into the message's wire buffer as they arrive; every
//! header and chunk CRC is verified the moment its last byte lands, and
//! verified chunk data is appended to the payload with transport and
//! application headers stripped.
//!
//! A failed check discards the whole partial message and goes back to
//! looking for a start marker. The caller only sees `Incomplete`; the
//! discard is visible through [`Message::stats`].

use crate::crc::crc16;
use crate::endian::{read_u16, Endian};
use crate::frame::{
    body_wire_len, AppControl, ControlCode, DataControl, InternalIndicators, TransportHeader,
    CHUNK_SIZE, CRC_LEN, DATA_CONTROL_OFFSET, DEST_OFFSET, HEADER_CRC_OFFSET, HEADER_LEN,
    LENGTH_OFFSET, MESSAGE_MAX, SOURCE_OFFSET, START_BYTES, USERDATA_MAX,
};
use crate::message::{Message, Phase, Reassembly};
use bytes::BufMut;
use serde::Serialize;
use tracing::debug;

/// Outcome of a [`Message::feed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// More bytes are needed. Also reported after a silent resync.
    Incomplete,
    /// The last fragment arrived; the payload is ready to read.
    Complete,
    /// The stream declared more than a message can hold.
    Corrupt,
}

/// Result of feeding a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feed {
    /// Bytes of the slice absorbed, discarded ones included.
    pub consumed: usize,
    pub status: FeedStatus,
}

enum Step {
    Continue,
    Done(FeedStatus),
}

impl Message {
    /// Absorbs received bytes.
    ///
    /// Stops at the byte that completes the message (or proves it corrupt)
    /// so that anything after it can be fed to the next message. Once a
    /// message is complete or corrupt, further calls consume nothing.
    pub fn feed(&mut self, bytes: &[u8]) -> Feed {
        match self.rx.phase {
            Phase::Complete => {
                return Feed {
                    consumed: 0,
                    status: FeedStatus::Complete,
                }
            }
            Phase::Corrupt => {
                return Feed {
                    consumed: 0,
                    status: FeedStatus::Corrupt,
                }
            }
            _ => {}
        }

        for (i, &byte) in bytes.iter().enumerate() {
            if let Step::Done(status) = self.feed_byte(byte) {
                return Feed {
                    consumed: i + 1,
                    status,
                };
            }
        }
        Feed {
            consumed: bytes.len(),
            status: FeedStatus::Incomplete,
        }
    }

    fn feed_byte(&mut self, byte: u8) -> Step {
        match self.rx.phase {
            Phase::Seeking => {
                self.seek_start(byte);
                Step::Continue
            }
            Phase::Header => {
                self.wire.put_u8(byte);
                if self.wire.len() - self.rx.fragment_start == HEADER_LEN {
                    self.check_header()
                } else {
                    Step::Continue
                }
            }
            Phase::Body => {
                self.wire.put_u8(byte);
                self.body_byte()
            }
            Phase::Complete => Step::Done(FeedStatus::Complete),
            Phase::Corrupt => Step::Done(FeedStatus::Corrupt),
        }
    }

    fn seek_start(&mut self, byte: u8) {
        let fs = self.rx.fragment_start;
        match self.wire.len() - fs {
            0 if byte == START_BYTES[0] => self.wire.put_u8(byte),
            1 if byte == START_BYTES[1] => {
                self.wire.put_u8(byte);
                self.rx.phase = Phase::Header;
            }
            // A repeated first marker byte may still begin a frame.
            1 if byte == START_BYTES[0] => self.stats.discarded_bytes += 1,
            1 => {
                self.wire.truncate(fs);
                self.stats.discarded_bytes += 2;
            }
            _ => self.stats.discarded_bytes += 1,
        }
    }

    fn check_header(&mut self) -> Step {
        let fs = self.rx.fragment_start;
        let header = &self.wire[fs..fs + HEADER_LEN];
        let expected = read_u16(header, HEADER_CRC_OFFSET, Endian::Little);
        if crc16(&header[..HEADER_CRC_OFFSET]) != expected {
            self.resync("header crc mismatch");
            return Step::Continue;
        }

        let data_len = header[LENGTH_OFFSET] as usize;
        if data_len == 0 {
            self.resync("empty fragment");
            return Step::Continue;
        }

        let needed = fs + HEADER_LEN + body_wire_len(data_len);
        if needed > MESSAGE_MAX {
            debug!(needed, capacity = MESSAGE_MAX, "message exceeds capacity");
            self.rx.phase = Phase::Corrupt;
            return Step::Done(FeedStatus::Corrupt);
        }

        self.rx.data_len = data_len;
        self.rx.phase = Phase::Body;
        Step::Continue
    }

    fn body_byte(&mut self) -> Step {
        let body_start = self.rx.fragment_start + HEADER_LEN;
        let pos = self.wire.len() - body_start;
        let chunk = (pos - 1) / (CHUNK_SIZE + CRC_LEN);
        let chunk_offset = chunk * CHUNK_SIZE;
        let chunk_data = (self.rx.data_len - chunk_offset).min(CHUNK_SIZE);
        let chunk_end = chunk * (CHUNK_SIZE + CRC_LEN) + chunk_data + CRC_LEN;
        if pos < chunk_end {
            return Step::Continue;
        }

        let start = body_start + chunk * (CHUNK_SIZE + CRC_LEN);
        let expected = read_u16(&self.wire, start + chunk_data, Endian::Little);
        if crc16(&self.wire[start..start + chunk_data]) != expected {
            self.resync("chunk crc mismatch");
            return Step::Continue;
        }

        let payload_from = if chunk == 0 {
            match self.open_fragment(start, chunk_data) {
                Some(skip) => skip,
                None => return Step::Continue,
            }
        } else {
            0
        };

        // Fragment 0 may have been moved to the front of the buffer.
        let start = self.rx.fragment_start + HEADER_LEN + chunk * (CHUNK_SIZE + CRC_LEN);
        let payload = start + payload_from..start + chunk_data;
        if self.user_data.len() + payload.len() > USERDATA_MAX {
            debug!(
                needed = self.user_data.len() + payload.len(),
                capacity = USERDATA_MAX,
                "payload exceeds capacity"
            );
            self.rx.phase = Phase::Corrupt;
            return Step::Done(FeedStatus::Corrupt);
        }
        let (wire, user_data) = (&self.wire, &mut self.user_data);
        user_data.put_slice(&wire[payload]);

        if chunk_offset + chunk_data < self.rx.data_len {
            return Step::Continue;
        }

        self.rx.fragment_count += 1;
        debug!(
            fragment = self.rx.fragment_count,
            seq = self.rx.transport.seq(),
            len = self.rx.data_len,
            "fragment received"
        );
        if self.rx.transport.is_last() {
            self.rx.phase = Phase::Complete;
            self.read_cursor = 0;
            self.object = None;
            return Step::Done(FeedStatus::Complete);
        }

        self.rx.fragment_start = self.wire.len();
        self.rx.phase = Phase::Seeking;
        Step::Continue
    }

    /// Validates the transport header at the start of a fragment's first
    /// chunk and, for the first fragment, the application header.
    ///
    /// Returns how many leading chunk bytes are headers, or `None` if the
    /// fragment was discarded.
    fn open_fragment(&mut self, start: usize, chunk_data: usize) -> Option<usize> {
        let transport = TransportHeader::from_bits(self.wire[start]);
        let fs = self.rx.fragment_start;

        if self.rx.fragment_count > 0 {
            if transport.is_first() {
                // A new message began before the old one finished.
                let discarded = fs;
                self.wire.copy_within(fs.., 0);
                self.wire.truncate(self.wire.len() - fs);
                self.user_data.clear();
                self.rx.fragment_count = 0;
                self.rx.fragment_start = 0;
                self.stats.resyncs += 1;
                self.stats.discarded_bytes += discarded as u64;
                debug!(discarded, "first fragment restarted reassembly");
            } else {
                let dest = read_u16(&self.wire, fs + DEST_OFFSET, Endian::Little);
                let source = read_u16(&self.wire, fs + SOURCE_OFFSET, Endian::Little);
                let expected_seq = self.rx.transport.seq().wrapping_add(1) & TransportHeader::SEQ_MASK;
                if dest != self.dest || source != self.source {
                    self.resync("continuation from another station");
                    return None;
                }
                if transport.seq() != expected_seq {
                    self.resync("transport sequence gap");
                    return None;
                }
                self.rx.transport = transport;
                return Some(1);
            }
        } else if !transport.is_first() {
            self.resync("continuation without first fragment");
            return None;
        }

        self.rx.transport = transport;
        let fs = self.rx.fragment_start;
        let start = fs + HEADER_LEN;
        self.dest = read_u16(&self.wire, fs + DEST_OFFSET, Endian::Little);
        self.source = read_u16(&self.wire, fs + SOURCE_OFFSET, Endian::Little);
        self.data_control = DataControl::from_bits(self.wire[fs + DATA_CONTROL_OFFSET]);
        self.transport_seq = transport.seq();

        if chunk_data < 3 {
            self.resync("first fragment too short for application header");
            return None;
        }
        self.app_control = AppControl::from_bits(self.wire[start + 1]);
        self.application_seq = self.app_control.seq();
        self.control = ControlCode::from(self.wire[start + 2]);

        if !self.control.carries_indicators() {
            self.indicators = InternalIndicators::new();
            return Some(3);
        }
        if chunk_data < 5 {
            self.resync("response too short for internal indicators");
            return None;
        }
        self.indicators = InternalIndicators::from_bits(read_u16(&self.wire, start + 3, Endian::Little));
        Some(5)
    }

    /// Drops the partial message and goes back to seeking a start marker.
    fn resync(&mut self, reason: &'static str) {
        let discarded = self.wire.len();
        self.stats.resyncs += 1;
        self.stats.discarded_bytes += discarded as u64;
        debug!(reason, discarded, "resynchronising");
        self.wire.clear();
        self.user_data.clear();
        self.read_cursor = 0;
        self.object = None;
        self.rx = Reassembly::new();
    }
}
