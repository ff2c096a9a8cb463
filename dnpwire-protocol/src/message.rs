//! Message state shared by the builder and the parser.

use crate::error::ProtocolError;
use crate::frame::{
    AppControl, ControlCode, DataControl, InternalIndicators, TransportHeader, MESSAGE_MAX,
    USERDATA_MAX,
};
use crate::object::DataObject;
use bytes::{BufMut, BytesMut};
use serde::Serialize;

/// Counters describing how much traffic the parser threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Partial messages discarded after a failed check.
    pub resyncs: u64,
    /// Bytes dropped while resynchronising, including noise before a start marker.
    pub discarded_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Seeking,
    Header,
    Body,
    Complete,
    Corrupt,
}

/// Parser bookkeeping for the fragment currently being received.
#[derive(Debug, Clone)]
pub(crate) struct Reassembly {
    pub phase: Phase,
    /// Offset in the wire buffer where the current fragment's header begins.
    pub fragment_start: usize,
    pub fragment_count: usize,
    /// Data section length declared by the current fragment.
    pub data_len: usize,
    pub transport: TransportHeader,
}

impl Reassembly {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Seeking,
            fragment_start: 0,
            fragment_count: 0,
            data_len: 0,
            transport: TransportHeader::new(),
        }
    }
}

/// One logical message: its framed wire bytes and its payload.
///
/// An outbound message is filled with user data and then built into wire
/// bytes; an inbound one is fed wire bytes until the parser reports it
/// complete, after which the payload can be walked with
/// [`Message::next_object`].
#[derive(Debug, Clone)]
pub struct Message {
    pub(crate) wire: BytesMut,
    pub(crate) user_data: BytesMut,
    pub(crate) read_cursor: usize,

    pub dest: u16,
    pub source: u16,
    /// Six significant bits.
    pub transport_seq: u8,
    /// Five significant bits.
    pub application_seq: u8,
    pub control: ControlCode,
    /// Only sent with Response and Unsolicited messages.
    pub indicators: InternalIndicators,
    pub data_control: DataControl,
    /// Application header as received. The builder derives its own.
    pub app_control: AppControl,

    pub(crate) rx: Reassembly,
    pub(crate) object: Option<DataObject>,
    pub(crate) stats: ParseStats,
}

impl Message {
    /// Creates an empty message, ready to be fed received bytes.
    pub fn new() -> Self {
        Self {
            wire: BytesMut::with_capacity(MESSAGE_MAX),
            user_data: BytesMut::with_capacity(USERDATA_MAX),
            read_cursor: 0,
            dest: 0,
            source: 0,
            transport_seq: 0,
            application_seq: 0,
            control: ControlCode::Read,
            indicators: InternalIndicators::new(),
            data_control: DataControl::master(),
            app_control: AppControl::new(),
            rx: Reassembly::new(),
            object: None,
            stats: ParseStats::default(),
        }
    }

    /// Creates an outbound request from a master.
    pub fn request(dest: u16, source: u16, control: ControlCode) -> Self {
        let mut msg = Self::new();
        msg.dest = dest;
        msg.source = source;
        msg.control = control;
        msg
    }

    /// Creates an outbound response answering `request`, with the
    /// addresses swapped and the application sequence echoed.
    pub fn response_to(request: &Message) -> Self {
        let mut msg = Self::new();
        msg.dest = request.source;
        msg.source = request.dest;
        msg.control = ControlCode::Response;
        msg.data_control = DataControl::outstation();
        msg.application_seq = request.application_seq;
        msg.transport_seq = request.transport_seq;
        msg
    }

    /// Starts the next outbound message: clears everything `reset` does and
    /// advances both sequence counters.
    pub fn new_message(&mut self) {
        self.reset();
        self.transport_seq = self.transport_seq.wrapping_add(1) & TransportHeader::SEQ_MASK;
        self.application_seq = self.application_seq.wrapping_add(1) & AppControl::SEQ_MASK;
    }

    /// Discards wire bytes, payload and parser progress. Addresses, control
    /// code, sequence numbers and stats are kept.
    pub fn reset(&mut self) {
        self.wire.clear();
        self.user_data.clear();
        self.read_cursor = 0;
        self.rx = Reassembly::new();
        self.object = None;
    }

    /// Appends one payload byte.
    pub fn push_byte(&mut self, byte: u8) -> Result<(), ProtocolError> {
        self.push_bytes(&[byte])
    }

    /// Appends payload bytes, failing without writing anything if the
    /// payload would exceed [`USERDATA_MAX`].
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let needed = self.user_data.len() + bytes.len();
        if needed > USERDATA_MAX {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                capacity: USERDATA_MAX,
            });
        }
        self.user_data.put_slice(bytes);
        Ok(())
    }

    /// Replaces the payload.
    pub fn set_user_data(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.user_data.clear();
        self.read_cursor = 0;
        self.object = None;
        self.push_bytes(bytes)
    }

    /// Framed bytes produced by the builder or accumulated by the parser.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Payload with every header and CRC removed.
    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    /// Offset of the next unread payload byte.
    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Fragments reassembled so far.
    pub fn fragment_count(&self) -> usize {
        self.rx.fragment_count
    }

    pub fn is_complete(&self) -> bool {
        self.rx.phase == Phase::Complete
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}
