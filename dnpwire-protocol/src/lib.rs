//! # dnpwire-protocol
//!
//! Wire codec for a DNP3-style master/outstation protocol.
//!
//! This crate provides:
//! - Fragment framing with a CRC-protected header and 16-byte CRC chunks
//! - A [`Message`] state shared by the builder and the incremental parser
//! - Fragmentation of payloads up to [`USERDATA_MAX`] bytes and reassembly
//! - Qualifier-driven decoding of data objects and points
//! - Helpers that append common request and response objects
//!
//! No I/O happens here. Callers hand received bytes to [`Message::feed`]
//! and send the bytes [`Message::build`] leaves in [`Message::wire`].

pub mod builder;
pub mod crc;
pub mod endian;
pub mod error;
pub mod frame;
pub mod message;
pub mod object;
pub mod parser;
pub mod request;

pub use error::ProtocolError;
pub use frame::{
    AppControl, ControlCode, DataControl, Group, InternalIndicators, PrefixCode, Qualifier,
    RangeCode, TransportHeader, ALL_STATIONS, MAX_FRAGMENTS, MESSAGE_MAX, SELF_ADDRESS,
    USERDATA_MAX,
};
pub use message::{Message, ParseStats};
pub use object::{DataObject, DataPoint, PointData, PointSize, MAX_POINT_DATA};
pub use parser::{Feed, FeedStatus};
pub use request::{Crob, CrobCode};

/// Default TCP port for outstations.
pub const DEFAULT_PORT: u16 = 20000;
