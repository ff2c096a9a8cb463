//! Framing definitions shared by the builder and the parser.
//!
//! Fragment layout (10 bytes header + CRC-chunked data section):
//!
//! ```text
//! +--------+-----+--------+-------+--------+---------+
//! | 05 64  | len | d-ctrl | dest  | source | hdr crc |
//! | 2 bytes|  1  |   1    | 2 LE  |  2 LE  |  2 LE   |
//! +--------+-----+--------+-------+--------+---------+
//! | data chunk (<=16) | crc (2) | data chunk | crc | ...
//! +-------------------+---------+------------+-----+
//! ```
//!
//! The data section starts with the transport header. The first fragment of
//! a message follows it with the application header, the control code and,
//! for responses, the internal indicators.
//!
//! The length byte counts the data section only, without the five link
//! header bytes stock DNP3 includes, so captures from other stacks do not
//! parse as-is.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Start marker, sent as the literal bytes `05 64`.
pub const START_MARKER: u16 = 0x0564;
/// Start marker as it appears on the wire.
pub const START_BYTES: [u8; 2] = [0x05, 0x64];

/// Header field offsets within a fragment.
pub const LENGTH_OFFSET: usize = 2;
pub const DATA_CONTROL_OFFSET: usize = 3;
pub const DEST_OFFSET: usize = 4;
pub const SOURCE_OFFSET: usize = 6;
pub const HEADER_CRC_OFFSET: usize = 8;

/// Fixed header size including its CRC.
pub const HEADER_LEN: usize = 10;
/// Data bytes covered by one chunk CRC.
pub const CHUNK_SIZE: usize = 16;
pub const CRC_LEN: usize = 2;

/// Largest data section a fragment can declare in its length byte.
pub const MAX_FRAGMENT_DATA: usize = 255;
/// Largest fragment on the wire: header plus 255 data bytes in 16 chunks.
pub const FRAGMENT_WIRE_MAX: usize = HEADER_LEN + MAX_FRAGMENT_DATA + 16 * CRC_LEN;
pub const MAX_FRAGMENTS: usize = 4;
pub const MESSAGE_MAX: usize = MAX_FRAGMENTS * FRAGMENT_WIRE_MAX;

/// Payload bytes carried by the first fragment of a message.
pub const FIRST_FRAGMENT_PAYLOAD: usize = 250;
/// Payload bytes carried by every later fragment.
pub const NEXT_FRAGMENT_PAYLOAD: usize = 254;
pub const USERDATA_MAX: usize =
    FIRST_FRAGMENT_PAYLOAD + (MAX_FRAGMENTS - 1) * NEXT_FRAGMENT_PAYLOAD;

/// Destination address accepted by every station.
pub const ALL_STATIONS: u16 = 0xFFFF;
/// Destination address meaning "whoever receives this".
pub const SELF_ADDRESS: u16 = 0xFFFC;

/// Bytes a data section of `data_len` bytes occupies once chunk CRCs are added.
pub const fn body_wire_len(data_len: usize) -> usize {
    data_len + data_len.div_ceil(CHUNK_SIZE) * CRC_LEN
}

/// Declares a bit-set newtype over an unsigned integer with named masks.
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty) {
            $( $(#[$fmeta:meta])* $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: $repr = $value; )*

            pub const fn new() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            pub const fn bits(&self) -> $repr {
                self.0
            }

            pub const fn with(self, flag: $repr) -> Self {
                Self(self.0 | flag)
            }

            pub const fn without(self, flag: $repr) -> Self {
                Self(self.0 & !flag)
            }

            pub fn set(&mut self, flag: $repr, on: bool) {
                if on {
                    self.0 |= flag;
                } else {
                    self.0 &= !flag;
                }
            }

            pub const fn contains(&self, flag: $repr) -> bool {
                self.0 & flag == flag
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

flag_set! {
    /// Link data-control byte.
    DataControl(u8) {
        DIRECTION = 0x80;
        PRIMARY = 0x40;
        FRAME_COUNT_BIT = 0x20;
        FRAME_COUNT_VALID = 0x10;
        UNCONFIRMED_DATA = 0x04;
    }
}

impl DataControl {
    /// Control byte for traffic sent by a master.
    pub const fn master() -> Self {
        Self(Self::DIRECTION | Self::PRIMARY | Self::UNCONFIRMED_DATA)
    }

    /// Control byte for traffic sent by an outstation.
    pub const fn outstation() -> Self {
        Self(Self::PRIMARY | Self::UNCONFIRMED_DATA)
    }

    pub const fn from_master(&self) -> bool {
        self.contains(Self::DIRECTION)
    }
}

flag_set! {
    /// First byte of every fragment's data section.
    TransportHeader(u8) {
        FIRST = 0x40;
        LAST = 0x80;
        SEQ_MASK = 0x3F;
    }
}

impl TransportHeader {
    pub const fn with_seq(self, seq: u8) -> Self {
        Self((self.0 & !Self::SEQ_MASK) | (seq & Self::SEQ_MASK))
    }

    pub const fn seq(&self) -> u8 {
        self.0 & Self::SEQ_MASK
    }

    pub const fn is_first(&self) -> bool {
        self.contains(Self::FIRST)
    }

    pub const fn is_last(&self) -> bool {
        self.contains(Self::LAST)
    }
}

flag_set! {
    /// Application header, carried once per message.
    AppControl(u8) {
        FIRST = 0x80;
        LAST = 0x40;
        CONFIRM = 0x20;
        SEQ_MASK = 0x1F;
    }
}

impl AppControl {
    pub const fn with_seq(self, seq: u8) -> Self {
        Self((self.0 & !Self::SEQ_MASK) | (seq & Self::SEQ_MASK))
    }

    pub const fn seq(&self) -> u8 {
        self.0 & Self::SEQ_MASK
    }

    pub const fn confirm_expected(&self) -> bool {
        self.contains(Self::CONFIRM)
    }
}

flag_set! {
    /// Internal indications reported by an outstation in every response.
    InternalIndicators(u16) {
        ALL_STATIONS = 0x0001;
        CLASS_1_DATA = 0x0002;
        CLASS_2_DATA = 0x0004;
        CLASS_3_DATA = 0x0008;
        TIME_SYNC_REQUIRED = 0x0010;
        LOCAL_STATE = 0x0020;
        DEVICE_TROUBLE = 0x0040;
        RESTART = 0x0080;
        NOT_IMPLEMENTED = 0x0100;
        OBJECT_UNKNOWN = 0x0200;
        OUT_OF_RANGE = 0x0400;
        BUFFER_OVERFLOW = 0x0800;
        OPERATION_EXECUTING = 0x1000;
        CORRUPT_CONFIG = 0x2000;
    }
}

impl InternalIndicators {
    /// Names of the bits that are set, lowest bit first.
    pub fn names(&self) -> Vec<&'static str> {
        const NAMES: [(u16, &str); 14] = [
            (InternalIndicators::ALL_STATIONS, "all_stations"),
            (InternalIndicators::CLASS_1_DATA, "class_1_data"),
            (InternalIndicators::CLASS_2_DATA, "class_2_data"),
            (InternalIndicators::CLASS_3_DATA, "class_3_data"),
            (InternalIndicators::TIME_SYNC_REQUIRED, "time_sync_required"),
            (InternalIndicators::LOCAL_STATE, "local_state"),
            (InternalIndicators::DEVICE_TROUBLE, "device_trouble"),
            (InternalIndicators::RESTART, "restart"),
            (InternalIndicators::NOT_IMPLEMENTED, "not_implemented"),
            (InternalIndicators::OBJECT_UNKNOWN, "object_unknown"),
            (InternalIndicators::OUT_OF_RANGE, "out_of_range"),
            (InternalIndicators::BUFFER_OVERFLOW, "buffer_overflow"),
            (InternalIndicators::OPERATION_EXECUTING, "operation_executing"),
            (InternalIndicators::CORRUPT_CONFIG, "corrupt_config"),
        ];
        NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Application function carried in the control-code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCode {
    Confirm,
    Read,
    Write,
    Select,
    Operate,
    DirectOperate,
    FreezeAndClear,
    ColdRestart,
    WarmRestart,
    FileOpen,
    FileClose,
    Response,
    Unsolicited,
    /// A function this codec has no name for, kept as received.
    Other(u8),
}

impl ControlCode {
    /// The function code byte.
    pub const fn code(&self) -> u8 {
        match self {
            ControlCode::Confirm => 0,
            ControlCode::Read => 1,
            ControlCode::Write => 2,
            ControlCode::Select => 3,
            ControlCode::Operate => 4,
            ControlCode::DirectOperate => 5,
            ControlCode::FreezeAndClear => 9,
            ControlCode::ColdRestart => 13,
            ControlCode::WarmRestart => 14,
            ControlCode::FileOpen => 25,
            ControlCode::FileClose => 26,
            ControlCode::Response => 129,
            ControlCode::Unsolicited => 130,
            ControlCode::Other(code) => *code,
        }
    }

    /// Response-type messages carry internal indicators after the code.
    pub const fn carries_indicators(&self) -> bool {
        matches!(self, ControlCode::Response | ControlCode::Unsolicited)
    }

    /// Read-style requests name points without carrying their values.
    pub const fn carries_point_data(&self) -> bool {
        !matches!(self, ControlCode::Read | ControlCode::FreezeAndClear)
    }

    pub const fn is_response(&self) -> bool {
        self.carries_indicators()
    }
}

impl From<u8> for ControlCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ControlCode::Confirm,
            1 => ControlCode::Read,
            2 => ControlCode::Write,
            3 => ControlCode::Select,
            4 => ControlCode::Operate,
            5 => ControlCode::DirectOperate,
            9 => ControlCode::FreezeAndClear,
            13 => ControlCode::ColdRestart,
            14 => ControlCode::WarmRestart,
            25 => ControlCode::FileOpen,
            26 => ControlCode::FileClose,
            129 => ControlCode::Response,
            130 => ControlCode::Unsolicited,
            other => ControlCode::Other(other),
        }
    }
}

/// Object group number. Unlisted groups remain representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(pub u8);

impl Group {
    pub const DEVICE_ATTRIBUTE: Group = Group(0);
    pub const BINARY_INPUT: Group = Group(1);
    pub const BINARY_INPUT_EVENT: Group = Group(2);
    pub const BINARY_OUTPUT: Group = Group(10);
    pub const BINARY_OUTPUT_COMMAND: Group = Group(12);
    pub const COUNTER: Group = Group(20);
    pub const ANALOG_INPUT: Group = Group(30);
    pub const FROZEN_ANALOG_INPUT: Group = Group(31);
    pub const ANALOG_INPUT_EVENT: Group = Group(32);
    pub const ANALOG_INPUT_DEADBAND: Group = Group(34);
    pub const ANALOG_OUTPUT: Group = Group(40);
    pub const ANALOG_OUTPUT_BLOCK: Group = Group(41);
    pub const TIME: Group = Group(50);
    pub const TIME_DELAY: Group = Group(52);
    pub const CLASS_OBJECTS: Group = Group(60);
    pub const FILE_CONTROL: Group = Group(70);
    pub const INTERNAL_INDICATIONS: Group = Group(80);
    pub const VIRTUAL_TERMINAL_OUTPUT: Group = Group(112);
    pub const VIRTUAL_TERMINAL_EVENT: Group = Group(113);

    /// Virtual terminal objects carry neither variation nor qualifier.
    pub const fn is_virtual_terminal(&self) -> bool {
        matches!(self.0, 112 | 113)
    }
}

/// How an object's address range is encoded (qualifier low nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeCode {
    /// Start and stop point index.
    CountRange1,
    CountRange2,
    CountRange4,
    /// Start and stop address.
    AddressRange1,
    AddressRange2,
    AddressRange4,
    /// Every point of the object.
    NoRange,
    /// A point count.
    SingleValue1,
    SingleValue2,
    SingleValue4,
    FreeFormat,
}

/// Shape of the range field that follows an object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeLayout {
    /// Start then stop, each `width` bytes.
    StartStop { width: usize },
    /// A single count of `width` bytes.
    Count { width: usize },
    None,
}

impl RangeCode {
    pub const fn bits(&self) -> u8 {
        match self {
            RangeCode::CountRange1 => 0x00,
            RangeCode::CountRange2 => 0x01,
            RangeCode::CountRange4 => 0x02,
            RangeCode::AddressRange1 => 0x03,
            RangeCode::AddressRange2 => 0x04,
            RangeCode::AddressRange4 => 0x05,
            RangeCode::NoRange => 0x06,
            RangeCode::SingleValue1 => 0x07,
            RangeCode::SingleValue2 => 0x08,
            RangeCode::SingleValue4 => 0x09,
            RangeCode::FreeFormat => 0x0B,
        }
    }

    pub const fn layout(&self) -> RangeLayout {
        match self {
            RangeCode::CountRange1 | RangeCode::AddressRange1 => RangeLayout::StartStop { width: 1 },
            RangeCode::CountRange2 | RangeCode::AddressRange2 => RangeLayout::StartStop { width: 2 },
            RangeCode::CountRange4 | RangeCode::AddressRange4 => RangeLayout::StartStop { width: 4 },
            RangeCode::NoRange => RangeLayout::None,
            RangeCode::SingleValue1 | RangeCode::FreeFormat => RangeLayout::Count { width: 1 },
            RangeCode::SingleValue2 => RangeLayout::Count { width: 2 },
            RangeCode::SingleValue4 => RangeLayout::Count { width: 4 },
        }
    }
}

/// What precedes each point (qualifier high nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixCode {
    None,
    /// The point's index, in 1, 2 or 4 bytes.
    Index(u8),
    /// The point's byte length, in 1, 2 or 4 bytes.
    Size(u8),
}

impl PrefixCode {
    pub const fn width(&self) -> usize {
        match self {
            PrefixCode::None => 0,
            PrefixCode::Index(w) | PrefixCode::Size(w) => *w as usize,
        }
    }

    pub const fn bits(&self) -> u8 {
        match self {
            PrefixCode::None => 0x00,
            PrefixCode::Index(1) => 0x10,
            PrefixCode::Index(2) => 0x20,
            PrefixCode::Index(_) => 0x30,
            PrefixCode::Size(1) => 0x40,
            PrefixCode::Size(2) => 0x50,
            PrefixCode::Size(_) => 0x60,
        }
    }
}

/// A qualifier byte split into its prefix and range halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qualifier {
    pub prefix: PrefixCode,
    pub range: RangeCode,
}

impl Qualifier {
    pub const fn new(prefix: PrefixCode, range: RangeCode) -> Self {
        Self { prefix, range }
    }

    /// Qualifier used when an object's points are not given explicitly.
    pub const fn no_range() -> Self {
        Self::new(PrefixCode::None, RangeCode::NoRange)
    }

    pub const fn bits(&self) -> u8 {
        self.prefix.bits() | self.range.bits()
    }
}

impl TryFrom<u8> for Qualifier {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let prefix = match value >> 4 {
            0x0 => PrefixCode::None,
            0x1 => PrefixCode::Index(1),
            0x2 => PrefixCode::Index(2),
            0x3 => PrefixCode::Index(4),
            0x4 => PrefixCode::Size(1),
            0x5 => PrefixCode::Size(2),
            0x6 => PrefixCode::Size(4),
            _ => return Err(ProtocolError::InvalidQualifier(value)),
        };
        let range = match value & 0x0F {
            0x00 => RangeCode::CountRange1,
            0x01 => RangeCode::CountRange2,
            0x02 => RangeCode::CountRange4,
            0x03 => RangeCode::AddressRange1,
            0x04 => RangeCode::AddressRange2,
            0x05 => RangeCode::AddressRange4,
            0x06 => RangeCode::NoRange,
            0x07 => RangeCode::SingleValue1,
            0x08 => RangeCode::SingleValue2,
            0x09 => RangeCode::SingleValue4,
            0x0B => RangeCode::FreeFormat,
            _ => return Err(ProtocolError::InvalidQualifier(value)),
        };
        Ok(Self { prefix, range })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_constants() {
        assert_eq!(FRAGMENT_WIRE_MAX, 297);
        assert_eq!(MESSAGE_MAX, 1188);
        assert_eq!(USERDATA_MAX, 1012);
        assert_eq!(body_wire_len(0), 0);
        assert_eq!(body_wire_len(1), 3);
        assert_eq!(body_wire_len(16), 18);
        assert_eq!(body_wire_len(17), 21);
        assert_eq!(body_wire_len(MAX_FRAGMENT_DATA), 287);
    }

    #[test]
    fn test_data_control_presets() {
        assert_eq!(DataControl::master().bits(), 0xC4);
        assert_eq!(DataControl::outstation().bits(), 0x44);
        assert!(DataControl::master().from_master());
        assert!(!DataControl::outstation().from_master());
    }

    #[test]
    fn test_flag_set_operations() {
        let mut iin = InternalIndicators::new()
            .with(InternalIndicators::RESTART)
            .with(InternalIndicators::DEVICE_TROUBLE);
        assert_eq!(iin.bits(), 0x00C0);
        assert!(iin.contains(InternalIndicators::RESTART));

        iin.set(InternalIndicators::RESTART, false);
        assert!(!iin.contains(InternalIndicators::RESTART));
        assert_eq!(iin.names(), vec!["device_trouble"]);

        let iin = iin.without(InternalIndicators::DEVICE_TROUBLE);
        assert!(iin.is_empty());
    }

    #[test]
    fn test_sequence_fields_are_masked() {
        let th = TransportHeader::new()
            .with(TransportHeader::FIRST)
            .with_seq(65);
        assert_eq!(th.seq(), 1);
        assert!(th.is_first());
        assert!(!th.is_last());
        assert_eq!(th.bits(), 0x41);

        let app = AppControl::new()
            .with(AppControl::FIRST | AppControl::LAST)
            .with_seq(33);
        assert_eq!(app.seq(), 1);
        assert_eq!(app.bits(), 0xC1);
        assert!(!app.confirm_expected());
    }

    #[test]
    fn test_control_code_from_u8() {
        assert_eq!(ControlCode::from(1), ControlCode::Read);
        assert_eq!(ControlCode::from(129), ControlCode::Response);
        assert_eq!(ControlCode::from(9), ControlCode::FreezeAndClear);
        assert_eq!(ControlCode::from(20), ControlCode::Other(20));
        for code in 0..=u8::MAX {
            assert_eq!(ControlCode::from(code).code(), code);
        }

        assert!(ControlCode::Unsolicited.carries_indicators());
        assert!(!ControlCode::Read.carries_indicators());
        assert!(!ControlCode::Read.carries_point_data());
        assert!(ControlCode::Write.carries_point_data());
        assert!(!ControlCode::Other(20).is_response());
        assert_eq!(ControlCode::Select.code(), 3);
    }

    #[test]
    fn test_control_code_serde() {
        let json = serde_json::to_string(&ControlCode::DirectOperate).unwrap();
        assert_eq!(json, "\"DIRECT_OPERATE\"");
    }

    #[test]
    fn test_qualifier_table() {
        let q = Qualifier::try_from(0x28).unwrap();
        assert_eq!(q.prefix, PrefixCode::Index(2));
        assert_eq!(q.range, RangeCode::SingleValue2);
        assert_eq!(q.range.layout(), RangeLayout::Count { width: 2 });
        assert_eq!(q.bits(), 0x28);

        let q = Qualifier::try_from(0x06).unwrap();
        assert_eq!(q, Qualifier::no_range());
        assert_eq!(q.range.layout(), RangeLayout::None);

        let q = Qualifier::try_from(0x5B).unwrap();
        assert_eq!(q.prefix, PrefixCode::Size(2));
        assert_eq!(q.range, RangeCode::FreeFormat);

        for bits in [0x00u8, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0B] {
            for high in [0x00u8, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60] {
                let q = Qualifier::try_from(high | bits).unwrap();
                assert_eq!(q.bits(), high | bits);
            }
        }
    }

    #[test]
    fn test_qualifier_rejects_unknown_codes() {
        assert!(matches!(
            Qualifier::try_from(0x0A),
            Err(ProtocolError::InvalidQualifier(0x0A))
        ));
        assert!(matches!(
            Qualifier::try_from(0x0C),
            Err(ProtocolError::InvalidQualifier(0x0C))
        ));
        assert!(matches!(
            Qualifier::try_from(0x76),
            Err(ProtocolError::InvalidQualifier(0x76))
        ));
    }

    #[test]
    fn test_virtual_terminal_groups() {
        assert!(Group::VIRTUAL_TERMINAL_OUTPUT.is_virtual_terminal());
        assert!(Group::VIRTUAL_TERMINAL_EVENT.is_virtual_terminal());
        assert!(!Group::BINARY_INPUT.is_virtual_terminal());
    }
}
