//! Helpers that append encoded data objects to a message's payload.
//!
//! Every helper checks the remaining capacity up front, so a failed call
//! leaves the payload untouched.

use crate::error::ProtocolError;
use crate::frame::{Group, PrefixCode, Qualifier, RangeCode, USERDATA_MAX};
use crate::message::Message;
use crate::object::{DataPoint, PointSize, MAX_POINT_DATA};
use serde::{Deserialize, Serialize};

/// Operation requested by a control relay output block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CrobCode {
    Nul = 0x00,
    PulseOn = 0x01,
    PulseOff = 0x02,
    LatchOn = 0x03,
    LatchOff = 0x04,
    Close = 0x40,
    Trip = 0x80,
}

impl TryFrom<u8> for CrobCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CrobCode::Nul),
            0x01 => Ok(CrobCode::PulseOn),
            0x02 => Ok(CrobCode::PulseOff),
            0x03 => Ok(CrobCode::LatchOn),
            0x04 => Ok(CrobCode::LatchOff),
            0x40 => Ok(CrobCode::Close),
            0x80 => Ok(CrobCode::Trip),
            other => Err(ProtocolError::InvalidParam(format!(
                "unknown relay control code {other:#04x}"
            ))),
        }
    }
}

/// Control relay output block (group 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crob {
    pub code: CrobCode,
    pub count: u8,
    pub on_time_ms: u32,
    pub off_time_ms: u32,
    pub status: u8,
}

impl Crob {
    pub const SIZE: usize = 11;

    pub const STATUS_SUCCESS: u8 = 0;
    pub const STATUS_TIMEOUT: u8 = 1;
    pub const STATUS_NO_SELECT: u8 = 2;
    pub const STATUS_FORMAT_ERROR: u8 = 3;
    pub const STATUS_NOT_SUPPORTED: u8 = 4;

    pub fn new(code: CrobCode) -> Self {
        Self {
            code,
            count: 1,
            on_time_ms: 0,
            off_time_ms: 0,
            status: Self::STATUS_SUCCESS,
        }
    }

    pub fn pulse_on(on_time_ms: u32, off_time_ms: u32) -> Self {
        Self {
            on_time_ms,
            off_time_ms,
            ..Self::new(CrobCode::PulseOn)
        }
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.code as u8;
        out[1] = self.count;
        out[2..6].copy_from_slice(&self.on_time_ms.to_le_bytes());
        out[6..10].copy_from_slice(&self.off_time_ms.to_le_bytes());
        out[10] = self.status;
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: &[u8; Self::SIZE] = bytes.try_into().map_err(|_| {
            ProtocolError::InvalidParam(format!(
                "relay output block needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self {
            code: CrobCode::try_from(bytes[0])?,
            count: bytes[1],
            on_time_ms: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            off_time_ms: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            status: bytes[10],
        })
    }

    /// Decodes the block carried by a group 12 point.
    pub fn from_point(point: &DataPoint) -> Result<Self, ProtocolError> {
        if point.group != Group::BINARY_OUTPUT_COMMAND {
            return Err(ProtocolError::InvalidParam(format!(
                "group {} is not a relay output block",
                point.group.0
            )));
        }
        Self::decode(point.data.as_bytes())
    }
}

/// Device attribute value type for visible strings.
const ATTRIBUTE_STRING: u8 = 1;

impl Message {
    fn ensure_room(&self, needed: usize) -> Result<(), ProtocolError> {
        let needed = self.user_data.len() + needed;
        if needed > USERDATA_MAX {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                capacity: USERDATA_MAX,
            });
        }
        Ok(())
    }

    fn start_stop(start: u16, count: usize) -> Result<(u16, u16), ProtocolError> {
        if count == 0 {
            return Err(ProtocolError::InvalidParam("object has no points".to_string()));
        }
        let stop = usize::from(start) + count - 1;
        let stop = u16::try_from(stop).map_err(|_| {
            ProtocolError::InvalidParam(format!("{count} points from {start} overflow the index"))
        })?;
        Ok((start, stop))
    }

    fn push_range_header(
        &mut self,
        group: Group,
        variation: u8,
        start: u16,
        stop: u16,
    ) -> Result<(), ProtocolError> {
        let [s0, s1] = start.to_le_bytes();
        let [e0, e1] = stop.to_le_bytes();
        let qualifier = Qualifier::new(PrefixCode::None, RangeCode::CountRange2).bits();
        self.push_bytes(&[group.0, variation, qualifier, s0, s1, e0, e1])
    }

    /// Requests points of one object, either `start..=stop` or all of them.
    pub fn add_read_request(
        &mut self,
        group: Group,
        variation: u8,
        range: Option<(u16, u16)>,
    ) -> Result<(), ProtocolError> {
        match range {
            Some((start, stop)) => {
                if stop < start {
                    return Err(ProtocolError::InvalidParam(format!(
                        "range stop {stop} before start {start}"
                    )));
                }
                self.ensure_room(7)?;
                self.push_range_header(group, variation, start, stop)
            }
            None => {
                self.ensure_room(3)?;
                self.push_bytes(&[group.0, variation, Qualifier::no_range().bits()])
            }
        }
    }

    /// Requests event data of class 1-3, or all static data for class 0.
    pub fn add_class_request(&mut self, class: u8) -> Result<(), ProtocolError> {
        if class > 3 {
            return Err(ProtocolError::InvalidParam(format!("no data class {class}")));
        }
        self.add_read_request(Group::CLASS_OBJECTS, class + 1, None)
    }

    /// Appends one relay output block addressed to `index`.
    pub fn add_crob(&mut self, variation: u8, index: u16, crob: &Crob) -> Result<(), ProtocolError> {
        if !matches!(variation, 1 | 2) {
            return Err(ProtocolError::UnknownObject {
                group: Group::BINARY_OUTPUT_COMMAND.0,
                variation,
            });
        }
        let qualifier = Qualifier::new(PrefixCode::Index(2), RangeCode::SingleValue2).bits();
        let [i0, i1] = index.to_le_bytes();
        self.ensure_room(7 + Crob::SIZE)?;
        self.push_bytes(&[Group::BINARY_OUTPUT_COMMAND.0, variation, qualifier, 1, 0, i0, i1])?;
        self.push_bytes(&crob.encode())
    }

    /// Appends binary input or output states starting at `start`.
    ///
    /// Variation 1 packs one bit per state (any non-zero byte is on).
    /// Variation 2 writes each byte as the point's flags, optionally with a
    /// two-byte index before each point.
    pub fn add_binary_states(
        &mut self,
        group: Group,
        variation: u8,
        start: u16,
        states: &[u8],
        with_prefix: bool,
    ) -> Result<(), ProtocolError> {
        if group != Group::BINARY_INPUT && group != Group::BINARY_OUTPUT {
            return Err(ProtocolError::InvalidParam(format!(
                "group {} does not hold binary states",
                group.0
            )));
        }
        let (start, stop) = Self::start_stop(start, states.len())?;

        match (variation, with_prefix) {
            (1, false) => {
                let packed_len = states.len().div_ceil(8);
                self.ensure_room(7 + packed_len)?;
                self.push_range_header(group, 1, start, stop)?;
                for group_of_eight in states.chunks(8) {
                    let mut bits = 0u8;
                    for (bit, state) in group_of_eight.iter().enumerate() {
                        if *state != 0 {
                            bits |= 1 << bit;
                        }
                    }
                    self.push_byte(bits)?;
                }
                Ok(())
            }
            (1, true) => Err(ProtocolError::InvalidParam(
                "packed states cannot carry index prefixes".to_string(),
            )),
            (2, false) => {
                self.ensure_room(7 + states.len())?;
                self.push_range_header(group, 2, start, stop)?;
                self.push_bytes(states)
            }
            (2, true) => {
                let count = u16::try_from(states.len()).map_err(|_| {
                    ProtocolError::InvalidParam("too many prefixed points".to_string())
                })?;
                self.ensure_room(5 + states.len() * 3)?;
                let qualifier = Qualifier::new(PrefixCode::Index(2), RangeCode::SingleValue2).bits();
                let [c0, c1] = count.to_le_bytes();
                self.push_bytes(&[group.0, 2, qualifier, c0, c1])?;
                for (offset, &state) in states.iter().enumerate() {
                    let [i0, i1] = (start + offset as u16).to_le_bytes();
                    self.push_bytes(&[i0, i1, state])?;
                }
                Ok(())
            }
            _ => Err(ProtocolError::UnknownObject {
                group: group.0,
                variation,
            }),
        }
    }

    /// Appends fixed-size points `start..` of one object.
    pub fn add_points(
        &mut self,
        group: Group,
        variation: u8,
        start: u16,
        points: &[&[u8]],
    ) -> Result<(), ProtocolError> {
        let width = match PointSize::lookup(group, variation) {
            PointSize::Fixed(bits) if bits > 0 => usize::from(bits / 8),
            _ => {
                return Err(ProtocolError::UnknownObject {
                    group: group.0,
                    variation,
                })
            }
        };
        if let Some(bad) = points.iter().find(|p| p.len() != width) {
            return Err(ProtocolError::InvalidParam(format!(
                "group {} variation {variation} points are {width} bytes, got {}",
                group.0,
                bad.len()
            )));
        }
        let (start, stop) = Self::start_stop(start, points.len())?;
        self.ensure_room(7 + points.len() * width)?;
        self.push_range_header(group, variation, start, stop)?;
        for point in points {
            self.push_bytes(point)?;
        }
        Ok(())
    }

    /// Asks for one device attribute.
    pub fn add_device_attribute_request(&mut self, variation: u8) -> Result<(), ProtocolError> {
        let qualifier = Qualifier::new(PrefixCode::None, RangeCode::CountRange1).bits();
        self.ensure_room(5)?;
        self.push_bytes(&[Group::DEVICE_ATTRIBUTE.0, variation, qualifier, 0, 0])
    }

    /// Appends a string-valued device attribute, indexed by its variation.
    pub fn add_device_attribute_value(
        &mut self,
        variation: u8,
        value: &str,
    ) -> Result<(), ProtocolError> {
        let bytes = value.as_bytes();
        if bytes.len() + 2 > MAX_POINT_DATA {
            return Err(ProtocolError::InvalidParam(format!(
                "attribute of {} bytes is too long",
                bytes.len()
            )));
        }
        let qualifier = Qualifier::new(PrefixCode::Index(1), RangeCode::SingleValue1).bits();
        self.ensure_room(7 + bytes.len())?;
        self.push_bytes(&[
            Group::DEVICE_ATTRIBUTE.0,
            variation,
            qualifier,
            1,
            variation,
            ATTRIBUTE_STRING,
            bytes.len() as u8,
        ])?;
        self.push_bytes(bytes)
    }

    /// Appends virtual terminal octets.
    pub fn add_virtual_terminal(&mut self, group: Group, data: &[u8]) -> Result<(), ProtocolError> {
        if !group.is_virtual_terminal() {
            return Err(ProtocolError::InvalidParam(format!(
                "group {} is not a virtual terminal",
                group.0
            )));
        }
        let len = u8::try_from(data.len()).map_err(|_| {
            ProtocolError::InvalidParam(format!("{} terminal bytes exceed 255", data.len()))
        })?;
        self.ensure_room(2 + data.len())?;
        self.push_bytes(&[group.0, len])?;
        self.push_bytes(data)
    }

    /// Appends an absolute time (group 50 variation 1), milliseconds since
    /// the Unix epoch in 48 bits.
    pub fn add_time(&mut self, epoch_ms: u64) -> Result<(), ProtocolError> {
        let qualifier = Qualifier::new(PrefixCode::None, RangeCode::SingleValue1).bits();
        let time = epoch_ms.to_le_bytes();
        self.ensure_room(10)?;
        self.push_bytes(&[Group::TIME.0, 1, qualifier, 1])?;
        self.push_bytes(&time[..6])
    }

    /// Appends a fine time delay (group 52 variation 2).
    pub fn add_time_delay(&mut self, delay_ms: u16) -> Result<(), ProtocolError> {
        let qualifier = Qualifier::new(PrefixCode::None, RangeCode::SingleValue1).bits();
        let [d0, d1] = delay_ms.to_le_bytes();
        self.ensure_room(6)?;
        self.push_bytes(&[Group::TIME_DELAY.0, 2, qualifier, 1, d0, d1])
    }

    /// Clears internal indication `bit` (group 80 variation 1), e.g. 7 for
    /// the restart indication.
    pub fn add_indication_clear(&mut self, bit: u8) -> Result<(), ProtocolError> {
        let qualifier = Qualifier::new(PrefixCode::None, RangeCode::CountRange1).bits();
        self.ensure_room(6)?;
        self.push_bytes(&[Group::INTERNAL_INDICATIONS.0, 1, qualifier, bit, bit, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ControlCode;

    #[test]
    fn test_add_read_request() {
        let mut msg = Message::request(1, 1024, ControlCode::Read);
        msg.add_read_request(Group::BINARY_INPUT, 2, None).unwrap();
        msg.add_read_request(Group::ANALOG_INPUT, 3, Some((0, 9))).unwrap();
        assert_eq!(msg.user_data(), &[1, 2, 0x06, 30, 3, 0x01, 0, 0, 9, 0]);

        let err = msg.add_read_request(Group::ANALOG_INPUT, 3, Some((5, 1)));
        assert!(matches!(err, Err(ProtocolError::InvalidParam(_))));
    }

    #[test]
    fn test_add_class_request() {
        let mut msg = Message::request(1, 1024, ControlCode::Read);
        msg.add_class_request(1).unwrap();
        msg.add_class_request(0).unwrap();
        assert_eq!(msg.user_data(), &[60, 2, 0x06, 60, 1, 0x06]);
        assert!(msg.add_class_request(4).is_err());
    }

    #[test]
    fn test_crob_round_trip_through_parser() {
        let crob = Crob::pulse_on(250, 750);
        let mut tx = Message::request(1, 1024, ControlCode::DirectOperate);
        tx.add_crob(1, 3, &crob).unwrap();
        assert_eq!(tx.user_data().len(), 7 + Crob::SIZE);
        tx.build().unwrap();

        let mut rx = Message::new();
        rx.feed(tx.wire());
        let obj = rx.next_object().unwrap().unwrap();
        assert_eq!(obj.group, Group::BINARY_OUTPUT_COMMAND);
        assert_eq!(obj.qualifier.bits(), 0x28);
        let point = rx.next_value().unwrap().unwrap();
        assert_eq!(point.address, 3);
        assert_eq!(Crob::from_point(&point).unwrap(), crob);
    }

    #[test]
    fn test_crob_decode_errors() {
        assert!(Crob::decode(&[0x03; 10]).is_err());
        let mut bytes = Crob::new(CrobCode::LatchOn).encode();
        bytes[0] = 0x05;
        assert!(Crob::decode(&bytes).is_err());
    }

    #[test]
    fn test_add_crob_rejects_variation() {
        let mut msg = Message::request(1, 1024, ControlCode::Select);
        let err = msg.add_crob(3, 0, &Crob::new(CrobCode::Trip)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownObject { group: 12, variation: 3 }));
        assert!(msg.user_data().is_empty());
    }

    #[test]
    fn test_binary_states_packed() {
        let mut msg = Message::request(1024, 1, ControlCode::Response);
        msg.add_binary_states(Group::BINARY_INPUT, 1, 0, &[1, 0, 1, 0, 0, 0, 0, 0, 1], false)
            .unwrap();
        assert_eq!(msg.user_data(), &[1, 1, 0x01, 0, 0, 8, 0, 0b0000_0101, 0b0000_0001]);

        let obj = msg.next_object().unwrap().unwrap();
        assert_eq!(obj.point_count, 9);
        let states: Vec<u8> = std::iter::from_fn(|| msg.next_value().unwrap())
            .map(|p| p.data.as_bytes()[0])
            .collect();
        assert_eq!(states, vec![1, 0, 1, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_binary_states_with_prefix() {
        let mut msg = Message::request(1024, 1, ControlCode::Response);
        msg.add_binary_states(Group::BINARY_OUTPUT, 2, 4, &[0x81, 0x01], true)
            .unwrap();
        assert_eq!(msg.user_data(), &[10, 2, 0x28, 2, 0, 4, 0, 0x81, 5, 0, 0x01]);

        let obj = msg.next_object().unwrap().unwrap();
        assert_eq!(obj.prefix_bytes, 2);
        let p = msg.next_value().unwrap().unwrap();
        assert_eq!((p.address, p.data.as_bytes()[0]), (4, 0x81));
        let p = msg.next_value().unwrap().unwrap();
        assert_eq!((p.address, p.data.as_bytes()[0]), (5, 0x01));

        assert!(msg
            .add_binary_states(Group::COUNTER, 2, 0, &[1], false)
            .is_err());
        assert!(msg
            .add_binary_states(Group::BINARY_INPUT, 1, 0, &[1], true)
            .is_err());
        assert!(msg
            .add_binary_states(Group::BINARY_INPUT, 2, 0, &[], false)
            .is_err());
    }

    #[test]
    fn test_add_points() {
        let mut msg = Message::request(1024, 1, ControlCode::Response);
        let a = 7u32.to_le_bytes();
        let b = 9u32.to_le_bytes();
        msg.add_points(Group::COUNTER, 5, 2, &[&a, &b]).unwrap();

        let obj = msg.next_object().unwrap().unwrap();
        assert_eq!((obj.address_start, obj.address_end), (2, 3));
        let values: Vec<(u32, u32)> = std::iter::from_fn(|| msg.next_value().unwrap())
            .map(|p| (p.address, p.data.as_u32()))
            .collect();
        assert_eq!(values, vec![(2, 7), (3, 9)]);

        assert!(matches!(
            msg.add_points(Group::COUNTER, 5, 0, &[&[1, 2]]),
            Err(ProtocolError::InvalidParam(_))
        ));
        assert!(matches!(
            msg.add_points(Group::CLASS_OBJECTS, 1, 0, &[&[]]),
            Err(ProtocolError::UnknownObject { .. })
        ));
    }

    #[test]
    fn test_device_attributes() {
        let mut req = Message::request(1, 1024, ControlCode::Read);
        req.add_device_attribute_request(250).unwrap();
        assert_eq!(req.user_data(), &[0, 250, 0x00, 0, 0]);

        let mut resp = Message::request(1024, 1, ControlCode::Response);
        resp.add_device_attribute_value(250, "dnpwire").unwrap();
        let obj = resp.next_object().unwrap().unwrap();
        assert_eq!(obj.point_size, PointSize::Attribute);
        let p = resp.next_value().unwrap().unwrap();
        assert_eq!(p.index_prefix, Some(250));
        assert_eq!(&p.data.as_bytes()[2..], b"dnpwire");
        assert_eq!(p.data.as_bytes()[1], 7);

        let long = "x".repeat(MAX_POINT_DATA);
        assert!(resp.add_device_attribute_value(250, &long).is_err());
    }

    #[test]
    fn test_virtual_terminal() {
        let mut msg = Message::request(1, 1024, ControlCode::Write);
        msg.add_virtual_terminal(Group::VIRTUAL_TERMINAL_OUTPUT, b"hi").unwrap();
        assert_eq!(msg.user_data(), &[112, 2, b'h', b'i']);
        assert!(msg.add_virtual_terminal(Group::COUNTER, b"x").is_err());
    }

    #[test]
    fn test_time_objects() {
        let mut msg = Message::request(1024, 1, ControlCode::Response);
        msg.add_time(0x0102_0304_0506).unwrap();
        msg.add_time_delay(500).unwrap();
        assert_eq!(
            msg.user_data(),
            &[50, 1, 0x07, 1, 6, 5, 4, 3, 2, 1, 52, 2, 0x07, 1, 0xF4, 0x01]
        );

        let obj = msg.next_object().unwrap().unwrap();
        assert_eq!(obj.total_bytes, 6);
        let obj = msg.next_object().unwrap().unwrap();
        assert_eq!(obj.group, Group::TIME_DELAY);
        assert_eq!(msg.next_value().unwrap().unwrap().data.as_u32(), 500);
    }

    #[test]
    fn test_indication_clear() {
        let mut msg = Message::request(1, 1024, ControlCode::Write);
        msg.add_indication_clear(7).unwrap();
        let obj = msg.next_object().unwrap().unwrap();
        assert_eq!((obj.address_start, obj.point_count), (7, 1));
        let p = msg.next_value().unwrap().unwrap();
        assert_eq!((p.address, p.data.as_bytes()[0]), (7, 0));
    }

    #[test]
    fn test_helpers_leave_payload_untouched_when_full() {
        let mut msg = Message::request(1, 1024, ControlCode::Write);
        msg.push_bytes(&vec![0u8; USERDATA_MAX - 5]).unwrap();
        let err = msg.add_crob(1, 0, &Crob::new(CrobCode::LatchOn)).unwrap_err();
        assert!(matches!(err, ProtocolError::BufferTooSmall { .. }));
        assert_eq!(msg.user_data().len(), USERDATA_MAX - 5);
    }
}
