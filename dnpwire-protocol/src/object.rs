//! Walking a complete payload as data objects and points.

use crate::endian::{read_u32, Endian};
use crate::error::ProtocolError;
use crate::frame::{ControlCode, Group, PrefixCode, Qualifier, RangeCode, RangeLayout};
use crate::message::{Message, Phase};
use serde::{Serialize, Serializer};

/// Largest single point value, in bytes.
pub const MAX_POINT_DATA: usize = 64;

/// Size of one point of a (group, variation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSize {
    /// One bit per point, packed low bit first.
    Packed,
    /// Fixed width in bits. Zero for objects with no value (class polls).
    Fixed(u16),
    /// Device attribute: `[type, len]` then `len` bytes.
    Attribute,
    /// Virtual terminal: one byte per point.
    Octets,
    Unknown,
}

impl PointSize {
    pub fn lookup(group: Group, variation: u8) -> PointSize {
        let bytes: u16 = match (group.0, variation) {
            (1, 1) | (10, 1) | (80, 1) => return PointSize::Packed,
            (0, _) => return PointSize::Attribute,
            (112, _) | (113, _) => return PointSize::Octets,
            (60, 1..=4) => 0,
            (1, 2) | (10, 2) | (2, 1) => 1,
            (2, 2) => 7,
            (2, 3) => 3,
            (12, 1) | (12, 2) => 11,
            (20, 1) => 5,
            (20, 2) => 3,
            (20, 5) => 4,
            (20, 6) => 2,
            (30, 1) | (30, 5) => 5,
            (30, 2) => 3,
            (30, 3) => 4,
            (30, 4) => 2,
            (30, 6) => 9,
            (32, 1) => 5,
            (32, 2) => 3,
            (34, 1) => 2,
            (34, 2) | (34, 3) => 4,
            (40, 1) | (40, 3) | (41, 1) | (41, 3) => 5,
            (40, 2) | (41, 2) => 3,
            (50, 1) => 6,
            (52, 1) | (52, 2) => 2,
            _ => return PointSize::Unknown,
        };
        PointSize::Fixed(bytes * 8)
    }

    /// Width of one point in bits, when it is fixed.
    pub fn bits(&self) -> Option<u16> {
        match self {
            PointSize::Packed => Some(1),
            PointSize::Fixed(bits) => Some(*bits),
            PointSize::Octets => Some(8),
            PointSize::Attribute | PointSize::Unknown => None,
        }
    }
}

/// The object currently being read from a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataObject {
    pub group: Group,
    pub variation: u8,
    pub qualifier: Qualifier,
    pub address_start: u32,
    pub address_end: u32,
    pub point_count: u32,
    /// Width of the index or size prefix before each point.
    pub prefix_bytes: usize,
    pub point_size: PointSize,
    /// Payload offset of the first point.
    pub data_offset: usize,
    /// Bytes taken by all points, prefixes included.
    pub total_bytes: usize,
    pub current_point: u32,
}

impl DataObject {
    /// Payload offset just past this object.
    pub fn end(&self) -> usize {
        self.data_offset + self.total_bytes
    }
}

/// A point value copied out of the payload.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PointData {
    bytes: [u8; MAX_POINT_DATA],
    len: u8,
}

impl PointData {
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_POINT_DATA {
            return Err(ProtocolError::InvalidParam(format!(
                "point of {} bytes exceeds {MAX_POINT_DATA}",
                data.len()
            )));
        }
        let mut bytes = [0u8; MAX_POINT_DATA];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            bytes,
            len: data.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First four bytes (or fewer) as a little-endian integer.
    pub fn as_u32(&self) -> u32 {
        read_u32(&self.bytes, 0, self.len(), Endian::Little)
    }
}

impl std::fmt::Debug for PointData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_bytes()).finish()
    }
}

impl Serialize for PointData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.as_bytes())
    }
}

/// One point of a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataPoint {
    pub control: ControlCode,
    pub group: Group,
    pub variation: u8,
    pub address: u32,
    pub index_prefix: Option<u32>,
    pub data: PointData,
}

fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ProtocolError> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(&data[offset..end]),
        _ => Err(ProtocolError::Truncated {
            offset,
            needed: len.saturating_sub(data.len().saturating_sub(offset)),
        }),
    }
}

/// Checks that `total` bytes are available at `offset`.
fn span(data: &[u8], offset: usize, total: u64) -> Result<usize, ProtocolError> {
    let len = usize::try_from(total).unwrap_or(usize::MAX);
    take(data, offset, len).map(|_| len)
}

impl Message {
    /// Moves to the next data object, skipping any unread points of the
    /// current one. `Ok(None)` once the payload is exhausted.
    pub fn next_object(&mut self) -> Result<Option<DataObject>, ProtocolError> {
        let receiving = matches!(self.rx.phase, Phase::Header | Phase::Body | Phase::Corrupt)
            || (self.rx.phase == Phase::Seeking && self.rx.fragment_count > 0);
        if receiving {
            return Err(ProtocolError::NotComplete);
        }

        if let Some(prev) = self.object.take() {
            self.read_cursor = prev.end();
        }
        let data = &self.user_data[..];
        let mut pos = self.read_cursor;
        if pos >= data.len() {
            return Ok(None);
        }

        let group = Group(data[pos]);
        pos += 1;
        let (variation, qualifier) = if group.is_virtual_terminal() {
            (0, Qualifier::new(PrefixCode::None, RangeCode::SingleValue1))
        } else {
            let header = take(data, pos, 2)?;
            pos += 2;
            (header[0], Qualifier::try_from(header[1])?)
        };

        let (address_start, address_end, count) = match qualifier.range.layout() {
            RangeLayout::StartStop { width } => {
                let range = take(data, pos, 2 * width)?;
                pos += 2 * width;
                let start = read_u32(range, 0, width, Endian::Little);
                let stop = read_u32(range, width, width, Endian::Little);
                if stop < start {
                    return Err(ProtocolError::InvalidParam(format!(
                        "range stop {stop} before start {start}"
                    )));
                }
                (start, stop, u64::from(stop - start) + 1)
            }
            RangeLayout::Count { width } => {
                let count = read_u32(take(data, pos, width)?, 0, width, Endian::Little);
                pos += width;
                (0, count.saturating_sub(1), u64::from(count))
            }
            RangeLayout::None => (0, 0, 0),
        };

        let prefix_bytes = qualifier.prefix.width();
        let point_size = PointSize::lookup(group, variation);
        let total_bytes = if !self.control.carries_point_data() {
            span(data, pos, count.saturating_mul(prefix_bytes as u64))?
        } else {
            Self::measure_points(data, pos, group, variation, qualifier.prefix, point_size, count)?
        };

        let object = DataObject {
            group,
            variation,
            qualifier,
            address_start,
            address_end,
            point_count: u32::try_from(count).unwrap_or(u32::MAX),
            prefix_bytes,
            point_size,
            data_offset: pos,
            total_bytes,
            current_point: 0,
        };
        self.read_cursor = pos;
        self.object = Some(object.clone());
        Ok(Some(object))
    }

    /// Bytes taken by `count` points starting at `pos`, checked against the
    /// payload length.
    fn measure_points(
        data: &[u8],
        pos: usize,
        group: Group,
        variation: u8,
        prefix: PrefixCode,
        size: PointSize,
        count: u64,
    ) -> Result<usize, ProtocolError> {
        match (prefix, size) {
            (PrefixCode::Size(width), _) => {
                let width = usize::from(width);
                let mut cursor = pos;
                for _ in 0..count {
                    let len = read_u32(take(data, cursor, width)?, 0, width, Endian::Little);
                    cursor += width;
                    take(data, cursor, len as usize)?;
                    cursor += len as usize;
                }
                Ok(cursor - pos)
            }
            (PrefixCode::Index(_), PointSize::Packed) => Err(ProtocolError::InvalidParam(
                "packed points cannot carry index prefixes".to_string(),
            )),
            (PrefixCode::None, PointSize::Packed) => span(data, pos, count.div_ceil(8)),
            (_, PointSize::Fixed(bits)) => {
                let per_point = prefix.width() as u64 + u64::from(bits / 8);
                span(data, pos, count.saturating_mul(per_point))
            }
            (_, PointSize::Octets) => {
                span(data, pos, count.saturating_mul(prefix.width() as u64 + 1))
            }
            (_, PointSize::Attribute) => {
                let mut cursor = pos;
                for _ in 0..count {
                    cursor += prefix.width();
                    let header = take(data, cursor, 2)?;
                    let len = usize::from(header[1]);
                    take(data, cursor + 2, len)?;
                    cursor += 2 + len;
                }
                Ok(cursor - pos)
            }
            (_, PointSize::Unknown) => Err(ProtocolError::UnknownObject {
                group: group.0,
                variation,
            }),
        }
    }

    /// Reads the next point of the current object. `Ok(None)` when the
    /// object has no more points or carries no values at all: Read and
    /// FreezeAndClear requests, and class objects.
    pub fn next_value(&mut self) -> Result<Option<DataPoint>, ProtocolError> {
        let Some(object) = self.object.as_mut() else {
            return Ok(None);
        };
        if !self.control.carries_point_data() || object.current_point >= object.point_count {
            return Ok(None);
        }
        // Zero-width points without prefixes occupy no bytes and have no value.
        if object.point_size == PointSize::Fixed(0) && object.qualifier.prefix == PrefixCode::None
        {
            return Ok(None);
        }

        let data = &self.user_data[..];
        let mut pos = self.read_cursor;
        let point = object.current_point;

        let mut index_prefix = None;
        let mut sized = None;
        match object.qualifier.prefix {
            PrefixCode::None => {}
            PrefixCode::Index(width) => {
                let width = usize::from(width);
                index_prefix = Some(read_u32(take(data, pos, width)?, 0, width, Endian::Little));
                pos += width;
            }
            PrefixCode::Size(width) => {
                let width = usize::from(width);
                sized = Some(read_u32(take(data, pos, width)?, 0, width, Endian::Little) as usize);
                pos += width;
            }
        }

        let value = match (sized, object.point_size) {
            (Some(len), _) => {
                let value = PointData::from_slice(take(data, pos, len)?)?;
                pos += len;
                value
            }
            (None, PointSize::Packed) => {
                let byte = take(data, object.data_offset + (point / 8) as usize, 1)?[0];
                let bit = (byte >> (point % 8)) & 1;
                pos = object.data_offset + (point as usize + 1).div_ceil(8);
                PointData::from_slice(&[bit])?
            }
            (None, PointSize::Fixed(bits)) => {
                let len = usize::from(bits / 8);
                let value = PointData::from_slice(take(data, pos, len)?)?;
                pos += len;
                value
            }
            (None, PointSize::Octets) => {
                let value = PointData::from_slice(take(data, pos, 1)?)?;
                pos += 1;
                value
            }
            (None, PointSize::Attribute) => {
                let len = 2 + usize::from(take(data, pos, 2)?[1]);
                let value = PointData::from_slice(take(data, pos, len)?)?;
                pos += len;
                value
            }
            (None, PointSize::Unknown) => {
                return Err(ProtocolError::UnknownObject {
                    group: object.group.0,
                    variation: object.variation,
                })
            }
        };

        let address = index_prefix.unwrap_or_else(|| object.address_start.wrapping_add(point));
        object.current_point += 1;
        self.read_cursor = pos;

        Ok(Some(DataPoint {
            control: self.control,
            group: object.group,
            variation: object.variation,
            address,
            index_prefix,
            data: value,
        }))
    }

    /// Reads every remaining object with its points.
    pub fn decode_objects(&mut self) -> Result<Vec<(DataObject, Vec<DataPoint>)>, ProtocolError> {
        let mut objects = Vec::new();
        while let Some(object) = self.next_object()? {
            let mut points = Vec::new();
            while let Some(point) = self.next_value()? {
                points.push(point);
            }
            objects.push((object, points));
        }
        Ok(objects)
    }

    /// The object most recently returned by [`Message::next_object`].
    pub fn current_object(&self) -> Option<&DataObject> {
        self.object.as_ref()
    }

    /// Rewinds the object iterator to the start of the payload.
    pub fn rewind(&mut self) {
        self.read_cursor = 0;
        self.object = None;
    }
}
