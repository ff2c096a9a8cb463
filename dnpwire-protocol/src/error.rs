//! Protocol error types.

use crate::frame::InternalIndicators;
use thiserror::Error;

/// Errors raised while building a message or decoding its data objects.
///
/// Parser progress is not reported through this type: CRC failures are
/// recovered by resynchronising and show up as [`FeedStatus::Incomplete`].
///
/// [`FeedStatus::Incomplete`]: crate::parser::FeedStatus::Incomplete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("buffer too small: need {needed} bytes (capacity {capacity})")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("invalid qualifier: {0:#04x}")]
    InvalidQualifier(u8),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("unknown data object: group {group} variation {variation}")]
    UnknownObject { group: u8, variation: u8 },

    #[error("user data truncated at offset {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("unknown control code: {0}")]
    UnknownControlCode(u8),

    #[error("message is not complete")]
    NotComplete,
}

impl ProtocolError {
    /// Returns the internal indicator an outstation reports when a request
    /// fails to decode with this error.
    pub fn indicator(&self) -> InternalIndicators {
        match self {
            ProtocolError::UnknownObject { .. } => {
                InternalIndicators::new().with(InternalIndicators::OBJECT_UNKNOWN)
            }
            ProtocolError::InvalidQualifier(_)
            | ProtocolError::InvalidParam(_)
            | ProtocolError::Truncated { .. } => {
                InternalIndicators::new().with(InternalIndicators::OUT_OF_RANGE)
            }
            ProtocolError::UnknownControlCode(_) => {
                InternalIndicators::new().with(InternalIndicators::NOT_IMPLEMENTED)
            }
            ProtocolError::BufferTooSmall { .. } => {
                InternalIndicators::new().with(InternalIndicators::BUFFER_OVERFLOW)
            }
            ProtocolError::NotComplete => InternalIndicators::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_mapping() {
        let err = ProtocolError::UnknownObject {
            group: 99,
            variation: 1,
        };
        assert!(err.indicator().contains(InternalIndicators::OBJECT_UNKNOWN));

        let err = ProtocolError::InvalidQualifier(0x0C);
        assert!(err.indicator().contains(InternalIndicators::OUT_OF_RANGE));

        let err = ProtocolError::UnknownControlCode(0x42);
        assert!(err.indicator().contains(InternalIndicators::NOT_IMPLEMENTED));

        assert!(ProtocolError::NotComplete.indicator().is_empty());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::BufferTooSmall {
            needed: 1200,
            capacity: 1188,
        };
        let msg = err.to_string();
        assert!(msg.contains("1200"));
        assert!(msg.contains("1188"));

        // Qualifier uses hex format
        let err = ProtocolError::InvalidQualifier(0x0c);
        assert!(err.to_string().contains("0x0c"));

        let err = ProtocolError::UnknownObject {
            group: 70,
            variation: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("group 70"));
        assert!(msg.contains("variation 3"));

        let err = ProtocolError::Truncated {
            offset: 12,
            needed: 4,
        };
        assert!(err.to_string().contains("12"));
    }
}
