//! Link error types.

use thiserror::Error;

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] dnpwire_protocol::ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("response timeout")]
    Timeout,

    #[error("peer sent a message larger than the codec can hold")]
    Corrupt,

    #[error("gave up after discarding {discarded} bytes without a valid message")]
    ResyncLimit { discarded: u64 },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl LinkError {
    /// Returns whether retrying the exchange may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Io(_) | LinkError::Timeout | LinkError::ResyncLimit { .. }
        )
    }
}
