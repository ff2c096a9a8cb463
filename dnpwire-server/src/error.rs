//! Server error types.

use dnpwire_link::LinkError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] dnpwire_protocol::ProtocolError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("response write timed out")]
    ResponseTimeout,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the connection ended the way connections normally end.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ServerError::Link(LinkError::ConnectionClosed | LinkError::Timeout)
                | ServerError::ShuttingDown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(ServerError::Link(LinkError::ConnectionClosed).is_disconnect());
        assert!(ServerError::Link(LinkError::Timeout).is_disconnect());
        assert!(ServerError::ShuttingDown.is_disconnect());
        assert!(!ServerError::Link(LinkError::Corrupt).is_disconnect());
        assert!(!ServerError::ResponseTimeout.is_disconnect());
    }
}
