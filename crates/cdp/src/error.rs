//! Error types for the socket and its connections
//!
//! Flat on purpose: callers match on the variant, not on a nested cause chain.

use serde_json::Value;
use thiserror::Error;

use crate::protocol::CommandId;

/// Result type for socket operations
pub type Result<T> = std::result::Result<T, SocketError>;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {code} - {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Command {id} ({method}) timed out")]
    Timeout { id: CommandId, method: String },

    #[error("Connection closed")]
    Closed,

    #[error("Command id {0} is already pending")]
    DuplicateId(CommandId),

    #[error("Socket is already listening")]
    AlreadyListening,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SocketError {
    /// Protocol error code, if the remote endpoint rejected the command
    pub fn code(&self) -> Option<i64> {
        match self {
            SocketError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for errors that mean the connection is gone for good
    pub fn is_closed(&self) -> bool {
        matches!(self, SocketError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = SocketError::Protocol {
            code: -32601,
            message: "'X.y' wasn't found".to_string(),
            data: None,
        };
        assert_eq!(err.to_string(), "Protocol error: -32601 - 'X.y' wasn't found");
        assert_eq!(err.code(), Some(-32601));
        assert!(!err.is_closed());
    }

    #[test]
    fn test_closed_has_no_code() {
        assert_eq!(SocketError::Closed.code(), None);
        assert!(SocketError::Closed.is_closed());
    }
}
