//! Wire Types
//!
//! The envelope is deliberately protocol-agnostic: an optional id, an optional
//! method, and whichever of params/result/error the remote end filled in.
//! Domain payloads stay as `serde_json::Value` until a binding deserializes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SocketError;

/// Command ID - monotonically increasing per socket
pub type CommandId = u64;

/// Session ID for flat-mode target sessions
pub type SessionId = String;

/// Outbound command frame
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub id: CommandId,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// Error object carried by a failed reply
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<ProtocolError> for SocketError {
    fn from(err: ProtocolError) -> Self {
        SocketError::Protocol {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Every inbound frame, before it is classified as reply or event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<CommandId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolError>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl Envelope {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Best-effort id of a frame that failed to parse as a full envelope
    pub fn salvage_id(text: &str) -> Option<CommandId> {
        #[derive(Deserialize)]
        struct IdOnly {
            #[serde(default)]
            id: Option<CommandId>,
        }
        serde_json::from_str::<IdOnly>(text).ok()?.id
    }

    /// The reply outcome. An error object wins over any result.
    pub fn into_outcome(self) -> Result<Value, SocketError> {
        match self.error {
            Some(error) => Err(error.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Convert to an event if the frame names a method
    pub fn into_event(self) -> Option<Event> {
        let method = self.method?;
        Some(Event {
            method,
            params: self.params.unwrap_or(Value::Null),
            session_id: self.session_id,
        })
    }
}

/// Unsolicited event pushed by the remote endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub method: String,
    pub params: Value,
    pub session_id: Option<SessionId>,
}
