//! Socket configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SocketError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Label for log spans
    pub id: String,
    pub url: String,
    /// Per-command deadline; `None` waits until reply or teardown
    pub command_timeout_ms: Option<u64>,
    pub max_message_size: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            url: "ws://localhost:9222/devtools/browser".to_string(),
            command_timeout_ms: None,
            max_message_size: None,
        }
    }
}

impl SocketConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sub-millisecond remainders round up, so a non-zero timeout never becomes zero
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.command_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    /// Check the endpoint and limits before connecting
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(SocketError::Config(format!(
                    "unsupported scheme '{}', expected ws or wss",
                    other
                )))
            }
        }
        if self.command_timeout_ms == Some(0) {
            return Err(SocketError::Config(
                "command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_message_size == Some(0) {
            return Err(SocketError::Config(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        Ok(url)
    }
}
