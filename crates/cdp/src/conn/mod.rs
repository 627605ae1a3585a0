//! Message Connections
//!
//! The socket only needs whole messages in and out. Framing, TLS and the
//! handshake live behind this trait.

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConn, MemoryPeer};
pub use websocket::WsConn;

/// Full-duplex message channel
///
/// `send` and `recv` are called concurrently from different tasks. `recv`
/// has exactly one caller at a time (the receive loop) and must be
/// cancel-safe: dropping an in-progress `recv` must not lose a message.
#[async_trait]
pub trait MessageConn: Send + Sync {
    /// Write one message. Concurrent writes must not interleave.
    async fn send(&self, text: String) -> Result<()>;

    /// Read the next message. Any error is terminal for the connection.
    async fn recv(&self) -> Result<String>;

    /// Close the connection; a blocked `recv` must return an error.
    async fn close(&self) -> Result<()>;
}
