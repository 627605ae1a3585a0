//! DevTools Protocol Socket
//!
//! One JSON message connection, many concurrent callers. Commands are
//! correlated with their replies by id; unsolicited events are fanned out by
//! name to every subscriber.
//!
//! # Architecture
//!
//! 1. **Data structures first**: two registries (pending commands, event
//!    subscribers) owned by one [`Socket`], never global
//! 2. **One reader**: a single receive loop classifies and routes every message
//! 3. **No hangs**: teardown fails every outstanding command with a terminal error
//! 4. **Transport-agnostic**: anything implementing [`MessageConn`] can carry it
//!
//! ```text
//! caller ── send_command ──► PendingCommands ──► MessageConn ──► remote
//!    ▲                             │                                │
//!    └──── PendingReply ◄── take(id) ◄── receive loop ◄─────────────┘
//!                                          │
//!                                          └──► EventRegistry ──► handlers
//! ```

pub mod command;
pub mod config;
pub mod conn;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod socket;

pub use command::{Command, PendingReply};
pub use config::SocketConfig;
pub use conn::{MessageConn, WsConn};
pub use error::{Result, SocketError};
pub use protocol::{CommandId, Event, SessionId};
pub use registry::{EventCallback, HandlerId};
pub use session::Session;
pub use socket::{Socket, SocketState};
