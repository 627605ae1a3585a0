//! Correlation Registries
//!
//! Two independent maps, each behind its own locking. No code path holds
//! both at once.

pub mod events;
pub mod pending;

pub use events::{EventCallback, EventRegistry, HandlerId, Subscriber};
pub use pending::PendingCommands;
