//! Command Lifecycle
//!
//! A command is split in two at submission:
//! - [`Command`] is the in-flight half. The pending registry owns it until a
//!   reply or teardown takes it out and calls [`Command::resolve`].
//! - [`Completion`] is the caller half, a one-shot receiver for the outcome.
//!
//! `resolve` consumes the command, so a second resolution cannot be written.
//! A command dropped without being resolved still signals its caller with
//! [`SocketError::Closed`].

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{Result, SocketError};
use crate::protocol::{CommandId, Request, SessionId};
use crate::registry::PendingCommands;

/// What a caller eventually receives: the raw result or a terminal error
pub type CommandOutcome = Result<Value>;

/// Monotonic command id allocator, one per socket
#[derive(Debug)]
pub struct IdSource {
    next: AtomicU64,
}

impl IdSource {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> CommandId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight command state
#[derive(Debug)]
pub struct Command {
    id: CommandId,
    method: String,
    params: Option<Value>,
    session_id: Option<SessionId>,
    tx: Option<oneshot::Sender<CommandOutcome>>,
}

impl Command {
    /// Allocate the next id and build a command that has not been sent yet
    pub fn submit(
        ids: &IdSource,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> (Self, Completion) {
        let id = ids.next_id();
        let (tx, rx) = oneshot::channel();
        let command = Self {
            id,
            method: method.into(),
            params,
            session_id,
            tx: Some(tx),
        };
        (command, Completion { id, rx })
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Serialized wire frame for this command
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Request {
            id: self.id,
            method: &self.method,
            params: self.params.as_ref(),
            session_id: self.session_id.as_deref(),
        })
    }

    /// Deliver the outcome to the waiting caller
    pub fn resolve(mut self, outcome: CommandOutcome) {
        if let Some(tx) = self.tx.take() {
            if tx.send(outcome).is_err() {
                tracing::debug!("Caller for command {} ({}) went away", self.id, self.method);
            }
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(
                "Command {} ({}) dropped unresolved, failing it",
                self.id,
                self.method
            );
            let _ = tx.send(Err(SocketError::Closed));
        }
    }
}

/// Caller half of a command
#[derive(Debug)]
pub struct Completion {
    id: CommandId,
    rx: oneshot::Receiver<CommandOutcome>,
}

impl Completion {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wait until the command is resolved
    pub async fn wait(self) -> CommandOutcome {
        self.rx.await.unwrap_or(Err(SocketError::Closed))
    }
}

/// Handle returned by `Socket::send_command`
///
/// Awaiting it (directly or through [`PendingReply::wait`]) yields the reply.
/// With a deadline set, an expired wait removes the command from the
/// registry before failing it, so a late reply finds nothing to resolve.
#[derive(Debug)]
pub struct PendingReply {
    completion: Completion,
    method: String,
    deadline: Option<Duration>,
    pending: Arc<PendingCommands>,
}

impl PendingReply {
    pub(crate) fn new(
        completion: Completion,
        method: String,
        deadline: Option<Duration>,
        pending: Arc<PendingCommands>,
    ) -> Self {
        Self {
            completion,
            method,
            deadline,
            pending,
        }
    }

    pub fn id(&self) -> CommandId {
        self.completion.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Override the deadline for this one command
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn wait(self) -> CommandOutcome {
        let PendingReply {
            mut completion,
            method,
            deadline,
            pending,
        } = self;

        let Some(deadline) = deadline else {
            return completion.wait().await;
        };

        match tokio::time::timeout(deadline, &mut completion.rx).await {
            Ok(received) => received.unwrap_or(Err(SocketError::Closed)),
            Err(_) => {
                let id = completion.id;
                if let Some(command) = pending.take(id) {
                    tracing::warn!("Command {} ({}) timed out after {:?}", id, method, deadline);
                    command.resolve(Err(SocketError::Timeout { id, method }));
                }
                // Either we resolved it above, or a reply/teardown already took it.
                completion.wait().await
            }
        }
    }
}

impl IntoFuture for PendingReply {
    type Output = CommandOutcome;
    type IntoFuture = BoxFuture<'static, CommandOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}
