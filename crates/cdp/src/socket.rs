//! Socket - The Core Dispatcher
//!
//! Design decisions:
//! 1. One connection, one receive loop, any number of concurrent callers
//! 2. Request/response matching via ID, events fanned out to subscribers
//! 3. Registries are per-socket; two sockets never share state
//! 4. Fail fast - no retries. Teardown fails every pending command instead of
//!    leaving callers hanging.
//!
//! Lifecycle: `Created -> Listening -> (Stopping | Faulted) -> Stopped`.
//! Commands sent while `Created` are registered and resolve once `listen`
//! runs. `Stopped` is terminal.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

use crate::command::{Command, IdSource, PendingReply};
use crate::config::SocketConfig;
use crate::conn::{MessageConn, WsConn};
use crate::error::{Result, SocketError};
use crate::protocol::{Envelope, Event, SessionId};
use crate::registry::{EventCallback, EventRegistry, HandlerId, PendingCommands};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Created,
    Listening,
    Stopping,
    Faulted,
    Stopped,
}

impl SocketState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SocketState::Created,
            1 => SocketState::Listening,
            2 => SocketState::Stopping,
            3 => SocketState::Faulted,
            _ => SocketState::Stopped,
        }
    }
}

/// Socket - owns the connection and both correlation registries
pub struct Socket {
    id: String,
    conn: Box<dyn MessageConn>,

    /// Monotonic command ID source
    ids: IdSource,

    /// Commands waiting for replies
    pending: Arc<PendingCommands>,

    /// Event subscribers, keyed by method name (e.g. "Page.loadEventFired")
    events: EventRegistry,

    state: AtomicU8,
    closed: AtomicBool,
    stop_tx: watch::Sender<bool>,
    command_timeout: Option<Duration>,
}

impl Socket {
    pub fn new(conn: impl MessageConn + 'static, config: &SocketConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let command_timeout = config.command_timeout().filter(|timeout| {
            if timeout.is_zero() {
                tracing::warn!("Ignoring zero command timeout for socket {}", config.id);
            }
            !timeout.is_zero()
        });
        Self {
            id: config.id.clone(),
            conn: Box::new(conn),
            ids: IdSource::new(),
            pending: Arc::new(PendingCommands::new()),
            events: EventRegistry::new(),
            state: AtomicU8::new(SocketState::Created as u8),
            closed: AtomicBool::new(false),
            stop_tx,
            command_timeout,
        }
    }

    /// Connect over WebSocket and start the receive loop on a background task
    pub async fn connect(config: SocketConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let conn = WsConn::connect(&config.url, config.max_message_size).await?;
        let socket = Arc::new(Self::new(conn, &config));
        socket.spawn_listener();
        Ok(socket)
    }

    /// Run `listen` on a background task
    pub fn spawn_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let socket = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = socket.listen().await;
            if let Err(e) = &outcome {
                tracing::error!("Receive loop for {} ended: {}", socket.id, e);
            }
            outcome
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_stopped(&self) -> bool {
        self.state() == SocketState::Stopped
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.events.count(event)
    }

    /// Register and write a command; the returned handle resolves with its reply.
    ///
    /// A write failure resolves the handle with that error and unregisters the
    /// command. Only a stopped socket or unserializable params fail here.
    pub async fn send_command(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<PendingReply> {
        if self.is_stopped() {
            return Err(SocketError::Closed);
        }

        let (command, completion) = Command::submit(&self.ids, method, params, session_id);
        let id = command.id();
        let method = command.method().to_string();
        let frame = command.to_frame()?;

        self.pending.put(command)?;
        let reply = PendingReply::new(
            completion,
            method,
            self.command_timeout,
            Arc::clone(&self.pending),
        );

        // Teardown may have drained between the state check and the put.
        if self.is_stopped() {
            if let Some(command) = self.pending.take(id) {
                command.resolve(Err(SocketError::Closed));
            }
            return Ok(reply);
        }

        tracing::trace!("Sending command {} ({})", id, reply.method());
        if let Err(e) = self.conn.send(frame).await {
            tracing::warn!("Failed to send command {} ({}): {}", id, reply.method(), e);
            if let Some(command) = self.pending.take(id) {
                command.resolve(Err(e));
            }
        }

        Ok(reply)
    }

    /// Send a command and wait for its result
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.send_command(method, params, None).await?.await
    }

    /// Serialize params, send, and deserialize the result
    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(params)? {
            Value::Null => None,
            value => Some(value),
        };
        let result = self.send_command(method, params, None).await?.await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribe to an event; the returned id removes it again
    pub fn add_event_handler(&self, event: impl Into<String>, callback: EventCallback) -> HandlerId {
        let subscriber = self.events.subscriber(callback);
        self.events.add(event, subscriber)
    }

    pub fn remove_event_handler(&self, event: &str, id: HandlerId) -> bool {
        self.events.remove(event, id)
    }

    /// Replace every handler for an event at once
    pub fn replace_event_handlers(
        &self,
        event: impl Into<String>,
        callbacks: Vec<EventCallback>,
    ) -> Vec<HandlerId> {
        let subscribers: Vec<_> = callbacks
            .into_iter()
            .map(|callback| self.events.subscriber(callback))
            .collect();
        let ids = subscribers.iter().map(|s| s.id()).collect();
        self.events.replace(event, subscribers);
        ids
    }

    /// Subscribe with a typed payload. Payloads that fail to decode are logged
    /// and skipped.
    pub fn on<E, F>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        E: DeserializeOwned,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.add_event_handler(event, typed_callback(handler, None))
    }

    pub(crate) fn on_session<E, F>(
        &self,
        event: impl Into<String>,
        session_id: SessionId,
        handler: F,
    ) -> HandlerId
    where
        E: DeserializeOwned,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.add_event_handler(event, typed_callback(handler, Some(session_id)))
    }

    /// Run the receive loop until `stop`, `close`, or a read failure.
    ///
    /// Returns `Ok` for a requested shutdown and the transport error for a
    /// failure. Either way every pending command is failed before returning.
    pub async fn listen(&self) -> Result<()> {
        if let Err(current) = self.state.compare_exchange(
            SocketState::Created as u8,
            SocketState::Listening as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return match SocketState::from_u8(current) {
                SocketState::Stopped => Err(SocketError::Closed),
                _ => Err(SocketError::AlreadyListening),
            };
        }

        let span = tracing::info_span!("listen", socket = %self.id);
        async {
            tracing::info!("Receive loop started");
            let outcome = self.receive_loop().await;

            match &outcome {
                Ok(()) => {
                    tracing::info!("Receive loop stopped");
                    self.shut_down();
                }
                Err(e) => {
                    tracing::error!("Receive loop failed: {}", e);
                    self.state
                        .store(SocketState::Faulted as u8, Ordering::SeqCst);
                    if let Err(close_err) = self.close().await {
                        tracing::debug!("Close after read failure: {}", close_err);
                    }
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn receive_loop(&self) -> Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.wait_for(|stopped| *stopped) => return Ok(()),
                read = self.conn.recv() => match read {
                    Ok(text) => self.dispatch(&text),
                    Err(_) if self.closed.load(Ordering::SeqCst) => return Ok(()),
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Classify one inbound message and route it
    fn dispatch(&self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                // A pending caller must still hear about a reply it cannot read.
                if let Some(command) = Envelope::salvage_id(text).and_then(|id| self.pending.take(id)) {
                    tracing::warn!(
                        "Malformed reply for command {} ({}): {}",
                        command.id(),
                        command.method(),
                        e
                    );
                    command.resolve(Err(SocketError::Json(e)));
                } else {
                    tracing::warn!("Discarding malformed message: {}", e);
                }
                return;
            }
        };

        // A pending id is authoritative; a method only matters when no id matched.
        if let Some(id) = envelope.id {
            if let Some(command) = self.pending.take(id) {
                tracing::trace!("Reply for command {} ({})", id, command.method());
                command.resolve(envelope.into_outcome());
                return;
            }
            if envelope.method.is_none() {
                tracing::warn!("Received reply for unknown command: {}", id);
                return;
            }
        }

        match envelope.into_event() {
            Some(event) => self.dispatch_event(&event),
            None => tracing::warn!("Discarding message with neither id nor method"),
        }
    }

    fn dispatch_event(&self, event: &Event) {
        let subscribers = self.events.get(&event.method);
        if subscribers.is_empty() {
            tracing::trace!("No subscribers for {}", event.method);
            return;
        }
        for subscriber in &subscribers {
            subscriber.invoke(event);
        }
    }

    /// Ask the receive loop to exit. The connection stays open.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        let transitioned = self.state.compare_exchange(
            SocketState::Listening as u8,
            SocketState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if let Err(current) = transitioned {
            if SocketState::from_u8(current) == SocketState::Created {
                self.shut_down();
            }
        }
    }

    /// Close the connection and fail every pending command. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing socket {}", self.id);

        let closed = self.conn.close().await;
        self.shut_down();
        closed
    }

    /// Enter `Stopped`, wake the receive loop, fail everything pending
    fn shut_down(&self) {
        self.state.store(SocketState::Stopped as u8, Ordering::SeqCst);
        self.stop_tx.send_replace(true);

        let drained = self.pending.drain_all();
        if !drained.is_empty() {
            tracing::info!("Failing {} pending commands", drained.len());
        }
        for command in drained {
            command.resolve(Err(SocketError::Closed));
        }
    }
}

fn typed_callback<E, F>(handler: F, session_id: Option<SessionId>) -> EventCallback
where
    E: DeserializeOwned,
    F: Fn(E) + Send + Sync + 'static,
{
    Arc::new(move |event: &Event| {
        if session_id.is_some() && event.session_id != session_id {
            return;
        }
        match serde_json::from_value::<E>(event.params.clone()) {
            Ok(payload) => handler(payload),
            Err(e) => tracing::warn!("Failed to decode {} event: {}", event.method, e),
        }
    })
}
