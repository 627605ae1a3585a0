//! Session - a target-scoped view over a shared socket
//!
//! All sessions share the same connection and the same registries. A session
//! only stamps its `sessionId` on outgoing commands and filters incoming
//! events by it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::command::PendingReply;
use crate::error::Result;
use crate::protocol::SessionId;
use crate::registry::HandlerId;
use crate::socket::Socket;

#[derive(Clone)]
pub struct Session {
    socket: Arc<Socket>,
    session_id: SessionId,
}

impl Session {
    pub fn new(socket: Arc<Socket>, session_id: impl Into<SessionId>) -> Self {
        Self {
            socket,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub async fn send_command(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<PendingReply> {
        self.socket
            .send_command(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Send command within this session's context
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.send_command(method, params).await?.await
    }

    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(params)? {
            Value::Null => None,
            value => Some(value),
        };
        let result = self.send_command(method, params).await?.await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Typed handler that only sees events tagged with this session
    pub fn on<E, F>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        E: DeserializeOwned,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.socket
            .on_session(event, self.session_id.clone(), handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketConfig;
    use crate::conn::memory;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize)]
    struct Frame {
        #[serde(rename = "frameId")]
        frame_id: String,
    }

    #[tokio::test]
    async fn test_session_stamps_commands() {
        let (conn, mut peer) = memory::pair();
        let socket = Arc::new(Socket::new(conn, &SocketConfig::default()));
        let _listener = socket.spawn_listener();
        let session = Session::new(socket.clone(), "S1");

        let caller = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .call("Page.navigate", Some(json!({ "url": "about:blank" })))
                    .await
            })
        };

        let request = peer.next_request().await.unwrap();
        assert_eq!(request["sessionId"], "S1");
        peer.reply(request["id"].as_u64().unwrap(), json!({ "frameId": "F" }));
        assert_eq!(caller.await.unwrap().unwrap()["frameId"], "F");
    }

    #[tokio::test]
    async fn test_session_filters_events() {
        let (conn, mut peer) = memory::pair();
        let socket = Arc::new(Socket::new(conn, &SocketConfig::default()));
        let _listener = socket.spawn_listener();
        let session = Session::new(socket.clone(), "S1");

        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        session.on("Page.frameNavigated", move |frame: Frame| {
            sink.lock().unwrap().push(frame.frame_id)
        });

        peer.push_json(&json!({
            "method": "Page.frameNavigated",
            "params": { "frameId": "other" },
            "sessionId": "S2"
        }));
        peer.push_json(&json!({
            "method": "Page.frameNavigated",
            "params": { "frameId": "mine" },
            "sessionId": "S1"
        }));

        let ping = socket.send_command("X.ping", None, None).await.unwrap();
        let id = peer.next_request().await.unwrap()["id"].as_u64().unwrap();
        peer.reply(id, Value::Null);
        ping.await.unwrap();

        assert_eq!(*frames.lock().unwrap(), vec!["mine".to_string()]);
    }
}
