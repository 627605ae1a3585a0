//! In-process connection
//!
//! `pair()` returns the client side (`MemoryConn`, handed to a socket) and
//! the remote side (`MemoryPeer`, driven by the test or embedder). Dropping
//! the peer looks like the remote end hanging up.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch, Mutex};

use super::MessageConn;
use crate::error::{Result, SocketError};
use crate::protocol::CommandId;

pub fn pair() -> (MemoryConn, MemoryPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();
    let (closed_tx, _) = watch::channel(false);

    let conn = MemoryConn {
        outbound: to_peer,
        inbound: Mutex::new(from_peer),
        closed: closed_tx,
        fail_writes: AtomicBool::new(false),
    };
    let peer = MemoryPeer {
        inbound: from_client,
        outbound: to_client,
    };
    (conn, peer)
}

pub struct MemoryConn {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: watch::Sender<bool>,
    fail_writes: AtomicBool,
}

impl MemoryConn {
    /// Make every following `send` fail, as a broken pipe would
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageConn for MemoryConn {
    async fn send(&self, text: String) -> Result<()> {
        if *self.closed.borrow() {
            return Err(SocketError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SocketError::Transport("write failed".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| SocketError::Transport("peer hung up".to_string()))
    }

    async fn recv(&self) -> Result<String> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            message = inbound.recv() => message.ok_or(SocketError::Closed),
            _ = closed.wait_for(|closed| *closed) => Err(SocketError::Closed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        Ok(())
    }
}

/// Remote end of an in-memory connection
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Push a raw frame to the client. Returns false once the client is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.outbound.send(text.into()).is_ok()
    }

    pub fn push_json(&self, value: &Value) -> bool {
        self.push(value.to_string())
    }

    pub fn reply(&self, id: CommandId, result: Value) -> bool {
        self.push_json(&json!({ "id": id, "result": result }))
    }

    pub fn reply_error(&self, id: CommandId, code: i64, message: &str) -> bool {
        self.push_json(&json!({ "id": id, "error": { "code": code, "message": message } }))
    }

    pub fn emit(&self, method: &str, params: Value) -> bool {
        self.push_json(&json!({ "method": method, "params": params }))
    }

    /// Next frame the client wrote, raw
    pub async fn next_frame(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next frame the client wrote, parsed. Non-JSON frames are skipped.
    pub async fn next_request(&mut self) -> Option<Value> {
        while let Some(frame) = self.inbound.recv().await {
            match serde_json::from_str(&frame) {
                Ok(value) => return Some(value),
                Err(e) => tracing::warn!("Peer skipped unparseable frame: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_both_ways() {
        let (conn, mut peer) = pair();

        conn.send(r#"{"id":1,"method":"X.y"}"#.to_string()).await.unwrap();
        let request = peer.next_request().await.unwrap();
        assert_eq!(request["method"], "X.y");

        assert!(peer.reply(1, json!({ "a": 1 })));
        let frame: Value = serde_json::from_str(&conn.recv().await.unwrap()).unwrap();
        assert_eq!(frame, json!({ "id": 1, "result": { "a": 1 } }));
    }

    #[tokio::test]
    async fn test_close_unblocks_recv() {
        let (conn, _peer) = pair();
        let conn = std::sync::Arc::new(conn);

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::task::yield_now().await;
        conn.close().await.unwrap();

        assert!(reader.await.unwrap().unwrap_err().is_closed());
        assert!(conn.send("{}".to_string()).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_dropped_peer_is_hang_up() {
        let (conn, peer) = pair();
        drop(peer);
        assert!(conn.recv().await.unwrap_err().is_closed());
        assert!(matches!(
            conn.send("{}".to_string()).await,
            Err(SocketError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let (conn, _peer) = pair();
        conn.fail_writes(true);
        assert!(conn.send("{}".to_string()).await.is_err());
        conn.fail_writes(false);
        assert!(conn.send("{}".to_string()).await.is_ok());
    }
}
