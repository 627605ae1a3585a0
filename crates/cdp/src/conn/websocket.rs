//! WebSocket connection over tokio-tungstenite
//!
//! Single WebSocket per endpoint. The write half and read half are locked
//! separately so the receive loop never blocks senders.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use super::MessageConn;
use crate::error::{Result, SocketError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConn {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WsConn {
    /// Connect to a DevTools WebSocket endpoint
    pub async fn connect(url: &str, max_message_size: Option<usize>) -> Result<Self> {
        let mut ws_config = WebSocketConfig::default();
        if max_message_size.is_some() {
            ws_config.max_message_size = max_message_size;
            ws_config.max_frame_size = max_message_size;
        }

        let (ws_stream, _) = connect_async_with_config(url, Some(ws_config), false).await?;
        tracing::info!("Connected to {}", url);

        Ok(Self::from_stream(ws_stream))
    }

    /// Wrap an already-established WebSocket
    pub fn from_stream(ws_stream: WsStream) -> Self {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl MessageConn for WsConn {
    async fn send(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<String> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(String::from_utf8_lossy(&bytes).into_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed by peer: {:?}", frame);
                    return Err(SocketError::Closed);
                }
                Some(Ok(_)) => continue, // ping/pong/raw frames
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Err(SocketError::Closed);
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
