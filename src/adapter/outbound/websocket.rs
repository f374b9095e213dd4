//! Streaming transport over `tokio-tungstenite`.
//!
//! Protocol-level pings are answered by tungstenite itself; they are still
//! surfaced to the caller so liveness tracking sees them.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::port::outbound::{StreamConnector, StreamHandle, StreamMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections (TLS for `wss://`).
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector;

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    #[must_use]
    pub fn new() -> Self {
        super::ensure_crypto_provider();
        Self
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamHandle>, TransportError> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        info!(status = %response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketHandle { socket }))
    }
}

pub struct WebSocketHandle {
    socket: Socket,
}

fn map_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Connect(other.to_string()),
    }
}

#[async_trait]
impl StreamHandle for WebSocketHandle {
    async fn send(&mut self, message: StreamMessage) -> Result<(), TransportError> {
        let frame = match message {
            StreamMessage::Text(text) => Message::Text(text),
            StreamMessage::Binary(bytes) => Message::Binary(bytes),
            StreamMessage::Ping(bytes) => Message::Ping(bytes),
            StreamMessage::Pong(bytes) => Message::Pong(bytes),
        };
        self.socket
            .send(frame)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn recv(&mut self) -> Result<StreamMessage, TransportError> {
        loop {
            let Some(frame) = self.socket.next().await else {
                return Err(TransportError::Closed);
            };
            match frame.map_err(map_error)? {
                Message::Text(text) => return Ok(StreamMessage::Text(text)),
                Message::Binary(bytes) => return Ok(StreamMessage::Binary(bytes)),
                Message::Ping(bytes) => return Ok(StreamMessage::Ping(bytes)),
                Message::Pong(bytes) => return Ok(StreamMessage::Pong(bytes)),
                Message::Close(frame) => {
                    debug!(frame = ?frame, "server closed WebSocket");
                    return Err(TransportError::Closed);
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.socket.close(None).await {
            debug!(error = %err, "WebSocket close failed");
        }
    }
}
