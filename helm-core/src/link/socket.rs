//! Transport seam for duplex channels.
//!
//! The channel driver only ever talks to a [`Connector`] and the
//! [`Socket`] it hands back. [`WsConnector`] is the production
//! implementation on top of `tokio-tungstenite`; tests substitute an
//! in-memory pair.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::LinkError;
use crate::link::endpoint::Endpoint;

/// One live text-framed socket.
#[async_trait]
pub trait Socket: Send {
    /// Transmit one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), LinkError>;

    /// Next inbound text frame.
    ///
    /// `None` means the peer closed the socket. Must be cancel-safe:
    /// the driver polls it inside `select!`.
    async fn next_text(&mut self) -> Option<Result<String, LinkError>>;

    /// Close the socket. Errors are swallowed; the socket is gone either way.
    async fn close(&mut self);
}

/// Factory for sockets to a given endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Socket>, LinkError>;
}

// ── WebSocket implementation ─────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over `ws://` / `wss://` with a bounded handshake time.
#[derive(Debug, Clone)]
pub struct WsConnector {
    timeout: Duration,
}

impl WsConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Socket>, LinkError> {
        debug!("connecting to {endpoint}");
        let (stream, _response) =
            tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(endpoint.as_str()))
                .await
                .map_err(|_| LinkError::Timeout(self.timeout))?
                .map_err(|e| LinkError::Connect(e.to_string()))?;
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WsStream,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), LinkError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, LinkError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => trace!("dropping non-utf8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!("peer sent close: {frame:?}");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
