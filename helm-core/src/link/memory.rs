//! In-memory transport.
//!
//! [`MemoryConnector`] hands every connection attempt to a
//! [`MemoryListener`], which decides whether to accept or refuse it. An
//! accepted attempt yields a [`MemoryPeer`] that plays the vehicle side
//! of the socket. Used to simulate the vehicle without a network, both
//! in tests and for dry runs of the client.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::LinkError;
use crate::link::endpoint::Endpoint;
use crate::link::socket::{Connector, Socket};

/// Connector whose attempts are resolved by a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    attempts: mpsc::UnboundedSender<PendingConnection>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { attempts: tx }, MemoryListener { attempts: rx })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Socket>, LinkError> {
        let (reply, outcome) = oneshot::channel();
        self.attempts
            .send(PendingConnection {
                endpoint: endpoint.clone(),
                reply,
            })
            .map_err(|_| LinkError::Connect("listener gone".into()))?;
        match outcome.await {
            Ok(Ok(socket)) => Ok(Box::new(socket)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LinkError::Connect("attempt abandoned".into())),
        }
    }
}

/// Receives connection attempts made through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    attempts: mpsc::UnboundedReceiver<PendingConnection>,
}

impl MemoryListener {
    /// Wait for the next attempt. `None` once every connector is gone.
    pub async fn next(&mut self) -> Option<PendingConnection> {
        self.attempts.recv().await
    }

    /// An attempt that is already waiting, if any.
    pub fn try_next(&mut self) -> Option<PendingConnection> {
        self.attempts.try_recv().ok()
    }
}

/// A connection attempt awaiting a decision.
#[derive(Debug)]
pub struct PendingConnection {
    endpoint: Endpoint,
    reply: oneshot::Sender<Result<MemorySocket, LinkError>>,
}

impl PendingConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Complete the handshake and return the remote side.
    pub fn accept(self) -> MemoryPeer {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let _ = self.reply.send(Ok(MemorySocket {
            tx: Some(client_tx),
            rx: client_rx,
        }));
        MemoryPeer {
            tx: Some(to_client),
            rx: from_client,
        }
    }

    /// Fail the attempt.
    pub fn refuse(self, reason: &str) {
        let _ = self.reply.send(Err(LinkError::Connect(reason.to_string())));
    }
}

/// Client side of an in-memory socket.
#[derive(Debug)]
pub struct MemorySocket {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Socket for MemorySocket {
    async fn send_text(&mut self, text: String) -> Result<(), LinkError> {
        match &self.tx {
            Some(tx) => tx.send(text).map_err(|_| LinkError::Closed),
            None => Err(LinkError::Closed),
        }
    }

    async fn next_text(&mut self) -> Option<Result<String, LinkError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Vehicle side of an in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Push a text frame to the client. `false` once either side closed.
    pub fn send(&self, text: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Next frame from the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Close from the vehicle side.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Whether the client has closed its half.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}
