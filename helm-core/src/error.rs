//! Domain-specific error types for the helm link layer.
//!
//! Nothing in the link layer is allowed to crash the client: every
//! fallible operation returns a typed error that the owning component
//! recovers from locally (reconnect, discard, reload) and at most
//! reports as a degraded status.

use std::time::Duration;
use thiserror::Error;

use crate::link::ChannelStatus;

/// The umbrella error type for the helm client.
#[derive(Debug, Error)]
pub enum HelmError {
    /// A duplex channel failed.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// An inbound telemetry frame was rejected.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The video pipeline failed.
    #[error("video error: {0}")]
    Video(#[from] VideoError),

    /// Local I/O (config files, stdin).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── LinkError ────────────────────────────────────────────────────

/// Errors raised by a reconnecting duplex channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The endpoint is not a valid `ws://` / `wss://` URI.
    #[error("invalid endpoint {uri:?}: {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    /// The socket could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Establishing the socket exceeded its deadline.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying transport reported an error on a live socket.
    #[error("transport error: {0}")]
    Transport(String),

    /// The socket was closed by the peer.
    #[error("socket closed")]
    Closed,

    /// A frame could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The state machine refused a transition.
    #[error("invalid transition: {event} while {from}")]
    InvalidTransition {
        from: ChannelStatus,
        event: &'static str,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => LinkError::Closed,
            other => LinkError::Transport(other.to_string()),
        }
    }
}

// ── TelemetryError ───────────────────────────────────────────────

/// Why an inbound telemetry frame was discarded.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The frame was not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required coordinate was absent or null.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A coordinate was present but not a usable number.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

// ── VideoError ───────────────────────────────────────────────────

/// Errors raised by a playback engine.
#[derive(Debug, Error)]
pub enum VideoError {
    /// Fetching a playlist or segment failed.
    #[error("network error: {0}")]
    Network(String),

    /// The playlist could not be parsed.
    #[error("playlist error: {0}")]
    Playlist(String),

    /// The media sink rejected data or went away.
    #[error("media sink error: {0}")]
    Sink(String),

    /// An operation required an attached media sink.
    #[error("no media attached")]
    NotAttached,

    /// The engine session has already been destroyed.
    #[error("session destroyed")]
    Destroyed,

    /// In-place media recovery could not be performed.
    #[error("media recovery failed: {0}")]
    RecoveryFailed(String),
}

impl From<reqwest::Error> for VideoError {
    fn from(e: reqwest::Error) -> Self {
        VideoError::Network(e.to_string())
    }
}

impl From<String> for HelmError {
    fn from(s: String) -> Self {
        HelmError::Other(s)
    }
}

impl From<&str> for HelmError {
    fn from(s: &str) -> Self {
        HelmError::Other(s.to_string())
    }
}
