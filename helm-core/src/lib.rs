//! # helm-core
//!
//! Realtime link layer for the remote helm client.
//!
//! This crate contains:
//! - **Link**: `DuplexChannel`, a self-healing WebSocket text channel with a fixed reconnect delay
//! - **Control**: `ControlPublisher` and the `{steer, thr, brk}` control frame
//! - **Telemetry**: `TelemetryConsumer` folding GPS fixes into the latest position
//! - **Video**: `VideoController` driving a low-latency `PlaybackEngine` (HLS)
//! - **Error**: `HelmError` and per-subsystem `thiserror` errors

pub mod control;
pub mod error;
pub mod link;
pub mod telemetry;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use control::{ControlFrame, ControlPublisher, Sound, SoundCommand};
pub use error::{HelmError, LinkError, TelemetryError, VideoError};
pub use link::{
    ChannelConfig, ChannelStatus, Connector, DuplexChannel, Endpoint, LinkState, MemoryConnector,
    WsConnector,
};
pub use telemetry::{Position, TelemetryConsumer, TelemetryFix, parse_fix};
pub use video::{
    ControllerConfig, ErrorTier, HlsEngine, LowLatencyConfig, PlaybackEngine, SharedSegmentBuffer,
    VideoController, VideoState,
};
