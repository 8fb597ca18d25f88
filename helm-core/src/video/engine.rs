//! Playback engine seam.
//!
//! A [`PlaybackEngine`] is one live player instance: it owns the media
//! sink it was attached to and reports progress and failures as
//! [`PlayerEvent`]s. The [`VideoController`](super::VideoController)
//! drives it and decides how to react to each reported failure.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::VideoError;

// ── Configuration ────────────────────────────────────────────────

/// Player tuning that favors freshness over smoothness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LowLatencyConfig {
    /// Use the low-latency loading schedule (faster playlist refresh).
    pub low_latency_mode: bool,
    /// Forward buffer target in seconds.
    pub max_buffer_secs: f64,
    /// Seconds of already played media kept behind the playhead.
    pub back_buffer_secs: f64,
    /// Distance from the live edge, in target durations, to play at.
    pub live_sync_duration_count: f64,
    /// Beyond this many target durations behind, jump back to the edge.
    pub live_max_latency_duration_count: f64,
    /// Upper bound on catch-up playback speed.
    pub max_live_sync_playback_rate: f64,
    /// Load retries before a network failure is reported as fatal.
    pub max_load_retries: u32,
    /// Delay between load retries in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for LowLatencyConfig {
    fn default() -> Self {
        Self {
            low_latency_mode: true,
            max_buffer_secs: 2.0,
            back_buffer_secs: 15.0,
            live_sync_duration_count: 1.5,
            live_max_latency_duration_count: 4.0,
            max_live_sync_playback_rate: 1.2,
            max_load_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl LowLatencyConfig {
    pub fn max_buffer(&self) -> Duration {
        saturating_secs(self.max_buffer_secs)
    }

    pub fn back_buffer(&self) -> Duration {
        saturating_secs(self.back_buffer_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Seconds to a `Duration`, clamped to `0..=Duration::MAX`. NaN is zero.
pub fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// `duration * factor` without panicking on overflow.
pub fn saturating_scale(duration: Duration, factor: f64) -> Duration {
    saturating_secs(duration.as_secs_f64() * factor)
}

// ── Media ────────────────────────────────────────────────────────

/// Which source buffer a failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One downloaded media segment.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    /// Media sequence number from the playlist.
    pub sequence: u64,
    pub duration: Duration,
    pub data: Bytes,
}

/// Where an engine delivers loaded segments (the render side).
pub trait MediaSink: Send {
    /// Queue a segment for playback.
    fn append(&mut self, segment: MediaSegment) -> Result<(), VideoError>;

    /// Media queued ahead of the playhead.
    fn buffered(&self) -> Duration;

    /// Drop every buffered segment, forward and back.
    fn flush(&mut self);

    /// Adjust playback speed for live catch-up.
    fn set_playback_rate(&mut self, rate: f64);
}

// ── Events ───────────────────────────────────────────────────────

/// Origin of a playback failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Media,
    Other,
}

/// What specifically went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetail {
    ManifestLoad,
    ManifestParse,
    FragmentLoad,
    BufferAppend,
    BufferStalled,
    Internal,
}

/// A failure reported by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerError {
    pub kind: ErrorKind,
    pub detail: ErrorDetail,
    /// The engine cannot continue on its own.
    pub fatal: bool,
    /// The source buffer involved, for buffer failures.
    pub buffer: Option<TrackKind>,
    pub reason: String,
}

impl PlayerError {
    pub fn new(kind: ErrorKind, detail: ErrorDetail, fatal: bool, reason: impl Into<String>) -> Self {
        Self {
            kind,
            detail,
            fatal,
            buffer: None,
            reason: reason.into(),
        }
    }

    pub fn on_buffer(mut self, track: TrackKind) -> Self {
        self.buffer = Some(track);
        self
    }
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/{:?}{}: {}",
            self.kind,
            self.detail,
            if self.fatal { " (fatal)" } else { "" },
            self.reason
        )
    }
}

/// Progress and failure notifications from an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The sink is attached; the source may now be loaded.
    MediaAttached,
    /// A segment was appended to the sink.
    FragmentBuffered { sequence: u64, duration: Duration },
    /// Live latency was re-evaluated.
    LiveSync { latency: Duration, playback_rate: f64 },
    Error(PlayerError),
}

/// Identifies one playback session; never reused within a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// An event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: PlayerEvent,
}

/// Event emitter handed to an engine at creation.
#[derive(Debug, Clone)]
pub struct PlayerEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PlayerEvents {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Emit an event; silently dropped once the controller is gone.
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(SessionEvent {
            session: self.session,
            event,
        });
    }

    pub fn error(&self, error: PlayerError) {
        self.emit(PlayerEvent::Error(error));
    }
}

// ── PlaybackEngine ───────────────────────────────────────────────

/// One persistent player instance.
pub trait PlaybackEngine: Send {
    /// Bind the output sink. Emits [`PlayerEvent::MediaAttached`] once
    /// the source may be loaded.
    fn attach_media(&mut self, sink: Box<dyn MediaSink>) -> Result<(), VideoError>;

    /// Start loading `url`. Only valid after `MediaAttached`.
    fn load_source(&mut self, url: &str) -> Result<(), VideoError>;

    /// (Re)start loading from the current position.
    fn start_load(&mut self) -> Result<(), VideoError>;

    /// Reset the media pipeline in place and resume loading.
    fn recover_media_error(&mut self) -> Result<(), VideoError>;

    /// Stop loading and release every buffer. Idempotent.
    fn destroy(&mut self);
}
