//! Video session lifecycle and error policy.
//!
//! The controller owns at most one engine session at a time. It attaches
//! the sink on mount, loads the stream once the engine reports the media
//! attached, and sorts every reported failure into an [`ErrorTier`] that
//! decides whether the session keeps going, recovers in place, or is
//! destroyed.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::VideoError;
use crate::video::engine::{
    ErrorDetail, ErrorKind, LowLatencyConfig, MediaSink, PlaybackEngine, PlayerError,
    PlayerEvent, PlayerEvents, SessionEvent, SessionId, TrackKind,
};

/// Creates one engine per session.
pub type EngineFactory<E> = Box<dyn FnMut(&LowLatencyConfig, PlayerEvents) -> E + Send>;

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub stream_url: String,
    pub player: LowLatencyConfig,
    /// A second media fault inside this window is treated as fatal.
    pub media_recovery_window: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stream_url: "https://pi.wizzwatts.com/hls/stream.m3u8".into(),
            player: LowLatencyConfig::default(),
            media_recovery_window: Duration::from_millis(3000),
        }
    }
}

// ── Classification ───────────────────────────────────────────────

/// How a reported playback failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTier {
    /// Logged and otherwise ignored.
    Ignorable,
    /// Restart loading from the current position.
    RecoverableNetwork,
    /// Reset the media pipeline in place.
    RecoverableMedia,
    /// Destroy the session.
    Fatal,
}

/// Tier for a failure, before any escalation.
pub fn classify(error: &PlayerError) -> ErrorTier {
    if error.kind == ErrorKind::Media
        && error.detail == ErrorDetail::BufferAppend
        && error.buffer == Some(TrackKind::Video)
    {
        // Audio-only segment offered to the video buffer.
        return ErrorTier::Ignorable;
    }
    if !error.fatal {
        return ErrorTier::Ignorable;
    }
    match error.kind {
        ErrorKind::Network => ErrorTier::RecoverableNetwork,
        ErrorKind::Media => ErrorTier::RecoverableMedia,
        ErrorKind::Other => ErrorTier::Fatal,
    }
}

// ── State ────────────────────────────────────────────────────────

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoState {
    /// No session.
    #[default]
    Idle,
    /// Sink attached, waiting for the engine to accept it.
    Attaching { session: u64 },
    /// Source loaded.
    Playing { session: u64 },
    /// Session destroyed after an unrecoverable failure.
    Failed { reason: String },
}

impl std::fmt::Display for VideoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoState::Idle => write!(f, "idle"),
            VideoState::Attaching { session } => write!(f, "attaching (session-{session})"),
            VideoState::Playing { session } => write!(f, "playing (session-{session})"),
            VideoState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

struct VideoSession<E> {
    id: SessionId,
    engine: E,
    loaded: bool,
    last_media_recovery: Option<Instant>,
}

// ── VideoController ──────────────────────────────────────────────

pub struct VideoController<E: PlaybackEngine> {
    config: ControllerConfig,
    factory: EngineFactory<E>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    next_session: u64,
    session: Option<VideoSession<E>>,
    state_tx: watch::Sender<VideoState>,
}

impl<E: PlaybackEngine> VideoController<E> {
    pub fn new(
        config: ControllerConfig,
        factory: impl FnMut(&LowLatencyConfig, PlayerEvents) -> E + Send + 'static,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(VideoState::Idle);
        Self {
            config,
            factory: Box::new(factory),
            events_tx,
            events_rx,
            next_session: 1,
            session: None,
            state_tx,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Current session, if any.
    pub fn session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn engine(&self) -> Option<&E> {
        self.session.as_ref().map(|s| &s.engine)
    }

    pub fn state(&self) -> VideoState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VideoState> {
        self.state_tx.subscribe()
    }

    /// Start a session on `sink`. No-op while a session exists.
    pub fn mount(&mut self, sink: Box<dyn MediaSink>) -> Result<SessionId, VideoError> {
        if let Some(session) = &self.session {
            debug!("{} already mounted", session.id);
            return Ok(session.id);
        }

        let id = SessionId(self.next_session);
        self.next_session += 1;
        let events = PlayerEvents::new(id, self.events_tx.clone());
        let mut engine = (self.factory)(&self.config.player, events);
        if let Err(e) = engine.attach_media(sink) {
            engine.destroy();
            return Err(e);
        }

        info!("{id} mounted");
        self.session = Some(VideoSession {
            id,
            engine,
            loaded: false,
            last_media_recovery: None,
        });
        self.publish(VideoState::Attaching { session: id.0 });
        Ok(id)
    }

    /// React to one engine event. Events from earlier sessions are
    /// dropped. Returns the applied tier for error events.
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<ErrorTier> {
        let current = self.session()?;
        if event.session != current {
            trace!("dropping event from stale {}", event.session);
            return None;
        }

        match event.event {
            PlayerEvent::MediaAttached => {
                self.load();
                None
            }
            PlayerEvent::FragmentBuffered { sequence, duration } => {
                trace!("{current} buffered #{sequence} ({duration:?})");
                None
            }
            PlayerEvent::LiveSync {
                latency,
                playback_rate,
            } => {
                trace!("{current} latency {latency:?} rate {playback_rate:.2}");
                None
            }
            PlayerEvent::Error(err) => Some(self.handle_error(&err)),
        }
    }

    /// Handle every event already queued. Returns how many were taken.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Process events until `cancel` fires, then tear down.
    pub async fn run(&mut self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = self.events_rx.recv() => event,
            };
            match event {
                Some(event) => {
                    self.handle_event(event);
                }
                None => break,
            }
        }
        self.teardown();
    }

    /// Destroy the current session, releasing its buffers. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.engine.destroy();
            info!("{} torn down", session.id);
            self.publish(VideoState::Idle);
        }
    }

    fn load(&mut self) {
        let url = self.config.stream_url.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.loaded {
            return;
        }
        match session.engine.load_source(&url) {
            Ok(()) => {
                session.loaded = true;
                let id = session.id;
                info!("{id} loading {url}");
                self.publish(VideoState::Playing { session: id.0 });
            }
            Err(e) => self.fail(format!("load failed: {e}")),
        }
    }

    fn handle_error(&mut self, err: &PlayerError) -> ErrorTier {
        let window = self.config.media_recovery_window;
        let Some(session) = self.session.as_mut() else {
            return ErrorTier::Fatal;
        };
        let id = session.id;

        let tier = match classify(err) {
            ErrorTier::Ignorable => {
                debug!("{id} ignoring {err}");
                return ErrorTier::Ignorable;
            }
            ErrorTier::RecoverableNetwork => {
                warn!("{id} network fault, reloading: {err}");
                match session.engine.start_load() {
                    Ok(()) => ErrorTier::RecoverableNetwork,
                    Err(e) => {
                        warn!("{id} reload failed: {e}");
                        ErrorTier::Fatal
                    }
                }
            }
            ErrorTier::RecoverableMedia => {
                let now = Instant::now();
                let repeated = session
                    .last_media_recovery
                    .is_some_and(|at| now.duration_since(at) < window);
                if repeated {
                    warn!("{id} media fault repeated within {window:?}: {err}");
                    ErrorTier::Fatal
                } else {
                    warn!("{id} media fault, recovering: {err}");
                    session.last_media_recovery = Some(now);
                    match session.engine.recover_media_error() {
                        Ok(()) => ErrorTier::RecoverableMedia,
                        Err(e) => {
                            warn!("{id} media recovery failed: {e}");
                            ErrorTier::Fatal
                        }
                    }
                }
            }
            ErrorTier::Fatal => ErrorTier::Fatal,
        };

        if tier == ErrorTier::Fatal {
            self.fail(err.to_string());
        }
        tier
    }

    fn fail(&mut self, reason: String) {
        if let Some(mut session) = self.session.take() {
            error!("{} fatal: {reason}", session.id);
            session.engine.destroy();
        }
        self.publish(VideoState::Failed { reason });
    }

    fn publish(&self, state: VideoState) {
        self.state_tx.send_replace(state);
    }
}

impl<E: PlaybackEngine> Drop for VideoController<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}
