//! Render-side segment buffer and live catch-up policy.
//!
//! [`SegmentBuffer`] is the frame-buffer handoff between a playback
//! engine and the renderer: the engine appends segments at the front,
//! the renderer pulls them off in order, and already played segments
//! are retained only for the configured back-buffer duration.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::VideoError;
use crate::video::engine::{MediaSegment, MediaSink};

// ── SegmentBuffer ────────────────────────────────────────────────

/// Forward queue plus bounded back buffer.
#[derive(Debug)]
pub struct SegmentBuffer {
    ahead: VecDeque<MediaSegment>,
    behind: VecDeque<MediaSegment>,
    back_buffer: Duration,
    playback_rate: f64,
}

impl SegmentBuffer {
    pub fn new(back_buffer: Duration) -> Self {
        Self {
            ahead: VecDeque::new(),
            behind: VecDeque::new(),
            back_buffer,
            playback_rate: 1.0,
        }
    }

    /// Next segment to render, moving it into the back buffer.
    pub fn play_next(&mut self) -> Option<MediaSegment> {
        let segment = self.ahead.pop_front()?;
        self.behind.push_back(segment.clone());
        self.trim_back();
        Some(segment)
    }

    /// Media retained behind the playhead.
    pub fn back_buffered(&self) -> Duration {
        total(&self.behind)
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Segments waiting to be rendered.
    pub fn pending(&self) -> usize {
        self.ahead.len()
    }

    /// Total bytes held, forward and back.
    pub fn retained_bytes(&self) -> usize {
        self.ahead
            .iter()
            .chain(self.behind.iter())
            .map(|s| s.data.len())
            .sum()
    }

    fn trim_back(&mut self) {
        while self.back_buffered() > self.back_buffer {
            if self.behind.pop_front().is_none() {
                break;
            }
        }
    }
}

fn total(segments: &VecDeque<MediaSegment>) -> Duration {
    segments
        .iter()
        .fold(Duration::ZERO, |sum, s| sum.saturating_add(s.duration))
}

impl MediaSink for SegmentBuffer {
    fn append(&mut self, segment: MediaSegment) -> Result<(), VideoError> {
        if segment.data.is_empty() {
            return Err(VideoError::Sink(format!(
                "segment {} has no media data",
                segment.sequence
            )));
        }
        if let Some(last) = self.ahead.back().or(self.behind.back()) {
            if segment.sequence <= last.sequence {
                // Duplicate after a reload; already have it.
                return Ok(());
            }
        }
        self.ahead.push_back(segment);
        Ok(())
    }

    fn buffered(&self) -> Duration {
        total(&self.ahead)
    }

    fn flush(&mut self) {
        self.ahead.clear();
        self.behind.clear();
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate = rate;
    }
}

// ── SharedSegmentBuffer ──────────────────────────────────────────

/// Cloneable handle: one clone goes to the engine as its sink, the
/// other stays with the renderer.
#[derive(Debug, Clone)]
pub struct SharedSegmentBuffer {
    inner: Arc<Mutex<SegmentBuffer>>,
    /// Bumped on every append so the renderer can await new media.
    appended: Arc<watch::Sender<u64>>,
}

impl SharedSegmentBuffer {
    pub fn new(back_buffer: Duration) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(SegmentBuffer::new(back_buffer))),
            appended: Arc::new(appended),
        }
    }

    /// Lock the buffer. A poisoned lock is recovered; the buffer holds
    /// no invariants a panicking renderer could break.
    pub fn lock(&self) -> MutexGuard<'_, SegmentBuffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Notified after each successful append.
    pub fn appended(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}

impl MediaSink for SharedSegmentBuffer {
    fn append(&mut self, segment: MediaSegment) -> Result<(), VideoError> {
        self.lock().append(segment)?;
        self.appended.send_modify(|n| *n += 1);
        Ok(())
    }

    fn buffered(&self) -> Duration {
        self.lock().buffered()
    }

    fn flush(&mut self) {
        self.lock().flush();
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.lock().set_playback_rate(rate);
    }
}

// ── Live sync ────────────────────────────────────────────────────

/// Playback speed needed to drift back toward the target latency.
///
/// At or below `target` plays at 1.0; above it the rate rises in
/// proportion to the excess and is capped at `max_rate`.
pub fn live_sync_rate(latency: Duration, target: Duration, max_rate: f64) -> f64 {
    if latency <= target || target.is_zero() {
        return 1.0;
    }
    let excess = (latency - target).as_secs_f64() / target.as_secs_f64();
    (1.0 + excess).min(max_rate.max(1.0))
}
