//! Telemetry channel → shared position state.

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

use crate::error::TelemetryError;
use crate::telemetry::fix::{TelemetryFix, parse_fix};

/// Latest accepted vessel position, as rendered by the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    /// Last known course in degrees; `None` until one has been reported.
    pub course: Option<f64>,
}

/// Acceptance counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Validates inbound frames and publishes the latest position.
///
/// A rejected frame never touches the published state: the map keeps
/// showing the last good fix instead of jumping to null island.
pub struct TelemetryConsumer {
    position_tx: watch::Sender<Option<Position>>,
    position_rx: watch::Receiver<Option<Position>>,
    stats: TelemetryStats,
}

impl TelemetryConsumer {
    pub fn new() -> Self {
        let (position_tx, position_rx) = watch::channel(None);
        Self {
            position_tx,
            position_rx,
            stats: TelemetryStats::default(),
        }
    }

    /// Latest accepted position, if any.
    pub fn position(&self) -> Option<Position> {
        *self.position_rx.borrow()
    }

    /// Watch position updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.position_rx.clone()
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    /// Process one raw inbound frame.
    pub fn apply(&mut self, text: &str) -> Result<Position, TelemetryError> {
        match parse_fix(text) {
            Ok(fix) => {
                let position = self.accept(fix);
                trace!("fix accepted: {position:?}");
                Ok(position)
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!("discarding telemetry frame ({e}): {text}");
                Err(e)
            }
        }
    }

    /// Drain `inbound` in arrival order until the channel closes.
    pub async fn run(&mut self, mut inbound: mpsc::Receiver<String>) {
        while let Some(text) = inbound.recv().await {
            let _ = self.apply(&text);
        }
    }

    /// Replace the position wholesale; an absent course keeps the
    /// previously known heading.
    fn accept(&mut self, fix: TelemetryFix) -> Position {
        let previous_course = self.position().and_then(|p| p.course);
        let position = Position {
            lat: fix.lat,
            lng: fix.lng,
            course: fix.course.or(previous_course),
        };
        self.stats.accepted += 1;
        self.position_tx.send_replace(Some(position));
        position
    }
}

impl Default for TelemetryConsumer {
    fn default() -> Self {
        Self::new()
    }
}
