//! Reconnecting channel state machine.
//!
//! [`ChannelMachine`] holds everything a duplex channel knows about its
//! own lifecycle (status, attempt counter, reconnect timer, policy flag)
//! and exposes one named transition per event. It performs no I/O: the
//! driver in [`channel`](super::channel) feeds it events and acts on
//! what it returns, which keeps every transition testable without a
//! socket.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::LinkError;

// ── ChannelStatus ────────────────────────────────────────────────

/// Externally visible status of a duplex channel.
///
/// ```text
///   Connecting ──► Open
///       │           │
///       ▼           ▼
///     Closed ◄──────┘
///       │
///       └──(after reconnect interval)──► Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// A socket has been created and is being established.
    Connecting,
    /// The socket is established; frames can be sent.
    Open,
    /// No socket. Either waiting to reconnect, torn down, or idle.
    #[default]
    Closed,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl ChannelStatus {
    /// `true` while a socket object exists for the channel.
    pub fn has_socket(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

// ── LinkState ────────────────────────────────────────────────────

/// Snapshot published to observers on every status or attempt change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkState {
    pub status: ChannelStatus,
    pub attempt: u32,
}

// ── ReconnectState ───────────────────────────────────────────────

/// Consecutive-failure bookkeeping for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectState {
    /// Failed connection cycles since the last successful open.
    pub attempt: u32,
    /// When the pending reconnect fires, if one is armed.
    pub timer: Option<Instant>,
}

// ── ChannelMachine ───────────────────────────────────────────────

/// Lifecycle state of one reconnecting duplex channel.
#[derive(Debug, Clone)]
pub struct ChannelMachine {
    status: ChannelStatus,
    reconnect: ReconnectState,
    /// Cleared at the start of teardown; checked before arming any timer.
    reconnect_enabled: bool,
    interval: Duration,
}

impl ChannelMachine {
    /// A fresh machine in `Closed` with the reconnect policy enabled.
    pub fn new(interval: Duration) -> Self {
        Self {
            status: ChannelStatus::Closed,
            reconnect: ReconnectState::default(),
            reconnect_enabled: true,
            interval,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn attempt(&self) -> u32 {
        self.reconnect.attempt
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.reconnect
    }

    /// Deadline of the armed reconnect timer, if any.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect.timer
    }

    /// Delay between a termination and the next attempt.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect_enabled
    }

    pub fn snapshot(&self) -> LinkState {
        LinkState {
            status: self.status,
            attempt: self.reconnect.attempt,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Request a new connection attempt.
    ///
    /// Returns `true` when the caller must create a socket. A request
    /// while `Connecting` or `Open`, or after the policy was disabled,
    /// is a no-op and returns `false`. Starting an attempt cancels any
    /// armed reconnect timer.
    pub fn begin_connect(&mut self) -> bool {
        if !self.reconnect_enabled || self.status.has_socket() {
            return false;
        }
        self.status = ChannelStatus::Connecting;
        self.reconnect.timer = None;
        true
    }

    /// The socket finished establishing.
    ///
    /// Valid from: `Connecting`.
    pub fn on_open(&mut self) -> Result<(), LinkError> {
        match self.status {
            ChannelStatus::Connecting => {
                self.status = ChannelStatus::Open;
                self.reconnect.attempt = 0;
                self.reconnect.timer = None;
                Ok(())
            }
            from => Err(LinkError::InvalidTransition {
                from,
                event: "open",
            }),
        }
    }

    /// The socket failed to establish, errored, or was closed.
    ///
    /// Errors and closes share this one transition. With the policy
    /// enabled the attempt counter increments and a reconnect timer is
    /// armed `interval` after `now`; the deadline is returned.
    ///
    /// Valid from: `Connecting`, `Open`.
    pub fn on_terminated(&mut self, now: Instant) -> Result<Option<Instant>, LinkError> {
        if !self.status.has_socket() {
            return Err(LinkError::InvalidTransition {
                from: self.status,
                event: "terminated",
            });
        }
        self.status = ChannelStatus::Closed;
        if !self.reconnect_enabled {
            return Ok(None);
        }
        self.reconnect.attempt = self.reconnect.attempt.saturating_add(1);
        let deadline = now + self.interval;
        self.reconnect.timer = Some(deadline);
        Ok(Some(deadline))
    }

    /// The reconnect timer fired.
    ///
    /// Returns `true` when a new attempt must start. A stale firing
    /// (policy disabled, timer cancelled, or not yet due) is a no-op.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        match self.reconnect.timer {
            Some(deadline) if deadline <= now && self.reconnect_enabled => {
                self.reconnect.timer = None;
                self.begin_connect()
            }
            _ => false,
        }
    }

    /// Disable the reconnect policy and cancel the pending timer.
    ///
    /// Must run before the live socket is closed so that the resulting
    /// termination does not re-arm a timer.
    pub fn disable(&mut self) {
        self.reconnect_enabled = false;
        self.reconnect.timer = None;
    }

    /// Force the status to `Closed` without touching the counter.
    ///
    /// Used by teardown after the policy has been disabled.
    pub fn force_close(&mut self) {
        self.status = ChannelStatus::Closed;
    }
}

// ── Tests ────────────────────────────────────────────────────────
