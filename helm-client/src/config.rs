//! Operator client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use helm_core::{ChannelConfig, ControllerConfig, LowLatencyConfig};

/// Top-level configuration for the operator client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Control and telemetry channels.
    pub link: LinkConfig,
    /// Live video.
    pub video: VideoConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Duplex channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Control endpoint; empty leaves the channel idle.
    pub control_url: String,
    /// Telemetry endpoint; empty leaves the channel idle.
    pub telemetry_url: String,
    /// Delay before reconnecting after a close, in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound frames buffered per channel.
    pub outbound_capacity: usize,
    /// Inbound frames buffered per channel before dropping.
    pub inbound_capacity: usize,
}

/// Video settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    /// HLS media or master playlist.
    pub stream_url: String,
    /// Window in which a second media fault is fatal, in milliseconds.
    pub media_recovery_window_ms: u64,
    /// Player tuning.
    pub player: LowLatencyConfig,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            control_url: "wss://pi.wizzwatts.com/input".into(),
            telemetry_url: "wss://pi.wizzwatts.com/gps".into(),
            reconnect_interval_ms: 3000,
            connect_timeout_ms: 5000,
            outbound_capacity: 32,
            inbound_capacity: 64,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stream_url: "https://pi.wizzwatts.com/hls/stream.m3u8".into(),
            media_recovery_window_ms: 3000,
            player: LowLatencyConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────

impl LinkConfig {
    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            outbound_capacity: self.outbound_capacity,
            inbound_capacity: self.inbound_capacity,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl VideoConfig {
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            stream_url: self.stream_url.clone(),
            player: self.player.clone(),
            media_recovery_window: Duration::from_millis(self.media_recovery_window_ms),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
