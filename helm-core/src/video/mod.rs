//! Low-latency live video.
//!
//! | Module       | Purpose                                                |
//! |--------------|--------------------------------------------------------|
//! | `engine`     | `PlaybackEngine` seam, player events, tuning            |
//! | `controller` | Session lifecycle and error tiers                       |
//! | `hls`        | HLS engine over `reqwest`                               |
//! | `playlist`   | Media / master playlist parsing                         |
//! | `buffer`     | Render-side segment buffer and catch-up rate            |

pub mod buffer;
pub mod controller;
pub mod engine;
pub mod hls;
pub mod playlist;

pub use buffer::{SegmentBuffer, SharedSegmentBuffer, live_sync_rate};
pub use controller::{
    ControllerConfig, EngineFactory, ErrorTier, VideoController, VideoState, classify,
};
pub use engine::{
    ErrorDetail, ErrorKind, LowLatencyConfig, MediaSegment, MediaSink, PlaybackEngine,
    PlayerError, PlayerEvent, PlayerEvents, SessionEvent, SessionId, TrackKind, saturating_scale,
    saturating_secs,
};
pub use hls::HlsEngine;
pub use playlist::{MediaPlaylist, Playlist, SegmentRef};
