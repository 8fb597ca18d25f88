//! Telemetry channel: vessel → client GPS fixes.
//!
//! ```text
//! vessel ──► DuplexChannel (telemetry) ──► TelemetryConsumer ──► watch<Option<Position>>
//!   Payload: {"lat": f64, "lng": f64, "course_deg": f64}   (JSON text)
//! ```

pub mod consumer;
pub mod fix;

pub use consumer::{Position, TelemetryConsumer, TelemetryStats};
pub use fix::{TelemetryFix, normalize_course, parse_fix};
