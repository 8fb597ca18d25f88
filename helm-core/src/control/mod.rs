//! Control channel payloads and publisher.
//!
//! ```text
//! UI steer/throttle ──► ControlPublisher ──► DuplexChannel (control) ──► vessel
//!   Payload: {"steer": f64, "thr": f64, "brk": f64}   (JSON text)
//!   Payload: {"sound": "horn.wav"}                    (JSON text)
//! ```

pub mod frame;
pub mod publisher;

pub use frame::{ControlFrame, Sound, SoundCommand};
pub use publisher::ControlPublisher;
