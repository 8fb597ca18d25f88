//! Outbound control payloads.

use serde::{Deserialize, Serialize};

/// Steering / throttle / brake command sent to the vessel.
///
/// Always derived from the raw operator inputs via
/// [`ControlFrame::from_inputs`]; `thr` and `brk` are never both nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Rudder, `-1.0` (full port) to `1.0` (full starboard).
    pub steer: f64,
    /// Forward throttle, `0.0` to `1.0`.
    pub thr: f64,
    /// Reverse / brake, `0.0` to `1.0`.
    pub brk: f64,
}

impl ControlFrame {
    /// Map raw UI values to a frame.
    ///
    /// `steer` is clamped to `[-1, 1]` and `throttle` to `[-100, 100]`;
    /// non-finite values count as zero. Positive throttle drives `thr`,
    /// negative throttle drives `brk`.
    pub fn from_inputs(steer: f64, throttle: f64) -> Self {
        let steer = sanitize(steer).clamp(-1.0, 1.0);
        let throttle = sanitize(throttle).clamp(-100.0, 100.0);
        let (thr, brk) = if throttle >= 0.0 {
            (throttle / 100.0, 0.0)
        } else {
            (0.0, -throttle / 100.0)
        };
        Self { steer, thr, brk }
    }

    /// All-stop: centered rudder, no throttle, no brake.
    pub fn neutral() -> Self {
        Self::default()
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Sound effects the vessel can play on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    Horn,
    Alarm,
}

impl Sound {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Horn => "horn.wav",
            Self::Alarm => "alarm.wav",
        }
    }
}

/// Sound trigger, sent over the control channel alongside
/// [`ControlFrame`]s: `{"sound":"horn.wav"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundCommand {
    pub sound: String,
}

impl From<Sound> for SoundCommand {
    fn from(sound: Sound) -> Self {
        Self {
            sound: sound.file_name().to_string(),
        }
    }
}
