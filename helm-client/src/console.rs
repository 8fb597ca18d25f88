//! Line-oriented operator console.
//!
//! ```text
//! steer <x>       x in -1..=1 (clamped)
//! throttle <v>    v in -100..=100; negative brakes
//! stop            zero steering and throttle
//! horn | alarm    play a sound on the vessel
//! connect         retry both links now
//! status          print link, position and video state
//! quit            tear down and exit
//! ```

use serde::Serialize;

use helm_core::{LinkState, Position, VideoState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Steer(f64),
    Throttle(f64),
    Stop,
    Horn,
    Alarm,
    Connect,
    Status,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. `Ok(None)` for a blank line.
    pub fn parse(input: &str) -> Result<Option<Self>, String> {
        let mut parts = input.split_whitespace();
        let Some(verb) = parts.next() else {
            return Ok(None);
        };
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments: '{}'", input.trim()));
        }

        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("steer", Some(x)) => ConsoleCommand::Steer(number(x)?),
            ("steer", None) => return Err("steer requires a value in -1..1".to_string()),
            ("throttle" | "thr", Some(v)) => ConsoleCommand::Throttle(number(v)?),
            ("throttle" | "thr", None) => {
                return Err("throttle requires a value in -100..100".to_string());
            }
            ("stop", None) => ConsoleCommand::Stop,
            ("horn", None) => ConsoleCommand::Horn,
            ("alarm", None) => ConsoleCommand::Alarm,
            ("connect", None) => ConsoleCommand::Connect,
            ("status", None) => ConsoleCommand::Status,
            ("quit" | "exit", None) => ConsoleCommand::Quit,
            _ => return Err(format!("Unknown command: '{}'", input.trim())),
        };
        Ok(Some(command))
    }
}

fn number(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("not a number: '{text}'")),
    }
}

/// Snapshot printed by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub control: LinkState,
    pub telemetry: LinkState,
    pub position: Option<Position>,
    pub video: VideoState,
    pub published: u64,
    pub dropped: u64,
}
