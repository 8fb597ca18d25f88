//! # helm-client: operator console for the remote helm
//!
//! Runs on the operator's machine. Opens the control and telemetry
//! links to the vessel, plays the live video stream, and turns console
//! commands into control frames.

pub mod config;
pub mod console;
pub mod simulator;
