//! Operator input → control channel.

use serde::Serialize;
use tracing::debug;

use crate::control::frame::{ControlFrame, Sound, SoundCommand};
use crate::link::DuplexChannel;

/// Publishes a fresh [`ControlFrame`] on every input change.
///
/// Fire-and-forget: a frame the channel cannot take right now is
/// dropped, and the next input change supersedes it. No queueing, no
/// retries, no rate limiting.
#[derive(Debug)]
pub struct ControlPublisher {
    channel: DuplexChannel,
    steer: f64,
    throttle: f64,
    published: u64,
    dropped: u64,
}

impl ControlPublisher {
    pub fn new(channel: DuplexChannel) -> Self {
        Self {
            channel,
            steer: 0.0,
            throttle: 0.0,
            published: 0,
            dropped: 0,
        }
    }

    /// The underlying control channel (status, attempt, ...).
    pub fn channel(&self) -> &DuplexChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut DuplexChannel {
        &mut self.channel
    }

    /// Frame derived from the current inputs.
    pub fn frame(&self) -> ControlFrame {
        ControlFrame::from_inputs(self.steer, self.throttle)
    }

    /// Update steering (`-1..=1`) and publish.
    pub fn set_steer(&mut self, steer: f64) -> bool {
        self.steer = steer;
        self.publish()
    }

    /// Update throttle (`-100..=100`) and publish.
    pub fn set_throttle(&mut self, throttle: f64) -> bool {
        self.throttle = throttle;
        self.publish()
    }

    /// Update both inputs at once and publish a single frame.
    pub fn set_inputs(&mut self, steer: f64, throttle: f64) -> bool {
        self.steer = steer;
        self.throttle = throttle;
        self.publish()
    }

    /// Zero both inputs and publish.
    pub fn all_stop(&mut self) -> bool {
        self.set_inputs(0.0, 0.0)
    }

    /// Send the current frame. Returns whether the channel accepted it.
    pub fn publish(&mut self) -> bool {
        let frame = self.frame();
        self.send_raw(&frame)
    }

    /// Ask the vessel to play a sound.
    pub fn play_sound(&mut self, sound: Sound) -> bool {
        self.send_raw(&SoundCommand::from(sound))
    }

    /// Send any JSON payload over the control channel.
    pub fn send_raw<T: Serialize + ?Sized>(&mut self, payload: &T) -> bool {
        let sent = self.channel.send(payload);
        if sent {
            self.published += 1;
        } else {
            self.dropped += 1;
            debug!(
                "control frame dropped (channel {})",
                self.channel.status()
            );
        }
        sent
    }

    /// Frames accepted by the channel.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Frames dropped because the channel was not open.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Tear down the underlying channel.
    pub async fn teardown(&mut self) {
        self.channel.teardown().await;
    }
}
