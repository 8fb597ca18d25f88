//! Integration tests: channel lifecycle, control and telemetry over an
//! in-memory vessel, and the video session policy with a scripted engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use helm_core::link::{MemoryListener, MemoryPeer};
use helm_core::video::{
    ErrorDetail, ErrorKind, MediaSegment, MediaSink, PlayerError, PlayerEvent, PlayerEvents,
};
use helm_core::{
    ChannelConfig, ChannelStatus, ControlPublisher, ControllerConfig, DuplexChannel, Endpoint,
    LinkState, MemoryConnector, PlaybackEngine, Position, SharedSegmentBuffer, TelemetryConsumer,
    VideoController, VideoError, VideoState,
};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

// ── Helpers ──────────────────────────────────────────────────────

fn vessel(path: &str) -> (DuplexChannel, MemoryListener) {
    let (connector, listener) = MemoryConnector::new();
    let endpoint = assert_ok!(Endpoint::parse(&format!("wss://vessel.test/{path}")));
    let channel =
        DuplexChannel::spawn(Some(endpoint), Arc::new(connector), ChannelConfig::default());
    (channel, listener)
}

async fn wait_status(channel: &DuplexChannel, status: ChannelStatus) -> LinkState {
    let mut rx = channel.subscribe();
    let state = *rx.wait_for(|s| s.status == status).await.unwrap();
    state
}

async fn accept_next(listener: &mut MemoryListener) -> MemoryPeer {
    listener.next().await.expect("connector alive").accept()
}

// ── Duplex channel ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connect_failure_then_reconnect() {
    let (channel, mut listener) = vessel("input");
    assert_eq!(channel.status(), ChannelStatus::Connecting);

    listener.next().await.unwrap().refuse("connection refused");
    let state = wait_status(&channel, ChannelStatus::Closed).await;
    assert_eq!(state.attempt, 1);

    let refused_at = Instant::now();
    let _retry = listener.next().await.unwrap();
    assert!(refused_at.elapsed() >= Duration::from_millis(3000));
    assert_eq!(channel.status(), ChannelStatus::Connecting);
    assert_eq!(channel.attempt(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_during_armed_timer() {
    let (mut channel, mut listener) = vessel("input");
    listener.next().await.unwrap().refuse("connection refused");
    wait_status(&channel, ChannelStatus::Closed).await;

    channel.teardown().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // The driver is gone and took the connector with it: no new socket.
    assert!(listener.next().await.is_none());
    assert_eq!(channel.status(), ChannelStatus::Closed);
    assert_eq!(channel.attempt(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_counter_over_open_close_sequence() {
    let (channel, mut listener) = vessel("input");

    let mut peer = accept_next(&mut listener).await;
    assert_eq!(wait_status(&channel, ChannelStatus::Open).await.attempt, 0);

    peer.close();
    assert_eq!(wait_status(&channel, ChannelStatus::Closed).await.attempt, 1);

    listener.next().await.unwrap().refuse("still down");
    let mut rx = channel.subscribe();
    let state = *rx
        .wait_for(|s| s.status == ChannelStatus::Closed && s.attempt == 2)
        .await
        .unwrap();
    assert_eq!(state.attempt, 2);

    let _peer = accept_next(&mut listener).await;
    assert_eq!(wait_status(&channel, ChannelStatus::Open).await.attempt, 0);
}

// ── Control ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_control_frames_reach_vessel() {
    let (channel, mut listener) = vessel("input");
    let mut publisher = ControlPublisher::new(channel);

    // Not open yet: dropped, nothing transmitted.
    assert!(!publisher.set_throttle(40.0));
    assert_eq!(publisher.dropped(), 1);

    let mut peer = accept_next(&mut listener).await;
    wait_status(publisher.channel(), ChannelStatus::Open).await;

    assert!(publisher.set_throttle(40.0));
    assert_eq!(peer.recv().await.unwrap(), r#"{"steer":0.0,"thr":0.4,"brk":0.0}"#);

    assert!(publisher.set_throttle(-25.0));
    assert_eq!(peer.recv().await.unwrap(), r#"{"steer":0.0,"thr":0.0,"brk":0.25}"#);

    assert!(publisher.play_sound(helm_core::Sound::Horn));
    assert_eq!(peer.recv().await.unwrap(), r#"{"sound":"horn.wav"}"#);
    assert_eq!(publisher.published(), 3);

    publisher.teardown().await;
    assert!(peer.recv().await.is_none());
    assert!(!publisher.all_stop());
}

#[tokio::test(start_paused = true)]
async fn test_all_stop_before_teardown_reaches_vessel() {
    let (channel, mut listener) = vessel("input");
    let mut publisher = ControlPublisher::new(channel);
    let mut peer = accept_next(&mut listener).await;
    wait_status(publisher.channel(), ChannelStatus::Open).await;

    assert!(publisher.set_throttle(60.0));
    assert_eq!(peer.recv().await.unwrap(), r#"{"steer":0.0,"thr":0.6,"brk":0.0}"#);

    // Shutdown order used by the client: all-stop, then teardown.
    assert!(publisher.all_stop());
    publisher.teardown().await;

    assert_eq!(peer.recv().await.unwrap(), r#"{"steer":0.0,"thr":0.0,"brk":0.0}"#);
    assert!(peer.recv().await.is_none());
}

// ── Telemetry ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_telemetry_over_channel() {
    let (mut channel, mut listener) = vessel("gps");
    let inbound = channel.take_inbound().unwrap();

    let mut consumer = TelemetryConsumer::new();
    let mut positions = consumer.subscribe();
    let task = tokio::spawn(async move {
        consumer.run(inbound).await;
        consumer
    });

    let peer = accept_next(&mut listener).await;
    assert!(peer.send(r#"{"lat":1,"lng":2,"course_deg":90}"#));
    assert!(peer.send(r#"{"lat":null,"lng":2}"#));
    assert!(peer.send(r#"{"lat":3,"lng":4}"#));

    let latest = *positions
        .wait_for(|p| p.is_some_and(|p| p.lat == 3.0))
        .await
        .unwrap();
    assert_eq!(
        latest,
        Some(Position {
            lat: 3.0,
            lng: 4.0,
            course: Some(90.0),
        })
    );

    // Closing the channel ends the consumer loop.
    channel.teardown().await;
    let consumer = task.await.unwrap();
    let stats = consumer.stats();
    assert_eq!((stats.accepted, stats.rejected), (2, 1));
}

// ── Video ────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Script {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl Script {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

/// Engine that appends one segment per load and records every call.
struct ScriptedEngine {
    script: Script,
    events: PlayerEvents,
    sink: Option<Box<dyn MediaSink>>,
    next: u64,
}

impl ScriptedEngine {
    fn push_segment(&mut self) -> Result<(), VideoError> {
        let sink = self.sink.as_mut().ok_or(VideoError::NotAttached)?;
        self.next += 1;
        sink.append(MediaSegment {
            sequence: self.next,
            duration: Duration::from_millis(500),
            data: Bytes::from_static(b"\x47"),
        })
    }
}

impl PlaybackEngine for ScriptedEngine {
    fn attach_media(&mut self, sink: Box<dyn MediaSink>) -> Result<(), VideoError> {
        self.script.calls.lock().unwrap().push("attach");
        self.sink = Some(sink);
        self.events.emit(PlayerEvent::MediaAttached);
        Ok(())
    }

    fn load_source(&mut self, _url: &str) -> Result<(), VideoError> {
        self.script.calls.lock().unwrap().push("load");
        self.push_segment()
    }

    fn start_load(&mut self) -> Result<(), VideoError> {
        self.script.calls.lock().unwrap().push("start_load");
        self.push_segment()
    }

    fn recover_media_error(&mut self) -> Result<(), VideoError> {
        self.script.calls.lock().unwrap().push("recover");
        Ok(())
    }

    fn destroy(&mut self) {
        self.script.calls.lock().unwrap().push("destroy");
        if let Some(mut sink) = self.sink.take() {
            sink.flush();
        }
    }
}

fn video(script: &Script) -> VideoController<ScriptedEngine> {
    let script = script.clone();
    VideoController::new(ControllerConfig::default(), move |_, events| ScriptedEngine {
        script: script.clone(),
        events,
        sink: None,
        next: 0,
    })
}

#[tokio::test]
async fn test_video_session_survives_recoverable_errors() {
    let script = Script::default();
    let buffer = SharedSegmentBuffer::new(Duration::from_secs(15));
    let mut controller = video(&script);

    let session = assert_ok!(controller.mount(Box::new(buffer.clone())));
    controller.process_pending();
    assert_eq!(controller.state(), VideoState::Playing { session: session.0 });
    assert_eq!(buffer.lock().pending(), 1);

    let events = controller.engine().unwrap().events.clone();
    events.error(
        PlayerError::new(ErrorKind::Media, ErrorDetail::BufferAppend, false, "audio track")
            .on_buffer(helm_core::video::TrackKind::Video),
    );
    events.error(PlayerError::new(
        ErrorKind::Network,
        ErrorDetail::FragmentLoad,
        true,
        "timed out",
    ));
    controller.process_pending();

    assert_eq!(controller.session(), Some(session));
    assert_eq!(script.calls(), vec!["attach", "load", "start_load"]);
    assert_eq!(buffer.lock().pending(), 2);
}

#[tokio::test]
async fn test_video_fatal_error_releases_buffers() {
    let script = Script::default();
    let buffer = SharedSegmentBuffer::new(Duration::from_secs(15));
    let mut controller = video(&script);
    let session = assert_ok!(controller.mount(Box::new(buffer.clone())));
    controller.process_pending();

    let events = controller.engine().unwrap().events.clone();
    events.error(PlayerError::new(
        ErrorKind::Other,
        ErrorDetail::Internal,
        true,
        "decoder crashed",
    ));
    controller.process_pending();

    assert_eq!(controller.session(), None);
    assert!(matches!(controller.state(), VideoState::Failed { .. }));
    assert_eq!(buffer.lock().retained_bytes(), 0);
    assert_eq!(script.calls().last(), Some(&"destroy"));
}

#[tokio::test]
async fn test_video_mount_failure_is_reported() {
    struct Refusing;
    impl PlaybackEngine for Refusing {
        fn attach_media(&mut self, _sink: Box<dyn MediaSink>) -> Result<(), VideoError> {
            Err(VideoError::Sink("no decoder".into()))
        }
        fn load_source(&mut self, _url: &str) -> Result<(), VideoError> {
            Ok(())
        }
        fn start_load(&mut self) -> Result<(), VideoError> {
            Ok(())
        }
        fn recover_media_error(&mut self) -> Result<(), VideoError> {
            Ok(())
        }
        fn destroy(&mut self) {}
    }

    let mut controller = VideoController::new(ControllerConfig::default(), |_, _| Refusing);
    let buffer = SharedSegmentBuffer::new(Duration::from_secs(15));
    assert_err!(controller.mount(Box::new(buffer)));
    assert_eq!(controller.session(), None);
    assert_eq!(controller.state(), VideoState::Idle);
}
