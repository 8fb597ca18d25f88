//! helm-client: operator client entry point.
//!
//! ```text
//! helm-client                     Connect with defaults
//! helm-client --config <path>     Use custom config TOML
//! helm-client --simulate          Dry run against an in-memory vessel
//! helm-client --gen-config        Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

use helm_core::{
    Connector, ControlPublisher, DuplexChannel, Endpoint, HelmError, HlsEngine, LinkState,
    LowLatencyConfig, MemoryConnector, Position, SharedSegmentBuffer, Sound, TelemetryConsumer,
    VideoController, WsConnector,
};
use helm_core::video::saturating_scale;

use helm_client::config::ClientConfig;
use helm_client::console::{ConsoleCommand, StatusReport};
use helm_client::simulator;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "helm-client", about = "Remote helm: control, telemetry and live video")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "helm-client.toml")]
    config: PathBuf,

    /// Control endpoint (overrides config). Example: wss://vessel.local/input
    #[arg(long)]
    control: Option<String>,

    /// Telemetry endpoint (overrides config).
    #[arg(long)]
    telemetry: Option<String>,

    /// HLS stream URL (overrides config).
    #[arg(long)]
    stream: Option<String>,

    /// Do not start the video player.
    #[arg(long)]
    no_video: bool,

    /// Talk to a simulated vessel instead of the network. Implies --no-video.
    #[arg(long)]
    simulate: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), HelmError> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())
            .map_err(|e| HelmError::Other(e.to_string()))?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(url) = cli.control {
        config.link.control_url = url;
    }
    if let Some(url) = cli.telemetry {
        config.link.telemetry_url = url;
    }
    if let Some(url) = cli.stream {
        config.video.stream_url = url;
    }
    if cli.no_video || cli.simulate {
        config.video.enabled = false;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("helm-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Open the links ───────────────────────────────────────

    let connector: Arc<dyn Connector> = if cli.simulate {
        let (connector, listener) = MemoryConnector::new();
        tokio::spawn(simulator::run(listener));
        info!("simulated vessel");
        Arc::new(connector)
    } else {
        Arc::new(WsConnector::new(config.link.connect_timeout()))
    };

    let control_endpoint = Endpoint::parse_optional(&config.link.control_url)?;
    let telemetry_endpoint = Endpoint::parse_optional(&config.link.telemetry_url)?;

    let control = DuplexChannel::spawn(control_endpoint, Arc::clone(&connector), config.link.channel());
    let mut telemetry = DuplexChannel::spawn(telemetry_endpoint, connector, config.link.channel());
    let mut publisher = ControlPublisher::new(control);

    // ── 2. Telemetry ────────────────────────────────────────────

    let inbound = telemetry
        .take_inbound()
        .ok_or_else(|| HelmError::Other("telemetry inbound already taken".into()))?;
    let mut consumer = TelemetryConsumer::new();
    let positions = consumer.subscribe();
    let consumer_handle = tokio::spawn(async move {
        consumer.run(inbound).await;
        consumer
    });

    let monitor_handle = tokio::spawn(monitor(
        publisher.channel().subscribe(),
        telemetry.subscribe(),
        positions.clone(),
    ));

    // ── 3. Video ────────────────────────────────────────────────

    let cancel = CancellationToken::new();
    let video = if config.video.enabled {
        let buffer = SharedSegmentBuffer::new(config.video.player.back_buffer());
        let mut controller = VideoController::new(
            config.video.controller(),
            |player: &LowLatencyConfig, events| HlsEngine::new(player.clone(), events),
        );
        controller.mount(Box::new(buffer.clone()))?;
        let state = controller.subscribe();
        let mut transitions = state.clone();
        tokio::spawn(async move {
            while transitions.changed().await.is_ok() {
                info!("video {}", *transitions.borrow_and_update());
            }
        });
        let token = cancel.clone();
        let controller_handle = tokio::spawn(async move { controller.run(token).await });
        let playout_handle = tokio::spawn(play_out(buffer, cancel.clone()));
        Some((state, controller_handle, playout_handle))
    } else {
        info!("video disabled");
        None
    };
    let video_state = video.as_ref().map(|(state, _, _)| state.clone());

    // ── 4. Operator console ─────────────────────────────────────

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line,
        };
        let line = match input {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                warn!("stdin: {e}");
                break;
            }
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                println!("error: {msg}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Steer(x) => report("steer", publisher.set_steer(x)),
            ConsoleCommand::Throttle(v) => report("throttle", publisher.set_throttle(v)),
            ConsoleCommand::Stop => report("stop", publisher.all_stop()),
            ConsoleCommand::Horn => report("horn", publisher.play_sound(Sound::Horn)),
            ConsoleCommand::Alarm => report("alarm", publisher.play_sound(Sound::Alarm)),
            ConsoleCommand::Connect => {
                publisher.channel().connect();
                telemetry.connect();
            }
            ConsoleCommand::Status => {
                let status = StatusReport {
                    control: publisher.channel().state(),
                    telemetry: telemetry.state(),
                    position: *positions.borrow(),
                    video: video_state
                        .as_ref()
                        .map(|rx| rx.borrow().clone())
                        .unwrap_or_default(),
                    published: publisher.published(),
                    dropped: publisher.dropped(),
                };
                match serde_json::to_string_pretty(&status) {
                    Ok(text) => println!("{text}"),
                    Err(e) => warn!("status: {e}"),
                }
            }
            ConsoleCommand::Quit => break,
        }
    }

    // ── 5. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    // Leave the vessel stopped if the link is still up.
    publisher.all_stop();
    cancel.cancel();
    if let Some((_, controller_handle, playout_handle)) = video {
        let _ = controller_handle.await;
        let _ = playout_handle.await;
    }
    publisher.teardown().await;
    telemetry.teardown().await;
    monitor_handle.abort();
    if let Ok(consumer) = consumer_handle.await {
        let stats = consumer.stats();
        info!(
            "telemetry: {} fixes accepted, {} rejected",
            stats.accepted, stats.rejected
        );
    }

    Ok(())
}

fn report(what: &str, sent: bool) {
    if sent {
        println!("{what}: sent");
    } else {
        println!("{what}: dropped (control link not open)");
    }
}

enum Update {
    Control,
    Telemetry,
    Position,
    Done,
}

/// Log link transitions and accepted fixes until a source goes away.
async fn monitor(
    mut control: watch::Receiver<LinkState>,
    mut telemetry: watch::Receiver<LinkState>,
    mut position: watch::Receiver<Option<Position>>,
) {
    loop {
        let update = tokio::select! {
            r = control.changed() => r.map_or(Update::Done, |_| Update::Control),
            r = telemetry.changed() => r.map_or(Update::Done, |_| Update::Telemetry),
            r = position.changed() => r.map_or(Update::Done, |_| Update::Position),
        };
        match update {
            Update::Control => {
                let s = *control.borrow_and_update();
                info!("control link {} (attempt {})", s.status, s.attempt);
            }
            Update::Telemetry => {
                let s = *telemetry.borrow_and_update();
                info!("telemetry link {} (attempt {})", s.status, s.attempt);
            }
            Update::Position => {
                if let Some(p) = *position.borrow_and_update() {
                    debug!("position {:.6},{:.6} course {:?}", p.lat, p.lng, p.course);
                }
            }
            Update::Done => return,
        }
    }
}

/// Headless renderer: consumes buffered segments in real time.
async fn play_out(buffer: SharedSegmentBuffer, cancel: CancellationToken) {
    let mut appended = buffer.appended();
    loop {
        let next = buffer.lock().play_next();
        match next {
            Some(segment) => {
                let rate = buffer.lock().playback_rate().max(0.1);
                trace!("playing #{} at {rate:.2}x", segment.sequence);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(saturating_scale(segment.duration, rate.recip())) => {}
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    r = appended.changed() => {
                        if r.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
