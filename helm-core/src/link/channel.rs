//! Reconnecting duplex channel.
//!
//! A [`DuplexChannel`] owns exactly one logical connection to a fixed
//! [`Endpoint`]. A single driver task holds the socket, the
//! [`ChannelMachine`] and the reconnect timer, and processes every event
//! (socket open/close/error, inbound frames, timer firings, commands
//! from the handle) strictly in the order it is delivered.
//!
//! ```text
//!   handle ──send()──► outbound mpsc ──► driver ──► Socket ──► vehicle
//!   handle ◄─watch──── LinkState       ◄─┘   └──► inbound mpsc ──► consumer
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::link::endpoint::Endpoint;
use crate::link::socket::{Connector, Socket};
use crate::link::state::{ChannelMachine, ChannelStatus, LinkState};

/// Upper bound on flushing and closing a socket that is going away.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── ChannelConfig ────────────────────────────────────────────────

/// Tunables for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Delay between a termination and the next connection attempt.
    pub reconnect_interval: Duration,
    /// Outbound frames buffered between `send` and the socket.
    pub outbound_capacity: usize,
    /// Inbound frames buffered for the consumer before dropping.
    pub inbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(3000),
            outbound_capacity: 32,
            inbound_capacity: 64,
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect,
}

// ── DuplexChannel ────────────────────────────────────────────────

/// Handle to a reconnecting duplex channel.
///
/// Dropping the handle tears the channel down.
pub struct DuplexChannel {
    endpoint: Option<Endpoint>,
    state_rx: watch::Receiver<LinkState>,
    outbound_tx: mpsc::Sender<String>,
    inbound_rx: Option<mpsc::Receiver<String>>,
    command_tx: mpsc::UnboundedSender<Command>,
    /// Reconnect policy flag shared with the driver.
    reconnect_enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl DuplexChannel {
    /// Create a channel and, if an endpoint is given, start connecting.
    ///
    /// The returned handle already reports `Connecting`. Without an
    /// endpoint the channel stays idle in `Closed` and never touches the
    /// network. Must be called from within a Tokio runtime.
    pub fn spawn(
        endpoint: Option<Endpoint>,
        connector: Arc<dyn Connector>,
        config: ChannelConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let reconnect_enabled = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let mut machine = ChannelMachine::new(config.reconnect_interval);

        let Some(target) = endpoint.clone() else {
            debug!("no endpoint configured; channel stays idle");
            let (_state_tx, state_rx) = watch::channel(machine.snapshot());
            return Self {
                endpoint,
                state_rx,
                outbound_tx,
                inbound_rx: Some(inbound_rx),
                command_tx,
                reconnect_enabled,
                cancel,
                driver: None,
            };
        };

        machine.begin_connect();
        let (state_tx, state_rx) = watch::channel(machine.snapshot());

        let driver = Driver {
            endpoint: target,
            connector,
            machine,
            state_tx,
            outbound_rx,
            inbound_tx,
            command_rx,
            reconnect_enabled: Arc::clone(&reconnect_enabled),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run());

        Self {
            endpoint,
            state_rx,
            outbound_tx,
            inbound_rx: Some(inbound_rx),
            command_tx,
            reconnect_enabled,
            cancel,
            driver: Some(handle),
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// `true` when the channel was created without an endpoint.
    pub fn is_idle(&self) -> bool {
        self.endpoint.is_none()
    }

    pub fn status(&self) -> ChannelStatus {
        self.state_rx.borrow().status
    }

    pub fn attempt(&self) -> u32 {
        self.state_rx.borrow().attempt
    }

    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Watch status and attempt changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Take the receiver of inbound text frames. Only the first call
    /// returns `Some`.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<String>> {
        self.inbound_rx.take()
    }

    /// Ask for a connection attempt now.
    ///
    /// No-op while `Connecting` or `Open`, when idle, or after teardown.
    /// From `Closed` it skips the remaining reconnect delay.
    pub fn connect(&self) {
        if self.driver.is_none() || !self.reconnect_enabled.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(Command::Connect);
    }

    /// Serialize `frame` as JSON and transmit it if the channel is open.
    ///
    /// Returns `false` without transmitting when the channel is not
    /// `Open`, the frame cannot be serialized, or the outbound buffer is
    /// full. Never blocks and never queues for a later connection.
    pub fn send<T: Serialize + ?Sized>(&self, frame: &T) -> bool {
        if self.status() != ChannelStatus::Open {
            return false;
        }
        match serde_json::to_string(frame) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("dropping unserializable frame: {}", LinkError::from(e));
                false
            }
        }
    }

    /// Transmit an already serialized text frame if the channel is open.
    pub fn send_text(&self, text: String) -> bool {
        if self.status() != ChannelStatus::Open {
            return false;
        }
        self.outbound_tx.try_send(text).is_ok()
    }

    /// Stop the channel: disable reconnects, cancel the pending timer and
    /// close the live socket.
    ///
    /// Returns once the socket is closed and the driver has exited.
    /// Safe to call any number of times.
    pub async fn teardown(&mut self) {
        self.shutdown();
        if let Some(handle) = self.driver.take() {
            let _ = handle.await;
        }
    }

    /// Synchronous half of teardown. The policy flag is cleared before
    /// the driver is cancelled so that a close racing with the
    /// cancellation cannot arm a new timer.
    fn shutdown(&self) {
        self.reconnect_enabled.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexChannel")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

// ── Driver ───────────────────────────────────────────────────────

enum OpenEvent {
    Cancelled,
    Connect,
    Outbound(String),
    Inbound(Option<Result<String, LinkError>>),
}

enum Served {
    Cancelled,
    Terminated,
}

enum ClosedEvent {
    Cancelled,
    Connect,
    TimerFired,
    Discarded,
}

struct Driver {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    machine: ChannelMachine,
    state_tx: watch::Sender<LinkState>,
    outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<String>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    reconnect_enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        let mut socket: Option<Box<dyn Socket>> = None;

        loop {
            let cancelled = match self.machine.status() {
                ChannelStatus::Connecting => self.establish(&mut socket).await,
                ChannelStatus::Open => {
                    let served = match socket.as_mut() {
                        Some(live) => self.serve(live).await,
                        None => {
                            self.terminate(None).await;
                            Served::Terminated
                        }
                    };
                    match served {
                        Served::Cancelled => true,
                        Served::Terminated => {
                            socket = None;
                            false
                        }
                    }
                }
                ChannelStatus::Closed => self.wait_closed().await,
            };
            if cancelled {
                break;
            }
        }

        // Teardown: policy off first, then the socket goes. Frames the
        // handle accepted before teardown (e.g. an all-stop) still go out.
        self.machine.disable();
        if let Some(mut live) = socket.take() {
            let flushed = tokio::time::timeout(CLOSE_TIMEOUT, async {
                while let Ok(text) = self.outbound_rx.try_recv() {
                    if let Err(e) = live.send_text(text).await {
                        debug!("{} flush on teardown failed: {e}", self.endpoint);
                        break;
                    }
                }
                live.close().await;
            })
            .await;
            if flushed.is_err() {
                warn!("{} close timed out", self.endpoint);
            }
        }
        self.machine.force_close();
        self.publish();
        info!("{} torn down", self.endpoint);
    }

    /// Drive one connection attempt. Returns `true` when cancelled.
    async fn establish(&mut self, socket: &mut Option<Box<dyn Socket>>) -> bool {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let cancel = self.cancel.clone();
        let connect = connector.connect(&endpoint);
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                Some(Command::Connect) = self.command_rx.recv() => {
                    trace!("{} connect requested while connecting; ignored", self.endpoint);
                }
                result = &mut connect => break result,
            }
        };

        match result {
            Ok(live) => {
                if let Err(e) = self.machine.on_open() {
                    warn!("{}: {e}", self.endpoint);
                }
                *socket = Some(live);
                self.publish();
                info!("{} open", self.endpoint);
            }
            Err(e) => {
                warn!("{} connect failed: {e}", self.endpoint);
                self.terminate(None).await;
            }
        }
        false
    }

    /// Serve an open socket until it terminates or the channel is
    /// cancelled. A terminated socket has already been closed.
    async fn serve(&mut self, live: &mut Box<dyn Socket>) -> Served {
        let cancel = self.cancel.clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => OpenEvent::Cancelled,
                Some(Command::Connect) = self.command_rx.recv() => OpenEvent::Connect,
                Some(text) = self.outbound_rx.recv() => OpenEvent::Outbound(text),
                msg = live.next_text() => OpenEvent::Inbound(msg),
            };

            match event {
                OpenEvent::Cancelled => return Served::Cancelled,
                OpenEvent::Connect => {
                    trace!("{} connect requested while open; ignored", self.endpoint);
                }
                OpenEvent::Outbound(text) => {
                    if let Err(e) = live.send_text(text).await {
                        warn!("{} send failed: {e}", self.endpoint);
                        self.terminate(Some(live)).await;
                        return Served::Terminated;
                    }
                }
                OpenEvent::Inbound(Some(Ok(text))) => self.deliver(text),
                OpenEvent::Inbound(Some(Err(e))) => {
                    // Transport errors force the socket closed and take
                    // the same path as a remote close.
                    warn!("{} transport error: {e}", self.endpoint);
                    self.terminate(Some(live)).await;
                    return Served::Terminated;
                }
                OpenEvent::Inbound(None) => {
                    info!("{} closed by peer", self.endpoint);
                    self.terminate(Some(live)).await;
                    return Served::Terminated;
                }
            }
        }
    }

    /// Wait in `Closed` for the reconnect timer or an explicit connect.
    /// Returns `true` when cancelled.
    async fn wait_closed(&mut self) -> bool {
        let cancel = self.cancel.clone();
        let deadline = self.machine.reconnect_deadline();
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => ClosedEvent::Cancelled,
            Some(Command::Connect) = self.command_rx.recv() => ClosedEvent::Connect,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                ClosedEvent::TimerFired
            }
            Some(_) = self.outbound_rx.recv() => ClosedEvent::Discarded,
        };

        match event {
            ClosedEvent::Cancelled => return true,
            ClosedEvent::Connect => {
                if self.policy_enabled() && self.machine.begin_connect() {
                    debug!("{} reconnecting on request", self.endpoint);
                    self.publish();
                }
            }
            ClosedEvent::TimerFired => {
                if self.policy_enabled() && self.machine.on_timer(Instant::now()) {
                    debug!(
                        "{} reconnect attempt {}",
                        self.endpoint,
                        self.machine.attempt()
                    );
                    self.publish();
                }
            }
            ClosedEvent::Discarded => trace!("{} dropped frame while closed", self.endpoint),
        }
        false
    }

    /// Unified error/close path: close the socket (if any), move to
    /// `Closed`, and arm the reconnect timer while the policy allows.
    async fn terminate(&mut self, live: Option<&mut Box<dyn Socket>>) {
        if let Some(live) = live {
            if tokio::time::timeout(CLOSE_TIMEOUT, live.close()).await.is_err() {
                warn!("{} close timed out", self.endpoint);
            }
        }
        self.sync_policy();
        match self.machine.on_terminated(Instant::now()) {
            Ok(Some(_)) => info!(
                "{} closed; retrying in {:?} (attempt {})",
                self.endpoint,
                self.machine.interval(),
                self.machine.attempt()
            ),
            Ok(None) => info!("{} closed", self.endpoint),
            Err(e) => warn!("{}: {e}", self.endpoint),
        }
        // Frames queued for the dead socket are stale.
        while self.outbound_rx.try_recv().is_ok() {}
        self.publish();
    }

    fn deliver(&self, text: String) {
        match self.inbound_tx.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("{} inbound buffer full; dropping frame", self.endpoint)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("{} no inbound consumer", self.endpoint)
            }
        }
    }

    /// Disable the machine once the shared policy flag is cleared.
    fn sync_policy(&mut self) {
        if !self.reconnect_enabled.load(Ordering::SeqCst) {
            self.machine.disable();
        }
    }

    /// Whether reconnecting is still allowed, after syncing the flag.
    fn policy_enabled(&mut self) -> bool {
        self.sync_policy();
        self.machine.reconnect_enabled()
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.snapshot());
    }
}

// ── Tests ────────────────────────────────────────────────────────
