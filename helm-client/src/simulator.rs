//! Stand-in vessel for dry runs without network access.
//!
//! Accepts every connection made through a [`MemoryConnector`]. Sockets
//! whose path ends in `gps` receive a slowly circling position fix once
//! per second; any other socket is treated as a control link and its
//! frames are logged.
//!
//! [`MemoryConnector`]: helm_core::MemoryConnector

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use helm_core::link::{MemoryListener, MemoryPeer};

/// Fix interval of the simulated GPS.
const FIX_INTERVAL: Duration = Duration::from_secs(1);

/// Serve connection attempts until every connector is dropped.
pub async fn run(mut listener: MemoryListener) {
    while let Some(pending) = listener.next().await {
        let path = pending.endpoint().url().path().to_string();
        let peer = pending.accept();
        info!("simulator accepted {path}");
        if path.ends_with("gps") {
            tokio::spawn(stream_fixes(peer));
        } else {
            tokio::spawn(sink_control(peer));
        }
    }
}

/// Fix `tick` of a slow circle around the harbour.
pub fn fix(tick: u64) -> serde_json::Value {
    let heading = (tick * 6 % 360) as f64;
    let angle = heading.to_radians();
    json!({
        "lat": 43.2965 + 0.001 * angle.cos(),
        "lng": 5.3698 + 0.001 * angle.sin(),
        "course_deg": heading,
    })
}

async fn stream_fixes(peer: MemoryPeer) {
    let mut ticker = tokio::time::interval(FIX_INTERVAL);
    let mut tick = 0;
    loop {
        ticker.tick().await;
        if !peer.send(fix(tick).to_string()) {
            debug!("simulated gps link closed");
            return;
        }
        tick += 1;
    }
}

async fn sink_control(mut peer: MemoryPeer) {
    while let Some(frame) = peer.recv().await {
        debug!("vessel received {frame}");
    }
    debug!("simulated control link closed");
}
