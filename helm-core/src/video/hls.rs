//! HLS playback engine.
//!
//! Pulls a live media playlist over HTTPS, joins the stream a short
//! distance behind the live edge, and feeds segments into the attached
//! [`MediaSink`] while keeping the forward buffer under its target.
//! Loading runs on a Tokio task that is aborted on [`destroy`].
//!
//! [`destroy`]: PlaybackEngine::destroy

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::VideoError;
use crate::video::buffer::live_sync_rate;
use crate::video::engine::{
    ErrorDetail, ErrorKind, LowLatencyConfig, MediaSegment, MediaSink, PlaybackEngine,
    PlayerError, PlayerEvent, PlayerEvents, TrackKind, saturating_scale,
};
use crate::video::playlist::{MediaPlaylist, Playlist};

/// Poll interval while the forward buffer is full.
const BUFFER_POLL: Duration = Duration::from_millis(100);

/// Master playlists may point at master playlists; stop eventually.
const MAX_PLAYLIST_HOPS: usize = 3;

type SharedSink = Arc<Mutex<Box<dyn MediaSink>>>;

/// Next media sequence to load. `None` joins at the live edge.
#[derive(Clone, Default)]
struct LoadPosition(Arc<Mutex<Option<u64>>>);

impl LoadPosition {
    fn get(&self) -> Option<u64> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, next: Option<u64>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

/// Persistent HLS player instance.
pub struct HlsEngine {
    config: LowLatencyConfig,
    client: reqwest::Client,
    events: PlayerEvents,
    sink: Option<SharedSink>,
    source: Option<Url>,
    /// Shared with the loader task.
    position: LoadPosition,
    loader: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl HlsEngine {
    pub fn new(config: LowLatencyConfig, events: PlayerEvents) -> Self {
        Self::with_client(config, events, reqwest::Client::new())
    }

    pub fn with_client(config: LowLatencyConfig, events: PlayerEvents, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            events,
            sink: None,
            source: None,
            position: LoadPosition::default(),
            loader: None,
            destroyed: false,
        }
    }

    /// Next media sequence the loader will fetch, once joined.
    pub fn position(&self) -> Option<u64> {
        self.position.get()
    }

    pub fn is_loading(&self) -> bool {
        self.loader.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn ensure_alive(&self) -> Result<(), VideoError> {
        if self.destroyed {
            Err(VideoError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn stop_loader(&mut self) {
        if let Some(handle) = self.loader.take() {
            handle.abort();
        }
    }
}

impl PlaybackEngine for HlsEngine {
    fn attach_media(&mut self, sink: Box<dyn MediaSink>) -> Result<(), VideoError> {
        self.ensure_alive()?;
        self.sink = Some(Arc::new(Mutex::new(sink)));
        self.events.emit(PlayerEvent::MediaAttached);
        Ok(())
    }

    fn load_source(&mut self, url: &str) -> Result<(), VideoError> {
        self.ensure_alive()?;
        let url = Url::parse(url).map_err(|e| VideoError::Playlist(format!("{url}: {e}")))?;
        self.source = Some(url);
        self.position.set(None);
        self.start_load()
    }

    fn start_load(&mut self) -> Result<(), VideoError> {
        self.ensure_alive()?;
        let sink = self.sink.clone().ok_or(VideoError::NotAttached)?;
        let source = self
            .source
            .clone()
            .ok_or_else(|| VideoError::Playlist("no source loaded".into()))?;

        self.stop_loader();
        let loader = Loader {
            client: self.client.clone(),
            config: self.config.clone(),
            source,
            sink,
            events: self.events.clone(),
            position: self.position.clone(),
        };
        debug!("{} loading from {:?}", self.events.session(), self.position());
        self.loader = Some(tokio::spawn(loader.run()));
        Ok(())
    }

    fn recover_media_error(&mut self) -> Result<(), VideoError> {
        self.ensure_alive()?;
        let sink = self.sink.as_ref().ok_or(VideoError::NotAttached)?;
        sink.lock()
            .map_err(|_| VideoError::RecoveryFailed("media sink lock poisoned".into()))?
            .flush();
        self.start_load()
            .map_err(|e| VideoError::RecoveryFailed(e.to_string()))
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.stop_loader();
        if let Some(sink) = self.sink.take() {
            if let Ok(mut sink) = sink.lock() {
                sink.flush();
            }
        }
        self.source = None;
        debug!("{} destroyed", self.events.session());
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ── Loader ───────────────────────────────────────────────────────

struct Loader {
    client: reqwest::Client,
    config: LowLatencyConfig,
    source: Url,
    sink: SharedSink,
    events: PlayerEvents,
    position: LoadPosition,
}

impl Loader {
    async fn run(self) {
        if let Err(error) = self.load_loop().await {
            self.events.error(error);
        }
    }

    /// Runs until the task is aborted, the stream ends, or a fatal
    /// error is returned.
    async fn load_loop(&self) -> Result<(), PlayerError> {
        let mut playlist_url = self.source.clone();
        loop {
            let playlist = self.fetch_media_playlist(&mut playlist_url).await?;

            let max_latency = saturating_scale(
                playlist.target_duration,
                self.config.live_max_latency_duration_count.max(1.0),
            );
            let next = match self.position.get() {
                Some(next)
                    if !playlist.is_behind_window(next)
                        && playlist.duration_from(next) <= max_latency =>
                {
                    next
                }
                previous => {
                    let start =
                        playlist.live_start_sequence(self.config.live_sync_duration_count);
                    if let Some(previous) = previous {
                        debug!(
                            "{} resyncing to live edge: {previous} → {start}",
                            self.events.session()
                        );
                    }
                    self.position.set(Some(start));
                    start
                }
            };

            for segment in playlist.segments_from(next) {
                self.wait_for_room().await;
                let url = resolve(&playlist_url, &segment.uri)?;
                let data = self
                    .fetch_with_retry(&url, ErrorDetail::FragmentLoad)
                    .await?;
                let media = MediaSegment {
                    sequence: segment.sequence,
                    duration: segment.duration,
                    data: data.into(),
                };
                self.append(media)?;
                let after = segment.sequence.checked_add(1).ok_or_else(|| {
                    manifest_parse_error(format!(
                        "media sequence exhausted at {}",
                        segment.sequence
                    ))
                })?;
                self.position.set(Some(after));
            }

            self.update_live_sync(&playlist);

            if playlist.end_list {
                debug!("{} stream ended", self.events.session());
                return Ok(());
            }
            tokio::time::sleep(self.refresh_interval(&playlist)).await;
        }
    }

    async fn fetch_media_playlist(&self, url: &mut Url) -> Result<MediaPlaylist, PlayerError> {
        for _ in 0..MAX_PLAYLIST_HOPS {
            let body = self.fetch_with_retry(url, ErrorDetail::ManifestLoad).await?;
            let text = String::from_utf8_lossy(&body);
            match Playlist::parse(&text) {
                Ok(Playlist::Media(playlist)) => return Ok(playlist),
                Ok(Playlist::Master(variants)) => {
                    let first = variants.first().ok_or_else(|| {
                        manifest_parse_error("master playlist without variants")
                    })?;
                    *url = resolve(url, first)?;
                    trace!("{} following variant {url}", self.events.session());
                }
                Err(e) => return Err(manifest_parse_error(e.to_string())),
            }
        }
        Err(manifest_parse_error("too many nested master playlists"))
    }

    /// GET with bounded retries; the last failure is fatal.
    async fn fetch_with_retry(&self, url: &Url, detail: ErrorDetail) -> Result<Vec<u8>, PlayerError> {
        let mut attempt = 0;
        loop {
            match self.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.config.max_load_retries => {
                    attempt += 1;
                    warn!("{} {url}: {e}; retry {attempt}", self.events.session());
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => {
                    return Err(PlayerError::new(ErrorKind::Network, detail, true, e.to_string()));
                }
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, VideoError> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn wait_for_room(&self) {
        let max_buffer = self.config.max_buffer();
        while self.buffered() >= max_buffer {
            tokio::time::sleep(BUFFER_POLL).await;
        }
    }

    fn buffered(&self) -> Duration {
        self.sink
            .lock()
            .map(|sink| sink.buffered())
            .unwrap_or_default()
    }

    fn append(&self, segment: MediaSegment) -> Result<(), PlayerError> {
        let sequence = segment.sequence;
        let duration = segment.duration;
        let result = match self.sink.lock() {
            Ok(mut sink) => sink.append(segment),
            Err(_) => Err(VideoError::Sink("media sink lock poisoned".into())),
        };
        match result {
            Ok(()) => {
                self.events
                    .emit(PlayerEvent::FragmentBuffered { sequence, duration });
                Ok(())
            }
            // A segment the video buffer cannot take (e.g. audio only)
            // is reported and skipped; loading continues.
            Err(VideoError::Sink(reason)) => {
                self.events.error(
                    PlayerError::new(ErrorKind::Media, ErrorDetail::BufferAppend, false, reason)
                        .on_buffer(TrackKind::Video),
                );
                Ok(())
            }
            Err(e) => Err(PlayerError::new(
                ErrorKind::Media,
                ErrorDetail::BufferAppend,
                true,
                e.to_string(),
            )),
        }
    }

    fn update_live_sync(&self, playlist: &MediaPlaylist) {
        let pending = self
            .position
            .get()
            .map_or(Duration::ZERO, |next| playlist.duration_from(next));
        let latency = self.buffered().saturating_add(pending);
        let target = saturating_scale(
            playlist.target_duration,
            self.config.live_sync_duration_count.max(0.0),
        );
        let rate = live_sync_rate(latency, target, self.config.max_live_sync_playback_rate);
        if let Ok(mut sink) = self.sink.lock() {
            sink.set_playback_rate(rate);
        }
        self.events.emit(PlayerEvent::LiveSync {
            latency,
            playback_rate: rate,
        });
    }

    fn refresh_interval(&self, playlist: &MediaPlaylist) -> Duration {
        let interval = if self.config.low_latency_mode {
            playlist.target_duration / 2
        } else {
            playlist.target_duration
        };
        interval.max(Duration::from_millis(100))
    }
}

fn resolve(base: &Url, reference: &str) -> Result<Url, PlayerError> {
    base.join(reference)
        .map_err(|e| manifest_parse_error(format!("bad uri {reference:?}: {e}")))
}

fn manifest_parse_error(reason: impl Into<String>) -> PlayerError {
    PlayerError::new(ErrorKind::Network, ErrorDetail::ManifestParse, true, reason)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    use super::*;
    use crate::video::buffer::SharedSegmentBuffer;
    use crate::video::engine::{SessionEvent, SessionId};

    // ── Local origin ─────────────────────────────────────────────

    /// Minimal HTTP/1.1 origin: fixed bodies per path, 404 otherwise.
    #[derive(Clone, Default)]
    struct Origin {
        routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        hits: Arc<Mutex<Vec<String>>>,
    }

    impl Origin {
        async fn start() -> (Self, String) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let origin = Origin::default();
            let server = origin.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(server.clone().serve(stream));
                }
            });
            (origin, base)
        }

        fn route(&self, path: &str, body: impl Into<Vec<u8>>) {
            self.routes.lock().unwrap().insert(path.to_string(), body.into());
        }

        fn hits(&self, path: &str) -> usize {
            self.hits.lock().unwrap().iter().filter(|p| *p == path).count()
        }

        async fn serve(self, mut stream: TcpStream) {
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            let head = String::from_utf8_lossy(&request);
            let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
            self.hits.lock().unwrap().push(path.clone());

            let body = self.routes.lock().unwrap().get(&path).cloned();
            let (status, body) = match body {
                Some(body) => ("200 OK", body),
                None => ("404 Not Found", Vec::new()),
            };
            let header = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }
    }

    /// Media playlist of `seg<N>.ts` entries starting at `first`.
    fn media_playlist(first: u64, durations: &[f64], end_list: bool) -> String {
        let mut text = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:{first}\n"
        );
        for (i, secs) in durations.iter().enumerate() {
            text.push_str(&format!("#EXTINF:{secs},\nseg{}.ts\n", first + i as u64));
        }
        if end_list {
            text.push_str("#EXT-X-ENDLIST\n");
        }
        text
    }

    fn route_segments(origin: &Origin, prefix: &str, sequences: std::ops::Range<u64>) {
        for seq in sequences {
            origin.route(&format!("{prefix}/seg{seq}.ts"), b"\x47ts".to_vec());
        }
    }

    fn loader_config() -> LowLatencyConfig {
        LowLatencyConfig {
            max_buffer_secs: 30.0,
            max_load_retries: 1,
            retry_delay_ms: 10,
            ..LowLatencyConfig::default()
        }
    }

    fn loading_engine(
        config: LowLatencyConfig,
    ) -> (HlsEngine, SharedSegmentBuffer, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = PlayerEvents::new(SessionId(7), tx);
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let mut engine = HlsEngine::with_client(config, events, client);
        let buffer = SharedSegmentBuffer::new(Duration::from_secs(15));
        engine.attach_media(Box::new(buffer.clone())).unwrap();
        (engine, buffer, rx)
    }

    /// Skip events until `pick` matches one.
    async fn wait_event<T>(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        mut pick: impl FnMut(PlayerEvent) -> Option<T>,
    ) -> T {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let ev = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("timed out waiting for player event")
                .expect("event channel closed");
            if let Some(found) = pick(ev.event) {
                return found;
            }
        }
    }

    async fn next_buffered(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> u64 {
        wait_event(rx, |ev| match ev {
            PlayerEvent::FragmentBuffered { sequence, .. } => Some(sequence),
            _ => None,
        })
        .await
    }

    async fn next_error(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> PlayerError {
        wait_event(rx, |ev| match ev {
            PlayerEvent::Error(e) => Some(e),
            _ => None,
        })
        .await
    }

    fn engine() -> (HlsEngine, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = PlayerEvents::new(SessionId(1), tx);
        (HlsEngine::new(LowLatencyConfig::default(), events), rx)
    }

    #[tokio::test]
    async fn attach_emits_media_attached() {
        let (mut engine, mut rx) = engine();
        let sink = SharedSegmentBuffer::new(Duration::from_secs(15));
        engine.attach_media(Box::new(sink)).unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.session, SessionId(1));
        assert_eq!(ev.event, PlayerEvent::MediaAttached);
    }

    #[tokio::test]
    async fn load_requires_attached_media() {
        let (mut engine, _rx) = engine();
        assert!(matches!(engine.start_load(), Err(VideoError::NotAttached)));
        assert!(matches!(
            engine.load_source("https://stream.test/hls/stream.m3u8"),
            Err(VideoError::NotAttached)
        ));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_final() {
        let (mut engine, _rx) = engine();
        let shared = SharedSegmentBuffer::new(Duration::from_secs(15));
        let mut sink = shared.clone();
        sink.append(MediaSegment {
            sequence: 1,
            duration: Duration::from_millis(500),
            data: bytes::Bytes::from_static(b"ts"),
        })
        .unwrap();
        engine.attach_media(Box::new(sink)).unwrap();

        engine.destroy();
        engine.destroy();
        assert_eq!(shared.lock().retained_bytes(), 0);
        assert!(!engine.is_loading());
        assert!(matches!(
            engine.attach_media(Box::new(shared.clone())),
            Err(VideoError::Destroyed)
        ));
        assert!(matches!(engine.recover_media_error(), Err(VideoError::Destroyed)));
    }

    // ── Loader ───────────────────────────────────────────────────

    #[tokio::test]
    async fn joins_behind_live_edge_and_resyncs() {
        let (origin, base) = Origin::start().await;
        origin.route("/live.m3u8", media_playlist(10, &[1.0, 1.0, 1.0, 1.0, 0.5], false));
        route_segments(&origin, "", 10..15);

        let (mut engine, buffer, mut rx) = loading_engine(loader_config());
        engine.load_source(&format!("{base}/live.m3u8")).unwrap();

        // 1.5 target durations behind the edge: 0.5 s + 1 s.
        assert_eq!(next_buffered(&mut rx).await, 13);
        assert_eq!(next_buffered(&mut rx).await, 14);
        for seq in 10..13 {
            assert_eq!(origin.hits(&format!("/seg{seq}.ts")), 0);
        }

        // The window slides past our position: jump to the new edge.
        origin.route("/live.m3u8", media_playlist(30, &[1.0, 1.0, 1.0, 1.0, 0.5], false));
        route_segments(&origin, "", 30..35);
        assert_eq!(next_buffered(&mut rx).await, 33);
        assert_eq!(next_buffered(&mut rx).await, 34);
        for seq in 30..33 {
            assert_eq!(origin.hits(&format!("/seg{seq}.ts")), 0);
        }
        assert_eq!(buffer.lock().pending(), 4);

        engine.destroy();
        assert!(!engine.is_loading());
    }

    #[tokio::test]
    async fn playlist_failure_is_fatal_after_retries() {
        let (origin, base) = Origin::start().await;
        let (mut engine, _buffer, mut rx) = loading_engine(loader_config());
        engine.load_source(&format!("{base}/live.m3u8")).unwrap();

        let error = next_error(&mut rx).await;
        assert!(error.fatal);
        assert_eq!(error.kind, ErrorKind::Network);
        assert_eq!(error.detail, ErrorDetail::ManifestLoad);
        assert_eq!(origin.hits("/live.m3u8"), 2);
        assert_eq!(engine.position(), None);
    }

    #[tokio::test]
    async fn follows_master_playlist_variant() {
        let (origin, base) = Origin::start().await;
        origin.route(
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n",
        );
        origin.route("/low/index.m3u8", media_playlist(1, &[1.0], true));
        route_segments(&origin, "/low", 1..2);

        let (mut engine, _buffer, mut rx) = loading_engine(loader_config());
        engine.load_source(&format!("{base}/master.m3u8")).unwrap();

        assert_eq!(next_buffered(&mut rx).await, 1);
        assert_eq!(origin.hits("/low/seg1.ts"), 1);
        assert_eq!(origin.hits("/seg1.ts"), 0);
    }

    #[tokio::test]
    async fn rejected_segment_is_skipped() {
        let (origin, base) = Origin::start().await;
        origin.route("/vod.m3u8", media_playlist(0, &[1.0, 1.0], true));
        origin.route("/seg0.ts", Vec::new());
        route_segments(&origin, "", 1..2);

        let (mut engine, _buffer, mut rx) = loading_engine(loader_config());
        engine.load_source(&format!("{base}/vod.m3u8")).unwrap();

        let error = next_error(&mut rx).await;
        assert!(!error.fatal);
        assert_eq!(error.kind, ErrorKind::Media);
        assert_eq!(error.detail, ErrorDetail::BufferAppend);
        assert_eq!(error.buffer, Some(TrackKind::Video));
        assert_eq!(next_buffered(&mut rx).await, 1);
    }

    #[tokio::test]
    async fn growing_latency_speeds_up_playback() {
        let (origin, base) = Origin::start().await;
        origin.route("/live.m3u8", media_playlist(0, &[1.0, 1.0], false));
        route_segments(&origin, "", 0..4);

        let config = LowLatencyConfig {
            live_sync_duration_count: 1.0,
            ..loader_config()
        };
        let (mut engine, buffer, mut rx) = loading_engine(config);
        engine.load_source(&format!("{base}/live.m3u8")).unwrap();

        let rate = |ev: PlayerEvent| match ev {
            PlayerEvent::LiveSync { playback_rate, .. } => Some(playback_rate),
            _ => None,
        };
        assert_eq!(wait_event(&mut rx, rate).await, 1.0);
        assert_eq!(origin.hits("/seg0.ts"), 0);

        // Nothing plays out, so two more segments put us 3 s behind.
        origin.route("/live.m3u8", media_playlist(0, &[1.0, 1.0, 1.0, 1.0], false));
        assert_eq!(wait_event(&mut rx, rate).await, 1.2);
        assert_eq!(buffer.lock().playback_rate(), 1.2);
        assert_eq!(engine.position(), Some(4));
    }
}
