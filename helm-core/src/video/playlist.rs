//! HLS playlist parsing.
//!
//! Only the subset a live low-latency stream needs: target duration,
//! media sequence, segment durations and URIs, end-list, and variant
//! URIs of a master playlist.

use std::time::Duration;

use crate::error::VideoError;
use crate::video::engine::saturating_scale;

/// A parsed playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    /// Variant stream URIs, in declaration order.
    Master(Vec<String>),
    Media(MediaPlaylist),
}

/// One segment reference inside a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    pub sequence: u64,
    pub duration: Duration,
    pub uri: String,
}

/// A media playlist window.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub segments: Vec<SegmentRef>,
    /// `#EXT-X-ENDLIST` seen: the stream is no longer live.
    pub end_list: bool,
}

impl Playlist {
    pub fn parse(text: &str) -> Result<Self, VideoError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err(VideoError::Playlist("missing #EXTM3U header".into()));
        }

        let mut target_duration = None;
        let mut media_sequence = 0u64;
        let mut segments = Vec::new();
        let mut variants = Vec::new();
        let mut end_list = false;
        let mut pending_duration: Option<Duration> = None;
        let mut pending_variant = false;

        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                target_duration = Some(parse_duration(value, "target duration")?);
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                media_sequence = value
                    .parse()
                    .map_err(|_| VideoError::Playlist(format!("bad media sequence {value:?}")))?;
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let secs = value.split(',').next().unwrap_or_default();
                pending_duration = Some(parse_duration(secs, "segment duration")?);
            } else if line.starts_with("#EXT-X-STREAM-INF") {
                pending_variant = true;
            } else if line == "#EXT-X-ENDLIST" {
                end_list = true;
            } else if line.starts_with('#') {
                // Unhandled tag or comment.
            } else if pending_variant {
                variants.push(line.to_string());
                pending_variant = false;
            } else if let Some(duration) = pending_duration.take() {
                let sequence = media_sequence
                    .checked_add(segments.len() as u64)
                    .ok_or_else(|| VideoError::Playlist("media sequence overflow".into()))?;
                segments.push(SegmentRef {
                    sequence,
                    duration,
                    uri: line.to_string(),
                });
            } else {
                return Err(VideoError::Playlist(format!("uri without #EXTINF: {line}")));
            }
        }

        if !variants.is_empty() {
            return Ok(Playlist::Master(variants));
        }

        let target_duration = target_duration
            .ok_or_else(|| VideoError::Playlist("missing #EXT-X-TARGETDURATION".into()))?;
        Ok(Playlist::Media(MediaPlaylist {
            target_duration,
            media_sequence,
            segments,
            end_list,
        }))
    }
}

fn parse_duration(value: &str, what: &str) -> Result<Duration, VideoError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| VideoError::Playlist(format!("bad {what} {value:?}")))
}

impl MediaPlaylist {
    /// Sequence number of the newest segment.
    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    /// First segment to load when joining the stream: the one that
    /// puts the playhead `sync_count` target durations behind the edge.
    pub fn live_start_sequence(&self, sync_count: f64) -> u64 {
        let target = saturating_scale(self.target_duration, sync_count);
        let mut behind = Duration::ZERO;
        for segment in self.segments.iter().rev() {
            behind = behind.saturating_add(segment.duration);
            if behind >= target {
                return segment.sequence;
            }
        }
        self.media_sequence
    }

    /// Segments at or after `sequence`, oldest first.
    pub fn segments_from(&self, sequence: u64) -> impl Iterator<Item = &SegmentRef> {
        self.segments.iter().filter(move |s| s.sequence >= sequence)
    }

    /// Total duration of the segments at or after `sequence`.
    pub fn duration_from(&self, sequence: u64) -> Duration {
        self.segments_from(sequence)
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    /// Whether `sequence` has already slid out of the playlist window.
    pub fn is_behind_window(&self, sequence: u64) -> bool {
        sequence < self.media_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:1
#EXT-X-MEDIA-SEQUENCE:10
#EXTINF:1.000,
seg10.ts
#EXTINF:1.000,
seg11.ts
#EXTINF:1.000,
seg12.ts
#EXTINF:1.000,
seg13.ts
#EXTINF:0.500,
seg14.ts
";

    fn media(text: &str) -> MediaPlaylist {
        match Playlist::parse(text).unwrap() {
            Playlist::Media(m) => m,
            other => panic!("expected media playlist, got {other:?}"),
        }
    }

    #[test]
    fn parses_live_window() {
        let p = media(LIVE);
        assert_eq!(p.target_duration, Duration::from_secs(1));
        assert_eq!(p.media_sequence, 10);
        assert_eq!(p.segments.len(), 5);
        assert_eq!(p.segments[4].sequence, 14);
        assert_eq!(p.segments[4].uri, "seg14.ts");
        assert_eq!(p.segments[4].duration, Duration::from_millis(500));
        assert_eq!(p.last_sequence(), Some(14));
        assert!(!p.end_list);
    }

    #[test]
    fn live_start_is_behind_edge() {
        let p = media(LIVE);
        // 0.5 + 1.0 >= 1.5 target durations.
        assert_eq!(p.live_start_sequence(1.5), 13);
        assert_eq!(p.live_start_sequence(0.0), 14);
        assert_eq!(p.live_start_sequence(100.0), 10);
        assert_eq!(p.duration_from(13), Duration::from_millis(1500));
        assert!(p.is_behind_window(9));
    }

    #[test]
    fn parses_master() {
        let text = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000
high/index.m3u8
";
        assert_eq!(
            Playlist::parse(text).unwrap(),
            Playlist::Master(vec!["low/index.m3u8".into(), "high/index.m3u8".into()])
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Playlist::parse("<html></html>").is_err());
        assert!(Playlist::parse("#EXTM3U\n#EXTINF:1,\nseg.ts\n").is_err());
        assert!(Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:x\n").is_err());
        assert!(Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:1\nseg.ts\n").is_err());
    }

    #[test]
    fn rejects_unrepresentable_durations() {
        assert!(Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:1e300\n#EXTINF:1,\na.ts\n").is_err());
        assert!(Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1e300,\na.ts\n").is_err());
        assert!(Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:-1\n").is_err());
        assert!(Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:inf\n").is_err());
    }

    #[test]
    fn huge_durations_saturate() {
        let p = media(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1e19,\na.ts\n#EXTINF:1e19,\nb.ts\n",
        );
        assert_eq!(p.duration_from(0), Duration::MAX);
        assert_eq!(p.live_start_sequence(f64::MAX), 0);
    }

    #[test]
    fn media_sequence_overflow_is_an_error() {
        let text = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:{}\n#EXTINF:1,\na.ts\n#EXTINF:1,\nb.ts\n",
            u64::MAX
        );
        assert!(matches!(Playlist::parse(&text), Err(VideoError::Playlist(_))));

        let last = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:{}\n#EXTINF:1,\na.ts\n",
            u64::MAX
        );
        assert_eq!(media(&last).last_sequence(), Some(u64::MAX));
    }

    #[test]
    fn end_list_detected() {
        let p = media("#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2,\na.ts\n#EXT-X-ENDLIST\n");
        assert!(p.end_list);
        assert_eq!(p.media_sequence, 0);
    }
}
