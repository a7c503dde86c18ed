//! Playback controller and the seams it drives
//!
//! Given a video identifier, resolves the HLS manifest URL, runs one adaptive
//! streaming engine attached to a media sink and exposes transport controls
//! plus telemetry derived from the sink's own events.

mod controller;
mod engine;
mod hls;
mod manifest;
mod sink;
mod time;

pub use controller::{MediaState, PlaybackController};
pub use engine::{EngineEvent, EngineEvents, EngineFactory, StreamEngine};
pub use hls::{HlsEngine, HlsEngineFactory};
pub use manifest::{parse_media_duration, parse_multivariant, ManifestError, Variant};
pub use sink::{
    HeadlessSink, HeadlessSnapshot, ListenerGuard, ListenerId, MediaEvent, MediaSink, MediaSource,
};
pub use time::format_time;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The runtime cannot play adaptive streams
    #[error("adaptive streaming is not supported on this platform")]
    UnsupportedPlatform,

    #[error("invalid video id {0:?}")]
    InvalidVideoId(String),

    #[error("no media sink attached")]
    NoMediaSink,

    #[error("no stream has been opened")]
    NotOpen,

    /// The engine could not fetch or parse the manifest
    #[error("failed to load manifest: {0}")]
    ManifestLoad(String),

    #[error("streaming engine error: {0}")]
    Engine(String),
}

/// Manifest location of a video: `{origin}/output/{video_id}/master.m3u8`.
///
/// This path is a contract with the packaging backend.
pub fn manifest_url(origin: &str, video_id: &str) -> Result<String, PlaybackError> {
    let id = video_id.trim();
    if id.is_empty() || id.contains(['/', '?', '#']) || id == "." || id == ".." {
        return Err(PlaybackError::InvalidVideoId(video_id.to_string()));
    }

    Ok(format!(
        "{}/output/{}/master.m3u8",
        origin.trim_end_matches('/'),
        id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_url_template() {
        assert_eq!(
            manifest_url("http://localhost:3000", "abc123").unwrap(),
            "http://localhost:3000/output/abc123/master.m3u8"
        );
        assert_eq!(
            manifest_url("https://cdn.example.com/", "abc123").unwrap(),
            "https://cdn.example.com/output/abc123/master.m3u8"
        );
    }

    #[test]
    fn test_manifest_url_rejects_path_like_ids() {
        for id in ["", "  ", "a/b", "..", "x?y"] {
            assert_eq!(
                manifest_url("http://localhost:3000", id),
                Err(PlaybackError::InvalidVideoId(id.to_string()))
            );
        }
    }
}
