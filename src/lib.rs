//! abrcast client
//!
//! Two independent controllers joined only by a video identifier:
//! - [`upload::UploadController`] sends a single video file to the packaging
//!   backend and yields the identifier of the produced stream.
//! - [`playback::PlaybackController`] resolves that identifier to an HLS
//!   manifest, drives an adaptive streaming engine attached to a media sink,
//!   and exposes transport controls plus playback telemetry.

pub mod config;
pub mod logging;
pub mod playback;
pub mod upload;

pub use config::Config;
pub use playback::{PlaybackController, PlaybackError};
pub use upload::{UploadController, UploadError};
