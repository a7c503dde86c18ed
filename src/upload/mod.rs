//! Upload pipeline
//!
//! Sends one selected video file to the packaging backend as a single
//! multipart POST and tracks the task through progress to success or failure.

mod client;
mod controller;
mod task;

pub use client::{ProgressTick, UploadResponse, Uploader};
pub use controller::{DragEvent, DragResponse, UploadController, UploadEvent, UploadEventKind};
pub use task::{
    format_file_size, progress_percent, watch_path, FileBlob, SelectedFile, UploadStatus,
    UploadTask,
};

use thiserror::Error;

/// Reasons an upload task can fail.
///
/// Every variant except `NoFileSelected` is terminal for the task and shows up
/// as `UploadStatus::Error`. The variant is kept on the task for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The selection contained no file. Ignored by the controller.
    #[error("no file selected")]
    NoFileSelected,

    /// The selected file could not be opened or read.
    #[error("failed to read selected file: {0}")]
    FileRead(String),

    /// The request never produced an HTTP response (connection, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("server rejected upload with status {status}: {body}")]
    ServerRejected { status: u16, body: String },

    /// 2xx response without a usable stream identifier.
    #[error("malformed upload response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Network(err.to_string())
    }
}
