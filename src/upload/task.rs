//! Upload task state and the small pure helpers around it

use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::UploadError;

/// Where the bytes of a selected file come from
#[derive(Debug, Clone)]
pub enum FileBlob {
    /// A file on disk, streamed at upload time
    Path(PathBuf),
    /// Contents already held in memory (drop payloads, tests)
    Memory(Bytes),
}

/// A file picked from a dialog or dropped onto the upload area
#[derive(Debug, Clone)]
pub struct SelectedFile {
    /// Display name, also sent as the multipart file name
    pub name: String,
    /// Size in bytes when known
    pub size: Option<u64>,
    /// MIME type sent with the multipart field
    pub content_type: String,
    pub blob: FileBlob,
}

impl SelectedFile {
    /// Select a file on disk. Reads its metadata so progress has a total.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::FileRead(format!("{}: {}", path.display(), e)))?;

        if !metadata.is_file() {
            return Err(UploadError::FileRead(format!(
                "{}: not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        Ok(Self {
            content_type: guess_content_type(&name).to_string(),
            name,
            size: Some(metadata.len()),
            blob: FileBlob::Path(path.to_path_buf()),
        })
    }

    /// Select in-memory contents under the given name
    pub fn from_bytes(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        let name = name.into();
        let contents = contents.into();
        Self {
            content_type: guess_content_type(&name).to_string(),
            size: Some(contents.len() as u64),
            name,
            blob: FileBlob::Memory(contents),
        }
    }

    /// Override the known size. `None` means the total is unknown and progress
    /// stays at 0 until the upload completes.
    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }
}

fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// Lifecycle of an upload task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    Uploading,
    Success,
    Error,
}

/// One in-flight or completed upload
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// Generation number, unique per controller
    pub id: u64,
    pub file: SelectedFile,
    pub status: UploadStatus,
    /// 0..=100, never decreases while uploading
    pub progress_percent: u8,
    /// Stream identifier, only set on success
    pub result_id: Option<String>,
    /// Cause of failure, only set on error
    pub error: Option<UploadError>,
}

impl UploadTask {
    /// A freshly selected file starts uploading immediately at 0%
    pub fn new(id: u64, file: SelectedFile) -> Self {
        Self {
            id,
            file,
            status: UploadStatus::Uploading,
            progress_percent: 0,
            result_id: None,
            error: None,
        }
    }

    /// Apply a progress tick. Returns true if the displayed value changed.
    pub(crate) fn record_progress(&mut self, percent: u8) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }
        let next = percent.min(100).max(self.progress_percent);
        let changed = next != self.progress_percent;
        self.progress_percent = next;
        changed
    }

    pub(crate) fn succeed(&mut self, result_id: String) {
        self.status = UploadStatus::Success;
        self.progress_percent = 100;
        self.result_id = Some(result_id);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: UploadError) {
        self.status = UploadStatus::Error;
        self.result_id = None;
        self.error = Some(error);
    }

    /// Generic failure flag for the UI ("upload failed, try again")
    pub fn is_failed(&self) -> bool {
        self.status == UploadStatus::Error
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, UploadStatus::Success | UploadStatus::Error)
    }

    /// Playback route for the uploaded video, only once it succeeded
    pub fn watch_path(&self) -> Option<String> {
        match (&self.status, &self.result_id) {
            (UploadStatus::Success, Some(id)) => Some(watch_path(id)),
            _ => None,
        }
    }
}

/// Percentage of `sent` over `total`, rounded and clamped to 0..=100.
///
/// Unknown or zero totals report 0.
pub fn progress_percent(sent: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let percent = (sent as f64 * 100.0 / total as f64).round();
            percent.clamp(0.0, 100.0) as u8
        }
        _ => 0,
    }
}

/// Route of the playback page for a stream identifier
pub fn watch_path(video_id: &str) -> String {
    format!("/stream/{}", video_id)
}

/// Human readable size in 1024-based units, e.g. `1.5 KB`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut exponent = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && exponent < UNITS.len() - 1 {
        scaled /= 1024.0;
        exponent += 1;
    }

    let rounded = format!("{:.2}", scaled);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[exponent])
}
