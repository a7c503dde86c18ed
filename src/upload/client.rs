//! Multipart upload to the packaging backend
//!
//! Streams the file body so large videos never sit in RAM, counting bytes as
//! reqwest pulls them off the stream to report progress.

use bytes::Bytes;
use futures::future::Either;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::task::{FileBlob, SelectedFile};
use super::UploadError;
use crate::config::UploadConfig;

/// Chunk size used when streaming in-memory files
const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

/// Bytes pushed onto the wire so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTick {
    pub bytes_sent: u64,
    pub bytes_total: Option<u64>,
}

/// Body returned by the upload endpoint on success
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "videoId")]
    pub video_id: Option<String>,
}

impl UploadResponse {
    /// The stream identifier, preferring `url` over `videoId`.
    /// Empty strings count as missing.
    pub fn stream_id(&self) -> Option<&str> {
        [self.url.as_deref(), self.video_id.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
    }
}

/// HTTP uploader for single-shot multipart uploads
#[derive(Clone)]
pub struct Uploader {
    client: Client,
    endpoint: String,
    field_name: String,
}

impl Uploader {
    /// Create a new uploader
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            field_name: config.field_name.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload one file and return the stream identifier from the response.
    ///
    /// `on_progress` is called as the body is consumed, in non-decreasing
    /// order of bytes sent.
    pub async fn upload<F>(&self, file: &SelectedFile, on_progress: F) -> Result<String, UploadError>
    where
        F: Fn(ProgressTick) + Send + Sync + 'static,
    {
        info!(
            "Uploading {} ({} bytes) to {}",
            file.name,
            file.size.map(|s| s.to_string()).unwrap_or_else(|| "?".into()),
            self.endpoint
        );

        let source = open_blob(&file.blob).await?;
        let total = file.size;
        let mut sent: u64 = 0;
        let counted = source.inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                on_progress(ProgressTick {
                    bytes_sent: sent,
                    bytes_total: total,
                });
            }
        });

        let body = Body::wrap_stream(counted);
        let part = match total {
            Some(len) => Part::stream_with_length(body, len),
            None => Part::stream(body),
        }
        .file_name(file.name.clone())
        .mime_str(&file.content_type)
        .map_err(|e| UploadError::FileRead(format!("invalid content type: {}", e)))?;

        let form = Form::new().part(self.field_name.clone(), part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(UploadError::ServerRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!("Upload response body: {}", text);
        parse_upload_response(&text)
    }
}

/// Extract the stream identifier from a 2xx response body
pub(crate) fn parse_upload_response(text: &str) -> Result<String, UploadError> {
    let parsed: UploadResponse = serde_json::from_str(text)
        .map_err(|e| UploadError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    parsed
        .stream_id()
        .map(str::to_string)
        .ok_or_else(|| UploadError::MalformedResponse("missing `url` and `videoId`".into()))
}

type MemoryChunks = stream::Iter<std::vec::IntoIter<std::io::Result<Bytes>>>;

async fn open_blob(
    blob: &FileBlob,
) -> Result<Either<ReaderStream<File>, MemoryChunks>, UploadError> {
    match blob {
        FileBlob::Path(path) => {
            let file = File::open(path)
                .await
                .map_err(|e| UploadError::FileRead(format!("{}: {}", path.display(), e)))?;
            Ok(Either::Left(ReaderStream::new(file)))
        }
        FileBlob::Memory(contents) => {
            let contents = contents.clone();
            let chunks: Vec<std::io::Result<Bytes>> = (0..contents.len())
                .step_by(MEMORY_CHUNK_SIZE)
                .map(|start| {
                    let end = (start + MEMORY_CHUNK_SIZE).min(contents.len());
                    Ok(contents.slice(start..end))
                })
                .collect();
            Ok(Either::Right(stream::iter(chunks)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> UploadConfig {
        UploadConfig {
            endpoint: format!("{}/api/v1/videos/upload", server.uri()),
            ..UploadConfig::default()
        }
    }

    #[test]
    fn test_response_prefers_url() {
        let resp: UploadResponse =
            serde_json::from_str(r#"{"url":"from-url","videoId":"from-id"}"#).unwrap();
        assert_eq!(resp.stream_id(), Some("from-url"));
    }

    #[test]
    fn test_response_falls_back_to_video_id() {
        assert_eq!(parse_upload_response(r#"{"videoId":"abc123"}"#).unwrap(), "abc123");
        assert_eq!(parse_upload_response(r#"{"url":"","videoId":"abc123"}"#).unwrap(), "abc123");
    }

    #[test]
    fn test_response_without_identifier_is_malformed() {
        assert!(matches!(
            parse_upload_response(r#"{"status":"ok"}"#),
            Err(UploadError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_upload_response("<html>oops</html>"),
            Err(UploadError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_reports_progress_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/videos/upload"))
            .and(header_exists("content-type"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"videoId": "abc123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let uploader = Uploader::new(&config_for(&server)).unwrap();
        let file = SelectedFile::from_bytes("clip.mp4", vec![7u8; 200 * 1024]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let id = uploader
            .upload(&file, move |tick| sink.lock().push(tick))
            .await
            .unwrap();
        assert_eq!(id, "abc123");

        let ticks = seen.lock().clone();
        assert!(!ticks.is_empty());
        assert!(ticks.windows(2).all(|w| w[0].bytes_sent <= w[1].bytes_sent));
        let last = ticks.last().unwrap();
        assert_eq!(last.bytes_sent, 200 * 1024);
        assert_eq!(last.bytes_total, Some(200 * 1024));
    }

    #[tokio::test]
    async fn test_upload_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("transcoder down"))
            .mount(&server)
            .await;

        let uploader = Uploader::new(&config_for(&server)).unwrap();
        let file = SelectedFile::from_bytes("clip.mp4", vec![1u8; 10]);
        let err = uploader.upload(&file, |_| {}).await.unwrap_err();
        assert_eq!(
            err,
            UploadError::ServerRejected {
                status: 500,
                body: "transcoder down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_upload_network_error() {
        let config = UploadConfig {
            endpoint: "http://127.0.0.1:9/api/v1/videos/upload".into(),
            ..UploadConfig::default()
        };
        let uploader = Uploader::new(&config).unwrap();
        let file = SelectedFile::from_bytes("clip.mp4", vec![1u8; 10]);
        let err = uploader.upload(&file, |_| {}).await.unwrap_err();
        assert!(matches!(err, UploadError::Network(_)), "{:?}", err);
    }
}
