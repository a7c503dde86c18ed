//! Upload controller
//!
//! Owns the lifecycle of a single selected file. The HTTP request runs in a
//! spawned task that reports back over a channel; the owner applies those
//! events one at a time with [`UploadController::next_event`], so all state
//! transitions happen on the owner's task.
//!
//! Selecting a new file supersedes the current task: its request is cancelled
//! and any event it still delivers is dropped by task id.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{ProgressTick, Uploader};
use super::task::{progress_percent, SelectedFile, UploadStatus, UploadTask};
use super::UploadError;

/// Event reported by a running upload
#[derive(Debug, Clone)]
pub struct UploadEvent {
    /// Task the event belongs to
    pub task_id: u64,
    pub kind: UploadEventKind,
}

#[derive(Debug, Clone)]
pub enum UploadEventKind {
    Progress(ProgressTick),
    Finished(Result<String, UploadError>),
}

/// Drag-and-drop events on the upload area
#[derive(Debug, Clone)]
pub enum DragEvent {
    Enter,
    Over,
    Leave,
    Drop(Vec<SelectedFile>),
}

/// What the view must do with the originating drag event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragResponse {
    /// Suppress the default file-open navigation
    pub prevent_default: bool,
    pub stop_propagation: bool,
    /// A drop started a new upload
    pub started_upload: bool,
}

struct InFlight {
    task_id: u64,
    cancel: CancellationToken,
}

/// Controller for one upload at a time
pub struct UploadController {
    uploader: Uploader,
    task: Option<UploadTask>,
    next_task_id: u64,
    drag_active: bool,
    in_flight: Option<InFlight>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: mpsc::UnboundedReceiver<UploadEvent>,
    state_tx: watch::Sender<Option<UploadTask>>,
}

impl UploadController {
    /// Create a new controller in the `Idle` state
    pub fn new(uploader: Uploader) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(None);

        Self {
            uploader,
            task: None,
            next_task_id: 0,
            drag_active: false,
            in_flight: None,
            events_tx,
            events_rx,
            state_tx,
        }
    }

    /// Observe task changes (selection, progress, completion, reset)
    pub fn subscribe(&self) -> watch::Receiver<Option<UploadTask>> {
        self.state_tx.subscribe()
    }

    pub fn task(&self) -> Option<&UploadTask> {
        self.task.as_ref()
    }

    pub fn status(&self) -> UploadStatus {
        self.task.as_ref().map(|t| t.status).unwrap_or_default()
    }

    pub fn progress_percent(&self) -> u8 {
        self.task.as_ref().map(|t| t.progress_percent).unwrap_or(0)
    }

    pub fn result_id(&self) -> Option<&str> {
        self.task.as_ref().and_then(|t| t.result_id.as_deref())
    }

    pub fn drag_active(&self) -> bool {
        self.drag_active
    }

    /// Select a file from a picker or drop payload.
    ///
    /// An empty selection is ignored and leaves the current state untouched.
    /// Only the first file of a multi-file selection is used. Any previous
    /// task is discarded and its request cancelled.
    ///
    /// Returns true if a new task was created.
    pub fn select_file(&mut self, files: Vec<SelectedFile>) -> bool {
        let file_count = files.len();
        let Some(file) = files.into_iter().next() else {
            warn!("No file selected");
            return false;
        };

        if file_count > 1 {
            debug!("{} files selected, using only {}", file_count, file.name);
        }

        self.abandon_in_flight();

        self.next_task_id += 1;
        let task = UploadTask::new(self.next_task_id, file);
        info!("Selected {} for upload (task {})", task.file.name, task.id);
        self.task = Some(task);
        self.publish();
        true
    }

    /// Start the HTTP upload of the selected file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&mut self) -> Result<(), UploadError> {
        let task = match self.task.as_ref() {
            Some(task) if task.status == UploadStatus::Uploading => task,
            _ => return Err(UploadError::NoFileSelected),
        };

        if self.in_flight.as_ref().map(|f| f.task_id) == Some(task.id) {
            debug!("Task {} already submitted", task.id);
            return Ok(());
        }

        let task_id = task.id;
        let file = task.file.clone();
        let uploader = self.uploader.clone();
        let events = self.events_tx.clone();
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();

        tokio::spawn(async move {
            let progress_events = events.clone();
            let on_progress = move |tick: ProgressTick| {
                let _ = progress_events.send(UploadEvent {
                    task_id,
                    kind: UploadEventKind::Progress(tick),
                });
            };

            let result = tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("Upload task {} cancelled", task_id);
                    return;
                }
                result = uploader.upload(&file, on_progress) => result,
            };

            let _ = events.send(UploadEvent {
                task_id,
                kind: UploadEventKind::Finished(result),
            });
        });

        self.in_flight = Some(InFlight { task_id, cancel });
        Ok(())
    }

    /// Select then submit, the path taken by both the picker and a drop
    pub fn process_files(&mut self, files: Vec<SelectedFile>) -> bool {
        if !self.select_file(files) {
            return false;
        }
        if let Err(e) = self.submit() {
            error!("Failed to start upload: {}", e);
            return false;
        }
        true
    }

    /// Back to `Idle`, discarding the selected file. Used for "try again".
    pub fn reset(&mut self) {
        self.abandon_in_flight();
        if self.task.take().is_some() {
            info!("Upload reset");
            self.publish();
        }
    }

    /// Feed a drag-and-drop event from the upload area
    pub fn handle_drag(&mut self, event: DragEvent) -> DragResponse {
        let mut started_upload = false;

        match event {
            DragEvent::Enter | DragEvent::Over => self.drag_active = true,
            DragEvent::Leave => self.drag_active = false,
            DragEvent::Drop(files) => {
                self.drag_active = false;
                started_upload = self.process_files(files);
            }
        }

        DragResponse {
            prevent_default: true,
            stop_propagation: true,
            started_upload,
        }
    }

    /// Apply one event. Events from superseded tasks are dropped.
    ///
    /// Returns true if the current task changed.
    pub fn handle_event(&mut self, event: UploadEvent) -> bool {
        let Some(task) = self.task.as_mut() else {
            debug!("Dropping upload event for task {} (no active task)", event.task_id);
            return false;
        };

        if task.id != event.task_id {
            debug!(
                "Dropping stale upload event for task {} (active task {})",
                event.task_id, task.id
            );
            return false;
        }

        let changed = match event.kind {
            UploadEventKind::Progress(tick) => {
                let percent = progress_percent(tick.bytes_sent, tick.bytes_total);
                let changed = task.record_progress(percent);
                if changed {
                    debug!("Upload task {} at {}%", task.id, task.progress_percent);
                }
                changed
            }
            UploadEventKind::Finished(Ok(result_id)) => {
                info!("Upload task {} finished with id {}", task.id, result_id);
                task.succeed(result_id);
                true
            }
            UploadEventKind::Finished(Err(err)) => {
                error!("Upload task {} failed: {}", task.id, err);
                task.fail(err);
                true
            }
        };

        if matches!(task.status, UploadStatus::Success | UploadStatus::Error)
            && self.in_flight.as_ref().map(|f| f.task_id) == Some(task.id)
        {
            self.in_flight = None;
        }

        if changed {
            self.publish();
        }
        changed
    }

    /// Wait for the next upload event and apply it
    pub async fn next_event(&mut self) -> UploadStatus {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
        self.status()
    }

    /// Drive the current submitted task until it succeeds or fails.
    ///
    /// Returns immediately when nothing is in flight.
    pub async fn wait_for_completion(&mut self) -> UploadStatus {
        while self.in_flight.is_some() && self.status() == UploadStatus::Uploading {
            self.next_event().await;
        }
        self.status()
    }

    fn abandon_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            info!("Cancelling superseded upload task {}", in_flight.task_id);
            in_flight.cancel.cancel();
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.task.clone());
    }
}

impl Drop for UploadController {
    fn drop(&mut self) {
        self.abandon_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEN_MB: u64 = 10 * 1024 * 1024;

    fn offline_controller() -> UploadController {
        let config = UploadConfig {
            endpoint: "http://127.0.0.1:9/api/v1/videos/upload".into(),
            ..UploadConfig::default()
        };
        UploadController::new(Uploader::new(&config).unwrap())
    }

    fn controller_for(server: &MockServer) -> UploadController {
        let config = UploadConfig {
            endpoint: format!("{}/api/v1/videos/upload", server.uri()),
            ..UploadConfig::default()
        };
        UploadController::new(Uploader::new(&config).unwrap())
    }

    fn file(name: &str) -> SelectedFile {
        SelectedFile::from_bytes(name, vec![0u8; 16])
    }

    fn progress(task_id: u64, sent: u64, total: u64) -> UploadEvent {
        UploadEvent {
            task_id,
            kind: UploadEventKind::Progress(ProgressTick {
                bytes_sent: sent,
                bytes_total: Some(total),
            }),
        }
    }

    fn finished(task_id: u64, result: Result<String, UploadError>) -> UploadEvent {
        UploadEvent {
            task_id,
            kind: UploadEventKind::Finished(result),
        }
    }

    #[test]
    fn test_empty_selection_is_ignored() {
        let mut controller = offline_controller();
        assert!(!controller.select_file(Vec::new()));
        assert_eq!(controller.status(), UploadStatus::Idle);

        controller.select_file(vec![file("a.mp4")]);
        controller.handle_event(progress(1, 8, 16));
        assert!(!controller.select_file(Vec::new()));
        assert_eq!(controller.status(), UploadStatus::Uploading);
        assert_eq!(controller.progress_percent(), 50);
    }

    #[test]
    fn test_only_first_file_is_used() {
        let mut controller = offline_controller();
        controller.select_file(vec![file("first.mp4"), file("second.mp4")]);
        assert_eq!(controller.task().unwrap().file.name, "first.mp4");
    }

    #[test]
    fn test_ten_megabyte_scenario_succeeds() {
        let mut controller = offline_controller();
        controller.select_file(vec![file("big.mp4").with_size(Some(TEN_MB))]);
        let id = controller.task().unwrap().id;

        let mut seen = Vec::new();
        for quarter in 0..=4 {
            controller.handle_event(progress(id, TEN_MB * quarter / 4, TEN_MB));
            seen.push(controller.progress_percent());
        }
        assert_eq!(seen, vec![0, 25, 50, 75, 100]);

        controller.handle_event(finished(id, Ok("abc123".into())));
        assert_eq!(controller.status(), UploadStatus::Success);
        assert_eq!(controller.result_id(), Some("abc123"));
        assert_eq!(
            controller.task().unwrap().watch_path().as_deref(),
            Some("/stream/abc123")
        );
    }

    #[test]
    fn test_new_selection_restarts_progress() {
        let mut controller = offline_controller();
        controller.select_file(vec![file("a.mp4")]);
        controller.handle_event(progress(1, 12, 16));
        assert_eq!(controller.progress_percent(), 75);

        controller.select_file(vec![file("b.mp4")]);
        assert_eq!(controller.status(), UploadStatus::Uploading);
        assert_eq!(controller.progress_percent(), 0);
        assert_eq!(controller.result_id(), None);

        // Late completion of the superseded task must not land on the new one
        assert!(!controller.handle_event(finished(1, Ok("stale".into()))));
        assert_eq!(controller.status(), UploadStatus::Uploading);
        assert_eq!(controller.result_id(), None);
    }

    #[test]
    fn test_failure_then_reset() {
        let mut controller = offline_controller();
        controller.select_file(vec![file("a.mp4")]);
        controller.handle_event(finished(
            1,
            Err(UploadError::ServerRejected {
                status: 500,
                body: String::new(),
            }),
        ));
        assert_eq!(controller.status(), UploadStatus::Error);
        assert_eq!(controller.result_id(), None);
        assert!(controller.task().unwrap().is_failed());

        controller.reset();
        assert_eq!(controller.status(), UploadStatus::Idle);
        assert!(controller.task().is_none());
    }

    #[test]
    fn test_submit_without_selection() {
        let mut controller = offline_controller();
        assert_eq!(controller.submit(), Err(UploadError::NoFileSelected));
    }

    #[test]
    fn test_drag_state_machine() {
        let mut controller = offline_controller();

        let response = controller.handle_drag(DragEvent::Enter);
        assert!(response.prevent_default);
        assert!(controller.drag_active());

        controller.handle_drag(DragEvent::Over);
        assert!(controller.drag_active());

        let response = controller.handle_drag(DragEvent::Leave);
        assert!(response.prevent_default);
        assert!(!controller.drag_active());

        controller.handle_drag(DragEvent::Enter);
        let response = controller.handle_drag(DragEvent::Drop(Vec::new()));
        assert!(response.prevent_default);
        assert!(!response.started_upload);
        assert!(!controller.drag_active());
        assert_eq!(controller.status(), UploadStatus::Idle);
    }

    #[tokio::test]
    async fn test_drop_uploads_first_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/videos/upload"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"url": "xyz789"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut controller = controller_for(&server);
        let response =
            controller.handle_drag(DragEvent::Drop(vec![file("dropped.mp4"), file("extra.mp4")]));
        assert!(response.started_upload);

        let status = controller.wait_for_completion().await;
        assert_eq!(status, UploadStatus::Success);
        assert_eq!(controller.result_id(), Some("xyz789"));
        assert_eq!(controller.progress_percent(), 100);
    }

    #[tokio::test]
    async fn test_server_error_ends_in_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut controller = controller_for(&server);
        assert!(controller.process_files(vec![file("a.mp4")]));

        assert_eq!(controller.wait_for_completion().await, UploadStatus::Error);
        assert_eq!(controller.result_id(), None);
        assert!(matches!(
            controller.task().unwrap().error,
            Some(UploadError::ServerRejected { status: 500, .. })
        ));

        controller.reset();
        assert_eq!(controller.status(), UploadStatus::Idle);
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let mut controller = controller_for(&server);
        controller.process_files(vec![file("a.mp4")]);

        assert_eq!(controller.wait_for_completion().await, UploadStatus::Error);
        assert!(matches!(
            controller.task().unwrap().error,
            Some(UploadError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_ends_in_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"videoId": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = UploadConfig {
            endpoint: format!("{}/api/v1/videos/upload", server.uri()),
            timeout_secs: 1,
            ..UploadConfig::default()
        };
        let mut controller = UploadController::new(Uploader::new(&config).unwrap());
        controller.process_files(vec![file("a.mp4")]);

        assert_eq!(controller.wait_for_completion().await, UploadStatus::Error);
        assert_eq!(controller.result_id(), None);
        assert!(matches!(
            controller.task().unwrap().error,
            Some(UploadError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_size_stays_at_zero_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"videoId": "abc123"})),
            )
            .mount(&server)
            .await;

        let mut controller = controller_for(&server);
        let unsized_file =
            SelectedFile::from_bytes("stream.mp4", vec![3u8; 256 * 1024]).with_size(None);
        controller.process_files(vec![unsized_file]);

        let mut seen = Vec::new();
        loop {
            let status = controller.next_event().await;
            if status != UploadStatus::Uploading {
                assert_eq!(status, UploadStatus::Success);
                break;
            }
            seen.push(controller.progress_percent());
        }

        assert!(seen.iter().all(|&p| p == 0), "{:?}", seen);
        assert_eq!(controller.progress_percent(), 100);
        assert_eq!(controller.result_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_superseded_request_result_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"videoId": "slow"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let mut controller = controller_for(&server);
        controller.process_files(vec![file("first.mp4")]);
        let first_id = controller.task().unwrap().id;

        controller.process_files(vec![file("second.mp4")]);
        let second_id = controller.task().unwrap().id;
        assert_ne!(first_id, second_id);

        assert_eq!(controller.wait_for_completion().await, UploadStatus::Success);
        assert_eq!(controller.task().unwrap().id, second_id);
        assert_eq!(controller.task().unwrap().file.name, "second.mp4");
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let mut controller = offline_controller();
        let mut rx = controller.subscribe();

        controller.select_file(vec![file("a.mp4")]);
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone().unwrap();
        assert_eq!(snapshot.status, UploadStatus::Uploading);

        controller.reset();
        assert!(rx.borrow_and_update().is_none());
    }
}
