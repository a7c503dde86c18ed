//! Playback controller
//!
//! Holds at most one [`PlaybackSession`]: an engine instance plus the sink
//! listeners it needs. Dropping the session destroys the engine and removes
//! the listeners, so every exit path (close, id change, attach failure, fatal
//! engine error) releases them.
//!
//! Telemetry (`current_time`, `duration`, `is_loading`, `is_playing`) only
//! changes in response to sink or engine events applied by
//! [`PlaybackController::next_event`] or [`PlaybackController::process_pending`].
//! When a session starts or ends it is read back from the sink, never assumed.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::engine::{EngineEvent, EngineEvents, EngineFactory, StreamEngine};
use super::manifest::Variant;
use super::sink::{ListenerGuard, MediaEvent, MediaSink};
use super::{manifest_url, PlaybackError};

/// Playback state shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct MediaState {
    pub is_playing: bool,
    pub is_muted: bool,
    pub is_loading: bool,
    /// Seconds
    pub current_time: f64,
    /// Seconds, 0 until metadata is known
    pub duration: f64,
    /// 0.0..=1.0
    pub volume: f64,
    /// Terminal error of the last session
    pub error: Option<PlaybackError>,
    /// Renditions listed by the manifest
    pub variants: Vec<Variant>,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_muted: false,
            is_loading: true,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            error: None,
            variants: Vec::new(),
        }
    }
}

impl MediaState {
    /// Position as a percentage of the duration, for the progress bar
    pub fn progress_percent(&self) -> f64 {
        if self.duration.is_finite() && self.duration > 0.0 {
            (self.current_time / self.duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Fresh state for a new session. Audio settings are kept and playback
    /// telemetry is read back from the sink, which may still be playing.
    fn for_new_session(&self, sink: Option<&dyn MediaSink>) -> Self {
        let mut state = Self {
            is_muted: self.is_muted,
            volume: self.volume,
            ..Self::default()
        };
        if let Some(sink) = sink {
            state.read_sink(sink);
        }
        state
    }

    fn read_sink(&mut self, sink: &dyn MediaSink) {
        self.is_playing = !sink.paused();
        self.current_time = sink.current_time();
        self.duration = sink.duration();
    }
}

/// One active engine attachment
struct PlaybackSession {
    id: u64,
    video_id: String,
    engine: Box<dyn StreamEngine>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    _listeners: ListenerGuard,
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.engine.destroy();
        info!("Playback session {} for {} closed", self.id, self.video_id);
    }
}

enum Incoming {
    Engine(EngineEvent),
    Media(MediaEvent),
}

pub struct PlaybackController {
    factory: Arc<dyn EngineFactory>,
    origin: String,
    sink: Option<Arc<dyn MediaSink>>,
    session: Option<PlaybackSession>,
    next_session_id: u64,
    /// Last requested id, kept after a fatal error for `reload`
    video_id: Option<String>,
    state: MediaState,
    state_tx: watch::Sender<MediaState>,
}

impl PlaybackController {
    /// Create a controller resolving manifests under `origin`
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        origin: impl Into<String>,
        sink: Option<Arc<dyn MediaSink>>,
    ) -> Self {
        let state = MediaState::default();
        let (state_tx, _) = watch::channel(state.clone());

        Self {
            factory,
            origin: origin.into(),
            sink,
            session: None,
            next_session_id: 0,
            video_id: None,
            state,
            state_tx,
        }
    }

    pub fn state(&self) -> &MediaState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.state_tx.subscribe()
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Replace the media sink. Any open session is closed since its engine
    /// is bound to the previous sink.
    pub fn attach_sink(&mut self, sink: Arc<dyn MediaSink>) {
        self.close_session();
        self.sink = Some(sink);
    }

    pub fn detach_sink(&mut self) {
        self.close_session();
        self.sink = None;
    }

    /// Open the stream of `video_id`.
    ///
    /// A no-op when that id is already open. A different id first tears down
    /// the current engine, so two engines are never attached at once.
    pub fn open_stream(&mut self, video_id: &str) -> Result<(), PlaybackError> {
        if let Some(session) = &self.session {
            if session.video_id == video_id {
                debug!("Stream {} already open", video_id);
                return Ok(());
            }
        }

        let url = manifest_url(&self.origin, video_id)?;

        if !self.factory.is_supported() {
            warn!("Adaptive streaming unsupported, cannot open {}", video_id);
            self.close_session();
            self.video_id = Some(video_id.to_string());
            self.state = MediaState {
                is_loading: false,
                error: Some(PlaybackError::UnsupportedPlatform),
                ..self.state.for_new_session(self.sink.as_deref())
            };
            self.publish();
            return Err(PlaybackError::UnsupportedPlatform);
        }

        let sink = self.sink.clone().ok_or(PlaybackError::NoMediaSink)?;

        self.close_session();

        self.next_session_id += 1;
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();

        let listeners = ListenerGuard::acquire(sink.clone(), media_tx);
        let engine = self.factory.create(EngineEvents::new(engine_tx));

        let mut session = PlaybackSession {
            id: self.next_session_id,
            video_id: video_id.to_string(),
            engine,
            engine_rx,
            media_rx,
            _listeners: listeners,
        };

        self.video_id = Some(video_id.to_string());
        self.state = self.state.for_new_session(Some(sink.as_ref()));

        let started = session
            .engine
            .load_source(&url)
            .and_then(|_| session.engine.attach_media(sink));

        if let Err(e) = started {
            error!("Failed to start stream {}: {}", video_id, e);
            // Dropping the session releases the engine and listeners
            drop(session);
            self.state.is_loading = false;
            self.state.error = Some(e.clone());
            self.publish();
            return Err(e);
        }

        info!(
            "Playback session {} opened for {} ({})",
            session.id, video_id, url
        );
        self.session = Some(session);
        self.publish();
        Ok(())
    }

    /// Open the last requested id again, e.g. after a manifest error
    pub fn reload(&mut self) -> Result<(), PlaybackError> {
        let video_id = self.video_id.clone().ok_or(PlaybackError::NotOpen)?;
        self.close_session();
        self.open_stream(&video_id)
    }

    /// Tear down the current session and forget the video id
    pub fn close(&mut self) {
        self.close_session();
        self.video_id = None;
    }

    fn close_session(&mut self) {
        // Drop runs engine teardown and listener removal
        self.session = None;
    }

    /// Play when paused, pause when playing. `is_playing` follows the
    /// resulting sink events, not this call.
    pub fn toggle_play(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.state.is_playing {
            sink.pause();
        } else {
            sink.play();
        }
    }

    pub fn toggle_mute(&mut self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let muted = !self.state.is_muted;
        sink.set_muted(muted);
        self.state.is_muted = muted;
        self.publish();
    }

    pub fn set_volume(&mut self, volume: f64) {
        let Some(sink) = &self.sink else {
            return;
        };
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        sink.set_volume(volume);
        self.state.volume = volume;
        self.publish();
    }

    /// Seek to `fraction` (clamped to 0..=1) of the duration.
    ///
    /// Returns the requested absolute time.
    pub fn seek_to(&self, fraction: f64) -> Option<f64> {
        let sink = self.sink.as_ref()?;
        if !fraction.is_finite() {
            return None;
        }
        let target = fraction.clamp(0.0, 1.0) * self.known_duration();
        sink.set_current_time(target);
        Some(target)
    }

    /// Move by `delta_secs` from the sink's current time, clamped to the media.
    ///
    /// Returns the requested absolute time.
    pub fn skip(&self, delta_secs: f64) -> Option<f64> {
        let sink = self.sink.as_ref()?;
        if !delta_secs.is_finite() {
            return None;
        }
        let mut target = (sink.current_time() + delta_secs).max(0.0);
        let duration = self.known_duration();
        if duration > 0.0 {
            target = target.min(duration);
        }
        sink.set_current_time(target);
        Some(target)
    }

    fn known_duration(&self) -> f64 {
        if self.state.duration.is_finite() && self.state.duration > 0.0 {
            self.state.duration
        } else {
            0.0
        }
    }

    /// Wait for the next engine or sink event of the open session and apply it.
    ///
    /// Each source is applied in its own emission order. Ordering between
    /// engine and sink events is not preserved: queued engine events win.
    ///
    /// Pends forever while no session is open.
    pub async fn next_event(&mut self) {
        let incoming = match self.session.as_mut() {
            Some(session) => tokio::select! {
                biased;
                Some(event) = session.engine_rx.recv() => Incoming::Engine(event),
                Some(event) = session.media_rx.recv() => Incoming::Media(event),
                else => std::future::pending::<Incoming>().await,
            },
            None => std::future::pending::<Incoming>().await,
        };
        self.apply(incoming);
    }

    /// Apply every event already queued, engine events first. Ordering
    /// between the two sources is not preserved.
    ///
    /// Returns the number of events applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let incoming = {
                let Some(session) = self.session.as_mut() else {
                    break;
                };
                if let Ok(event) = session.engine_rx.try_recv() {
                    Incoming::Engine(event)
                } else if let Ok(event) = session.media_rx.try_recv() {
                    Incoming::Media(event)
                } else {
                    break;
                }
            };
            self.apply(incoming);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, incoming: Incoming) {
        let changed = match incoming {
            Incoming::Engine(event) => self.handle_engine_event(event),
            Incoming::Media(event) => self.handle_media_event(event),
        };
        if changed {
            self.publish();
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::ManifestParsed { variants } => {
                info!("Manifest parsed with {} variant(s)", variants.len());
                self.state.is_loading = false;
                self.state.variants = variants;
                true
            }
            EngineEvent::Error { fatal: false, details } => {
                warn!("Recoverable streaming error: {}", details);
                false
            }
            EngineEvent::Error { fatal: true, details } => {
                error!("Fatal streaming error: {}", details);
                self.close_session();
                if let Some(sink) = &self.sink {
                    self.state.read_sink(sink.as_ref());
                }
                self.state.is_loading = false;
                self.state.error = Some(PlaybackError::ManifestLoad(details));
                true
            }
        }
    }

    fn handle_media_event(&mut self, event: MediaEvent) -> bool {
        let state = &mut self.state;
        match event {
            MediaEvent::TimeUpdate(t) => state.current_time = t,
            MediaEvent::LoadedMetadata { duration } => state.duration = duration,
            MediaEvent::Play => state.is_playing = true,
            MediaEvent::Pause => state.is_playing = false,
            MediaEvent::Waiting => state.is_loading = true,
            MediaEvent::CanPlay => state.is_loading = false,
        }
        true
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}
