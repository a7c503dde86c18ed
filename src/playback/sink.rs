//! Media sink abstraction
//!
//! A media sink is the renderable surface a streaming engine attaches to. It
//! owns the true playback state and reports it through [`MediaEvent`]s; the
//! controller never writes telemetry itself.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub type ListenerId = u64;

/// Events emitted by a media sink, in emission order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    Play,
    Pause,
    /// Current position in seconds
    TimeUpdate(f64),
    LoadedMetadata { duration: f64 },
    /// Playback stalled waiting for data
    Waiting,
    /// Enough data to start or resume playback
    CanPlay,
}

/// Media attached to a sink by a streaming engine
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    /// Playlist of the rendition being played
    pub url: String,
    /// Total duration in seconds
    pub duration: f64,
}

/// A renderable media surface (video element, headless clock, ...)
pub trait MediaSink: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn set_muted(&self, muted: bool);
    fn set_volume(&self, volume: f64);
    /// True while the media is not playing
    fn paused(&self) -> bool;
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);
    /// Duration of the attached media in seconds, 0 when unknown
    fn duration(&self) -> f64;

    /// Attach (`Some`) or detach (`None`) the media to render
    fn set_source(&self, source: Option<MediaSource>);

    fn add_listener(&self, tx: mpsc::UnboundedSender<MediaEvent>) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Scoped event subscription, removed from the sink on drop
pub struct ListenerGuard {
    sink: Arc<dyn MediaSink>,
    id: ListenerId,
}

impl ListenerGuard {
    pub fn acquire(sink: Arc<dyn MediaSink>, tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        let id = sink.add_listener(tx);
        Self { sink, id }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.sink.remove_listener(self.id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadlessSnapshot {
    pub paused: bool,
    pub muted: bool,
    pub volume: f64,
    pub current_time: f64,
    pub duration: f64,
    pub has_source: bool,
}

struct HeadlessState {
    source: Option<MediaSource>,
    paused: bool,
    muted: bool,
    volume: f64,
    current_time: f64,
    duration: f64,
    listeners: Vec<(ListenerId, mpsc::UnboundedSender<MediaEvent>)>,
    next_listener: ListenerId,
}

impl HeadlessState {
    fn emit(&mut self, event: MediaEvent) {
        // Drop listeners whose receiver went away
        self.listeners.retain(|(_, tx)| tx.send(event).is_ok());
    }
}

/// In-process media sink with a clock driven by [`HeadlessSink::advance`].
///
/// Behaves like a media element: play/pause report events, seeking is
/// clamped to the media, and playback pauses at the end.
pub struct HeadlessSink {
    state: Mutex<HeadlessState>,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                source: None,
                paused: true,
                muted: false,
                volume: 1.0,
                current_time: 0.0,
                duration: 0.0,
                listeners: Vec::new(),
                next_listener: 0,
            }),
        }
    }

    /// Move the playback clock forward while playing
    pub fn advance(&self, elapsed_secs: f64) {
        let mut state = self.state.lock();
        if state.paused || state.source.is_none() || elapsed_secs <= 0.0 {
            return;
        }

        state.current_time = (state.current_time + elapsed_secs).min(state.duration);
        let now = state.current_time;
        state.emit(MediaEvent::TimeUpdate(now));

        if now >= state.duration {
            debug!("Headless sink reached end of media");
            state.paused = true;
            state.emit(MediaEvent::Pause);
        }
    }

    /// Simulate a buffer underrun
    pub fn stall(&self) {
        self.state.lock().emit(MediaEvent::Waiting);
    }

    /// Simulate the buffer refilling after a stall
    pub fn resume_from_stall(&self) {
        self.state.lock().emit(MediaEvent::CanPlay);
    }

    pub fn snapshot(&self) -> HeadlessSnapshot {
        let state = self.state.lock();
        HeadlessSnapshot {
            paused: state.paused,
            muted: state.muted,
            volume: state.volume,
            current_time: state.current_time,
            duration: state.duration,
            has_source: state.source.is_some(),
        }
    }

    pub fn source(&self) -> Option<MediaSource> {
        self.state.lock().source.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl Default for HeadlessSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSink for HeadlessSink {
    fn play(&self) {
        let mut state = self.state.lock();
        if !state.paused {
            return;
        }
        state.paused = false;

        if state.duration > 0.0 && state.current_time >= state.duration {
            state.current_time = 0.0;
            state.emit(MediaEvent::TimeUpdate(0.0));
        }
        state.emit(MediaEvent::Play);

        if state.source.is_none() {
            state.emit(MediaEvent::Waiting);
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused {
            return;
        }
        state.paused = true;
        state.emit(MediaEvent::Pause);
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn paused(&self) -> bool {
        self.state.lock().paused
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn set_current_time(&self, seconds: f64) {
        let mut state = self.state.lock();
        let mut target = seconds.max(0.0);
        if state.duration > 0.0 {
            target = target.min(state.duration);
        }
        state.current_time = target;
        state.emit(MediaEvent::TimeUpdate(target));
    }

    fn set_source(&self, source: Option<MediaSource>) {
        let mut state = self.state.lock();
        state.current_time = 0.0;

        match source {
            Some(source) => {
                let duration = source.duration;
                state.duration = duration;
                state.source = Some(source);
                state.emit(MediaEvent::LoadedMetadata { duration });
                state.emit(MediaEvent::CanPlay);
            }
            None => {
                state.source = None;
                state.duration = 0.0;
                if !state.paused {
                    state.paused = true;
                    state.emit(MediaEvent::Pause);
                }
            }
        }
    }

    fn add_listener(&self, tx: mpsc::UnboundedSender<MediaEvent>) -> ListenerId {
        let mut state = self.state.lock();
        state.next_listener += 1;
        let id = state.next_listener;
        state.listeners.push((id, tx));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<MediaEvent>) -> Vec<MediaEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn source(duration: f64) -> Option<MediaSource> {
        Some(MediaSource {
            url: "http://origin/output/abc/720p.m3u8".into(),
            duration,
        })
    }

    #[test]
    fn test_listener_guard_unsubscribes() {
        let sink = Arc::new(HeadlessSink::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let _guard = ListenerGuard::acquire(sink.clone(), tx);
            assert_eq!(sink.listener_count(), 1);
        }
        assert_eq!(sink.listener_count(), 0);
    }

    #[test]
    fn test_source_attach_reports_metadata() {
        let sink = HeadlessSink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.add_listener(tx);

        sink.set_source(source(120.0));
        assert_eq!(
            drain(&mut rx),
            vec![
                MediaEvent::LoadedMetadata { duration: 120.0 },
                MediaEvent::CanPlay
            ]
        );
    }

    #[test]
    fn test_playback_pauses_at_end() {
        let sink = HeadlessSink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.add_listener(tx);
        sink.set_source(source(1.0));
        drain(&mut rx);

        sink.play();
        sink.advance(0.6);
        sink.advance(0.6);
        assert_eq!(
            drain(&mut rx),
            vec![
                MediaEvent::Play,
                MediaEvent::TimeUpdate(0.6),
                MediaEvent::TimeUpdate(1.0),
                MediaEvent::Pause
            ]
        );
        assert!(sink.snapshot().paused);
    }

    #[test]
    fn test_seek_is_clamped_to_media() {
        let sink = HeadlessSink::new();
        sink.set_source(source(30.0));
        sink.set_current_time(45.0);
        assert_eq!(sink.current_time(), 30.0);
        sink.set_current_time(-3.0);
        assert_eq!(sink.current_time(), 0.0);
    }

    #[test]
    fn test_detach_pauses_playback() {
        let sink = HeadlessSink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.add_listener(tx);
        sink.set_source(source(10.0));
        sink.play();
        drain(&mut rx);

        sink.set_source(None);
        assert_eq!(drain(&mut rx), vec![MediaEvent::Pause]);
        assert!(!sink.snapshot().has_source);
    }

    #[test]
    fn test_closed_listener_is_dropped() {
        let sink = HeadlessSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sink.add_listener(tx);
        drop(rx);
        sink.stall();
        assert_eq!(sink.listener_count(), 0);
    }
}
