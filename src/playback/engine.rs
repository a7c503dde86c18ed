//! Adaptive streaming engine seam
//!
//! The engine is consumed as an opaque library: it loads a manifest, attaches
//! to a media sink, reports lifecycle events and must be destroyed when the
//! session ends.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::manifest::Variant;
use super::sink::MediaSink;
use super::PlaybackError;

/// Lifecycle events reported by an engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The multivariant playlist was fetched and parsed
    ManifestParsed { variants: Vec<Variant> },
    /// Loading failed. Fatal errors end the session.
    Error { fatal: bool, details: String },
}

/// Sending half handed to each engine instance.
///
/// Every session gets its own channel, so events from a destroyed engine
/// never reach the next session.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEvents {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Report an event. Returns false once the session is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One adaptive streaming engine instance
pub trait StreamEngine: Send {
    /// Start loading the manifest at `url`
    fn load_source(&mut self, url: &str) -> Result<(), PlaybackError>;

    /// Bind the engine to the sink it feeds
    fn attach_media(&mut self, sink: Arc<dyn MediaSink>) -> Result<(), PlaybackError>;

    /// Abort all network activity and detach from the sink. Idempotent.
    fn destroy(&mut self);
}

/// Creates engine instances and reports platform support
pub trait EngineFactory: Send + Sync {
    fn is_supported(&self) -> bool;

    fn create(&self, events: EngineEvents) -> Box<dyn StreamEngine>;
}
