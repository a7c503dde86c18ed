//! HTTP-backed HLS engine
//!
//! Fetches the multivariant playlist, reports its variants, then loads the
//! lowest-bandwidth rendition's media playlist to learn the duration and
//! attaches it to the sink. Segment scheduling and bandwidth estimation are
//! out of its scope.

use parking_lot::Mutex;
use reqwest::{Client, Url};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{EngineEvent, EngineEvents, EngineFactory, StreamEngine};
use super::manifest::{parse_media_duration, parse_multivariant};
use super::sink::{MediaSink, MediaSource};
use super::PlaybackError;

/// Factory for [`HlsEngine`]s sharing one HTTP client
#[derive(Clone, Default)]
pub struct HlsEngineFactory {
    client: Client,
}

impl HlsEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl EngineFactory for HlsEngineFactory {
    fn is_supported(&self) -> bool {
        true
    }

    fn create(&self, events: EngineEvents) -> Box<dyn StreamEngine> {
        Box::new(HlsEngine::new(self.client.clone(), events))
    }
}

type SharedSink = Arc<Mutex<Option<Arc<dyn MediaSink>>>>;

pub struct HlsEngine {
    client: Client,
    events: EngineEvents,
    source: Option<Url>,
    /// Shared with the loading task so detach and attach never interleave
    media: SharedSink,
    cancel: CancellationToken,
    loading: bool,
    destroyed: bool,
}

impl HlsEngine {
    pub fn new(client: Client, events: EngineEvents) -> Self {
        Self {
            client,
            events,
            source: None,
            media: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            loading: false,
            destroyed: false,
        }
    }

    fn ensure_alive(&self) -> Result<(), PlaybackError> {
        if self.destroyed {
            return Err(PlaybackError::Engine("engine already destroyed".into()));
        }
        Ok(())
    }

    /// Start loading once both a source and a sink are known
    fn maybe_start(&mut self) -> Result<(), PlaybackError> {
        if self.loading || self.media.lock().is_none() {
            return Ok(());
        }
        let Some(url) = self.source.clone() else {
            return Ok(());
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PlaybackError::Engine(format!("no async runtime: {}", e)))?;

        let client = self.client.clone();
        let events = self.events.clone();
        let media = self.media.clone();
        let cancel = self.cancel.clone();

        runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Manifest load for {} cancelled", url);
                }
                result = load(&client, &url, &events, &media) => {
                    if let Err(details) = result {
                        warn!("Failed to load {}: {}", url, details);
                        events.emit(EngineEvent::Error { fatal: true, details });
                    }
                }
            }
        });

        self.loading = true;
        Ok(())
    }
}

impl StreamEngine for HlsEngine {
    fn load_source(&mut self, url: &str) -> Result<(), PlaybackError> {
        self.ensure_alive()?;
        let url = Url::parse(url)
            .map_err(|e| PlaybackError::ManifestLoad(format!("invalid manifest URL {}: {}", url, e)))?;
        self.source = Some(url);
        self.maybe_start()
    }

    fn attach_media(&mut self, sink: Arc<dyn MediaSink>) -> Result<(), PlaybackError> {
        self.ensure_alive()?;
        *self.media.lock() = Some(sink);
        self.maybe_start()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.cancel.cancel();

        if let Some(sink) = self.media.lock().take() {
            sink.set_source(None);
        }
        debug!("HLS engine destroyed");
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn fetch_text(client: &Client, url: &Url) -> Result<String, String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| format!("request to {} failed: {}", url, e))?
        .error_for_status()
        .map_err(|e| format!("{} returned error status: {}", url, e))?;

    response
        .text()
        .await
        .map_err(|e| format!("failed to read {}: {}", url, e))
}

async fn load(
    client: &Client,
    url: &Url,
    events: &EngineEvents,
    media: &SharedSink,
) -> Result<(), String> {
    let master = fetch_text(client, url).await?;
    let variants = parse_multivariant(&master, url).map_err(|e| e.to_string())?;

    info!("Manifest {} parsed: {} variant(s)", url, variants.len());

    let initial = variants
        .iter()
        .min_by_key(|v| v.bandwidth)
        .map(|v| v.url.clone())
        .ok_or_else(|| "manifest lists no variant".to_string())?;

    if !events.emit(EngineEvent::ManifestParsed { variants }) {
        return Ok(());
    }

    let playlist = fetch_text(client, &initial).await?;
    let duration = parse_media_duration(&playlist).map_err(|e| e.to_string())?;
    debug!("Initial rendition {} lasts {:.1}s", initial, duration);

    if let Some(sink) = media.lock().as_ref() {
        sink.set_source(Some(MediaSource {
            url: initial.to_string(),
            duration,
        }));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::HeadlessSink;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720
720p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
360p/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg0.ts
#EXTINF:5.0,
seg1.ts
#EXT-X-ENDLIST
";

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_loads_manifest_and_attaches_lowest_variant() {
        let server = MockServer::start().await;
        serve(&server, "/output/abc123/master.m3u8", MASTER).await;
        serve(&server, "/output/abc123/360p/index.m3u8", MEDIA).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Arc::new(HeadlessSink::new());
        let mut engine = HlsEngineFactory::new().create(EngineEvents::new(tx));

        engine
            .load_source(&format!("{}/output/abc123/master.m3u8", server.uri()))
            .unwrap();
        engine.attach_media(sink.clone()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            EngineEvent::ManifestParsed { variants } => assert_eq!(variants.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while !sink.snapshot().has_source {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let source = sink.source().unwrap();
        assert!(source.url.ends_with("/output/abc123/360p/index.m3u8"));
        assert_eq!(source.duration, 15.0);

        engine.destroy();
        assert!(!sink.snapshot().has_source);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = HlsEngine::new(Client::new(), EngineEvents::new(tx));
        engine
            .load_source(&format!("{}/output/missing/master.m3u8", server.uri()))
            .unwrap();
        engine.attach_media(Arc::new(HeadlessSink::new())).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, EngineEvent::Error { fatal: true, .. }));
    }

    #[tokio::test]
    async fn test_destroyed_engine_rejects_calls() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = HlsEngine::new(Client::new(), EngineEvents::new(tx));
        engine.destroy();
        engine.destroy();
        assert!(engine.load_source("http://localhost/master.m3u8").is_err());
    }

    #[test]
    fn test_invalid_manifest_url() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = HlsEngine::new(Client::new(), EngineEvents::new(tx));
        assert!(matches!(
            engine.load_source("not a url"),
            Err(PlaybackError::ManifestLoad(_))
        ));
    }
}
