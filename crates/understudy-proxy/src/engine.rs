//! Mode dispatch for intercepted requests.
//!
//! The engine is transport-agnostic: the hudsucker handler converts hyper
//! requests into [`RequestDetails`], calls [`ProxyEngine::process`] and writes
//! the returned [`ResponseDetails`] back. Every failure on this path becomes
//! an error response; nothing here panics or aborts the connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use hyper::StatusCode;
use parking_lot::RwLock;
use regex::Regex;

use understudy_core::fingerprint::{self, FingerprintKey};
use understudy_core::{
    MetricsCounter, MiddlewareBridge, Mode, ModeState, RecordsView, RequestDetails,
    RequestResponsePair, ResponseDetails,
};
use understudy_storage::Cache;

use crate::error::{ProxyError, Result};
use crate::import::{self, ImportSource};
use crate::upstream::{Upstream, UpstreamConfig};

/// Destination pattern matching every host.
pub const DEFAULT_DESTINATION: &str = ".";

/// Request type stored with captured pairs.
pub const RECORDING_REQUEST_TYPE: &str = "recording";

const CAPTURE_FAILED: &str = "Could not capture request";
const SIMULATE_FAILED: &str = "Failed to simulate";
const SIMULATE_MISS: &str = "Could not find recorded request, please record it first!";
const SYNTHESIZE_FAILED: &str = "Could not create synthetic response!";
const VIRTUALIZE_FAILED: &str =
    "There was an error when forwarding the request to the intended destination";

/// Builds the plain-text error response returned to clients.
pub fn error_response(
    status: u16,
    message: &str,
    error: &dyn std::fmt::Display,
) -> ResponseDetails {
    ResponseDetails::new(
        status,
        format!("Understudy Error! {}. Got error: {}\n", message, error),
    )
    .with_header("Content-Type", "text/plain")
}

/// Engine settings fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial mode.
    pub mode: Mode,
    /// Regex selecting the hosts handled by the mode pipeline.
    pub destination: String,
    /// Transform used by Modify, Synthesize and optionally Capture/Simulate.
    pub middleware: Option<MiddlewareBridge>,
    /// Upstream client settings.
    pub upstream: UpstreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            destination: DEFAULT_DESTINATION.to_string(),
            middleware: None,
            upstream: UpstreamConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the initial mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the destination filter.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Sets the transform.
    pub fn with_middleware(mut self, middleware: MiddlewareBridge) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Sets the upstream client settings.
    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = upstream;
        self
    }
}

struct EngineInner {
    requests: Arc<dyn Cache>,
    metadata: Arc<dyn Cache>,
    mode: ModeState,
    counter: MetricsCounter,
    destination: RwLock<Regex>,
    middleware: Option<MiddlewareBridge>,
    upstream: Upstream,
    import_client: reqwest::Client,
}

/// The mode state machine shared by the proxy handler and the admin API.
///
/// Cloning is cheap; clones share mode, counters and caches.
#[derive(Clone)]
pub struct ProxyEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("mode", &self.mode())
            .field("destination", &self.destination())
            .field("middleware", &self.inner.middleware)
            .finish()
    }
}

impl ProxyEngine {
    /// Creates an engine over the given request and metadata caches.
    ///
    /// Fails when the destination does not compile or the initial mode needs
    /// a transform that is not configured.
    pub fn new(
        config: EngineConfig,
        requests: Arc<dyn Cache>,
        metadata: Arc<dyn Cache>,
    ) -> Result<Self> {
        if config.mode.requires_transform() && config.middleware.is_none() {
            return Err(missing_middleware(config.mode));
        }
        let destination = Regex::new(&config.destination)?;
        let upstream = Upstream::new(&config.upstream)?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                requests,
                metadata,
                mode: ModeState::new(config.mode),
                counter: MetricsCounter::new(),
                destination: RwLock::new(destination),
                middleware: config.middleware,
                upstream,
                import_client: reqwest::Client::new(),
            }),
        })
    }

    /// Returns the active mode.
    pub fn mode(&self) -> Mode {
        self.inner.mode.get()
    }

    /// Switches mode, returning the previous one.
    ///
    /// Requests already in flight finish in the mode they started with.
    pub fn set_mode(&self, mode: Mode) -> Result<Mode> {
        if mode.requires_transform() && self.inner.middleware.is_none() {
            return Err(missing_middleware(mode));
        }
        let previous = self.inner.mode.set(mode);
        if previous != mode {
            tracing::info!("Mode changed from {} to {}", previous, mode);
        }
        Ok(previous)
    }

    /// Returns the destination pattern.
    pub fn destination(&self) -> String {
        self.inner.destination.read().as_str().to_string()
    }

    /// Replaces the destination pattern.
    pub fn set_destination(&self, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)?;
        *self.inner.destination.write() = regex;
        tracing::info!("Destination set to {}", pattern);
        Ok(())
    }

    /// Returns true when `host` is handled by the mode pipeline.
    pub fn matches_destination(&self, host: &str) -> bool {
        self.inner.destination.read().is_match(host)
    }

    /// Per-mode request counters.
    pub fn counter(&self) -> &MetricsCounter {
        &self.inner.counter
    }

    /// The configured transform, if any.
    pub fn middleware(&self) -> Option<&MiddlewareBridge> {
        self.inner.middleware.as_ref()
    }

    /// Handles one request in the mode active when it arrives.
    pub async fn process(&self, request: RequestDetails) -> ResponseDetails {
        let mode = self.mode();
        tracing::debug!(
            "{} {} {}{} ({})",
            mode,
            request.method,
            request.destination,
            request.path,
            request.scheme
        );

        let response = match mode {
            Mode::Virtualize => self.virtualize(&request).await,
            Mode::Capture => self.capture(request).await,
            Mode::Simulate => self.simulate(request).await,
            Mode::Modify => self.modify(request).await,
            Mode::Synthesize => self.synthesize(request).await,
        };

        self.inner.counter.count(mode);
        response
    }

    async fn virtualize(&self, request: &RequestDetails) -> ResponseDetails {
        match self.inner.upstream.forward(request).await {
            Ok(response) => response,
            Err(e) => error_response(502, VIRTUALIZE_FAILED, &e),
        }
    }

    async fn capture(&self, request: RequestDetails) -> ResponseDetails {
        let key = fingerprint::key(&request);

        let outgoing = match &self.inner.middleware {
            Some(bridge) => {
                let pair = RequestResponsePair::new(request.clone(), ResponseDetails::default());
                match bridge.transform(&pair, key.as_str()).await {
                    Ok(transformed) => transformed.request,
                    Err(e) => {
                        tracing::error!("Transform failed while capturing: {}", e);
                        return error_response(503, CAPTURE_FAILED, &e);
                    }
                }
            }
            None => request.clone(),
        };

        let response = match self.inner.upstream.forward(&outgoing).await {
            Ok(response) => response,
            Err(e) => return error_response(503, CAPTURE_FAILED, &e),
        };

        let pair = RequestResponsePair::new(request, response.clone())
            .with_request_type(RECORDING_REQUEST_TYPE);
        match self.save(&key, &pair).await {
            Ok(()) => tracing::info!(
                "Captured {} {}{} -> {}",
                pair.request.method,
                pair.request.destination,
                pair.request.path,
                response.status
            ),
            Err(e) => tracing::error!("Failed to save captured pair {}: {}", key, e),
        }

        response
    }

    async fn simulate(&self, request: RequestDetails) -> ResponseDetails {
        let key = fingerprint::key(&request);

        let stored = match self.lookup(&key).await {
            Ok(pair) => pair,
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    "No recorded response for {} {}{} ({})",
                    request.method,
                    request.destination,
                    request.path,
                    key
                );
                return error_response(412, SIMULATE_MISS, &e);
            }
            Err(e) => {
                tracing::error!("Failed to read recorded pair {}: {}", key, e);
                return error_response(500, SIMULATE_FAILED, &e);
            }
        };

        match &self.inner.middleware {
            Some(bridge) => {
                let pair = RequestResponsePair::new(request, stored.response);
                match bridge.transform(&pair, key.as_str()).await {
                    Ok(transformed) => transformed.response,
                    Err(e) => {
                        tracing::error!("Transform failed while simulating: {}", e);
                        error_response(503, SIMULATE_FAILED, &e)
                    }
                }
            }
            None => stored.response,
        }
    }

    async fn modify(&self, request: RequestDetails) -> ResponseDetails {
        let Some(bridge) = &self.inner.middleware else {
            let e = missing_middleware(Mode::Modify);
            return error_response(503, &modify_failed("none"), &e);
        };
        let failed = modify_failed(&bridge.transform_definition().to_string());
        let key = fingerprint::key(&request);

        let pair = RequestResponsePair::new(request.clone(), ResponseDetails::default());
        let outgoing = match bridge.transform(&pair, key.as_str()).await {
            Ok(transformed) => transformed.request,
            Err(e) => {
                tracing::error!("Request transform failed: {}", e);
                return error_response(503, &failed, &e);
            }
        };

        let response = match self.inner.upstream.forward(&outgoing).await {
            Ok(response) => response,
            Err(e) => return error_response(503, &failed, &e),
        };

        let pair = RequestResponsePair::new(request, response);
        match bridge.transform(&pair, key.as_str()).await {
            Ok(transformed) => transformed.response,
            Err(e) => {
                tracing::error!("Response transform failed: {}", e);
                error_response(503, &failed, &e)
            }
        }
    }

    async fn synthesize(&self, request: RequestDetails) -> ResponseDetails {
        let Some(bridge) = &self.inner.middleware else {
            let e = missing_middleware(Mode::Synthesize);
            return error_response(503, SYNTHESIZE_FAILED, &e);
        };
        let key = fingerprint::key(&request);

        let pair = RequestResponsePair::new(request, ResponseDetails::default());
        let synthesized = match bridge.transform(&pair, key.as_str()).await {
            Ok(transformed) => transformed.response,
            Err(e) => {
                tracing::error!("Synthesize transform failed: {}", e);
                return error_response(503, SYNTHESIZE_FAILED, &e);
            }
        };

        if StatusCode::from_u16(synthesized.status).is_err() {
            let e = ProxyError::Http(format!("invalid status code {}", synthesized.status));
            tracing::error!("Synthesize transform returned no usable response: {}", e);
            return error_response(503, SYNTHESIZE_FAILED, &e);
        }
        synthesized
    }

    async fn save(&self, key: &FingerprintKey, pair: &RequestResponsePair) -> Result<()> {
        let value = fingerprint::encode(pair)?;
        let key = key.as_bytes().to_vec();
        blocking(self.inner.requests.clone(), move |cache| cache.set(&key, &value)).await
    }

    async fn lookup(&self, key: &FingerprintKey) -> Result<RequestResponsePair> {
        let key = key.as_bytes().to_vec();
        let value = blocking(self.inner.requests.clone(), move |cache| cache.get(&key)).await?;
        Ok(fingerprint::decode(&value)?)
    }

    /// Returns every recorded pair as an envelope.
    ///
    /// Values that no longer decode are skipped.
    pub async fn records(&self) -> Result<RecordsView> {
        let values = blocking(self.inner.requests.clone(), |cache| cache.get_all_values()).await?;

        let mut data = Vec::with_capacity(values.len());
        for value in values {
            match fingerprint::decode(&value) {
                Ok(pair) => data.push(pair.to_view()),
                Err(e) => tracing::error!("Skipping undecodable record: {}", e),
            }
        }
        Ok(RecordsView { data })
    }

    /// Stores every pair of `view`, overwriting pairs with the same
    /// fingerprint. Returns the number stored.
    pub async fn import_records(&self, view: RecordsView) -> Result<usize> {
        let total = view.data.len();
        let (pairs, mut failed) = import::prepare(view)?;

        let mut entries = Vec::with_capacity(pairs.len());
        for (key, pair) in pairs {
            match fingerprint::encode(&pair) {
                Ok(value) => entries.push((key.as_bytes().to_vec(), value)),
                Err(e) => {
                    tracing::error!("Failed to encode imported pair {}: {}", key, e);
                    failed += 1;
                }
            }
        }

        let (imported, store_failed) = blocking(self.inner.requests.clone(), move |cache| {
            let mut imported = 0;
            let mut store_failed = 0;
            for (key, value) in entries {
                match cache.set(&key, &value) {
                    Ok(()) => imported += 1,
                    Err(e) => {
                        tracing::error!("Failed to store imported pair: {}", e);
                        store_failed += 1;
                    }
                }
            }
            Ok((imported, store_failed))
        })
        .await?;
        failed += store_failed;

        tracing::info!(
            "Import finished: {} total, {} imported, {} failed",
            total,
            imported,
            failed
        );
        Ok(imported)
    }

    /// Imports pairs from a `.json` file or an `http(s)://` URL.
    pub async fn import(&self, location: &str) -> Result<usize> {
        let source = ImportSource::parse(location)?;
        tracing::info!("Importing records from {}", source);
        let view = source.load(&self.inner.import_client).await?;
        self.import_records(view).await
    }

    /// Removes every recorded pair.
    pub async fn delete_records(&self) -> Result<()> {
        blocking(self.inner.requests.clone(), |cache| cache.delete_data()).await?;
        tracing::info!("Recorded pairs deleted");
        Ok(())
    }

    /// Number of recorded pairs.
    pub async fn records_count(&self) -> Result<usize> {
        blocking(self.inner.requests.clone(), |cache| cache.records_count()).await
    }

    /// Returns all metadata entries.
    pub async fn metadata(&self) -> Result<BTreeMap<String, String>> {
        let entries =
            blocking(self.inner.metadata.clone(), |cache| cache.get_all_entries()).await?;
        Ok(entries
            .into_iter()
            .map(|(k, v)| {
                (
                    String::from_utf8_lossy(&k).into_owned(),
                    String::from_utf8_lossy(&v).into_owned(),
                )
            })
            .collect())
    }

    /// Stores a metadata entry.
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(ProxyError::Config("metadata key must not be empty".to_string()));
        }
        let key = key.as_bytes().to_vec();
        let value = value.as_bytes().to_vec();
        blocking(self.inner.metadata.clone(), move |cache| cache.set(&key, &value)).await
    }

    /// Removes every metadata entry.
    pub async fn delete_metadata(&self) -> Result<()> {
        blocking(self.inner.metadata.clone(), |cache| cache.delete_data()).await
    }
}

fn missing_middleware(mode: Mode) -> ProxyError {
    ProxyError::Config(format!("{} mode requires middleware", mode))
}

fn modify_failed(definition: &str) -> String {
    format!(
        "Middleware ({}) failed or something else happened!",
        definition
    )
}

/// Runs a cache operation on the blocking pool.
async fn blocking<T, F>(cache: Arc<dyn Cache>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Cache) -> understudy_storage::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(cache.as_ref()))
        .await
        .map_err(|e| ProxyError::Task(e.to_string()))?
        .map_err(ProxyError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;
    use understudy_storage::MemoryCache;

    use crate::upstream::{FORWARDED_HEADER, FORWARDED_VALUE};

    async fn spawn_upstream(hits: Arc<AtomicUsize>) -> SocketAddr {
        let app = Router::new()
            .route(
                "/path1",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (AxumStatus::CREATED, "created")
                }),
            )
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn engine(config: EngineConfig) -> ProxyEngine {
        ProxyEngine::new(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap()
    }

    fn request(addr: SocketAddr) -> RequestDetails {
        RequestDetails::new("GET", "http", addr.to_string(), "/path1")
    }

    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, body: &str) -> MiddlewareBridge {
        let path = dir.path().join("transform.sh");
        std::fs::write(&path, body).unwrap();
        MiddlewareBridge::from_definition(&format!("sh {}", path.display())).unwrap()
    }

    #[test]
    fn test_error_response_format() {
        let response = error_response(412, SIMULATE_MISS, &"not found");
        assert_eq!(response.status, 412);
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            "Understudy Error! Could not find recorded request, please record it first!. Got error: not found\n"
        );
    }

    #[test]
    fn test_transform_modes_need_middleware() {
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.mode(), Mode::Virtualize);

        assert!(engine.set_mode(Mode::Synthesize).is_err());
        assert!(engine.set_mode(Mode::Modify).is_err());
        assert_eq!(engine.mode(), Mode::Virtualize);

        assert_eq!(engine.set_mode(Mode::Capture).unwrap(), Mode::Virtualize);
        assert_eq!(engine.mode(), Mode::Capture);

        let err = ProxyEngine::new(
            EngineConfig::default().with_mode(Mode::Synthesize),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_destination_filter() {
        let engine = engine(EngineConfig::default().with_destination("example\\.com$"));
        assert!(engine.matches_destination("api.example.com"));
        assert!(!engine.matches_destination("other.org"));

        assert!(engine.set_destination("(").is_err());
        assert_eq!(engine.destination(), "example\\.com$");

        engine.set_destination("other").unwrap();
        assert!(engine.matches_destination("other.org"));
    }

    #[tokio::test]
    async fn test_virtualize_forwards_and_marks_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_upstream(hits.clone()).await;
        let engine = engine(EngineConfig::default());

        let response = engine.process(request(addr)).await;
        assert_eq!(response.status, 201);
        assert_eq!(response.body, b"created");
        assert_eq!(response.header(FORWARDED_HEADER), Some(FORWARDED_VALUE));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.records_count().await.unwrap(), 0);
        assert_eq!(engine.counter().get(Mode::Virtualize), 1);
    }

    #[tokio::test]
    async fn test_virtualize_unreachable_is_bad_gateway() {
        let engine = engine(EngineConfig::default());
        let response = engine
            .process(RequestDetails::new("GET", "http", "127.0.0.1:9", "/"))
            .await;
        assert_eq!(response.status, 502);
    }

    #[tokio::test]
    async fn test_capture_then_simulate_replays_without_upstream() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = spawn_upstream(hits.clone()).await;
        let engine = engine(EngineConfig::default().with_mode(Mode::Capture));

        let captured = engine.process(request(addr)).await;
        assert_eq!(captured.status, 201);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.records_count().await.unwrap(), 1);

        let records = engine.records().await.unwrap();
        assert_eq!(
            records.data[0].request.request_type.as_deref(),
            Some(RECORDING_REQUEST_TYPE)
        );

        engine.set_mode(Mode::Simulate).unwrap();
        let simulated = engine.process(request(addr)).await;
        assert_eq!(simulated.status, captured.status);
        assert_eq!(simulated.body, captured.body);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(engine.counter().get(Mode::Capture), 1);
        assert_eq!(engine.counter().get(Mode::Simulate), 1);
    }

    #[tokio::test]
    async fn test_simulate_miss_is_precondition_failed() {
        let engine = engine(EngineConfig::default().with_mode(Mode::Simulate));
        let response = engine
            .process(RequestDetails::new("GET", "http", "dest", "/unknown"))
            .await;
        assert_eq!(response.status, 412);
        assert!(String::from_utf8_lossy(&response.body).contains(SIMULATE_MISS));
    }

    #[tokio::test]
    async fn test_import_overwrites_by_fingerprint() {
        let engine = engine(EngineConfig::default().with_mode(Mode::Simulate));
        let first = RequestResponsePair::new(
            RequestDetails::new("GET", "http", "dest", "/a"),
            ResponseDetails::new(200, "first"),
        );
        let second = RequestResponsePair::new(
            RequestDetails::new("GET", "http", "dest", "/a"),
            ResponseDetails::new(200, "second"),
        );

        let view = RecordsView {
            data: vec![first.to_view(), second.to_view()],
        };
        assert_eq!(engine.import_records(view).await.unwrap(), 2);
        assert_eq!(engine.records_count().await.unwrap(), 1);

        let response = engine
            .process(RequestDetails::new("GET", "http", "dest", "/a"))
            .await;
        assert_eq!(response.body, b"second");

        engine.delete_records().await.unwrap();
        assert_eq!(engine.records_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_rejects_empty_envelope() {
        let engine = engine(EngineConfig::default());
        assert!(engine.import_records(RecordsView::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let engine = engine(EngineConfig::default());
        engine.set_metadata("owner", "qa").await.unwrap();
        engine.set_metadata("owner", "dev").await.unwrap();
        engine.set_metadata("suite", "smoke").await.unwrap();
        assert!(engine.set_metadata("", "x").await.is_err());

        let metadata = engine.metadata().await.unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["owner"], "dev");

        engine.delete_metadata().await.unwrap();
        assert!(engine.metadata().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_synthesize_uses_transform_response() {
        let dir = tempfile::TempDir::new().unwrap();
        let bridge = script(
            &dir,
            r#"cat > /dev/null
echo '{"request":{"path":"/","method":"GET","destination":"dest","scheme":"http","query":"","body":"","headers":{}},"response":{"status":200,"body":"synthetic","encodedBody":false,"headers":{}}}'
"#,
        );
        let engine = engine(
            EngineConfig::default()
                .with_middleware(bridge)
                .with_mode(Mode::Synthesize),
        );

        let response = engine
            .process(RequestDetails::new("GET", "http", "dest", "/"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"synthetic");
        assert_eq!(engine.counter().get(Mode::Synthesize), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_synthesize_failure_is_service_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let bridge = script(&dir, "cat > /dev/null\nexit 3\n");
        let engine = engine(
            EngineConfig::default()
                .with_middleware(bridge)
                .with_mode(Mode::Synthesize),
        );

        let response = engine
            .process(RequestDetails::new("GET", "http", "dest", "/"))
            .await;
        assert_eq!(response.status, 503);
        assert!(String::from_utf8_lossy(&response.body).contains(SYNTHESIZE_FAILED));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_synthesize_without_status_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        // Echoing the input back leaves the default status of zero
        let bridge = script(&dir, "cat\n");
        let engine = engine(
            EngineConfig::default()
                .with_middleware(bridge)
                .with_mode(Mode::Synthesize),
        );

        let response = engine
            .process(RequestDetails::new("GET", "http", "dest", "/"))
            .await;
        assert_eq!(response.status, 503);
    }
}
