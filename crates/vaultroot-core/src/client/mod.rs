//! Resilient content client
//!
//! Every remote call goes through one `ContentClient`: a shared circuit breaker, a
//! retry state machine with jittered exponential backoff, and strict per-endpoint
//! response schemas. The client is an explicit handle; tests build isolated
//! instances around a scripted [`Transport`].

mod breaker;
mod clock;
mod retry;
pub mod schema;
mod transport;

pub use breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use clock::{Clock, FixedJitter, HashJitter, JitterSource, TokioClock};
pub use retry::{RetryMachine, RetryPolicy, RetryState};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};

use crate::config::{Config, TimeoutConfig};
use crate::error::{Result, VaultRootError};
use crate::index::{extract_tags, extract_title};
use chrono::{DateTime, TimeZone, Utc};
use futures::{FutureExt, Stream, StreamExt};
use reqwest::Url;
use schema::{HealthResponse, ListingResponse, NoteResponse, NOTE_JSON};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Generate SHA-256 hash of content
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A note fetched from the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub path: String,
    pub title: String,
    pub content: String,
    pub hash: String,
    pub tags: Vec<String>,
    pub frontmatter: BTreeMap<String, serde_json::Value>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub size: u64,
}

impl Document {
    fn from_note(requested_path: &str, note: NoteResponse) -> Self {
        let path = if note.path.is_empty() {
            requested_path.to_string()
        } else {
            note.path
        };
        let tags = extract_tags(&note.content, &note.tags);
        let title = extract_title(&note.content, &path);

        Self {
            title,
            hash: hash_content(&note.content),
            tags,
            frontmatter: note.frontmatter.unwrap_or_default().into_iter().collect(),
            modified: millis_to_datetime(note.stat.mtime),
            created: millis_to_datetime(note.stat.ctime),
            size: note.stat.size,
            content: note.content,
            path,
        }
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

/// Result of walking the remote listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    /// File paths, sorted and unique
    pub paths: Vec<String>,
    /// Sub-directories whose listing failed
    pub failed_dirs: Vec<String>,
    /// Walk stopped at the deadline
    pub truncated: bool,
}

impl Listing {
    pub fn is_partial(&self) -> bool {
        self.truncated || !self.failed_dirs.is_empty()
    }
}

/// Remote reachability as seen by a health check
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteHealth {
    Up { authenticated: Option<bool> },
    Down { reason: String },
}

/// Health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub remote: RemoteHealth,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub latency_ms: u64,
}

/// Client counters
#[derive(Debug, Default)]
struct ClientMetrics {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    short_circuits: AtomicU64,
}

/// Snapshot of client counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
    pub short_circuits: u64,
}

/// Outcome of waiting for the next item under an optional deadline
pub(crate) enum Next<T> {
    Item(T),
    Done,
    Expired,
}

/// Pull the next item from a stream unless the deadline passes first
pub(crate) async fn next_before<S>(stream: &mut S, deadline: Option<Instant>) -> Next<S::Item>
where
    S: Stream + Unpin,
{
    let next = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Next::Expired,
        },
        None => stream.next().await,
    };
    match next {
        Some(item) => Next::Item(item),
        None => Next::Done,
    }
}

/// Resilient client for the remote content store
pub struct ContentClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
    listing_root: String,
    timeouts: TimeoutConfig,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    list_concurrency: usize,
    max_depth: usize,
    metrics: ClientMetrics,
}

impl ContentClient {
    /// Create a client talking HTTP(S) to `config.remote.url`
    pub fn new(config: &Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let base_url = Url::parse(&config.remote.url).map_err(|e| {
            VaultRootError::Config(format!("Invalid remote.url {}: {}", config.remote.url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(VaultRootError::Config(format!(
                "remote.url {} cannot be used as a base URL",
                config.remote.url
            )));
        }

        Ok(Self {
            transport,
            base_url,
            listing_root: config.remote.listing_root.trim_matches('/').to_string(),
            timeouts: config.timeouts.clone(),
            retry: RetryPolicy::from(&config.retry),
            breaker: CircuitBreaker::new(&config.breaker),
            clock: Arc::new(TokioClock),
            jitter: Arc::new(HashJitter::default()),
            list_concurrency: config.fetch.workers.max(1),
            max_depth: config.remote.max_depth.max(1),
            metrics: ClientMetrics::default(),
        })
    }

    /// Replace the clock used for backoff and breaker timing
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the jitter source
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn metrics(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            requests: self.metrics.requests.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            short_circuits: self.metrics.short_circuits.load(Ordering::Relaxed),
        }
    }

    /// URL for a store path; `dir` adds the trailing slash of a folder listing
    fn url_for(&self, path: &str, dir: bool) -> Result<String> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                VaultRootError::Config("remote.url cannot be used as a base URL".to_string())
            })?;
            segments.pop_if_empty();
            segments.extend(self.listing_root.split('/').filter(|s| !s.is_empty()));
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if dir {
                segments.push("");
            }
        }
        Ok(url.to_string())
    }

    /// Map an HTTP status to the error taxonomy
    fn classify(path: &str, response: TransportResponse) -> Result<String> {
        match response.status {
            200..=299 => Ok(response.body),
            401 | 403 => Err(VaultRootError::Auth(format!(
                "HTTP {} for {}",
                response.status, path
            ))),
            404 => Err(VaultRootError::NotFound(path.to_string())),
            408 => Err(VaultRootError::Network(format!("HTTP 408 for {}", path))),
            429 => Err(VaultRootError::RateLimited {
                retry_after: response.retry_after,
            }),
            status => Err(VaultRootError::Status {
                status,
                message: truncate_message(&response.body),
            }),
        }
    }

    /// Run one logical call through the breaker and the retry machine
    async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut machine = RetryMachine::new(&self.retry);
        machine.start();

        loop {
            let permit = match self.breaker.try_acquire(self.clock.now()) {
                Ok(permit) => permit,
                Err(e) => {
                    self.metrics.short_circuits.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            };

            self.metrics.requests.fetch_add(1, Ordering::Relaxed);
            let error = match op().await {
                Ok(value) => {
                    permit.succeed();
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.counts_toward_breaker() {
                permit.fail(self.clock.now());
            } else {
                permit.succeed();
            }

            match machine.on_failure(&error, self.jitter.sample()).clone() {
                RetryState::Backoff { attempt, delay } => {
                    tracing::debug!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        op_name,
                        attempt,
                        self.retry.max_attempts,
                        error,
                        delay
                    );
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    self.clock.sleep(delay).await;
                    machine.on_backoff_elapsed();
                }
                _ => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(error);
                }
            }
        }
    }

    async fn get(
        &self,
        path: &str,
        url: &str,
        accept: Option<&'static str>,
        timeout: Duration,
    ) -> Result<String> {
        let response = self
            .transport
            .get(TransportRequest {
                url: url.to_string(),
                accept,
                timeout,
            })
            .await?;
        Self::classify(path, response)
    }

    /// Fetch one note
    pub async fn fetch(&self, path: &str) -> Result<Document> {
        let url = self.url_for(path, false)?;
        let body = self
            .execute("fetch", || self.get(path, &url, Some(NOTE_JSON), self.timeouts.fetch()))
            .await?;
        let note: NoteResponse = schema::parse("note", &body)?;
        Ok(Document::from_note(path, note))
    }

    /// List one directory (`""` for the root).
    ///
    /// The store answers with names relative to `dir`; they are returned joined onto
    /// `dir`, folders keeping their trailing `/`.
    pub async fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let url = self.url_for(dir, true)?;
        let body = self
            .execute("list", || self.get(dir, &url, None, self.timeouts.list()))
            .await?;
        let listing: ListingResponse = schema::parse("listing", &body)?;

        let prefix = dir.trim_matches('/');
        Ok(listing
            .files
            .iter()
            .map(|entry| entry.trim_start_matches('/'))
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                if prefix.is_empty() {
                    entry.to_string()
                } else {
                    format!("{}/{}", prefix, entry)
                }
            })
            .collect())
    }

    /// Walk the complete listing
    pub async fn list(&self) -> Result<Listing> {
        self.list_within(None).await
    }

    /// Walk the listing breadth-first with bounded concurrency.
    ///
    /// A failing root listing is an error. Failing sub-directories, folders deeper
    /// than `remote.max_depth` and an expired deadline produce a partial `Listing`
    /// instead. Each directory is listed at most once.
    pub async fn list_within(&self, deadline: Option<Instant>) -> Result<Listing> {
        let mut listing = Listing::default();
        let mut visited: HashSet<String> = HashSet::new();
        let root = self.list_dir("").await?;
        let mut frontier = absorb_entries(root, &mut listing.paths, &mut visited);
        let mut depth = 1;

        while !frontier.is_empty() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!("Listing deadline reached, returning partial listing");
                listing.truncated = true;
                break;
            }
            if depth > self.max_depth {
                tracing::warn!(
                    "Listing stopped at depth {}, {} folders left unlisted",
                    self.max_depth,
                    frontier.len()
                );
                listing.truncated = true;
                break;
            }

            let dirs = std::mem::take(&mut frontier);
            let mut pending = futures::stream::iter(dirs)
                .map(|dir| {
                    async move {
                        let result = self.list_dir(&dir).await;
                        (dir, result)
                    }
                    .boxed()
                })
                .buffer_unordered(self.list_concurrency);

            loop {
                match next_before(&mut pending, deadline).await {
                    Next::Item((_, Ok(entries))) => {
                        let dirs = absorb_entries(entries, &mut listing.paths, &mut visited);
                        frontier.extend(dirs);
                    }
                    Next::Item((dir, Err(e))) => {
                        tracing::warn!("Listing of {} failed: {}", dir, e);
                        listing.failed_dirs.push(dir);
                    }
                    Next::Done => break,
                    Next::Expired => {
                        tracing::warn!("Listing deadline reached, returning partial listing");
                        listing.truncated = true;
                        frontier.clear();
                        break;
                    }
                }
            }
            depth += 1;
        }

        listing.paths.sort();
        listing.paths.dedup();
        listing.failed_dirs.sort();
        Ok(listing)
    }

    /// Check the store without retries and without touching the breaker
    pub async fn health(&self) -> HealthStatus {
        let start = self.clock.now();
        let remote = self.check_remote().await;

        HealthStatus {
            remote,
            circuit: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            latency_ms: self.clock.now().saturating_duration_since(start).as_millis() as u64,
        }
    }

    async fn check_remote(&self) -> RemoteHealth {
        let url = self.base_url.to_string();
        let response = self
            .transport
            .get(TransportRequest {
                url,
                accept: None,
                timeout: self.timeouts.health(),
            })
            .await
            .and_then(|response| Self::classify("/", response))
            .and_then(|body| schema::parse::<HealthResponse>("health", &body));

        match response {
            Ok(health) if health.status.eq_ignore_ascii_case("ok") => RemoteHealth::Up {
                authenticated: health.authenticated,
            },
            Ok(health) => RemoteHealth::Down {
                reason: format!("status {}", health.status),
            },
            Err(e) => RemoteHealth::Down {
                reason: e.to_string(),
            },
        }
    }
}

/// Split listing entries into files (appended to `paths`) and sub-directories not
/// seen before
fn absorb_entries(
    entries: Vec<String>,
    paths: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> Vec<String> {
    let mut dirs = Vec::new();
    for entry in entries {
        if entry.ends_with('/') {
            if visited.insert(entry.clone()) {
                dirs.push(entry);
            }
        } else {
            paths.push(entry);
        }
    }
    dirs
}

fn truncate_message(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport shared by unit tests across the crate

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Answers from a queue per URL suffix; the last answer repeats
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<HashMap<String, VecDeque<Result<TransportResponse>>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(&self, suffix: &str, responses: Vec<Result<TransportResponse>>) {
            self.routes
                .lock()
                .unwrap()
                .insert(suffix.to_string(), responses.into_iter().collect());
        }

        pub fn note(&self, path: &str, content: &str, mtime_ms: i64) {
            let body = serde_json::json!({
                "path": path,
                "content": content,
                "tags": [],
                "frontmatter": {},
                "stat": {"ctime": mtime_ms, "mtime": mtime_ms, "size": content.len()}
            });
            let suffix = format!("/vault/{}", encode_path(path));
            self.route(&suffix, vec![Ok(TransportResponse::ok(body.to_string()))]);
        }

        pub fn listing(&self, dir: &str, files: &[&str]) {
            let body = serde_json::json!({ "files": files });
            let suffix = if dir.is_empty() {
                "/vault/".to_string()
            } else {
                format!("/vault/{}/", encode_path(dir.trim_end_matches('/')))
            };
            self.route(&suffix, vec![Ok(TransportResponse::ok(body.to_string()))]);
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    pub fn encode_path(path: &str) -> String {
        path.split('/')
            .map(|s| s.replace(' ', "%20"))
            .collect::<Vec<_>>()
            .join("/")
    }

    fn clone_result(r: &Result<TransportResponse>) -> Result<TransportResponse> {
        match r {
            Ok(resp) => Ok(resp.clone()),
            Err(e) => Err(e.replicate()),
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.calls.lock().unwrap().push(request.url.clone());
            let mut routes = self.routes.lock().unwrap();
            let key = routes
                .keys()
                .filter(|suffix| request.url.ends_with(suffix.as_str()))
                .max_by_key(|suffix| suffix.len())
                .cloned();
            match key.and_then(|k| routes.get_mut(&k)) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue
                    .front()
                    .map(clone_result)
                    .unwrap_or_else(|| Ok(TransportResponse::status(404))),
                None => Ok(TransportResponse::status(404)),
            }
        }
    }

    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.remote.url = "https://vault.test:27124".to_string();
        config.remote.api_key = None;
        config.index = crate::config::IndexConfig::ephemeral();
        config
    }

    pub fn client(transport: Arc<ScriptedTransport>) -> ContentClient {
        ContentClient::with_transport(&test_config(), transport)
            .unwrap()
            .with_jitter(Arc::new(FixedJitter(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_url_for_encodes_segments() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport);
        assert_eq!(
            client.url_for("Notas/Monge da Alta-Performance.md", false).unwrap(),
            "https://vault.test:27124/vault/Notas/Monge%20da%20Alta-Performance.md"
        );
        assert_eq!(
            client.url_for("", true).unwrap(),
            "https://vault.test:27124/vault/"
        );
        assert_eq!(
            client.url_for("Daily/", true).unwrap(),
            "https://vault.test:27124/vault/Daily/"
        );
    }

    #[tokio::test]
    async fn test_fetch_parses_note() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.note("a.md", "# Alpha\nbody #tag", 1_700_000_000_000);
        let client = client(transport);

        let doc = client.fetch("a.md").await.unwrap();
        assert_eq!(doc.path, "a.md");
        assert_eq!(doc.title, "Alpha");
        assert_eq!(doc.tags, vec!["tag"]);
        assert_eq!(doc.modified.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(doc.hash, hash_content("# Alpha\nbody #tag"));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());

        let err = client.fetch("missing.md").await.unwrap_err();
        assert!(matches!(err, VaultRootError::NotFound(_)));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            "/vault/a.md",
            vec![
                Ok(TransportResponse::status(503)),
                Err(VaultRootError::Network("reset".into())),
                Ok(TransportResponse::ok(
                    r#"{"path":"a.md","content":"x","stat":{"ctime":0,"mtime":0,"size":1}}"#,
                )),
            ],
        );
        let client = client(transport.clone());

        let doc = client.fetch("a.md").await.unwrap();
        assert_eq!(doc.content, "x");
        assert_eq!(transport.call_count(), 3);
        assert_eq!(client.metrics().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("/vault/a.md", vec![Ok(TransportResponse::status(500))]);
        let client = client(transport.clone());

        let err = client.fetch("a.md").await.unwrap_err();
        assert!(matches!(err, VaultRootError::Status { status: 500, .. }));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_auth_error_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("/vault/a.md", vec![Ok(TransportResponse::status(401))]);
        let client = client(transport.clone());

        assert!(matches!(
            client.fetch("a.md").await,
            Err(VaultRootError::Auth(_))
        ));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_hint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            "/vault/a.md",
            vec![
                Ok(TransportResponse {
                    status: 429,
                    retry_after: Some(Duration::from_secs(2)),
                    body: String::new(),
                }),
                Ok(TransportResponse::ok(
                    r#"{"path":"a.md","content":"x","stat":{"ctime":0,"mtime":0,"size":1}}"#,
                )),
            ],
        );
        let client = client(transport.clone());

        let start = Instant::now();
        client.fetch("a.md").await.unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_fails_fast() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("/vault/a.md", vec![Err(VaultRootError::Network("down".into()))]);

        let mut config = test_config();
        config.retry.max_attempts = 1;
        config.breaker.failure_threshold = 3;
        config.breaker.cooldown_ms = 10_000;
        let client = ContentClient::with_transport(&config, transport.clone()).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                client.fetch("a.md").await,
                Err(VaultRootError::Network(_))
            ));
        }
        assert_eq!(client.circuit_state(), CircuitState::Open);

        let calls_before = transport.call_count();
        let start = Instant::now();
        for _ in 0..10 {
            assert!(matches!(
                client.fetch("a.md").await,
                Err(VaultRootError::CircuitOpen { .. })
            ));
        }
        assert_eq!(transport.call_count(), calls_before);
        assert!(Instant::now() - start < Duration::from_millis(1));
        assert_eq!(client.metrics().short_circuits, 10);

        tokio::time::advance(Duration::from_secs(10)).await;
        // Trial call goes through (and fails again, reopening)
        assert!(matches!(
            client.fetch("a.md").await,
            Err(VaultRootError::Network(_))
        ));
        assert_eq!(transport.call_count(), calls_before + 1);
        assert_eq!(client.circuit_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_closed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("/vault/", vec![Ok(TransportResponse::ok(r#"{"data": []}"#))]);
        let client = client(transport);
        assert!(matches!(
            client.list().await,
            Err(VaultRootError::Schema(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_walks_directories_and_tolerates_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.listing("", &["root.md", "Daily/", "Broken/"]);
        transport.listing("Daily", &["2024-01-01.md", "Old/"]);
        transport.listing("Daily/Old", &["x.md"]);
        transport.route("/vault/Broken/", vec![Ok(TransportResponse::status(500))]);
        let client = client(transport);

        let listing = client.list().await.unwrap();
        assert_eq!(
            listing.paths,
            vec!["Daily/2024-01-01.md", "Daily/Old/x.md", "root.md"]
        );
        assert_eq!(listing.failed_dirs, vec!["Broken/"]);
        assert!(listing.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_joins_folder_named_like_its_parent() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.listing("", &["Daily/"]);
        transport.listing("Daily", &["Daily/", "x.md"]);
        transport.listing("Daily/Daily", &["y.md"]);
        let client = client(transport.clone());

        let listing = client.list().await.unwrap();
        assert_eq!(listing.paths, vec!["Daily/Daily/y.md", "Daily/x.md"]);
        assert!(!listing.is_partial());
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_stops_at_max_depth_on_endless_nesting() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.listing("", &["Loop/"]);
        // every folder below the root contains another Loop/
        transport.route(
            "Loop/",
            vec![Ok(TransportResponse::ok(
                serde_json::json!({ "files": ["Loop/", "n.md"] }).to_string(),
            ))],
        );
        let mut config = test_config();
        config.remote.max_depth = 5;
        let client = ContentClient::with_transport(&config, transport.clone())
            .unwrap()
            .with_jitter(Arc::new(FixedJitter(0.0)));

        let listing = client.list().await.unwrap();
        assert_eq!(listing.paths.len(), 5);
        assert!(listing.paths.contains(&"Loop/Loop/Loop/Loop/Loop/n.md".to_string()));
        assert!(listing.truncated);
        assert_eq!(transport.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_checks_deadline_between_levels() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.listing("", &["root.md", "Daily/"]);
        transport.listing("Daily", &["x.md"]);
        let client = client(transport.clone());

        let listing = client.list_within(Some(Instant::now())).await.unwrap();
        assert_eq!(listing.paths, vec!["root.md"]);
        assert!(listing.truncated);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_listing_failure_is_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("/vault/", vec![Ok(TransportResponse::status(502))]);
        let client = client(transport);
        assert!(client.list().await.is_err());
    }

    #[tokio::test]
    async fn test_health_reports_remote_and_circuit() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            ":27124/",
            vec![Ok(TransportResponse::ok(
                r#"{"status":"OK","authenticated":true}"#,
            ))],
        );
        let client = client(transport);
        let health = client.health().await;
        assert_eq!(
            health.remote,
            RemoteHealth::Up {
                authenticated: Some(true)
            }
        );
        assert_eq!(health.circuit, CircuitState::Closed);
    }
}
