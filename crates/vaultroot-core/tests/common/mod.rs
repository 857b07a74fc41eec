//! In-memory note store shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vaultroot_core::client::{
    ContentClient, FixedJitter, Transport, TransportRequest, TransportResponse,
};
use vaultroot_core::config::{Config, IndexConfig};
use vaultroot_core::{Result, SearchEngine, VaultRootError};

pub const BASE_URL: &str = "https://vault.test:27124";

/// 2024-01-01T00:00:00Z in ms
pub const JAN_1: i64 = 1_704_067_200_000;
pub const DAY_MS: i64 = 86_400_000;

/// Serves listings and notes from memory, the way the remote store lays them out
#[derive(Default)]
pub struct MemoryVault {
    notes: Mutex<BTreeMap<String, (String, i64)>>,
    missing: Mutex<BTreeSet<String>>,
    down: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, path: &str, content: &str, mtime_ms: i64) {
        self.notes
            .lock()
            .unwrap()
            .insert(path.to_string(), (content.to_string(), mtime_ms));
    }

    /// Listed, but every fetch answers 404
    pub fn add_missing(&self, path: &str) {
        self.missing.lock().unwrap().insert(path.to_string());
    }

    /// Refuse every connection
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Delay every note fetch (listings stay instant)
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn listing_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with('/'))
            .count()
    }

    fn listing(&self, dir: &str) -> Option<Vec<String>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let notes = self.notes.lock().unwrap();
        let missing = self.missing.lock().unwrap();

        let mut entries = BTreeSet::new();
        for path in notes.keys().chain(missing.iter()) {
            if let Some(rel) = path.strip_prefix(&prefix) {
                match rel.split_once('/') {
                    Some((folder, _)) => entries.insert(format!("{}/", folder)),
                    None => entries.insert(rel.to_string()),
                };
            }
        }
        if entries.is_empty() && !dir.is_empty() {
            return None;
        }
        Some(entries.into_iter().collect())
    }

    fn note(&self, path: &str) -> Option<String> {
        let notes = self.notes.lock().unwrap();
        let (content, mtime) = notes.get(path)?;
        let body = serde_json::json!({
            "path": path,
            "content": content,
            "tags": [],
            "frontmatter": {},
            "stat": {"ctime": mtime, "mtime": mtime, "size": content.len()}
        });
        Some(body.to_string())
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(b) = u8::from_str_radix(hex, 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl Transport for MemoryVault {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.calls.lock().unwrap().push(request.url.clone());
        if self.down.load(Ordering::SeqCst) {
            return Err(VaultRootError::Network("connection refused".into()));
        }

        let Some((_, rest)) = request.url.split_once("/vault/") else {
            return Ok(TransportResponse::ok(
                r#"{"status":"OK","authenticated":true}"#,
            ));
        };
        let path = percent_decode(rest);

        let body = if path.is_empty() || path.ends_with('/') {
            self.listing(path.trim_end_matches('/'))
                .map(|files| serde_json::json!({ "files": files }).to_string())
        } else {
            let delay = *self.fetch_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.note(&path)
        };
        Ok(body
            .map(TransportResponse::ok)
            .unwrap_or_else(|| TransportResponse::status(404)))
    }
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.remote.url = BASE_URL.to_string();
    config.remote.api_key = None;
    config.remote.accept_invalid_certs = false;
    config.index = IndexConfig {
        warm_on_search: false,
        ..IndexConfig::ephemeral()
    };
    config
}

/// Log to the test writer; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine_with(vault: Arc<MemoryVault>, config: Config) -> SearchEngine {
    init_tracing();
    let client = ContentClient::with_transport(&config, vault)
        .unwrap()
        .with_jitter(Arc::new(FixedJitter(0.0)));
    SearchEngine::with_client(config, client).unwrap()
}

pub fn engine(vault: Arc<MemoryVault>) -> SearchEngine {
    engine_with(vault, config())
}

/// `n` space-separated filler words
pub fn words(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}
