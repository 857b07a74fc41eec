//! Configuration management
//!
//! The configuration surface is owned by the caller (CLI, tool layer, tests). This
//! module only defines the shape, defaults and validation; reading files is external.

use crate::error::{Result, VaultRootError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub boost: BoostConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub suggest: SuggestConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

/// Remote content store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the store, e.g. `https://127.0.0.1:27124`
    pub url: String,

    /// Bearer token passed through to the store
    #[serde(default)]
    pub api_key: Option<String>,

    /// Trust self-signed certificates. Off unless explicitly enabled.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Listing endpoint prefix
    #[serde(default = "default_listing_root")]
    pub listing_root: String,

    /// File extensions considered searchable
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Largest response body accepted from the store
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Deepest folder level the listing walk descends into
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("VAULTROOT_URL")
                .unwrap_or_else(|_| "https://127.0.0.1:27124".to_string()),
            api_key: std::env::var("VAULTROOT_API_KEY").ok(),
            accept_invalid_certs: std::env::var("VAULTROOT_INSECURE_TLS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            listing_root: default_listing_root(),
            extensions: default_extensions(),
            max_body_bytes: default_max_body_bytes(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_listing_root() -> String {
    "/vault/".to_string()
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_depth() -> usize {
    32
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string(), "txt".to_string()]
}

/// Per-endpoint timeout tiers (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub list_ms: u64,
    pub fetch_ms: u64,
    pub health_ms: u64,
    /// Longest wait for the next body chunk
    pub stream_chunk_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 3_000,
            list_ms: 15_000,
            fetch_ms: 10_000,
            health_ms: 2_000,
            stream_chunk_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn list(&self) -> Duration {
        Duration::from_millis(self.list_ms)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }

    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }

    pub fn stream_chunk(&self) -> Duration {
        Duration::from_millis(self.stream_chunk_ms)
    }
}

/// Retry policy for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay that is randomized (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: 0.2,
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Aggregation and batch fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent fetch workers
    pub workers: usize,
    /// Paths per batch
    pub batch_size: usize,
    /// Maximum candidates handed to the fetcher
    pub candidate_limit: usize,
    /// Deadline for a whole fetch/aggregate call
    pub deadline_ms: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 32,
            candidate_limit: 200,
            deadline_ms: Some(30_000),
        }
    }
}

impl FetchConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Scope over which inverse document frequency is computed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdfMode {
    /// Only the candidates of the current search
    #[default]
    CandidateSet,
    /// The whole indexed corpus (falls back to the candidate set when cold)
    Corpus,
}

/// BM25 and proximity tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub k1: f64,
    pub b: f64,
    pub idf_mode: IdfMode,
    pub filename_boost: f64,
    pub body_boost: f64,
    /// Widest token window that still earns a proximity boost
    pub proximity_window: usize,
    pub proximity_weight: f64,
    /// Scores closer than this are considered equal
    pub tie_epsilon: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            idf_mode: IdfMode::CandidateSet,
            filename_boost: 3.0,
            body_boost: 1.0,
            proximity_window: 12,
            proximity_weight: 1.0,
            tie_epsilon: 1e-6,
        }
    }
}

/// Glob pattern with a score multiplier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathWeight {
    pub pattern: String,
    pub weight: f64,
}

impl PathWeight {
    pub fn new(pattern: impl Into<String>, weight: f64) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
        }
    }
}

/// Metadata boosting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    pub path_weights: Vec<PathWeight>,
    pub tag_weights: BTreeMap<String, f64>,
    pub freshness_weight: f64,
    pub max_age_days: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            path_weights: vec![
                PathWeight::new("**/archive/**", 0.7),
                PathWeight::new("**/templates/**", 0.5),
            ],
            tag_weights: BTreeMap::new(),
            freshness_weight: 0.2,
            max_age_days: 365.0,
        }
    }
}

/// Which member of a duplicate group survives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStrategy {
    #[default]
    Freshest,
    Shortest,
    Longest,
}

/// Near-duplicate detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub threshold: f64,
    pub strategy: CanonicalStrategy,
    /// Content characters included in the fingerprint after the title
    pub fingerprint_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            strategy: CanonicalStrategy::Freshest,
            fingerprint_chars: 256,
        }
    }
}

/// Context assembly budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: usize,
    pub chunk_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4_000,
            chunk_size: 512,
        }
    }
}

/// Local index lifetime and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub ttl_secs: u64,
    /// Where the snapshot is persisted. `None` keeps the index in memory only.
    pub path: Option<PathBuf>,
    /// Start a background build when a search finds the index cold
    pub warm_on_search: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            path: std::env::var("VAULTROOT_INDEX_PATH")
                .map(PathBuf::from)
                .ok()
                .or_else(|| Some(Config::default_index_path())),
            warm_on_search: true,
        }
    }
}

impl IndexConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// In-memory only, no persistence
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            ..Self::default()
        }
    }
}

/// Autocomplete limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestConfig {
    pub default_limit: usize,
    /// Upper bound on trie nodes expanded per suggestion
    pub max_scan: usize,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_scan: 10_000,
        }
    }
}

/// Query composition and rewriting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Rewrites at or above this confidence replace the raw query
    pub auto_apply_confidence: f64,
    pub max_edit_distance: usize,
    pub synonym_weight: f64,
    pub correction_weight: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            auto_apply_confidence: 0.75,
            max_edit_distance: 2,
            synonym_weight: 0.5,
            correction_weight: 0.9,
        }
    }
}

impl Config {
    /// Get default persisted index path
    pub fn default_index_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::CACHE_DIR_NAME)
            .join("index.json")
    }

    /// Reject knob values the algorithms cannot work with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(VaultRootError::Config(msg.to_string()));

        if self.remote.url.trim().is_empty() {
            return fail("remote.url must not be empty");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return fail("retry.jitter must be within 0.0..=1.0");
        }
        if self.breaker.failure_threshold == 0 {
            return fail("breaker.failure_threshold must be at least 1");
        }
        if self.fetch.workers == 0 || self.fetch.batch_size == 0 {
            return fail("fetch.workers and fetch.batch_size must be positive");
        }
        if self.ranking.k1 < 0.0 || !(0.0..=1.0).contains(&self.ranking.b) {
            return fail("ranking.k1 must be >= 0 and ranking.b within 0.0..=1.0");
        }
        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return fail("dedup.threshold must be within 0.0..=1.0");
        }
        if self.context.chunk_size == 0 {
            return fail("context.chunk_size must be positive");
        }
        if self.boost.max_age_days <= 0.0 {
            return fail("boost.max_age_days must be positive");
        }
        for pw in &self.boost.path_weights {
            glob::Pattern::new(&pw.pattern)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let mut config = Config::default();
        config.remote.url = "https://localhost:27124".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch.workers, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert!((config.dedup.threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.dedup.threshold = 1.5;
        assert!(matches!(config.validate(), Err(VaultRootError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let mut config = Config::default();
        config.boost.path_weights = vec![PathWeight::new("[unclosed", 2.0)];
        assert!(matches!(
            config.validate(),
            Err(VaultRootError::GlobPattern(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"remote": {"url": "https://vault:27124"}, "ranking": {"k1": 2.0}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.remote.url, "https://vault:27124");
        assert_eq!(config.remote.listing_root, "/vault/");
        assert!((config.ranking.k1 - 2.0).abs() < f64::EPSILON);
        assert!((config.ranking.b - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.context.chunk_size, 512);
    }

    #[test]
    fn test_enum_serde_names() {
        let mode: IdfMode = serde_json::from_str("\"corpus\"").unwrap();
        assert_eq!(mode, IdfMode::Corpus);
        let strategy: CanonicalStrategy = serde_json::from_str("\"longest\"").unwrap();
        assert_eq!(strategy, CanonicalStrategy::Longest);
    }
}
