//! Vaultroot Core Library
//!
//! Client-side search and retrieval over a remote note store that offers no usable
//! search endpoint of its own.
//!
//! # Features
//! - Resilient HTTP client with retry, backoff and a circuit breaker
//! - Bounded parallel fetching with per-path failure isolation
//! - BM25-lite ranking with a proximity boost and metadata boosting
//! - Fuzzy near-duplicate merging
//! - Token-budgeted context assembly with provenance
//! - Persistent local index with single-flight rebuilds and trie autocomplete

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod search;
pub mod stream;

pub use client::{ContentClient, Document, HealthStatus, Transport};
pub use config::Config;
pub use engine::SearchEngine;
pub use error::{Error, Result, VaultRootError};
pub use index::{IndexEntry, IndexSnapshot, LocalIndexer};
pub use search::{Candidate, Context, Query, SearchOptions, SearchWarning, Source};
pub use stream::StreamMerger;

/// Default cache directory name
pub const CACHE_DIR_NAME: &str = "vaultroot";
