//! Search pipeline
//!
//! Provides:
//! - Query composition (synonyms, filters) and rewriting (spelling correction)
//! - Candidate aggregation from the local index or the remote listing
//! - Batch parallel fetching with per-path failure isolation
//! - BM25-lite ranking with a proximity boost
//! - Metadata boosting, near-duplicate merging and token-budgeted context assembly

mod aggregator;
mod boost;
mod context;
mod dedup;
mod distance;
mod fetcher;
mod query;
mod ranking;
mod rewrite;
mod stats;

pub use aggregator::{Aggregation, CandidateAggregator};
pub(crate) use aggregator::has_extension;
pub use boost::MetadataBooster;
pub use context::{Context, ContextAssembler, Source};
pub use dedup::{dedupe, normalize_title, Deduplicator};
pub use distance::{levenshtein, levenshtein_within, similarity};
pub use fetcher::{BatchFetcher, FetchOutcome, FetchStats};
pub use query::{
    parse_filters, FieldBoosts, Query, QueryComposer, QueryFilters, QueryTerm, TermOrigin,
};
pub use ranking::{compare_ranked, CorpusStats, Ranker};
pub use rewrite::{QueryRewriter, Rewrite, Vocabulary};
pub use stats::{AggregationPath, SearchStats, SearchStatsSnapshot};

use crate::client::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-call search knobs
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Token budget of the assembled context
    pub max_tokens: usize,
    /// Maximum number of candidates fetched and ranked
    pub candidate_limit: usize,
    /// Deadline for listing plus fetching; partial results on expiry
    pub deadline: Option<Duration>,
    /// Apply confident spelling corrections to the query
    pub auto_rewrite: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4_000,
            candidate_limit: 200,
            deadline: Some(Duration::from_secs(30)),
            auto_rewrite: true,
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_tokens: config.context.max_tokens,
            candidate_limit: config.fetch.candidate_limit,
            deadline: config.fetch.deadline(),
            auto_rewrite: true,
        }
    }
}

/// How a candidate matched in the prefilter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Filename,
    Content,
    Metadata,
}

/// A document under consideration for one search call
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Unique key
    pub path: String,
    pub name: String,
    /// Body, populated by the fetcher
    pub content: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub tags: Vec<String>,
    pub modified: Option<DateTime<Utc>>,
    pub match_type: MatchType,
    /// Prefilter score from the aggregator
    pub coarse_score: f64,
    /// Ranking score, after boosting
    pub relevance_score: f64,
    /// Paths folded into this candidate by the deduplicator
    pub merged_paths: Vec<String>,
}

impl Candidate {
    pub fn new(path: impl Into<String>, match_type: MatchType) -> Self {
        let path = path.into();
        Self {
            name: crate::index::file_stem(&path).to_string(),
            path,
            content: None,
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            modified: None,
            match_type,
            coarse_score: 0.0,
            relevance_score: 0.0,
            merged_paths: Vec::new(),
        }
    }

    /// Copy a fetched document's body and metadata into the candidate
    pub fn fill(&mut self, doc: Document) {
        self.name = doc.title;
        self.tags = doc.tags;
        self.metadata = doc.frontmatter;
        self.modified = doc.modified.or(self.modified);
        self.content = Some(doc.content);
    }

    /// Candidate built straight from a fetched document
    pub fn from_document(doc: Document, match_type: MatchType) -> Self {
        let mut candidate = Self::new(doc.path.clone(), match_type);
        candidate.fill(doc);
        candidate
    }

    pub fn content_len(&self) -> usize {
        self.content.as_deref().map(str::len).unwrap_or(0)
    }
}

/// Non-fatal degradation attached to search results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchWarning {
    /// The remote listing was incomplete
    PartialListing {
        failed_dirs: Vec<String>,
        truncated: bool,
    },
    /// Some candidate bodies could not be fetched
    FetchFailures {
        failed: usize,
        not_found: usize,
        short_circuited: usize,
    },
    /// The fetch deadline expired before every candidate was fetched
    FetchTruncated { unfetched: usize },
    /// The local index is past its TTL and a rebuild is pending
    StaleIndex { age_secs: u64 },
    /// The query was rewritten before searching
    QueryRewritten {
        original: String,
        rewritten: String,
        confidence: f64,
    },
}
