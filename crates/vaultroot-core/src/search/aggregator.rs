//! Candidate aggregation
//!
//! Turns the path universe into a bounded, prefiltered candidate set. The warm path
//! reads everything from an index snapshot and never calls the remote store; the cold
//! path walks the remote listing and can only judge paths by their names.

use super::{AggregationPath, Candidate, MatchType, Query, SearchWarning};
use crate::client::ContentClient;
use crate::config::RemoteConfig;
use crate::error::Result;
use crate::index::{file_stem, fold, tokenize, IndexSnapshot};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::time::Instant;

/// Prefiltered candidates for one search call
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// At most `limit` candidates, coarse score desc then path asc
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<SearchWarning>,
    pub path: AggregationPath,
    /// Paths that passed the filters, before the cap
    pub considered: usize,
}

#[derive(Debug, Default)]
struct Coarse {
    filename: f64,
    content: f64,
    metadata: f64,
}

impl Coarse {
    fn total(&self) -> f64 {
        self.filename + self.content + self.metadata
    }

    fn match_type(&self) -> MatchType {
        if self.filename > 0.0 {
            MatchType::Filename
        } else if self.content > 0.0 {
            MatchType::Content
        } else if self.metadata > 0.0 {
            MatchType::Metadata
        } else {
            MatchType::Content
        }
    }
}

/// Builds the candidate set from the index when warm, from the remote listing otherwise
pub struct CandidateAggregator<'a> {
    client: &'a ContentClient,
    snapshot: Option<&'a IndexSnapshot>,
    extensions: Vec<String>,
}

impl<'a> CandidateAggregator<'a> {
    pub fn new(client: &'a ContentClient, remote: &RemoteConfig) -> Self {
        Self {
            client,
            snapshot: None,
            extensions: remote
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Serve from this snapshot instead of listing the remote store
    pub fn with_snapshot(mut self, snapshot: Option<&'a IndexSnapshot>) -> Self {
        self.snapshot = snapshot;
        self
    }

    fn is_indexable(&self, path: &str) -> bool {
        has_extension(path, &self.extensions)
    }

    /// Aggregate at most `limit` candidates.
    ///
    /// Only a failing root listing on the cold path is an error; anything else that
    /// goes wrong is reported through `warnings`.
    pub async fn aggregate(
        &self,
        query: &Query,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Aggregation> {
        match self.snapshot {
            Some(snapshot) => Ok(self.from_snapshot(snapshot, query, limit)),
            None => self.from_listing(query, limit, deadline).await,
        }
    }

    fn from_snapshot(
        &self,
        snapshot: &IndexSnapshot,
        query: &Query,
        limit: usize,
    ) -> Aggregation {
        let mut scores: HashMap<&str, Coarse> = HashMap::new();

        for term in &query.terms {
            for entry in snapshot.query(&term.text) {
                scores.entry(entry.path.as_str()).or_default().content +=
                    term.weight * query.boosts.body * entry.frequency as f64;
            }
        }

        let mut candidates = Vec::new();
        for path in snapshot.paths() {
            if !self.is_indexable(path) || !query.filters.matches_path(path) {
                continue;
            }
            let Some(doc) = snapshot.document(path) else {
                continue;
            };
            if !query.filters.matches_tags(&doc.tags) {
                continue;
            }

            let mut coarse = scores.remove(path).unwrap_or_default();
            coarse.filename = filename_score(path, query);
            coarse.metadata = tag_score(&doc.tags, query);
            if coarse.total() <= 0.0 && !query.terms.is_empty() {
                continue;
            }

            let mut candidate = Candidate::new(path, coarse.match_type());
            candidate.coarse_score = coarse.total();
            candidate.modified = doc.modified;
            candidate.tags = doc.tags.clone();
            candidates.push(candidate);
        }

        let considered = candidates.len();
        cap(&mut candidates, limit);
        tracing::debug!(
            "Warm aggregation from index generation {}: {} of {} candidates kept",
            snapshot.generation,
            candidates.len(),
            considered
        );

        Aggregation {
            candidates,
            warnings: Vec::new(),
            path: AggregationPath::Warm,
            considered,
        }
    }

    async fn from_listing(
        &self,
        query: &Query,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Aggregation> {
        let listing = self.client.list_within(deadline).await?;

        let mut warnings = Vec::new();
        if listing.is_partial() {
            warnings.push(SearchWarning::PartialListing {
                failed_dirs: listing.failed_dirs.clone(),
                truncated: listing.truncated,
            });
        }

        let mut candidates: Vec<Candidate> = listing
            .paths
            .iter()
            .filter(|p| self.is_indexable(p) && query.filters.matches_path(p))
            .map(|path| {
                let score = filename_score(path, query);
                let match_type = if score > 0.0 {
                    MatchType::Filename
                } else {
                    MatchType::Content
                };
                let mut candidate = Candidate::new(path.as_str(), match_type);
                candidate.coarse_score = score;
                candidate
            })
            .collect();

        let considered = candidates.len();
        cap(&mut candidates, limit);
        tracing::debug!(
            "Cold aggregation from {} listed paths: {} of {} candidates kept",
            listing.paths.len(),
            candidates.len(),
            considered
        );

        Ok(Aggregation {
            candidates,
            warnings,
            path: AggregationPath::Cold,
            considered,
        })
    }
}

/// Whether the path ends in one of `extensions` (given without the dot)
pub(crate) fn has_extension(path: &str, extensions: &[String]) -> bool {
    file_name(path)
        .rsplit_once('.')
        .map(|(_, ext)| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Weighted count of query terms in the file stem, scaled by the filename boost
fn filename_score(path: &str, query: &Query) -> f64 {
    let name_terms = tokenize(file_stem(path));
    query
        .terms
        .iter()
        .map(|term| {
            let hits = name_terms.iter().filter(|t| **t == term.text).count();
            term.weight * hits as f64
        })
        .sum::<f64>()
        * query.boosts.filename
}

fn tag_score(tags: &[String], query: &Query) -> f64 {
    let folded: Vec<String> = tags.iter().map(|t| fold(t)).collect();
    query
        .terms
        .iter()
        .filter(|term| folded.iter().any(|t| *t == term.text))
        .map(|term| term.weight)
        .sum()
}

fn cap(candidates: &mut Vec<Candidate>, limit: usize) {
    candidates.sort_by(|a, b| {
        b.coarse_score
            .partial_cmp(&a.coarse_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    candidates.truncate(limit);
}
