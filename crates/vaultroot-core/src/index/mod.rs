//! Local index
//!
//! Term postings over the documents of one completed build, plus note parsing,
//! tokenization and chunking shared with the search pipeline.
//!
//! Published snapshots are immutable. Every build, upsert or removal produces a new
//! generation that replaces the previous one in a single pointer swap, so readers
//! always see one complete build and keep the last-good snapshot while a rebuild
//! is running.

mod chunker;
mod parser;
pub mod storage;
mod tokenizer;
mod trie;

pub use chunker::*;
pub use parser::*;
pub use tokenizer::*;
pub use trie::{Trie, TrieNode};

use crate::client::hash_content;
use crate::config::IndexConfig;
use crate::error::{Result, VaultRootError};
use crate::search::{Candidate, CorpusStats, Vocabulary};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

/// One posting: where a term occurs in one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub frequency: u32,
    /// Term positions in the body
    pub positions: Vec<u32>,
    /// Document modification time, ms since epoch
    pub timestamp: Option<i64>,
}

/// Per-document statistics kept alongside the postings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocStats {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    /// Body length in terms
    pub length: usize,
    pub tags: Vec<String>,
    pub hash: String,
}

/// One immutable index generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    /// Term -> postings sorted by path
    postings: BTreeMap<String, Vec<IndexEntry>>,
    documents: BTreeMap<String, DocStats>,
    #[serde(skip)]
    trie: Trie,
}

impl IndexSnapshot {
    /// Build a snapshot from candidates with content. Candidates without content are skipped.
    pub fn build(generation: u64, candidates: &[Candidate]) -> Self {
        let mut snapshot = Self {
            generation,
            built_at: Utc::now(),
            postings: BTreeMap::new(),
            documents: BTreeMap::new(),
            trie: Trie::new(),
        };
        for candidate in candidates {
            snapshot.add_document(candidate);
        }
        snapshot.rebuild_trie();
        snapshot
    }

    fn add_document(&mut self, candidate: &Candidate) {
        let Some(content) = candidate.content.as_deref() else {
            return;
        };
        self.remove_document(&candidate.path);

        let terms = tokenize(content);
        let mut positions: HashMap<&str, Vec<u32>> = HashMap::new();
        for (pos, term) in terms.iter().enumerate() {
            positions.entry(term.as_str()).or_default().push(pos as u32);
        }

        let timestamp = candidate.modified.map(|m| m.timestamp_millis());
        for (term, positions) in positions {
            let list = self.postings.entry(term.to_string()).or_default();
            let at = list.partition_point(|e| e.path < candidate.path);
            list.insert(
                at,
                IndexEntry {
                    path: candidate.path.clone(),
                    frequency: positions.len() as u32,
                    positions,
                    timestamp,
                },
            );
        }

        self.documents.insert(
            candidate.path.clone(),
            DocStats {
                name: candidate.name.clone(),
                modified: candidate.modified,
                length: terms.len(),
                tags: candidate.tags.clone(),
                hash: hash_content(content),
            },
        );
    }

    fn remove_document(&mut self, path: &str) -> bool {
        if self.documents.remove(path).is_none() {
            return false;
        }
        self.postings.retain(|_, list| {
            list.retain(|e| e.path != path);
            !list.is_empty()
        });
        true
    }

    /// Recompute the autocomplete trie from the postings
    pub(crate) fn rebuild_trie(&mut self) {
        let mut trie = Trie::new();
        for (term, entries) in &self.postings {
            if is_stop_word(term) || term.chars().count() < 2 {
                continue;
            }
            let frequency = entries.iter().map(|e| e.frequency as u64).sum();
            let last_seen = entries.iter().filter_map(|e| e.timestamp).max();
            trie.insert(term, frequency, last_seen);
        }
        self.trie = trie;
    }

    /// Postings for a term (folded before lookup)
    pub fn query(&self, term: &str) -> &[IndexEntry] {
        self.postings
            .get(&fold(term))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn document(&self, path: &str) -> Option<&DocStats> {
        self.documents.get(path)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.built_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Terms with their total frequency, for spelling correction
    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::new(self.postings.iter().map(|(term, entries)| {
            (
                term.clone(),
                entries.iter().map(|e| e.frequency as u64).sum(),
            )
        }))
    }

    /// Corpus-wide statistics for IDF, counting filename terms as well as body terms
    pub fn corpus_stats(&self) -> CorpusStats {
        let mut doc_freq: HashMap<String, usize> = self
            .postings
            .iter()
            .map(|(term, entries)| (term.clone(), entries.len()))
            .collect();

        let mut name_total = 0usize;
        for path in self.documents.keys() {
            let mut name_terms = tokenize(file_stem(path));
            name_total += name_terms.len();
            name_terms.sort();
            name_terms.dedup();
            for term in name_terms {
                let in_body = self
                    .postings
                    .get(&term)
                    .map(|list| list.binary_search_by(|e| e.path.as_str().cmp(path)).is_ok())
                    .unwrap_or(false);
                if !in_body {
                    *doc_freq.entry(term).or_insert(0) += 1;
                }
            }
        }

        let n = self.documents.len().max(1) as f64;
        CorpusStats {
            doc_count: self.documents.len(),
            avg_body_len: self.documents.values().map(|d| d.length).sum::<usize>() as f64 / n,
            avg_name_len: name_total as f64 / n,
            doc_freq,
        }
    }

    pub fn suggest(&self, prefix: &str, limit: usize, max_scan: usize) -> Vec<String> {
        self.trie.suggest(prefix, limit, max_scan)
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }
}

type BuildFuture =
    Shared<BoxFuture<'static, std::result::Result<Arc<IndexSnapshot>, Arc<VaultRootError>>>>;

/// Frees the rebuild slot when the build task ends, panics included
struct ClearInFlight(Arc<LocalIndexer>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        *self.0.lock_in_flight() = None;
    }
}

/// Owner of the published index snapshot
pub struct LocalIndexer {
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    in_flight: Mutex<Option<BuildFuture>>,
    generation: AtomicU64,
    invalidated: AtomicBool,
    ttl: Duration,
    path: Option<PathBuf>,
}

impl LocalIndexer {
    /// Empty, in-memory indexer
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            current: RwLock::new(None),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            invalidated: AtomicBool::new(false),
            ttl: config.ttl(),
            path: config.path.clone(),
        }
    }

    /// Indexer seeded from the persisted snapshot, when one is present and trusted
    pub fn open(config: &IndexConfig) -> Self {
        let indexer = Self::new(config);
        let Some(path) = indexer.path.as_deref() else {
            return indexer;
        };

        match storage::load(path, indexer.ttl) {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    "Loaded index generation {} ({} documents) from {}",
                    snapshot.generation,
                    snapshot.len(),
                    path.display()
                );
                indexer
                    .generation
                    .store(snapshot.generation, Ordering::SeqCst);
                *indexer.write() = Some(Arc::new(snapshot));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Discarding persisted index, a full rebuild is needed: {}", e);
            }
        }
        indexer
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<IndexSnapshot>>> {
        self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<IndexSnapshot>>> {
        self.current.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<BuildFuture>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current snapshot, if any build has completed
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.read().clone()
    }

    pub fn is_warm(&self) -> bool {
        self.read().is_some()
    }

    /// Age of the snapshot when it is past its TTL or was invalidated
    pub fn staleness(&self) -> Option<Duration> {
        let snapshot = self.snapshot()?;
        let age = snapshot.age();
        (self.invalidated.load(Ordering::SeqCst) || age > self.ttl).then_some(age)
    }

    /// Cold, expired or invalidated
    pub fn needs_rebuild(&self) -> bool {
        !self.is_warm() || self.staleness().is_some()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.lock_in_flight().is_some()
    }

    /// Postings for a term in the current snapshot
    pub fn query(&self, term: &str) -> Vec<IndexEntry> {
        self.snapshot()
            .map(|s| s.query(term).to_vec())
            .unwrap_or_default()
    }

    /// Build and publish a new generation from a full set of candidates
    pub fn build(&self, candidates: &[Candidate]) -> Arc<IndexSnapshot> {
        let snapshot = Arc::new(IndexSnapshot::build(self.next_generation(), candidates));
        self.publish(Arc::clone(&snapshot));
        tracing::info!(
            "Built index generation {} with {} documents and {} terms",
            snapshot.generation,
            snapshot.len(),
            snapshot.postings.len()
        );
        snapshot
    }

    fn publish(&self, snapshot: Arc<IndexSnapshot>) {
        {
            let mut current = self.write();
            let newer = current
                .as_ref()
                .map(|c| snapshot.generation > c.generation)
                .unwrap_or(true);
            if !newer {
                return;
            }
            *current = Some(Arc::clone(&snapshot));
        }
        self.invalidated.store(false, Ordering::SeqCst);
        self.persist(&snapshot);
    }

    fn persist(&self, snapshot: &IndexSnapshot) {
        if let Some(ref path) = self.path {
            if let Err(e) = storage::save(path, snapshot) {
                tracing::warn!("Failed to persist index to {}: {}", path.display(), e);
            }
        }
    }

    /// Rebuild from `source`, at most one rebuild at a time.
    ///
    /// Callers arriving while a rebuild is running wait for that rebuild instead of
    /// starting another. Readers keep the previous snapshot until it completes, and
    /// a failed rebuild leaves it in place. The build runs on its own task, so it
    /// completes and frees the slot even when every waiting caller is dropped.
    pub async fn rebuild<Fut>(self: &Arc<Self>, source: Fut) -> Result<Arc<IndexSnapshot>>
    where
        Fut: Future<Output = Result<Vec<Candidate>>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.lock_in_flight();
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("Joining in-flight index rebuild");
                    running.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let _slot = ClearInFlight(Arc::clone(&this));
                        match source.await {
                            Ok(candidates) => Ok(this.build(&candidates)),
                            Err(e) => {
                                tracing::warn!(
                                    "Index rebuild failed, keeping last-good index: {}",
                                    e
                                );
                                Err(Arc::new(e))
                            }
                        }
                    });
                    let build = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Arc::new(VaultRootError::Other(anyhow::anyhow!(
                                "index rebuild task failed: {}",
                                e
                            ))))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(build.clone());
                    build
                }
            }
        };

        shared.await.map_err(|e| e.replicate())
    }

    /// Add or replace one document without a full rebuild. No-op while cold.
    pub fn upsert(&self, candidate: &Candidate) -> Option<Arc<IndexSnapshot>> {
        self.modify(|snapshot| {
            snapshot.add_document(candidate);
            true
        })
    }

    /// Remove one document without a full rebuild. No-op while cold.
    pub fn remove(&self, path: &str) -> Option<Arc<IndexSnapshot>> {
        self.modify(|snapshot| snapshot.remove_document(path))
    }

    fn modify<F>(&self, change: F) -> Option<Arc<IndexSnapshot>>
    where
        F: FnOnce(&mut IndexSnapshot) -> bool,
    {
        let updated = {
            let mut current = self.write();
            let base = current.as_ref()?;
            let mut next = IndexSnapshot::clone(base);
            if !change(&mut next) {
                return Some(Arc::clone(base));
            }
            next.generation = self.next_generation();
            next.rebuild_trie();
            let next = Arc::new(next);
            *current = Some(Arc::clone(&next));
            next
        };
        tracing::debug!("Published incremental index generation {}", updated.generation);
        self.persist(&updated);
        Some(updated)
    }

    /// Mark the index stale; it keeps serving until the next rebuild completes
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn suggest(&self, prefix: &str, limit: usize, max_scan: usize) -> Vec<String> {
        self.snapshot()
            .map(|s| s.suggest(prefix, limit, max_scan))
            .unwrap_or_default()
    }
}
