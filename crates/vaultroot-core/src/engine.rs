//! Search engine facade
//!
//! Owns the content client, the local indexer and the configuration, and runs the
//! full pipeline: rewrite, compose, aggregate, fetch, rank, boost, dedupe, assemble.

use crate::client::{ContentClient, HealthStatus};
use crate::config::{Config, FetchConfig, IdfMode};
use crate::error::{Result, VaultRootError};
use crate::index::{IndexSnapshot, LocalIndexer};
use crate::search::{
    compare_ranked, has_extension, BatchFetcher, Candidate, CandidateAggregator,
    Context, ContextAssembler, Deduplicator, MatchType, MetadataBooster, QueryComposer,
    QueryRewriter, Ranker, SearchOptions, SearchStats, SearchStatsSnapshot, SearchWarning,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;

/// Client-side search over a remote note store
pub struct SearchEngine {
    config: Config,
    client: Arc<ContentClient>,
    indexer: Arc<LocalIndexer>,
    composer: QueryComposer,
    rewriter: QueryRewriter,
    booster: MetadataBooster,
    deduplicator: Deduplicator,
    assembler: ContextAssembler,
    stats: Arc<SearchStats>,
}

impl SearchEngine {
    /// Engine talking HTTP to `config.remote.url`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = ContentClient::new(&config)?;
        Self::with_client(config, client)
    }

    /// Engine over an already configured client
    pub fn with_client(config: Config, client: ContentClient) -> Result<Self> {
        config.validate()?;
        let indexer = LocalIndexer::open(&config.index);
        tracing::info!(
            "Search engine ready for {} (index {})",
            config.remote.url,
            if indexer.is_warm() { "warm" } else { "cold" }
        );

        Ok(Self {
            composer: QueryComposer::new(&config),
            rewriter: QueryRewriter::new(&config.query),
            booster: MetadataBooster::new(&config.boost)?,
            deduplicator: Deduplicator::new(&config.dedup),
            assembler: ContextAssembler::new(config.context.chunk_size),
            client: Arc::new(client),
            indexer: Arc::new(indexer),
            stats: Arc::new(SearchStats::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &ContentClient {
        &self.client
    }

    pub fn indexer(&self) -> &LocalIndexer {
        &self.indexer
    }

    /// Search with the configured defaults and an explicit token budget
    pub async fn search(&self, query: &str, max_tokens: usize) -> Result<Context> {
        let options = SearchOptions {
            max_tokens,
            ..SearchOptions::from_config(&self.config)
        };
        self.search_with(query, &options).await
    }

    /// Run the full pipeline.
    ///
    /// Fails only when the candidate set cannot be aggregated at all (the root
    /// listing failed on a cold index). Every other problem degrades the result
    /// and is reported in `Context::warnings` and `Context::fetch_stats`.
    pub async fn search_with(&self, raw: &str, options: &SearchOptions) -> Result<Context> {
        let started = Instant::now();
        let deadline = options.deadline.map(|d| started + d);
        let mut warnings = Vec::new();

        let snapshot = self.indexer.snapshot();
        if let Some(age) = self.indexer.staleness() {
            warnings.push(SearchWarning::StaleIndex {
                age_secs: age.as_secs(),
            });
            self.stats.record_stale_serve();
            self.spawn_rebuild();
        } else if snapshot.is_none() && self.config.index.warm_on_search {
            self.spawn_rebuild();
        }

        let rewrite = match snapshot.as_deref() {
            Some(snapshot) if options.auto_rewrite => {
                let rewrite = self.rewriter.rewrite(raw, &snapshot.vocabulary());
                (rewrite.changed()
                    && rewrite.confidence >= self.config.query.auto_apply_confidence)
                    .then_some(rewrite)
            }
            _ => None,
        };
        if let Some(ref rewrite) = rewrite {
            tracing::debug!(
                "Rewrote query {:?} to {:?} (confidence {:.2})",
                rewrite.original,
                rewrite.corrected,
                rewrite.confidence
            );
            warnings.push(SearchWarning::QueryRewritten {
                original: rewrite.original.clone(),
                rewritten: rewrite.corrected.clone(),
                confidence: rewrite.confidence,
            });
            self.stats.record_rewrite();
        }

        let query = self.composer.compose_at(raw, rewrite.as_ref(), Utc::now());
        if query.is_empty() {
            let mut context = Context::empty(options.max_tokens);
            context.warnings = warnings;
            return Ok(context);
        }

        let aggregation = CandidateAggregator::new(&self.client, &self.config.remote)
            .with_snapshot(snapshot.as_deref())
            .aggregate(&query, options.candidate_limit, deadline)
            .await
            .inspect_err(|e| {
                tracing::warn!("Search for {:?} failed: {}", raw, e);
                self.stats.record_failure();
            })?;
        warnings.extend(aggregation.warnings);

        let paths: Vec<String> = aggregation
            .candidates
            .iter()
            .map(|c| c.path.clone())
            .collect();
        let mut outcome = BatchFetcher::new(&self.client, &self.config.fetch)
            .fetch_all(&paths, deadline)
            .await;

        let mut candidates = Vec::with_capacity(aggregation.candidates.len());
        for mut candidate in aggregation.candidates {
            match outcome.results.remove(&candidate.path) {
                Some(Ok(doc)) => {
                    let changed = snapshot
                        .as_deref()
                        .and_then(|s| s.document(&doc.path))
                        .map(|indexed| indexed.hash != doc.hash)
                        .unwrap_or(false);
                    candidate.fill(doc);
                    if changed {
                        self.indexer.upsert(&candidate);
                    }
                    candidates.push(candidate);
                }
                Some(Err(VaultRootError::NotFound(_))) if snapshot.is_some() => {
                    self.indexer.remove(&candidate.path);
                }
                Some(Err(_)) | None => {}
            }
        }
        candidates.retain(|c| query.filters.matches_tags(&c.tags));

        let fetch_stats = outcome.stats;
        if fetch_stats.failed > 0 {
            warnings.push(SearchWarning::FetchFailures {
                failed: fetch_stats.failed,
                not_found: fetch_stats.not_found,
                short_circuited: fetch_stats.short_circuited,
            });
        }
        if fetch_stats.truncated {
            warnings.push(SearchWarning::FetchTruncated {
                unfetched: fetch_stats.unfetched,
            });
        }

        let corpus = match (self.config.ranking.idf_mode, snapshot.as_deref()) {
            (IdfMode::Corpus, Some(snapshot)) => Some(snapshot.corpus_stats()),
            _ => None,
        };
        let ranker = Ranker::new(&self.config.ranking);
        let mut ranked = ranker.rank(candidates, &query, corpus.as_ref());
        if !query.terms.is_empty() {
            ranked.retain(|c| c.relevance_score > 0.0);
        }

        let epsilon = self.config.ranking.tie_epsilon;
        self.booster.apply(&mut ranked, &query, epsilon);
        let mut unique = self.deduplicator.dedupe(ranked);
        unique.sort_by(|a, b| compare_ranked(a, b, epsilon));

        let mut context = self.assembler.assemble(&unique, &query, options.max_tokens);
        context.warnings = warnings;
        context.fetch_stats = fetch_stats;

        let elapsed = started.elapsed();
        let fetched = context.fetch_stats.success;
        self.stats.record_search(aggregation.path, elapsed, fetched);
        tracing::info!(
            "Search {:?} ({:?} path): {} sources, {}/{} tokens in {:?}",
            raw,
            aggregation.path,
            context.sources.len(),
            context.token_count,
            context.max_tokens,
            elapsed
        );

        Ok(context)
    }

    /// Autocomplete over the indexed vocabulary. Empty while the index is cold.
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let max_scan = self.config.suggest.max_scan;
        self.indexer.suggest(prefix, limit, max_scan)
    }

    /// Rebuild the index from the full remote corpus, joining a rebuild already running
    pub async fn rebuild_index(&self) -> Result<Arc<IndexSnapshot>> {
        self.indexer.rebuild(self.corpus_source()).await
    }

    /// Mark the index stale. It keeps serving until the next rebuild completes.
    pub fn invalidate_index(&self) {
        self.indexer.invalidate();
    }

    /// Re-fetch one document and update the index without a full rebuild
    pub async fn refresh_document(&self, path: &str) -> Result<()> {
        match self.client.fetch(path).await {
            Ok(doc) => {
                self.indexer
                    .upsert(&Candidate::from_document(doc, MatchType::Content));
                Ok(())
            }
            Err(VaultRootError::NotFound(_)) => {
                self.indexer.remove(path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn health(&self) -> HealthStatus {
        self.client.health().await
    }

    pub fn stats(&self) -> SearchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Corpus loader for one rebuild. Only the rebuild that actually runs polls it,
    /// so the rebuild is counted here rather than by every joining caller.
    fn corpus_source(&self) -> impl std::future::Future<Output = Result<Vec<Candidate>>> {
        let stats = Arc::clone(&self.stats);
        let load = load_corpus(
            Arc::clone(&self.client),
            self.config.fetch.clone(),
            self.config
                .remote
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect(),
        );
        async move {
            let candidates = load.await?;
            stats.record_rebuild();
            Ok(candidates)
        }
    }

    fn spawn_rebuild(&self) {
        if self.indexer.is_rebuilding() {
            return;
        }
        tracing::info!("Starting background index rebuild");
        let indexer = Arc::clone(&self.indexer);
        let source = self.corpus_source();
        tokio::spawn(async move {
            // Failures are logged by the indexer
            let _ = indexer.rebuild(source).await;
        });
    }
}

/// List and fetch every indexable document
async fn load_corpus(
    client: Arc<ContentClient>,
    fetch: FetchConfig,
    extensions: Vec<String>,
) -> Result<Vec<Candidate>> {
    let listing = client.list().await?;
    if listing.is_partial() {
        tracing::warn!(
            "Indexing a partial listing ({} directories failed)",
            listing.failed_dirs.len()
        );
    }

    let paths: Vec<String> = listing
        .paths
        .into_iter()
        .filter(|p| has_extension(p, &extensions))
        .collect();
    let outcome = BatchFetcher::new(&client, &fetch)
        .fetch_all(&paths, None)
        .await;

    if outcome.stats.success == 0 && !paths.is_empty() {
        return Err(VaultRootError::Network(format!(
            "none of {} documents could be fetched for indexing",
            paths.len()
        )));
    }
    if outcome.stats.failed > 0 {
        tracing::warn!(
            "Indexing without {} documents that failed to fetch",
            outcome.stats.failed
        );
    }

    Ok(outcome
        .results
        .into_values()
        .filter_map(|result| result.ok())
        .map(|doc| Candidate::from_document(doc, MatchType::Content))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{client, test_config, ScriptedTransport};

    fn vault() -> Arc<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::new());
        transport.listing("", &["Monge.md", "Trilhas/", "imagem.png"]);
        transport.listing("Trilhas", &["serra.md", "mar.md"]);
        transport.note("Monge.md", "O monge acorda cedo e medita.", 1_704_067_200_000);
        transport.note(
            "Trilhas/serra.md",
            "---\ntags: [trilha]\n---\nSubida da montanha pela serra.",
            1_704_153_600_000,
        );
        transport.note("Trilhas/mar.md", "Caminhada na praia.", 1_704_240_000_000);
        transport
    }

    fn engine(transport: Arc<ScriptedTransport>) -> SearchEngine {
        let mut config = test_config();
        config.index.warm_on_search = false;
        SearchEngine::with_client(config, client(transport)).unwrap()
    }

    #[tokio::test]
    async fn test_cold_search_fetches_and_assembles() {
        let engine = engine(vault());
        let context = engine.search("monge", 500).await.unwrap();

        assert_eq!(context.sources.len(), 1);
        assert_eq!(context.sources[0].path, "Monge.md");
        assert!(context.text.starts_with("### Monge.md"));
        assert!(context.token_count <= 500);
        assert_eq!(context.fetch_stats.requested, 3);
        assert!(context.warnings.is_empty());

        let stats = engine.stats();
        assert_eq!(stats.cold_searches, 1);
        assert_eq!(stats.warm_searches, 0);
    }

    #[tokio::test]
    async fn test_warm_search_skips_listing() {
        let transport = vault();
        let engine = engine(transport.clone());
        let snapshot = engine.rebuild_index().await.unwrap();
        assert_eq!(snapshot.len(), 3);

        let calls_before = transport.call_count();
        let context = engine.search("montanha", 500).await.unwrap();
        assert_eq!(context.sources[0].path, "Trilhas/serra.md");

        let listing_calls = transport.calls.lock().unwrap()[calls_before..]
            .iter()
            .filter(|url| url.ends_with('/'))
            .count();
        assert_eq!(listing_calls, 0);
        assert_eq!(engine.stats().warm_searches, 1);
        assert_eq!(engine.stats().index_rebuilds, 1);
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_count_once() {
        let transport = vault();
        let engine = engine(transport.clone());
        let (first, second) = tokio::join!(engine.rebuild_index(), engine.rebuild_index());
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(engine.stats().index_rebuilds, 1);

        let root_listings = transport
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with("/vault/"))
            .count();
        assert_eq!(root_listings, 1);
    }

    #[tokio::test]
    async fn test_confident_rewrite_is_applied() {
        let engine = engine(vault());
        engine.rebuild_index().await.unwrap();

        let context = engine.search("montanah", 500).await.unwrap();
        assert_eq!(context.sources[0].path, "Trilhas/serra.md");
        assert!(context.warnings.iter().any(|w| matches!(
            w,
            SearchWarning::QueryRewritten { rewritten, .. } if rewritten == "montanha"
        )));
        assert_eq!(engine.stats().rewrites_applied, 1);
    }

    #[tokio::test]
    async fn test_stale_index_is_served_with_warning() {
        let engine = engine(vault());
        engine.rebuild_index().await.unwrap();
        engine.invalidate_index();

        let context = engine.search("monge", 500).await.unwrap();
        assert_eq!(context.sources[0].path, "Monge.md");
        assert!(context
            .warnings
            .iter()
            .any(|w| matches!(w, SearchWarning::StaleIndex { .. })));
        assert_eq!(engine.stats().stale_serves, 1);
    }

    #[tokio::test]
    async fn test_tag_filter_applies_after_fetch_on_cold_path() {
        let engine = engine(vault());
        let context = engine.search("tag:trilha", 500).await.unwrap();
        let paths: Vec<&str> = context.sources.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["Trilhas/serra.md"]);
    }

    #[tokio::test]
    async fn test_root_listing_failure_fails_search() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("/vault/", vec![Err(VaultRootError::Auth("bad key".into()))]);
        let engine = engine(transport);

        assert!(matches!(
            engine.search("monge", 100).await,
            Err(VaultRootError::Auth(_))
        ));
        assert_eq!(engine.stats().failed_searches, 1);
    }

    #[tokio::test]
    async fn test_refresh_document_updates_index() {
        let transport = vault();
        let engine = engine(transport.clone());
        engine.rebuild_index().await.unwrap();
        // equal frequency, fresher first
        assert_eq!(engine.suggest("mon", 5), vec!["montanha", "monge"]);

        transport.note("Monge.md", "Monitoramento diario", 1_704_326_400_000);
        engine.refresh_document("Monge.md").await.unwrap();
        assert_eq!(engine.suggest("mon", 5), vec!["monitoramento", "montanha"]);
        assert_eq!(engine.indexer().snapshot().unwrap().generation, 2);
    }
}
