//! Batch parallel fetching

use crate::client::{next_before, ContentClient, Document, Next};
use crate::config::FetchConfig;
use crate::error::{Result, VaultRootError};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Fetch statistics for one `fetch_all` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchStats {
    pub requested: usize,
    pub success: usize,
    /// All failed paths, including `not_found` and `short_circuited`
    pub failed: usize,
    pub not_found: usize,
    pub short_circuited: usize,
    /// The deadline expired; `unfetched` paths were never attempted or finished
    pub truncated: bool,
    pub unfetched: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

impl FetchStats {
    fn record(&mut self, result: &Result<Document>) {
        match result {
            Ok(_) => self.success += 1,
            Err(e) => {
                self.failed += 1;
                match e {
                    VaultRootError::NotFound(_) => self.not_found += 1,
                    VaultRootError::CircuitOpen { .. } => self.short_circuited += 1,
                    _ => {}
                }
            }
        }
    }
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Results keyed by path plus stats
#[derive(Debug)]
pub struct FetchOutcome {
    pub results: BTreeMap<String, Result<Document>>,
    pub stats: FetchStats,
}

/// Fetches many paths through one client with a bounded worker pool
pub struct BatchFetcher<'a> {
    client: &'a ContentClient,
    workers: usize,
    batch_size: usize,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(client: &'a ContentClient, config: &FetchConfig) -> Self {
        Self {
            client,
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Fetch every path in batches of `batch_size`, `workers` at a time.
    ///
    /// A failing path never affects the others. When the deadline expires the
    /// paths not yet fetched are left out and the stats are marked truncated.
    pub async fn fetch_all(&self, paths: &[String], deadline: Option<Instant>) -> FetchOutcome {
        let mut results = BTreeMap::new();
        let mut stats = FetchStats {
            requested: paths.len(),
            ..FetchStats::default()
        };
        let mut latencies: Vec<u64> = Vec::with_capacity(paths.len());

        'batches: for (batch_no, batch) in paths.chunks(self.batch_size).enumerate() {
            tracing::debug!(
                "Fetching batch {} ({} paths, {} workers)",
                batch_no + 1,
                batch.len(),
                self.workers
            );

            let client = self.client;
            let mut pending = futures::stream::iter(batch.to_vec())
                .map(move |path| {
                    async move {
                        let start = Instant::now();
                        let result = client.fetch(&path).await;
                        (path, result, start.elapsed().as_millis() as u64)
                    }
                    .boxed()
                })
                .buffer_unordered(self.workers);

            loop {
                match next_before(&mut pending, deadline).await {
                    Next::Item((path, result, elapsed_ms)) => {
                        if let Err(ref e) = result {
                            tracing::debug!("Fetch of {} failed: {}", path, e);
                        }
                        stats.record(&result);
                        latencies.push(elapsed_ms);
                        results.insert(path, result);
                    }
                    Next::Done => break,
                    Next::Expired => {
                        stats.truncated = true;
                        break 'batches;
                    }
                }
            }
        }

        if stats.truncated {
            stats.unfetched = paths.len() - results.len();
            tracing::warn!(
                "Fetch deadline reached: {} of {} paths unfetched",
                stats.unfetched,
                paths.len()
            );
        }

        latencies.sort_unstable();
        stats.p50_ms = percentile(&latencies, 50.0);
        stats.p95_ms = percentile(&latencies, 95.0);

        FetchOutcome { results, stats }
    }
}
