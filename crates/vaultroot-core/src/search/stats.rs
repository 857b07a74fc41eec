//! Search statistics with atomic counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Where a search found its candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPath {
    /// Local index snapshot
    Warm,
    /// Remote listing
    Cold,
}

pub struct SearchStats {
    warm_searches: AtomicU64,
    cold_searches: AtomicU64,
    failed_searches: AtomicU64,
    total_latency_us: AtomicU64,
    search_count: AtomicU64,
    stale_serves: AtomicU64,
    rewrites_applied: AtomicU64,
    index_rebuilds: AtomicU64,
    documents_fetched: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchStatsSnapshot {
    pub warm_searches: u64,
    pub cold_searches: u64,
    pub failed_searches: u64,
    pub avg_latency_us: u64,
    pub warm_rate: f64,
    pub stale_serves: u64,
    pub rewrites_applied: u64,
    pub index_rebuilds: u64,
    pub documents_fetched: u64,
}

impl SearchStats {
    pub fn new() -> Self {
        Self {
            warm_searches: AtomicU64::new(0),
            cold_searches: AtomicU64::new(0),
            failed_searches: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            search_count: AtomicU64::new(0),
            stale_serves: AtomicU64::new(0),
            rewrites_applied: AtomicU64::new(0),
            index_rebuilds: AtomicU64::new(0),
            documents_fetched: AtomicU64::new(0),
        }
    }

    pub fn record_search(&self, path: AggregationPath, latency: Duration, fetched: usize) {
        match path {
            AggregationPath::Warm => self.warm_searches.fetch_add(1, Ordering::Relaxed),
            AggregationPath::Cold => self.cold_searches.fetch_add(1, Ordering::Relaxed),
        };
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.search_count.fetch_add(1, Ordering::Relaxed);
        self.documents_fetched
            .fetch_add(fetched as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_serve(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rewrite(&self) {
        self.rewrites_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.index_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SearchStatsSnapshot {
        let total = self.search_count.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let warm = self.warm_searches.load(Ordering::Relaxed);

        let avg_latency_us = if total > 0 { total_latency / total } else { 0 };
        let warm_rate = if total > 0 {
            warm as f64 / total as f64
        } else {
            0.0
        };

        SearchStatsSnapshot {
            warm_searches: warm,
            cold_searches: self.cold_searches.load(Ordering::Relaxed),
            failed_searches: self.failed_searches.load(Ordering::Relaxed),
            avg_latency_us,
            warm_rate,
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            rewrites_applied: self.rewrites_applied.load(Ordering::Relaxed),
            index_rebuilds: self.index_rebuilds.load(Ordering::Relaxed),
            documents_fetched: self.documents_fetched.load(Ordering::Relaxed),
        }
    }
}

impl Default for SearchStats {
    fn default() -> Self {
        Self::new()
    }
}
