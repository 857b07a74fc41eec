//! BM25-lite ranking with a proximity boost.
//!
//! Implements the Okapi BM25 scoring function per field:
//!
//! ```text
//! score(D, Q) = Σ w(q) * IDF(q) * (f(q, D) * (k1 + 1)) / (f(q, D) + k1 * (1 - b + b * |D| / avgdl))
//! ```
//!
//! summed over the filename field (file stem) and the body field, each scaled by
//! its field boost. A proximity bonus is added when all primary query terms occur
//! inside a narrow window of the body.

use super::{Candidate, Query};
use crate::config::RankingConfig;
use crate::index::{file_stem, tokenize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Document-frequency statistics the IDF is computed from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStats {
    pub doc_count: usize,
    pub avg_body_len: f64,
    pub avg_name_len: f64,
    /// Term -> number of documents containing it in any field
    pub doc_freq: HashMap<String, usize>,
}

impl CorpusStats {
    fn from_analyzed(docs: &[Analyzed]) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut body_total = 0usize;
        let mut name_total = 0usize;

        for doc in docs {
            body_total += doc.body_len;
            name_total += doc.name_len;
            for term in doc.distinct_terms() {
                *doc_freq.entry(term.to_string()).or_insert(0) += 1;
            }
        }

        let n = docs.len().max(1) as f64;
        Self {
            doc_count: docs.len(),
            avg_body_len: body_total as f64 / n,
            avg_name_len: name_total as f64 / n,
            doc_freq,
        }
    }

    /// Statistics over a candidate set
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        let analyzed: Vec<Analyzed> = candidates.iter().map(Analyzed::new).collect();
        Self::from_analyzed(&analyzed)
    }

    /// Smoothed IDF, always positive:
    /// `IDF(t) = ln((N - df(t) + 0.5) / (df(t) + 0.5) + 1)`
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.doc_count as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

/// Per-candidate term statistics
struct Analyzed {
    body_tf: HashMap<String, usize>,
    body_positions: HashMap<String, Vec<usize>>,
    body_len: usize,
    name_tf: HashMap<String, usize>,
    name_len: usize,
}

impl Analyzed {
    fn new(candidate: &Candidate) -> Self {
        let mut body_tf: HashMap<String, usize> = HashMap::new();
        let mut body_positions: HashMap<String, Vec<usize>> = HashMap::new();
        let body = tokenize(candidate.content.as_deref().unwrap_or(""));
        for (pos, term) in body.iter().enumerate() {
            *body_tf.entry(term.clone()).or_insert(0) += 1;
            body_positions.entry(term.clone()).or_default().push(pos);
        }

        let mut name_tf: HashMap<String, usize> = HashMap::new();
        let name = tokenize(file_stem(&candidate.path));
        for term in &name {
            *name_tf.entry(term.clone()).or_insert(0) += 1;
        }

        Self {
            body_tf,
            body_positions,
            body_len: body.len(),
            name_tf,
            name_len: name.len(),
        }
    }

    fn distinct_terms(&self) -> impl Iterator<Item = &str> {
        let name_only = self
            .name_tf
            .keys()
            .filter(|t| !self.body_tf.contains_key(*t));
        self.body_tf.keys().chain(name_only).map(String::as_str)
    }
}

fn bm25_term_score(tf: usize, doc_len: usize, avg_len: f64, idf: f64, k1: f64, b: f64) -> f64 {
    if tf == 0 {
        return 0.0;
    }
    let tf = tf as f64;
    let norm = if avg_len > 0.0 {
        doc_len as f64 / avg_len
    } else {
        1.0
    };
    idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * norm))
}

/// Width (in terms) of the narrowest body window containing every term in `terms`
pub fn minimal_window(positions: &[&[usize]]) -> Option<usize> {
    if positions.is_empty() || positions.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut events: Vec<(usize, usize)> = positions
        .iter()
        .enumerate()
        .flat_map(|(term, list)| list.iter().map(move |&pos| (pos, term)))
        .collect();
    events.sort_unstable();

    let k = positions.len();
    let mut counts = vec![0usize; k];
    let mut covered = 0;
    let mut best: Option<usize> = None;
    let mut left = 0;

    for right in 0..events.len() {
        let term = events[right].1;
        if counts[term] == 0 {
            covered += 1;
        }
        counts[term] += 1;

        while covered == k {
            let width = events[right].0 - events[left].0 + 1;
            best = Some(best.map_or(width, |b: usize| b.min(width)));

            let leaving = events[left].1;
            counts[leaving] -= 1;
            if counts[leaving] == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }

    best
}

/// Total order for ranked candidates: score (quantized to `epsilon`) desc, then most
/// recent modification, then lexical path
pub fn compare_ranked(a: &Candidate, b: &Candidate, epsilon: f64) -> Ordering {
    let quantize = |score: f64| -> i64 {
        if epsilon > 0.0 {
            (score / epsilon).round() as i64
        } else {
            (score * 1e9).round() as i64
        }
    };

    quantize(b.relevance_score)
        .cmp(&quantize(a.relevance_score))
        .then_with(|| match (a.modified, b.modified) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.path.cmp(&b.path))
}

/// BM25-lite scorer
#[derive(Debug, Clone)]
pub struct Ranker<'a> {
    config: &'a RankingConfig,
}

impl<'a> Ranker<'a> {
    pub fn new(config: &'a RankingConfig) -> Self {
        Self { config }
    }

    /// Score one candidate against corpus statistics
    pub fn score(&self, candidate: &Candidate, query: &Query, stats: &CorpusStats) -> f64 {
        self.score_analyzed(&Analyzed::new(candidate), query, stats)
    }

    fn score_analyzed(&self, doc: &Analyzed, query: &Query, stats: &CorpusStats) -> f64 {
        let k1 = self.config.k1;
        let b = self.config.b;

        let lexical: f64 = query
            .terms
            .iter()
            .map(|term| {
                let idf = stats.idf(&term.text);
                let body = bm25_term_score(
                    doc.body_tf.get(&term.text).copied().unwrap_or(0),
                    doc.body_len,
                    stats.avg_body_len,
                    idf,
                    k1,
                    b,
                );
                let name = bm25_term_score(
                    doc.name_tf.get(&term.text).copied().unwrap_or(0),
                    doc.name_len,
                    stats.avg_name_len,
                    idf,
                    k1,
                    b,
                );
                term.weight * (query.boosts.body * body + query.boosts.filename * name)
            })
            .sum();

        lexical + self.proximity_boost(doc, query)
    }

    /// `weight * terms / width` when every primary term sits in a window no wider
    /// than the configured threshold
    fn proximity_boost(&self, doc: &Analyzed, query: &Query) -> f64 {
        let mut terms = query.primary_terms();
        terms.sort_unstable();
        terms.dedup();
        if terms.len() < 2 {
            return 0.0;
        }

        let lists: Vec<&[usize]> = terms
            .iter()
            .map(|t| doc.body_positions.get(*t).map(Vec::as_slice).unwrap_or(&[]))
            .collect();

        match minimal_window(&lists) {
            Some(width) if width <= self.config.proximity_window => {
                self.config.proximity_weight * terms.len() as f64 / width as f64
            }
            _ => 0.0,
        }
    }

    /// Score every candidate and sort best-first.
    ///
    /// `corpus` supplies corpus-wide statistics; when `None` the IDF is computed
    /// over the candidate set itself.
    pub fn rank(
        &self,
        mut candidates: Vec<Candidate>,
        query: &Query,
        corpus: Option<&CorpusStats>,
    ) -> Vec<Candidate> {
        let analyzed: Vec<Analyzed> = candidates.iter().map(Analyzed::new).collect();
        let local;
        let stats = match corpus {
            Some(stats) => stats,
            None => {
                local = CorpusStats::from_analyzed(&analyzed);
                &local
            }
        };

        for (candidate, doc) in candidates.iter_mut().zip(&analyzed) {
            candidate.relevance_score = self.score_analyzed(doc, query, stats);
        }

        let epsilon = self.config.tie_epsilon;
        candidates.sort_by(|a, b| compare_ranked(a, b, epsilon));
        candidates
    }
}
