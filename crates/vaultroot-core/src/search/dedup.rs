//! Near-duplicate detection and merging.
//!
//! Each candidate gets a fingerprint (normalized title plus the head of its body).
//! Pairs are only compared when they share a bucket. A fingerprint of length `L`
//! tolerates `k = floor((1 - threshold) * L)` edits, so it is cut into `k + 1`
//! disjoint segments: any fingerprint within `k` edits keeps one of them intact, at
//! most `k` positions away from where it sits in the original. Segments are the
//! bucket keys, and partners outside the length band that could reach the
//! threshold are never looked up. Every comparison uses a banded edit distance that
//! gives up as soon as the threshold is out of reach. Matching pairs are grouped
//! with union-find.

use super::distance::levenshtein_within;
use super::Candidate;
use crate::config::{CanonicalStrategy, DedupConfig};
use crate::index::{file_stem, fold};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

lazy_static! {
    /// Copy markers added by file managers and sync tools (on folded text)
    static ref COPY_SUFFIX_RE: Regex =
        Regex::new(r"(?:\s*\(\d+\)|\s+copy(?:\s+\d+)?|\s*-\s*copia(?:\s+\d+)?|\s+copia(?:\s+\d+)?)$")
            .unwrap();
}

/// Fold a title and strip copy suffixes and punctuation
pub fn normalize_title(title: &str) -> String {
    let mut folded = fold(title.trim());
    loop {
        let stripped = COPY_SUFFIX_RE.replace(&folded, "").into_owned();
        if stripped == folded {
            break;
        }
        folded = stripped;
    }

    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn fingerprint(candidate: &Candidate, content_chars: usize) -> Vec<char> {
    let title = if candidate.name.is_empty() {
        file_stem(&candidate.path)
    } else {
        candidate.name.as_str()
    };
    let mut fp: Vec<char> = normalize_title(title).chars().collect();

    if let Some(content) = candidate.content.as_deref() {
        if content_chars > 0 {
            fp.push(' ');
            let body = fold(content);
            let mut words = body.split_whitespace().flat_map(|w| {
                std::iter::once(' ').chain(w.chars())
            });
            // Skip the leading separator
            words.next();
            fp.extend(words.take(content_chars));
        }
    }
    fp
}

/// `(start, len)` of `segments` disjoint, contiguous segments covering `len` chars
fn segment_bounds(len: usize, segments: usize) -> impl Iterator<Item = (usize, usize)> {
    let base = len / segments;
    let longer = len % segments;
    (0..segments).scan(0, move |start, seg| {
        let seg_len = base + usize::from(seg < longer);
        let bounds = (*start, seg_len);
        *start += seg_len;
        Some(bounds)
    })
}

/// Disjoint-set forest over candidate indices
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index becomes the root so groups are keyed stably
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Fuzzy deduplicator
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
    strategy: CanonicalStrategy,
    fingerprint_chars: usize,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            threshold: config.threshold,
            strategy: config.strategy,
            fingerprint_chars: config.fingerprint_chars,
        }
    }

    /// Whether two fingerprints are similar enough to merge
    fn similar(&self, a: &[char], b: &[char]) -> bool {
        let max_len = a.len().max(b.len());
        if max_len == 0 {
            return true;
        }
        match levenshtein_within(a, b, self.budget(max_len)) {
            Some(d) => 1.0 - d as f64 / max_len as f64 >= self.threshold - 1e-9,
            None => false,
        }
    }

    /// Edits a fingerprint of `len` chars tolerates when it is the longer of a pair
    fn budget(&self, len: usize) -> usize {
        ((1.0 - self.threshold) * len as f64 + 1e-9).floor() as usize
    }

    /// Pairs `(i, j)`, `i < j`, sharing at least one segment bucket
    fn candidate_pairs(&self, fingerprints: &[Vec<char>]) -> BTreeSet<(usize, usize)> {
        let mut buckets: HashMap<(usize, usize, &[char]), Vec<usize>> = HashMap::new();
        // Too short to cut into k + 1 non-empty segments: compared by length alone
        let mut unsegmented: Vec<usize> = Vec::new();
        let mut lengths: BTreeSet<usize> = BTreeSet::new();

        for (j, fp) in fingerprints.iter().enumerate() {
            lengths.insert(fp.len());
            let segments = self.budget(fp.len()) + 1;
            if segments > fp.len() {
                unsegmented.push(j);
                continue;
            }
            for (seg, (start, len)) in segment_bounds(fp.len(), segments).enumerate() {
                buckets
                    .entry((fp.len(), seg, &fp[start..start + len]))
                    .or_default()
                    .push(j);
            }
        }

        let mut pairs = BTreeSet::new();
        let mut pair = |a: usize, b: usize| {
            if a != b {
                pairs.insert((a.min(b), a.max(b)));
            }
        };

        for (i, shorter) in fingerprints.iter().enumerate() {
            let len_i = shorter.len();
            // Longest partner that can still reach the threshold
            let reach = if self.threshold > 0.0 {
                (len_i as f64 / self.threshold + 1e-9).floor() as usize
            } else {
                usize::MAX
            };

            for &len_j in lengths.range(len_i..=reach) {
                let k = self.budget(len_j);
                let segments = k + 1;
                if segments > len_j {
                    continue;
                }
                for (seg, (start, len)) in segment_bounds(len_j, segments).enumerate() {
                    let lo = start.saturating_sub(k);
                    let hi = (start + k).min(len_i.saturating_sub(len));
                    if len > len_i || lo > hi {
                        continue;
                    }
                    for at in lo..=hi {
                        if let Some(hits) = buckets.get(&(len_j, seg, &shorter[at..at + len])) {
                            for &j in hits {
                                if len_j > len_i || j > i {
                                    pair(i, j);
                                }
                            }
                        }
                    }
                }
            }
        }

        for &j in &unsegmented {
            let len_j = fingerprints[j].len();
            for (i, fp) in fingerprints.iter().enumerate() {
                let (short, long) = (fp.len().min(len_j), fp.len().max(len_j));
                if long == 0 || short as f64 >= self.threshold * long as f64 - 1e-9 {
                    pair(i, j);
                }
            }
        }

        pairs
    }

    /// Strategy order: `Less` means `a` is the better canonical pick
    fn prefer(&self, a: &Candidate, b: &Candidate) -> Ordering {
        let primary = match self.strategy {
            CanonicalStrategy::Freshest => b.modified.cmp(&a.modified),
            CanonicalStrategy::Shortest => a.content_len().cmp(&b.content_len()),
            CanonicalStrategy::Longest => b.content_len().cmp(&a.content_len()),
        };
        primary.then_with(|| a.path.cmp(&b.path))
    }

    /// Merge near-duplicates. The output is never longer than the input and keeps
    /// the input order of the surviving canonical candidates.
    pub fn dedupe(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let n = candidates.len();
        if n < 2 || self.threshold > 1.0 {
            return candidates;
        }

        let fingerprints: Vec<Vec<char>> = candidates
            .iter()
            .map(|c| fingerprint(c, self.fingerprint_chars))
            .collect();

        let mut sets = UnionFind::new(n);
        for (i, j) in self.candidate_pairs(&fingerprints) {
            if self.similar(&fingerprints[i], &fingerprints[j]) {
                sets.union(i, j);
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..n {
            groups.entry(sets.find(i)).or_default().push(i);
        }

        let mut survivors: Vec<(usize, Candidate)> = Vec::with_capacity(groups.len());
        let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();

        for members in groups.into_values() {
            let canonical_idx = members
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    let (ca, cb) = (slots[a].as_ref(), slots[b].as_ref());
                    match (ca, cb) {
                        (Some(ca), Some(cb)) => self.prefer(ca, cb),
                        _ => Ordering::Equal,
                    }
                })
                .unwrap_or(members[0]);

            let mut merged_paths = Vec::new();
            let mut best_relevance = f64::MIN;
            let mut best_coarse = f64::MIN;
            for &m in &members {
                if let Some(c) = slots[m].as_ref() {
                    best_relevance = best_relevance.max(c.relevance_score);
                    best_coarse = best_coarse.max(c.coarse_score);
                    merged_paths.extend(c.merged_paths.iter().cloned());
                    if m != canonical_idx {
                        merged_paths.push(c.path.clone());
                    }
                }
            }

            if let Some(mut canonical) = slots[canonical_idx].take() {
                if members.len() > 1 {
                    tracing::debug!(
                        "Merged {} near-duplicates into {}",
                        members.len() - 1,
                        canonical.path
                    );
                }
                merged_paths.sort();
                merged_paths.dedup();
                canonical.merged_paths = merged_paths;
                canonical.relevance_score = best_relevance;
                canonical.coarse_score = best_coarse;
                survivors.push((canonical_idx, canonical));
            }
        }

        survivors.sort_by_key(|(idx, _)| *idx);
        survivors.into_iter().map(|(_, c)| c).collect()
    }
}

/// Merge near-duplicates with the given configuration
pub fn dedupe(candidates: Vec<Candidate>, config: &DedupConfig) -> Vec<Candidate> {
    Deduplicator::new(config).dedupe(candidates)
}
