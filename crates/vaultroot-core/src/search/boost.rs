//! Metadata-aware score boosting: path patterns, tags and freshness

use super::ranking::compare_ranked;
use super::{Candidate, Query};
use crate::config::BoostConfig;
use crate::error::Result;
use crate::index::fold;
use glob::{MatchOptions, Pattern};
use std::collections::HashMap;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Compiled boost rules
#[derive(Debug, Clone)]
pub struct MetadataBooster {
    path_weights: Vec<(Pattern, f64)>,
    tag_weights: HashMap<String, f64>,
    freshness_weight: f64,
    max_age_days: f64,
}

impl MetadataBooster {
    pub fn new(config: &BoostConfig) -> Result<Self> {
        let path_weights = config
            .path_weights
            .iter()
            .map(|pw| -> Result<(Pattern, f64)> {
                Ok((Pattern::new(&pw.pattern)?, pw.weight))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            path_weights,
            tag_weights: config
                .tag_weights
                .iter()
                .map(|(tag, weight)| (fold(tag.trim_start_matches('#')), *weight))
                .collect(),
            freshness_weight: config.freshness_weight,
            max_age_days: config.max_age_days,
        })
    }

    fn path_factor(&self, path: &str) -> f64 {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.path_weights
            .iter()
            .filter(|(pattern, _)| pattern.matches_with(path, options))
            .map(|(_, weight)| *weight)
            .product()
    }

    fn tag_factor(&self, tags: &[String]) -> f64 {
        let mut seen: Vec<String> = tags.iter().map(|t| fold(t)).collect();
        seen.sort();
        seen.dedup();
        seen.iter()
            .filter_map(|t| self.tag_weights.get(t))
            .product()
    }

    /// `1 + weight * exp(-age / max_age)`, age measured from `query.issued_at`
    fn freshness_factor(&self, candidate: &Candidate, query: &Query) -> f64 {
        let Some(modified) = candidate.modified else {
            return 1.0;
        };
        if self.max_age_days <= 0.0 {
            return 1.0;
        }
        let age_days =
            (query.issued_at - modified).num_seconds().max(0) as f64 / SECONDS_PER_DAY;
        1.0 + self.freshness_weight * (-age_days / self.max_age_days).exp()
    }

    /// Adjusted score for one candidate. Pure: same config and input give the same score.
    pub fn boost(&self, candidate: &Candidate, query: &Query) -> f64 {
        candidate.relevance_score
            * self.path_factor(&candidate.path)
            * self.tag_factor(&candidate.tags)
            * self.freshness_factor(candidate, query)
    }

    /// Boost every candidate and re-sort best-first
    pub fn apply(&self, candidates: &mut [Candidate], query: &Query, epsilon: f64) {
        for candidate in candidates.iter_mut() {
            candidate.relevance_score = self.boost(candidate, query);
        }
        candidates.sort_by(|a, b| compare_ranked(a, b, epsilon));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PathWeight};
    use crate::search::testing::candidate;
    use crate::search::QueryComposer;
    use chrono::{TimeZone, Utc};

    fn query_at_day(day: u32) -> Query {
        QueryComposer::new(&Config::default()).compose_at(
            "x",
            None,
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        )
    }

    fn scored(path: &str, score: f64, day: u32) -> Candidate {
        let mut c = candidate(path, "", day);
        c.relevance_score = score;
        c
    }

    #[test]
    fn test_archive_path_demoted() {
        let booster = MetadataBooster::new(&BoostConfig {
            freshness_weight: 0.0,
            ..BoostConfig::default()
        })
        .unwrap();
        let q = query_at_day(10);
        assert!((booster.boost(&scored("notes/archive/old.md", 1.0, 1), &q) - 0.7).abs() < 1e-9);
        assert!((booster.boost(&scored("archive/old.md", 1.0, 1), &q) - 0.7).abs() < 1e-9);
        assert!((booster.boost(&scored("notes/live.md", 1.0, 1), &q) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tag_weights_multiply() {
        let mut config = BoostConfig {
            path_weights: vec![],
            freshness_weight: 0.0,
            ..BoostConfig::default()
        };
        config.tag_weights.insert("#Importante".into(), 2.0);
        let booster = MetadataBooster::new(&config).unwrap();

        let mut c = scored("a.md", 1.5, 1);
        c.tags = vec!["importante".into()];
        assert!((booster.boost(&c, &query_at_day(1)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_decays_with_age() {
        let booster = MetadataBooster::new(&BoostConfig {
            path_weights: vec![],
            ..BoostConfig::default()
        })
        .unwrap();
        let q = query_at_day(31);
        let fresh = booster.boost(&scored("a.md", 1.0, 31), &q);
        let old = booster.boost(&scored("b.md", 1.0, 1), &q);
        assert!((fresh - 1.2).abs() < 1e-9);
        assert!(old < fresh);
        assert!(old > 1.0);
    }

    #[test]
    fn test_boost_is_deterministic_and_resorts() {
        let booster = MetadataBooster::new(&BoostConfig {
            path_weights: vec![PathWeight::new("**/templates/**", 0.1)],
            ..BoostConfig::default()
        })
        .unwrap();
        let q = query_at_day(5);
        let mut first = vec![
            scored("vault/templates/t.md", 2.0, 5),
            scored("vault/notes/n.md", 1.0, 5),
        ];
        let mut second = first.clone();
        booster.apply(&mut first, &q, 1e-6);
        booster.apply(&mut second, &q, 1e-6);

        assert_eq!(first[0].path, "vault/notes/n.md");
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = MetadataBooster::new(&BoostConfig {
            path_weights: vec![PathWeight::new("[unclosed", 1.0)],
            ..BoostConfig::default()
        });
        assert!(result.is_err());
    }
}
