//! Query rewriting: spelling correction against the indexed vocabulary

use super::distance::levenshtein_within;
use super::query::{content_terms, parse_filters, render_query, synonyms};
use crate::config::QueryConfig;
use serde::Serialize;

/// Shortest term (in characters) eligible for correction
const MIN_CORRECTABLE_LEN: usize = 4;

/// Known terms with their frequencies, ordered by length for banded lookup
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: Vec<(Vec<char>, String, u64)>,
}

impl Vocabulary {
    pub fn new<I>(words: I) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut words: Vec<(Vec<char>, String, u64)> = words
            .into_iter()
            .map(|(w, f)| (w.chars().collect(), w, f))
            .collect();
        words.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.1.cmp(&b.1)));
        words.dedup_by(|a, b| a.1 == b.1);
        Self { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.frequency(term).is_some()
    }

    pub fn frequency(&self, term: &str) -> Option<u64> {
        let len = term.chars().count();
        let start = self.words.partition_point(|w| w.0.len() < len);
        self.words[start..]
            .iter()
            .take_while(|w| w.0.len() == len)
            .find(|w| w.1 == term)
            .map(|w| w.2)
    }

    /// Closest word within `max_distance`: smallest distance, then most frequent,
    /// then lexical order
    pub fn closest(&self, term: &str, max_distance: usize) -> Option<(&str, usize)> {
        let chars: Vec<char> = term.chars().collect();
        let lo = chars.len().saturating_sub(max_distance);
        let hi = chars.len() + max_distance;
        let start = self.words.partition_point(|w| w.0.len() < lo);

        let mut best: Option<(&str, usize, u64)> = None;
        for (word_chars, word, freq) in self.words[start..]
            .iter()
            .take_while(|w| w.0.len() <= hi)
        {
            let Some(d) = levenshtein_within(&chars, word_chars, max_distance) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_word, best_d, best_freq)) => {
                    (d, std::cmp::Reverse(*freq), word.as_str())
                        < (best_d, std::cmp::Reverse(best_freq), best_word)
                }
            };
            if better {
                best = Some((word.as_str(), d, *freq));
            }
        }
        best.map(|(w, d, _)| (w, d))
    }
}

/// Outcome of a rewrite
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rewrite {
    pub original: String,
    /// Query text with corrections applied (filters preserved)
    pub corrected: String,
    /// Synonym terms injected for the corrected terms
    pub alternates: Vec<String>,
    /// 1.0 when nothing changed
    pub confidence: f64,
    /// (misspelled, replacement) pairs
    pub corrections: Vec<(String, String)>,
}

impl Rewrite {
    pub fn changed(&self) -> bool {
        !self.corrections.is_empty()
    }

    pub fn correction_for(&self, term: &str) -> Option<&str> {
        self.corrections
            .iter()
            .find(|(from, _)| from == term)
            .map(|(_, to)| to.as_str())
    }
}

/// Edit-distance spelling corrector
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    max_edit_distance: usize,
}

impl QueryRewriter {
    pub fn new(config: &QueryConfig) -> Self {
        Self {
            max_edit_distance: config.max_edit_distance,
        }
    }

    pub fn rewrite(&self, raw: &str, vocabulary: &Vocabulary) -> Rewrite {
        let (text, filters) = parse_filters(raw);
        let terms = content_terms(&text);

        let mut corrected_terms = Vec::with_capacity(terms.len());
        let mut corrections = Vec::new();
        let mut confidence_sum = 0.0;

        for term in &terms {
            let len = term.chars().count();
            let correction = if len >= MIN_CORRECTABLE_LEN
                && !vocabulary.is_empty()
                && !vocabulary.contains(term)
                && !term.chars().all(|c| c.is_ascii_digit())
            {
                vocabulary.closest(term, self.max_edit_distance)
            } else {
                None
            };

            match correction {
                Some((word, distance)) if distance > 0 => {
                    confidence_sum += 1.0 - distance as f64 / len as f64;
                    corrections.push((term.clone(), word.to_string()));
                    corrected_terms.push(word.to_string());
                }
                _ => {
                    confidence_sum += 1.0;
                    corrected_terms.push(term.clone());
                }
            }
        }

        let confidence = if terms.is_empty() {
            1.0
        } else {
            confidence_sum / terms.len() as f64
        };

        let mut alternates: Vec<String> = Vec::new();
        for term in &corrected_terms {
            for synonym in synonyms(term) {
                if !corrected_terms.iter().any(|t| t == synonym)
                    && !alternates.iter().any(|a| a == synonym)
                {
                    alternates.push(synonym.to_string());
                }
            }
        }

        Rewrite {
            original: raw.to_string(),
            corrected: render_query(&corrected_terms, &filters),
            alternates,
            confidence,
            corrections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> Vocabulary {
        Vocabulary::new(
            [
                ("produtividade", 12),
                ("monge", 7),
                ("montanha", 3),
                ("rotina", 5),
                ("rotinas", 9),
                ("foco", 4),
            ]
            .into_iter()
            .map(|(w, f)| (w.to_string(), f)),
        )
    }

    fn rewriter() -> QueryRewriter {
        QueryRewriter::new(&QueryConfig::default())
    }

    #[test]
    fn test_vocabulary_lookup() {
        let vocab = vocabulary();
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.frequency("monge"), Some(7));
        assert!(!vocab.contains("mong"));
    }

    #[test]
    fn test_closest_prefers_distance_then_frequency() {
        let vocab = vocabulary();
        assert_eq!(vocab.closest("produtivdade", 2), Some(("produtividade", 1)));
        // "rotinaz" is 1 away from both "rotina" and "rotinas"; "rotinas" is more frequent
        assert_eq!(vocab.closest("rotinaz", 2), Some(("rotinas", 1)));
        assert_eq!(vocab.closest("xyzxyzxyz", 2), None);
    }

    #[test]
    fn test_rewrite_corrects_and_scores() {
        let rewrite = rewriter().rewrite("produtivdade tag:foco", &vocabulary());
        assert_eq!(rewrite.corrected, "produtividade tag:foco");
        assert_eq!(
            rewrite.corrections,
            vec![("produtivdade".to_string(), "produtividade".to_string())]
        );
        assert!((rewrite.confidence - (1.0 - 1.0 / 12.0)).abs() < 1e-9);
        assert_eq!(rewrite.alternates, vec!["productivity"]);
        assert!(rewrite.changed());
    }

    #[test]
    fn test_short_and_known_terms_untouched() {
        let rewrite = rewriter().rewrite("foc monge", &vocabulary());
        assert!(!rewrite.changed());
        assert_eq!(rewrite.confidence, 1.0);
        assert_eq!(rewrite.corrected, "foc monge");
    }

    #[test]
    fn test_empty_vocabulary_never_corrects() {
        let rewrite = rewriter().rewrite("produtivdade", &Vocabulary::default());
        assert!(!rewrite.changed());
        assert_eq!(rewrite.confidence, 1.0);
    }
}
