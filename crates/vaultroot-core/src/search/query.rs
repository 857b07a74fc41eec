//! Query composition
//!
//! Turns raw user input into an immutable [`Query`]: filters are split off, the
//! remaining text is tokenized and folded, stop words are dropped and each term is
//! expanded through a bilingual (Portuguese/English) synonym table.

use super::rewrite::Rewrite;
use crate::config::Config;
use crate::index::{fold, is_stop_word, tokenize};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;

lazy_static! {
    /// Folded term -> synonyms in the other language (and close variants)
    static ref SYNONYMS: HashMap<&'static str, Vec<&'static str>> = {
        let pairs: &[(&str, &str)] = &[
            ("produtividade", "productivity"),
            ("desempenho", "performance"),
            ("monge", "monk"),
            ("rotina", "routine"),
            ("habito", "habit"),
            ("habitos", "habits"),
            ("foco", "focus"),
            ("meta", "goal"),
            ("metas", "goals"),
            ("tarefa", "task"),
            ("tarefas", "tasks"),
            ("nota", "note"),
            ("notas", "notes"),
            ("reuniao", "meeting"),
            ("projeto", "project"),
            ("ideia", "idea"),
            ("livro", "book"),
            ("leitura", "reading"),
            ("saude", "health"),
            ("treino", "workout"),
            ("estudo", "study"),
            ("trabalho", "work"),
            ("diario", "journal"),
            ("resumo", "summary"),
            ("aprendizado", "learning"),
            ("alta", "high"),
        ];

        let mut table: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for &(pt, en) in pairs {
            table.entry(pt).or_default().push(en);
            table.entry(en).or_default().push(pt);
        }
        table
    };
}

/// Synonyms of a folded term
pub fn synonyms(term: &str) -> &'static [&'static str] {
    SYNONYMS.get(term).map(Vec::as_slice).unwrap_or(&[])
}

/// Where a query term came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermOrigin {
    Original,
    Synonym,
    Correction,
}

/// One weighted, folded query term
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTerm {
    pub text: String,
    pub weight: f64,
    pub origin: TermOrigin,
}

/// Per-field score multipliers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldBoosts {
    pub filename: f64,
    pub body: f64,
}

/// Structured filters parsed out of the raw query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryFilters {
    /// Folded tags, all required
    pub tags: Vec<String>,
    /// Path prefixes, any may match
    pub path_prefixes: Vec<String>,
    /// Extensions without the dot, any may match
    pub extensions: Vec<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.path_prefixes.is_empty() && self.extensions.is_empty()
    }

    /// Whether a path passes the path and extension filters
    pub fn matches_path(&self, path: &str) -> bool {
        let folded = fold(path);
        let prefix_ok = self.path_prefixes.is_empty()
            || self
                .path_prefixes
                .iter()
                .any(|p| folded.starts_with(p.as_str()));
        let ext_ok = self.extensions.is_empty()
            || path
                .rsplit_once('.')
                .map(|(_, ext)| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
                .unwrap_or(false);
        prefix_ok && ext_ok
    }

    /// Whether a tag set contains every required tag
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        self.tags
            .iter()
            .all(|required| tags.iter().any(|t| fold(t) == *required))
    }

    fn render(&self) -> Vec<String> {
        let mut parts = Vec::new();
        parts.extend(self.tags.iter().map(|t| format!("tag:{}", t)));
        parts.extend(self.path_prefixes.iter().map(|p| format!("path:{}", p)));
        parts.extend(self.extensions.iter().map(|e| format!("ext:{}", e)));
        parts
    }
}

/// Parse filters from query string.
///
/// Supports syntax: `tag:habitos path:Daily/ ext:md search terms`.
/// Returns: (remaining text, filters)
pub fn parse_filters(raw: &str) -> (String, QueryFilters) {
    let mut filters = QueryFilters::default();
    let mut remaining_terms = Vec::new();

    for term in raw.split_whitespace() {
        if let Some((field, value)) = term.split_once(':') {
            let value = value.trim();
            if !value.is_empty() {
                match field.to_lowercase().as_str() {
                    "tag" => {
                        filters.tags.push(fold(value.trim_start_matches('#')));
                        continue;
                    }
                    "path" | "folder" => {
                        filters
                            .path_prefixes
                            .push(fold(value.trim_start_matches('/')));
                        continue;
                    }
                    "ext" => {
                        filters
                            .extensions
                            .push(value.trim_start_matches('.').to_lowercase());
                        continue;
                    }
                    _ => {}
                }
            }
        }
        remaining_terms.push(term);
    }

    (remaining_terms.join(" "), filters)
}

/// Composed query. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub original: String,
    pub terms: Vec<QueryTerm>,
    pub boosts: FieldBoosts,
    pub filters: QueryFilters,
    /// Reference time for freshness boosting
    pub issued_at: DateTime<Utc>,
}

impl Query {
    /// Expanded token list
    pub fn tokens(&self) -> Vec<&str> {
        self.terms.iter().map(|t| t.text.as_str()).collect()
    }

    /// Terms the user actually asked for (originals and corrections)
    pub fn primary_terms(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| t.origin != TermOrigin::Synonym)
            .map(|t| t.text.as_str())
            .collect()
    }

    pub fn weight_of(&self, term: &str) -> f64 {
        self.terms
            .iter()
            .find(|t| t.text == term)
            .map(|t| t.weight)
            .unwrap_or(0.0)
    }

    /// No terms and no filters
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.filters.is_empty()
    }
}

/// Builds queries from raw text
#[derive(Debug, Clone)]
pub struct QueryComposer {
    boosts: FieldBoosts,
    synonym_weight: f64,
    correction_weight: f64,
}

impl QueryComposer {
    pub fn new(config: &Config) -> Self {
        Self {
            boosts: FieldBoosts {
                filename: config.ranking.filename_boost,
                body: config.ranking.body_boost,
            },
            synonym_weight: config.query.synonym_weight,
            correction_weight: config.query.correction_weight,
        }
    }

    /// Compose a query issued now
    pub fn compose(&self, raw: &str) -> Query {
        self.compose_at(raw, None, Utc::now())
    }

    /// Compose a query with an explicit reference time, optionally applying a rewrite
    pub fn compose_at(
        &self,
        raw: &str,
        rewrite: Option<&Rewrite>,
        issued_at: DateTime<Utc>,
    ) -> Query {
        let (text, filters) = parse_filters(raw);
        let mut terms: Vec<QueryTerm> = Vec::new();

        for term in content_terms(&text) {
            match rewrite.and_then(|r| r.correction_for(&term)) {
                Some(corrected) => push_term(
                    &mut terms,
                    corrected.to_string(),
                    self.correction_weight,
                    TermOrigin::Correction,
                ),
                None => push_term(&mut terms, term, 1.0, TermOrigin::Original),
            }
        }

        let primary: Vec<String> = terms.iter().map(|t| t.text.clone()).collect();
        for term in &primary {
            for synonym in synonyms(term) {
                push_term(
                    &mut terms,
                    synonym.to_string(),
                    self.synonym_weight,
                    TermOrigin::Synonym,
                );
            }
        }

        Query {
            original: raw.to_string(),
            terms,
            boosts: self.boosts,
            filters,
            issued_at,
        }
    }
}

/// Folded terms with stop words removed, unless that would leave nothing
pub(crate) fn content_terms(text: &str) -> Vec<String> {
    let all = tokenize(text);
    let kept: Vec<String> = all.iter().filter(|t| !is_stop_word(t)).cloned().collect();
    if kept.is_empty() {
        all
    } else {
        kept
    }
}

fn push_term(terms: &mut Vec<QueryTerm>, text: String, weight: f64, origin: TermOrigin) {
    if !terms.iter().any(|t| t.text == text) {
        terms.push(QueryTerm {
            text,
            weight,
            origin,
        });
    }
}

/// Rebuild a raw query string from terms and filters
pub(crate) fn render_query(terms: &[String], filters: &QueryFilters) -> String {
    let mut parts: Vec<String> = terms.to_vec();
    parts.extend(filters.render());
    parts.join(" ")
}
