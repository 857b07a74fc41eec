//! Token-budgeted context assembly with provenance

use super::fetcher::FetchStats;
use super::{Candidate, Query, SearchWarning};
use crate::index::{chunk_by_tokens, count_tokens, tokenize, truncate_to_tokens, Chunk};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One document that contributed to a context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub path: String,
    pub modified: Option<DateTime<Utc>>,
    /// Relevance weighted by this source's share of the context
    pub contribution: f64,
    /// Budget tokens contributed, header included
    pub tokens: usize,
    /// Near-duplicates folded into this source
    pub merged_paths: Vec<String>,
}

/// Assembled context returned to the caller
#[derive(Debug, Clone, Default, Serialize)]
pub struct Context {
    pub text: String,
    pub token_count: usize,
    pub max_tokens: usize,
    /// `token_count / max_tokens`
    pub budget_used: f64,
    pub sources: Vec<Source>,
    pub warnings: Vec<SearchWarning>,
    pub fetch_stats: FetchStats,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Context with no sources, e.g. for an empty candidate set
    pub fn empty(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }
}

/// Chunks picked from one document
struct Selection<'a> {
    candidate: &'a Candidate,
    header: String,
    header_tokens: usize,
    chunks: Vec<Chunk>,
    /// Chunk indices already taken, with the text actually used
    taken: Vec<(usize, String, usize)>,
}

impl Selection<'_> {
    fn tokens(&self) -> usize {
        self.header_tokens + self.taken.iter().map(|(_, _, t)| t).sum::<usize>()
    }

    fn render(&self) -> String {
        let mut taken: Vec<&(usize, String, usize)> = self.taken.iter().collect();
        taken.sort_by_key(|(idx, _, _)| self.chunks[*idx].position);
        let body: Vec<&str> = taken.iter().map(|(_, text, _)| text.as_str()).collect();
        format!("{}\n{}", self.header, body.join("\n\n"))
    }
}

/// Greedy context assembler
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    chunk_size: usize,
}

impl ContextAssembler {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    fn chunk_relevance(chunk: &Chunk, query: &Query) -> f64 {
        tokenize(&chunk.text)
            .iter()
            .map(|term| query.weight_of(term))
            .sum()
    }

    /// Fill up to `max_tokens` from candidates given best-first.
    ///
    /// The first pass takes each document's query-relevant chunks (its first chunk
    /// when none match), most relevant first. If budget remains, a second pass fills
    /// it with the remaining chunks in rank order. The chunk that would overflow the
    /// budget is truncated at a token boundary and ends assembly.
    pub fn assemble(&self, candidates: &[Candidate], query: &Query, max_tokens: usize) -> Context {
        let mut remaining = max_tokens;
        let mut selections: Vec<Selection> = Vec::new();
        let mut queues: Vec<Vec<usize>> = Vec::new();
        let mut exhausted = false;

        // Pass 1: relevant chunks per document
        for candidate in candidates {
            let Some(content) = candidate.content.as_deref() else {
                continue;
            };
            let chunks = chunk_by_tokens(content, self.chunk_size);
            if chunks.is_empty() {
                continue;
            }

            let header = format!("### {}", candidate.path);
            let header_tokens = count_tokens(&header);
            if header_tokens >= remaining {
                exhausted = true;
                break;
            }
            remaining -= header_tokens;

            let mut order: Vec<(usize, f64)> = chunks
                .iter()
                .enumerate()
                .map(|(i, c)| (i, Self::chunk_relevance(c, query)))
                .collect();
            order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            let relevant: Vec<usize> = order
                .iter()
                .filter(|(_, s)| *s > 0.0)
                .map(|(i, _)| *i)
                .collect();
            let first_pass: Vec<usize> = if relevant.is_empty() {
                vec![0]
            } else {
                relevant
            };
            let rest: Vec<usize> = order
                .iter()
                .map(|(i, _)| *i)
                .filter(|i| !first_pass.contains(i))
                .collect();

            let mut selection = Selection {
                candidate,
                header,
                header_tokens,
                chunks,
                taken: Vec::new(),
            };
            exhausted = Self::take_chunks(&mut selection, &first_pass, &mut remaining);
            selections.push(selection);
            queues.push(rest);
            if exhausted {
                break;
            }
        }

        // Pass 2: fill leftover budget in rank order
        if !exhausted {
            for (selection, rest) in selections.iter_mut().zip(&queues) {
                if Self::take_chunks(selection, rest, &mut remaining) {
                    break;
                }
            }
        }

        self.render(selections, max_tokens)
    }

    /// Take chunks in order; returns true once the budget is exhausted
    fn take_chunks(selection: &mut Selection, indices: &[usize], remaining: &mut usize) -> bool {
        for &idx in indices {
            if *remaining == 0 {
                return true;
            }
            let chunk = &selection.chunks[idx];
            if chunk.token_count <= *remaining {
                *remaining -= chunk.token_count;
                selection.taken.push((idx, chunk.text.clone(), chunk.token_count));
            } else {
                let text = truncate_to_tokens(&chunk.text, *remaining).to_string();
                let tokens = count_tokens(&text);
                *remaining -= tokens;
                selection.taken.push((idx, text, tokens));
                return true;
            }
        }
        *remaining == 0
    }

    fn render(&self, selections: Vec<Selection>, max_tokens: usize) -> Context {
        let selections: Vec<Selection> = selections
            .into_iter()
            .filter(|s| !s.taken.is_empty())
            .collect();

        let sections: Vec<String> = selections.iter().map(Selection::render).collect();
        let text = sections.join("\n\n");
        let token_count = count_tokens(&text);
        debug_assert!(token_count <= max_tokens);

        let sources = selections
            .iter()
            .map(|s| {
                let tokens = s.tokens();
                let share = if token_count > 0 {
                    tokens as f64 / token_count as f64
                } else {
                    0.0
                };
                Source {
                    path: s.candidate.path.clone(),
                    modified: s.candidate.modified,
                    contribution: s.candidate.relevance_score * share,
                    tokens,
                    merged_paths: s.candidate.merged_paths.clone(),
                }
            })
            .collect();

        Context {
            text,
            token_count,
            max_tokens,
            budget_used: if max_tokens > 0 {
                token_count as f64 / max_tokens as f64
            } else {
                0.0
            },
            sources,
            warnings: Vec::new(),
            fetch_stats: FetchStats::default(),
        }
    }
}
