//! Document chunking for context assembly

use super::tokenizer::token_spans;

/// Document chunk
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    /// Offset of the first token of the chunk, in budget tokens
    pub position: usize,
    pub token_count: usize,
}

/// Token-based chunking.
///
/// Each chunk holds at most `chunk_size` budget tokens. When the cut would fall in
/// the middle of a paragraph, a natural break point (paragraph gap, sentence end) is
/// looked for in the last 30% of the window.
pub fn chunk_by_tokens(content: &str, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let spans = token_spans(content);

    if spans.is_empty() {
        return Vec::new();
    }

    if spans.len() <= chunk_size {
        return vec![Chunk {
            text: content[spans[0].0..spans[spans.len() - 1].1].to_string(),
            position: 0,
            token_count: spans.len(),
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < spans.len() {
        let mut end = (start + chunk_size).min(spans.len());

        // Find natural break point in last 30%
        if end < spans.len() {
            let search_from = start + (chunk_size * 70 / 100).max(1);
            if let Some(brk) = (search_from..end)
                .rev()
                .find(|&i| is_break_after(content, &spans, i - 1))
            {
                end = brk;
            }
        }

        chunks.push(Chunk {
            text: content[spans[start].0..spans[end - 1].1].to_string(),
            position: start,
            token_count: end - start,
        });

        start = end;
    }

    chunks
}

/// Whether a natural break follows the token at `idx`
fn is_break_after(content: &str, spans: &[(usize, usize)], idx: usize) -> bool {
    let (s, e) = spans[idx];
    if let Some(&(next_start, _)) = spans.get(idx + 1) {
        if content[e..next_start].contains("\n\n") {
            return true;
        }
    }
    let token = &content[s..e];
    token.ends_with('.') || token.ends_with('!') || token.ends_with('?')
}
