//! Term normalization shared by the index, the query composer and the ranker.
//!
//! Two notions of "token" live here:
//! - *terms*: case- and diacritic-folded alphanumeric runs, used for matching
//! - *budget tokens*: maximal non-whitespace runs, used for counting and truncating
//!   context so a cut never lands inside a word

/// Common Portuguese and English stop words
const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "to", "was", "were", "will",
    "with", "this", "these", "those",
    // Portuguese
    "o", "os", "as", "um", "uma", "uns", "umas", "de", "do", "dos", "da", "das", "e", "em",
    "no", "nos", "na", "nas", "por", "para", "com", "que", "se", "ao", "aos",
];

/// Fold a single character: lowercase and strip Latin diacritics
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        other => other.to_lowercase().next().unwrap_or(other),
    }
}

/// Case- and diacritic-fold a string
pub fn fold(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

/// Split text into folded terms, in order of appearance.
///
/// The index of a term in the returned vector is its position.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            current.push(fold_char(c));
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }

    terms
}

/// Whether a folded term is a stop word
pub fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.contains(&term)
}

/// File name without directories or extension
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Byte spans of budget tokens (maximal non-whitespace runs)
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

/// Count budget tokens
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Longest prefix of `text` holding at most `max_tokens` budget tokens.
///
/// The cut is placed right after the last kept token, never inside one.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    if max_tokens == 0 {
        return "";
    }
    let spans = token_spans(text);
    if spans.len() <= max_tokens {
        return text;
    }
    &text[..spans[max_tokens - 1].1]
}
