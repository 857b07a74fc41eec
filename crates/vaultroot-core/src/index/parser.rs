//! Note parsing utilities

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref HEADING_RE: Regex = Regex::new(r"^#\s+(.+)$").unwrap();
    static ref INLINE_TAG_RE: Regex =
        Regex::new(r"(?:^|[\s(])#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").unwrap();
    static ref FRONTMATTER_TAGS_RE: Regex =
        Regex::new(r"(?m)^tags:[ \t]*\[?([^\]\n]*)\]?[ \t]*$").unwrap();
    static ref FRONTMATTER_LIST_ITEM_RE: Regex = Regex::new(r"^\s*-\s+(.+)$").unwrap();
}

/// Generic headings to skip
const SKIP_TITLES: &[&str] = &["Notes", "README", "Index"];

/// Extract title from markdown content, falling back to the file stem
pub fn extract_title(content: &str, filename: &str) -> String {
    for line in strip_frontmatter(content).lines().take(50) {
        if let Some(caps) = HEADING_RE.captures(line) {
            let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !title.is_empty() && !SKIP_TITLES.contains(&title) {
                return title.to_string();
            }
        }
    }

    super::tokenizer::file_stem(filename).to_string()
}

/// Content without a leading `---` YAML frontmatter block
pub fn strip_frontmatter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---\n") else {
        return content;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.strip_prefix('\n').unwrap_or(after)
        }
        None => content,
    }
}

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_start_matches('#')
        .trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_lowercase())
    }
}

/// Tags declared in the raw frontmatter block (`tags: [a, b]` or a YAML list)
fn frontmatter_tags(content: &str) -> Vec<String> {
    let Some(rest) = content.strip_prefix("---\n") else {
        return Vec::new();
    };
    let block = match rest.find("\n---") {
        Some(end) => &rest[..end],
        None => return Vec::new(),
    };

    let mut tags = Vec::new();
    if let Some(caps) = FRONTMATTER_TAGS_RE.captures(block) {
        let inline = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        tags.extend(inline.split(',').filter_map(normalize_tag));

        if inline.trim().is_empty() {
            let after = &block[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
            for line in after.lines().skip_while(|l| l.trim().is_empty()) {
                match FRONTMATTER_LIST_ITEM_RE.captures(line) {
                    Some(item) => tags.extend(item.get(1).and_then(|m| normalize_tag(m.as_str()))),
                    None => break,
                }
            }
        }
    }
    tags
}

/// Collect tags from the store-provided list, the frontmatter and inline `#tags`.
///
/// Tags are lowercased, stripped of `#`, deduplicated and sorted.
pub fn extract_tags(content: &str, provided: &[String]) -> Vec<String> {
    let mut tags: BTreeSet<String> = provided.iter().filter_map(|t| normalize_tag(t)).collect();
    tags.extend(frontmatter_tags(content));

    for line in strip_frontmatter(content).lines() {
        // Headings start with "# ", which the tag pattern cannot match
        for caps in INLINE_TAG_RE.captures_iter(line) {
            if let Some(tag) = caps.get(1).and_then(|m| normalize_tag(m.as_str())) {
                if !tag.chars().all(|c| c.is_ascii_digit()) {
                    tags.insert(tag);
                }
            }
        }
    }

    tags.into_iter().collect()
}
