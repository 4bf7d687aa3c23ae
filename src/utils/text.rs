// src/utils/text.rs
//! Small text helpers shared by the similarity matcher, the extractive
//! statement fallback, and log previews.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;

/// Common filler words excluded from keyword scoring. Token overlap for
/// similarity keeps them (two atoms about "the same thing" should still
/// match on their full wording); only keyword extraction drops them.
pub static STOPWORDS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "from", "have", "are", "was", "were", "you",
        "your", "but", "not", "into", "over", "under", "then", "than", "there", "about", "just",
        "like", "they", "them", "their", "will", "would", "could", "has", "had", "can", "may",
        "might", "should",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric tokens of `s`, as a set.
pub fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Tokens worth counting as keywords: at least 3 chars and not a stopword.
pub fn keywords(s: &str) -> BTreeSet<String> {
    tokens(s)
        .into_iter()
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

/// Char-safe truncation (no mid-codepoint cuts, no ellipsis). Used for the
/// content/statement/quote length bounds, where the bound is part of the
/// stored value.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Single-line preview for event details and logs: newlines flattened,
/// truncated with an ellipsis.
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() > max_chars {
        let mut t: String = flat.chars().take(max_chars).collect();
        t.push('…');
        t
    } else {
        flat
    }
}
