//! Efficient text processing utilities

use std::borrow::Cow;
use std::collections::HashSet;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"[\p{L}\p{N}]+").expect("static regex");
}

/// Case-insensitive text operations without allocation when possible
pub struct TextUtils;

impl TextUtils {
    /// Truncate text to `max_chars` characters, appending "..." when cut.
    ///
    /// Counts characters rather than bytes so multi-byte text never splits
    /// inside a code point.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            None => Cow::Borrowed(text),
            Some((cut, _)) => {
                let mut result = String::with_capacity(cut + 3);
                result.push_str(&text[..cut]);
                result.push_str("...");
                Cow::Owned(result)
            }
        }
    }

    /// Check if word is significant (not stop word, long enough)
    pub fn is_significant_word(word: &str, min_len: usize) -> bool {
        if word.chars().count() < min_len {
            return false;
        }

        !matches!(word, "the" | "and" | "but" | "for" | "with" | "are" | "was" | "were" |
            "been" | "being" | "have" | "has" | "had" | "does" | "did" | "you" | "your" |
            "this" | "that" | "these" | "those" | "what" | "about" |
            "que" | "los" | "las" | "una" | "por" | "para" | "con" | "del" | "como" | "pero" |
            "mas" | "muy" | "esta" | "este" | "eso")
    }

    /// Lowercased significant words of `text`
    pub fn keywords(text: &str) -> HashSet<String> {
        WORD_REGEX
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|w| Self::is_significant_word(w, 3))
            .collect()
    }

    /// Order `candidates` by keyword overlap with `query`, keeping at most `limit`.
    ///
    /// Candidates must arrive most-recent-first: the sort is stable, so equal
    /// scores (including zero overlap) keep recency order.
    pub fn rank_by_relevance(query: &str, candidates: Vec<String>, limit: usize) -> Vec<String> {
        let query_words = Self::keywords(query);
        let mut scored: Vec<(usize, String)> = candidates
            .into_iter()
            .map(|candidate| {
                let score = if query_words.is_empty() {
                    0
                } else {
                    Self::keywords(&candidate).intersection(&query_words).count()
                };
                (score, candidate)
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, text)| text).collect()
    }
}
