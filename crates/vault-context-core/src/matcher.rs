//! Term matching strategies used by the candidate aggregator.
//!
//! Both the term and the text are expected to be normalized with
//! [`normalize_text`](crate::query::normalize_text) before matching.

/// Decides whether a query term matches a piece of note text.
pub trait MatchStrategy: Send + Sync {
    fn matches(&self, term: &str, text: &str) -> bool;
}

/// Sub-tokens of a filename or path: split on `-`, `_`, `.`, `/`, and whitespace.
pub fn sub_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c == '-' || c == '_' || c == '.' || c == '/' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// Case-insensitive substring matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatch;

impl MatchStrategy for SubstringMatch {
    fn matches(&self, term: &str, text: &str) -> bool {
        if term.is_empty() {
            return false;
        }
        text.contains(term)
    }
}

/// Substring matching plus edit-distance tolerance per sub-token.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatch {
    /// Minimum normalized Levenshtein similarity in `[0, 1]`.
    pub threshold: f64,
}

impl Default for FuzzyMatch {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

impl MatchStrategy for FuzzyMatch {
    fn matches(&self, term: &str, text: &str) -> bool {
        if SubstringMatch.matches(term, text) {
            return true;
        }
        // Very short terms produce too many accidental near-misses.
        if term.chars().count() < 4 {
            return false;
        }
        sub_tokens(text).any(|t| strsim::normalized_levenshtein(term, t) >= self.threshold)
    }
}
