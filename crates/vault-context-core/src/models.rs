//! Core data models used throughout Vault Context.
//!
//! These types represent the candidates, stream chunks, and assembled
//! context that flow through a single search. Stages never share a
//! candidate set: each one takes the set by value and returns a new one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which part of a note produced the match that made it a candidate.
///
/// Variants are declared from highest to lowest precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Filename,
    Path,
    Content,
}

impl MatchType {
    /// Lower values win when the same path is discovered more than once.
    pub fn priority(self) -> u8 {
        match self {
            MatchType::Filename => 0,
            MatchType::Path => 1,
            MatchType::Content => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Filename => "filename",
            MatchType::Path => "path",
            MatchType::Content => "content",
        }
    }
}

/// Note metadata used by boosting and deduplication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    /// Tags without the leading `#`, lowercased.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Last modification time, when the store reports one.
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// One note under consideration for a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Vault-relative path; unique within a search.
    pub path: String,
    /// Final path segment.
    pub name: String,
    /// Note body, fetched lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub match_type: MatchType,
    /// Always finite and non-negative.
    pub match_score: f64,
    #[serde(default)]
    pub metadata: CandidateMetadata,
    /// Paths collapsed into this candidate by the deduplicator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<String>,
}

impl Candidate {
    pub fn new(path: impl Into<String>, match_type: MatchType, match_score: f64) -> Self {
        let path = path.into();
        let name = file_name(&path).to_string();
        Self {
            path,
            name,
            content: None,
            match_type,
            match_score: sanitize_score(match_score),
            metadata: CandidateMetadata::default(),
            duplicates: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, metadata: CandidateMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Return the candidate with a new score, clamped to a finite, non-negative value.
    /// An overflowed score saturates at `f64::MAX` so it still sorts first.
    pub fn with_score(mut self, score: f64) -> Self {
        self.match_score = sanitize_score(score);
        self
    }

    /// Filename, path, and content joined for lexical statistics.
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.name.len() + self.path.len() + self.content.as_ref().map_or(0, String::len) + 2,
        );
        text.push_str(&self.name);
        text.push('\n');
        text.push_str(&self.path);
        if let Some(content) = &self.content {
            text.push('\n');
            text.push_str(content);
        }
        text
    }

    /// Length of the content in bytes, zero when not fetched.
    pub fn content_len(&self) -> usize {
        self.content.as_ref().map_or(0, String::len)
    }
}

/// Clamp NaN and negatives to zero and saturate `+inf` so scores stay usable for sorting.
pub fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() || score <= 0.0 {
        0.0
    } else if score.is_infinite() {
        f64::MAX
    } else {
        score
    }
}

/// Final segment of a `/`-separated vault path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// A note body together with its metadata, as returned by a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub path: String,
    pub content: String,
    pub metadata: CandidateMetadata,
}

/// A slice of a document body delivered incrementally.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub data: Vec<u8>,
    /// 0-based, strictly increasing within one stream.
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// Set on the final chunk of the stream.
    pub complete: bool,
}

impl StreamChunk {
    pub fn new(index: u64, data: impl Into<Vec<u8>>, complete: bool) -> Self {
        Self {
            data: data.into(),
            index,
            timestamp: Utc::now(),
            complete,
        }
    }
}

/// Output of merging one chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedResult {
    pub content: String,
    /// Size of the merged byte stream, delimiters included.
    pub size: usize,
}

/// Token-budgeted context produced once per search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub content: String,
    pub token_count: usize,
    pub budget_used_pct: f64,
    /// Included candidates, in packing order.
    pub sources: Vec<ContextSource>,
}

/// A candidate that contributed at least one chunk to the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSource {
    pub path: String,
    pub score: f64,
    pub chunks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_nested_path() {
        assert_eq!(file_name("notes/daily/2024-01-01.md"), "2024-01-01.md");
        assert_eq!(file_name("root.md"), "root.md");
        assert_eq!(file_name("projects/"), "projects");
    }

    #[test]
    fn test_scores_are_sanitized() {
        assert_eq!(Candidate::new("a.md", MatchType::Content, f64::NAN).match_score, 0.0);
        assert_eq!(Candidate::new("a.md", MatchType::Content, -2.0).match_score, 0.0);
        assert_eq!(Candidate::new("a.md", MatchType::Content, f64::NEG_INFINITY).match_score, 0.0);
    }

    #[test]
    fn test_overflowed_score_saturates_and_sorts_first() {
        let c = Candidate::new("a.md", MatchType::Content, 1.0).with_score(f64::INFINITY);
        assert_eq!(c.match_score, f64::MAX);
        assert!(c.match_score > sanitize_score(1e300 * 0.5));
        assert_eq!(sanitize_score(1e300 * 1e300), f64::MAX);
    }

    #[test]
    fn test_searchable_text_includes_populated_fields() {
        let c = Candidate::new("notes/rust.md", MatchType::Filename, 1.0).with_content("borrow checker");
        let text = c.searchable_text();
        assert!(text.contains("rust.md"));
        assert!(text.contains("notes/rust.md"));
        assert!(text.contains("borrow checker"));
    }

    #[test]
    fn test_match_type_priority_order() {
        assert!(MatchType::Filename.priority() < MatchType::Path.priority());
        assert!(MatchType::Path.priority() < MatchType::Content.priority());
    }
}
