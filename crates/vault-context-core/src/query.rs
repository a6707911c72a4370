//! Query composition: tokens, field boosts, and structural filters.
//!
//! [`QueryComposer::compose`] turns a raw query string into a
//! [`ComposedQuery`]. It performs no I/O and never fails; an empty or
//! whitespace-only query yields an empty token list, which callers must
//! check with [`ComposedQuery::is_empty`] before searching.
//!
//! # Pipeline
//!
//! 1. Split the raw string on whitespace and pull out `path:`, `tag:`, and
//!    `ext:` filters.
//! 2. Tokenize the remaining text on non-alphanumeric characters and lowercase.
//! 3. Run each [`QueryExpander`] over every original term. Variants are
//!    inserted right after their source term; the source is always kept.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::MatchType;

/// Per-field weights applied to aggregation base scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBoosts {
    pub filename: f64,
    pub path: f64,
    pub content: f64,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self {
            filename: 3.0,
            path: 2.0,
            content: 1.0,
        }
    }
}

impl FieldBoosts {
    pub fn weight(&self, match_type: MatchType) -> f64 {
        match match_type {
            MatchType::Filename => self.filename,
            MatchType::Path => self.path,
            MatchType::Content => self.content,
        }
    }
}

/// Structural filters extracted from `key:value` query words.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryFilters {
    /// From `path:<prefix>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// From `tag:<name>` (repeatable).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// From `ext:<extension>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_none() && self.tags.is_empty() && self.extension.is_none()
    }

    /// Whether a file path satisfies the path and extension filters.
    pub fn allows_file(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        if let Some(prefix) = &self.path_prefix {
            if !lower.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(ext) = &self.extension {
            let matches_ext = lower
                .rsplit_once('.')
                .map(|(_, e)| e == ext.as_str())
                .unwrap_or(false);
            if !matches_ext {
                return false;
            }
        }
        true
    }

    /// Whether a directory may contain files under the path prefix.
    pub fn may_contain(&self, dir: &str) -> bool {
        match &self.path_prefix {
            None => true,
            Some(_) if dir.trim_matches('/').is_empty() => true,
            Some(prefix) => {
                let dir = format!("{}/", dir.trim_end_matches('/').to_lowercase());
                dir.starts_with(prefix.as_str()) || prefix.starts_with(dir.as_str())
            }
        }
    }

    /// Whether a candidate with these tags passes every `tag:` filter.
    pub fn allows_tags<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        let have: HashSet<&str> = tags.into_iter().map(String::as_str).collect();
        self.tags.iter().all(|t| have.contains(t.as_str()))
    }
}

/// One original query term with its expansions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTerm {
    pub original: String,
    pub variants: Vec<String>,
}

impl QueryTerm {
    /// The original followed by its variants.
    pub fn forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.original.as_str()).chain(self.variants.iter().map(String::as_str))
    }
}

/// A normalized, expanded query. Read-only once composed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedQuery {
    pub raw: String,
    /// Original terms and variants, deduplicated, in insertion order.
    pub tokens: Vec<String>,
    pub terms: Vec<QueryTerm>,
    pub field_boosts: FieldBoosts,
    pub filters: QueryFilters,
}

impl ComposedQuery {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Produces additional forms of a query term.
///
/// Expansion is additive: the composer always keeps the original term.
pub trait QueryExpander: Send + Sync {
    fn expand(&self, term: &str) -> Vec<String>;
}

/// Strips diacritics so `ação` also matches `acao`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccentFolding;

impl QueryExpander for AccentFolding {
    fn expand(&self, term: &str) -> Vec<String> {
        let folded = fold_accents(term);
        if folded != term && !folded.is_empty() {
            vec![folded]
        } else {
            Vec::new()
        }
    }
}

/// Light English plural stripping: `notes` → `note`, `queries` → `query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluralFolding;

impl QueryExpander for PluralFolding {
    fn expand(&self, term: &str) -> Vec<String> {
        singular(term).map(|s| vec![s]).unwrap_or_default()
    }
}

fn singular(term: &str) -> Option<String> {
    if !term.is_ascii() || term.len() < 4 {
        return None;
    }
    if let Some(stem) = term.strip_suffix("ies") {
        if stem.len() >= 2 {
            return Some(format!("{stem}y"));
        }
    }
    if let Some(stem) = term.strip_suffix("es") {
        if ["s", "x", "z", "ch", "sh"].iter().any(|s| stem.ends_with(s)) {
            return Some(stem.to_string());
        }
    }
    if term.ends_with("ss") || term.ends_with("us") || term.ends_with("is") {
        return None;
    }
    term.strip_suffix('s').map(str::to_string)
}

/// Configured synonym table. Keys are matched after normalization.
#[derive(Debug, Clone, Default)]
pub struct Synonyms {
    table: HashMap<String, Vec<String>>,
}

impl Synonyms {
    pub fn new(table: &HashMap<String, Vec<String>>) -> Self {
        let table = table
            .iter()
            .map(|(k, v)| {
                let values = v.iter().flat_map(|s| tokenize(s)).collect();
                (normalize_text(k), values)
            })
            .collect();
        Self { table }
    }
}

impl QueryExpander for Synonyms {
    fn expand(&self, term: &str) -> Vec<String> {
        self.table
            .get(&normalize_text(term))
            .cloned()
            .unwrap_or_default()
    }
}

/// Composes raw queries with a fixed set of expanders and field boosts.
pub struct QueryComposer {
    expanders: Vec<Box<dyn QueryExpander>>,
    field_boosts: FieldBoosts,
}

impl Default for QueryComposer {
    fn default() -> Self {
        Self::new(FieldBoosts::default())
            .with_expander(AccentFolding)
            .with_expander(PluralFolding)
    }
}

impl QueryComposer {
    /// A composer with no expanders.
    pub fn new(field_boosts: FieldBoosts) -> Self {
        Self {
            expanders: Vec::new(),
            field_boosts,
        }
    }

    pub fn with_expander(mut self, expander: impl QueryExpander + 'static) -> Self {
        self.expanders.push(Box::new(expander));
        self
    }

    pub fn compose(&self, raw: &str) -> ComposedQuery {
        let mut filters = QueryFilters::default();
        let mut text = Vec::new();

        for word in raw.split_whitespace() {
            if !apply_filter(word, &mut filters) {
                text.push(word);
            }
        }

        let mut seen = HashSet::new();
        let mut tokens = Vec::new();
        let mut terms: Vec<QueryTerm> = Vec::new();

        for original in tokenize(&text.join(" ")) {
            if !seen.insert(original.clone()) {
                continue;
            }
            tokens.push(original.clone());
            let mut variants = Vec::new();
            for expander in &self.expanders {
                for variant in expander.expand(&original) {
                    if seen.insert(variant.clone()) {
                        tokens.push(variant.clone());
                        variants.push(variant);
                    }
                }
            }
            terms.push(QueryTerm { original, variants });
        }

        ComposedQuery {
            raw: raw.to_string(),
            tokens,
            terms,
            field_boosts: self.field_boosts,
            filters,
        }
    }
}

/// Compose with the default expanders and field boosts.
pub fn compose_query(raw: &str) -> ComposedQuery {
    QueryComposer::default().compose(raw)
}

/// Returns true if `word` was consumed as a filter.
fn apply_filter(word: &str, filters: &mut QueryFilters) -> bool {
    let Some((key, value)) = word.split_once(':') else {
        return false;
    };
    if value.is_empty() {
        return false;
    }
    let value = value.to_lowercase();
    match key.to_lowercase().as_str() {
        "path" => {
            let prefix = value.trim_start_matches('/');
            if prefix.is_empty() {
                return false;
            }
            filters.path_prefix = Some(prefix.to_string());
            true
        }
        "tag" => {
            let tag = value.trim_start_matches('#');
            if tag.is_empty() {
                return false;
            }
            filters.tags.push(tag.to_string());
            true
        }
        "ext" => {
            filters.extension = Some(value.trim_start_matches('.').to_string());
            true
        }
        _ => false,
    }
}

/// Split on anything that is not alphanumeric and lowercase. Keeps duplicates.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Decompose and drop combining marks.
pub fn fold_accents(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lowercase and accent-folded form used for every comparison.
pub fn normalize_text(text: &str) -> String {
    fold_accents(&text.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_has_no_tokens() {
        let q = compose_query("");
        assert!(q.is_empty());
        assert!(q.tokens.is_empty());
        assert!(q.filters.is_empty());

        let q = compose_query("   \t\n ");
        assert!(q.is_empty());
    }

    #[test]
    fn test_tokenize_lowercases_and_splits_punctuation() {
        assert_eq!(
            tokenize("Rust-lang, Borrow_Checker!"),
            vec!["rust", "lang", "borrow", "checker"]
        );
    }

    #[test]
    fn test_accent_expansion_keeps_original() {
        let q = compose_query("Ação");
        assert_eq!(q.tokens, vec!["ação", "acao"]);
        assert_eq!(q.terms[0].original, "ação");
        assert_eq!(q.terms[0].variants, vec!["acao"]);
    }

    #[test]
    fn test_plural_expansion() {
        let q = compose_query("meeting notes queries boxes");
        assert!(q.tokens.contains(&"notes".to_string()));
        assert!(q.tokens.contains(&"note".to_string()));
        assert!(q.tokens.contains(&"query".to_string()));
        assert!(q.tokens.contains(&"box".to_string()));
        assert_eq!(q.terms[0].variants, Vec::<String>::new());
    }

    #[test]
    fn test_plural_folding_skips_short_and_latin_endings() {
        assert!(PluralFolding.expand("bus").is_empty());
        assert!(PluralFolding.expand("class").is_empty());
        assert!(PluralFolding.expand("status").is_empty());
        assert!(PluralFolding.expand("analysis").is_empty());
    }

    #[test]
    fn test_filters_are_not_tokens() {
        let q = compose_query("path:/Projects/ tag:#Work ext:.md roadmap");
        assert_eq!(q.tokens, vec!["roadmap"]);
        assert_eq!(q.filters.path_prefix.as_deref(), Some("projects/"));
        assert_eq!(q.filters.tags, vec!["work"]);
        assert_eq!(q.filters.extension.as_deref(), Some("md"));
    }

    #[test]
    fn test_unknown_key_value_is_text() {
        let q = compose_query("http:example");
        assert_eq!(q.tokens, vec!["http", "example"]);
        assert!(q.filters.is_empty());
    }

    #[test]
    fn test_duplicate_terms_collapse() {
        let q = compose_query("rust Rust RUST");
        assert_eq!(q.tokens, vec!["rust"]);
        assert_eq!(q.terms.len(), 1);
    }

    #[test]
    fn test_synonyms_are_additive() {
        let mut table = HashMap::new();
        table.insert("k8s".to_string(), vec!["kubernetes".to_string()]);
        let composer = QueryComposer::new(FieldBoosts::default()).with_expander(Synonyms::new(&table));
        let q = composer.compose("k8s deploy");
        assert_eq!(q.tokens, vec!["k8s", "kubernetes", "deploy"]);
    }

    #[test]
    fn test_default_field_boosts_rank_filename_highest() {
        let q = compose_query("anything");
        assert!(q.field_boosts.filename > q.field_boosts.path);
        assert!(q.field_boosts.path > q.field_boosts.content);
    }

    #[test]
    fn test_filter_path_checks() {
        let q = compose_query("path:projects/alpha x");
        let f = &q.filters;
        assert!(f.may_contain(""));
        assert!(f.may_contain("projects"));
        assert!(f.may_contain("projects/alpha"));
        assert!(!f.may_contain("archive"));
        assert!(f.allows_file("projects/alpha/plan.md"));
        assert!(!f.allows_file("archive/plan.md"));
    }

    #[test]
    fn test_tag_filter_requires_all_tags() {
        let q = compose_query("tag:a tag:b x");
        let both = vec!["a".to_string(), "b".to_string()];
        let one = vec!["a".to_string()];
        assert!(q.filters.allows_tags(&both));
        assert!(!q.filters.allows_tags(&one));
    }
}
