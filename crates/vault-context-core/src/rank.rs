//! Lexical ranking over a single candidate batch.
//!
//! The supplied candidates are the whole corpus: document frequency and
//! average document length are recomputed on every call, there is no
//! persistent index. Each candidate's text is its filename, path, and
//! whatever content has been fetched.
//!
//! # Scoring
//!
//! For every distinct normalized query token `t` present in document `d`:
//!
//! ```text
//! idf(t)   = ln(1 + (N - df(t) + 0.5) / (df(t) + 0.5))
//! bm25(d)  = Σ idf(t) × tf(t,d) × (k1 + 1) / (tf(t,d) + k1 × (1 - b + b × |d| / avgdl))
//! score(d) = match_score(d) + weight × bm25(d)
//! ```
//!
//! The incoming `match_score` is kept so filename hits stay ahead of
//! content-only hits of similar lexical strength. Candidates with no
//! overlap keep their score unchanged.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Candidate;
use crate::query::{normalize_text, tokenize, ComposedQuery};

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization strength in `[0, 1]`.
    pub b: f64,
    /// Multiplier applied to the BM25 score before adding it to `match_score`.
    pub weight: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            weight: 1.0,
        }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(Error::invalid_argument(format!("ranking.k1 must be >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::invalid_argument(format!("ranking.b must be in [0.0, 1.0], got {}", self.b)));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(Error::invalid_argument(format!(
                "ranking.bm25_weight must be >= 0, got {}",
                self.weight
            )));
        }
        Ok(())
    }
}

/// Reorders a candidate batch by relevance.
///
/// Implementations must return the same candidates, sorted by score
/// descending with ties kept in input order.
pub trait Ranker: Send + Sync {
    fn rank(&self, candidates: Vec<Candidate>, query: &ComposedQuery) -> Vec<Candidate>;
}

/// Per-batch BM25, added to the aggregation score.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bm25Ranker {
    pub params: Bm25Params,
}

impl Bm25Ranker {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }
}

impl Ranker for Bm25Ranker {
    fn rank(&self, candidates: Vec<Candidate>, query: &ComposedQuery) -> Vec<Candidate> {
        rank_candidates(candidates, query, &self.params)
    }
}

/// Orders by the incoming score only.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchScoreRanker;

impl Ranker for MatchScoreRanker {
    fn rank(&self, mut candidates: Vec<Candidate>, _query: &ComposedQuery) -> Vec<Candidate> {
        sort_by_score(&mut candidates);
        candidates
    }
}

/// Score `candidates` against `query` and sort them, stable on ties.
pub fn rank_candidates(
    candidates: Vec<Candidate>,
    query: &ComposedQuery,
    params: &Bm25Params,
) -> Vec<Candidate> {
    let query_tokens = normalized_query_tokens(query);
    let docs: Vec<Vec<String>> = candidates
        .iter()
        .map(|c| tokenize(&normalize_text(&c.searchable_text())))
        .collect();
    let scores = bm25_scores(&docs, &query_tokens, params);

    let mut ranked: Vec<Candidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|(c, bm25)| {
            if bm25 > 0.0 {
                let score = c.match_score + params.weight * bm25;
                c.with_score(score)
            } else {
                c
            }
        })
        .collect();

    sort_by_score(&mut ranked);
    ranked
}

/// Descending by score. `sort_by` is stable, so equal scores keep input order.
pub fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
}

fn normalized_query_tokens(query: &ComposedQuery) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .tokens
        .iter()
        .map(|t| normalize_text(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Raw BM25 score of each tokenized document against the query tokens.
///
/// Statistics are computed over `docs` alone.
pub fn bm25_scores(docs: &[Vec<String>], query_tokens: &[String], params: &Bm25Params) -> Vec<f64> {
    if docs.is_empty() || query_tokens.is_empty() {
        return vec![0.0; docs.len()];
    }

    let term_freqs: Vec<HashMap<&str, u32>> = docs
        .iter()
        .map(|tokens| {
            let mut tf = HashMap::new();
            for t in tokens {
                *tf.entry(t.as_str()).or_insert(0) += 1;
            }
            tf
        })
        .collect();

    let mut doc_freqs: HashMap<&str, usize> = HashMap::new();
    for token in query_tokens {
        let df = term_freqs.iter().filter(|tf| tf.contains_key(token.as_str())).count();
        doc_freqs.insert(token.as_str(), df);
    }

    let n = docs.len() as f64;
    let total_len: usize = docs.iter().map(Vec::len).sum();
    let avg_len = (total_len as f64 / n).max(1.0);

    docs.iter()
        .zip(&term_freqs)
        .map(|(tokens, tf)| {
            let doc_len = tokens.len() as f64;
            let length_norm = 1.0 - params.b + params.b * doc_len / avg_len;
            query_tokens
                .iter()
                .filter_map(|token| {
                    let freq = f64::from(*tf.get(token.as_str())?);
                    let df = doc_freqs.get(token.as_str()).copied().unwrap_or(0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5)).ln_1p().max(0.0);
                    let denom = freq + params.k1 * length_norm;
                    (denom > 0.0).then(|| idf * freq * (params.k1 + 1.0) / denom)
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchType;
    use crate::query::compose_query;

    fn content(path: &str, score: f64, body: &str) -> Candidate {
        Candidate::new(path, MatchType::Content, score).with_content(body)
    }

    #[test]
    fn test_same_cardinality_and_sorted() {
        let q = compose_query("tokio runtime");
        let input = vec![
            content("a.md", 1.0, "nothing relevant here"),
            content("b.md", 1.0, "the tokio runtime schedules tasks on the tokio runtime"),
            content("c.md", 1.0, "tokio is mentioned once"),
        ];
        let ranked = rank_candidates(input, &q, &Bm25Params::default());
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].path, "b.md");
        assert_eq!(ranked[1].path, "c.md");
        assert_eq!(ranked[2].path, "a.md");
        for pair in ranked.windows(2) {
            assert!(pair[0].match_score >= pair[1].match_score);
        }
    }

    #[test]
    fn test_zero_overlap_keeps_prior_score() {
        let q = compose_query("zebra");
        let input = vec![content("a.md", 0.7, "no match at all")];
        let ranked = rank_candidates(input, &q, &Bm25Params::default());
        assert_eq!(ranked[0].match_score, 0.7);
    }

    #[test]
    fn test_stable_on_ties() {
        let q = compose_query("zebra");
        let input = vec![
            content("first.md", 1.0, "alpha"),
            content("second.md", 1.0, "beta"),
            content("third.md", 1.0, "gamma"),
        ];
        let ranked = rank_candidates(input, &q, &Bm25Params::default());
        let order: Vec<&str> = ranked.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(order, vec!["first.md", "second.md", "third.md"]);
    }

    #[test]
    fn test_match_score_provenance_is_kept() {
        let q = compose_query("deploy");
        let filename_hit = Candidate::new("deploy.md", MatchType::Filename, 3.0).with_content("steps");
        let content_hit = content("notes.md", 1.0, "deploy deploy deploy");
        let ranked = rank_candidates(vec![content_hit, filename_hit], &q, &Bm25Params::default());
        assert!(ranked.iter().all(|c| c.match_score.is_finite() && c.match_score >= 0.0));
        let deploy = ranked.iter().find(|c| c.path == "deploy.md").unwrap();
        assert!(deploy.match_score > 3.0);
    }

    #[test]
    fn test_accent_insensitive_scoring() {
        let q = compose_query("ação");
        let input = vec![content("x.md", 0.0, "plano de acao"), content("y.md", 0.0, "outro texto")];
        let ranked = rank_candidates(input, &q, &Bm25Params::default());
        assert_eq!(ranked[0].path, "x.md");
        assert!(ranked[0].match_score > 0.0);
        assert_eq!(ranked[1].match_score, 0.0);
    }

    #[test]
    fn test_bm25_empty_inputs() {
        assert!(bm25_scores(&[], &["a".to_string()], &Bm25Params::default()).is_empty());
        let docs = vec![vec!["a".to_string()]];
        assert_eq!(bm25_scores(&docs, &[], &Bm25Params::default()), vec![0.0]);
    }

    #[test]
    fn test_length_normalization_prefers_shorter_docs() {
        let docs = vec![
            vec!["rust".to_string(), "x".to_string()],
            vec!["rust".to_string(), "x".to_string(), "y".to_string(), "z".to_string(), "w".to_string()],
            vec!["other".to_string()],
        ];
        let scores = bm25_scores(&docs, &["rust".to_string()], &Bm25Params::default());
        assert!(scores[0] > scores[1]);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_match_score_ranker_sorts_only() {
        let q = compose_query("anything");
        let input = vec![content("a.md", 1.0, "x"), content("b.md", 2.0, "y")];
        let ranked = MatchScoreRanker.rank(input, &q);
        assert_eq!(ranked[0].path, "b.md");
        assert_eq!(ranked[0].match_score, 2.0);
    }

    #[test]
    fn test_params_validation() {
        assert!(Bm25Params::default().validate().is_ok());
        let bad = Bm25Params { b: 1.5, ..Bm25Params::default() };
        assert!(matches!(bad.validate(), Err(Error::InvalidArgument { .. })));
        let bad = Bm25Params { k1: f64::NAN, ..Bm25Params::default() };
        assert!(bad.validate().is_err());
    }
}
