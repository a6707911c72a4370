//! The options bundle passed to a search.
//!
//! [`SearchOptions`] gathers every tunable of every stage. The application
//! builds it from its TOML config; library callers can build it in code and
//! rely on [`SearchOptions::validate`] for the same fail-fast checks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boost::BoostConfig;
use crate::context::ContextConfig;
use crate::dedup::DedupConfig;
use crate::error::{Error, Result};
use crate::matcher::{FuzzyMatch, MatchStrategy, SubstringMatch};
use crate::query::{AccentFolding, FieldBoosts, PluralFolding, QueryComposer, Synonyms};
use crate::rank::{Bm25Params, Bm25Ranker, MatchScoreRanker, Ranker};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    #[default]
    Substring,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankerKind {
    #[default]
    Bm25,
    /// Aggregation score only.
    Match,
}

/// Candidate aggregation tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationOptions {
    /// Maximum number of candidates returned. Must be > 0.
    pub limit: usize,
    /// Maximum in-flight remote fetches.
    pub concurrency: usize,
    /// Maximum directory depth below the root.
    pub max_depth: usize,
    /// Fetch content of files whose name and path do not match.
    pub content_search: bool,
    pub matcher: MatcherKind,
    pub fuzzy_threshold: f64,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Stop issuing fetches after this many milliseconds.
    pub deadline_ms: Option<u64>,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            limit: 200,
            concurrency: 8,
            max_depth: 16,
            content_search: true,
            matcher: MatcherKind::Substring,
            fuzzy_threshold: 0.85,
            include_globs: vec![
                "**/*.md".to_string(),
                "**/*.markdown".to_string(),
                "**/*.txt".to_string(),
            ],
            exclude_globs: Vec::new(),
            deadline_ms: None,
        }
    }
}

impl AggregationOptions {
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::invalid_argument("aggregation.limit must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(Error::invalid_argument("aggregation.concurrency must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(Error::invalid_argument(format!(
                "aggregation.fuzzy_threshold must be in [0.0, 1.0], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.deadline_ms == Some(0) {
            return Err(Error::invalid_argument("aggregation.deadline_ms must be > 0 when set"));
        }
        Ok(())
    }

    pub fn matcher(&self) -> Arc<dyn MatchStrategy> {
        match self.matcher {
            MatcherKind::Substring => Arc::new(SubstringMatch),
            MatcherKind::Fuzzy => Arc::new(FuzzyMatch {
                threshold: self.fuzzy_threshold,
            }),
        }
    }
}

/// Query composition tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub fold_accents: bool,
    pub fold_plurals: bool,
    pub synonyms: HashMap<String, Vec<String>>,
    pub field_boosts: FieldBoosts,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            fold_accents: true,
            fold_plurals: true,
            synonyms: HashMap::new(),
            field_boosts: FieldBoosts::default(),
        }
    }
}

impl QueryOptions {
    pub fn validate(&self) -> Result<()> {
        let b = &self.field_boosts;
        for (field, weight) in [("filename", b.filename), ("path", b.path), ("content", b.content)] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(Error::invalid_argument(format!(
                    "query.field_boosts.{} must be > 0, got {}",
                    field, weight
                )));
            }
        }
        Ok(())
    }

    pub fn composer(&self) -> QueryComposer {
        let mut composer = QueryComposer::new(self.field_boosts);
        if self.fold_accents {
            composer = composer.with_expander(AccentFolding);
        }
        if self.fold_plurals {
            composer = composer.with_expander(PluralFolding);
        }
        if !self.synonyms.is_empty() {
            composer = composer.with_expander(Synonyms::new(&self.synonyms));
        }
        composer
    }
}

/// Every stage's configuration for one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub aggregation: AggregationOptions,
    pub query: QueryOptions,
    pub ranker: RankerKind,
    pub bm25: Bm25Params,
    pub boost: BoostConfig,
    pub dedup_enabled: bool,
    pub dedup: DedupConfig,
    pub context: ContextConfig,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            aggregation: AggregationOptions::default(),
            query: QueryOptions::default(),
            ranker: RankerKind::Bm25,
            bm25: Bm25Params::default(),
            boost: BoostConfig::default(),
            dedup_enabled: true,
            dedup: DedupConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.aggregation.validate()?;
        self.query.validate()?;
        self.bm25.validate()?;
        self.boost.validate()?;
        self.dedup.validate()?;
        self.context.validate()?;
        Ok(())
    }

    pub fn ranker(&self) -> Box<dyn Ranker> {
        match self.ranker {
            RankerKind::Bm25 => Box::new(Bm25Ranker::new(self.bm25)),
            RankerKind::Match => Box::new(MatchScoreRanker),
        }
    }
}
