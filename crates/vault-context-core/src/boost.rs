//! Metadata-based score adjustments.
//!
//! Three independent sources each yield a multiplier, and the candidate's
//! score is multiplied by their product:
//!
//! | Source | Rule |
//! |--------|------|
//! | Path | the longest configured pattern (prefix or glob) matching the path |
//! | Tags | `max` of matching tag multipliers, or `sum` of their excess over 1.0 |
//! | Freshness | `floor + (1 - floor) × 0.5^(age_days / half_life_days)` |
//!
//! Every source contributes exactly `1.0` when nothing is configured for
//! the candidate, so boosting an unconfigured candidate is the identity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Candidate;

/// How multipliers of several matching tags combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    #[default]
    Max,
    Sum,
}

/// Recency decay. Never boosts above 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub half_life_days: f64,
    /// Lower bound for very old notes, in `[0, 1]`.
    pub floor: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    /// Path prefix or glob → multiplier.
    pub paths: BTreeMap<String, f64>,
    /// Tag (without `#`) → multiplier.
    pub tags: BTreeMap<String, f64>,
    pub tag_mode: TagMode,
    pub freshness: Option<Freshness>,
}

impl BoostConfig {
    pub fn validate(&self) -> Result<()> {
        for (pattern, m) in self.paths.iter().chain(self.tags.iter()) {
            if !m.is_finite() || *m <= 0.0 {
                return Err(Error::invalid_argument(format!(
                    "boost multiplier for '{}' must be a positive number, got {}",
                    pattern, m
                )));
            }
        }
        if let Some(f) = &self.freshness {
            if !f.half_life_days.is_finite() || f.half_life_days <= 0.0 {
                return Err(Error::invalid_argument(format!(
                    "boost.freshness_half_life_days must be > 0, got {}",
                    f.half_life_days
                )));
            }
            if !(0.0..=1.0).contains(&f.floor) {
                return Err(Error::invalid_argument(format!(
                    "boost.freshness_floor must be in [0.0, 1.0], got {}",
                    f.floor
                )));
            }
        }
        Ok(())
    }
}

enum PathRule {
    Prefix(String),
    Glob(GlobMatcher),
}

struct PathBoost {
    rule: PathRule,
    specificity: usize,
    multiplier: f64,
}

impl PathBoost {
    fn matches(&self, path: &str) -> bool {
        match &self.rule {
            PathRule::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathRule::Glob(glob) => glob.is_match(path),
        }
    }
}

/// A validated, compiled [`BoostConfig`].
pub struct Booster {
    paths: Vec<PathBoost>,
    tags: BTreeMap<String, f64>,
    tag_mode: TagMode,
    freshness: Option<Freshness>,
}

impl Booster {
    pub fn new(config: &BoostConfig) -> Result<Self> {
        config.validate()?;

        let mut paths = Vec::with_capacity(config.paths.len());
        for (pattern, multiplier) in &config.paths {
            let normalized = pattern.trim_start_matches('/').to_lowercase();
            let rule = if normalized.contains(['*', '?', '[', '{']) {
                let glob = Glob::new(&normalized).map_err(|e| {
                    Error::invalid_argument(format!("invalid boost glob '{}': {}", pattern, e))
                })?;
                PathRule::Glob(glob.compile_matcher())
            } else {
                PathRule::Prefix(normalized.clone())
            };
            paths.push(PathBoost {
                rule,
                specificity: normalized.len(),
                multiplier: *multiplier,
            });
        }

        let tags = config
            .tags
            .iter()
            .map(|(t, m)| (t.trim_start_matches('#').to_lowercase(), *m))
            .collect();

        Ok(Self {
            paths,
            tags,
            tag_mode: config.tag_mode,
            freshness: config.freshness,
        })
    }

    /// Multiply every candidate's score by its aggregate boost factor.
    pub fn boost(&self, candidates: Vec<Candidate>, now: DateTime<Utc>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .map(|c| {
                let factor = self.factor(&c, now);
                if factor == 1.0 {
                    c
                } else {
                    let score = c.match_score * factor;
                    c.with_score(score)
                }
            })
            .collect()
    }

    pub fn factor(&self, candidate: &Candidate, now: DateTime<Utc>) -> f64 {
        self.path_factor(&candidate.path)
            * self.tag_factor(candidate.metadata.tags.iter())
            * self.freshness_factor(candidate.metadata.modified_at, now)
    }

    fn path_factor(&self, path: &str) -> f64 {
        let path = path.to_lowercase();
        let mut best: Option<&PathBoost> = None;
        for rule in &self.paths {
            if rule.matches(&path) && best.map_or(true, |b| rule.specificity > b.specificity) {
                best = Some(rule);
            }
        }
        best.map_or(1.0, |b| b.multiplier)
    }

    fn tag_factor<'a>(&self, tags: impl Iterator<Item = &'a String>) -> f64 {
        let matched: Vec<f64> = tags
            .filter_map(|t| self.tags.get(&t.to_lowercase()).copied())
            .collect();
        if matched.is_empty() {
            return 1.0;
        }
        match self.tag_mode {
            TagMode::Max => matched.iter().copied().fold(f64::MIN, f64::max),
            TagMode::Sum => {
                let smallest = matched.iter().copied().fold(f64::MAX, f64::min);
                (1.0 + matched.iter().map(|m| m - 1.0).sum::<f64>()).max(smallest)
            }
        }
    }

    fn freshness_factor(&self, modified_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let (Some(freshness), Some(modified_at)) = (self.freshness, modified_at) else {
            return 1.0;
        };
        let age_days = (now - modified_at).num_seconds() as f64 / 86_400.0;
        if age_days <= 0.0 {
            return 1.0;
        }
        let decay = 0.5_f64.powf(age_days / freshness.half_life_days);
        freshness.floor + (1.0 - freshness.floor) * decay
    }
}

/// Compile `config` and boost `candidates` in one step.
pub fn boost_candidates(
    candidates: Vec<Candidate>,
    config: &BoostConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>> {
    Ok(Booster::new(config)?.boost(candidates, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateMetadata, MatchType};
    use chrono::Duration;

    fn candidate(path: &str, score: f64) -> Candidate {
        Candidate::new(path, MatchType::Content, score)
    }

    fn tagged(path: &str, score: f64, tags: &[&str]) -> Candidate {
        candidate(path, score).with_metadata(CandidateMetadata {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..CandidateMetadata::default()
        })
    }

    #[test]
    fn test_unconfigured_candidate_is_unchanged() {
        let config = BoostConfig {
            paths: BTreeMap::from([("projects/".to_string(), 2.0)]),
            tags: BTreeMap::from([("urgent".to_string(), 3.0)]),
            ..BoostConfig::default()
        };
        let out = boost_candidates(vec![tagged("notes/a.md", 1.25, &["misc"])], &config, Utc::now()).unwrap();
        assert_eq!(out[0].match_score, 1.25);
    }

    #[test]
    fn test_default_config_is_identity() {
        let booster = Booster::new(&BoostConfig::default()).unwrap();
        let c = tagged("x/y.md", 0.5, &["a"]);
        assert_eq!(booster.factor(&c, Utc::now()), 1.0);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = BoostConfig {
            paths: BTreeMap::from([
                ("projects/".to_string(), 2.0),
                ("projects/archive/".to_string(), 0.5),
            ]),
            ..BoostConfig::default()
        };
        let booster = Booster::new(&config).unwrap();
        let now = Utc::now();
        assert_eq!(booster.factor(&candidate("projects/live.md", 1.0), now), 2.0);
        assert_eq!(booster.factor(&candidate("Projects/Archive/old.md", 1.0), now), 0.5);
    }

    #[test]
    fn test_glob_patterns() {
        let config = BoostConfig {
            paths: BTreeMap::from([("**/daily/*.md".to_string(), 0.8)]),
            ..BoostConfig::default()
        };
        let booster = Booster::new(&config).unwrap();
        let now = Utc::now();
        assert_eq!(booster.factor(&candidate("journal/daily/2024-01-01.md", 1.0), now), 0.8);
        assert_eq!(booster.factor(&candidate("journal/weekly/w1.md", 1.0), now), 1.0);
    }

    #[test]
    fn test_tag_modes() {
        let tags = BTreeMap::from([("a".to_string(), 1.5), ("b".to_string(), 1.2)]);
        let max = Booster::new(&BoostConfig {
            tags: tags.clone(),
            ..BoostConfig::default()
        })
        .unwrap();
        let sum = Booster::new(&BoostConfig {
            tags,
            tag_mode: TagMode::Sum,
            ..BoostConfig::default()
        })
        .unwrap();
        let c = tagged("n.md", 1.0, &["a", "b"]);
        let now = Utc::now();
        assert!((max.factor(&c, now) - 1.5).abs() < 1e-9);
        assert!((sum.factor(&c, now) - 1.7).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_decays_and_never_exceeds_one() {
        let config = BoostConfig {
            freshness: Some(Freshness {
                half_life_days: 30.0,
                floor: 0.5,
            }),
            ..BoostConfig::default()
        };
        let booster = Booster::new(&config).unwrap();
        let now = Utc::now();
        let meta = |age: i64| CandidateMetadata {
            modified_at: Some(now - Duration::days(age)),
            ..CandidateMetadata::default()
        };
        let fresh = booster.factor(&candidate("a.md", 1.0).with_metadata(meta(0)), now);
        let month = booster.factor(&candidate("a.md", 1.0).with_metadata(meta(30)), now);
        let ancient = booster.factor(&candidate("a.md", 1.0).with_metadata(meta(3650)), now);
        assert_eq!(fresh, 1.0);
        assert!((month - 0.75).abs() < 1e-6);
        assert!(ancient >= 0.5 && ancient < month);
        assert_eq!(booster.factor(&candidate("a.md", 1.0), now), 1.0);
    }

    #[test]
    fn test_invalid_multiplier_rejected() {
        let config = BoostConfig {
            paths: BTreeMap::from([("x/".to_string(), -1.0)]),
            ..BoostConfig::default()
        };
        assert!(matches!(Booster::new(&config), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_cardinality_preserved() {
        let config = BoostConfig::default();
        let input = vec![candidate("a.md", 1.0), candidate("b.md", 2.0)];
        let out = boost_candidates(input, &config, Utc::now()).unwrap();
        assert_eq!(out.len(), 2);
    }
}
