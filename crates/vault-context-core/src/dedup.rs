//! Near-duplicate collapsing.
//!
//! Candidates whose content similarity meets `threshold` are grouped by
//! transitive closure (union-find), so the result does not depend on which
//! pair happens to be compared first. Each group is replaced by one
//! canonical candidate chosen by [`CanonicalStrategy`]; the canonical takes
//! the highest score seen in its group and lists the absorbed paths in
//! [`Candidate::duplicates`].
//!
//! Similarity is the Jaccard index over word shingles of normalized
//! content. Texts shorter than one shingle fall back to word-set Jaccard,
//! and byte-identical content short-circuits to `1.0`. Candidates without
//! content are never grouped.
//!
//! A threshold of `1.0` or more disables merging entirely.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::chunk::content_hash;
use crate::error::{Error, Result};
use crate::models::Candidate;
use crate::query::{normalize_text, tokenize};

/// Which group member survives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalStrategy {
    /// Latest `modified_at`.
    #[default]
    Freshest,
    /// Shortest content.
    Shortest,
    /// Longest content.
    Longest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub threshold: f64,
    pub strategy: CanonicalStrategy,
    /// Words per shingle.
    pub shingle_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            strategy: CanonicalStrategy::Freshest,
            shingle_size: 3,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(Error::invalid_argument(format!(
                "dedup.threshold must be > 0, got {}",
                self.threshold
            )));
        }
        if self.shingle_size == 0 {
            return Err(Error::invalid_argument("dedup.shingle_size must be > 0"));
        }
        Ok(())
    }
}

/// Comparable summary of a candidate's content.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    hash: String,
    shingles: HashSet<String>,
}

impl Fingerprint {
    pub fn new(content: &str, shingle_size: usize) -> Option<Self> {
        let words = tokenize(&normalize_text(content));
        if words.is_empty() {
            return None;
        }
        let shingles = if words.len() < shingle_size.max(1) {
            words.into_iter().collect()
        } else {
            words.windows(shingle_size).map(|w| w.join(" ")).collect()
        };
        Some(Self {
            hash: content_hash(content),
            shingles,
        })
    }
}

/// Jaccard similarity in `[0, 1]`.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    if a.hash == b.hash {
        return 1.0;
    }
    let intersection = a.shingles.intersection(&b.shingles).count();
    let union = a.shingles.len() + b.shingles.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Collapse near-duplicates into canonical representatives.
///
/// Output cardinality is at most the input's. Groups appear at the position
/// of their earliest member, so an already-ranked order is preserved.
pub fn deduplicate_candidates(candidates: Vec<Candidate>, config: &DedupConfig) -> Result<Vec<Candidate>> {
    config.validate()?;
    if config.threshold >= 1.0 || candidates.len() < 2 {
        return Ok(candidates);
    }

    let fingerprints: Vec<Option<Fingerprint>> = candidates
        .iter()
        .map(|c| c.content.as_deref().and_then(|t| Fingerprint::new(t, config.shingle_size)))
        .collect();

    let mut sets = DisjointSets::new(candidates.len());
    for i in 0..candidates.len() {
        let Some(a) = &fingerprints[i] else { continue };
        for j in (i + 1)..candidates.len() {
            let Some(b) = &fingerprints[j] else { continue };
            if similarity(a, b) >= config.threshold {
                sets.union(i, j);
            }
        }
    }

    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for i in 0..candidates.len() {
        let root = sets.find(i);
        let g = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(i);
    }

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(groups.len());

    for members in groups {
        if members.len() == 1 {
            if let Some(c) = slots[members[0]].take() {
                out.push(c);
            }
            continue;
        }

        let winner = pick_canonical(&members, &slots, config.strategy);
        let max_score = members
            .iter()
            .filter_map(|&i| slots[i].as_ref())
            .map(|c| c.match_score)
            .fold(0.0, f64::max);

        let mut absorbed = Vec::new();
        for &i in &members {
            if i == winner {
                continue;
            }
            if let Some(c) = slots[i].take() {
                absorbed.push(c.path);
                absorbed.extend(c.duplicates);
            }
        }

        if let Some(mut canonical) = slots[winner].take() {
            canonical.duplicates.extend(absorbed);
            out.push(canonical.with_score(max_score));
        }
    }

    Ok(out)
}

fn pick_canonical(members: &[usize], slots: &[Option<Candidate>], strategy: CanonicalStrategy) -> usize {
    let mut best = members[0];
    for &i in &members[1..] {
        let (Some(current), Some(challenger)) = (&slots[best], &slots[i]) else {
            continue;
        };
        // Members are visited in input order, so only a strictly better challenger wins.
        if prefer(challenger, current, strategy) == Ordering::Greater {
            best = i;
        }
    }
    best
}

fn prefer(a: &Candidate, b: &Candidate, strategy: CanonicalStrategy) -> Ordering {
    let primary = match strategy {
        CanonicalStrategy::Freshest => a.metadata.modified_at.cmp(&b.metadata.modified_at),
        CanonicalStrategy::Shortest => b.content_len().cmp(&a.content_len()),
        CanonicalStrategy::Longest => a.content_len().cmp(&b.content_len()),
    };
    primary.then_with(|| a.match_score.total_cmp(&b.match_score))
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// The smaller index becomes the root.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
