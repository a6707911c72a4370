//! Candidate aggregation: concurrent traversal of a remote vault.
//!
//! Starting at the root, directories are listed and files matched against
//! the composed query by filename, then path, then (optionally) content.
//! At most `concurrency` remote calls are in flight at any time. A failing
//! subtree or file is logged and counted as a partial failure; only a
//! failing root listing aborts the search with
//! [`Error::RemoteUnavailable`].
//!
//! Cancellation (caller token or `deadline_ms`) stops new fetches, aborts the
//! in-flight ones and returns whatever was gathered so far.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vault_context_core::matcher::MatchStrategy;
use vault_context_core::models::{file_name, Candidate, MatchType, Note};
use vault_context_core::options::AggregationOptions;
use vault_context_core::query::{normalize_text, ComposedQuery};
use vault_context_core::rank::sort_by_score;
use vault_context_core::store::{join_path, DirEntry, RemoteStore, StoreError};
use vault_context_core::{Error, Result};

/// Always skipped, in addition to `exclude_globs`.
const BUILTIN_EXCLUDES: &[&str] = &[".obsidian/**", ".trash/**", ".git/**"];

/// Counters describing one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationStats {
    pub directories_listed: usize,
    pub files_seen: usize,
    pub content_fetches: usize,
    pub partial_failures: usize,
    /// Paths whose listing or fetch failed.
    pub failed_paths: Vec<String>,
    /// Stopped early by `limit` or skipped directories below `max_depth`.
    pub truncated: bool,
    /// Stopped by the cancellation token or the deadline.
    pub cancelled: bool,
}

impl AggregationStats {
    fn record_failure(&mut self, err: Error) {
        warn!("{}", err);
        if let Error::PartialFailure { path, .. } = err {
            self.failed_paths.push(path);
        }
        self.partial_failures += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Sorted by descending match score, then path.
    pub candidates: Vec<Candidate>,
    pub stats: AggregationStats,
}

enum Job {
    List { dir: String, depth: usize },
    Fetch { path: String },
}

enum Outcome {
    Listed {
        dir: String,
        depth: usize,
        result: std::result::Result<Vec<DirEntry>, StoreError>,
    },
    Fetched {
        path: String,
        result: std::result::Result<Note, StoreError>,
    },
}

/// Include/exclude glob filter over vault-relative paths.
struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    fn new(options: &AggregationOptions) -> Result<Self> {
        let include = if options.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(options.include_globs.iter().map(String::as_str))?)
        };
        let exclude = build_globset(
            BUILTIN_EXCLUDES
                .iter()
                .copied()
                .chain(options.exclude_globs.iter().map(String::as_str)),
        )?;
        Ok(Self { include, exclude })
    }

    fn allows_file(&self, path: &str) -> bool {
        if self.exclude.is_match(path) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(path))
    }

    fn allows_dir(&self, dir: &str) -> bool {
        !(self.exclude.is_match(dir) || self.exclude.is_match(format!("{}/", dir)))
    }
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .map_err(|e| Error::invalid_argument(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::invalid_argument(format!("invalid glob set: {}", e)))
}

/// Fraction of query terms, by any of their forms, found in `text`.
fn coverage(query: &ComposedQuery, text: &str, matcher: &dyn MatchStrategy) -> f64 {
    if query.terms.is_empty() {
        return 0.0;
    }
    let matched = query
        .terms
        .iter()
        .filter(|term| term.forms().any(|form| matcher.matches(form, text)))
        .count();
    matched as f64 / query.terms.len().max(1) as f64
}

/// Match a file by its filename, then by its full path.
///
/// Returns the highest-priority matching field and its base score
/// (`field boost × term coverage`).
pub fn score_path(query: &ComposedQuery, path: &str, matcher: &dyn MatchStrategy) -> Option<(MatchType, f64)> {
    let name = normalize_text(file_name(path));
    let full = normalize_text(path);
    for (match_type, text) in [(MatchType::Filename, &name), (MatchType::Path, &full)] {
        let covered = coverage(query, text, matcher);
        if covered > 0.0 {
            return Some((match_type, query.field_boosts.weight(match_type) * covered));
        }
    }
    None
}

/// Match note content. Returns the content base score if any term matches.
pub fn score_content(query: &ComposedQuery, content: &str, matcher: &dyn MatchStrategy) -> Option<f64> {
    let covered = coverage(query, &normalize_text(content), matcher);
    (covered > 0.0).then(|| query.field_boosts.weight(MatchType::Content) * covered)
}

/// Insert or merge by path: the higher-priority match type and the higher score win.
fn merge_candidate(found: &mut HashMap<String, Candidate>, candidate: Candidate) {
    match found.get_mut(&candidate.path) {
        Some(existing) => {
            // Lower priority value is the stronger match type.
            if candidate.match_type.priority() < existing.match_type.priority() {
                existing.match_type = candidate.match_type;
            }
            if candidate.match_score > existing.match_score {
                existing.match_score = candidate.match_score;
            }
            if existing.content.is_none() && candidate.content.is_some() {
                existing.content = candidate.content;
                existing.metadata = candidate.metadata;
            }
        }
        None => {
            found.insert(candidate.path.clone(), candidate);
        }
    }
}

/// Resolves when the caller cancels or the deadline passes.
async fn stopped(cancel: &CancellationToken, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        None => cancel.cancelled().await,
    }
}

/// Traverse the vault and return hydrated candidates for `query`.
///
/// An empty query yields no candidates without touching the store.
pub async fn aggregate_candidates(
    store: Arc<dyn RemoteStore>,
    query: &ComposedQuery,
    options: &AggregationOptions,
    cancel: CancellationToken,
) -> Result<Aggregation> {
    options.validate()?;
    let filter = PathFilter::new(options)?;
    let matcher = options.matcher();
    let deadline = options
        .deadline_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));

    let mut stats = AggregationStats::default();
    if query.is_empty() {
        return Ok(Aggregation {
            candidates: Vec::new(),
            stats,
        });
    }

    let root = tokio::select! {
        biased;
        _ = stopped(&cancel, deadline) => None,
        listed = store.list_directory("") => Some(listed),
    };
    let root = match root {
        Some(Ok(entries)) => entries,
        Some(Err(e)) => {
            return Err(Error::RemoteUnavailable {
                message: format!("failed to list vault root: {}", e),
            })
        }
        None => {
            stats.cancelled = true;
            return Ok(Aggregation {
                candidates: Vec::new(),
                stats,
            });
        }
    };
    stats.directories_listed += 1;

    let mut found: HashMap<String, Candidate> = HashMap::new();
    let mut queue: VecDeque<Job> = VecDeque::new();
    let ctx = Traversal {
        query,
        options,
        filter: &filter,
        matcher: matcher.as_ref(),
    };
    ctx.process_listing("", 0, root, &mut queue, &mut found, &mut stats);

    // Path matches carry no tags until hydrated, so a tag-filtered run cannot
    // stop at `limit` during traversal.
    let tag_filtered = !query.filters.tags.is_empty();

    let mut tasks: JoinSet<Outcome> = JoinSet::new();
    loop {
        if !tag_filtered && found.len() >= options.limit {
            if !queue.is_empty() || !tasks.is_empty() {
                stats.truncated = true;
            }
            tasks.abort_all();
            break;
        }

        while tasks.len() < options.concurrency {
            let Some(job) = queue.pop_front() else {
                break;
            };
            let store = Arc::clone(&store);
            match job {
                Job::List { dir, depth } => {
                    tasks.spawn(async move {
                        let result = store.list_directory(&dir).await;
                        Outcome::Listed { dir, depth, result }
                    });
                }
                Job::Fetch { path } => {
                    stats.content_fetches += 1;
                    tasks.spawn(async move {
                        let result = store.read_note(&path).await;
                        Outcome::Fetched { path, result }
                    });
                }
            }
        }

        if tasks.is_empty() {
            break;
        }

        let joined = tokio::select! {
            biased;
            _ = stopped(&cancel, deadline) => {
                tasks.abort_all();
                stats.cancelled = true;
                break;
            }
            joined = tasks.join_next() => joined,
        };

        match joined {
            Some(Ok(Outcome::Listed { dir, depth, result })) => match result {
                Ok(entries) => {
                    stats.directories_listed += 1;
                    ctx.process_listing(&dir, depth, entries, &mut queue, &mut found, &mut stats);
                }
                Err(e) => stats.record_failure(Error::PartialFailure {
                    path: dir,
                    message: format!("skipping subtree: {}", e),
                }),
            },
            Some(Ok(Outcome::Fetched { path, result })) => match result {
                Ok(note) => {
                    if let Some(score) = score_content(query, &note.content, matcher.as_ref()) {
                        merge_candidate(
                            &mut found,
                            Candidate::new(path, MatchType::Content, score)
                                .with_content(note.content)
                                .with_metadata(note.metadata),
                        );
                    }
                }
                Err(e) => stats.record_failure(Error::PartialFailure {
                    path,
                    message: format!("content fetch failed: {}", e),
                }),
            },
            Some(Err(e)) if e.is_cancelled() => {}
            Some(Err(e)) => {
                warn!("aggregation task failed: {}", e);
                stats.partial_failures += 1;
            }
            None => break,
        }
    }

    let mut candidates: Vec<Candidate> = found.into_values().collect();
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    sort_by_score(&mut candidates);
    let candidates = if tag_filtered {
        select_tagged(&store, candidates, query, options, &cancel, deadline, &mut stats).await
    } else {
        if candidates.len() > options.limit {
            candidates.truncate(options.limit);
            stats.truncated = true;
        }
        if !stats.cancelled {
            hydrate(&store, &mut candidates, options.concurrency, &cancel, deadline, &mut stats).await;
        }
        candidates
    };

    info!(
        candidates = candidates.len(),
        directories = stats.directories_listed,
        files = stats.files_seen,
        fetches = stats.content_fetches,
        failures = stats.partial_failures,
        truncated = stats.truncated,
        cancelled = stats.cancelled,
        "aggregation finished"
    );

    Ok(Aggregation { candidates, stats })
}

struct Traversal<'a> {
    query: &'a ComposedQuery,
    options: &'a AggregationOptions,
    filter: &'a PathFilter,
    matcher: &'a dyn MatchStrategy,
}

impl Traversal<'_> {
    fn process_listing(
        &self,
        dir: &str,
        depth: usize,
        entries: Vec<DirEntry>,
        queue: &mut VecDeque<Job>,
        found: &mut HashMap<String, Candidate>,
        stats: &mut AggregationStats,
    ) {
        for entry in entries {
            let path = join_path(dir, &entry.name);
            if entry.is_directory {
                if !self.filter.allows_dir(&path) || !self.query.filters.may_contain(&path) {
                    continue;
                }
                if depth + 1 > self.options.max_depth {
                    debug!(dir = %path, "max depth reached, not descending");
                    stats.truncated = true;
                    continue;
                }
                queue.push_back(Job::List {
                    dir: path,
                    depth: depth + 1,
                });
                continue;
            }

            stats.files_seen += 1;
            if !self.filter.allows_file(&path) || !self.query.filters.allows_file(&path) {
                continue;
            }
            match score_path(self.query, &path, self.matcher) {
                Some((match_type, score)) => merge_candidate(found, Candidate::new(path, match_type, score)),
                None if self.options.content_search => queue.push_back(Job::Fetch { path }),
                None => {}
            }
        }
    }
}

/// Hydrate score-ordered candidates one `limit`-sized window at a time and
/// keep those carrying every required tag, until `limit` are kept.
async fn select_tagged(
    store: &Arc<dyn RemoteStore>,
    candidates: Vec<Candidate>,
    query: &ComposedQuery,
    options: &AggregationOptions,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    stats: &mut AggregationStats,
) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::new();
    let mut remaining = candidates.into_iter();
    while kept.len() < options.limit && !stats.cancelled {
        let mut window: Vec<Candidate> = remaining.by_ref().take(options.limit).collect();
        if window.is_empty() {
            break;
        }
        hydrate(store, &mut window, options.concurrency, cancel, deadline, stats).await;
        kept.extend(
            window
                .into_iter()
                .filter(|c| query.filters.allows_tags(c.metadata.tags.iter())),
        );
    }
    if stats.cancelled {
        // Candidates fetched during traversal already carry their tags.
        kept.extend(remaining.by_ref().filter(|c| query.filters.allows_tags(c.metadata.tags.iter())));
    }
    if kept.len() > options.limit || (kept.len() == options.limit && remaining.len() > 0) {
        kept.truncate(options.limit);
        stats.truncated = true;
    }
    debug!(kept = kept.len(), "tag filter applied");
    kept
}

/// Fetch content and metadata for candidates that have none yet.
///
/// Failures leave the candidate in place without content.
async fn hydrate(
    store: &Arc<dyn RemoteStore>,
    candidates: &mut [Candidate],
    concurrency: usize,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    stats: &mut AggregationStats,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.content.is_some() {
            continue;
        }
        let semaphore = Arc::clone(&semaphore);
        let store = Arc::clone(store);
        let path = candidate.path.clone();
        stats.content_fetches += 1;
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = store.read_note(&path).await;
            (idx, path, result)
        });
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = stopped(cancel, deadline) => {
                tasks.abort_all();
                stats.cancelled = true;
                break;
            }
            joined = tasks.join_next() => joined,
        };
        match joined {
            Some(Ok((idx, _, Ok(note)))) => {
                if let Some(candidate) = candidates.get_mut(idx) {
                    candidate.content = Some(note.content);
                    candidate.metadata = note.metadata;
                }
            }
            Some(Ok((_, path, Err(e)))) => stats.record_failure(Error::PartialFailure {
                path,
                message: format!("hydration failed: {}", e),
            }),
            Some(Err(e)) if e.is_cancelled() => {}
            Some(Err(e)) => {
                warn!("hydration task failed: {}", e);
                stats.partial_failures += 1;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_context_core::matcher::SubstringMatch;
    use vault_context_core::query::compose_query;

    #[test]
    fn test_score_path_prefers_filename() {
        let q = compose_query("rust");
        let (mt, score) = score_path(&q, "notes/rust-tips.md", &SubstringMatch).unwrap();
        assert_eq!(mt, MatchType::Filename);
        assert_eq!(score, 3.0);

        let (mt, score) = score_path(&q, "rust/tips.md", &SubstringMatch).unwrap();
        assert_eq!(mt, MatchType::Path);
        assert_eq!(score, 2.0);

        assert!(score_path(&q, "notes/go.md", &SubstringMatch).is_none());
    }

    #[test]
    fn test_score_content_uses_coverage() {
        let q = compose_query("tokio runtime");
        assert_eq!(score_content(&q, "The Tokio docs", &SubstringMatch), Some(0.5));
        assert_eq!(score_content(&q, "tokio runtime", &SubstringMatch), Some(1.0));
        assert_eq!(score_content(&q, "nothing here", &SubstringMatch), None);
    }

    #[test]
    fn test_merge_keeps_best_type_and_score() {
        let mut found = HashMap::new();
        merge_candidate(&mut found, Candidate::new("a.md", MatchType::Content, 2.5));
        merge_candidate(&mut found, Candidate::new("a.md", MatchType::Filename, 1.0));
        let merged = &found["a.md"];
        assert_eq!(merged.match_type, MatchType::Filename);
        assert_eq!(merged.match_score, 2.5);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_merge_never_downgrades_match_type() {
        let mut found = HashMap::new();
        merge_candidate(&mut found, Candidate::new("a.md", MatchType::Filename, 3.0));
        merge_candidate(&mut found, Candidate::new("a.md", MatchType::Content, 1.0));
        assert_eq!(found["a.md"].match_type, MatchType::Filename);
        assert_eq!(found["a.md"].match_score, 3.0);

        merge_candidate(&mut found, Candidate::new("b.md", MatchType::Content, 1.0));
        merge_candidate(&mut found, Candidate::new("b.md", MatchType::Path, 2.0));
        merge_candidate(&mut found, Candidate::new("b.md", MatchType::Content, 0.5));
        assert_eq!(found["b.md"].match_type, MatchType::Path);
        assert_eq!(found["b.md"].match_score, 2.0);
    }

    #[test]
    fn test_builtin_excludes() {
        let filter = PathFilter::new(&AggregationOptions::default()).unwrap();
        assert!(filter.allows_file("notes/a.md"));
        assert!(filter.allows_file("A.MD"));
        assert!(!filter.allows_file(".obsidian/workspace.md"));
        assert!(!filter.allows_file("image.png"));
        assert!(!filter.allows_dir(".trash"));
        assert!(filter.allows_dir("projects"));
    }

    #[test]
    fn test_invalid_glob_is_invalid_argument() {
        let options = AggregationOptions {
            exclude_globs: vec!["[".to_string()],
            ..AggregationOptions::default()
        };
        assert!(matches!(PathFilter::new(&options), Err(Error::InvalidArgument { .. })));
    }
}
