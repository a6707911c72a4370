//! HTTP client for the Obsidian Local REST API.
//!
//! [`VaultClient`] implements [`RemoteStore`] over three endpoints:
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET {base}/vault/{dir}/` | `{"files": ["a.md", "sub/"]}` |
//! | `GET {base}/vault/{path}` | raw file bytes |
//! | `GET {base}/vault/{path}` with `Accept: application/vnd.olrapi.note+json` | `{content, frontmatter, path, stat, tags}` |
//!
//! # Failure handling
//!
//! - HTTP 429 / 5xx and network errors are retried with exponential backoff
//!   (`retry_base_ms × 2^(attempt-1)`, capped at `retry_max_ms`).
//! - 404 maps to [`StoreError::NotFound`], 401/403 to
//!   [`StoreError::Unauthorized`]; other 4xx fail immediately.
//! - A shared [`CircuitBreaker`] counts operations that still failed after
//!   their retries. Once open, requests fail fast with
//!   [`StoreError::CircuitOpen`] until the cooldown elapses.
//!
//! Response bodies are read chunk by chunk on a producer task and reassembled
//! by [`crate::stream::feed_live`], so a stalled body fails with a timeout
//! instead of hanging the search.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vault_context_core::models::{CandidateMetadata, Note, StreamChunk};
use vault_context_core::store::{DirEntry, RemoteStore, StoreError};
use vault_context_core::stream::StreamConfig;
use vault_context_core::Error;

use crate::config::Config;

const NOTE_JSON: &str = "application/vnd.olrapi.note+json";
const CHUNK_CHANNEL_DEPTH: usize = 16;

// ============ Retry policy ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// ============ Circuit breaker ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { probing: bool },
}

/// Consecutive-failure circuit breaker shared by every clone of a client.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::Closed { failures: 0 }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> BreakerState {
        match *self.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { until } if Instant::now() >= until => BreakerState::HalfOpen,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Admit one request, or `None` while open. Half-open admits a single
    /// trial request at a time; see [`Admission`].
    pub fn admit(&self) -> Option<Admission<'_>> {
        let mut inner = self.lock();
        let trial = match *inner {
            Inner::Closed { .. } => false,
            Inner::Open { until } if Instant::now() < until => return None,
            Inner::HalfOpen { probing: true } => return None,
            Inner::Open { .. } | Inner::HalfOpen { probing: false } => {
                debug!("circuit breaker half-open, admitting trial request");
                *inner = Inner::HalfOpen { probing: true };
                true
            }
        };
        Some(Admission {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Give back an abandoned trial slot so the next request is admitted.
    fn release_trial(&self) {
        let mut inner = self.lock();
        if matches!(*inner, Inner::HalfOpen { probing: true }) {
            debug!("half-open trial dropped without an outcome");
            *inner = Inner::HalfOpen { probing: false };
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if !matches!(*inner, Inner::Closed { .. }) {
            warn!("circuit breaker closed");
        }
        *inner = Inner::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let next = match *inner {
            Inner::Closed { failures } if failures + 1 < self.failure_threshold => {
                Inner::Closed { failures: failures + 1 }
            }
            Inner::Closed { failures } => {
                warn!(
                    failures = failures + 1,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "circuit breaker opened"
                );
                Inner::Open {
                    until: Instant::now() + self.cooldown,
                }
            }
            Inner::HalfOpen { .. } | Inner::Open { .. } => {
                warn!("circuit breaker trial request failed, reopening");
                Inner::Open {
                    until: Instant::now() + self.cooldown,
                }
            }
        };
        *inner = next;
    }
}

/// Permission to send one request through a [`CircuitBreaker`].
///
/// Report the outcome with [`Admission::succeeded`] or [`Admission::failed`].
/// A half-open trial dropped without an outcome (its future was cancelled or
/// aborted) frees the trial slot instead of leaving the breaker half-open
/// with no request in flight.
#[must_use]
#[derive(Debug)]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Admission<'_> {
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

// ============ Client ============

#[derive(Debug, Deserialize)]
struct ListingResponse {
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NoteResponse {
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    frontmatter: serde_json::Value,
    #[serde(default)]
    stat: Option<NoteStat>,
}

#[derive(Debug, Deserialize)]
struct NoteStat {
    #[serde(default)]
    mtime: Option<i64>,
    #[serde(default)]
    size: Option<u64>,
}

/// [`RemoteStore`] backed by the Local REST API. Cheap to clone.
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    stream: StreamConfig,
    breaker: Arc<CircuitBreaker>,
}

impl VaultClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let vault = &config.vault;
        let http = reqwest::Client::builder()
            .timeout(vault.timeout())
            .danger_accept_invalid_certs(vault.accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: vault.base_url.trim().trim_end_matches('/').to_string(),
            api_key: vault.api_key(),
            retry: RetryPolicy {
                max_retries: vault.max_retries,
                base_delay: Duration::from_millis(vault.retry_base_ms),
                max_delay: Duration::from_millis(vault.retry_max_ms),
            },
            stream: config.stream.clone(),
            breaker: Arc::new(CircuitBreaker::new(
                vault.breaker_failure_threshold,
                Duration::from_secs(vault.breaker_cooldown_secs),
            )),
        })
    }

    /// Replace the circuit breaker, e.g. to share one across clients.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str, directory: bool) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(uri_encode)
            .collect();
        let mut url = format!("{}/vault/{}", self.base_url, encoded.join("/"));
        if directory && !encoded.is_empty() {
            url.push('/');
        }
        url
    }

    async fn get(&self, url: &str, accept: &str) -> Result<Vec<u8>, StoreError> {
        let Some(admission) = self.breaker.admit() else {
            return Err(StoreError::CircuitOpen);
        };

        let mut last_err = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, "retrying vault request");
                tokio::time::sleep(delay).await;
            }

            match self.send_once(url, accept).await {
                Ok(body) => {
                    admission.succeeded();
                    return Ok(body);
                }
                Err(e) if e.is_transient() => {
                    debug!(url, attempt, error = %e, "vault request failed");
                    last_err = Some(e);
                }
                Err(e) => {
                    // The server answered, so it is reachable.
                    admission.succeeded();
                    return Err(e);
                }
            }
        }

        admission.failed();
        Err(last_err.unwrap_or_else(|| StoreError::Transient(format!("{} failed after retries", url))))
    }

    async fn send_once(&self, url: &str, accept: &str) -> Result<Vec<u8>, StoreError> {
        let mut request = self.http.get(url).header(ACCEPT, accept);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(500).collect();
            return Err(match status.as_u16() {
                404 => StoreError::NotFound(url.to_string()),
                401 | 403 => StoreError::Unauthorized(message),
                code => StoreError::Http { status: code, message },
            });
        }

        self.read_body(response).await
    }

    /// Stream the body through the live merger.
    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>, StoreError> {
        let (tx, rx) = mpsc::channel::<StreamChunk>(CHUNK_CHANNEL_DEPTH);

        let producer = tokio::spawn(async move {
            let mut index = 0u64;
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        if tx.send(StreamChunk::new(index, bytes.to_vec(), false)).await.is_err() {
                            return Ok(());
                        }
                        index += 1;
                    }
                    Ok(None) => {
                        let _ = tx.send(StreamChunk::new(index, Vec::new(), true)).await;
                        return Ok(());
                    }
                    Err(e) => return Err(StoreError::Transient(e.to_string())),
                }
            }
        });

        let merged = crate::stream::feed_live(rx, &self.stream)
            .await
            .and_then(|merger| merger.finish_bytes());

        match merged {
            Ok(bytes) => {
                producer.abort();
                Ok(bytes)
            }
            Err(merge_err) => {
                producer.abort();
                // A body read error explains the closed channel better than the merger does.
                if let Ok(Err(body_err)) = producer.await {
                    return Err(body_err);
                }
                Err(stream_error(merge_err))
            }
        }
    }
}

fn stream_error(err: Error) -> StoreError {
    match err {
        Error::StreamTimeout { .. } => StoreError::Transient(err.to_string()),
        other => StoreError::Decode(other.to_string()),
    }
}

#[async_trait]
impl RemoteStore for VaultClient {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let url = self.url_for(path, true);
        let body = self.get(&url, "application/json").await?;
        parse_listing(&body)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.url_for(path, false);
        self.get(&url, "text/markdown, */*").await
    }

    async fn read_note(&self, path: &str) -> Result<Note, StoreError> {
        let url = self.url_for(path, false);
        let body = self.get(&url, NOTE_JSON).await?;
        parse_note(path, &body)
    }
}

/// Decode a directory listing. Directory names end with `/`.
pub fn parse_listing(body: &[u8]) -> Result<Vec<DirEntry>, StoreError> {
    let listing: ListingResponse =
        serde_json::from_slice(body).map_err(|e| StoreError::Decode(format!("listing: {}", e)))?;

    Ok(listing
        .files
        .into_iter()
        .filter_map(|name| match name.strip_suffix('/') {
            Some(dir) if !dir.is_empty() => Some(DirEntry::directory(dir)),
            Some(_) => None,
            None if name.is_empty() => None,
            None => Some(DirEntry::file(name)),
        })
        .collect())
}

/// Decode a note JSON body. Tags from the body and from frontmatter are merged.
pub fn parse_note(path: &str, body: &[u8]) -> Result<Note, StoreError> {
    let note: NoteResponse =
        serde_json::from_slice(body).map_err(|e| StoreError::Decode(format!("note {}: {}", path, e)))?;

    let mut metadata = CandidateMetadata::default();
    let frontmatter_tags = match note.frontmatter.get("tags") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    for tag in note.tags.iter().chain(frontmatter_tags.iter()) {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() {
            metadata.tags.insert(tag);
        }
    }

    if let Some(stat) = &note.stat {
        metadata.modified_at = stat.mtime.and_then(DateTime::<Utc>::from_timestamp_millis);
        metadata.size = stat.size.unwrap_or(note.content.len() as u64);
    } else {
        metadata.size = note.content.len() as u64;
    }

    Ok(Note {
        path: path.to_string(),
        content: note.content,
        metadata,
    })
}

/// RFC 3986 percent-encoding of one path segment.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
