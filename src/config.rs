//! TOML configuration.
//!
//! Only `[vault]` is required; every other section falls back to defaults.
//! See `config/vctx.example.toml` for a complete file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use vault_context_core::boost::{BoostConfig, Freshness, TagMode};
use vault_context_core::context::ContextConfig;
use vault_context_core::dedup::{CanonicalStrategy, DedupConfig};
use vault_context_core::options::{AggregationOptions, QueryOptions, RankerKind, SearchOptions};
use vault_context_core::rank::Bm25Params;
use vault_context_core::stream::StreamConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vault: VaultConfig,
    #[serde(default)]
    pub aggregation: AggregationOptions,
    #[serde(default)]
    pub query: QueryOptions,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub boost: BoostSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

fn default_api_key_env() -> String {
    "OBSIDIAN_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    250
}
fn default_retry_max_ms() -> u64 {
    8000
}
fn default_breaker_failure_threshold() -> u32 {
    5
}
fn default_breaker_cooldown_secs() -> u64 {
    30
}

impl VaultConfig {
    /// Bearer token from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RankingConfig {
    #[serde(default)]
    pub ranker: RankerKind,
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            ranker: RankerKind::Bm25,
            k1: default_k1(),
            b: default_b(),
            bm25_weight: default_bm25_weight(),
        }
    }
}

fn default_k1() -> f64 {
    1.2
}
fn default_b() -> f64 {
    0.75
}
fn default_bm25_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoostSection {
    #[serde(default)]
    pub paths: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, f64>,
    #[serde(default)]
    pub tag_mode: TagMode,
    #[serde(default)]
    pub freshness_half_life_days: Option<f64>,
    #[serde(default = "default_freshness_floor")]
    pub freshness_floor: f64,
}

impl Default for BoostSection {
    fn default() -> Self {
        Self {
            paths: BTreeMap::new(),
            tags: BTreeMap::new(),
            tag_mode: TagMode::Max,
            freshness_half_life_days: None,
            freshness_floor: default_freshness_floor(),
        }
    }
}

fn default_freshness_floor() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub strategy: CanonicalStrategy,
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            strategy: CanonicalStrategy::Freshest,
            shingle_size: default_shingle_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_threshold() -> f64 {
    0.9
}
fn default_shingle_size() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Collect every stage's settings into the core options bundle.
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            aggregation: self.aggregation.clone(),
            query: self.query.clone(),
            ranker: self.ranking.ranker,
            bm25: Bm25Params {
                k1: self.ranking.k1,
                b: self.ranking.b,
                weight: self.ranking.bm25_weight,
            },
            boost: BoostConfig {
                paths: self.boost.paths.clone(),
                tags: self.boost.tags.clone(),
                tag_mode: self.boost.tag_mode,
                freshness: self.boost.freshness_half_life_days.map(|half_life_days| Freshness {
                    half_life_days,
                    floor: self.boost.freshness_floor,
                }),
            },
            dedup_enabled: self.dedup.enabled,
            dedup: DedupConfig {
                threshold: self.dedup.threshold,
                strategy: self.dedup.strategy,
                shingle_size: self.dedup.shingle_size,
            },
            context: self.context,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate vault
    let base_url = config.vault.base_url.trim();
    if base_url.is_empty() {
        bail!("vault.base_url must not be empty");
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        bail!("vault.base_url must start with http:// or https://, got '{}'", base_url);
    }
    if config.vault.timeout_secs == 0 {
        bail!("vault.timeout_secs must be > 0");
    }
    if config.vault.breaker_failure_threshold == 0 {
        bail!("vault.breaker_failure_threshold must be > 0");
    }
    if config.vault.retry_max_ms < config.vault.retry_base_ms {
        bail!("vault.retry_max_ms must be >= vault.retry_base_ms");
    }

    // Validate every pipeline stage
    config.stream.validate()?;
    config.search_options().validate()?;

    Ok(config)
}
