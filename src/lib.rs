//! # Vault Context
//!
//! Query-time retrieval over a remote note vault, with token-budgeted
//! context assembly for AI tools.
//!
//! Nothing is indexed ahead of time: every search walks the vault through
//! its HTTP API, ranks what it finds and packs the best notes into a context
//! string that fits a token budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────────────────────┐
//! │  Query   │──▶│ Aggregator │──▶│ Rank ▶ Boost ▶ Dedup ▶ Pack  │
//! │ Composer │   │ (tokio)    │   │ (vault-context-core)         │
//! └──────────┘   └─────┬──────┘   └──────────────┬───────────────┘
//!                      │                         │
//!             ┌────────▼────────┐       ┌────────┴─────────┐
//!             │   VaultClient   │       ▼                  ▼
//!             │ retry + breaker │  ┌─────────┐       ┌──────────┐
//!             └─────────────────┘  │   CLI   │       │   HTTP   │
//!                                  │ (vctx)  │       │  tools   │
//!                                  └─────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OBSIDIAN_API_KEY=...
//! vctx check                          # verify the vault is reachable
//! vctx search "tokio runtime"         # ranked notes
//! vctx search "tag:rust async" --context --max-tokens 2000
//! vctx serve                          # start HTTP tool server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`client`] | HTTP vault client with retry and circuit breaker |
//! | [`stream`] | Live chunk merging with a per-chunk timeout |
//! | [`aggregate`] | Concurrent candidate aggregation |
//! | [`search`] | Full pipeline entry point |
//! | [`server`] | HTTP tool server |
//!
//! The pure stages (composition, ranking, boosting, deduplication, assembly)
//! live in [`vault_context_core`].

pub mod aggregate;
pub mod client;
pub mod config;
pub mod search;
pub mod server;
pub mod stream;
