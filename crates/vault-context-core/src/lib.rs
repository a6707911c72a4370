//! # Vault Context Core
//!
//! Runtime-agnostic retrieval logic for Vault Context: candidate models,
//! query composition, lexical ranking, metadata boosting, deduplication,
//! context assembly, and chunk-stream merging, plus the [`store::RemoteStore`]
//! abstraction the aggregator reads through.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. Every stage
//! except the store is a synchronous transform over an in-memory candidate
//! set.
//!
//! ## Pipeline
//!
//! ```text
//! query ─▶ compose ─▶ aggregate ─▶ rank ─▶ boost ─▶ dedup ─▶ assemble
//!          (query)    (store, app)  (rank)  (boost)  (dedup)  (context)
//! ```

pub mod boost;
pub mod chunk;
pub mod context;
pub mod dedup;
pub mod error;
pub mod matcher;
pub mod models;
pub mod options;
pub mod query;
pub mod rank;
pub mod store;
pub mod stream;

pub use error::{Error, Result};
