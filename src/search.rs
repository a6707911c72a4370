//! The retrieval pipeline entry point.
//!
//! ```text
//! raw query ─▶ compose ─▶ aggregate (+ hydrate) ─▶ rank ─▶ boost ─▶ dedup ─▶ assemble
//! ```
//!
//! Every stage runs on the result of the previous one. The only `.await`
//! points are inside aggregation; ranking through assembly is synchronous.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use vault_context_core::boost::Booster;
use vault_context_core::context::assemble_context;
use vault_context_core::dedup::deduplicate_candidates;
use vault_context_core::models::{AssembledContext, Candidate};
use vault_context_core::options::SearchOptions;
use vault_context_core::query::ComposedQuery;
use vault_context_core::rank::sort_by_score;
use vault_context_core::store::RemoteStore;
use vault_context_core::Result;

use crate::aggregate::{aggregate_candidates, AggregationStats};

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub search_id: String,
    pub query: ComposedQuery,
    /// Final candidate order, after boosting and deduplication.
    pub ranked: Vec<Candidate>,
    pub context: AssembledContext,
    pub stats: AggregationStats,
}

/// Run one search against `store`.
///
/// Fails only with `InvalidArgument` (bad options) or `RemoteUnavailable`
/// (vault root unreachable). Cancellation returns whatever was gathered.
pub async fn search(
    store: Arc<dyn RemoteStore>,
    raw_query: &str,
    options: &SearchOptions,
    cancel: CancellationToken,
) -> Result<SearchResult> {
    options.validate()?;

    let search_id = Uuid::new_v4().to_string();
    let span = info_span!("search", search_id = %search_id);

    async move {
        let query = options.query.composer().compose(raw_query);
        debug!(tokens = ?query.tokens, filters = ?query.filters, "composed query");

        if query.is_empty() {
            return Ok(SearchResult {
                search_id,
                query,
                ranked: Vec::new(),
                context: assemble_context(&[], &options.context)?,
                stats: AggregationStats::default(),
            });
        }

        let aggregation = aggregate_candidates(store, &query, &options.aggregation, cancel).await?;

        let ranked = options.ranker().rank(aggregation.candidates, &query);

        let booster = Booster::new(&options.boost)?;
        let mut boosted = booster.boost(ranked, Utc::now());
        sort_by_score(&mut boosted);

        let before = boosted.len();
        let ranked = if options.dedup_enabled {
            deduplicate_candidates(boosted, &options.dedup)?
        } else {
            boosted
        };
        if ranked.len() < before {
            debug!(merged = before - ranked.len(), "near-duplicates merged");
        }

        let context = assemble_context(&ranked, &options.context)?;
        info!(
            results = ranked.len(),
            tokens = context.token_count,
            budget_pct = context.budget_used_pct,
            "search complete"
        );

        Ok(SearchResult {
            search_id,
            query,
            ranked,
            context,
            stats: aggregation.stats,
        })
    }
    .instrument(span)
    .await
}
