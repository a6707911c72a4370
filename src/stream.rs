//! Live stream merging over a tokio channel.
//!
//! A producer sends [`StreamChunk`]s into a bounded `mpsc` channel and
//! [`merge_live`] folds them into a [`StreamMerger`] as they arrive. Each
//! wait for the next chunk is bounded by `timeout_ms`; ordering and
//! completion rules are the ones the core merger enforces.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use vault_context_core::models::{MergedResult, StreamChunk};
use vault_context_core::stream::{StreamConfig, StreamMerger};
use vault_context_core::{Error, Result};

/// Consume `rx` until a complete chunk arrives and return the decoded result.
pub async fn merge_live(rx: mpsc::Receiver<StreamChunk>, config: &StreamConfig) -> Result<MergedResult> {
    feed_live(rx, config).await?.finish()
}

/// Consume `rx` into a merger, returning it once the stream has completed.
///
/// Fails with [`Error::StreamTimeout`] if no chunk arrives within
/// `timeout_ms`, and with [`Error::InvalidSequence`] if the sender is dropped
/// before a complete chunk or a chunk breaks ordering.
pub async fn feed_live(mut rx: mpsc::Receiver<StreamChunk>, config: &StreamConfig) -> Result<StreamMerger> {
    config.validate()?;
    let wait = Duration::from_millis(config.timeout_ms);
    let mut merger = StreamMerger::new(config);

    while !merger.is_complete() {
        let expected = merger.last_index().map(|i| i + 1).unwrap_or(0);
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(chunk)) => {
                debug!(index = chunk.index, bytes = chunk.data.len(), "stream chunk");
                merger.push(chunk)?;
            }
            Ok(None) => {
                return Err(Error::invalid_sequence(match merger.last_index() {
                    Some(last) => format!("producer closed after chunk {} without completing", last),
                    None => "producer closed before sending any chunk".to_string(),
                }));
            }
            Err(_) => {
                return Err(Error::StreamTimeout {
                    index: expected,
                    timeout_ms: config.timeout_ms,
                });
            }
        }
    }

    Ok(merger)
}
