//! Reassembly of document bodies delivered as ordered chunks.
//!
//! [`StreamMerger`] accepts [`StreamChunk`]s strictly in increasing `index`
//! order and performs no reordering. A stream is terminated by the first
//! chunk with `complete = true`; anything pushed afterwards is rejected.
//! Bytes are accumulated raw and decoded once at the end, so a multi-byte
//! character split across chunks survives intact.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{MergedResult, StreamChunk};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Inserted between consecutive chunks. `None` means raw concatenation.
    pub delimiter: Option<String>,
    /// How long a live merger waits for the next chunk. Ignored by [`merge_chunks`].
    pub timeout_ms: u64,
    /// Initial capacity of the accumulation buffer.
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            timeout_ms: 10_000,
            buffer_size: 8192,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::invalid_argument("stream.timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Accumulation buffer for one stream.
#[derive(Debug)]
pub struct StreamMerger {
    buffer: Vec<u8>,
    delimiter: Option<Vec<u8>>,
    last_index: Option<u64>,
    complete: bool,
}

impl StreamMerger {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            buffer: Vec::with_capacity(config.buffer_size),
            delimiter: config.delimiter.as_ref().map(|d| d.as_bytes().to_vec()),
            last_index: None,
            complete: false,
        }
    }

    /// Index the next chunk must exceed, if any chunk has been consumed.
    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Append one chunk.
    pub fn push(&mut self, chunk: StreamChunk) -> Result<()> {
        if self.complete {
            return Err(Error::invalid_sequence(format!(
                "chunk {} received after the stream completed",
                chunk.index
            )));
        }
        if let Some(last) = self.last_index {
            if chunk.index <= last {
                return Err(Error::invalid_sequence(format!(
                    "chunk index {} does not follow {}",
                    chunk.index, last
                )));
            }
            if let Some(delimiter) = &self.delimiter {
                self.buffer.extend_from_slice(delimiter);
            }
        }
        self.buffer.extend_from_slice(&chunk.data);
        self.last_index = Some(chunk.index);
        self.complete = chunk.complete;
        Ok(())
    }

    /// Consume the merger. Fails unless a `complete` chunk was pushed.
    pub fn finish(self) -> Result<MergedResult> {
        let buffer = self.finish_bytes()?;
        let size = buffer.len();
        let content = match String::from_utf8(buffer) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Ok(MergedResult { content, size })
    }

    /// Like [`finish`](Self::finish), but returns the raw bytes undecoded.
    pub fn finish_bytes(self) -> Result<Vec<u8>> {
        if !self.complete {
            return Err(Error::invalid_sequence(match self.last_index {
                Some(last) => format!("stream ended after chunk {} without a complete chunk", last),
                None => "stream ended before any chunk arrived".to_string(),
            }));
        }
        Ok(self.buffer)
    }
}

/// Merge an already-collected chunk sequence.
pub fn merge_chunks(chunks: impl IntoIterator<Item = StreamChunk>, config: &StreamConfig) -> Result<MergedResult> {
    let mut merger = StreamMerger::new(config);
    for chunk in chunks {
        merger.push(chunk)?;
    }
    merger.finish()
}
