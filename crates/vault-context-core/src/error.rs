//! Error taxonomy shared by every retrieval stage.
//!
//! Only [`Error::InvalidArgument`] and [`Error::RemoteUnavailable`] end a
//! search early. [`Error::PartialFailure`] describes a skipped subtree or file
//! and is logged and counted by the aggregator rather than returned.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Malformed limit, threshold, or budget configuration. Never retried.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
    /// The vault root could not be listed after the client exhausted its retries.
    #[error("Remote store unavailable: {message}")]
    RemoteUnavailable { message: String },
    /// A non-root directory listing or file fetch failed.
    #[error("Partial failure at {path}: {message}")]
    PartialFailure { path: String, message: String },
    /// Stream chunks arrived out of order, after completion, or never completed.
    #[error("Invalid chunk sequence: {message}")]
    InvalidSequence { message: String },
    /// A live stream produced no chunk within the configured timeout.
    #[error("Timed out after {timeout_ms}ms waiting for stream chunk {index}")]
    StreamTimeout { index: u64, timeout_ms: u64 },
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn invalid_sequence(message: impl Into<String>) -> Self {
        Self::InvalidSequence { message: message.into() }
    }

    /// Whether this error terminates a search rather than degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::RemoteUnavailable { .. })
    }
}
