//! Remote store abstraction.
//!
//! The [`RemoteStore`] trait is the only way the retrieval pipeline touches
//! a vault. Implementations must be `Send + Sync`: one instance is shared by
//! every concurrent fetch of a search, so any retry or circuit-breaker state
//! lives inside the implementation.
//!
//! Paths are vault-relative and `/`-separated. The empty string is the root.

pub mod memory;

use async_trait::async_trait;

use crate::models::{CandidateMetadata, Note};

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name without a trailing `/`.
    pub name: String,
    pub is_directory: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
        }
    }
}

/// Failure of a single store operation, after any client-side retries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("circuit open: remote store is failing fast")]
    CircuitOpen,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) => true,
            StoreError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Join a directory path and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    let name = name.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Read-only access to a remote vault.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the direct children of a directory.
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, StoreError>;

    /// Fetch the raw bytes of a file.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Fetch a note's content and metadata.
    ///
    /// The default implementation decodes [`read_file`](RemoteStore::read_file)
    /// and only knows the size. Stores that return tags and modification
    /// times should override it.
    async fn read_note(&self, path: &str) -> Result<Note, StoreError> {
        let bytes = self.read_file(path).await?;
        Ok(Note {
            path: path.to_string(),
            metadata: CandidateMetadata {
                size: bytes.len() as u64,
                ..CandidateMetadata::default()
            },
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a.md"), "a.md");
        assert_eq!(join_path("notes", "a.md"), "notes/a.md");
        assert_eq!(join_path("notes/", "sub/"), "notes/sub");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Transient("reset".into()).is_transient());
        assert!(StoreError::Http { status: 503, message: String::new() }.is_transient());
        assert!(StoreError::Http { status: 429, message: String::new() }.is_transient());
        assert!(!StoreError::Http { status: 400, message: String::new() }.is_transient());
        assert!(!StoreError::NotFound("x".into()).is_transient());
        assert!(!StoreError::CircuitOpen.is_transient());
    }
}
