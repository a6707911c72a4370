//! In-memory [`RemoteStore`] implementation for tests and embedding.
//!
//! Directories are implied by note paths. Individual paths can be marked
//! as failing to simulate an unreachable subtree or file.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::{CandidateMetadata, Note};

use super::{DirEntry, RemoteStore, StoreError};

/// In-memory vault keyed by path.
#[derive(Default)]
pub struct MemoryVault {
    notes: RwLock<BTreeMap<String, Note>>,
    failing: RwLock<HashSet<String>>,
    list_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a note with empty metadata (size is derived from content).
    pub fn with_note(self, path: &str, content: &str) -> Self {
        self.insert(path, content, CandidateMetadata::default());
        self
    }

    pub fn with_note_metadata(self, path: &str, content: &str, metadata: CandidateMetadata) -> Self {
        self.insert(path, content, metadata);
        self
    }

    /// Make listing or reading `path` fail with a transient error.
    pub fn with_failure(self, path: &str) -> Self {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(normalize(path));
        }
        self
    }

    pub fn insert(&self, path: &str, content: &str, mut metadata: CandidateMetadata) {
        let path = normalize(path);
        if metadata.size == 0 {
            metadata.size = content.len() as u64;
        }
        if let Ok(mut notes) = self.notes.write() {
            notes.insert(
                path.clone(),
                Note {
                    path,
                    content: content.to_string(),
                    metadata,
                },
            );
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }

    fn check_failure(&self, path: &str) -> Result<(), StoreError> {
        let failing = self
            .failing
            .read()
            .map_err(|_| StoreError::Transient("lock poisoned".to_string()))?;
        if failing.contains(path) {
            return Err(StoreError::Transient(format!("simulated failure for '{}'", path)));
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Note, StoreError> {
        let path = normalize(path);
        self.check_failure(&path)?;
        let notes = self
            .notes
            .read()
            .map_err(|_| StoreError::Transient("lock poisoned".to_string()))?;
        notes.get(&path).cloned().ok_or(StoreError::NotFound(path))
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl RemoteStore for MemoryVault {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let dir = normalize(path);
        self.check_failure(&dir)?;

        let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
        let notes = self
            .notes
            .read()
            .map_err(|_| StoreError::Transient("lock poisoned".to_string()))?;

        let mut dirs = BTreeSet::new();
        let mut files = BTreeSet::new();
        for key in notes.keys() {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(child.to_string());
                }
                None => {
                    files.insert(rest.to_string());
                }
            }
        }

        if !dir.is_empty() && dirs.is_empty() && files.is_empty() {
            return Err(StoreError::NotFound(dir));
        }

        Ok(dirs
            .into_iter()
            .map(DirEntry::directory)
            .chain(files.into_iter().map(DirEntry::file))
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.get(path)?.content.into_bytes())
    }

    async fn read_note(&self, path: &str) -> Result<Note, StoreError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.get(path)
    }
}
