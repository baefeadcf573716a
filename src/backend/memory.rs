//! In-process backend
//!
//! Clones share state, so a test can keep a handle to a store it handed to a
//! connection manager and inspect it afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{StoreBackend, StoreLocation, StoreOpener};
use crate::error::{Result, StoreError, TransactionError};
use crate::model::StoreDocument;

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    document: Option<StoreDocument>,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
struct State {
    working: Snapshot,
    /// Last committed state, set while a transaction is open
    committed: Option<Snapshot>,
    commits: Vec<String>,
}

/// In-memory store with snapshot-on-begin semantics
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create a store holding `document`
    pub fn new(document: StoreDocument) -> Self {
        Self::with_document(Some(document))
    }

    /// Create a store without any document
    pub fn empty() -> Self {
        Self::with_document(None)
    }

    fn with_document(document: Option<StoreDocument>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                working: Snapshot {
                    document,
                    files: BTreeMap::new(),
                },
                committed: None,
                commits: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Messages of all durable writes, oldest first
    pub fn commits(&self) -> Vec<String> {
        self.lock().commits.clone()
    }

    /// Serialized document as currently stored
    pub fn document_bytes(&self) -> Option<Vec<u8>> {
        self.lock()
            .working
            .document
            .as_ref()
            .and_then(|d| serde_json::to_vec(d).ok())
    }
}

impl StoreBackend for MemoryStore {
    fn read_document(&self) -> Result<StoreDocument> {
        self.lock()
            .working
            .document
            .clone()
            .ok_or_else(|| StoreError::InvalidDocument("store has no document".to_string()))
    }

    fn write_document(&mut self, document: &StoreDocument, message: &str) -> Result<()> {
        let mut state = self.lock();
        state.working.document = Some(document.clone());
        if state.committed.is_none() {
            state.commits.push(message.to_string());
        }
        Ok(())
    }

    fn read_file(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().working.files.get(key).cloned())
    }

    fn write_file(&mut self, key: &str, content: &[u8]) -> Result<()> {
        self.lock().working.files.insert(key.to_string(), content.to_vec());
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.committed.is_some() {
            return Err(TransactionError::AlreadyOpen.into());
        }
        state.committed = Some(state.working.clone());
        Ok(())
    }

    fn commit_transaction(&mut self, message: &str) -> Result<()> {
        let mut state = self.lock();
        if state.committed.take().is_none() {
            return Err(TransactionError::NotOpen.into());
        }
        state.commits.push(message.to_string());
        Ok(())
    }

    fn discard_transaction(&mut self) -> Result<()> {
        let mut state = self.lock();
        if let Some(snapshot) = state.committed.take() {
            debug!("restoring in-memory store snapshot");
            state.working = snapshot;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.lock().committed.is_some()
    }
}

/// Opener that hands out the same in-memory store for every location
#[derive(Debug, Clone)]
pub struct MemoryStoreOpener {
    pub store: MemoryStore,
}

impl StoreOpener for MemoryStoreOpener {
    fn open(&self, location: &StoreLocation) -> Result<Box<dyn StoreBackend>> {
        debug!(path = %location.path.display(), "opening in-memory store");
        Ok(Box::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_restores_snapshot() {
        let mut store = MemoryStore::new(StoreDocument::new("3.0.0"));
        let before = store.document_bytes();

        store.begin_transaction().unwrap();
        store.write_document(&StoreDocument::new("9.9.9"), "change").unwrap();
        store.write_file("locks/abc", b"lock").unwrap();
        store.discard_transaction().unwrap();

        assert_eq!(store.document_bytes(), before);
        assert_eq!(store.read_file("locks/abc").unwrap(), None);
        assert!(store.commits().is_empty());
    }

    #[test]
    fn test_commit_keeps_changes() {
        let mut store = MemoryStore::new(StoreDocument::new("3.0.0"));
        store.begin_transaction().unwrap();
        store.write_document(&StoreDocument::new("3.1.0"), "ignored").unwrap();
        store.commit_transaction("Bump schema").unwrap();

        assert_eq!(store.schema_version().unwrap(), "3.1.0");
        assert_eq!(store.commits(), vec!["Bump schema".to_string()]);
    }

    #[test]
    fn test_writes_outside_transaction_are_durable() {
        let mut store = MemoryStore::new(StoreDocument::new("3.0.0"));
        store.write_document(&StoreDocument::new("3.0.0"), "Direct write").unwrap();
        assert_eq!(store.commits(), vec!["Direct write".to_string()]);
    }

    #[test]
    fn test_nested_begin_fails() {
        let mut store = MemoryStore::new(StoreDocument::new("3.0.0"));
        store.begin_transaction().unwrap();
        assert!(store.begin_transaction().is_err());
    }
}
