use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::name::DocumentName;
use crate::traits::{apply_updates, Document, DocumentStore};

/// In-memory, HashMap-based document store.
///
/// Intended for tests and embedding. Writes can be made to fail on demand
/// with [`InMemoryDocumentStore::set_fail_writes`], and every successful
/// write is counted so callers can assert on batching behaviour.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentName, Document>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryDocumentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write (and merge) fail with
    /// [`StoreError::WriteRejected`] until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful whole-document writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self, name: DocumentName) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected(name));
        }
        Ok(())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn read(&self, name: DocumentName) -> StoreResult<Document> {
        {
            let documents = self.documents.read().expect("lock poisoned");
            if let Some(document) = documents.get(&name) {
                return Ok(document.clone());
            }
        }
        let mut documents = self.documents.write().expect("lock poisoned");
        Ok(documents.entry(name).or_default().clone())
    }

    fn write(&self, name: DocumentName, document: &Document) -> StoreResult<()> {
        self.check_writable(name)?;
        let mut documents = self.documents.write().expect("lock poisoned");
        documents.insert(name, document.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn merge(&self, name: DocumentName, updates: &Document) -> StoreResult<()> {
        self.check_writable(name)?;
        let mut documents = self.documents.write().expect("lock poisoned");
        apply_updates(documents.entry(name).or_default(), updates);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.documents.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryDocumentStore")
            .field("document_count", &count)
            .field("writes", &self.write_count())
            .finish()
    }
}
