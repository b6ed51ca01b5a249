use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::error::{StoreError, StoreResult};
use crate::name::DocumentName;

/// A whole named document: a JSON object keyed by user id (or another
/// string key) holding that key's payload.
pub type Document = Map<String, Value>;

/// Repository interface over named JSON documents.
///
/// All implementations must satisfy these invariants:
/// - Reading a document that does not exist yields an empty document and
///   creates it; it is never an error.
/// - A write replaces the whole document; readers never observe a partially
///   written document.
/// - Reads and writes of the same document are serialized, so
///   [`DocumentStore::merge`] is an atomic read-modify-write.
pub trait DocumentStore: Send + Sync {
    /// Read a whole document.
    ///
    /// Returns `Err(StoreError::Corrupt)` if the stored bytes are not a JSON
    /// object and `Err(StoreError::Io)` on I/O failure.
    fn read(&self, name: DocumentName) -> StoreResult<Document>;

    /// Replace a whole document.
    fn write(&self, name: DocumentName, document: &Document) -> StoreResult<()>;

    /// Overwrite the given keys of a document, keeping all others.
    ///
    /// A corrupt document is treated as empty, so the updates replace it.
    /// Backends override this to hold their document lock across the read
    /// and the write.
    fn merge(&self, name: DocumentName, updates: &Document) -> StoreResult<()> {
        let mut current = discard_corrupt(name, self.read(name))?;
        apply_updates(&mut current, updates);
        self.write(name, &current)
    }

    /// Read a document, degrading every failure to an empty document.
    ///
    /// Corrupt documents are logged at `warn`, I/O failures at `error`.
    fn read_or_empty(&self, name: DocumentName) -> Document {
        match self.read(name) {
            Ok(document) => document,
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(document = %name, %reason, "corrupt document treated as empty");
                Document::new()
            }
            Err(e) => {
                error!(document = %name, error = %e, "document read failed; using empty document");
                Document::new()
            }
        }
    }
}

/// Read half of a merge: corrupt content is discarded, I/O errors propagate.
pub(crate) fn discard_corrupt(
    name: DocumentName,
    read: StoreResult<Document>,
) -> StoreResult<Document> {
    match read {
        Err(StoreError::Corrupt { reason, .. }) => {
            warn!(document = %name, %reason, "overwriting corrupt document during merge");
            Ok(Document::new())
        }
        other => other,
    }
}

pub(crate) fn apply_updates(current: &mut Document, updates: &Document) {
    for (key, value) in updates {
        current.insert(key.clone(), value.clone());
    }
}
