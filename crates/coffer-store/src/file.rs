use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::name::DocumentName;
use crate::traits::{apply_updates, discard_corrupt, Document, DocumentStore};

/// Filesystem-backed document store: one pretty-printed `<name>.json` file
/// per document inside a data directory.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash mid-write leaves the previous version intact.
/// Each document has its own `RwLock`; readers of one document share it,
/// writers and merges hold it exclusively.
pub struct JsonFileStore {
    root: PathBuf,
    locks: HashMap<DocumentName, RwLock<()>>,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let locks = DocumentName::ALL
            .into_iter()
            .map(|name| (name, RwLock::new(())))
            .collect();
        info!(root = %root.display(), "document store opened");
        Ok(Self { root, locks })
    }

    /// Directory holding the document files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a document's backing file.
    pub fn path_of(&self, name: DocumentName) -> PathBuf {
        self.root.join(name.file_name())
    }

    fn lock(&self, name: DocumentName) -> &RwLock<()> {
        // Populated with every allow-listed name at construction.
        &self.locks[&name]
    }

    fn read_unlocked(&self, name: DocumentName) -> StoreResult<Document> {
        let path = self.path_of(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.create_empty(&path)?;
                debug!(document = %name, "created missing document");
                return Ok(Document::new());
            }
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Ok(Document::new());
        }

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(map)) => {
                debug!(document = %name, entries = map.len(), "document read");
                Ok(map)
            }
            Ok(other) => Err(StoreError::Corrupt {
                document: name,
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(e) => Err(StoreError::Corrupt {
                document: name,
                reason: e.to_string(),
            }),
        }
    }

    fn create_empty(&self, path: &Path) -> StoreResult<()> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(b"{}")?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_unlocked(&self, name: DocumentName, document: &Document) -> StoreResult<()> {
        let payload = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_of(name)).map_err(|e| e.error)?;

        debug!(document = %name, entries = document.len(), bytes = payload.len(), "document written");
        Ok(())
    }
}

impl DocumentStore for JsonFileStore {
    fn read(&self, name: DocumentName) -> StoreResult<Document> {
        let _guard = self.lock(name).read().expect("document lock poisoned");
        self.read_unlocked(name)
    }

    fn write(&self, name: DocumentName, document: &Document) -> StoreResult<()> {
        let _guard = self.lock(name).write().expect("document lock poisoned");
        self.write_unlocked(name, document)
    }

    fn merge(&self, name: DocumentName, updates: &Document) -> StoreResult<()> {
        let _guard = self.lock(name).write().expect("document lock poisoned");
        let mut current = discard_corrupt(name, self.read_unlocked(name))?;
        apply_updates(&mut current, updates);
        self.write_unlocked(name, &current)
    }
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore")
            .field("root", &self.root)
            .finish()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
