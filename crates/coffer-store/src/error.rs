use crate::name::DocumentName;

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The name is not on the document allow-list.
    #[error("invalid document name: {0:?}")]
    InvalidDocumentName(String),

    /// The document exists but does not hold a JSON object.
    #[error("corrupt document {document}: {reason}")]
    Corrupt {
        document: DocumentName,
        reason: String,
    },

    /// Serialization failure while encoding a document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the write (used by the in-memory store to
    /// simulate a full disk).
    #[error("write rejected for document {0}")]
    WriteRejected(DocumentName),
}

impl StoreError {
    /// Whether the error came from bad input rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidDocumentName(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
