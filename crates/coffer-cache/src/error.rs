use coffer_store::StoreError;

/// Errors produced by cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No namespace with this name has been registered.
    #[error("unknown cache namespace: {0}")]
    UnknownNamespace(String),

    /// `register_cache` was called twice for the same namespace.
    #[error("cache namespace already registered: {0}")]
    AlreadyRegistered(String),

    /// A namespace configuration value is unusable.
    #[error("invalid cache configuration for {namespace}: {reason}")]
    InvalidConfig { namespace: String, reason: String },

    /// The same key was passed twice to a multi-key operation.
    #[error("duplicate key in multi-key operation: {0}")]
    DuplicateKey(String),

    /// Writing back to (or reading from) the document store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the cache crate.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
