use coffer_cache::CacheError;
use coffer_lock::LockError;

/// Errors produced by inventory operations.
///
/// Everything except [`InventoryError::Persistence`] and
/// [`InventoryError::Serialization`] is a user-recoverable rejection that
/// left state unchanged.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// Malformed request: zero quantity, self-transfer, bad capacity value.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The item is not in the catalogue.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// Adding `attempted` weight to `current` would pass `max`.
    #[error("capacity exceeded: {current} + {attempted} > {max}")]
    CapacityExceeded {
        current: f64,
        attempted: f64,
        max: f64,
    },

    /// Fewer units are held than were requested.
    #[error("insufficient quantity: held {held}, requested {requested}")]
    InsufficientQuantity { held: u64, requested: u64 },

    /// An upgrade must strictly raise the capacity.
    #[error("capacity not increased: current {current}, requested {requested}")]
    CapacityNotIncreased { current: f64, requested: f64 },

    /// The cache or its backing store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] CacheError),

    /// An inventory could not be encoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

impl InventoryError {
    /// Whether the request itself was malformed (as opposed to rejected by
    /// the current state).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownItem(_) | Self::Lock(_))
    }
}

/// Convenience alias for inventory operations.
pub type InventoryResult<T> = std::result::Result<T, InventoryError>;
