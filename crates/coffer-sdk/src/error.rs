use thiserror::Error;

use coffer_inventory::InventoryError;

#[derive(Debug, Error)]
pub enum EconomyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("type error: {0}")]
    Types(#[from] coffer_types::TypeError),

    #[error("store error: {0}")]
    Store(#[from] coffer_store::StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] coffer_cache::CacheError),

    #[error("lock error: {0}")]
    Lock(#[from] coffer_lock::LockError),

    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
}

impl EconomyError {
    /// Text suitable for showing to the player who made the request.
    pub fn user_message(&self) -> String {
        match self {
            Self::Inventory(InventoryError::CapacityExceeded {
                current,
                attempted,
                max,
            }) => format!(
                "That weighs {attempted:.2} but only {:.2} of {max:.2} capacity is free.",
                (max - current).max(0.0)
            ),
            Self::Inventory(InventoryError::InsufficientQuantity { held, requested }) => {
                format!("You need {requested} but only have {held}.")
            }
            Self::Inventory(InventoryError::CapacityNotIncreased { current, requested }) => {
                format!("Capacity is already {current:.2}; {requested:.2} would not be an upgrade.")
            }
            Self::Inventory(InventoryError::UnknownItem(item)) => {
                format!("There is no item called \"{item}\".")
            }
            Self::Inventory(InventoryError::Validation(reason)) => format!("Invalid request: {reason}."),
            Self::Store(e) if e.is_validation() => format!("Invalid request: {e}."),
            _ => "Something went wrong saving your data. Please try again.".to_string(),
        }
    }
}

pub type EconomyResult<T> = Result<T, EconomyError>;
