//! High-level SDK for Coffer.
//!
//! [`Economy`] wires a document store, the write-back cache, the transaction
//! lock manager and the inventory store together from one
//! [`EconomyConfig`]. It is the surface collaborators (command handlers,
//! renderers) call into; every domain failure comes back as an
//! [`EconomyError`] whose [`user_message`](EconomyError::user_message) can be
//! shown to players directly.

pub mod config;
pub mod economy;
pub mod error;
pub mod telemetry;

pub use config::{EconomyConfig, NamespaceConfig, RetryConfig};
pub use economy::Economy;
pub use error::{EconomyError, EconomyResult};

// Re-export key types
pub use coffer_cache::{CacheStats, DeadLetter, SyncReport};
pub use coffer_inventory::{AddOutcome, Offer, RemoveOutcome, SwapOutcome, TransferOutcome};
pub use coffer_store::{Document, DocumentName};
pub use coffer_types::{Inventory, ItemCatalog, ItemDefinition, ItemId, UserId};
