//! Per-user inventories with a carrying-capacity invariant.
//!
//! [`InventoryStore`] reads and writes inventories through the write-back
//! cache and routes every multi-party operation through the transaction
//! lock manager.
//!
//! # Design Rules
//!
//! 1. `weight` is always recomputed from the item catalogue, never adjusted
//!    incrementally.
//! 2. `weight <= maxWeight` holds after every committed mutation. A mutation
//!    that would break it is rejected and nothing is written.
//! 3. Transfers and trades validate both sides on copies and commit both or
//!    neither inside one cache critical section, while holding the lock for
//!    the participant pair.
//! 4. `maxWeight` only increases.

pub mod error;
pub mod outcome;
pub mod store;

pub use error::{InventoryError, InventoryResult};
pub use outcome::{AddOutcome, Offer, RemoveOutcome, SwapOutcome, TransferOutcome};
pub use store::{InventoryConfig, InventoryStore};
