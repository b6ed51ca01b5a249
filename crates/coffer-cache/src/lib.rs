//! Write-back cache for Coffer documents.
//!
//! The cache is split into named namespaces, one per logical dataset
//! (inventories, profiles, ...). Each namespace keeps recently used keys of
//! its document in memory with a dirty bit; dirty entries are written back to
//! the [`DocumentStore`](coffer_store::DocumentStore) in batches by a
//! background task instead of on every mutation.
//!
//! # Entry Lifecycle
//!
//! - Created on first access (`set`, `get_or_load`, or `modify`).
//! - Expires `ttl` after its last refresh; a stale clean entry is dropped.
//! - Evicted in insertion order once a namespace exceeds `max_size`.
//! - A dirty entry is always written back before it is removed. If the write
//!   fails the entry stays cached and dirty.
//!
//! # Sync
//!
//! [`CacheManager::spawn_sync`] starts one tokio task per namespace. Each
//! tick merges every dirty entry into its document with a single write per
//! document. Failed syncs back off exponentially and, after repeated
//! failures, are recorded as [`DeadLetter`]s. [`SyncHandle::shutdown`]
//! stops the tasks and performs a final forced flush.

pub mod config;
pub mod dead_letter;
pub mod entry;
pub mod error;
pub mod manager;
pub mod sync;

pub use config::{CacheConfig, RetryPolicy};
pub use dead_letter::DeadLetter;
pub use error::{CacheError, CacheResult};
pub use manager::{CacheManager, CacheStats, SyncReport};
pub use sync::SyncHandle;
