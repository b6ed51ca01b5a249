//! Transaction locks for multi-party economy operations.
//!
//! Transfers, trades, duels and wagers touch more than one user's state.
//! Before doing so they acquire a lock keyed by the sorted, deduplicated set
//! of participants, so `[alice, bob]` and `[bob, alice]` contend for the same
//! lock and two-party operations can never deadlock on acquisition order.
//!
//! Locks are advisory: they only exclude callers that go through the
//! [`TransactionLockManager`].
//!
//! Two acquisitions contend only when their participant sets are equal.
//! Locking `[a, b]` does not block `[a, c]`; operations that need to exclude
//! every operation touching `a` must include the same participant set.

pub mod error;
pub mod key;
pub mod manager;

pub use error::{LockError, LockResult};
pub use key::LockKey;
pub use manager::{TransactionGuard, TransactionLockManager};
