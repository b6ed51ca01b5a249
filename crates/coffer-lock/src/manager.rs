use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::error::LockResult;
use crate::key::LockKey;

type LockTable = Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>;

/// Hands out exclusive guards keyed by participant sets.
///
/// Each key maps to a fair async mutex, so waiters are served in arrival
/// order without polling. Entries are removed from the table once the last
/// guard is released and nobody is waiting.
#[derive(Default)]
pub struct TransactionLockManager {
    table: Arc<LockTable>,
}

impl TransactionLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock for `participants` is free and take it.
    pub async fn acquire<I, S>(&self, participants: I) -> LockResult<TransactionGuard>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = LockKey::new(participants)?;
        let mutex = self.slot(&key);
        let started = Instant::now();
        let guard = mutex.lock_owned().await;
        debug!(key = %key, waited_us = started.elapsed().as_micros() as u64, "transaction lock acquired");
        Ok(TransactionGuard {
            key,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        })
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire<I, S>(&self, participants: I) -> LockResult<Option<TransactionGuard>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = LockKey::new(participants)?;
        let mutex = self.slot(&key);
        match mutex.try_lock_owned() {
            Ok(guard) => {
                debug!(key = %key, "transaction lock acquired");
                Ok(Some(TransactionGuard {
                    key,
                    guard: Some(guard),
                    table: Arc::clone(&self.table),
                }))
            }
            Err(_) => {
                prune(&self.table, &key);
                trace!(key = %key, "transaction lock busy");
                Ok(None)
            }
        }
    }

    /// Whether a guard for exactly this participant set is currently held.
    pub fn is_locked<I, S>(&self, participants: I) -> LockResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = LockKey::new(participants)?;
        let table = self.table.lock().expect("lock poisoned");
        Ok(table
            .get(&key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false))
    }

    /// Number of keys currently tracked (held or awaited).
    pub fn active_keys(&self) -> usize {
        self.table.lock().expect("lock poisoned").len()
    }

    fn slot(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().expect("lock poisoned");
        Arc::clone(table.entry(key.clone()).or_default())
    }
}

impl std::fmt::Debug for TransactionLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLockManager")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

/// Exclusive hold on a participant set. Released on [`release`](Self::release)
/// or when dropped.
pub struct TransactionGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl TransactionGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release the lock. Equivalent to dropping the guard.
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            prune(&self.table, &self.key);
            debug!(key = %self.key, "transaction lock released");
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl std::fmt::Debug for TransactionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("key", &self.key)
            .field("held", &self.guard.is_some())
            .finish()
    }
}

/// Drop the table entry for `key` when the table holds the only reference.
/// Waiters and holders keep their own clone, so a shared entry survives.
fn prune(table: &LockTable, key: &LockKey) {
    let mut table = table.lock().expect("lock poisoned");
    if let Some(mutex) = table.get(key) {
        if Arc::strong_count(mutex) == 1 {
            table.remove(key);
        }
    }
}
