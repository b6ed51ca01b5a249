use std::time::Duration;

use coffer_store::DocumentName;

/// Per-namespace cache settings, fixed at registration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long an entry stays fresh after it was last set or loaded.
    pub ttl: Duration,
    /// Maximum number of entries before insertion-order eviction kicks in.
    pub max_size: usize,
    /// Period of the background write-back task.
    pub sync_interval: Duration,
    /// Document the namespace's entries are written back to.
    pub document: DocumentName,
}

impl CacheConfig {
    /// Defaults for `document`: 5 minute TTL, 1000 entries, 30 second sync.
    pub fn for_document(document: DocumentName) -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 1000,
            sync_interval: Duration::from_secs(30),
            document,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.ttl.is_zero() {
            return Err("ttl must be positive");
        }
        if self.max_size == 0 {
            return Err("max_size must be positive");
        }
        if self.sync_interval.is_zero() {
            return Err("sync_interval must be positive");
        }
        Ok(())
    }
}

/// Backoff and dead-letter policy for failed write-backs.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay after the first failure; doubles with each further failure.
    pub base: Duration,
    /// Upper bound on the delay between attempts.
    pub max: Duration,
    /// Consecutive failures after which pending entries are dead-lettered.
    pub dead_letter_after: u32,
    /// Maximum number of dead letters retained (oldest dropped first).
    pub dead_letter_capacity: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            dead_letter_after: 5,
            dead_letter_capacity: 256,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(20);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}
