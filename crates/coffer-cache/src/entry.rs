use coffer_store::DocumentName;
use serde_json::Value;
use tokio::time::Instant;

/// A cached value together with its freshness and write-back state.
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
    pub(crate) data: Value,
    /// Last time the entry was set or loaded.
    pub(crate) timestamp: Instant,
    /// Mutated since the last successful write-back.
    pub(crate) dirty: bool,
    /// Document this entry is written back to.
    pub(crate) document: DocumentName,
}

impl CacheEntry {
    pub(crate) fn new(data: Value, dirty: bool, document: DocumentName) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            dirty,
            document,
        }
    }

    pub(crate) fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        self.timestamp.elapsed() < ttl
    }

    /// Replace the value and refresh the timestamp.
    pub(crate) fn refresh(&mut self, data: Value, dirty: bool) {
        self.data = data;
        self.dirty = dirty;
        self.timestamp = Instant::now();
    }
}
