use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime};

use coffer_store::{Document, DocumentName, DocumentStore, StoreError};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, RetryPolicy};
use crate::dead_letter::DeadLetter;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};

/// Point-in-time view of one namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub dirty: usize,
    /// Write-back failures since the last successful sync.
    pub consecutive_failures: u32,
}

/// Outcome of a write-back pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries written back.
    pub flushed: usize,
    /// Documents written (one merge per document).
    pub documents: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.flushed += other.flushed;
        self.documents += other.documents;
    }
}

pub(crate) struct Namespace {
    name: String,
    config: CacheConfig,
    state: Mutex<NamespaceState>,
}

impl Namespace {
    fn lock(&self) -> MutexGuard<'_, NamespaceState> {
        self.state.lock().expect("cache namespace lock poisoned")
    }
}

#[derive(Default)]
struct NamespaceState {
    /// Entries in insertion order; overwrites keep their position.
    entries: IndexMap<String, CacheEntry>,
    failures: u32,
    retry_at: Option<Instant>,
    /// Keys already dead-lettered during the current failure streak.
    dead_lettered: HashSet<String>,
}

/// Namespaced write-back cache in front of a [`DocumentStore`].
///
/// Constructed once and shared behind an `Arc`. Namespaces are registered
/// up front with [`CacheManager::register_cache`]; every other operation
/// names the namespace it works on. Operations on different namespaces never
/// contend; operations within a namespace are serialized by its mutex, which
/// is also held for the duration of a write-back so no caller ever observes
/// a half-cleared dirty bit.
pub struct CacheManager {
    store: Arc<dyn DocumentStore>,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    retry: RetryPolicy,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
}

impl CacheManager {
    /// Create a cache over `store` with the default [`RetryPolicy`].
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            namespaces: RwLock::new(HashMap::new()),
            retry,
            dead_letters: Mutex::new(VecDeque::new()),
        }
    }

    /// The document store this cache writes back to.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Register a namespace. Each namespace can be registered once.
    pub fn register_cache(&self, name: &str, config: CacheConfig) -> CacheResult<()> {
        config.validate().map_err(|reason| CacheError::InvalidConfig {
            namespace: name.to_string(),
            reason: reason.to_string(),
        })?;

        let mut namespaces = self.namespaces.write().expect("cache registry poisoned");
        if namespaces.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }
        info!(
            namespace = name,
            document = %config.document,
            ttl_ms = config.ttl.as_millis() as u64,
            max_size = config.max_size,
            sync_ms = config.sync_interval.as_millis() as u64,
            "cache namespace registered"
        );
        namespaces.insert(
            name.to_string(),
            Arc::new(Namespace {
                name: name.to_string(),
                config,
                state: Mutex::new(NamespaceState::default()),
            }),
        );
        Ok(())
    }

    /// Whether `name` has been registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.namespaces
            .read()
            .expect("cache registry poisoned")
            .contains_key(name)
    }

    /// Namespaces whose entries are written back to `document`.
    pub fn namespaces_for(&self, document: DocumentName) -> Vec<String> {
        let namespaces = self.namespaces.read().expect("cache registry poisoned");
        let mut names: Vec<String> = namespaces
            .values()
            .filter(|ns| ns.config.document == document)
            .map(|ns| ns.name.clone())
            .collect();
        names.sort();
        names
    }

    fn namespace(&self, name: &str) -> CacheResult<Arc<Namespace>> {
        self.namespaces
            .read()
            .expect("cache registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownNamespace(name.to_string()))
    }

    fn all_namespaces(&self) -> Vec<Arc<Namespace>> {
        let namespaces = self.namespaces.read().expect("cache registry poisoned");
        let mut all: Vec<Arc<Namespace>> = namespaces.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Name and sync period of every registered namespace.
    pub(crate) fn sync_schedule(&self) -> Vec<(String, Duration)> {
        self.all_namespaces()
            .iter()
            .map(|ns| (ns.name.clone(), ns.config.sync_interval))
            .collect()
    }

    // ---- Entry operations ----

    /// Return the cached value if it is still fresh.
    ///
    /// A stale entry counts as a miss and is removed. A stale dirty entry is
    /// written back first; if that fails it is kept and returned.
    pub fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Value>> {
        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();
        Ok(self.lookup(&ns, &mut state, key))
    }

    /// Store `value` under `key`. A new key entering a full namespace evicts
    /// the oldest-inserted entry first.
    pub fn set(&self, namespace: &str, key: &str, value: Value, dirty: bool) -> CacheResult<()> {
        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.refresh(value, dirty);
            return Ok(());
        }
        self.make_room(&ns, &mut state, 1, &[]);
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value, dirty, ns.config.document));
        Ok(())
    }

    /// Return the cached value, loading it from `document` on a miss.
    ///
    /// A loaded value mirrors disk and is cached clean. Keys absent from the
    /// document yield (and cache) `default`. Read failures degrade to the
    /// default rather than erroring.
    pub fn get_or_load(
        &self,
        namespace: &str,
        key: &str,
        document: DocumentName,
        default: Value,
    ) -> CacheResult<Value> {
        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();
        if let Some(value) = self.lookup(&ns, &mut state, key) {
            return Ok(value);
        }

        let value = self
            .store
            .read_or_empty(document)
            .remove(key)
            .unwrap_or(default);
        self.make_room(&ns, &mut state, 1, &[]);
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value.clone(), false, document));
        debug!(namespace = %ns.name, key, document = %document, "cache entry loaded");
        Ok(value)
    }

    /// Atomically read, modify and store one or more keys of a namespace.
    ///
    /// Missing or expired keys are loaded from their document (or set to
    /// `default`). `f` receives the values in `keys` order. When it returns
    /// `Ok` every value is stored back as dirty; when it returns `Err` the
    /// cache is left exactly as it was. Keys must be distinct.
    pub fn modify<T, E, F>(
        &self,
        namespace: &str,
        keys: &[&str],
        default: &Value,
        f: F,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce(&mut [Value]) -> Result<T, E>,
    {
        for (index, key) in keys.iter().enumerate() {
            if keys[..index].contains(key) {
                return Err(CacheError::DuplicateKey(key.to_string()).into());
            }
        }

        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();

        let mut loaded: BTreeMap<DocumentName, Document> = BTreeMap::new();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let (cached, document) = match state.entries.get(*key) {
                // A dirty value is newer than disk even once it has gone stale.
                Some(entry) if entry.dirty || entry.is_fresh(ns.config.ttl) => {
                    (Some(entry.data.clone()), entry.document)
                }
                Some(entry) => (None, entry.document),
                None => (None, ns.config.document),
            };
            let value = match cached {
                Some(value) => value,
                None => loaded
                    .entry(document)
                    .or_insert_with(|| self.store.read_or_empty(document))
                    .get(*key)
                    .cloned()
                    .unwrap_or_else(|| default.clone()),
            };
            values.push(value);
        }

        let output = f(values.as_mut_slice())?;

        let incoming = keys
            .iter()
            .filter(|key| !state.entries.contains_key(**key))
            .count();
        self.make_room(&ns, &mut state, incoming, keys);
        for (key, value) in keys.iter().zip(values) {
            match state.entries.get_mut(*key) {
                Some(entry) => entry.refresh(value, true),
                None => {
                    state.entries.insert(
                        key.to_string(),
                        CacheEntry::new(value, true, ns.config.document),
                    );
                }
            }
        }
        Ok(output)
    }

    /// Drop one key (or, with `None`, the whole namespace), writing dirty
    /// entries back first.
    ///
    /// Entries whose write-back fails are kept and the error is returned.
    pub fn invalidate(&self, namespace: &str, key: Option<&str>) -> CacheResult<()> {
        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();
        match key {
            Some(key) => {
                if let Some(entry) = state.entries.get(key) {
                    if entry.dirty {
                        self.write_back_one(key, entry)?;
                    }
                    state.entries.shift_remove(key);
                    debug!(namespace = %ns.name, key, "cache entry invalidated");
                }
                Ok(())
            }
            None => {
                let result = self.write_back_dirty(&ns, &mut state);
                state.entries.retain(|_, entry| entry.dirty);
                debug!(namespace = %ns.name, retained = state.entries.len(), "cache namespace invalidated");
                result.map(|_| ()).map_err(CacheError::from)
            }
        }
    }

    /// Replace a whole document in the store, bypassing the cache.
    ///
    /// Every namespace syncing to `document` stays locked from the flush of
    /// its dirty entries until the write has landed, then drops its entries
    /// for the document. Nothing cached before the call can overwrite the new
    /// contents, and later reads load them from disk. If a flush fails the
    /// document is not written.
    pub fn replace_document(&self, document: DocumentName, contents: &Document) -> CacheResult<()> {
        let mirrors: Vec<Arc<Namespace>> = self
            .all_namespaces()
            .into_iter()
            .filter(|ns| ns.config.document == document)
            .collect();
        // Sorted by name, so concurrent replacements lock in the same order.
        let mut states: Vec<MutexGuard<'_, NamespaceState>> =
            mirrors.iter().map(|ns| ns.lock()).collect();

        for (ns, state) in mirrors.iter().zip(states.iter_mut()) {
            self.write_back_dirty(ns, state)?;
        }
        self.store.write(document, contents)?;

        for (ns, state) in mirrors.iter().zip(states.iter_mut()) {
            state.entries.retain(|_, entry| entry.document != document);
            debug!(namespace = %ns.name, document = %document, "cache entries dropped after document replace");
        }
        Ok(())
    }

    fn lookup(&self, ns: &Namespace, state: &mut NamespaceState, key: &str) -> Option<Value> {
        let entry = state.entries.get(key)?;
        if entry.is_fresh(ns.config.ttl) {
            return Some(entry.data.clone());
        }
        if entry.dirty {
            if let Err(e) = self.write_back_one(key, entry) {
                warn!(namespace = %ns.name, key, error = %e, "stale dirty entry kept: write-back failed");
                return Some(entry.data.clone());
            }
        }
        state.entries.shift_remove(key);
        debug!(namespace = %ns.name, key, "cache entry expired");
        None
    }

    /// Evict in insertion order until `incoming` new entries fit.
    ///
    /// Dirty victims are written back before removal; a victim whose
    /// write-back fails is skipped. If nothing can be evicted the namespace
    /// is allowed to run over capacity until the next successful sync.
    fn make_room(
        &self,
        ns: &Namespace,
        state: &mut NamespaceState,
        incoming: usize,
        protected: &[&str],
    ) {
        let mut unwritable: Vec<String> = Vec::new();
        while state.entries.len() + incoming > ns.config.max_size {
            let victim = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, (key, _))| {
                    !protected.contains(&key.as_str()) && !unwritable.contains(*key)
                })
                .find_map(|(index, (key, entry))| {
                    if !entry.dirty {
                        return Some(Ok(index));
                    }
                    match self.write_back_one(key, entry) {
                        Ok(()) => Some(Ok(index)),
                        Err(e) => Some(Err((key.clone(), e))),
                    }
                });

            match victim {
                Some(Ok(index)) => {
                    if let Some((key, _)) = state.entries.shift_remove_index(index) {
                        debug!(namespace = %ns.name, key = %key, "cache entry evicted");
                    }
                }
                Some(Err((key, e))) => {
                    warn!(namespace = %ns.name, key = %key, error = %e, "eviction skipped: write-back failed");
                    unwritable.push(key);
                }
                None => {
                    warn!(
                        namespace = %ns.name,
                        entries = state.entries.len(),
                        max_size = ns.config.max_size,
                        "no evictable entry; namespace over capacity"
                    );
                    break;
                }
            }
        }
    }

    // ---- Write-back ----

    fn write_back_one(&self, key: &str, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut updates = Document::new();
        updates.insert(key.to_string(), entry.data.clone());
        self.store.merge(entry.document, &updates)
    }

    /// Merge every dirty entry into its document, one write per document,
    /// clearing dirty bits only for documents that were written.
    fn write_back_dirty(
        &self,
        ns: &Namespace,
        state: &mut NamespaceState,
    ) -> Result<SyncReport, StoreError> {
        let mut batches: BTreeMap<DocumentName, Document> = BTreeMap::new();
        for (key, entry) in state.entries.iter().filter(|(_, entry)| entry.dirty) {
            batches
                .entry(entry.document)
                .or_default()
                .insert(key.clone(), entry.data.clone());
        }

        let mut report = SyncReport::default();
        let mut first_error = None;
        for (document, updates) in batches {
            match self.store.merge(document, &updates) {
                Ok(()) => {
                    for key in updates.keys() {
                        if let Some(entry) = state.entries.get_mut(key) {
                            entry.dirty = false;
                        }
                    }
                    report.flushed += updates.len();
                    report.documents += 1;
                }
                Err(e) => {
                    warn!(
                        namespace = %ns.name,
                        document = %document,
                        pending = updates.len(),
                        error = %e,
                        "write-back failed; entries stay dirty"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn sync_locked(&self, ns: &Namespace, state: &mut NamespaceState) -> CacheResult<SyncReport> {
        match self.write_back_dirty(ns, state) {
            Ok(report) => {
                if state.failures > 0 {
                    info!(namespace = %ns.name, after = state.failures, "write-back recovered");
                }
                state.failures = 0;
                state.retry_at = None;
                state.dead_lettered.clear();
                if report.flushed > 0 {
                    debug!(
                        namespace = %ns.name,
                        flushed = report.flushed,
                        documents = report.documents,
                        "namespace synced"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                state.failures = state.failures.saturating_add(1);
                let delay = self.retry.backoff(state.failures);
                state.retry_at = Some(Instant::now() + delay);
                if state.failures >= self.retry.dead_letter_after {
                    self.record_dead_letters(ns, state, &e);
                }
                Err(e.into())
            }
        }
    }

    /// Dead-letter every dirty entry not yet recorded in this failure streak.
    fn record_dead_letters(&self, ns: &Namespace, state: &mut NamespaceState, cause: &StoreError) {
        let fresh: Vec<DeadLetter> = state
            .entries
            .iter()
            .filter(|(key, entry)| entry.dirty && !state.dead_lettered.contains(*key))
            .map(|(key, entry)| DeadLetter {
                namespace: ns.name.clone(),
                document: entry.document,
                key: key.clone(),
                value: entry.data.clone(),
                attempts: state.failures,
                error: cause.to_string(),
                recorded_at: SystemTime::now(),
            })
            .collect();
        if fresh.is_empty() {
            return;
        }

        let recorded = fresh.len();
        let mut dead_letters = self.dead_letters.lock().expect("dead letter lock poisoned");
        for letter in fresh {
            state.dead_lettered.insert(letter.key.clone());
            dead_letters.push_back(letter);
        }
        while dead_letters.len() > self.retry.dead_letter_capacity {
            dead_letters.pop_front();
        }
        error!(
            namespace = %ns.name,
            entries = recorded,
            attempts = state.failures,
            error = %cause,
            "write-back keeps failing; entries dead-lettered and still retried"
        );
    }

    /// Write back every dirty entry of one namespace now, ignoring backoff.
    pub fn sync_namespace(&self, namespace: &str) -> CacheResult<SyncReport> {
        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();
        self.sync_locked(&ns, &mut state)
    }

    /// Background tick: sync unless the namespace is backing off.
    ///
    /// Returns `Ok(None)` when the tick was skipped.
    pub fn sync_due(&self, namespace: &str) -> CacheResult<Option<SyncReport>> {
        let ns = self.namespace(namespace)?;
        let mut state = ns.lock();
        if let Some(retry_at) = state.retry_at {
            if Instant::now() < retry_at {
                debug!(namespace = %ns.name, failures = state.failures, "sync skipped: backing off");
                return Ok(None);
            }
        }
        self.sync_locked(&ns, &mut state).map(Some)
    }

    /// Forced write-back of every namespace, ignoring backoff.
    ///
    /// Every namespace is attempted even if an earlier one fails; the first
    /// error is returned.
    pub fn flush_all(&self) -> CacheResult<SyncReport> {
        let mut total = SyncReport::default();
        let mut first_error = None;
        for ns in self.all_namespaces() {
            let mut state = ns.lock();
            match self.sync_locked(&ns, &mut state) {
                Ok(report) => total.absorb(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    // ---- Introspection ----

    pub fn stats(&self, namespace: &str) -> CacheResult<CacheStats> {
        let ns = self.namespace(namespace)?;
        let state = ns.lock();
        Ok(CacheStats {
            entries: state.entries.len(),
            dirty: state.entries.values().filter(|entry| entry.dirty).count(),
            consecutive_failures: state.failures,
        })
    }

    /// Snapshot of recorded dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .expect("dead letter lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces: Vec<String> = self.all_namespaces().iter().map(|ns| ns.name.clone()).collect();
        f.debug_struct("CacheManager")
            .field("namespaces", &namespaces)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_store::InMemoryDocumentStore;
    use serde_json::json;
    use std::sync::mpsc;

    const NS: &str = "inventories";

    fn config(max_size: usize) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(1000),
            max_size,
            sync_interval: Duration::from_secs(30),
            document: DocumentName::Inventories,
        }
    }

    fn setup(max_size: usize) -> (Arc<InMemoryDocumentStore>, CacheManager) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let cache = CacheManager::new(store.clone());
        cache.register_cache(NS, config(max_size)).unwrap();
        (store, cache)
    }

    fn on_disk(store: &InMemoryDocumentStore, key: &str) -> Option<Value> {
        store.read(DocumentName::Inventories).unwrap().get(key).cloned()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_namespace_is_an_error() {
        let (_, cache) = setup(10);
        let err = cache.get("profiles", "u1").unwrap_err();
        assert!(matches!(err, CacheError::UnknownNamespace(ns) if ns == "profiles"));
    }

    #[test]
    fn namespaces_register_once() {
        let (_, cache) = setup(10);
        let err = cache.register_cache(NS, config(10)).unwrap_err();
        assert!(matches!(err, CacheError::AlreadyRegistered(_)));
        assert!(cache.is_registered(NS));
        assert_eq!(cache.namespaces_for(DocumentName::Inventories), vec![NS.to_string()]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (_, cache) = setup(10);
        let err = cache.register_cache("bounties", config(0)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
    }

    // -----------------------------------------------------------------------
    // get / set / TTL
    // -----------------------------------------------------------------------

    #[test]
    fn set_then_get_returns_value() {
        let (_, cache) = setup(10);
        cache.set(NS, "k", json!({"gold": 1}), true).unwrap();
        assert_eq!(cache.get(NS, "k").unwrap(), Some(json!({"gold": 1})));
        assert_eq!(cache.get(NS, "missing").unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let (_, cache) = setup(10);
        cache.set(NS, "k", json!("v"), false).unwrap();
        assert_eq!(cache.get(NS, "k").unwrap(), Some(json!("v")));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get(NS, "k").unwrap(), None);
        assert_eq!(cache.stats(NS).unwrap().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_dirty_entry_is_written_back_before_removal() {
        let (store, cache) = setup(10);
        cache.set(NS, "k", json!(42), true).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get(NS, "k").unwrap(), None);
        assert_eq!(on_disk(&store, "k"), Some(json!(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_dirty_entry_survives_failed_write_back() {
        let (store, cache) = setup(10);
        cache.set(NS, "k", json!(42), true).unwrap();
        store.set_fail_writes(true);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get(NS, "k").unwrap(), Some(json!(42)));
        assert_eq!(cache.stats(NS).unwrap().dirty, 1);
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    #[test]
    fn eviction_follows_insertion_order_not_reads() {
        let (_, cache) = setup(2);
        cache.set(NS, "a", json!(1), false).unwrap();
        cache.set(NS, "b", json!(2), false).unwrap();
        // Reading and overwriting "a" does not move it to the back.
        cache.get(NS, "a").unwrap();
        cache.set(NS, "a", json!(10), false).unwrap();

        cache.set(NS, "c", json!(3), false).unwrap();

        assert_eq!(cache.get(NS, "a").unwrap(), None);
        assert_eq!(cache.get(NS, "b").unwrap(), Some(json!(2)));
        assert_eq!(cache.get(NS, "c").unwrap(), Some(json!(3)));
    }

    #[test]
    fn dirty_victim_is_flushed_before_eviction() {
        let (store, cache) = setup(1);
        cache.set(NS, "a", json!("pending"), true).unwrap();
        cache.set(NS, "b", json!("new"), true).unwrap();

        assert_eq!(on_disk(&store, "a"), Some(json!("pending")));
        assert_eq!(cache.stats(NS).unwrap().entries, 1);
    }

    #[test]
    fn dirty_victim_is_kept_when_flush_fails() {
        let (store, cache) = setup(1);
        cache.set(NS, "a", json!("pending"), true).unwrap();
        store.set_fail_writes(true);

        cache.set(NS, "b", json!("new"), true).unwrap();

        assert_eq!(cache.get(NS, "a").unwrap(), Some(json!("pending")));
        assert_eq!(cache.stats(NS).unwrap().entries, 2);
    }

    // -----------------------------------------------------------------------
    // get_or_load
    // -----------------------------------------------------------------------

    #[test]
    fn get_or_load_caches_clean_values() {
        let (store, cache) = setup(10);
        let mut document = Document::new();
        document.insert("u1".into(), json!({"items": {}}));
        store.write(DocumentName::Inventories, &document).unwrap();

        let loaded = cache
            .get_or_load(NS, "u1", DocumentName::Inventories, json!(null))
            .unwrap();
        assert_eq!(loaded, json!({"items": {}}));
        let stats = cache.stats(NS).unwrap();
        assert_eq!((stats.entries, stats.dirty), (1, 0));
    }

    #[test]
    fn get_or_load_uses_default_for_absent_keys() {
        let (_, cache) = setup(10);
        let loaded = cache
            .get_or_load(NS, "nobody", DocumentName::Inventories, json!({"fresh": true}))
            .unwrap();
        assert_eq!(loaded, json!({"fresh": true}));
        assert_eq!(cache.get(NS, "nobody").unwrap(), Some(json!({"fresh": true})));
    }

    #[test]
    fn get_or_load_prefers_cached_value() {
        let (_, cache) = setup(10);
        cache.set(NS, "u1", json!("cached"), true).unwrap();
        let value = cache
            .get_or_load(NS, "u1", DocumentName::Inventories, json!("default"))
            .unwrap();
        assert_eq!(value, json!("cached"));
    }

    // -----------------------------------------------------------------------
    // invalidate
    // -----------------------------------------------------------------------

    #[test]
    fn invalidate_key_flushes_dirty_entry() {
        let (store, cache) = setup(10);
        cache.set(NS, "u1", json!(5), true).unwrap();
        cache.invalidate(NS, Some("u1")).unwrap();

        assert_eq!(cache.stats(NS).unwrap().entries, 0);
        assert_eq!(on_disk(&store, "u1"), Some(json!(5)));
    }

    #[test]
    fn invalidate_namespace_flushes_and_clears() {
        let (store, cache) = setup(10);
        cache.set(NS, "u1", json!(1), true).unwrap();
        cache.set(NS, "u2", json!(2), false).unwrap();
        cache.invalidate(NS, None).unwrap();

        assert_eq!(cache.stats(NS).unwrap().entries, 0);
        assert_eq!(on_disk(&store, "u1"), Some(json!(1)));
        assert_eq!(on_disk(&store, "u2"), None);
    }

    #[test]
    fn failed_invalidate_keeps_dirty_entries() {
        let (store, cache) = setup(10);
        cache.set(NS, "u1", json!(1), true).unwrap();
        cache.set(NS, "u2", json!(2), false).unwrap();
        store.set_fail_writes(true);

        assert!(cache.invalidate(NS, Some("u1")).is_err());
        assert!(cache.invalidate(NS, None).is_err());

        let stats = cache.stats(NS).unwrap();
        assert_eq!((stats.entries, stats.dirty), (1, 1));
    }

    /// Pauses the first whole-document write until released.
    struct GatedStore {
        inner: InMemoryDocumentStore,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl DocumentStore for GatedStore {
        fn read(&self, name: DocumentName) -> Result<Document, StoreError> {
            self.inner.read(name)
        }

        fn write(&self, name: DocumentName, document: &Document) -> Result<(), StoreError> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                let release = self.release.lock().unwrap().take().unwrap();
                release.recv().unwrap();
            }
            self.inner.write(name, document)
        }

        fn merge(&self, name: DocumentName, updates: &Document) -> Result<(), StoreError> {
            self.inner.merge(name, updates)
        }
    }

    #[test]
    fn replace_document_is_not_overwritten_by_concurrent_modify() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: InMemoryDocumentStore::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let cache = Arc::new(CacheManager::new(store.clone()));
        cache.register_cache(NS, config(10)).unwrap();
        cache.set(NS, "u", json!(5), true).unwrap();

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let mut document = Document::new();
                document.insert("u".into(), json!(40));
                cache.replace_document(DocumentName::Inventories, &document)
            })
        };
        entered_rx.recv().unwrap();

        let adder = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                cache.modify(NS, &["u"], &json!(0), |values| {
                    let current = values[0].as_i64().unwrap_or(0);
                    values[0] = json!(current + 1);
                    Ok::<_, CacheError>(())
                })
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!adder.is_finished(), "modify ran while the document was being replaced");

        release_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();
        adder.join().unwrap().unwrap();

        cache.flush_all().unwrap();
        assert_eq!(on_disk(&store.inner, "u"), Some(json!(41)));
    }

    #[test]
    fn replace_document_aborts_when_flush_fails() {
        let (store, cache) = setup(10);
        cache.set(NS, "u", json!(5), true).unwrap();
        store.set_fail_writes(true);

        let mut document = Document::new();
        document.insert("u".into(), json!(40));
        assert!(cache.replace_document(DocumentName::Inventories, &document).is_err());
        assert_eq!(cache.get(NS, "u").unwrap(), Some(json!(5)));
        assert_eq!(cache.stats(NS).unwrap().dirty, 1);

        store.set_fail_writes(false);
        cache.replace_document(DocumentName::Inventories, &document).unwrap();
        assert_eq!(cache.stats(NS).unwrap().entries, 0);
        assert_eq!(cache.get_or_load(NS, "u", DocumentName::Inventories, json!(0)).unwrap(), json!(40));
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    #[test]
    fn sync_writes_each_document_once_and_merges() {
        let (store, cache) = setup(10);
        cache.register_cache("profiles", CacheConfig::for_document(DocumentName::Profiles)).unwrap();
        let mut external = Document::new();
        external.insert("outsider".into(), json!("untouched"));
        store.write(DocumentName::Inventories, &external).unwrap();
        let writes_before = store.write_count();

        cache.set(NS, "u1", json!(1), true).unwrap();
        cache.set(NS, "u2", json!(2), true).unwrap();
        cache.set(NS, "u3", json!(3), false).unwrap();
        cache.set("profiles", "u1", json!({"bio": "hi"}), true).unwrap();

        let report = cache.flush_all().unwrap();
        assert_eq!(report, SyncReport { flushed: 3, documents: 2 });
        assert_eq!(store.write_count() - writes_before, 2);

        assert_eq!(on_disk(&store, "outsider"), Some(json!("untouched")));
        assert_eq!(on_disk(&store, "u2"), Some(json!(2)));
        assert_eq!(on_disk(&store, "u3"), None);
        assert_eq!(cache.stats(NS).unwrap().dirty, 0);
    }

    #[test]
    fn forced_flush_matches_last_set_values() {
        let (store, cache) = setup(100);
        for round in 0..3 {
            for user in 0..10 {
                cache
                    .set(NS, &format!("u{user}"), json!(round * 100 + user), true)
                    .unwrap();
            }
        }
        cache.flush_all().unwrap();

        let document = store.read(DocumentName::Inventories).unwrap();
        for user in 0..10 {
            assert_eq!(document.get(&format!("u{user}")), Some(&json!(200 + user)));
        }
    }

    #[test]
    fn failed_sync_keeps_entries_dirty_for_retry() {
        let (store, cache) = setup(10);
        cache.set(NS, "u1", json!(1), true).unwrap();
        store.set_fail_writes(true);

        assert!(cache.sync_namespace(NS).is_err());
        let stats = cache.stats(NS).unwrap();
        assert_eq!((stats.dirty, stats.consecutive_failures), (1, 1));

        store.set_fail_writes(false);
        let report = cache.sync_namespace(NS).unwrap();
        assert_eq!(report.flushed, 1);
        assert_eq!(cache.stats(NS).unwrap().consecutive_failures, 0);
        assert_eq!(on_disk(&store, "u1"), Some(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn background_ticks_back_off_after_failure() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let cache = CacheManager::with_retry_policy(
            store.clone(),
            RetryPolicy {
                base: Duration::from_secs(10),
                max: Duration::from_secs(60),
                dead_letter_after: 2,
                dead_letter_capacity: 8,
            },
        );
        cache.register_cache(NS, config(10)).unwrap();
        cache.set(NS, "u1", json!(1), true).unwrap();
        store.set_fail_writes(true);

        assert!(cache.sync_due(NS).is_err());
        // Inside the backoff window the tick is skipped entirely.
        assert_eq!(cache.sync_due(NS).unwrap(), None);
        assert!(cache.dead_letters().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.sync_due(NS).is_err());

        let dead = cache.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, "u1");
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].value, json!(1));

        store.set_fail_writes(false);
        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(cache.sync_due(NS).unwrap().unwrap().flushed, 1);
        assert_eq!(on_disk(&store, "u1"), Some(json!(1)));
    }

    #[test]
    fn keys_dirtied_after_threshold_are_dead_lettered_once() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let cache = CacheManager::with_retry_policy(
            store.clone(),
            RetryPolicy {
                dead_letter_after: 2,
                ..RetryPolicy::default()
            },
        );
        cache.register_cache(NS, config(10)).unwrap();
        store.set_fail_writes(true);

        cache.set(NS, "u1", json!(1), true).unwrap();
        for _ in 0..2 {
            assert!(cache.sync_namespace(NS).is_err());
        }
        cache.set(NS, "u2", json!(2), true).unwrap();
        for _ in 0..10 {
            assert!(cache.sync_namespace(NS).is_err());
        }

        let keys: Vec<String> = cache.dead_letters().into_iter().map(|d| d.key).collect();
        assert_eq!(keys, ["u1", "u2"]);
        assert_eq!(cache.dead_letters()[1].attempts, 3);
        assert_eq!(cache.stats(NS).unwrap().consecutive_failures, 12);

        // A successful sync ends the streak; the next one records afresh.
        store.set_fail_writes(false);
        cache.sync_namespace(NS).unwrap();
        cache.set(NS, "u1", json!(10), true).unwrap();
        store.set_fail_writes(true);
        for _ in 0..2 {
            assert!(cache.sync_namespace(NS).is_err());
        }
        let dead = cache.dead_letters();
        assert_eq!(dead.len(), 3);
        assert_eq!((dead[2].key.as_str(), &dead[2].value), ("u1", &json!(10)));
    }

    // -----------------------------------------------------------------------
    // modify
    // -----------------------------------------------------------------------

    #[test]
    fn modify_loads_updates_and_marks_dirty() {
        let (store, cache) = setup(10);
        let mut document = Document::new();
        document.insert("a".into(), json!(10));
        store.write(DocumentName::Inventories, &document).unwrap();

        let sum: Result<i64, CacheError> = cache.modify(NS, &["a", "b"], &json!(0), |values| {
            let a = values[0].as_i64().unwrap_or(0);
            values[0] = json!(a - 3);
            values[1] = json!(3);
            Ok(a)
        });
        assert_eq!(sum.unwrap(), 10);
        assert_eq!(cache.get(NS, "a").unwrap(), Some(json!(7)));
        assert_eq!(cache.get(NS, "b").unwrap(), Some(json!(3)));
        assert_eq!(cache.stats(NS).unwrap().dirty, 2);
    }

    #[test]
    fn modify_error_leaves_cache_untouched() {
        let (_, cache) = setup(10);
        cache.set(NS, "a", json!(1), false).unwrap();

        let result: Result<(), CacheError> = cache.modify(NS, &["a"], &json!(0), |values| {
            values[0] = json!(999);
            Err(CacheError::UnknownNamespace("forced".into()))
        });
        assert!(result.is_err());
        assert_eq!(cache.get(NS, "a").unwrap(), Some(json!(1)));
        assert_eq!(cache.stats(NS).unwrap().dirty, 0);
    }

    #[test]
    fn modify_rejects_duplicate_keys() {
        let (_, cache) = setup(10);
        let result: Result<(), CacheError> =
            cache.modify(NS, &["a", "a"], &json!(0), |_| Ok(()));
        assert!(matches!(result, Err(CacheError::DuplicateKey(k)) if k == "a"));
    }

    #[test]
    fn modify_never_evicts_its_own_keys() {
        let (_, cache) = setup(2);
        cache.set(NS, "old", json!(0), false).unwrap();
        let result: Result<(), CacheError> =
            cache.modify(NS, &["a", "b"], &json!(0), |values| {
                values[0] = json!(1);
                values[1] = json!(2);
                Ok(())
            });
        result.unwrap();
        assert_eq!(cache.get(NS, "old").unwrap(), None);
        assert_eq!(cache.get(NS, "a").unwrap(), Some(json!(1)));
        assert_eq!(cache.get(NS, "b").unwrap(), Some(json!(2)));
    }
}
