use std::sync::Arc;

use coffer_cache::{CacheManager, CacheStats, DeadLetter, SyncHandle, SyncReport};
use coffer_inventory::{
    AddOutcome, InventoryConfig, InventoryStore, Offer, RemoveOutcome, SwapOutcome,
    TransferOutcome,
};
use coffer_lock::TransactionLockManager;
use coffer_store::{validate_document_name, Document, DocumentName, DocumentStore, JsonFileStore};
use coffer_types::{Inventory, ItemCatalog, ItemId, UserId};
use tracing::{debug, error, info, warn};

use crate::config::{EconomyConfig, INVENTORY_NAMESPACE};
use crate::error::EconomyResult;

/// One handle over the whole persistence and transaction layer.
///
/// Owns the document store, cache, lock manager and inventory store; there
/// are no globals. Background write-back runs only after
/// [`start_sync`](Self::start_sync), and [`shutdown`](Self::shutdown) must be
/// awaited to guarantee every pending write reaches disk.
pub struct Economy {
    config: EconomyConfig,
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheManager>,
    locks: Arc<TransactionLockManager>,
    inventory: InventoryStore,
    sync: Option<SyncHandle>,
    closed: bool,
}

impl Economy {
    /// Open an economy backed by JSON files under `config.data_dir`.
    pub fn open(config: EconomyConfig) -> EconomyResult<Self> {
        config.validate()?;
        let store = Arc::new(JsonFileStore::open(&config.data_dir)?);
        Self::with_store(config, store)
    }

    /// Open an economy over an arbitrary document store.
    pub fn with_store(config: EconomyConfig, store: Arc<dyn DocumentStore>) -> EconomyResult<Self> {
        config.validate()?;
        let catalog = match &config.catalog_path {
            Some(path) => ItemCatalog::from_json_str(&std::fs::read_to_string(path)?)?,
            None => ItemCatalog::builtin(),
        };

        let cache = Arc::new(CacheManager::with_retry_policy(
            Arc::clone(&store),
            config.retry.to_policy(),
        ));
        for (name, ns) in &config.namespaces {
            cache.register_cache(name, ns.to_cache_config())?;
        }

        let locks = Arc::new(TransactionLockManager::new());
        let inventory = InventoryStore::new(
            Arc::clone(&cache),
            Arc::clone(&locks),
            Arc::new(catalog),
            InventoryConfig {
                namespace: INVENTORY_NAMESPACE.to_string(),
                document: DocumentName::Inventories,
                default_max_weight: config.default_max_weight,
            },
        );

        info!(
            data_dir = %config.data_dir.display(),
            namespaces = config.namespaces.len(),
            items = inventory.catalog().len(),
            "economy opened"
        );
        Ok(Self {
            config,
            store,
            cache,
            locks,
            inventory,
            sync: None,
            closed: false,
        })
    }

    /// Start the background write-back tasks. Must be called from inside a
    /// tokio runtime. Returns the number of tasks running.
    pub fn start_sync(&mut self) -> usize {
        let handle = self.sync.get_or_insert_with(|| self.cache.spawn_sync());
        handle.task_count()
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<TransactionLockManager> {
        &self.locks
    }

    pub fn inventory(&self) -> &InventoryStore {
        &self.inventory
    }

    // ---- Named documents ----

    /// Read a whole document by name (`"bounties"` or `"bounties.json"`).
    ///
    /// Pending cached writes for the document are flushed first so the
    /// result reflects them. Unreadable documents read as empty.
    pub fn read_named_document(&self, name: &str) -> EconomyResult<Document> {
        let document = validate_document_name(name)?;
        for namespace in self.cache.namespaces_for(document) {
            if let Err(e) = self.cache.sync_namespace(&namespace) {
                warn!(namespace = %namespace, error = %e, "flush before document read failed");
            }
        }
        Ok(self.store.read_or_empty(document))
    }

    /// Replace a whole document by name. Returns whether the write landed.
    ///
    /// Cache namespaces mirroring the document are flushed and held locked
    /// until the write lands, then dropped, so stale cached state can neither
    /// overwrite this write nor be served after it.
    pub fn write_named_document(&self, name: &str, contents: &Document) -> bool {
        let document = match validate_document_name(name) {
            Ok(document) => document,
            Err(e) => {
                warn!(name, error = %e, "rejected document write");
                return false;
            }
        };
        match self.cache.replace_document(document, contents) {
            Ok(()) => {
                debug!(document = %document, keys = contents.len(), "document written");
                true
            }
            Err(e) => {
                error!(document = %document, error = %e, "document write failed");
                false
            }
        }
    }

    // ---- Inventory ----

    pub fn get_inventory(&self, user: &UserId) -> Inventory {
        self.inventory.get_inventory(user)
    }

    pub fn get_item_quantity(&self, user: &UserId, item: &ItemId) -> u64 {
        self.inventory.get_item_quantity(user, item)
    }

    pub fn add_item(&self, user: &UserId, item: &ItemId, quantity: u64) -> EconomyResult<AddOutcome> {
        Ok(self.inventory.add_item(user, item, quantity)?)
    }

    pub fn remove_item(
        &self,
        user: &UserId,
        item: &ItemId,
        quantity: u64,
    ) -> EconomyResult<RemoveOutcome> {
        Ok(self.inventory.remove_item(user, item, quantity)?)
    }

    pub async fn transfer_item(
        &self,
        from: &UserId,
        to: &UserId,
        item: &ItemId,
        quantity: u64,
    ) -> EconomyResult<TransferOutcome> {
        Ok(self.inventory.transfer_item(from, to, item, quantity).await?)
    }

    pub async fn swap_items(
        &self,
        first: &UserId,
        first_gives: &Offer,
        second: &UserId,
        second_gives: &Offer,
    ) -> EconomyResult<SwapOutcome> {
        Ok(self
            .inventory
            .swap_items(first, first_gives, second, second_gives)
            .await?)
    }

    pub fn upgrade_capacity(&self, user: &UserId, new_capacity: f64) -> EconomyResult<f64> {
        Ok(self.inventory.upgrade_backpack(user, new_capacity)?)
    }

    // ---- Lifecycle ----

    /// Write every dirty cache entry back now.
    pub fn flush(&self) -> EconomyResult<SyncReport> {
        Ok(self.cache.flush_all()?)
    }

    pub fn stats(&self, namespace: &str) -> EconomyResult<CacheStats> {
        Ok(self.cache.stats(namespace)?)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.cache.dead_letters()
    }

    /// Stop background sync and flush everything to completion.
    pub async fn shutdown(mut self) -> EconomyResult<SyncReport> {
        let report = match self.sync.take() {
            Some(handle) => handle.shutdown().await?,
            None => self.cache.flush_all()?,
        };
        self.closed = true;
        info!(flushed = report.flushed, documents = report.documents, "economy shut down");
        Ok(report)
    }
}

impl Drop for Economy {
    /// Best-effort flush for an economy dropped without [`Economy::shutdown`].
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.cache.flush_all() {
            Ok(report) if report.flushed > 0 => warn!(
                flushed = report.flushed,
                "economy dropped without shutdown; pending writes flushed"
            ),
            Ok(_) => {}
            Err(e) => error!(
                error = %e,
                "economy dropped without shutdown; pending writes could not be flushed"
            ),
        }
    }
}

impl std::fmt::Debug for Economy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Economy")
            .field("data_dir", &self.config.data_dir)
            .field("syncing", &self.sync.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EconomyError;
    use coffer_inventory::InventoryError;
    use serde_json::json;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn item(id: &str) -> ItemId {
        ItemId::new(id).unwrap()
    }

    fn open(dir: &std::path::Path) -> Economy {
        Economy::open(EconomyConfig::with_data_dir(dir)).unwrap()
    }

    // ------------------------------------------------------------------
    // Named documents
    // ------------------------------------------------------------------

    #[test]
    fn missing_document_reads_empty_and_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let economy = open(dir.path());
        assert!(economy.read_named_document("bounties.json").unwrap().is_empty());
        assert!(dir.path().join("bounties.json").exists());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let economy = open(dir.path());
        let err = economy.read_named_document("../secrets.json").unwrap_err();
        assert!(matches!(err, EconomyError::Store(ref e) if e.is_validation()));
        assert!(!economy.write_named_document("secrets", &Document::new()));
    }

    #[test]
    fn direct_write_is_not_clobbered_by_cache() {
        let dir = tempfile::tempdir().unwrap();
        let economy = open(dir.path());
        economy.add_item(&user("u"), &item("gold"), 5).unwrap();

        let mut doc = economy.read_named_document("inventories").unwrap();
        assert_eq!(doc["u"]["items"]["gold"], json!(5));

        doc.insert(
            "u".into(),
            json!({ "items": { "gold": 40 }, "weight": 40.0, "maxWeight": 100.0 }),
        );
        assert!(economy.write_named_document("inventories.json", &doc));
        assert_eq!(economy.get_item_quantity(&user("u"), &item("gold")), 40);

        economy.flush().unwrap();
        let on_disk = economy.read_named_document("inventories").unwrap();
        assert_eq!(on_disk["u"]["items"]["gold"], json!(40));
    }

    // ------------------------------------------------------------------
    // Inventory through the facade
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn inventory_operations_and_user_messages() {
        let dir = tempfile::tempdir().unwrap();
        let economy = open(dir.path());

        let err = economy.add_item(&user("a"), &item("gold"), 150).unwrap_err();
        assert!(err.user_message().contains("capacity"));

        economy.add_item(&user("a"), &item("token"), 10).unwrap();
        economy.add_item(&user("b"), &item("gold"), 100).unwrap();
        let err = economy
            .transfer_item(&user("a"), &user("b"), &item("token"), 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EconomyError::Inventory(InventoryError::CapacityExceeded { .. })
        ));
        assert_eq!(economy.get_item_quantity(&user("a"), &item("token")), 10);

        assert_eq!(economy.upgrade_capacity(&user("b"), 200.0).unwrap(), 200.0);
        economy
            .transfer_item(&user("a"), &user("b"), &item("token"), 10)
            .await
            .unwrap();
        assert_eq!(economy.get_item_quantity(&user("b"), &item("token")), 10);

        let err = economy.remove_item(&user("a"), &item("token"), 1).unwrap_err();
        assert_eq!(err.user_message(), "You need 1 but only have 0.");
    }

    #[tokio::test]
    async fn shutdown_persists_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut economy = open(dir.path());
        assert_eq!(economy.start_sync(), EconomyConfig::default().namespaces.len());

        economy.add_item(&user("a"), &item("wood"), 3).unwrap();
        assert_eq!(economy.stats(INVENTORY_NAMESPACE).unwrap().dirty, 1);

        let report = economy.shutdown().await.unwrap();
        assert_eq!(report.flushed, 1);

        let reopened = open(dir.path());
        assert_eq!(reopened.get_item_quantity(&user("a"), &item("wood")), 3);
        assert_eq!(reopened.get_inventory(&user("a")).weight(), 6.0);
    }

    #[tokio::test]
    async fn dropping_without_shutdown_still_flushes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut economy = open(dir.path());
            economy.start_sync();
            economy.add_item(&user("a"), &item("iron"), 2).unwrap();
            assert_eq!(economy.stats(INVENTORY_NAMESPACE).unwrap().dirty, 1);
        }

        let reopened = open(dir.path());
        assert_eq!(reopened.get_item_quantity(&user("a"), &item("iron")), 2);
        assert_eq!(reopened.get_inventory(&user("a")).weight(), 6.0);
    }

    #[test]
    fn custom_catalog_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("items.json");
        std::fs::write(
            &catalog,
            r#"{ "feather": { "name": "Feather", "weight": 0.01, "stackable": true } }"#,
        )
        .unwrap();
        let mut config = EconomyConfig::with_data_dir(dir.path().join("data"));
        config.catalog_path = Some(catalog);

        let economy = Economy::open(config).unwrap();
        assert_eq!(economy.inventory().catalog().len(), 1);
        assert!(economy.add_item(&user("u"), &item("feather"), 10).is_ok());
        assert!(economy.add_item(&user("u"), &item("gold"), 1).is_err());
    }
}
