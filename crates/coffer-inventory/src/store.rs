use std::sync::Arc;

use coffer_cache::CacheManager;
use coffer_lock::TransactionLockManager;
use coffer_store::DocumentName;
use coffer_types::{
    Inventory, ItemCatalog, ItemDefinition, ItemId, UserId, DEFAULT_MAX_WEIGHT, WEIGHT_EPSILON,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{InventoryError, InventoryResult};
use crate::outcome::{AddOutcome, Offer, RemoveOutcome, SwapOutcome, TransferOutcome};

/// Where inventories live and how new ones start.
#[derive(Clone, Debug, PartialEq)]
pub struct InventoryConfig {
    /// Cache namespace holding inventories. Must already be registered.
    pub namespace: String,
    /// Document the namespace syncs to.
    pub document: DocumentName,
    /// Capacity of an inventory created on first access.
    pub default_max_weight: f64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            namespace: DocumentName::Inventories.as_str().to_string(),
            document: DocumentName::Inventories,
            default_max_weight: DEFAULT_MAX_WEIGHT,
        }
    }
}

/// Inventory operations over the write-back cache.
pub struct InventoryStore {
    cache: Arc<CacheManager>,
    locks: Arc<TransactionLockManager>,
    catalog: Arc<ItemCatalog>,
    config: InventoryConfig,
}

impl InventoryStore {
    pub fn new(
        cache: Arc<CacheManager>,
        locks: Arc<TransactionLockManager>,
        catalog: Arc<ItemCatalog>,
        config: InventoryConfig,
    ) -> Self {
        Self {
            cache,
            locks,
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    // ---- Reads ----

    /// Current inventory of `user`. Never fails: persistence problems yield
    /// a fresh default inventory.
    pub fn get_inventory(&self, user: &UserId) -> Inventory {
        match self.cache.get_or_load(
            &self.config.namespace,
            user.as_str(),
            self.config.document,
            self.default_value(),
        ) {
            Ok(value) => self.decode(user, &value),
            Err(e) => {
                warn!(user = %user, error = %e, "inventory read failed, using default");
                Inventory::with_capacity(self.config.default_max_weight)
            }
        }
    }

    pub fn get_item_quantity(&self, user: &UserId, item: &ItemId) -> u64 {
        self.get_inventory(user).quantity(item)
    }

    // ---- Single-user mutations ----

    /// Add `quantity` units of `item`, rejecting the whole request if it
    /// would push the inventory past its capacity.
    pub fn add_item(&self, user: &UserId, item: &ItemId, quantity: u64) -> InventoryResult<AddOutcome> {
        require_positive(quantity)?;
        let def = self.definition(item)?;
        let outcome = self.with_inventory(user, |inv| {
            self.apply_add(inv, item, def, quantity)?;
            Ok(AddOutcome {
                quantity: inv.quantity(item),
                weight: inv.weight(),
                max_weight: inv.max_weight(),
            })
        })?;
        debug!(user = %user, item = %item, quantity, weight = outcome.weight, "item added");
        Ok(outcome)
    }

    /// Remove `quantity` units of `item`, pruning the entry at zero.
    pub fn remove_item(
        &self,
        user: &UserId,
        item: &ItemId,
        quantity: u64,
    ) -> InventoryResult<RemoveOutcome> {
        require_positive(quantity)?;
        let outcome = self.with_inventory(user, |inv| {
            self.apply_remove(inv, item, quantity)?;
            Ok(RemoveOutcome {
                remaining: inv.quantity(item),
                weight: inv.weight(),
            })
        })?;
        debug!(user = %user, item = %item, quantity, remaining = outcome.remaining, "item removed");
        Ok(outcome)
    }

    /// Raise the capacity of `user` to `new_capacity` and return it.
    pub fn upgrade_backpack(&self, user: &UserId, new_capacity: f64) -> InventoryResult<f64> {
        if !new_capacity.is_finite() {
            return Err(InventoryError::Validation(format!(
                "capacity must be a finite number, got {new_capacity}"
            )));
        }
        let capacity = self.with_inventory(user, |inv| {
            let current = inv.max_weight();
            if !inv.raise_capacity(new_capacity) {
                return Err(InventoryError::CapacityNotIncreased {
                    current,
                    requested: new_capacity,
                });
            }
            Ok(inv.max_weight())
        })?;
        info!(user = %user, capacity, "backpack upgraded");
        Ok(capacity)
    }

    // ---- Multi-party operations ----

    /// Move `quantity` units of `item` from one user to another.
    ///
    /// Holds the transaction lock for the pair and validates both sides
    /// before committing either, so a rejected transfer changes nothing.
    pub async fn transfer_item(
        &self,
        from: &UserId,
        to: &UserId,
        item: &ItemId,
        quantity: u64,
    ) -> InventoryResult<TransferOutcome> {
        if from == to {
            return Err(InventoryError::Validation(
                "cannot transfer to the same user".into(),
            ));
        }
        require_positive(quantity)?;
        let def = self.definition(item)?;

        let guard = self.locks.acquire([from.as_str(), to.as_str()]).await?;
        let result = self.with_pair(from, to, |sender, recipient| {
            self.apply_remove(sender, item, quantity)?;
            self.apply_add(recipient, item, def, quantity)?;
            Ok(TransferOutcome {
                from_remaining: sender.quantity(item),
                from_weight: sender.weight(),
                to_quantity: recipient.quantity(item),
                to_weight: recipient.weight(),
            })
        });
        guard.release();

        match &result {
            Ok(_) => info!(from = %from, to = %to, item = %item, quantity, "item transferred"),
            Err(e) => debug!(from = %from, to = %to, item = %item, quantity, error = %e, "transfer rejected"),
        }
        result
    }

    /// Trade between two users: `first` hands over `first_gives` and
    /// receives `second_gives`. Capacity is checked on each side after the
    /// exchange.
    pub async fn swap_items(
        &self,
        first: &UserId,
        first_gives: &Offer,
        second: &UserId,
        second_gives: &Offer,
    ) -> InventoryResult<SwapOutcome> {
        if first == second {
            return Err(InventoryError::Validation(
                "cannot trade with the same user".into(),
            ));
        }
        require_positive(first_gives.quantity)?;
        require_positive(second_gives.quantity)?;
        let first_def = self.definition(&first_gives.item)?;
        let second_def = self.definition(&second_gives.item)?;

        let guard = self.locks.acquire([first.as_str(), second.as_str()]).await?;
        let result = self.with_pair(first, second, |a, b| {
            self.apply_remove(a, &first_gives.item, first_gives.quantity)?;
            self.apply_remove(b, &second_gives.item, second_gives.quantity)?;
            self.apply_add(a, &second_gives.item, second_def, second_gives.quantity)?;
            self.apply_add(b, &first_gives.item, first_def, first_gives.quantity)?;
            Ok(SwapOutcome {
                first: a.clone(),
                second: b.clone(),
            })
        });
        guard.release();

        if result.is_ok() {
            info!(first = %first, second = %second, "items swapped");
        }
        result
    }

    // ---- Internals ----

    fn definition(&self, item: &ItemId) -> InventoryResult<&ItemDefinition> {
        self.catalog
            .get(item)
            .ok_or_else(|| InventoryError::UnknownItem(item.to_string()))
    }

    /// Validate and apply an addition. Leaves `inv` untouched on error.
    fn apply_add(
        &self,
        inv: &mut Inventory,
        item: &ItemId,
        def: &ItemDefinition,
        quantity: u64,
    ) -> InventoryResult<()> {
        let held = inv.quantity(item);
        let target = held.checked_add(quantity).ok_or_else(|| {
            InventoryError::Validation(format!("quantity overflow for {item}"))
        })?;
        if !def.stackable && target > 1 {
            return Err(InventoryError::Validation(format!(
                "{} cannot be stacked",
                def.name
            )));
        }
        let attempted = def.weight * quantity as f64;
        if inv.weight() + attempted > inv.max_weight() + WEIGHT_EPSILON {
            return Err(InventoryError::CapacityExceeded {
                current: inv.weight(),
                attempted,
                max: inv.max_weight(),
            });
        }
        inv.set_quantity(&self.catalog, item, target);
        Ok(())
    }

    /// Validate and apply a removal. Leaves `inv` untouched on error.
    fn apply_remove(&self, inv: &mut Inventory, item: &ItemId, quantity: u64) -> InventoryResult<()> {
        let held = inv.quantity(item);
        if held < quantity {
            return Err(InventoryError::InsufficientQuantity {
                held,
                requested: quantity,
            });
        }
        inv.set_quantity(&self.catalog, item, held - quantity);
        Ok(())
    }

    /// Run `f` on a decoded copy of one inventory and store it back only if
    /// `f` succeeds.
    fn with_inventory<T, F>(&self, user: &UserId, f: F) -> InventoryResult<T>
    where
        F: FnOnce(&mut Inventory) -> InventoryResult<T>,
    {
        let default = self.default_value();
        self.cache
            .modify(&self.config.namespace, &[user.as_str()], &default, |values| {
                let mut inv = self.decode(user, &values[0]);
                let output = f(&mut inv)?;
                values[0] = serde_json::to_value(&inv)?;
                Ok(output)
            })
    }

    /// Two-inventory variant of [`with_inventory`](Self::with_inventory):
    /// both are stored back, or neither.
    fn with_pair<T, F>(&self, first: &UserId, second: &UserId, f: F) -> InventoryResult<T>
    where
        F: FnOnce(&mut Inventory, &mut Inventory) -> InventoryResult<T>,
    {
        let default = self.default_value();
        self.cache.modify(
            &self.config.namespace,
            &[first.as_str(), second.as_str()],
            &default,
            |values| {
                let mut a = self.decode(first, &values[0]);
                let mut b = self.decode(second, &values[1]);
                let output = f(&mut a, &mut b)?;
                values[0] = serde_json::to_value(&a)?;
                values[1] = serde_json::to_value(&b)?;
                Ok(output)
            },
        )
    }

    fn default_value(&self) -> Value {
        json!({
            "items": {},
            "weight": 0.0,
            "maxWeight": self.config.default_max_weight,
        })
    }

    /// Parse a stored inventory and recompute its weight. Unreadable
    /// records fall back to a fresh inventory.
    fn decode(&self, user: &UserId, value: &Value) -> Inventory {
        let mut inv = match serde_json::from_value::<Inventory>(value.clone()) {
            Ok(inv) => inv,
            Err(e) => {
                warn!(user = %user, error = %e, "malformed inventory record, using default");
                return Inventory::with_capacity(self.config.default_max_weight);
            }
        };
        if value.get("maxWeight").is_none() {
            inv.raise_capacity(self.config.default_max_weight);
        }
        inv.normalize(&self.catalog);
        inv
    }
}

impl std::fmt::Debug for InventoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryStore")
            .field("namespace", &self.config.namespace)
            .field("items", &self.catalog.len())
            .finish()
    }
}

fn require_positive(quantity: u64) -> InventoryResult<()> {
    if quantity == 0 {
        return Err(InventoryError::Validation(
            "quantity must be positive".into(),
        ));
    }
    Ok(())
}
