use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ItemId;
use crate::item::ItemCatalog;

/// Capacity given to an inventory on first access.
pub const DEFAULT_MAX_WEIGHT: f64 = 100.0;

/// Tolerance used when comparing accumulated floating-point weights.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// A single user's holdings.
///
/// `weight` is never set directly: every mutation goes through
/// [`Inventory::set_quantity`] or [`Inventory::normalize`], which recompute it
/// from the catalogue. `max_weight` only moves upward through
/// [`Inventory::raise_capacity`].
///
/// Serialized form (one value of the `inventories` document):
///
/// ```json
/// { "items": { "gold": 12 }, "weight": 12.0, "maxWeight": 100.0 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    items: BTreeMap<ItemId, u64>,
    #[serde(default)]
    weight: f64,
    #[serde(rename = "maxWeight", default = "default_max_weight")]
    max_weight: f64,
}

fn default_max_weight() -> f64 {
    DEFAULT_MAX_WEIGHT
}

impl Default for Inventory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_WEIGHT)
    }
}

impl Inventory {
    /// An empty inventory with the given capacity.
    pub fn with_capacity(max_weight: f64) -> Self {
        Self {
            items: BTreeMap::new(),
            weight: 0.0,
            max_weight,
        }
    }

    pub fn items(&self) -> &BTreeMap<ItemId, u64> {
        &self.items
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn max_weight(&self) -> f64 {
        self.max_weight
    }

    /// Held quantity of `item`, zero when absent.
    pub fn quantity(&self, item: &ItemId) -> u64 {
        self.items.get(item).copied().unwrap_or(0)
    }

    /// Σ unit weight × quantity over the held items.
    pub fn derived_weight(&self, catalog: &ItemCatalog) -> f64 {
        self.items
            .iter()
            .map(|(item, qty)| catalog.unit_weight(item) * *qty as f64)
            .sum()
    }

    /// Set the quantity of `item`, pruning it at zero, and recompute weight.
    pub fn set_quantity(&mut self, catalog: &ItemCatalog, item: &ItemId, quantity: u64) {
        if quantity == 0 {
            self.items.remove(item);
        } else {
            self.items.insert(item.clone(), quantity);
        }
        self.weight = self.derived_weight(catalog);
    }

    /// Drop zero-quantity entries and recompute weight. Applied to every
    /// inventory read back from a document.
    pub fn normalize(&mut self, catalog: &ItemCatalog) {
        self.items.retain(|_, qty| *qty > 0);
        self.weight = self.derived_weight(catalog);
    }

    /// Whether the current weight respects the capacity ceiling.
    pub fn within_capacity(&self) -> bool {
        self.weight <= self.max_weight + WEIGHT_EPSILON
    }

    /// Raise the ceiling. Returns `false` (and changes nothing) unless
    /// `new_capacity` is strictly greater than the current one.
    pub fn raise_capacity(&mut self, new_capacity: f64) -> bool {
        if !new_capacity.is_finite() || new_capacity <= self.max_weight {
            return false;
        }
        self.max_weight = new_capacity;
        true
    }
}
