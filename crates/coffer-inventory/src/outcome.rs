use coffer_types::{Inventory, ItemId};
use serde::Serialize;

/// State after a successful [`add_item`](crate::InventoryStore::add_item).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AddOutcome {
    pub quantity: u64,
    pub weight: f64,
    pub max_weight: f64,
}

/// State after a successful [`remove_item`](crate::InventoryStore::remove_item).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemoveOutcome {
    pub remaining: u64,
    pub weight: f64,
}

/// Both sides after a successful transfer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransferOutcome {
    pub from_remaining: u64,
    pub from_weight: f64,
    pub to_quantity: u64,
    pub to_weight: f64,
}

/// One side of a trade: what that user hands over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offer {
    pub item: ItemId,
    pub quantity: u64,
}

impl Offer {
    pub fn new(item: ItemId, quantity: u64) -> Self {
        Self { item, quantity }
    }
}

/// Both inventories after a successful trade, in argument order.
#[derive(Clone, Debug, PartialEq)]
pub struct SwapOutcome {
    pub first: Inventory,
    pub second: Inventory,
}
