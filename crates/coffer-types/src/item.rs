use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::ItemId;

/// Static catalogue entry for an item or currency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Display name.
    pub name: String,
    /// Weight of a single unit. Always finite and non-negative.
    pub weight: f64,
    /// Whether more than one unit may be held at once.
    #[serde(default = "default_stackable")]
    pub stackable: bool,
}

fn default_stackable() -> bool {
    true
}

impl ItemDefinition {
    pub fn new(name: impl Into<String>, weight: f64, stackable: bool) -> Self {
        Self {
            name: name.into(),
            weight,
            stackable,
        }
    }
}

/// Immutable lookup table of [`ItemDefinition`]s, loaded once at startup.
///
/// The on-disk form is a JSON object keyed by item id:
///
/// ```
/// use coffer_types::ItemCatalog;
///
/// let catalog = ItemCatalog::from_json_str(
///     r#"{ "gold": { "name": "Gold", "weight": 1.0 } }"#,
/// ).unwrap();
/// assert_eq!(catalog.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCatalog {
    items: BTreeMap<ItemId, ItemDefinition>,
}

impl ItemCatalog {
    /// Build a catalogue, validating every weight.
    pub fn new(
        items: impl IntoIterator<Item = (ItemId, ItemDefinition)>,
    ) -> Result<Self, TypeError> {
        let catalog = Self {
            items: items.into_iter().collect(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The built-in catalogue of currencies and common items.
    pub fn builtin() -> Self {
        let entries = [
            ("gold", "Gold", 1.0, true),
            ("silver", "Silver", 0.0001, true),
            ("token", "Token", 1.0, true),
            ("gem", "Gem", 0.5, true),
            ("wood", "Wood", 2.0, true),
            ("iron", "Iron", 3.0, true),
            ("potion", "Potion", 0.5, true),
            ("bounty_ticket", "Bounty Ticket", 0.1, true),
            ("territory_deed", "Territory Deed", 5.0, false),
            ("backpack_kit", "Backpack Kit", 4.0, false),
        ];
        Self {
            items: entries
                .into_iter()
                .map(|(id, name, weight, stackable)| {
                    (
                        ItemId(id.to_string()),
                        ItemDefinition::new(name, weight, stackable),
                    )
                })
                .collect(),
        }
    }

    /// Parse a JSON catalogue.
    pub fn from_json_str(json: &str) -> Result<Self, TypeError> {
        let catalog: Self =
            serde_json::from_str(json).map_err(|e| TypeError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), TypeError> {
        for (id, def) in &self.items {
            if id.as_str().trim().is_empty() {
                return Err(TypeError::EmptyIdentifier);
            }
            if !def.weight.is_finite() || def.weight < 0.0 {
                return Err(TypeError::InvalidWeight {
                    item: id.to_string(),
                    weight: def.weight,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, item: &ItemId) -> Option<&ItemDefinition> {
        self.items.get(item)
    }

    /// Unit weight of an item; unknown items weigh nothing.
    pub fn unit_weight(&self, item: &ItemId) -> f64 {
        self.items.get(item).map(|d| d.weight).unwrap_or(0.0)
    }

    pub fn contains(&self, item: &ItemId) -> bool {
        self.items.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &ItemDefinition)> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_currencies() {
        let catalog = ItemCatalog::builtin();
        let gold = catalog.get(&ItemId::new("gold").unwrap()).unwrap();
        assert_eq!(gold.weight, 1.0);
        assert!(gold.stackable);
        assert_eq!(catalog.unit_weight(&ItemId::new("silver").unwrap()), 0.0001);
        assert!(!catalog.get(&ItemId::new("territory_deed").unwrap()).unwrap().stackable);
    }

    #[test]
    fn stackable_defaults_to_true() {
        let catalog =
            ItemCatalog::from_json_str(r#"{"ore": {"name": "Ore", "weight": 2.5}}"#).unwrap();
        assert!(catalog.get(&ItemId::new("ore").unwrap()).unwrap().stackable);
    }

    #[test]
    fn rejects_negative_weight() {
        let err = ItemCatalog::from_json_str(r#"{"ore": {"name": "Ore", "weight": -1}}"#)
            .unwrap_err();
        assert!(matches!(err, TypeError::InvalidWeight { .. }));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ItemCatalog::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, TypeError::Catalog(_)));
    }

    #[test]
    fn unknown_item_weighs_nothing() {
        let catalog = ItemCatalog::builtin();
        assert_eq!(catalog.unit_weight(&ItemId::new("phantom").unwrap()), 0.0);
    }
}
