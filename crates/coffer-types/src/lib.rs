//! Foundation types for Coffer.
//!
//! This crate provides the identity and domain types shared by every other
//! Coffer crate: who owns things, what the things are, and how much they
//! weigh.
//!
//! # Key Types
//!
//! - [`UserId`] -- Opaque identifier of an economy participant
//! - [`ItemId`] -- Catalogue key of an item or currency
//! - [`ItemDefinition`] -- Static catalogue entry (name, unit weight, stackability)
//! - [`ItemCatalog`] -- Immutable lookup table of item definitions
//! - [`Inventory`] -- Per-user item quantities with derived weight and capacity

pub mod error;
pub mod ids;
pub mod inventory;
pub mod item;

pub use error::TypeError;
pub use ids::{ItemId, UserId};
pub use inventory::{Inventory, DEFAULT_MAX_WEIGHT, WEIGHT_EPSILON};
pub use item::{ItemCatalog, ItemDefinition};
