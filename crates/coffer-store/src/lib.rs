//! Named JSON document storage for Coffer.
//!
//! A document is a whole JSON object mapping a string key (usually a user
//! id) to an arbitrary payload: all inventories live in one document, all
//! bounties in another, and so on. This crate is the only part of Coffer
//! that touches the filesystem.
//!
//! # Storage Backends
//!
//! All backends implement the [`DocumentStore`] trait:
//!
//! - [`JsonFileStore`] -- one `<name>.json` file per document in a data directory
//! - [`InMemoryDocumentStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Only names on the [`DocumentName`] allow-list can be addressed; free-form
//!    names are rejected before any filesystem access.
//! 2. A missing document reads as empty and is created on the spot.
//! 3. Writes replace the whole document atomically; there is no append mode.
//! 4. Concurrent access to one document is serialized by the backend.

pub mod error;
pub mod file;
pub mod memory;
pub mod name;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use memory::InMemoryDocumentStore;
pub use name::{validate_document_name, DocumentName};
pub use traits::{Document, DocumentStore};
