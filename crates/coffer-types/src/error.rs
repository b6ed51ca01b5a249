use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq)]
pub enum TypeError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    #[error("invalid weight for item {item}: {weight}")]
    InvalidWeight { item: String, weight: f64 },

    #[error("catalogue parse error: {0}")]
    Catalog(String),
}
