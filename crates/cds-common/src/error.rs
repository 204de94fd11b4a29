//! Error types for the CDS data model

use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, CdsError>;

/// Errors raised while reading base metadata
#[derive(Error, Debug)]
pub enum CdsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),
}
