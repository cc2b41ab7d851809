//! Error types for the sable-msg crate.

use std::result;
use thiserror::Error;

/// Core message model error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Error related to validation failures.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error related to serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Custom Result type for message model operations.
pub type Result<T> = result::Result<T, Error>;
