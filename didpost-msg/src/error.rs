//! Error types for the didpost-msg crate.

use std::result;
use thiserror::Error;

/// Message-model error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Error related to serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error related to validation failures.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Custom Result type for message-model operations.
pub type Result<T> = result::Result<T, Error>;
