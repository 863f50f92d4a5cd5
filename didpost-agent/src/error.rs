//! Error handling for the didpost engine.
//!
//! The taxonomy distinguishes resolution failures (a DID or secret could not
//! be found), configuration failures (unsupported or mismatched algorithms),
//! rejected input (wire bytes matching no known envelope shape), and
//! authentication failures. Decryption and signature failures are surfaced as
//! a single undifferentiated [`Error::AuthenticationFailure`] so callers
//! cannot be used as an oracle distinguishing a wrong key from tampered
//! ciphertext.

use thiserror::Error;

/// Type alias for Results with didpost engine errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the didpost engine.
#[derive(Error, Debug)]
pub enum Error {
    /// A DID or secret could not be resolved. Non-retryable without caller
    /// intervention (e.g. provisioning the key or fixing the DID).
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Unknown or incompatible curve, cipher, or signature algorithm.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Wire bytes do not match any known envelope shape.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Decryption tag mismatch or signature mismatch. Intentionally carries
    /// no detail about which check failed.
    #[error("Authentication failure")]
    AuthenticationFailure,

    /// Invalid caller input that is not a wire-format problem (empty
    /// recipient list, missing sender for an authenticated operation, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error related to secret storage backends.
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<didpost_msg::Error> for Error {
    fn from(err: didpost_msg::Error) -> Self {
        match err {
            didpost_msg::Error::Serialization(e) => Error::Serialization(e),
            didpost_msg::Error::Validation(e) => Error::Validation(e),
        }
    }
}
