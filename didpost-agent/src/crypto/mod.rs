//! Cryptographic envelope engine.
//!
//! Submodules provide the building blocks (key agreement, key derivation,
//! key wrapping, raw signing) and the envelope operations built from them
//! (`jwe::encrypt`/`jwe::decrypt`, `jws::sign`/`jws::verify`).

pub mod agreement;
pub mod jwe;
pub mod jws;
pub mod kdf;
pub mod key_wrap;
pub mod sign;

use crate::error::{Error, Result};

/// Content encryption algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncAlgorithm {
    /// AES-GCM with 256-bit key.
    A256Gcm,
}

impl EncAlgorithm {
    /// Returns the algorithm identifier as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncAlgorithm::A256Gcm => "A256GCM",
        }
    }

    /// Parse a header value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "A256GCM" => Ok(EncAlgorithm::A256Gcm),
            other => Err(Error::UnsupportedAlgorithm(format!(
                "content encryption {}",
                other
            ))),
        }
    }
}

/// Key agreement + key wrap algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWrapAlgorithm {
    /// Anonymous ephemeral-static agreement with AES key wrap.
    EcdhEsA256Kw,
    /// Sender-authenticated one-pass-unified agreement with AES key wrap.
    Ecdh1puA256Kw,
}

impl KeyWrapAlgorithm {
    /// Returns the algorithm identifier as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyWrapAlgorithm::EcdhEsA256Kw => "ECDH-ES+A256KW",
            KeyWrapAlgorithm::Ecdh1puA256Kw => "ECDH-1PU+A256KW",
        }
    }

    /// Parse a header value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ECDH-ES+A256KW" => Ok(KeyWrapAlgorithm::EcdhEsA256Kw),
            "ECDH-1PU+A256KW" => Ok(KeyWrapAlgorithm::Ecdh1puA256Kw),
            other => Err(Error::UnsupportedAlgorithm(format!("key wrap {}", other))),
        }
    }

    /// Whether the algorithm authenticates the sender at the encryption
    /// layer.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, KeyWrapAlgorithm::Ecdh1puA256Kw)
    }
}

/// Signature algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAlgorithm {
    /// Ed25519 signatures.
    EdDsa,
    /// P-256 ECDSA signatures.
    Es256,
    /// secp256k1 ECDSA signatures.
    Es256K,
}

impl SigAlgorithm {
    /// Returns the algorithm identifier as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SigAlgorithm::EdDsa => "EdDSA",
            SigAlgorithm::Es256 => "ES256",
            SigAlgorithm::Es256K => "ES256K",
        }
    }

    /// Parse a header value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "EdDSA" => Ok(SigAlgorithm::EdDsa),
            "ES256" => Ok(SigAlgorithm::Es256),
            "ES256K" => Ok(SigAlgorithm::Es256K),
            other => Err(Error::UnsupportedAlgorithm(format!("signature {}", other))),
        }
    }
}
