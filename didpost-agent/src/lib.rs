//! didpost engine: DID-addressed secure messaging.
//!
//! This crate turns plaintext messages ([`didpost_msg::Message`]) into
//! authenticated-encrypted envelopes only the intended recipients can open,
//! and reverses the operation on receipt. Key material comes from two
//! pluggable capabilities: a [`did::DIDResolver`] supplying public keys via
//! DID documents and a [`secrets::SecretsResolver`] supplying private keys
//! by key id.

/// Command-line interface
pub mod cli;

/// Cryptographic envelope engine
pub mod crypto;

/// DID document model and resolution
pub mod did;

/// Wire envelope structures and format detection
pub mod envelope;

/// Error types
pub mod error;

/// Message pack/unpack state machine
pub mod packing;

/// Secrets model and storage
pub mod secrets;

// Re-export key types for convenience
pub use crypto::{EncAlgorithm, KeyWrapAlgorithm, SigAlgorithm};
pub use did::{
    generate_did_key, DIDDoc, DIDMethodResolver, DIDResolver, GeneratedIdentity,
    KeyMethodResolver, MultiResolver, StaticResolver,
};
pub use envelope::{Envelope, Jwe, Jws};
pub use error::{Error, Result};
pub use packing::{PackMetadata, PackOptions, Packer, UnpackMetadata};
pub use secrets::{FileSecretStore, InMemorySecrets, Secret, SecretsResolver};

/// Version of the didpost engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
