//! Plaintext message model for didpost.
//!
//! This crate provides the DIDComm plaintext message structure used by the
//! didpost packing engine: message id, type, JSON body, optional sender and
//! recipients, threading and timestamps, together with its JSON wire
//! serialization.

pub mod error;
pub mod message;

pub use error::{Error, Result};
pub use message::{Message, UntypedMessage, PLAINTEXT_TYP};
