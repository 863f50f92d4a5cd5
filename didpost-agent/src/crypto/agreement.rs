//! X25519 key agreement.
//!
//! One shared secret is derived per recipient. Anonymous envelopes use a
//! fresh ephemeral key pair generated once per encryption call; authenticated
//! envelopes additionally mix in the sender's static key (ECDH-1PU style:
//! Z = Ze || Zs). Shared secrets are zeroized after key derivation.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Length in bytes of X25519 keys and shared secrets.
pub const X25519_KEY_LEN: usize = 32;

/// Curve name used in key material and protected headers.
pub const CURVE_X25519: &str = "X25519";

/// A recipient's public key-agreement key, tagged with the key id the
/// envelope slot will reference and the curve it lives on. The bytes are
/// kept unparsed so curve mismatches surface as a configuration error at
/// encryption time rather than during document extraction.
#[derive(Debug, Clone)]
pub struct RecipientKey {
    pub kid: String,
    pub crv: String,
    pub public: Vec<u8>,
}

/// A private key-agreement key (the sender's static key on encrypt, a
/// candidate recipient key on decrypt).
#[derive(Clone)]
pub struct AgreementSecret {
    pub kid: String,
    pub secret: [u8; X25519_KEY_LEN],
}

impl std::fmt::Debug for AgreementSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private key bytes.
        write!(f, "AgreementSecret({})", self.kid)
    }
}

/// Generate a fresh ephemeral X25519 key pair.
pub fn ephemeral_keypair() -> ([u8; X25519_KEY_LEN], [u8; X25519_KEY_LEN]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

/// Compute the X25519 shared secret between a private and a public key.
pub fn shared_secret(
    secret: &[u8; X25519_KEY_LEN],
    public: &[u8; X25519_KEY_LEN],
) -> Zeroizing<[u8; X25519_KEY_LEN]> {
    let secret = StaticSecret::from(*secret);
    let public = PublicKey::from(*public);
    Zeroizing::new(secret.diffie_hellman(&public).to_bytes())
}

/// Coerce a byte slice into an X25519 key, rejecting wrong lengths.
pub fn key_bytes(bytes: &[u8]) -> Result<[u8; X25519_KEY_LEN]> {
    <[u8; X25519_KEY_LEN]>::try_from(bytes).map_err(|_| {
        Error::UnsupportedAlgorithm(format!(
            "expected a {}-byte X25519 key, got {} bytes",
            X25519_KEY_LEN,
            bytes.len()
        ))
    })
}

/// Check that every recipient key lives on X25519 and on the same curve.
/// Mixed-curve recipient lists are a configuration error.
pub fn check_recipient_curves(recipients: &[RecipientKey]) -> Result<()> {
    for recipient in recipients {
        if recipient.crv != CURVE_X25519 {
            return Err(Error::UnsupportedAlgorithm(format!(
                "recipient {} uses curve {}, only {} is supported for key agreement",
                recipient.kid, recipient.crv, CURVE_X25519
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let (a_secret, a_public) = ephemeral_keypair();
        let (b_secret, b_public) = ephemeral_keypair();

        let ab = shared_secret(&a_secret, &b_public);
        let ba = shared_secret(&b_secret, &a_public);

        assert_eq!(*ab, *ba);
    }

    #[test]
    fn distinct_peers_give_distinct_secrets() {
        let (a_secret, _) = ephemeral_keypair();
        let (_, b_public) = ephemeral_keypair();
        let (_, c_public) = ephemeral_keypair();

        assert_ne!(
            *shared_secret(&a_secret, &b_public),
            *shared_secret(&a_secret, &c_public)
        );
    }

    #[test]
    fn key_bytes_rejects_wrong_length() {
        assert!(key_bytes(&[0u8; 31]).is_err());
        assert!(key_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn mixed_curves_rejected() {
        let recipients = vec![
            RecipientKey {
                kid: "did:example:bob#key-x25519-1".into(),
                crv: CURVE_X25519.into(),
                public: vec![1u8; 32],
            },
            RecipientKey {
                kid: "did:example:carol#key-p256-1".into(),
                crv: "P-256".into(),
                public: vec![2u8; 65],
            },
        ];

        assert!(check_recipient_curves(&recipients).is_err());
        assert!(check_recipient_curves(&recipients[..1]).is_ok());
    }
}
