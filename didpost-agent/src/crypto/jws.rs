//! Signed envelope construction and verification.
//!
//! Produces a detached-payload JWS-style structure: the signing input is
//! `b64url(protected) || '.' || b64url(payload)`, and the protected header
//! bytes produced at signing time are carried verbatim so verification never
//! depends on re-serialization.

use serde_json::Value;

use super::sign::{sign_payload, verify_payload};
use super::SigAlgorithm;
use crate::envelope::{
    b64url_decode, b64url_encode, Jws, JwsProtected, JwsSignature, JwsSignatureHeader, TYP_SIGNED,
};
use crate::error::{Error, Result};

/// Sign content with a private JWK, producing a single-signature envelope.
pub fn sign(payload: &[u8], kid: &str, jwk: &Value, alg: SigAlgorithm) -> Result<Jws> {
    let protected = JwsProtected {
        typ: TYP_SIGNED.to_string(),
        alg: alg.as_str().to_string(),
    };

    let protected_b64 = b64url_encode(serde_json::to_vec(&protected)?);
    let payload_b64 = b64url_encode(payload);

    let signing_input = format!("{}.{}", protected_b64, payload_b64);
    let signature = sign_payload(jwk, alg, signing_input.as_bytes())?;

    Ok(Jws {
        payload: payload_b64,
        signatures: vec![JwsSignature {
            header: JwsSignatureHeader {
                kid: kid.to_string(),
            },
            protected: protected_b64,
            signature: b64url_encode(signature),
        }],
    })
}

/// Verify the signature made by `kid` and return the decoded payload.
///
/// Fails with [`Error::AuthenticationFailure`] on signature mismatch and
/// [`Error::UnsupportedAlgorithm`] when the envelope names an algorithm this
/// engine does not implement.
pub fn verify(jws: &Jws, kid: &str, public_jwk: &Value) -> Result<Vec<u8>> {
    let (index, signature) = jws
        .signatures
        .iter()
        .enumerate()
        .find(|(_, s)| s.header.kid == kid)
        .ok_or_else(|| Error::Resolution(format!("no signature found for key id {}", kid)))?;

    let protected = jws.parse_protected(index)?;
    let alg = SigAlgorithm::from_name(&protected.alg)?;

    let signature_bytes = b64url_decode(&signature.signature)?;
    let signing_input = format!("{}.{}", signature.protected, jws.payload);

    if !verify_payload(public_jwk, alg, signing_input.as_bytes(), &signature_bytes)? {
        return Err(Error::AuthenticationFailure);
    }

    b64url_decode(&jws.payload)
}
