//! Raw signing and verification over JWK key material.
//!
//! Dispatches on the JWK's (kty, crv) pair: Ed25519 produces 64-byte EdDSA
//! signatures, P-256 and secp256k1 produce DER-encoded ECDSA signatures.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer as Ed25519Signer, Verifier, VerifyingKey};
use k256::{ecdsa::Signature as Secp256k1Signature, ecdsa::SigningKey as Secp256k1SigningKey};
use p256::elliptic_curve::sec1::FromEncodedPoint;
use p256::EncodedPoint as P256EncodedPoint;
use p256::PublicKey as P256PublicKey;
use p256::{ecdsa::Signature as P256Signature, ecdsa::SigningKey as P256SigningKey};
use serde_json::Value;

use super::SigAlgorithm;
use crate::error::{Error, Result};

fn jwk_str<'a>(jwk: &'a Value, field: &str) -> Result<&'a str> {
    jwk.get(field).and_then(|v| v.as_str()).ok_or_else(|| {
        Error::Validation(format!("missing {} parameter in JWK", field))
    })
}

fn jwk_bytes(jwk: &Value, field: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(jwk_str(jwk, field)?)
        .map_err(|e| Error::Validation(format!("invalid {} parameter in JWK: {}", field, e)))
}

/// The signature algorithm matching a JWK's key type.
pub fn algorithm_for_jwk(jwk: &Value) -> Result<SigAlgorithm> {
    let kty = jwk.get("kty").and_then(|v| v.as_str());
    let crv = jwk.get("crv").and_then(|v| v.as_str());

    match (kty, crv) {
        (Some("OKP"), Some("Ed25519")) => Ok(SigAlgorithm::EdDsa),
        (Some("EC"), Some("P-256")) => Ok(SigAlgorithm::Es256),
        (Some("EC"), Some("secp256k1")) => Ok(SigAlgorithm::Es256K),
        _ => Err(Error::UnsupportedAlgorithm(format!(
            "signing key kty={:?}, crv={:?}",
            kty, crv
        ))),
    }
}

/// Sign data with a private JWK.
///
/// The key type must match the requested algorithm; mismatches are a
/// configuration error.
pub fn sign_payload(jwk: &Value, alg: SigAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    if algorithm_for_jwk(jwk)? != alg {
        return Err(Error::UnsupportedAlgorithm(format!(
            "key does not support {}",
            alg.as_str()
        )));
    }

    match alg {
        SigAlgorithm::EdDsa => {
            let private_key_bytes = jwk_bytes(jwk, "d")?;
            let seed: [u8; 32] = private_key_bytes.as_slice().try_into().map_err(|_| {
                Error::Validation(format!(
                    "invalid Ed25519 private key length: {}, expected 32 bytes",
                    private_key_bytes.len()
                ))
            })?;

            let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
            Ok(signing_key.sign(data).to_vec())
        }
        SigAlgorithm::Es256 => {
            let private_key_bytes = jwk_bytes(jwk, "d")?;
            let signing_key = P256SigningKey::from_slice(&private_key_bytes)
                .map_err(|e| Error::Validation(format!("invalid P-256 private key: {:?}", e)))?;

            let signature: P256Signature = signing_key.sign(data);
            Ok(signature.to_der().as_bytes().to_vec())
        }
        SigAlgorithm::Es256K => {
            let private_key_bytes = jwk_bytes(jwk, "d")?;
            let signing_key = Secp256k1SigningKey::from_slice(&private_key_bytes)
                .map_err(|e| Error::Validation(format!("invalid secp256k1 private key: {:?}", e)))?;

            let signature: Secp256k1Signature = signing_key.sign(data);
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }
}

/// Verify a signature with a public JWK. Returns `Ok(false)` on a mere
/// signature mismatch; malformed key material is an error.
pub fn verify_payload(jwk: &Value, alg: SigAlgorithm, data: &[u8], signature: &[u8]) -> Result<bool> {
    if algorithm_for_jwk(jwk)? != alg {
        return Err(Error::UnsupportedAlgorithm(format!(
            "key does not support {}",
            alg.as_str()
        )));
    }

    match alg {
        SigAlgorithm::EdDsa => {
            let public_key_bytes = jwk_bytes(jwk, "x")?;
            let public: [u8; 32] = public_key_bytes.as_slice().try_into().map_err(|_| {
                Error::Validation(format!(
                    "invalid Ed25519 public key length: {}, expected 32 bytes",
                    public_key_bytes.len()
                ))
            })?;

            let verifying_key = VerifyingKey::from_bytes(&public)
                .map_err(|e| Error::Validation(format!("invalid Ed25519 public key: {:?}", e)))?;

            let sig_bytes: [u8; 64] = match signature.try_into() {
                Ok(bytes) => bytes,
                Err(_) => return Ok(false),
            };
            let ed_signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);

            Ok(verifying_key.verify(data, &ed_signature).is_ok())
        }
        SigAlgorithm::Es256 => {
            let point = uncompressed_point(jwk)?;
            let encoded_point = P256EncodedPoint::from_bytes(&point)
                .map_err(|e| Error::Validation(format!("invalid P-256 point: {}", e)))?;

            let public_key_opt = P256PublicKey::from_encoded_point(&encoded_point);
            if public_key_opt.is_none().into() {
                return Err(Error::Validation("invalid P-256 public key".to_string()));
            }
            let verifier = p256::ecdsa::VerifyingKey::from(public_key_opt.unwrap());

            let p256_signature = match P256Signature::from_der(signature) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };

            Ok(verifier.verify(data, &p256_signature).is_ok())
        }
        SigAlgorithm::Es256K => {
            let point = uncompressed_point(jwk)?;
            let verifier = k256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|e| Error::Validation(format!("invalid secp256k1 public key: {:?}", e)))?;

            let k256_signature = match Secp256k1Signature::from_der(signature) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };

            Ok(verifier.verify(data, &k256_signature).is_ok())
        }
    }
}

/// SEC1 uncompressed point (0x04 || x || y) from an EC JWK.
fn uncompressed_point(jwk: &Value) -> Result<Vec<u8>> {
    let x_bytes = jwk_bytes(jwk, "x")?;
    let y_bytes = jwk_bytes(jwk, "y")?;

    let mut point = Vec::with_capacity(1 + x_bytes.len() + y_bytes.len());
    point.push(0x04);
    point.extend_from_slice(&x_bytes);
    point.extend_from_slice(&y_bytes);
    Ok(point)
}
