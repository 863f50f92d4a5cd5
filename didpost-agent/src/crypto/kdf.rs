//! Key derivation: Concat KDF per NIST SP 800-56A and RFC 7518 Section 4.6.
//!
//! Derives key encryption keys (KEK) from ECDH shared secrets for use with
//! AES Key Wrap. The same function serves both the anonymous (ECDH-ES) and
//! sender-authenticated (ECDH-1PU) agreement modes; the caller passes the
//! algorithm identifier so the derived key is bound to the negotiated
//! algorithm.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Derive a key using Concat KDF (NIST SP 800-56A, single-step, SHA-256).
///
/// # Arguments
/// * `algorithm_id` - The key wrap algorithm identifier (e.g. "ECDH-ES+A256KW")
/// * `shared_secret` - The raw ECDH shared secret (Z value; for ECDH-1PU the
///   concatenation Ze || Zs)
/// * `apu` - Agreement PartyU Info (sender identifier octets, can be empty)
/// * `apv` - Agreement PartyV Info (recipient identifier octets, can be empty)
/// * `key_data_len` - Desired output length in bits (must be multiple of 8)
///
/// # Algorithm
/// The OtherInfo structure per RFC 7518 Section 4.6.2:
/// - AlgorithmID: length (4 bytes) || algorithm identifier
/// - PartyUInfo: length (4 bytes) || apu
/// - PartyVInfo: length (4 bytes) || apv
/// - SuppPubInfo: keydatalen in bits (4 bytes, big-endian)
///
/// DerivedKey = Hash(counter || Z || OtherInfo) for each round
pub fn concat_kdf(
    algorithm_id: &str,
    shared_secret: &[u8],
    apu: &[u8],
    apv: &[u8],
    key_data_len: usize,
) -> Result<Vec<u8>> {
    if key_data_len == 0 || key_data_len % 8 != 0 {
        return Err(Error::Validation(
            "key_data_len must be a positive multiple of 8".to_string(),
        ));
    }

    let algorithm_id = algorithm_id.as_bytes();

    // Build OtherInfo per RFC 7518 Section 4.6.2
    let mut other_info = Vec::new();

    // AlgorithmID: length (4 bytes BE) || algorithm
    other_info.extend_from_slice(&(algorithm_id.len() as u32).to_be_bytes());
    other_info.extend_from_slice(algorithm_id);

    // PartyUInfo: length (4 bytes BE) || apu
    other_info.extend_from_slice(&(apu.len() as u32).to_be_bytes());
    other_info.extend_from_slice(apu);

    // PartyVInfo: length (4 bytes BE) || apv
    other_info.extend_from_slice(&(apv.len() as u32).to_be_bytes());
    other_info.extend_from_slice(apv);

    // SuppPubInfo: keydatalen in bits as big-endian u32
    other_info.extend_from_slice(&(key_data_len as u32).to_be_bytes());

    // Concat KDF with SHA-256 (produces 32 bytes per round)
    let key_data_len_bytes = key_data_len / 8;
    let hash_len = 32;
    let reps = key_data_len_bytes.div_ceil(hash_len);

    let mut derived = Vec::with_capacity(key_data_len_bytes);

    for counter in 1..=reps {
        let mut hasher = Sha256::new();
        hasher.update((counter as u32).to_be_bytes());
        hasher.update(shared_secret);
        hasher.update(&other_info);

        derived.extend_from_slice(&hasher.finalize());
    }

    derived.truncate(key_data_len_bytes);
    Ok(derived)
}
