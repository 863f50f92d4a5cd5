//! AES Key Wrap per RFC 3394.
//!
//! Wraps content encryption keys (CEK) under a key encryption key (KEK)
//! derived from the ECDH agreement. AES-KW provides both confidentiality and
//! integrity for the wrapped key; unwrap failures surface as the single
//! undifferentiated authentication failure.

use crate::error::{Error, Result};
use aes::Aes256;
use aes_kw::Kek;

/// Wrap a key using AES-256-KW (RFC 3394).
///
/// The key to wrap must be a multiple of 8 bytes and at least 16 bytes. The
/// output is 8 bytes longer than the input (integrity check value).
pub fn wrap_key_aes_kw(kek: &[u8; 32], plaintext_key: &[u8]) -> Result<Vec<u8>> {
    if plaintext_key.len() < 16 {
        return Err(Error::Validation(
            "key to wrap must be at least 16 bytes".to_string(),
        ));
    }
    if plaintext_key.len() % 8 != 0 {
        return Err(Error::Validation(
            "key to wrap must be a multiple of 8 bytes".to_string(),
        ));
    }

    let kek = Kek::<Aes256>::from(*kek);

    let mut output = vec![0u8; plaintext_key.len() + 8];
    kek.wrap(plaintext_key, &mut output)
        .map_err(|e| Error::Validation(format!("key wrap failed: {:?}", e)))?;

    Ok(output)
}

/// Unwrap a key using AES-256-KW (RFC 3394).
///
/// Verifies the integrity check value; a wrong KEK, tampering, or a
/// malformed wrapped key all produce [`Error::AuthenticationFailure`] so the
/// failure mode cannot be distinguished by the caller.
pub fn unwrap_key_aes_kw(kek: &[u8; 32], wrapped_key: &[u8]) -> Result<Vec<u8>> {
    if wrapped_key.len() < 24 || wrapped_key.len() % 8 != 0 {
        return Err(Error::AuthenticationFailure);
    }

    let kek = Kek::<Aes256>::from(*kek);

    let mut output = vec![0u8; wrapped_key.len() - 8];
    kek.unwrap(wrapped_key, &mut output)
        .map_err(|_| Error::AuthenticationFailure)?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 32];

        let wrapped = wrap_key_aes_kw(&kek, &plaintext).unwrap();
        let unwrapped = unwrap_key_aes_kw(&kek, &wrapped).unwrap();

        assert_eq!(&unwrapped[..], &plaintext[..]);
    }

    #[test]
    fn wrap_produces_longer_output() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 32];

        let wrapped = wrap_key_aes_kw(&kek, &plaintext).unwrap();
        assert_eq!(wrapped.len(), plaintext.len() + 8);
    }

    #[test]
    fn wrong_kek_fails() {
        let kek1 = [0x42u8; 32];
        let kek2 = [0x43u8; 32];
        let plaintext = [0xABu8; 32];

        let wrapped = wrap_key_aes_kw(&kek1, &plaintext).unwrap();
        assert_matches!(
            unwrap_key_aes_kw(&kek2, &wrapped),
            Err(Error::AuthenticationFailure)
        );
    }

    #[test]
    fn tampering_detected() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 32];

        let mut wrapped = wrap_key_aes_kw(&kek, &plaintext).unwrap();
        wrapped[0] ^= 0xFF;

        assert_matches!(
            unwrap_key_aes_kw(&kek, &wrapped),
            Err(Error::AuthenticationFailure)
        );
    }

    #[test]
    fn short_key_rejected() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 8];

        assert!(wrap_key_aes_kw(&kek, &plaintext).is_err());
    }

    #[test]
    fn non_aligned_key_rejected() {
        let kek = [0x42u8; 32];
        let plaintext = [0xABu8; 17];

        assert!(wrap_key_aes_kw(&kek, &plaintext).is_err());
    }
}
