//! Encrypted envelope construction and opening.
//!
//! One content encryption key (CEK) is generated per envelope and the
//! plaintext is encrypted exactly once with AES-256-GCM; the CEK is then
//! wrapped independently for every recipient so any one of them can open the
//! envelope. Key agreement is X25519: ephemeral-static (ECDH-ES) for
//! anonymous envelopes, ephemeral + static-static (ECDH-1PU) when the sender
//! authenticates at the encryption layer.
//!
//! The protected header is serialized exactly once; its base64url form is
//! both the `protected` field of the envelope and the associated data of the
//! content cipher, so any later re-serialization cannot invalidate the tag.

use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::agreement::{
    check_recipient_curves, ephemeral_keypair, key_bytes, shared_secret, AgreementSecret,
    RecipientKey, CURVE_X25519,
};
use super::kdf::concat_kdf;
use super::key_wrap::{unwrap_key_aes_kw, wrap_key_aes_kw};
use super::{EncAlgorithm, KeyWrapAlgorithm};
use crate::envelope::{
    b64url_decode, b64url_encode, EphemeralPublicKey, Jwe, JweProtected, JweRecipient,
    JweRecipientHeader, TYP_ENCRYPTED,
};
use crate::error::{Error, Result};

const CEK_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// PartyVInfo digest: SHA-256 over the ordered recipient key ids joined by
/// `.`. Both sides derive the same value, and the header copy is
/// authenticated as part of the AAD.
fn recipient_digest(kids: &[&str]) -> [u8; 32] {
    let joined = kids.join(".");
    Sha256::digest(joined.as_bytes()).into()
}

/// Encrypt plaintext for a set of recipients.
///
/// With `sender` present the envelope is sender-authenticated
/// (ECDH-1PU+A256KW, `skid` in the protected header); without it the
/// envelope is anonymous (ECDH-ES+A256KW).
pub fn encrypt(
    plaintext: &[u8],
    recipients: &[RecipientKey],
    sender: Option<&AgreementSecret>,
    enc: EncAlgorithm,
) -> Result<Jwe> {
    if recipients.is_empty() {
        return Err(Error::Validation(
            "at least one recipient is required".to_string(),
        ));
    }
    check_recipient_curves(recipients)?;

    let alg = if sender.is_some() {
        KeyWrapAlgorithm::Ecdh1puA256Kw
    } else {
        KeyWrapAlgorithm::EcdhEsA256Kw
    };

    let (ephemeral_secret, ephemeral_public) = ephemeral_keypair();
    let ephemeral_secret = Zeroizing::new(ephemeral_secret);

    let kids: Vec<&str> = recipients.iter().map(|r| r.kid.as_str()).collect();
    let apv_octets = recipient_digest(&kids);
    let apu_octets: Option<Vec<u8>> = sender.map(|s| s.kid.as_bytes().to_vec());

    let protected = JweProtected {
        typ: TYP_ENCRYPTED.to_string(),
        alg: alg.as_str().to_string(),
        enc: enc.as_str().to_string(),
        skid: sender.map(|s| s.kid.clone()),
        apu: apu_octets.as_deref().map(b64url_encode),
        apv: b64url_encode(apv_octets),
        epk: EphemeralPublicKey {
            kty: "OKP".to_string(),
            crv: CURVE_X25519.to_string(),
            x: b64url_encode(ephemeral_public),
        },
    };

    // Encode once. These exact bytes are the AAD; the struct is never
    // re-serialized after this point.
    let protected_b64 = b64url_encode(serde_json::to_vec(&protected)?);

    let mut cek = Zeroizing::new([0u8; CEK_LEN]);
    OsRng.fill_bytes(cek.as_mut());
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(cek.as_ref())
        .map_err(|e| Error::Validation(format!("failed to initialize cipher: {}", e)))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), protected_b64.as_bytes(), &mut buffer)
        .map_err(|e| Error::Validation(format!("content encryption failed: {}", e)))?;

    let mut jwe_recipients = Vec::with_capacity(recipients.len());

    for recipient in recipients {
        let recipient_public = key_bytes(&recipient.public)?;
        let ze = shared_secret(&ephemeral_secret, &recipient_public);

        let z: Zeroizing<Vec<u8>> = match sender {
            Some(sender) => {
                let zs = shared_secret(&sender.secret, &recipient_public);
                let mut combined = Zeroizing::new(Vec::with_capacity(ze.len() + zs.len()));
                combined.extend_from_slice(ze.as_ref());
                combined.extend_from_slice(zs.as_ref());
                combined
            }
            None => Zeroizing::new(ze.to_vec()),
        };

        let kek = Zeroizing::new(concat_kdf(
            alg.as_str(),
            &z,
            apu_octets.as_deref().unwrap_or(&[]),
            &apv_octets,
            256,
        )?);
        let kek: &[u8; 32] = kek
            .as_slice()
            .try_into()
            .map_err(|_| Error::Validation("derived KEK has wrong length".to_string()))?;

        let encrypted_key = wrap_key_aes_kw(kek, cek.as_ref())?;

        jwe_recipients.push(JweRecipient {
            header: JweRecipientHeader {
                kid: recipient.kid.clone(),
            },
            encrypted_key: b64url_encode(encrypted_key),
        });
    }

    Ok(Jwe {
        protected: protected_b64,
        recipients: jwe_recipients,
        iv: b64url_encode(iv),
        ciphertext: b64url_encode(buffer),
        tag: b64url_encode(tag),
    })
}

/// Open an encrypted envelope with the caller's candidate private keys.
///
/// Candidates are matched against the key ids in the recipient slots. When
/// no candidate key id appears in the envelope at all, the failure is a
/// [`Error::Resolution`]; once a slot is selected, every failure mode (key
/// unwrap, tag check, wrong sender key) is the undifferentiated
/// [`Error::AuthenticationFailure`].
///
/// `sender_public` must carry the sender's static agreement key for
/// authenticated envelopes; it is ignored for anonymous ones.
pub fn decrypt(
    jwe: &Jwe,
    candidates: &[AgreementSecret],
    sender_public: Option<&[u8; 32]>,
) -> Result<Vec<u8>> {
    let protected = jwe.parse_protected()?;
    // A256GCM is the only supported content cipher; parsing rejects others.
    EncAlgorithm::from_name(&protected.enc)?;
    let alg = KeyWrapAlgorithm::from_name(&protected.alg)?;

    if protected.epk.crv != CURVE_X25519 {
        return Err(Error::UnsupportedAlgorithm(format!(
            "ephemeral key curve {}",
            protected.epk.crv
        )));
    }
    let ephemeral_public = key_bytes(&b64url_decode(&protected.epk.x)?)?;

    // skid and apu must agree when both are present.
    if let (Some(skid), Some(apu)) = (&protected.skid, &protected.apu) {
        if b64url_decode(apu)? != skid.as_bytes() {
            return Err(Error::Malformed(
                "apu does not match sender key id".to_string(),
            ));
        }
    }

    let sender_public = if alg.is_authenticated() {
        Some(sender_public.ok_or_else(|| {
            Error::Validation("sender key required for authenticated decryption".to_string())
        })?)
    } else {
        None
    };

    let apu_octets = match &protected.apu {
        Some(apu) => b64url_decode(apu)?,
        None => Vec::new(),
    };
    let apv_octets = b64url_decode(&protected.apv)?;

    let iv = b64url_decode(&jwe.iv)?;
    let tag = b64url_decode(&jwe.tag)?;
    let ciphertext = b64url_decode(&jwe.ciphertext)?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(Error::Malformed(
            "unexpected iv or tag length".to_string(),
        ));
    }

    // Pair every candidate with the slot wrapped for its key id.
    let mut slots = Vec::new();
    for candidate in candidates {
        for recipient in &jwe.recipients {
            if recipient.header.kid == candidate.kid {
                slots.push((candidate, recipient));
            }
        }
    }
    if slots.is_empty() {
        return Err(Error::Resolution(
            "no candidate key matches any envelope recipient".to_string(),
        ));
    }

    for (candidate, recipient) in slots {
        match try_open_slot(
            jwe,
            candidate,
            recipient,
            alg,
            &ephemeral_public,
            sender_public,
            &apu_octets,
            &apv_octets,
            &iv,
            &tag,
            &ciphertext,
        ) {
            Ok(plaintext) => return Ok(plaintext),
            Err(_) => continue,
        }
    }

    Err(Error::AuthenticationFailure)
}

#[allow(clippy::too_many_arguments)]
fn try_open_slot(
    jwe: &Jwe,
    candidate: &AgreementSecret,
    recipient: &JweRecipient,
    alg: KeyWrapAlgorithm,
    ephemeral_public: &[u8; 32],
    sender_public: Option<&[u8; 32]>,
    apu_octets: &[u8],
    apv_octets: &[u8],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let ze = shared_secret(&candidate.secret, ephemeral_public);

    let z: Zeroizing<Vec<u8>> = match sender_public {
        Some(sender_public) => {
            let zs = shared_secret(&candidate.secret, sender_public);
            let mut combined = Zeroizing::new(Vec::with_capacity(ze.len() + zs.len()));
            combined.extend_from_slice(ze.as_ref());
            combined.extend_from_slice(zs.as_ref());
            combined
        }
        None => Zeroizing::new(ze.to_vec()),
    };

    let kek = Zeroizing::new(concat_kdf(alg.as_str(), &z, apu_octets, apv_octets, 256)?);
    let kek: &[u8; 32] = kek
        .as_slice()
        .try_into()
        .map_err(|_| Error::AuthenticationFailure)?;

    let wrapped = b64url_decode(&recipient.encrypted_key).map_err(|_| Error::AuthenticationFailure)?;
    let cek = Zeroizing::new(unwrap_key_aes_kw(kek, &wrapped)?);

    let cipher = Aes256Gcm::new_from_slice(&cek).map_err(|_| Error::AuthenticationFailure)?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            jwe.protected.as_bytes(),
            &mut buffer,
            aes_gcm::Tag::from_slice(tag),
        )
        .map_err(|_| Error::AuthenticationFailure)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn recipient(kid: &str) -> (RecipientKey, AgreementSecret) {
        let (secret, public) = ephemeral_keypair();
        (
            RecipientKey {
                kid: kid.to_string(),
                crv: CURVE_X25519.to_string(),
                public: public.to_vec(),
            },
            AgreementSecret {
                kid: kid.to_string(),
                secret,
            },
        )
    }

    #[test]
    fn anonymous_roundtrip() {
        let (bob_public, bob_secret) = recipient("did:example:bob#key-x25519-1");

        let jwe = encrypt(b"hello bob", &[bob_public], None, EncAlgorithm::A256Gcm).unwrap();
        let protected = jwe.parse_protected().unwrap();
        assert_eq!(protected.alg, "ECDH-ES+A256KW");
        assert!(protected.skid.is_none());

        let plaintext = decrypt(&jwe, std::slice::from_ref(&bob_secret), None).unwrap();
        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn authenticated_roundtrip() {
        let (bob_public, bob_secret) = recipient("did:example:bob#key-x25519-1");
        let (alice_secret_bytes, alice_public_bytes) = ephemeral_keypair();
        let alice = AgreementSecret {
            kid: "did:example:alice#key-x25519-1".to_string(),
            secret: alice_secret_bytes,
        };

        let jwe = encrypt(
            b"hello bob",
            &[bob_public],
            Some(&alice),
            EncAlgorithm::A256Gcm,
        )
        .unwrap();
        let protected = jwe.parse_protected().unwrap();
        assert_eq!(protected.alg, "ECDH-1PU+A256KW");
        assert_eq!(protected.skid.as_deref(), Some(alice.kid.as_str()));

        let plaintext = decrypt(
            &jwe,
            std::slice::from_ref(&bob_secret),
            Some(&alice_public_bytes),
        )
        .unwrap();
        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn authenticated_decrypt_requires_sender_key() {
        let (bob_public, bob_secret) = recipient("did:example:bob#key-x25519-1");
        let (alice_secret_bytes, _) = ephemeral_keypair();
        let alice = AgreementSecret {
            kid: "did:example:alice#key-x25519-1".to_string(),
            secret: alice_secret_bytes,
        };

        let jwe = encrypt(b"x", &[bob_public], Some(&alice), EncAlgorithm::A256Gcm).unwrap();
        assert_matches!(
            decrypt(&jwe, std::slice::from_ref(&bob_secret), None),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn multi_recipient_either_key_opens() {
        let (bob_public, bob_secret) = recipient("did:example:bob#key-x25519-1");
        let (carol_public, carol_secret) = recipient("did:example:carol#key-x25519-1");

        let jwe = encrypt(
            b"to both of you",
            &[bob_public, carol_public],
            None,
            EncAlgorithm::A256Gcm,
        )
        .unwrap();

        assert_eq!(jwe.recipients.len(), 2);
        assert_eq!(
            decrypt(&jwe, std::slice::from_ref(&bob_secret), None).unwrap(),
            b"to both of you"
        );
        assert_eq!(
            decrypt(&jwe, std::slice::from_ref(&carol_secret), None).unwrap(),
            b"to both of you"
        );
    }

    #[test]
    fn unknown_candidate_is_resolution_error() {
        let (bob_public, _) = recipient("did:example:bob#key-x25519-1");
        let (_, mallory_secret) = recipient("did:example:mallory#key-x25519-1");

        let jwe = encrypt(b"secret", &[bob_public], None, EncAlgorithm::A256Gcm).unwrap();
        assert_matches!(
            decrypt(&jwe, &[mallory_secret], None),
            Err(Error::Resolution(_))
        );
    }

    #[test]
    fn wrong_key_with_matching_kid_is_authentication_failure() {
        let (bob_public, _) = recipient("did:example:bob#key-x25519-1");
        let (wrong_secret, _) = ephemeral_keypair();
        let impostor = AgreementSecret {
            kid: "did:example:bob#key-x25519-1".to_string(),
            secret: wrong_secret,
        };

        let jwe = encrypt(b"secret", &[bob_public], None, EncAlgorithm::A256Gcm).unwrap();
        assert_matches!(
            decrypt(&jwe, &[impostor], None),
            Err(Error::AuthenticationFailure)
        );
    }

    #[test]
    fn ciphertext_tamper_detected() {
        let (bob_public, bob_secret) = recipient("did:example:bob#key-x25519-1");

        let jwe = encrypt(b"payload", &[bob_public], None, EncAlgorithm::A256Gcm).unwrap();

        let mut bytes = b64url_decode(&jwe.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        let tampered = Jwe {
            ciphertext: b64url_encode(bytes),
            ..jwe.clone()
        };
        assert_matches!(
            decrypt(&tampered, std::slice::from_ref(&bob_secret), None),
            Err(Error::AuthenticationFailure)
        );

        let mut tag = b64url_decode(&jwe.tag).unwrap();
        tag[0] ^= 0x80;
        let tampered = Jwe {
            tag: b64url_encode(tag),
            ..jwe.clone()
        };
        assert_matches!(
            decrypt(&tampered, &[bob_secret], None),
            Err(Error::AuthenticationFailure)
        );
    }

    #[test]
    fn empty_recipient_list_rejected() {
        assert_matches!(
            encrypt(b"x", &[], None, EncAlgorithm::A256Gcm),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn mixed_recipient_curves_rejected() {
        let (bob_public, _) = recipient("did:example:bob#key-x25519-1");
        let p256_recipient = RecipientKey {
            kid: "did:example:carol#key-p256-1".to_string(),
            crv: "P-256".to_string(),
            public: vec![0u8; 65],
        };

        assert_matches!(
            encrypt(
                b"x",
                &[bob_public, p256_recipient],
                None,
                EncAlgorithm::A256Gcm
            ),
            Err(Error::UnsupportedAlgorithm(_))
        );
    }
}
