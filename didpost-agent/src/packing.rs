//! Message packing and unpacking.
//!
//! Packing selects and chains envelope layers over a plaintext message:
//! plaintext-only, signed-only, encrypted, or signed-then-encrypted (the
//! signature always goes inside the encryption so it stays confidential;
//! encrypt-then-sign is never produced). Unpacking peels layers in the
//! reverse order, deciding each layer from the wire shape alone, and reports
//! what it peeled so callers can enforce their own authentication policy.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use didpost_msg::UntypedMessage;

use crate::crypto::agreement::{key_bytes, AgreementSecret, RecipientKey, CURVE_X25519};
use crate::crypto::{jwe, jws, EncAlgorithm, KeyWrapAlgorithm, SigAlgorithm};
use crate::did::{agreement_secret_from, did_of_kid, DIDResolver};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::secrets::SecretsResolver;

/// Pack never nests more than sign + authenticated encryption + sender
/// protection; anything deeper on unpack is rejected as malformed.
const MAX_LAYERS: usize = 3;

/// Options for packing a message.
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// DID (or explicit key id) whose authentication key signs the message
    /// before encryption. None skips the signature layer.
    pub sign_from: Option<String>,
    /// Hide the sender key id from the outer protected header by wrapping
    /// the authenticated envelope in an anonymous one.
    pub protect_sender_id: bool,
    /// Content encryption algorithm.
    pub enc_alg: EncAlgorithm,
    /// Signature algorithm override. Defaults to the signing key's native
    /// algorithm.
    pub sig_alg: Option<SigAlgorithm>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            sign_from: None,
            protect_sender_id: false,
            enc_alg: EncAlgorithm::A256Gcm,
            sig_alg: None,
        }
    }
}

impl PackOptions {
    /// Create default packing options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign the message with the given DID's authentication key before
    /// encrypting.
    pub fn with_sign_from(mut self, sign_from: impl Into<String>) -> Self {
        self.sign_from = Some(sign_from.into());
        self
    }

    /// Anonymize the sender key id in the outer header.
    pub fn with_protected_sender(mut self, protect: bool) -> Self {
        self.protect_sender_id = protect;
        self
    }

    /// Select the content encryption algorithm.
    pub fn with_enc_alg(mut self, enc_alg: EncAlgorithm) -> Self {
        self.enc_alg = enc_alg;
        self
    }

    /// Force a signature algorithm instead of the key's native one.
    pub fn with_sig_alg(mut self, sig_alg: SigAlgorithm) -> Self {
        self.sig_alg = Some(sig_alg);
        self
    }
}

/// What pack_encrypted actually did: which keys the envelope addresses and
/// which keys authenticated it.
#[derive(Debug, Clone, Default)]
pub struct PackMetadata {
    /// Recipient key ids the content key was wrapped for.
    pub to_kids: Vec<String>,
    /// Sender key-agreement key id, when the envelope is authenticated.
    pub from_kid: Option<String>,
    /// Signing key id, when a signature layer was added.
    pub sign_from_kid: Option<String>,
}

/// What unpack peeled and what it learned about the sender. Callers are
/// expected to reject messages whose authentication level does not meet
/// their policy.
#[derive(Debug, Clone, Default)]
pub struct UnpackMetadata {
    /// An encryption layer was peeled.
    pub encrypted: bool,
    /// The encryption layer authenticated the sender (ECDH-1PU).
    pub authenticated: bool,
    /// The sender key id was hidden behind an outer anonymous layer.
    pub sender_protected: bool,
    /// A signature layer was peeled and verified.
    pub signed: bool,
    /// Sender key-agreement key id from the authenticated encryption layer.
    pub encrypted_from_kid: Option<String>,
    /// Signing key id from the signature layer.
    pub sign_from_kid: Option<String>,
    /// Recipient key ids of the (outermost) encryption layer.
    pub encrypted_to_kids: Vec<String>,
    /// The sender DID established by an authenticated layer (encryption or
    /// signature). None for anonymous messages.
    pub sender_did: Option<String>,
}

/// The packing engine: orchestrates envelope layering over the two resolver
/// capabilities. Carries no state of its own beyond the resolver handles, so
/// any number of pack/unpack calls may run concurrently.
#[derive(Debug, Clone)]
pub struct Packer {
    did_resolver: Arc<dyn DIDResolver>,
    secrets: Arc<dyn SecretsResolver>,
}

impl Packer {
    pub fn new(did_resolver: Arc<dyn DIDResolver>, secrets: Arc<dyn SecretsResolver>) -> Self {
        Self {
            did_resolver,
            secrets,
        }
    }

    /// Serialize a message without any protection.
    ///
    /// The message's `from` and `to` DIDs must be resolvable.
    pub async fn pack_plaintext(&self, msg: &UntypedMessage) -> Result<String> {
        msg.validate()?;
        self.verify_addresses(msg).await?;
        debug!(id = %msg.id, "packing plaintext message");
        Ok(msg.to_json()?)
    }

    /// Sign a message with `sign_from`'s authentication key, without
    /// encrypting it.
    pub async fn pack_signed(&self, msg: &UntypedMessage, sign_from: &str) -> Result<String> {
        msg.validate()?;
        self.verify_addresses(msg).await?;

        let payload = msg.to_json()?;
        let jws = self.sign_payload(payload.as_bytes(), sign_from, None).await?;
        debug!(id = %msg.id, signer = %sign_from, "packed signed message");

        Ok(serde_json::to_string(&jws)?)
    }

    /// Encrypt a message to every recipient in its `to` list.
    ///
    /// With `msg.from` set, the envelope authenticates the sender at the
    /// encryption layer; without it the envelope is anonymous. A signature
    /// layer (options.sign_from) is always applied before encryption.
    pub async fn pack_encrypted(
        &self,
        msg: &UntypedMessage,
        options: &PackOptions,
    ) -> Result<(String, PackMetadata)> {
        msg.validate()?;

        let to = match &msg.to {
            Some(to) if !to.is_empty() => to,
            _ => {
                return Err(Error::Validation(
                    "encrypted packing requires at least one recipient".to_string(),
                ))
            }
        };

        let mut metadata = PackMetadata::default();

        // Innermost layer: the plaintext, optionally wrapped in a signature.
        let plaintext = match &options.sign_from {
            Some(sign_from) => {
                let payload = msg.to_json()?;
                let jws = self
                    .sign_payload(payload.as_bytes(), sign_from, options.sig_alg)
                    .await?;
                metadata.sign_from_kid = Some(jws.signatures[0].header.kid.clone());
                serde_json::to_string(&jws)?
            }
            None => msg.to_json()?,
        };

        let recipients = self.recipient_keys(to).await?;
        metadata.to_kids = recipients.iter().map(|r| r.kid.clone()).collect();

        let sender = match &msg.from {
            Some(from) => Some(self.sender_agreement_secret(from).await?),
            None => None,
        };
        metadata.from_kid = sender.as_ref().map(|s| s.kid.clone());

        let inner = jwe::encrypt(
            plaintext.as_bytes(),
            &recipients,
            sender.as_ref(),
            options.enc_alg,
        )?;

        // Sender protection nests the authenticated envelope inside an
        // anonymous one, keeping the outer header free of the sender key id.
        let wire = if options.protect_sender_id && sender.is_some() {
            let inner_json = serde_json::to_string(&inner)?;
            let outer = jwe::encrypt(inner_json.as_bytes(), &recipients, None, options.enc_alg)?;
            serde_json::to_string(&outer)?
        } else {
            serde_json::to_string(&inner)?
        };

        debug!(
            id = %msg.id,
            recipients = metadata.to_kids.len(),
            authenticated = metadata.from_kid.is_some(),
            signed = metadata.sign_from_kid.is_some(),
            protected_sender = options.protect_sender_id && metadata.from_kid.is_some(),
            "packed encrypted message"
        );

        Ok((wire, metadata))
    }

    /// Unpack wire bytes back into a plaintext message, peeling envelope
    /// layers by shape until the plaintext appears.
    pub async fn unpack(&self, raw: &str) -> Result<(UntypedMessage, UnpackMetadata)> {
        let mut metadata = UnpackMetadata::default();
        let mut raw = raw.to_string();
        let mut layers = 0usize;

        loop {
            match Envelope::detect(&raw)? {
                Envelope::Encrypted(jwe) => {
                    layers += 1;
                    if layers > MAX_LAYERS {
                        return Err(Error::Malformed("too many envelope layers".to_string()));
                    }
                    if metadata.signed {
                        return Err(Error::Malformed(
                            "encrypted layer inside a signed envelope".to_string(),
                        ));
                    }
                    raw = self.peel_encrypted(&jwe, &mut metadata).await?;
                }
                Envelope::Signed(jws) => {
                    layers += 1;
                    if layers > MAX_LAYERS {
                        return Err(Error::Malformed("too many envelope layers".to_string()));
                    }
                    if metadata.signed {
                        return Err(Error::Malformed("nested signed envelopes".to_string()));
                    }
                    raw = self.peel_signed(&jws, &mut metadata).await?;
                }
                Envelope::Plaintext(value) => {
                    let msg = self.finish_plaintext(value, &mut metadata)?;
                    debug!(
                        id = %msg.id,
                        encrypted = metadata.encrypted,
                        authenticated = metadata.authenticated,
                        signed = metadata.signed,
                        "unpacked message"
                    );
                    return Ok((msg, metadata));
                }
            }
        }
    }

    /// Decrypt one encrypted layer and fold what it proves into the
    /// metadata.
    async fn peel_encrypted(&self, jwe: &crate::envelope::Jwe, metadata: &mut UnpackMetadata) -> Result<String> {
        let protected = jwe.parse_protected()?;
        let alg = KeyWrapAlgorithm::from_name(&protected.alg)?;

        let (sender_kid, sender_public) = if alg.is_authenticated() {
            let skid = protected.skid.clone().ok_or_else(|| {
                Error::Malformed("authenticated envelope without sender key id".to_string())
            })?;
            let sender_doc = self.did_resolver.resolve(did_of_kid(&skid)).await?;
            let vm = sender_doc.find_method(&skid)?;
            let (crv, raw_public) = vm.raw_public_key()?;
            if crv != CURVE_X25519 {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "sender key {} uses curve {}",
                    skid, crv
                )));
            }
            (Some(skid), Some(key_bytes(&raw_public)?))
        } else {
            (None, None)
        };

        let mut candidates: Vec<AgreementSecret> = Vec::new();
        for kid in jwe.recipient_kids() {
            if self.secrets.has_key(kid).await? {
                let secret = self.secrets.find_key(kid).await?;
                candidates.push(agreement_secret_from(&secret)?);
            }
        }
        if candidates.is_empty() {
            return Err(Error::Resolution(
                "no private key available for any envelope recipient".to_string(),
            ));
        }

        let plaintext = jwe::decrypt(jwe, &candidates, sender_public.as_ref())?;

        if metadata.encrypted {
            // A nested encrypted layer is only produced for sender
            // protection: authenticated inside anonymous.
            if !alg.is_authenticated() || metadata.authenticated {
                return Err(Error::Malformed(
                    "unexpected nested encryption layer".to_string(),
                ));
            }
            metadata.sender_protected = true;
        } else {
            metadata.encrypted = true;
            metadata.encrypted_to_kids =
                jwe.recipient_kids().into_iter().map(String::from).collect();
        }
        if alg.is_authenticated() {
            metadata.authenticated = true;
            metadata.encrypted_from_kid = sender_kid;
        }

        String::from_utf8(plaintext)
            .map_err(|e| Error::Malformed(format!("decrypted content is not UTF-8: {}", e)))
    }

    /// Verify one signature layer and return its payload.
    async fn peel_signed(&self, jws: &crate::envelope::Jws, metadata: &mut UnpackMetadata) -> Result<String> {
        let kid = jws
            .signatures
            .first()
            .map(|s| s.header.kid.clone())
            .ok_or_else(|| Error::Malformed("signed envelope without signatures".to_string()))?;

        let signer_doc = self.did_resolver.resolve(did_of_kid(&kid)).await?;
        let (kid, public_jwk) = signer_doc.authentication_key(Some(kid.as_str()))?;

        let payload = jws::verify(jws, &kid, &public_jwk)?;

        metadata.signed = true;
        metadata.sign_from_kid = Some(kid);

        String::from_utf8(payload)
            .map_err(|e| Error::Malformed(format!("signed payload is not UTF-8: {}", e)))
    }

    /// Parse the innermost plaintext and cross-check the sender claims
    /// against what the envelope layers proved.
    fn finish_plaintext(
        &self,
        value: Value,
        metadata: &mut UnpackMetadata,
    ) -> Result<UntypedMessage> {
        let msg: UntypedMessage = serde_json::from_value(value)
            .map_err(|e| Error::Malformed(format!("invalid plaintext message: {}", e)))?;

        if let Some(skid) = &metadata.encrypted_from_kid {
            if msg.from.as_deref() != Some(did_of_kid(skid)) {
                return Err(Error::Malformed(
                    "message sender does not match the envelope sender".to_string(),
                ));
            }
        }
        if let Some(sign_kid) = &metadata.sign_from_kid {
            if let Some(from) = &msg.from {
                if from != did_of_kid(sign_kid) {
                    return Err(Error::Malformed(
                        "message sender does not match the signer".to_string(),
                    ));
                }
            }
        }

        metadata.sender_did = metadata
            .encrypted_from_kid
            .as_deref()
            .or(metadata.sign_from_kid.as_deref())
            .map(|kid| did_of_kid(kid).to_string());

        Ok(msg)
    }

    /// Sign a payload with the authentication key of `sign_from` (a DID, or
    /// a specific key id containing `#`).
    async fn sign_payload(
        &self,
        payload: &[u8],
        sign_from: &str,
        sig_alg: Option<SigAlgorithm>,
    ) -> Result<crate::envelope::Jws> {
        let (did, requested_kid) = match sign_from.contains('#') {
            true => (did_of_kid(sign_from), Some(sign_from)),
            false => (sign_from, None),
        };

        let doc = self.did_resolver.resolve(did).await?;
        let (kid, _public_jwk) = doc.authentication_key(requested_kid)?;

        let secret = self.secrets.find_key(&kid).await?;
        let jwk = secret.private_jwk();
        let alg = match sig_alg {
            Some(alg) => alg,
            None => crate::crypto::sign::algorithm_for_jwk(jwk)?,
        };

        jws::sign(payload, &kid, jwk, alg)
    }

    /// All key-agreement keys of every recipient DID.
    async fn recipient_keys(&self, to: &[String]) -> Result<Vec<RecipientKey>> {
        let mut recipients = Vec::new();
        for did in to {
            let doc = self.did_resolver.resolve(did).await?;
            let keys = doc.agreement_keys()?;
            if keys.is_empty() {
                return Err(Error::Resolution(format!(
                    "recipient {} has no key-agreement keys",
                    did
                )));
            }
            recipients.extend(keys);
        }
        Ok(recipients)
    }

    /// The sender's key-agreement secret: the first of the sender document's
    /// agreement keys we hold a private key for.
    async fn sender_agreement_secret(&self, from: &str) -> Result<AgreementSecret> {
        let doc = self.did_resolver.resolve(from).await?;
        for kid in &doc.key_agreement {
            if self.secrets.has_key(kid).await? {
                let secret = self.secrets.find_key(kid).await?;
                return agreement_secret_from(&secret);
            }
        }
        Err(Error::Resolution(format!(
            "no key-agreement secret available for sender {}",
            from
        )))
    }

    /// Enforce the pack-time invariant that `from` and every `to` entry are
    /// resolvable DIDs.
    async fn verify_addresses(&self, msg: &UntypedMessage) -> Result<()> {
        if let Some(from) = &msg.from {
            self.did_resolver.resolve(from).await?;
        }
        if let Some(to) = &msg.to {
            for did in to {
                self.did_resolver.resolve(did).await?;
            }
        }
        Ok(())
    }
}
