//! Wire envelope structures and format detection.
//!
//! Every packed message is a single JSON object. Which envelope it is gets
//! decided from the object's shape alone, never from out-of-band hints:
//! `ciphertext` + `recipients` mean encrypted, `payload` + `signatures` mean
//! signed, a `type` + `body` pair means plaintext. Anything else is rejected
//! as malformed.
//!
//! All binary fields are base64url-encoded without padding. The encrypted
//! envelope keeps its protected header as the exact base64url string produced
//! at encryption time because those bytes are the associated data of the
//! authenticated cipher; re-serializing the header is never allowed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Media type of an encrypted envelope.
pub const TYP_ENCRYPTED: &str = "application/didcomm-encrypted+json";

/// Media type of a signed envelope.
pub const TYP_SIGNED: &str = "application/didcomm-signed+json";

/// Encode bytes as base64url without padding.
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url-without-padding into bytes.
pub fn b64url_decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| Error::Malformed(format!("invalid base64url field: {}", e)))
}

/// Ephemeral public key carried in the protected header of an encrypted
/// envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EphemeralPublicKey {
    /// Key type, always "OKP" for the curves this engine produces.
    pub kty: String,
    /// Curve name, e.g. "X25519".
    pub crv: String,
    /// Public key bytes, base64url.
    pub x: String,
}

/// Decoded protected header of an encrypted envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JweProtected {
    /// Media type, [`TYP_ENCRYPTED`].
    pub typ: String,
    /// Key agreement / key wrap algorithm, e.g. "ECDH-ES+A256KW".
    pub alg: String,
    /// Content encryption algorithm, e.g. "A256GCM".
    pub enc: String,
    /// Sender key id. Absent for anonymous encryption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skid: Option<String>,
    /// Agreement PartyUInfo: base64url of the sender key id. Absent for
    /// anonymous encryption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,
    /// Agreement PartyVInfo: base64url of a digest over the recipient key
    /// ids.
    pub apv: String,
    /// Ephemeral key used for this envelope's key agreement.
    pub epk: EphemeralPublicKey,
}

/// Per-recipient unprotected header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JweRecipientHeader {
    /// Key id of the recipient key-agreement key this slot is wrapped for.
    pub kid: String,
}

/// One recipient slot: the content encryption key wrapped for one
/// key-agreement key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JweRecipient {
    pub header: JweRecipientHeader,
    /// AES-KW-wrapped content encryption key, base64url.
    pub encrypted_key: String,
}

/// Encrypted envelope in JSON serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwe {
    /// Protected header exactly as encoded at encryption time (base64url of
    /// the header JSON). These bytes are the AAD of the content cipher.
    pub protected: String,
    pub recipients: Vec<JweRecipient>,
    /// Initialization vector, base64url.
    pub iv: String,
    /// Ciphertext, base64url.
    pub ciphertext: String,
    /// Authentication tag, base64url.
    pub tag: String,
}

impl Jwe {
    /// Decode and parse the protected header.
    pub fn parse_protected(&self) -> Result<JweProtected> {
        let bytes = b64url_decode(&self.protected)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Malformed(format!("invalid protected header: {}", e)))
    }

    /// The recipient key ids referenced by this envelope, in slot order.
    pub fn recipient_kids(&self) -> Vec<&str> {
        self.recipients
            .iter()
            .map(|r| r.header.kid.as_str())
            .collect()
    }
}

/// Decoded protected header of a signed envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwsProtected {
    /// Media type, [`TYP_SIGNED`].
    pub typ: String,
    /// Signature algorithm, e.g. "EdDSA".
    pub alg: String,
}

/// Unprotected per-signature header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwsSignatureHeader {
    /// Key id of the signing key.
    pub kid: String,
}

/// One signature over the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwsSignature {
    pub header: JwsSignatureHeader,
    /// Protected header exactly as encoded at signing time (base64url).
    pub protected: String,
    /// Signature bytes, base64url.
    pub signature: String,
}

/// Signed envelope in JSON serialization with a detached-style payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jws {
    /// Signed content, base64url.
    pub payload: String,
    pub signatures: Vec<JwsSignature>,
}

impl Jws {
    /// Decode and parse the protected header of one signature entry.
    pub fn parse_protected(&self, index: usize) -> Result<JwsProtected> {
        let signature = self
            .signatures
            .get(index)
            .ok_or_else(|| Error::Malformed("signature index out of range".into()))?;
        let bytes = b64url_decode(&signature.protected)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Malformed(format!("invalid protected header: {}", e)))
    }
}

/// A wire envelope classified by shape. Layers nest: an encrypted envelope
/// may contain a signed envelope, which contains the plaintext message.
#[derive(Debug, Clone)]
pub enum Envelope {
    Encrypted(Jwe),
    Signed(Jws),
    Plaintext(Value),
}

impl Envelope {
    /// Classify raw wire bytes by JSON shape.
    ///
    /// Returns [`Error::Malformed`] when the input is not a JSON object or
    /// matches none of the three known shapes.
    pub fn detect(raw: &str) -> Result<Envelope> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::Malformed(format!("not valid JSON: {}", e)))?;
        Self::detect_value(value)
    }

    /// Classify an already-parsed JSON value by shape.
    pub fn detect_value(value: Value) -> Result<Envelope> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Malformed("envelope is not a JSON object".into()))?;

        if obj.contains_key("ciphertext") && obj.contains_key("recipients") {
            let jwe: Jwe = serde_json::from_value(value)
                .map_err(|e| Error::Malformed(format!("invalid encrypted envelope: {}", e)))?;
            return Ok(Envelope::Encrypted(jwe));
        }

        if obj.contains_key("payload") && obj.contains_key("signatures") {
            let jws: Jws = serde_json::from_value(value)
                .map_err(|e| Error::Malformed(format!("invalid signed envelope: {}", e)))?;
            return Ok(Envelope::Signed(jws));
        }

        if obj.contains_key("type") && obj.contains_key("body") {
            return Ok(Envelope::Plaintext(value));
        }

        Err(Error::Malformed(
            "JSON matches no known envelope shape".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn b64url_roundtrip_has_no_padding() {
        let encoded = b64url_encode(b"didpost");
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), b"didpost");
    }

    #[test]
    fn detects_encrypted_shape() {
        let raw = json!({
            "protected": "eyJ0eXAiOiJ4In0",
            "recipients": [{"header": {"kid": "did:example:bob#key-1"}, "encrypted_key": "AAAA"}],
            "iv": "AAAA",
            "ciphertext": "AAAA",
            "tag": "AAAA"
        })
        .to_string();

        assert_matches!(Envelope::detect(&raw), Ok(Envelope::Encrypted(_)));
    }

    #[test]
    fn detects_signed_shape() {
        let raw = json!({
            "payload": "AAAA",
            "signatures": [{
                "header": {"kid": "did:example:alice#key-1"},
                "protected": "AAAA",
                "signature": "AAAA"
            }]
        })
        .to_string();

        assert_matches!(Envelope::detect(&raw), Ok(Envelope::Signed(_)));
    }

    #[test]
    fn detects_plaintext_shape() {
        let raw = json!({
            "id": "1",
            "type": "https://didpost.example/test",
            "body": {}
        })
        .to_string();

        assert_matches!(Envelope::detect(&raw), Ok(Envelope::Plaintext(_)));
    }

    #[test]
    fn rejects_unknown_shape() {
        assert_matches!(
            Envelope::detect(r#"{"hello": "world"}"#),
            Err(Error::Malformed(_))
        );
        assert_matches!(Envelope::detect("[1, 2, 3]"), Err(Error::Malformed(_)));
        assert_matches!(Envelope::detect("not json"), Err(Error::Malformed(_)));
    }
}
