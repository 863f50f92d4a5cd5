//! DID document model and resolution.
//!
//! Resolution is a pluggable capability: the engine only depends on the
//! [`DIDResolver`] trait. A did:key method resolver ships in-tree as the
//! default implementation, together with a [`MultiResolver`] that dispatches
//! on the DID method and a [`StaticResolver`] backed by a fixed document map
//! for demos and tests.

use async_trait::async_trait;
use curve25519_dalek::edwards::CompressedEdwardsY;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::crypto::agreement::{key_bytes, AgreementSecret, RecipientKey, CURVE_X25519};
use crate::envelope::{b64url_decode, b64url_encode};
use crate::error::{Error, Result};
use crate::secrets::{Secret, SecretMaterial, SecretType};

/// Multicodec prefix for Ed25519 public keys.
const MULTICODEC_ED25519: [u8; 2] = [0xed, 0x01];
/// Multicodec prefix for X25519 public keys.
const MULTICODEC_X25519: [u8; 2] = [0xec, 0x01];

/// Types of verification methods carried by a DID document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMethodType {
    JsonWebKey2020,
    Ed25519VerificationKey2018,
    X25519KeyAgreementKey2019,
    EcdsaSecp256k1VerificationKey2019,
}

/// Public key material in one of its serialized forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerificationMaterial {
    JWK {
        #[serde(rename = "publicKeyJwk")]
        public_key_jwk: Value,
    },
    Multibase {
        #[serde(rename = "publicKeyMultibase")]
        public_key_multibase: String,
    },
    Base58 {
        #[serde(rename = "publicKeyBase58")]
        public_key_base58: String,
    },
}

/// A single verification method entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// Unique id within the document, usually `<did>#<fragment>`.
    pub id: String,
    #[serde(rename = "type")]
    pub type_: VerificationMethodType,
    pub controller: String,
    #[serde(flatten)]
    pub verification_material: VerificationMaterial,
}

/// A service endpoint advertised by the document. Carried through
/// resolution; the engine itself never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,
}

/// A service entry of a DID document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub service_endpoint: ServiceEndpoint,
}

/// An owned snapshot of a resolved DID document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DIDDoc {
    pub id: String,
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub authentication: Vec<String>,
    #[serde(default)]
    pub key_agreement: Vec<String>,
    #[serde(default)]
    pub service: Vec<Service>,
}

impl DIDDoc {
    /// Check the document's internal consistency: every key id referenced
    /// from the authentication and key-agreement sets must correspond to
    /// exactly one verification method entry.
    pub fn validate(&self) -> Result<()> {
        for kid in self.authentication.iter().chain(self.key_agreement.iter()) {
            let count = self
                .verification_method
                .iter()
                .filter(|vm| vm.id == *kid)
                .count();
            if count != 1 {
                return Err(Error::Validation(format!(
                    "document {} references key id {} with {} matching verification methods",
                    self.id, kid, count
                )));
            }
        }
        Ok(())
    }

    /// Look up a verification method by id.
    pub fn find_method(&self, kid: &str) -> Result<&VerificationMethod> {
        self.verification_method
            .iter()
            .find(|vm| vm.id == kid)
            .ok_or_else(|| {
                Error::Resolution(format!(
                    "key id {} not found in document {}",
                    kid, self.id
                ))
            })
    }

    /// The document's key-agreement keys as raw recipient key material.
    pub fn agreement_keys(&self) -> Result<Vec<RecipientKey>> {
        self.validate()?;

        let mut keys = Vec::with_capacity(self.key_agreement.len());
        for kid in &self.key_agreement {
            let vm = self.find_method(kid)?;
            let (crv, raw) = vm.raw_public_key()?;
            keys.push(RecipientKey {
                kid: kid.clone(),
                crv,
                public: raw,
            });
        }
        Ok(keys)
    }

    /// An authentication key as `(key id, public JWK)`. With `kid` given it
    /// must be listed in the authentication set; otherwise the document's
    /// first authentication key is used.
    pub fn authentication_key(&self, kid: Option<&str>) -> Result<(String, Value)> {
        self.validate()?;

        let kid = match kid {
            Some(kid) => {
                if !self.authentication.iter().any(|a| a == kid) {
                    return Err(Error::Resolution(format!(
                        "key id {} is not an authentication key of {}",
                        kid, self.id
                    )));
                }
                kid.to_string()
            }
            None => self
                .authentication
                .first()
                .cloned()
                .ok_or_else(|| {
                    Error::Resolution(format!("document {} has no authentication keys", self.id))
                })?,
        };

        let vm = self.find_method(&kid)?;
        Ok((kid, vm.public_jwk()?))
    }
}

impl VerificationMethod {
    /// The public key material as a JWK.
    pub fn public_jwk(&self) -> Result<Value> {
        match &self.verification_material {
            VerificationMaterial::JWK { public_key_jwk } => {
                // Strip any private part that leaked into the document.
                let mut public = serde_json::Map::new();
                let obj = public_key_jwk.as_object().ok_or_else(|| {
                    Error::Validation("publicKeyJwk is not a JSON object".to_string())
                })?;
                for (key, value) in obj {
                    if key != "d" {
                        public.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Object(public))
            }
            VerificationMaterial::Multibase {
                public_key_multibase,
            } => {
                let (_, bytes) = multibase::decode(public_key_multibase)
                    .map_err(|e| Error::Validation(format!("invalid multibase key: {}", e)))?;
                multicodec_to_jwk(&bytes)
            }
            VerificationMaterial::Base58 { public_key_base58 } => {
                let bytes = bs58::decode(public_key_base58)
                    .into_vec()
                    .map_err(|e| Error::Validation(format!("invalid base58 key: {}", e)))?;
                // Base58 material carries no codec prefix; the method type
                // decides the curve.
                match self.type_ {
                    VerificationMethodType::X25519KeyAgreementKey2019 => Ok(json!({
                        "kty": "OKP",
                        "crv": CURVE_X25519,
                        "x": b64url_encode(bytes),
                    })),
                    _ => Ok(json!({
                        "kty": "OKP",
                        "crv": "Ed25519",
                        "x": b64url_encode(bytes),
                    })),
                }
            }
        }
    }

    /// The raw public key bytes with their curve name.
    pub fn raw_public_key(&self) -> Result<(String, Vec<u8>)> {
        let jwk = self.public_jwk()?;
        let crv = jwk
            .get("crv")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("JWK has no crv parameter".to_string()))?
            .to_string();
        let x = jwk
            .get("x")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("JWK has no x parameter".to_string()))?;
        Ok((crv, b64url_decode(x)?))
    }
}

/// Convert multicodec-prefixed key bytes to a public JWK.
fn multicodec_to_jwk(bytes: &[u8]) -> Result<Value> {
    if bytes.len() < 2 {
        return Err(Error::Validation("multicodec key too short".to_string()));
    }
    let (prefix, key) = bytes.split_at(2);
    match [prefix[0], prefix[1]] {
        MULTICODEC_ED25519 => Ok(json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": b64url_encode(key),
        })),
        MULTICODEC_X25519 => Ok(json!({
            "kty": "OKP",
            "crv": CURVE_X25519,
            "x": b64url_encode(key),
        })),
        other => Err(Error::UnsupportedAlgorithm(format!(
            "multicodec key type {:02x}{:02x}",
            other[0], other[1]
        ))),
    }
}

/// A capability for resolving DIDs to DID documents.
///
/// Implementations must be idempotent: resolving the same DID repeatedly is
/// always safe. Unknown DIDs fail with [`Error::Resolution`].
#[async_trait]
pub trait DIDResolver: Send + Sync + Debug {
    /// Resolve a DID to an owned document snapshot.
    async fn resolve(&self, did: &str) -> Result<DIDDoc>;
}

/// A resolver for one specific DID method.
#[async_trait]
pub trait DIDMethodResolver: Send + Sync + Debug {
    /// The method name this resolver handles (e.g. "key").
    fn method(&self) -> &str;

    /// Resolve a DID of this method.
    async fn resolve_method(&self, did: &str) -> Result<DIDDoc>;
}

/// Resolver for the did:key method.
///
/// Supports Ed25519 (multicodec 0xed01) and X25519 (0xec01) keys. An Ed25519
/// identity key additionally yields a derived X25519 key-agreement entry, so
/// a single did:key identifier supports both signing and encryption.
#[derive(Debug, Default)]
pub struct KeyMethodResolver;

#[async_trait]
impl DIDMethodResolver for KeyMethodResolver {
    fn method(&self) -> &str {
        "key"
    }

    async fn resolve_method(&self, did: &str) -> Result<DIDDoc> {
        let multibase_key = did
            .strip_prefix("did:key:")
            .ok_or_else(|| Error::Resolution(format!("not a did:key identifier: {}", did)))?;

        let (_, bytes) = multibase::decode(multibase_key)
            .map_err(|e| Error::Resolution(format!("invalid did:key encoding: {}", e)))?;
        if bytes.len() < 2 {
            return Err(Error::Resolution("did:key material too short".to_string()));
        }

        let doc = match [bytes[0], bytes[1]] {
            MULTICODEC_ED25519 => {
                let ed_public = &bytes[2..];
                let auth_id = format!("{}#{}", did, multibase_key);

                let x25519_public = derive_agreement_public(ed_public)?;
                let agreement_multibase = encode_multikey(&MULTICODEC_X25519, &x25519_public);
                let agreement_id = format!("{}#{}", did, agreement_multibase);

                DIDDoc {
                    id: did.to_string(),
                    verification_method: vec![
                        VerificationMethod {
                            id: auth_id.clone(),
                            type_: VerificationMethodType::Ed25519VerificationKey2018,
                            controller: did.to_string(),
                            verification_material: VerificationMaterial::Multibase {
                                public_key_multibase: multibase_key.to_string(),
                            },
                        },
                        VerificationMethod {
                            id: agreement_id.clone(),
                            type_: VerificationMethodType::X25519KeyAgreementKey2019,
                            controller: did.to_string(),
                            verification_material: VerificationMaterial::Multibase {
                                public_key_multibase: agreement_multibase,
                            },
                        },
                    ],
                    authentication: vec![auth_id],
                    key_agreement: vec![agreement_id],
                    service: vec![],
                }
            }
            MULTICODEC_X25519 => {
                let agreement_id = format!("{}#{}", did, multibase_key);
                DIDDoc {
                    id: did.to_string(),
                    verification_method: vec![VerificationMethod {
                        id: agreement_id.clone(),
                        type_: VerificationMethodType::X25519KeyAgreementKey2019,
                        controller: did.to_string(),
                        verification_material: VerificationMaterial::Multibase {
                            public_key_multibase: multibase_key.to_string(),
                        },
                    }],
                    authentication: vec![],
                    key_agreement: vec![agreement_id],
                    service: vec![],
                }
            }
            other => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "did:key multicodec {:02x}{:02x}",
                    other[0], other[1]
                )))
            }
        };

        Ok(doc)
    }
}

/// A resolver aggregating multiple DID method resolvers. New methods can be
/// registered at runtime.
#[derive(Debug)]
pub struct MultiResolver {
    resolvers: RwLock<HashMap<String, Arc<dyn DIDMethodResolver>>>,
}

impl Default for MultiResolver {
    fn default() -> Self {
        let resolver = Self::new();
        resolver.add_resolver(Arc::new(KeyMethodResolver));
        resolver
    }
}

impl MultiResolver {
    /// Creates a new empty multi-resolver.
    pub fn new() -> Self {
        Self {
            resolvers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a DID method resolver.
    pub fn add_resolver(&self, resolver: Arc<dyn DIDMethodResolver>) {
        if let Ok(mut resolvers) = self.resolvers.write() {
            resolvers.insert(resolver.method().to_string(), resolver);
        }
    }

    /// The DID methods this resolver currently handles.
    pub fn supported_methods(&self) -> Vec<String> {
        match self.resolvers.read() {
            Ok(resolvers) => resolvers.keys().cloned().collect(),
            Err(_) => vec![],
        }
    }
}

#[async_trait]
impl DIDResolver for MultiResolver {
    async fn resolve(&self, did: &str) -> Result<DIDDoc> {
        let mut parts = did.splitn(3, ':');
        let (scheme, method) = (parts.next(), parts.next());
        if scheme != Some("did") || parts.next().is_none() {
            return Err(Error::Resolution(format!("invalid DID: {}", did)));
        }
        let method = method.unwrap_or_default();

        // Clone the Arc out so no lock is held across the await.
        let resolver = self
            .resolvers
            .read()
            .ok()
            .and_then(|resolvers| resolvers.get(method).cloned())
            .ok_or_else(|| Error::Resolution(format!("unsupported DID method: {}", method)))?;

        let doc = resolver.resolve_method(did).await?;
        doc.validate()?;
        Ok(doc)
    }
}

/// A resolver over a fixed set of documents, for demos and tests.
#[derive(Debug, Default)]
pub struct StaticResolver {
    docs: RwLock<HashMap<String, DIDDoc>>,
}

impl StaticResolver {
    pub fn new(docs: impl IntoIterator<Item = DIDDoc>) -> Self {
        Self {
            docs: RwLock::new(docs.into_iter().map(|d| (d.id.clone(), d)).collect()),
        }
    }

    /// Add or replace a document.
    pub fn add(&self, doc: DIDDoc) {
        if let Ok(mut docs) = self.docs.write() {
            docs.insert(doc.id.clone(), doc);
        }
    }
}

#[async_trait]
impl DIDResolver for StaticResolver {
    async fn resolve(&self, did: &str) -> Result<DIDDoc> {
        self.docs
            .read()
            .ok()
            .and_then(|docs| docs.get(did).cloned())
            .ok_or_else(|| Error::Resolution(format!("unknown DID: {}", did)))
    }
}

/// Derive the X25519 public key matching an Ed25519 public key
/// (Edwards-to-Montgomery map).
pub fn derive_agreement_public(ed25519_public: &[u8]) -> Result<[u8; 32]> {
    let compressed = CompressedEdwardsY::from_slice(ed25519_public)
        .map_err(|_| Error::Validation("invalid Ed25519 public key length".to_string()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| Error::Validation("invalid Ed25519 public key".to_string()))?;
    Ok(point.to_montgomery().to_bytes())
}

fn encode_multikey(prefix: &[u8; 2], key: &[u8]) -> String {
    let mut prefixed = Vec::with_capacity(2 + key.len());
    prefixed.extend_from_slice(prefix);
    prefixed.extend_from_slice(key);
    multibase::encode(multibase::Base::Base58Btc, prefixed)
}

/// A freshly generated did:key identity: the DID plus the two private keys
/// (signing and key agreement) as storable secrets.
#[derive(Debug, Clone)]
pub struct GeneratedIdentity {
    pub did: String,
    pub signing_secret: Secret,
    pub agreement_secret: Secret,
}

/// Generate a new Ed25519 did:key identity.
///
/// The key-agreement secret is the X25519 counterpart of the Ed25519 seed,
/// matching the derived entry the did:key resolver publishes, so packing to
/// and from the new DID works without further provisioning.
pub fn generate_did_key() -> Result<GeneratedIdentity> {
    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let ed_public = signing_key.verifying_key().to_bytes();
    let seed = signing_key.to_bytes();

    let multibase_key = encode_multikey(&MULTICODEC_ED25519, &ed_public);
    let did = format!("did:key:{}", multibase_key);
    let signing_kid = format!("{}#{}", did, multibase_key);

    // Standard Ed25519-to-X25519 secret conversion: clamped head of
    // SHA-512(seed). Clamping is applied by x25519-dalek on use.
    let hash = Sha512::digest(seed);
    let mut agreement_seed = [0u8; 32];
    agreement_seed.copy_from_slice(&hash[..32]);
    let agreement_public = X25519PublicKey::from(&StaticSecret::from(agreement_seed)).to_bytes();

    let agreement_multibase = encode_multikey(&MULTICODEC_X25519, &agreement_public);
    let agreement_kid = format!("{}#{}", did, agreement_multibase);

    let signing_secret = Secret {
        id: signing_kid.clone(),
        type_: SecretType::JsonWebKey2020,
        secret_material: SecretMaterial::JWK {
            private_key_jwk: json!({
                "kty": "OKP",
                "crv": "Ed25519",
                "kid": signing_kid,
                "x": b64url_encode(ed_public),
                "d": b64url_encode(seed),
            }),
        },
    };

    let agreement_secret = Secret {
        id: agreement_kid.clone(),
        type_: SecretType::JsonWebKey2020,
        secret_material: SecretMaterial::JWK {
            private_key_jwk: json!({
                "kty": "OKP",
                "crv": CURVE_X25519,
                "kid": agreement_kid,
                "x": b64url_encode(agreement_public),
                "d": b64url_encode(agreement_seed),
            }),
        },
    };

    Ok(GeneratedIdentity {
        did,
        signing_secret,
        agreement_secret,
    })
}

/// Split a key id into its DID part, if it has the `<did>#<fragment>` form.
pub fn did_of_kid(kid: &str) -> &str {
    kid.split('#').next().unwrap_or(kid)
}

/// Turn a private agreement Secret into the raw key material used by the
/// envelope engine.
pub fn agreement_secret_from(secret: &Secret) -> Result<AgreementSecret> {
    let jwk = secret.private_jwk();
    let crv = jwk.get("crv").and_then(|v| v.as_str());
    if crv != Some(CURVE_X25519) {
        return Err(Error::UnsupportedAlgorithm(format!(
            "agreement key {} has curve {:?}, expected {}",
            secret.id, crv, CURVE_X25519
        )));
    }
    let d = jwk
        .get("d")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation(format!("secret {} has no private part", secret.id)))?;
    Ok(AgreementSecret {
        kid: secret.id.clone(),
        secret: key_bytes(&b64url_decode(d)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn key_resolver_builds_consistent_document() {
        let identity = generate_did_key().unwrap();
        let resolver = KeyMethodResolver;

        let doc = resolver.resolve_method(&identity.did).await.unwrap();
        assert_eq!(doc.id, identity.did);
        doc.validate().unwrap();

        assert_eq!(doc.authentication.len(), 1);
        assert_eq!(doc.key_agreement.len(), 1);
        assert_eq!(doc.authentication[0], identity.signing_secret.id);
        assert_eq!(doc.key_agreement[0], identity.agreement_secret.id);
    }

    #[tokio::test]
    async fn derived_agreement_key_matches_generated_secret() {
        let identity = generate_did_key().unwrap();
        let doc = KeyMethodResolver.resolve_method(&identity.did).await.unwrap();

        let keys = doc.agreement_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].crv, CURVE_X25519);

        // The public derived from the stored private key must equal the one
        // the resolver publishes.
        let secret = agreement_secret_from(&identity.agreement_secret).unwrap();
        let public = X25519PublicKey::from(&StaticSecret::from(secret.secret)).to_bytes();
        assert_eq!(keys[0].public, public);
    }

    #[tokio::test]
    async fn multi_resolver_dispatches_and_rejects() {
        let resolver = MultiResolver::default();
        let identity = generate_did_key().unwrap();

        assert!(resolver.resolve(&identity.did).await.is_ok());

        let err = resolver.resolve("did:unsupported:123").await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));

        let err = resolver.resolve("not-a-did").await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[tokio::test]
    async fn static_resolver_returns_not_found() {
        let resolver = StaticResolver::default();
        let err = resolver.resolve("did:example:nobody").await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[test]
    fn document_validation_catches_dangling_references() {
        let doc = DIDDoc {
            id: "did:example:alice".into(),
            verification_method: vec![],
            authentication: vec!["did:example:alice#key-1".into()],
            key_agreement: vec![],
            service: vec![],
        };
        assert!(doc.validate().is_err());
    }

    #[test]
    fn did_of_kid_strips_fragment() {
        assert_eq!(did_of_kid("did:example:alice#key-1"), "did:example:alice");
        assert_eq!(did_of_kid("did:example:alice"), "did:example:alice");
    }
}
