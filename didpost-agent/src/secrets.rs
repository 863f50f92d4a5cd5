//! Private key material and the secrets-resolver capability.
//!
//! A [`Secret`] is the private counterpart of a verification method, keyed
//! by key id. The engine only ever borrows a secret for the duration of one
//! pack or unpack operation: it never caches, mutates, or evicts stored
//! secrets. Two store implementations ship in-tree: an in-memory map for
//! demos and tests, and a plaintext JSON file store with atomic writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default directory for didpost configuration and keys.
pub const DEFAULT_DIDPOST_DIR: &str = ".didpost";
/// Default filename for the keys file.
pub const DEFAULT_KEYS_FILE: &str = "keys.json";

/// Secret key material type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SecretType {
    /// JSON Web Key 2020.
    JsonWebKey2020,
}

/// Secret key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SecretMaterial {
    /// JSON Web Key.
    JWK {
        /// Private key in JWK format.
        private_key_jwk: Value,
    },
}

/// A private key, keyed by the id of the verification method it backs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Secret {
    /// Key id, usually `<did>#<fragment>`.
    pub id: String,

    /// Secret type.
    pub type_: SecretType,

    /// Secret material.
    pub secret_material: SecretMaterial,
}

impl Secret {
    /// The private key as a JWK.
    pub fn private_jwk(&self) -> &Value {
        match &self.secret_material {
            SecretMaterial::JWK { private_key_jwk } => private_key_jwk,
        }
    }
}

/// A capability for looking up private keys by key id.
///
/// Stores own their secrets exclusively; implementations are responsible for
/// their internal concurrency safety, and writes must be atomic per key.
#[async_trait]
pub trait SecretsResolver: Send + Sync + Debug {
    /// Look up a secret by key id. Fails with [`Error::Resolution`] when the
    /// key is unknown.
    async fn find_key(&self, kid: &str) -> Result<Secret>;

    /// Whether a secret with this key id exists.
    async fn has_key(&self, kid: &str) -> Result<bool>;

    /// Store a secret. An existing secret with the same key id is replaced.
    async fn store(&self, secret: Secret) -> Result<()>;
}

/// In-memory secrets store.
#[derive(Debug, Default)]
pub struct InMemorySecrets {
    keys: tokio::sync::RwLock<HashMap<String, Secret>>,
}

impl InMemorySecrets {
    pub fn new(secrets: impl IntoIterator<Item = Secret>) -> Self {
        Self {
            keys: tokio::sync::RwLock::new(
                secrets.into_iter().map(|s| (s.id.clone(), s)).collect(),
            ),
        }
    }
}

#[async_trait]
impl SecretsResolver for InMemorySecrets {
    async fn find_key(&self, kid: &str) -> Result<Secret> {
        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| Error::Resolution(format!("secret not found: {}", kid)))
    }

    async fn has_key(&self, kid: &str) -> Result<bool> {
        Ok(self.keys.read().await.contains_key(kid))
    }

    async fn store(&self, secret: Secret) -> Result<()> {
        self.keys.write().await.insert(secret.id.clone(), secret);
        Ok(())
    }
}

/// On-disk layout of the file-backed store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct KeyFile {
    keys: HashMap<String, Secret>,
}

/// Plaintext file-backed secrets store.
///
/// Keys are stored as a key id to private-JWK mapping in a single JSON file
/// (`~/.didpost/keys.json` by default). Writes go through a temp file and an
/// atomic rename, and concurrent writers are serialized behind a mutex, so a
/// store operation either lands completely or not at all.
///
/// The file is not encrypted at rest; suitable for development and demo
/// deployments only.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSecretStore {
    /// Create a store at the default path, `~/.didpost/keys.json`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("cannot determine home directory".to_string()))?;
        Ok(Self::with_path(
            home.join(DEFAULT_DIDPOST_DIR).join(DEFAULT_KEYS_FILE),
        ))
    }

    /// Create a store at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The path this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<KeyFile> {
        if !self.path.exists() {
            return Ok(KeyFile::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("corrupt key file {}: {}", self.path.display(), e)))
    }

    fn save(&self, file: &KeyFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(file)?;

        // Write-then-rename keeps the visible file complete at all times.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// All key ids currently in the store.
    pub fn list_kids(&self) -> Result<Vec<String>> {
        Ok(self.load()?.keys.keys().cloned().collect())
    }
}

#[async_trait]
impl SecretsResolver for FileSecretStore {
    async fn find_key(&self, kid: &str) -> Result<Secret> {
        self.load()?
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| Error::Resolution(format!("secret not found: {}", kid)))
    }

    async fn has_key(&self, kid: &str) -> Result<bool> {
        Ok(self.load()?.keys.contains_key(kid))
    }

    async fn store(&self, secret: Secret) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load()?;
        file.keys.insert(secret.id.clone(), secret);
        self.save(&file)
    }
}
