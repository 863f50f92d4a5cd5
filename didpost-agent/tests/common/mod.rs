//! Shared helpers for integration tests: agents with a generated did:key
//! identity, an in-memory secrets store, and the default resolver.

use std::sync::Arc;

use didpost_agent::did::{generate_did_key, DIDResolver, MultiResolver};
use didpost_agent::packing::Packer;
use didpost_agent::secrets::{InMemorySecrets, SecretsResolver};

pub struct TestAgent {
    pub did: String,
    pub packer: Packer,
}

/// A party with a fresh did:key identity and its own secrets store.
pub async fn new_agent() -> TestAgent {
    let identity = generate_did_key().unwrap();
    let secrets = Arc::new(InMemorySecrets::default());
    secrets.store(identity.signing_secret).await.unwrap();
    secrets.store(identity.agreement_secret).await.unwrap();

    let resolver: Arc<dyn DIDResolver> = Arc::new(MultiResolver::default());
    let packer = Packer::new(resolver, secrets);

    TestAgent {
        did: identity.did,
        packer,
    }
}
