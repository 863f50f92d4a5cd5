//! CLI tool for managing didpost identities and packing messages.
//!
//! This module provides command-line utilities for creating did:key
//! identities, resolving DIDs, and packing/unpacking messages against the
//! local key store.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use didpost_msg::Message;

use crate::did::{generate_did_key, DIDResolver, MultiResolver};
use crate::error::{Error, Result};
use crate::packing::{PackOptions, Packer};
use crate::secrets::{FileSecretStore, SecretsResolver};

/// didpost CLI tool for DID and message management
#[derive(Parser, Debug)]
#[command(name = "didpost")]
#[command(about = "CLI tool for didpost identities and message packing", long_about = None)]
pub struct Cli {
    /// Path to the key store file (defaults to ~/.didpost/keys.json)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new did:key identity and store its secrets
    #[command(name = "generate")]
    Generate,

    /// Lookup and resolve a DID to its DID document
    #[command(name = "lookup")]
    Lookup {
        /// The DID to resolve
        #[arg(required = true)]
        did: String,
    },

    /// Pack a message for one or more recipients
    #[command(name = "pack")]
    Pack {
        /// Recipient DIDs
        #[arg(short, long, required = true, value_delimiter = ',')]
        to: Vec<String>,

        /// Sender DID; omitting it packs anonymously
        #[arg(short, long)]
        from: Option<String>,

        /// Sign the message with the sender's authentication key
        #[arg(long)]
        sign: bool,

        /// Hide the sender key id from the envelope header
        #[arg(long)]
        protect_sender: bool,

        /// Message type URI
        #[arg(
            long = "type",
            default_value = "https://didcomm.org/basicmessage/2.0/message"
        )]
        type_: String,

        /// Message body as JSON; read from stdin when omitted
        #[arg(long)]
        body: Option<String>,
    },

    /// Unpack a received message
    #[command(name = "unpack")]
    Unpack {
        /// Wire message; read from stdin when omitted
        message: Option<String>,
    },
}

/// Run the CLI with the arguments from the environment.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(Error::Io)?;
    runtime.block_on(execute(cli))
}

async fn execute(cli: Cli) -> Result<()> {
    let store = match &cli.store {
        Some(path) => FileSecretStore::with_path(path.clone()),
        None => FileSecretStore::new()?,
    };
    let secrets: Arc<dyn SecretsResolver> = Arc::new(store);
    let resolver: Arc<dyn DIDResolver> = Arc::new(MultiResolver::default());
    let packer = Packer::new(resolver.clone(), secrets.clone());

    match cli.command {
        Commands::Generate => {
            let identity = generate_did_key()?;
            secrets.store(identity.signing_secret.clone()).await?;
            secrets.store(identity.agreement_secret.clone()).await?;

            println!("{}", identity.did);
            eprintln!("  signing key:   {}", identity.signing_secret.id);
            eprintln!("  agreement key: {}", identity.agreement_secret.id);
        }
        Commands::Lookup { did } => {
            let doc = resolver.resolve(&did).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Pack {
            to,
            from,
            sign,
            protect_sender,
            type_,
            body,
        } => {
            let body: Value = match body {
                Some(body) => serde_json::from_str(&body)?,
                None => serde_json::from_str(&read_stdin()?)?,
            };

            let mut msg = Message::new(type_, body).with_to(to);
            if let Some(from) = &from {
                msg = msg.with_from(from.clone());
            }

            let mut options = PackOptions::new().with_protected_sender(protect_sender);
            if sign {
                let signer = from.clone().ok_or_else(|| {
                    Error::Validation("--sign requires --from".to_string())
                })?;
                options = options.with_sign_from(signer);
            }

            let (wire, _metadata) = packer.pack_encrypted(&msg, &options).await?;
            println!("{}", wire);
        }
        Commands::Unpack { message } => {
            let raw = match message {
                Some(message) => message,
                None => read_stdin()?,
            };

            let (msg, metadata) = packer.unpack(&raw).await?;
            println!("{}", serde_json::to_string_pretty(&msg)?);
            eprintln!(
                "  encrypted: {}, authenticated: {}, signed: {}, sender: {}",
                metadata.encrypted,
                metadata.authenticated,
                metadata.signed,
                metadata.sender_did.as_deref().unwrap_or("(anonymous)")
            );
        }
    }

    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}
