//! Binary entrypoint for the didpost CLI tool.
//!
//! Provides command-line utilities for creating did:key identities,
//! resolving DIDs, and packing/unpacking messages against the key store in
//! ~/.didpost/keys.json.

use didpost_agent::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
