//! End-to-end packing and unpacking across two parties.

mod common;

use common::new_agent;
use didpost_agent::envelope::{Envelope, Jwe};
use didpost_agent::packing::PackOptions;
use didpost_msg::Message;
use serde_json::json;

fn test_message(from: Option<&str>, to: &[&str]) -> Message {
    let mut msg = Message::new(
        "https://didcomm.org/basicmessage/2.0/message",
        json!({"content": "hello from the tests"}),
    )
    .with_to(to.iter().map(|s| s.to_string()).collect());
    if let Some(from) = from {
        msg = msg.with_from(from);
    }
    msg
}

fn outer_jwe(wire: &str) -> Jwe {
    match Envelope::detect(wire).unwrap() {
        Envelope::Encrypted(jwe) => jwe,
        other => panic!("expected an encrypted envelope, got {:?}", other),
    }
}

#[tokio::test]
async fn plaintext_roundtrip() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    let msg = test_message(Some(&alice.did), &[&bob.did]);
    let wire = alice.packer.pack_plaintext(&msg).await.unwrap();

    let (unpacked, metadata) = bob.packer.unpack(&wire).await.unwrap();
    assert_eq!(unpacked, msg);
    assert!(!metadata.encrypted);
    assert!(!metadata.signed);
    assert!(metadata.sender_did.is_none());
}

#[tokio::test]
async fn authenticated_encryption_roundtrip() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    let msg = test_message(Some(&alice.did), &[&bob.did]);
    let (wire, pack_metadata) = alice
        .packer
        .pack_encrypted(&msg, &PackOptions::new())
        .await
        .unwrap();

    assert_eq!(pack_metadata.to_kids.len(), 1);
    assert!(pack_metadata.from_kid.is_some());
    assert!(pack_metadata.sign_from_kid.is_none());

    let protected = outer_jwe(&wire).parse_protected().unwrap();
    assert_eq!(protected.alg, "ECDH-1PU+A256KW");
    assert_eq!(
        protected.skid.as_deref(),
        pack_metadata.from_kid.as_deref()
    );

    let (unpacked, metadata) = bob.packer.unpack(&wire).await.unwrap();
    assert_eq!(unpacked.id, msg.id);
    assert_eq!(unpacked.type_, msg.type_);
    assert_eq!(unpacked.body, msg.body);
    assert_eq!(unpacked.from, msg.from);
    assert_eq!(unpacked.to, msg.to);

    assert!(metadata.encrypted);
    assert!(metadata.authenticated);
    assert!(!metadata.signed);
    assert!(!metadata.sender_protected);
    assert_eq!(metadata.sender_did.as_deref(), Some(alice.did.as_str()));
}

#[tokio::test]
async fn anonymous_encryption_roundtrip() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    let msg = test_message(None, &[&bob.did]);
    let (wire, pack_metadata) = alice
        .packer
        .pack_encrypted(&msg, &PackOptions::new())
        .await
        .unwrap();
    assert!(pack_metadata.from_kid.is_none());

    let protected = outer_jwe(&wire).parse_protected().unwrap();
    assert_eq!(protected.alg, "ECDH-ES+A256KW");
    assert!(protected.skid.is_none());
    assert!(protected.apu.is_none());

    let (unpacked, metadata) = bob.packer.unpack(&wire).await.unwrap();
    assert_eq!(unpacked.body, msg.body);
    assert!(metadata.encrypted);
    assert!(!metadata.authenticated);
    assert!(metadata.sender_did.is_none());
}

#[tokio::test]
async fn signed_only_roundtrip() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    let msg = test_message(Some(&alice.did), &[&bob.did]);
    let wire = alice.packer.pack_signed(&msg, &alice.did).await.unwrap();

    let (unpacked, metadata) = bob.packer.unpack(&wire).await.unwrap();
    assert_eq!(unpacked, msg);
    assert!(!metadata.encrypted);
    assert!(metadata.signed);
    assert_eq!(metadata.sender_did.as_deref(), Some(alice.did.as_str()));

    let sign_kid = metadata.sign_from_kid.unwrap();
    assert!(sign_kid.starts_with(&alice.did));
}

#[tokio::test]
async fn sign_then_encrypt_reports_both_layers() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    let msg = test_message(Some(&alice.did), &[&bob.did]);
    let options = PackOptions::new().with_sign_from(alice.did.clone());
    let (wire, pack_metadata) = alice.packer.pack_encrypted(&msg, &options).await.unwrap();

    assert!(pack_metadata.sign_from_kid.is_some());

    // The wire form is encrypted; the signature is inside.
    let protected = outer_jwe(&wire).parse_protected().unwrap();
    assert_eq!(protected.alg, "ECDH-1PU+A256KW");

    let (unpacked, metadata) = bob.packer.unpack(&wire).await.unwrap();
    assert_eq!(unpacked.body, msg.body);
    assert!(metadata.encrypted);
    assert!(metadata.authenticated);
    assert!(metadata.signed);
    assert_eq!(metadata.sender_did.as_deref(), Some(alice.did.as_str()));
    assert!(metadata.sign_from_kid.unwrap().starts_with(&alice.did));
}

#[tokio::test]
async fn protected_sender_hides_skid_but_reports_sender() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    let msg = test_message(Some(&alice.did), &[&bob.did]);
    let options = PackOptions::new().with_protected_sender(true);
    let (wire, _) = alice.packer.pack_encrypted(&msg, &options).await.unwrap();

    // The outer envelope is anonymous: no sender key id anywhere in its
    // header.
    let protected = outer_jwe(&wire).parse_protected().unwrap();
    assert_eq!(protected.alg, "ECDH-ES+A256KW");
    assert!(protected.skid.is_none());
    assert!(!wire.contains(&alice.did));

    let (unpacked, metadata) = bob.packer.unpack(&wire).await.unwrap();
    assert_eq!(unpacked.body, msg.body);
    assert!(metadata.encrypted);
    assert!(metadata.authenticated);
    assert!(metadata.sender_protected);
    assert_eq!(metadata.sender_did.as_deref(), Some(alice.did.as_str()));
}

#[tokio::test]
async fn multi_recipient_either_party_can_unpack() {
    let alice = new_agent().await;
    let bob = new_agent().await;
    let carol = new_agent().await;

    let msg = test_message(Some(&alice.did), &[&bob.did, &carol.did]);
    let (wire, pack_metadata) = alice
        .packer
        .pack_encrypted(&msg, &PackOptions::new())
        .await
        .unwrap();
    assert_eq!(pack_metadata.to_kids.len(), 2);

    let (for_bob, _) = bob.packer.unpack(&wire).await.unwrap();
    let (for_carol, _) = carol.packer.unpack(&wire).await.unwrap();

    assert_eq!(for_bob.body, msg.body);
    assert_eq!(for_bob, for_carol);
}

#[tokio::test]
async fn unpack_requires_no_out_of_band_hints() {
    let alice = new_agent().await;
    let bob = new_agent().await;

    // One unpack entry point handles all three wire forms.
    for wire in [
        alice
            .packer
            .pack_plaintext(&test_message(Some(&alice.did), &[&bob.did]))
            .await
            .unwrap(),
        alice
            .packer
            .pack_signed(&test_message(Some(&alice.did), &[&bob.did]), &alice.did)
            .await
            .unwrap(),
        alice
            .packer
            .pack_encrypted(
                &test_message(Some(&alice.did), &[&bob.did]),
                &PackOptions::new(),
            )
            .await
            .unwrap()
            .0,
    ] {
        let (unpacked, _) = bob.packer.unpack(&wire).await.unwrap();
        assert_eq!(unpacked.body["content"], "hello from the tests");
    }
}
