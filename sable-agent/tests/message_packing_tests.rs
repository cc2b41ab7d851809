// Tests for message packing and unpacking
//
// These tests drive the MessagePacker end to end:
// - All four security modes round trip
// - Mode detection on unpack from the wire shape
// - Recipient matching by kid and the KeyNotFound path
// - skid resolution and implicit sender authentication
// - Forward unwrapping and the hop limit

use assert_matches::assert_matches;
use async_trait::async_trait;
use rand::rngs::OsRng;
use sable_agent::envelope::{Decrypter, Encrypter, Sender};
use sable_agent::{
    ContentAlgorithm, DidResolver, Error, KeyWrapAlgorithm, LocalKey, LocalSigner, MessagePacker,
    PackOptions, StaticResolver, UnpackConfig,
};
use sable_msg::message::{Forward, PlainMessage};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn test_message() -> PlainMessage {
    PlainMessage::new(
        "msg-1".to_string(),
        "https://example.org/schemas/1.0#ping".to_string(),
        json!({"text": "hello"}),
    )
    .with_from("did:example:alice")
    .with_recipient("did:example:bob")
}

fn packer() -> MessagePacker {
    MessagePacker::new(Arc::new(StaticResolver::new()))
}

fn anon_recipient(key: &LocalKey, kid: &str) -> Encrypter {
    Encrypter::new(
        key.public_key(),
        KeyWrapAlgorithm::EcdhEsA256Kw,
        ContentAlgorithm::Xc20P,
    )
    .with_kid(kid)
}

fn auth_recipient(key: &LocalKey, kid: &str) -> Encrypter {
    Encrypter::new(
        key.public_key(),
        KeyWrapAlgorithm::Ecdh1PuA256Kw,
        ContentAlgorithm::A256Gcm,
    )
    .with_kid(kid)
}

#[tokio::test]
async fn test_plain_mode_roundtrip() {
    let packer = packer();
    let message = test_message();

    let packed = packer
        .pack(&message, &PackOptions::new().with_plain())
        .await
        .unwrap();
    assert!(packed.contains("\"type\""));

    let unpacked = packer.unpack(&packed, &[]).await.unwrap();
    assert_eq!(unpacked, message);
}

#[tokio::test]
async fn test_pack_requires_an_explicit_mode() {
    let packer = packer();
    assert_matches!(
        packer.pack(&test_message(), &PackOptions::new()).await,
        Err(Error::Validation(_))
    );
}

#[tokio::test]
async fn test_signed_mode_roundtrip() {
    let signer = LocalSigner::generate("did:example:alice#key-2", &mut OsRng);
    let resolver = StaticResolver::new()
        .with_verification("did:example:alice#key-2", signer.verifying_key());
    let packer = MessagePacker::new(Arc::new(resolver));
    let message = test_message();

    let packed = packer
        .pack(&message, &PackOptions::new().with_signed(Arc::new(signer)))
        .await
        .unwrap();
    assert!(packed.contains("\"signatures\""));

    let unpacked = packer.unpack(&packed, &[]).await.unwrap();
    assert_eq!(unpacked, message);
}

#[tokio::test]
async fn test_signed_mode_rejects_wrong_verification_key() {
    let signer = LocalSigner::generate("did:example:alice#key-2", &mut OsRng);
    let other = LocalSigner::generate("did:example:alice#key-2", &mut OsRng);
    // The resolver hands back a different key than the one that signed
    let resolver = StaticResolver::new()
        .with_verification("did:example:alice#key-2", other.verifying_key());
    let packer = MessagePacker::new(Arc::new(resolver));

    let packed = packer
        .pack(
            &test_message(),
            &PackOptions::new().with_signed(Arc::new(signer)),
        )
        .await
        .unwrap();

    assert_matches!(
        packer.unpack(&packed, &[]).await,
        Err(Error::SignatureVerification)
    );
}

#[tokio::test]
async fn test_anoncrypt_roundtrip() {
    let bob = LocalKey::generate(&mut OsRng);
    let packer = packer();
    // No `from`: anonymous messages carry no sender identity at any layer
    let message = PlainMessage::new(
        "msg-2".to_string(),
        "https://example.org/schemas/1.0#ping".to_string(),
        json!({"text": "psst"}),
    )
    .with_recipient("did:example:bob");

    let options = PackOptions::new()
        .with_anon_crypt()
        .with_recipient(anon_recipient(&bob, "did:example:bob#key-1"));
    let packed = packer.pack(&message, &options).await.unwrap();

    assert!(packed.contains("\"ciphertext\""));
    assert!(!packed.contains("skid"));
    assert!(!packed.contains("alice"));

    let keys = [Decrypter::new(Arc::new(bob)).with_kid("did:example:bob#key-1")];
    let unpacked = packer.unpack(&packed, &keys).await.unwrap();
    assert_eq!(unpacked, message);
    assert_eq!(unpacked.from, None);
}

#[tokio::test]
async fn test_authcrypt_roundtrip_with_skid_resolution() {
    let alice = LocalKey::generate(&mut OsRng);
    let bob = LocalKey::generate(&mut OsRng);
    let resolver = StaticResolver::new()
        .with_key_agreement("did:example:alice#key-1", alice.public_key());
    let packer = MessagePacker::new(Arc::new(resolver));
    let message = test_message();

    let sender = Sender::new(Arc::new(alice)).with_skid("did:example:alice#key-1");
    let options = PackOptions::new()
        .with_auth_crypt(sender)
        .with_recipient(auth_recipient(&bob, "did:example:bob#key-1"));
    let packed = packer.pack(&message, &options).await.unwrap();
    assert!(packed.contains("skid"));

    let keys = [Decrypter::new(Arc::new(bob)).with_kid("did:example:bob#key-1")];
    let unpacked = packer.unpack(&packed, &keys).await.unwrap();
    assert_eq!(unpacked, message);
}

#[tokio::test]
async fn test_authcrypt_fails_when_resolved_sender_differs() {
    let alice = LocalKey::generate(&mut OsRng);
    let impostor = LocalKey::generate(&mut OsRng);
    let bob = LocalKey::generate(&mut OsRng);
    // The resolver claims the skid belongs to a different static key
    let resolver = StaticResolver::new()
        .with_key_agreement("did:example:alice#key-1", impostor.public_key());
    let packer = MessagePacker::new(Arc::new(resolver));

    let sender = Sender::new(Arc::new(alice)).with_skid("did:example:alice#key-1");
    let options = PackOptions::new()
        .with_auth_crypt(sender)
        .with_recipient(auth_recipient(&bob, "did:example:bob#key-1"));
    let packed = packer.pack(&test_message(), &options).await.unwrap();

    let keys = [Decrypter::new(Arc::new(bob)).with_kid("did:example:bob#key-1")];
    assert_matches!(
        packer.unpack(&packed, &keys).await,
        Err(Error::DecryptionFailed)
    );
}

#[tokio::test]
async fn test_authcrypt_mode_rejects_anonymous_recipients() {
    let alice = LocalKey::generate(&mut OsRng);
    let bob = LocalKey::generate(&mut OsRng);
    let packer = packer();

    let options = PackOptions::new()
        .with_auth_crypt(Sender::new(Arc::new(alice)))
        .with_recipient(anon_recipient(&bob, "did:example:bob#key-1"));

    assert_matches!(
        packer.pack(&test_message(), &options).await,
        Err(Error::Validation(_))
    );
}

#[tokio::test]
async fn test_unpack_with_no_matching_kid_is_key_not_found() {
    let bob = LocalKey::generate(&mut OsRng);
    let carol = LocalKey::generate(&mut OsRng);
    let packer = packer();

    let options = PackOptions::new()
        .with_anon_crypt()
        .with_recipient(anon_recipient(&bob, "did:example:bob#key-1"));
    let packed = packer.pack(&test_message(), &options).await.unwrap();

    let keys = [Decrypter::new(Arc::new(carol)).with_kid("did:example:carol#key-1")];
    assert_matches!(
        packer.unpack(&packed, &keys).await,
        Err(Error::KeyNotFound(_))
    );
}

#[tokio::test]
async fn test_unpack_without_keys_is_key_not_found() {
    let bob = LocalKey::generate(&mut OsRng);
    let packer = packer();

    let options = PackOptions::new()
        .with_anon_crypt()
        .with_recipient(anon_recipient(&bob, "did:example:bob#key-1"));
    let packed = packer.pack(&test_message(), &options).await.unwrap();

    assert_matches!(packer.unpack(&packed, &[]).await, Err(Error::KeyNotFound(_)));
}

#[tokio::test]
async fn test_anonymous_recipients_are_tried_in_turn() {
    let bob = LocalKey::generate(&mut OsRng);
    let packer = packer();

    // No kid declared on the recipient entry
    let options = PackOptions::new().with_anon_crypt().with_recipient(Encrypter::new(
        bob.public_key(),
        KeyWrapAlgorithm::EcdhEsA256Kw,
        ContentAlgorithm::Xc20P,
    ));
    let packed = packer.pack(&test_message(), &options).await.unwrap();

    // The wrong key is tried first and skipped without detail
    let wrong = LocalKey::generate(&mut OsRng);
    let keys = [
        Decrypter::new(Arc::new(wrong)),
        Decrypter::new(Arc::new(bob)),
    ];
    let unpacked = packer.unpack(&packed, &keys).await.unwrap();
    assert_eq!(unpacked.id, "msg-1");
}

#[tokio::test]
async fn test_forward_message_is_unwrapped() {
    let bob = LocalKey::generate(&mut OsRng);
    let mediator = LocalKey::generate(&mut OsRng);
    let packer = packer();
    let message = test_message();

    // Inner envelope for bob
    let inner = packer
        .pack(
            &message,
            &PackOptions::new()
                .with_anon_crypt()
                .with_recipient(anon_recipient(&bob, "did:example:bob#key-1")),
        )
        .await
        .unwrap();

    // Wrapped for the mediator hop
    let forward =
        Forward::wrap("did:example:bob", serde_json::from_str(&inner).unwrap()).unwrap();
    let outer = packer
        .pack(
            &forward,
            &PackOptions::new()
                .with_anon_crypt()
                .with_recipient(anon_recipient(&mediator, "did:example:mediator#key-1")),
        )
        .await
        .unwrap();

    let keys = [
        Decrypter::new(Arc::new(mediator)).with_kid("did:example:mediator#key-1"),
        Decrypter::new(Arc::new(bob)).with_kid("did:example:bob#key-1"),
    ];
    let unpacked = packer.unpack(&outer, &keys).await.unwrap();
    assert_eq!(unpacked, message);
}

#[tokio::test]
async fn test_forward_hop_limit_is_enforced() {
    let packer = MessagePacker::new(Arc::new(StaticResolver::new()))
        .with_config(UnpackConfig::new().with_max_forward_hops(2));

    // Three nested forwards exceed a budget of two hops
    let innermost = serde_json::to_value(test_message()).unwrap();
    let hop_1 = serde_json::to_value(Forward::wrap("did:example:m1", innermost).unwrap()).unwrap();
    let hop_2 = serde_json::to_value(Forward::wrap("did:example:m2", hop_1).unwrap()).unwrap();
    let hop_3 = Forward::wrap("did:example:m3", hop_2).unwrap();
    let wire = serde_json::to_string(&hop_3).unwrap();

    assert_matches!(
        packer.unpack(&wire, &[]).await,
        Err(Error::LoopDetected { max_hops: 2 })
    );
}

#[tokio::test]
async fn test_forward_within_hop_limit_succeeds() {
    let packer = MessagePacker::new(Arc::new(StaticResolver::new()))
        .with_config(UnpackConfig::new().with_max_forward_hops(2));

    let message = test_message();
    let innermost = serde_json::to_value(&message).unwrap();
    let hop_1 = serde_json::to_value(Forward::wrap("did:example:m1", innermost).unwrap()).unwrap();
    let hop_2 = Forward::wrap("did:example:m2", hop_1).unwrap();
    let wire = serde_json::to_string(&hop_2).unwrap();

    let unpacked = packer.unpack(&wire, &[]).await.unwrap();
    assert_eq!(unpacked, message);
}

/// A resolver that never answers, for timeout tests.
#[derive(Debug)]
struct StalledResolver;

#[async_trait]
impl DidResolver for StalledResolver {
    async fn resolve_key_agreement(&self, _id: &str) -> sable_agent::Result<[u8; 32]> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(Error::DidResolution("unreachable".to_string()))
    }

    async fn resolve_verification(&self, _id: &str) -> sable_agent::Result<[u8; 32]> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(Error::DidResolution("unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_resolution_timeout_applies_to_skid_lookup() {
    let alice = LocalKey::generate(&mut OsRng);
    let bob = LocalKey::generate(&mut OsRng);

    let sender = Sender::new(Arc::new(alice)).with_skid("did:example:alice#key-1");
    let options = PackOptions::new()
        .with_auth_crypt(sender)
        .with_recipient(auth_recipient(&bob, "did:example:bob#key-1"));
    let packed = packer().pack(&test_message(), &options).await.unwrap();

    let unpacker = MessagePacker::new(Arc::new(StalledResolver))
        .with_config(UnpackConfig::new().with_resolve_timeout(Duration::from_millis(50)));
    let keys = [Decrypter::new(Arc::new(bob)).with_kid("did:example:bob#key-1")];

    assert_matches!(
        unpacker.unpack(&packed, &keys).await,
        Err(Error::DidResolution(_))
    );
}

#[tokio::test]
async fn test_unpack_rejects_non_json_wire() {
    let packer = packer();
    assert_matches!(
        packer.unpack("not json at all", &[]).await,
        Err(Error::EnvelopeFormat(_))
    );
}

#[tokio::test]
async fn test_extra_aad_travels_in_the_envelope() {
    let bob = LocalKey::generate(&mut OsRng);
    let packer = packer();

    let options = PackOptions::new()
        .with_anon_crypt()
        .with_recipient(anon_recipient(&bob, "did:example:bob#key-1"))
        .with_aad(b"transaction-7");
    let packed = packer.pack(&test_message(), &options).await.unwrap();

    let value: serde_json::Value = serde_json::from_str(&packed).unwrap();
    assert!(value.get("aad").is_some());

    let keys = [Decrypter::new(Arc::new(bob)).with_kid("did:example:bob#key-1")];
    let unpacked = packer.unpack(&packed, &keys).await.unwrap();
    assert_eq!(unpacked.id, "msg-1");
}
