//! # Message Signing
//!
//! Origin authentication for pubsub messages. The signed byte string is
//! the domain prefix followed by the canonical encoding of the message
//! with its `signature` and `key` fields absent, so a signature can never
//! be replayed into another protocol that signs with the same key.
//!
//! Key recovery prefers the explicit `key` field and falls back to the
//! key embedded in an inline-form origin id. Peers whose keys are too
//! large to inline must always attach explicit key bytes.

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identity::{Keypair, PeerId, PublicKey};
use crate::wire::Message;

/// Domain separation prefix for message signatures (no terminator).
pub const SIGNING_PREFIX: &[u8] = b"libp2p-pubsub:";

fn signed_bytes(msg: &Message) -> Vec<u8> {
    let body = msg.encode_without_auth();
    let mut bytes = Vec::with_capacity(SIGNING_PREFIX.len() + body.len());
    bytes.extend_from_slice(SIGNING_PREFIX);
    bytes.extend_from_slice(&body);
    bytes
}

/// Sign `msg` with the local keypair.
///
/// Returns a copy carrying the signature and the encoded public key; any
/// pre-existing `signature`/`key` fields are replaced.
pub fn sign_message(keypair: &Keypair, msg: &Message) -> Message {
    let mut signed = msg.clone();
    signed.signature = None;
    signed.key = None;

    let signature = keypair.sign(&signed_bytes(&signed));
    signed.signature = Some(Bytes::from(signature));
    signed.key = Some(Bytes::from(keypair.public().encode()));
    signed
}

/// Recover the origin public key of a message.
///
/// Explicit `key` bytes win, but must derive the id claimed in `from`
/// ([`Error::KeyMismatch`] otherwise). Without them the key is taken from
/// an inline-form `from` id; a digest-form id yields [`Error::NoKey`].
pub fn message_public_key(msg: &Message) -> Result<PublicKey> {
    let from = PeerId::from_bytes(&msg.from)?;
    match &msg.key {
        Some(key_bytes) => {
            let key = PublicKey::decode(key_bytes)?;
            if !from.matches(&key) {
                return Err(Error::KeyMismatch);
            }
            Ok(key)
        }
        None => from.inline_public_key().ok_or(Error::NoKey),
    }
}

/// Check the signature on `msg`.
///
/// `Ok(false)` means the key was recovered but the signature does not
/// verify; structural problems (no signature, unusable key, mismatched
/// key) surface as errors.
pub fn verify_message(msg: &Message) -> Result<bool> {
    let signature = msg.signature.as_ref().ok_or(Error::MissingSignature)?;
    let key = message_public_key(msg)?;

    let mut unsigned = msg.clone();
    unsigned.signature = None;
    unsigned.key = None;

    let ok = key.verify(&signed_bytes(&unsigned), signature);
    if !ok {
        trace!(id = %PeerId::from_bytes(&msg.from).map(|p| p.to_base58()).unwrap_or_default(),
               "message signature failed verification");
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_message(keypair: &Keypair) -> Message {
        Message {
            from: Bytes::copy_from_slice(keypair.peer_id().as_bytes()),
            data: Bytes::from_static(b"hello"),
            seqno: Bytes::from_static(&[0, 1, 2, 3, 4, 5, 6, 7]),
            topics: vec!["t".into()],
            ..Message::default()
        }
    }

    #[test]
    fn explicit_key_sign_and_verify() {
        // A digest-form identity: the key cannot be recovered from the id,
        // so the signed message must carry it.
        let keypair = Keypair::generate_secp256k1();
        let msg = unsigned_message(&keypair);
        let signed = sign_message(&keypair, &msg);

        let expected_sig = keypair.sign(&signed_bytes(&msg));
        assert_eq!(signed.signature.as_deref(), Some(&expected_sig[..]));
        assert_eq!(
            signed.key.as_deref(),
            Some(&keypair.public().encode()[..])
        );
        assert!(verify_message(&signed).expect("verification runs"));
    }

    #[test]
    fn inline_key_recovered_from_origin_id() {
        let keypair = Keypair::generate_ed25519();
        let mut signed = sign_message(&keypair, &unsigned_message(&keypair));

        signed.key = None;
        assert!(verify_message(&signed).expect("key recovered from id"));
    }

    #[test]
    fn digest_id_without_key_fails() {
        let keypair = Keypair::generate_secp256k1();
        let mut signed = sign_message(&keypair, &unsigned_message(&keypair));

        signed.key = None;
        let err = verify_message(&signed).expect_err("no recoverable key");
        assert_eq!(err.code(), "ERR_NO_KEY");
    }

    #[test]
    fn mismatched_key_rejected() {
        let keypair = Keypair::generate_secp256k1();
        let stranger = Keypair::generate_secp256k1();
        let mut signed = sign_message(&keypair, &unsigned_message(&keypair));

        signed.key = Some(Bytes::from(stranger.public().encode()));
        let err = verify_message(&signed).expect_err("key does not derive origin");
        assert_eq!(err.code(), "ERR_KEY_MISMATCH");
    }

    #[test]
    fn missing_signature_is_an_error() {
        let keypair = Keypair::generate_ed25519();
        let err = verify_message(&unsigned_message(&keypair)).expect_err("unsigned");
        assert_eq!(err.code(), "ERR_MISSING_SIGNATURE");
    }

    #[test]
    fn any_field_mutation_invalidates_signature() {
        let keypair = Keypair::generate_ed25519();
        let signed = sign_message(&keypair, &{
            let mut msg = unsigned_message(&keypair);
            msg.topics = vec!["a".into(), "b".into()];
            msg
        });

        let mut data_changed = signed.clone();
        data_changed.data = Bytes::from_static(b"hellp");
        assert!(!verify_message(&data_changed).expect("runs"));

        let mut seqno_changed = signed.clone();
        seqno_changed.seqno = Bytes::from_static(&[7, 6, 5, 4, 3, 2, 1, 0]);
        assert!(!verify_message(&seqno_changed).expect("runs"));

        let mut topics_reordered = signed.clone();
        topics_reordered.topics.reverse();
        assert!(!verify_message(&topics_reordered).expect("runs"));
    }

    #[test]
    fn signature_survives_wire_round_trip() {
        let keypair = Keypair::generate_ed25519();
        let signed = sign_message(&keypair, &unsigned_message(&keypair));
        let decoded = Message::decode(&signed.encode()).expect("decodes");
        assert!(verify_message(&decoded).expect("verification runs"));
    }

    #[test]
    fn signing_prefix_is_domain_separated() {
        assert_eq!(SIGNING_PREFIX.len(), 14);
        // A signature over the raw message bytes (no prefix) must not verify.
        let keypair = Keypair::generate_ed25519();
        let msg = unsigned_message(&keypair);
        let mut forged = msg.clone();
        forged.signature = Some(Bytes::from(keypair.sign(&msg.encode_without_auth())));
        forged.key = Some(Bytes::from(keypair.public().encode()));
        assert!(!verify_message(&forged).expect("runs"));
    }
}
