//! # Wire Messages
//!
//! The message record carried inside each frame, and its canonical binary
//! encoding. The encoding is a deterministic tag-length-value format with
//! fixed field numbers: fields are emitted in tag order, absent optionals
//! are omitted, and decoders skip unknown fields by wire type so newer
//! peers can extend the schema without breaking older ones.
//!
//! | Record | Field | Tag |
//! |--------|-------|-----|
//! | [`RpcFrame`] | `subscriptions` | 1 |
//! | [`RpcFrame`] | `messages` | 2 |
//! | [`SubscriptionChange`] | `subscribe` | 1 |
//! | [`SubscriptionChange`] | `topic` | 2 |
//! | [`Message`] | `from` | 1 |
//! | [`Message`] | `data` | 2 |
//! | [`Message`] | `seqno` | 3 |
//! | [`Message`] | `topics` | 4 |
//! | [`Message`] | `signature` | 5 |
//! | [`Message`] | `key` | 6 |
//!
//! For signature computation a message is encoded with `signature` and
//! `key` absent ([`Message::encode_without_auth`]). The local-only
//! `received_from` field is never serialised.

use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;

use crate::error::{Error, Result};
use crate::framing::{peek_uvarint, put_uvarint};

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

/// A single pubsub message: origin, payload, sequence bytes, topics, and
/// optional origin authentication.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// Originating peer identity, as raw peer-id bytes.
    pub from: Bytes,
    /// Opaque payload.
    pub data: Bytes,
    /// Caller-generated sequence bytes, typically random.
    pub seqno: Bytes,
    /// Topics this message is published to, in caller order.
    pub topics: Vec<String>,
    /// Signature over the domain prefix plus the unauthenticated encoding.
    pub signature: Option<Bytes>,
    /// Encoded public key of the origin, when not recoverable from `from`.
    pub key: Option<Bytes>,
    /// Base58 id of the direct neighbour that delivered this message.
    /// Local bookkeeping only; never serialised.
    pub received_from: Option<String>,
}

impl Message {
    /// Canonical encoding of the full record.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode_fields(&mut dst, true);
        dst.freeze()
    }

    /// Canonical encoding with `signature` and `key` absent; the byte
    /// string that gets signed (after the domain prefix).
    pub fn encode_without_auth(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode_fields(&mut dst, false);
        dst.freeze()
    }

    fn encode_fields(&self, dst: &mut BytesMut, with_auth: bool) {
        if !self.from.is_empty() {
            put_len_field(dst, 1, &self.from);
        }
        if !self.data.is_empty() {
            put_len_field(dst, 2, &self.data);
        }
        if !self.seqno.is_empty() {
            put_len_field(dst, 3, &self.seqno);
        }
        for topic in &self.topics {
            put_len_field(dst, 4, topic.as_bytes());
        }
        if with_auth {
            if let Some(signature) = &self.signature {
                put_len_field(dst, 5, signature);
            }
            if let Some(key) = &self.key {
                put_len_field(dst, 6, key);
            }
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut msg = Message::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(&mut buf)?;
            match (field, wire_type) {
                (1, WIRE_LEN) => msg.from = read_len_field(&mut buf)?,
                (2, WIRE_LEN) => msg.data = read_len_field(&mut buf)?,
                (3, WIRE_LEN) => msg.seqno = read_len_field(&mut buf)?,
                (4, WIRE_LEN) => msg.topics.push(read_string_field(&mut buf)?),
                (5, WIRE_LEN) => msg.signature = Some(read_len_field(&mut buf)?),
                (6, WIRE_LEN) => msg.key = Some(read_len_field(&mut buf)?),
                _ => skip_field(&mut buf, wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// A subscription announcement carried alongside messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub subscribe: bool,
    pub topic: String,
}

impl SubscriptionChange {
    fn encode_into(&self, dst: &mut BytesMut) {
        if self.subscribe {
            put_uvarint(dst, tag(1, WIRE_VARINT));
            put_uvarint(dst, 1);
        }
        if !self.topic.is_empty() {
            put_len_field(dst, 2, self.topic.as_bytes());
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut change = SubscriptionChange::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(&mut buf)?;
            match (field, wire_type) {
                (1, WIRE_VARINT) => change.subscribe = read_uvarint(&mut buf)? != 0,
                (2, WIRE_LEN) => change.topic = read_string_field(&mut buf)?,
                _ => skip_field(&mut buf, wire_type)?,
            }
        }
        Ok(change)
    }
}

/// The unit carried in one length-prefixed frame: zero or more
/// subscription changes plus zero or more messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RpcFrame {
    pub subscriptions: Vec<SubscriptionChange>,
    pub messages: Vec<Message>,
}

impl RpcFrame {
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        let mut scratch = BytesMut::new();
        for change in &self.subscriptions {
            scratch.clear();
            change.encode_into(&mut scratch);
            put_len_field(&mut dst, 1, &scratch);
        }
        for msg in &self.messages {
            put_len_field(&mut dst, 2, &msg.encode());
        }
        dst.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut frame = RpcFrame::default();
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(&mut buf)?;
            match (field, wire_type) {
                (1, WIRE_LEN) => {
                    let body = read_len_field(&mut buf)?;
                    frame.subscriptions.push(SubscriptionChange::decode(&body)?);
                }
                (2, WIRE_LEN) => {
                    let body = read_len_field(&mut buf)?;
                    frame.messages.push(Message::decode(&body)?);
                }
                _ => skip_field(&mut buf, wire_type)?,
            }
        }
        Ok(frame)
    }
}

/// Fresh random sequence bytes for an outgoing message.
pub fn random_seqno() -> Bytes {
    let mut seqno = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut seqno);
    Bytes::copy_from_slice(&seqno)
}

/// Dedup key for a message: base58 origin id plus hex seqno. Policies use
/// this to detect re-deliveries across different neighbours.
pub fn message_id(msg: &Message) -> String {
    format!(
        "{}{}",
        bs58::encode(&msg.from).into_string(),
        hex::encode(&msg.seqno)
    )
}

// ============================================================================
// Field helpers
// ============================================================================

fn tag(field: u64, wire_type: u64) -> u64 {
    (field << 3) | wire_type
}

fn put_len_field(dst: &mut BytesMut, field: u64, bytes: &[u8]) {
    put_uvarint(dst, tag(field, WIRE_LEN));
    put_uvarint(dst, bytes.len() as u64);
    dst.extend_from_slice(bytes);
}

fn read_uvarint(buf: &mut &[u8]) -> Result<u64> {
    match peek_uvarint(buf).map_err(into_message_error)? {
        Some((value, len)) => {
            buf.advance(len);
            Ok(value)
        }
        None => Err(Error::MalformedMessage("truncated varint".into())),
    }
}

fn read_tag(buf: &mut &[u8]) -> Result<(u64, u64)> {
    let key = read_uvarint(buf)?;
    Ok((key >> 3, key & 0x7))
}

fn read_len_field(buf: &mut &[u8]) -> Result<Bytes> {
    let len = read_uvarint(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::MalformedMessage("truncated field body".into()));
    }
    let body = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(body)
}

fn read_string_field(buf: &mut &[u8]) -> Result<String> {
    let body = read_len_field(buf)?;
    String::from_utf8(body.to_vec())
        .map_err(|_| Error::MalformedMessage("topic is not valid utf-8".into()))
}

fn skip_field(buf: &mut &[u8], wire_type: u64) -> Result<()> {
    match wire_type {
        WIRE_VARINT => {
            read_uvarint(buf)?;
        }
        WIRE_FIXED64 => {
            if buf.remaining() < 8 {
                return Err(Error::MalformedMessage("truncated fixed64 field".into()));
            }
            buf.advance(8);
        }
        WIRE_LEN => {
            read_len_field(buf)?;
        }
        WIRE_FIXED32 => {
            if buf.remaining() < 4 {
                return Err(Error::MalformedMessage("truncated fixed32 field".into()));
            }
            buf.advance(4);
        }
        other => {
            return Err(Error::MalformedMessage(format!(
                "unsupported wire type {other}"
            )));
        }
    }
    Ok(())
}

fn into_message_error(err: Error) -> Error {
    match err {
        Error::MalformedFrame(detail) => Error::MalformedMessage(detail),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            from: Bytes::from_static(b"\x00peer-bytes"),
            data: Bytes::from_static(b"hello"),
            seqno: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
            topics: vec!["news".into(), "weather".into()],
            signature: Some(Bytes::from_static(&[9u8; 64])),
            key: Some(Bytes::from_static(b"\x01keybytes")),
            received_from: None,
        }
    }

    #[test]
    fn message_round_trip() {
        let msg = sample_message();
        let decoded = Message::decode(&msg.encode()).expect("canonical bytes decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_message_encodes_to_nothing() {
        let msg = Message::default();
        assert!(msg.encode().is_empty());
        assert_eq!(Message::decode(&[]).expect("empty input"), msg);
    }

    #[test]
    fn auth_stripped_encoding_drops_signature_and_key() {
        let msg = sample_message();
        let stripped = Message::decode(&msg.encode_without_auth()).expect("decodes");
        assert!(stripped.signature.is_none());
        assert!(stripped.key.is_none());
        assert_eq!(stripped.from, msg.from);
        assert_eq!(stripped.topics, msg.topics);
    }

    #[test]
    fn signed_message_recoverable_from_stripped_encoding() {
        let mut unsigned = sample_message();
        unsigned.signature = None;
        unsigned.key = None;

        let mut reassembled = Message::decode(&unsigned.encode()).expect("decodes");
        reassembled.signature = sample_message().signature;
        reassembled.key = sample_message().key;
        assert_eq!(reassembled.encode(), sample_message().encode());
    }

    #[test]
    fn topic_order_changes_encoding() {
        let msg = sample_message();
        let mut reordered = msg.clone();
        reordered.topics.reverse();
        assert_ne!(msg.encode(), reordered.encode());
    }

    #[test]
    fn received_from_is_never_serialised() {
        let mut msg = sample_message();
        msg.received_from = Some("QmNeighbour".into());
        let decoded = Message::decode(&msg.encode()).expect("decodes");
        assert!(decoded.received_from.is_none());
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let msg = sample_message();
        let mut buf = BytesMut::from(&msg.encode()[..]);
        // Field 9, length-delimited, 3 bytes.
        put_uvarint(&mut buf, (9 << 3) | 2);
        put_uvarint(&mut buf, 3);
        buf.extend_from_slice(b"xyz");
        // Field 10, varint.
        put_uvarint(&mut buf, 10 << 3);
        put_uvarint(&mut buf, 777);

        let decoded = Message::decode(&buf).expect("unknown fields are ignored");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_body_rejected() {
        let encoded = sample_message().encode();
        let err = Message::decode(&encoded[..encoded.len() - 4]).expect_err("truncated");
        assert_eq!(err.code(), "ERR_MALFORMED_MESSAGE");
    }

    #[test]
    fn invalid_topic_utf8_rejected() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, (4 << 3) | 2);
        put_uvarint(&mut buf, 2);
        buf.extend_from_slice(&[0xff, 0xfe]);
        let err = Message::decode(&buf).expect_err("bad utf-8 topic");
        assert_eq!(err.code(), "ERR_MALFORMED_MESSAGE");
    }

    #[test]
    fn rpc_frame_round_trip() {
        let frame = RpcFrame {
            subscriptions: vec![
                SubscriptionChange { subscribe: true, topic: "news".into() },
                SubscriptionChange { subscribe: false, topic: "weather".into() },
            ],
            messages: vec![sample_message(), Message::default()],
        };
        let decoded = RpcFrame::decode(&frame.encode()).expect("decodes");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn random_seqno_is_eight_fresh_bytes() {
        let a = random_seqno();
        let b = random_seqno();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn message_id_combines_origin_and_seqno() {
        let msg = sample_message();
        let id = message_id(&msg);
        assert!(id.starts_with(&bs58::encode(&msg.from).into_string()));
        assert!(id.ends_with(&hex::encode(&msg.seqno)));

        let mut other = msg.clone();
        other.seqno = Bytes::from_static(&[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_ne!(message_id(&msg), message_id(&other));
    }
}
