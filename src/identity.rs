//! # Peer Identity
//!
//! Identity types for the router:
//!
//! - [`Keypair`]: a local signing key (Ed25519 or secp256k1 ECDSA)
//! - [`PublicKey`]: the matching verification key with a tagged byte encoding
//! - [`PeerId`]: the peer identifier derived from a public key
//!
//! ## Identity model
//!
//! A `PeerId` is 33 bytes: a one-byte form tag followed by a 32-byte body.
//! Public keys whose raw bytes fit the body (Ed25519, 32 bytes) are embedded
//! verbatim, so the key is recoverable from the id alone. Larger keys
//! (secp256k1 compressed points, 33 bytes) are BLAKE3-digested; messages
//! from such peers must carry the key bytes explicitly.
//!
//! The textual form of an id is base58 over the full 33 bytes. It is the
//! canonical key in every peer-indexed mapping and the form used in logs.

use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use rand::rngs::OsRng;

use crate::error::{Error, Result};

/// Algorithm tag for an encoded Ed25519 public key.
const KEY_TAG_ED25519: u8 = 0x01;

/// Algorithm tag for an encoded secp256k1 public key (SEC1 compressed).
const KEY_TAG_SECP256K1: u8 = 0x02;

/// Form tag: the id body is the raw public key itself.
const PEER_ID_INLINE: u8 = 0x00;

/// Form tag: the id body is a BLAKE3 digest of the encoded public key.
const PEER_ID_DIGEST: u8 = 0x01;

/// Raw public keys up to this many bytes are embedded in the id verbatim.
pub const MAX_INLINE_KEY_LEN: usize = 32;

/// Total byte length of a peer id (form tag + 32-byte body).
pub const PEER_ID_LEN: usize = 33;

// ============================================================================
// Keypair
// ============================================================================

/// A local signing key. The variant decides both the signature scheme and
/// whether the derived [`PeerId`] embeds the public key.
#[derive(Clone)]
pub enum Keypair {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

impl Keypair {
    /// Generate a fresh Ed25519 keypair. The derived id embeds the key.
    pub fn generate_ed25519() -> Self {
        Keypair::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Generate a fresh secp256k1 keypair. The derived id is a digest, so
    /// signed messages from this identity carry explicit key bytes.
    pub fn generate_secp256k1() -> Self {
        Keypair::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn public(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(sk) => PublicKey::Ed25519(sk.verifying_key()),
            Keypair::Secp256k1(sk) => PublicKey::Secp256k1(sk.verifying_key().clone()),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.public().peer_id()
    }

    /// Sign arbitrary bytes. Both schemes produce a 64-byte signature
    /// (Ed25519 directly, ECDSA in fixed-width form with RFC 6979 nonces).
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Keypair::Ed25519(sk) => sk.sign(data).to_bytes().to_vec(),
            Keypair::Secp256k1(sk) => {
                let sig: k256::ecdsa::Signature = sk.sign(data);
                sig.to_bytes().to_vec()
            }
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer", &self.peer_id().to_base58())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PublicKey
// ============================================================================

/// A verification key with a stable tagged byte encoding: one algorithm tag
/// byte followed by the raw key bytes.
#[derive(Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Secp256k1(k256::ecdsa::VerifyingKey),
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    /// Tagged encoding used in message `key` fields.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(vk) => {
                let mut out = Vec::with_capacity(33);
                out.push(KEY_TAG_ED25519);
                out.extend_from_slice(vk.as_bytes());
                out
            }
            PublicKey::Secp256k1(vk) => {
                let point = vk.to_encoded_point(true);
                let mut out = Vec::with_capacity(1 + point.as_bytes().len());
                out.push(KEY_TAG_SECP256K1);
                out.extend_from_slice(point.as_bytes());
                out
            }
        }
    }

    /// Reverse of [`PublicKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (tag, raw) = bytes.split_first().ok_or(Error::InvalidKey)?;
        match *tag {
            KEY_TAG_ED25519 => {
                let raw: &[u8; 32] = raw.try_into().map_err(|_| Error::InvalidKey)?;
                let vk = ed25519_dalek::VerifyingKey::from_bytes(raw)
                    .map_err(|_| Error::InvalidKey)?;
                Ok(PublicKey::Ed25519(vk))
            }
            KEY_TAG_SECP256K1 => {
                let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(raw)
                    .map_err(|_| Error::InvalidKey)?;
                Ok(PublicKey::Secp256k1(vk))
            }
            _ => Err(Error::InvalidKey),
        }
    }

    /// Raw key bytes without the algorithm tag.
    fn raw_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(vk) => vk.as_bytes().to_vec(),
            PublicKey::Secp256k1(vk) => vk.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Derive the peer id for this key: inline when the raw key fits the
    /// id body, digest otherwise.
    pub fn peer_id(&self) -> PeerId {
        let raw = self.raw_bytes();
        let mut bytes = [0u8; PEER_ID_LEN];
        if raw.len() <= MAX_INLINE_KEY_LEN {
            bytes[0] = PEER_ID_INLINE;
            bytes[1..1 + raw.len()].copy_from_slice(&raw);
        } else {
            bytes[0] = PEER_ID_DIGEST;
            bytes[1..].copy_from_slice(blake3::hash(&self.encode()).as_bytes());
        }
        PeerId(bytes)
    }

    /// Verify a 64-byte signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        if signature.len() != 64 {
            return false;
        }
        match self {
            PublicKey::Ed25519(vk) => {
                let sig_bytes: [u8; 64] = match signature.try_into() {
                    Ok(b) => b,
                    Err(_) => return false,
                };
                let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
                vk.verify_strict(data, &sig).is_ok()
            }
            PublicKey::Secp256k1(vk) => match k256::ecdsa::Signature::from_slice(signature) {
                Ok(sig) => vk.verify(data, &sig).is_ok(),
                Err(_) => false,
            },
        }
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublicKey::Ed25519(_) => write!(f, "PublicKey::Ed25519({})", self.peer_id()),
            PublicKey::Secp256k1(_) => write!(f, "PublicKey::Secp256k1({})", self.peer_id()),
        }
    }
}

// ============================================================================
// PeerId
// ============================================================================

/// Identifier of a peer, derived from its public key. Compared, hashed and
/// ordered by bytes; rendered as base58.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Parse an id from its raw byte form, validating the form tag and,
    /// for inline ids, that the body is a usable key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PEER_ID_LEN] = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        match arr[0] {
            PEER_ID_INLINE => {
                let body: [u8; 32] = arr[1..].try_into().expect("body is 32 bytes");
                ed25519_dalek::VerifyingKey::from_bytes(&body)
                    .map_err(|_| Error::InvalidKey)?;
            }
            PEER_ID_DIGEST => {}
            _ => return Err(Error::InvalidKey),
        }
        Ok(PeerId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| Error::InvalidKey)?;
        Self::from_bytes(&bytes)
    }

    /// The public key embedded in an inline-form id, if any.
    pub fn inline_public_key(&self) -> Option<PublicKey> {
        if self.0[0] != PEER_ID_INLINE {
            return None;
        }
        let body: [u8; 32] = self.0[1..].try_into().expect("body is 32 bytes");
        ed25519_dalek::VerifyingKey::from_bytes(&body)
            .ok()
            .map(PublicKey::Ed25519)
    }

    /// Whether this id derives from the given public key.
    pub fn matches(&self, key: &PublicKey) -> bool {
        key.peer_id() == *self
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}
