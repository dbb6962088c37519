//! # Floodline - Pubsub Router Substrate
//!
//! Floodline is the reusable base layer for peer-to-peer publish/subscribe
//! routers. Concrete routing policies (flood broadcast, mesh gossip)
//! implement the [`Pubsub`] trait on top of a [`Router`], which provides:
//!
//! - **Peer streams**: per-peer framed inbound readers and outbound write
//!   queues over host-supplied duplex streams, with clean replacement and
//!   teardown
//! - **Lifecycle**: registration against the host node's registrar,
//!   `start → running → stopped`, and the live peer registry
//! - **Origin authentication**: canonical message encoding, prefix-scoped
//!   signatures, public-key recovery, and the strict-signing policy
//!
//! The host node (dialing, stream multiplexing, protocol negotiation) sits
//! behind the [`Registrar`] and [`Connection`] contracts; the wire routing
//! semantics live entirely in the policy.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `router` | Router base, lifecycle, peer registry, policy trait |
//! | `stream` | Per-peer stream state and events |
//! | `registrar` | Contracts the host node provides |
//! | `wire` | Message records and their canonical encoding |
//! | `signing` | Message signatures and key recovery |
//! | `framing` | Varint length-prefixed stream framing |
//! | `identity` | Keypairs, public keys, peer ids |
//!
//! ## Data Flow
//!
//! Raw bytes ↔ frame codec ↔ message codec ↔ signing ↔ router/policy
//! logic ↔ topic index. Registrar events (connect, disconnect, incoming
//! stream) drive the router, which creates or updates peer streams and
//! hands framed inbound readers to the policy's message loop.

mod error;
mod framing;
mod identity;
mod registrar;
mod router;
mod signing;
mod stream;
mod wire;

pub use error::{Error, Result};
pub use framing::{FrameCodec, DEFAULT_MAX_FRAME_LEN};
pub use identity::{Keypair, PeerId, PublicKey, MAX_INLINE_KEY_LEN, PEER_ID_LEN};
pub use registrar::{
    BoxedStream, ConnectHandler, Connection, DisconnectHandler, IncomingStream, NegotiatedStream,
    RawStream, Registrar, RegistrationId, StreamHandler, Topology,
};
pub use router::{Pubsub, Router, RouterConfig, TopicIndex};
pub use signing::{message_public_key, sign_message, verify_message, SIGNING_PREFIX};
pub use stream::{EventSender, InboundFrames, PeerStream, StreamEvent};
pub use wire::{message_id, random_seqno, Message, RpcFrame, SubscriptionChange};
