//! # Host Contracts
//!
//! The capability set a host networking node provides to the router:
//! a [`Registrar`] for protocol handlers and connection-topology
//! notifications, and a [`Connection`] for opening new protocol streams
//! toward a peer. The host owns dialing, stream multiplexing and protocol
//! negotiation; the router only consumes the negotiated duplex streams.
//!
//! Host-side failures are opaque to the router and travel as
//! [`anyhow::Error`]; the router wraps them at its own boundary.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::identity::PeerId;

/// A negotiated duplex byte stream, as the host hands it over.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// Boxed raw stream. Each is used in one direction only: streams we open
/// carry outbound frames, streams the remote opens carry inbound frames.
pub type BoxedStream = Box<dyn RawStream>;

/// A stream the remote peer opened toward us on one of our protocols.
pub struct IncomingStream {
    /// The negotiated protocol id.
    pub protocol: String,
    /// The raw duplex stream.
    pub stream: BoxedStream,
    /// The connection the stream arrived on.
    pub connection: Arc<dyn Connection>,
}

/// A stream we opened on a connection, with the protocol that won
/// negotiation.
pub struct NegotiatedStream {
    pub protocol: String,
    pub stream: BoxedStream,
}

/// Handler invoked for every incoming stream on a registered protocol.
pub type StreamHandler = Arc<dyn Fn(IncomingStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked once per session when a peer connects.
pub type ConnectHandler =
    Arc<dyn Fn(PeerId, Arc<dyn Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked when a peer's session ends, with the terminating
/// error if there was one.
pub type DisconnectHandler =
    Arc<dyn Fn(PeerId, Option<anyhow::Error>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Protocol ids grouped with the connect/disconnect callbacks interested
/// in peers speaking them.
pub struct Topology {
    pub protocols: Vec<String>,
    pub on_connect: ConnectHandler,
    pub on_disconnect: DisconnectHandler,
}

/// Opaque receipt for a topology registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// The host node's registry for protocol handlers and topology
/// notifications.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Register `handler` for incoming streams on any of `protocols`.
    async fn handle(&self, protocols: &[String], handler: StreamHandler) -> anyhow::Result<()>;

    /// Register a connection topology; the receipt reverses it.
    async fn register(&self, topology: Topology) -> anyhow::Result<RegistrationId>;

    /// Reverse a registration and remove its stream handler.
    async fn unregister(&self, registration: RegistrationId) -> anyhow::Result<()>;
}

/// An established session with a remote peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity of the peer on the other end.
    fn remote_peer(&self) -> PeerId;

    /// Open a new stream, negotiating one of the offered protocols.
    async fn new_stream(&self, protocols: &[String]) -> anyhow::Result<NegotiatedStream>;
}
