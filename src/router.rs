//! # Router Base
//!
//! The substrate a routing policy builds on. The [`Router`] owns the peer
//! registry and the topic index, drives the lifecycle against the host
//! [`Registrar`], and offers the shared helpers ([`Router::build_message`],
//! [`Router::validate`], [`Router::get_subscribers`]). A concrete policy
//! implements [`Pubsub`] and plugs in through the five routing operations.
//!
//! ## Architecture
//!
//! `Router` is a cheap-to-clone handle over shared inner state. Stream
//! events from all peers funnel through one channel into a dispatch task
//! (spawned at construction, holding only a weak reference): a `Closed`
//! event removes the peer, everything is forwarded to an optional
//! listener. The host's topology callbacks and incoming-stream handler
//! are closures dispatching back into the router, so the registrar holds
//! value-plus-method pairs rather than bare function pointers.
//!
//! The connect path and the incoming-stream path are deliberately split:
//! a `connect` notification fires once per session regardless of who
//! dialled, and the router opens its *own* outbound stream on it; every
//! stream the remote opens toward us arrives through the handler and
//! attaches as the inbound. Either side may exist without the other.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::framing::DEFAULT_MAX_FRAME_LEN;
use crate::identity::{Keypair, PeerId};
use crate::registrar::{
    ConnectHandler, Connection, DisconnectHandler, IncomingStream, Registrar, RegistrationId,
    StreamHandler, Topology,
};
use crate::signing::{sign_message, verify_message};
use crate::stream::{InboundFrames, PeerStream, StreamEvent};
use crate::wire::Message;

/// Map from topic to the base58 ids of its subscribers. The policy owns
/// the contents; the router reads them for [`Router::get_subscribers`].
pub type TopicIndex = HashMap<String, BTreeSet<String>>;

/// Disconnect errors with exactly this message are routine teardown noise
/// and are not logged at warn level.
const HANGUP_MESSAGE: &str = "socket hang up";

// ============================================================================
// Configuration
// ============================================================================

/// Router construction parameters. `sign_messages` and `strict_signing`
/// default to on; a keypair matching `peer_id` is required while signing
/// is on.
pub struct RouterConfig {
    /// Short name attached to this router's log output.
    pub debug_name: String,
    /// Protocol ids the router speaks, in preference order.
    pub protocols: Vec<String>,
    /// The local peer identity.
    pub peer_id: PeerId,
    /// Local signing key; required when `sign_messages` is on.
    pub keypair: Option<Keypair>,
    /// The host node's registrar.
    pub registrar: Arc<dyn Registrar>,
    /// Sign every message built through [`Router::build_message`].
    pub sign_messages: bool,
    /// Reject inbound messages without a signature.
    pub strict_signing: bool,
    /// Ceiling for a single frame on any peer stream.
    pub max_frame_len: usize,
}

impl RouterConfig {
    pub fn new(
        debug_name: &str,
        protocols: Vec<String>,
        peer_id: PeerId,
        registrar: Arc<dyn Registrar>,
    ) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            protocols,
            peer_id,
            keypair: None,
            registrar,
            sign_messages: true,
            strict_signing: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn with_sign_messages(mut self, sign: bool) -> Self {
        self.sign_messages = sign;
        self
    }

    pub fn with_strict_signing(mut self, strict: bool) -> Self {
        self.strict_signing = strict;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }
}

// ============================================================================
// Router
// ============================================================================

struct RouterState {
    started: bool,
    peers: HashMap<String, Arc<PeerStream>>,
    registration: Option<RegistrationId>,
    listener: Option<mpsc::UnboundedSender<(PeerId, StreamEvent)>>,
}

struct RouterInner {
    debug_name: String,
    protocols: Vec<String>,
    peer_id: PeerId,
    keypair: Option<Keypair>,
    sign_messages: bool,
    strict_signing: bool,
    max_frame_len: usize,
    registrar: Arc<dyn Registrar>,
    state: Mutex<RouterState>,
    topics: std::sync::Mutex<TopicIndex>,
    events_tx: mpsc::UnboundedSender<(PeerId, StreamEvent)>,
}

/// Handle to the shared router state. Clones are cheap and refer to the
/// same router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Validate `config` and build the router. Must be called inside a
    /// tokio runtime: the event dispatch task is spawned here.
    pub fn new(config: RouterConfig) -> Result<Self> {
        if config.debug_name.is_empty() {
            return Err(Error::InvalidConfig("debug_name must not be empty".into()));
        }
        if config.protocols.is_empty() || config.protocols.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidConfig(
                "at least one non-empty protocol id is required".into(),
            ));
        }
        if config.max_frame_len == 0 {
            return Err(Error::InvalidConfig("max_frame_len must be positive".into()));
        }
        match &config.keypair {
            Some(keypair) if keypair.peer_id() != config.peer_id => {
                return Err(Error::InvalidConfig(
                    "keypair does not derive the configured peer id".into(),
                ));
            }
            None if config.sign_messages => {
                return Err(Error::InvalidConfig(
                    "sign_messages requires a keypair".into(),
                ));
            }
            _ => {}
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RouterInner {
            debug_name: config.debug_name,
            protocols: config.protocols,
            peer_id: config.peer_id,
            keypair: config.keypair,
            sign_messages: config.sign_messages,
            strict_signing: config.strict_signing,
            max_frame_len: config.max_frame_len,
            registrar: config.registrar,
            state: Mutex::new(RouterState {
                started: false,
                peers: HashMap::new(),
                registration: None,
                listener: None,
            }),
            topics: std::sync::Mutex::new(TopicIndex::new()),
            events_tx,
        });
        tokio::spawn(dispatch_events(Arc::downgrade(&inner), events_rx));
        Ok(Self { inner })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register with the host and go live. Idempotent: a second call while
    /// running does nothing and touches the registrar again only after a
    /// `stop`.
    pub async fn start<P: Pubsub>(&self, pubsub: &Arc<P>) -> Result<()> {
        if self.started().await {
            return Ok(());
        }
        debug!(name = %self.inner.debug_name, peer = %self.inner.peer_id, "starting router");

        let handler: StreamHandler = {
            let pubsub = Arc::clone(pubsub);
            Arc::new(move |incoming: IncomingStream| {
                let pubsub = Arc::clone(&pubsub);
                async move {
                    let router = pubsub.router().clone();
                    router.on_incoming_stream(&pubsub, incoming).await;
                }
                .boxed()
            })
        };
        self.inner
            .registrar
            .handle(&self.inner.protocols, handler)
            .await
            .map_err(Error::Registrar)?;

        let on_connect: ConnectHandler = {
            let router = self.clone();
            Arc::new(move |peer, connection| {
                let router = router.clone();
                async move { router.on_peer_connected(peer, connection).await }.boxed()
            })
        };
        let on_disconnect: DisconnectHandler = {
            let router = self.clone();
            Arc::new(move |peer, err| {
                let router = router.clone();
                async move { router.on_peer_disconnected(&peer, err).await }.boxed()
            })
        };
        let registration = self
            .inner
            .registrar
            .register(Topology {
                protocols: self.inner.protocols.clone(),
                on_connect,
                on_disconnect,
            })
            .await
            .map_err(Error::Registrar)?;

        let mut st = self.inner.state.lock().await;
        st.registration = Some(registration);
        st.started = true;
        Ok(())
    }

    /// Unregister from the host and tear down every peer stream.
    /// Idempotent; a stop without a prior start is a no-op. Host errors
    /// during unregistration are logged and swallowed so teardown always
    /// completes.
    pub async fn stop(&self) -> Result<()> {
        let (registration, peers) = {
            let mut st = self.inner.state.lock().await;
            if !st.started {
                return Ok(());
            }
            st.started = false;
            (st.registration.take(), std::mem::take(&mut st.peers))
        };
        debug!(name = %self.inner.debug_name, peers = peers.len(), "stopping router");

        if let Some(registration) = registration {
            if let Err(err) = self.inner.registrar.unregister(registration).await {
                warn!(name = %self.inner.debug_name, error = %err, "unregister failed");
            }
        }
        join_all(peers.values().map(|stream| stream.close())).await;
        Ok(())
    }

    pub async fn started(&self) -> bool {
        self.inner.state.lock().await.started
    }

    // ------------------------------------------------------------------
    // Peer registry
    // ------------------------------------------------------------------

    /// Get or create the stream state for `peer`. Idempotent: an existing
    /// entry wins and keeps its original protocol.
    pub async fn add_peer(&self, peer: PeerId, protocol: &str) -> Arc<PeerStream> {
        let mut st = self.inner.state.lock().await;
        let key = peer.to_base58();
        if let Some(existing) = st.peers.get(&key) {
            return Arc::clone(existing);
        }
        debug!(name = %self.inner.debug_name, peer = %key, protocol, "tracking new peer");
        let stream = PeerStream::new(
            peer,
            protocol,
            self.inner.max_frame_len,
            self.inner.events_tx.clone(),
        );
        st.peers.insert(key, Arc::clone(&stream));
        stream
    }

    /// Close and forget `peer`. Returns the removed entry, if any.
    pub async fn remove_peer(&self, peer: &PeerId) -> Option<Arc<PeerStream>> {
        let removed = self.inner.state.lock().await.peers.remove(&peer.to_base58());
        if let Some(stream) = &removed {
            debug!(name = %self.inner.debug_name, peer = %peer, "removing peer");
            stream.close().await;
        }
        removed
    }

    /// Removal driven by a `Closed` event. Only drops the entry when the
    /// stream currently registered is itself closed, so a stale event
    /// from a replaced instance cannot evict its successor.
    async fn remove_closed_peer(&self, peer: &PeerId) {
        let mut st = self.inner.state.lock().await;
        let key = peer.to_base58();
        let closed = st.peers.get(&key).is_some_and(|stream| stream.is_closed());
        if closed {
            st.peers.remove(&key);
            debug!(name = %self.inner.debug_name, peer = %key, "peer stream closed, dropped");
        }
    }

    pub async fn peer(&self, id_b58: &str) -> Option<Arc<PeerStream>> {
        self.inner.state.lock().await.peers.get(id_b58).cloned()
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        self.inner.state.lock().await.peers.keys().cloned().collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.state.lock().await.peers.len()
    }

    // ------------------------------------------------------------------
    // Host event entry points
    // ------------------------------------------------------------------

    /// A remote opened a protocol stream toward us: attach it as the
    /// peer's inbound and hand the framed reader to the policy's message
    /// loop. Works with or without a prior connect notification.
    pub async fn on_incoming_stream<P: Pubsub>(&self, pubsub: &Arc<P>, incoming: IncomingStream) {
        let peer = incoming.connection.remote_peer();
        let stream = self.add_peer(peer, &incoming.protocol).await;
        let frames = stream.attach_inbound(incoming.stream).await;
        trace!(
            name = %self.inner.debug_name,
            peer = %peer,
            protocol = %incoming.protocol,
            "inbound stream attached"
        );

        let pubsub = Arc::clone(pubsub);
        let peer_b58 = peer.to_base58();
        tokio::spawn(async move {
            if let Err(err) = pubsub.process_messages(&peer_b58, frames, stream).await {
                debug!(peer = %peer_b58, error = %err, "message loop ended");
            }
        });
    }

    /// A session with `peer` came up: open our own outbound stream on it.
    /// Negotiation failure is logged and leaves the peer without an
    /// outbound; the next connect notification is the retry.
    pub async fn on_peer_connected(&self, peer: PeerId, connection: Arc<dyn Connection>) {
        let negotiated = match connection.new_stream(&self.inner.protocols).await {
            Ok(negotiated) => negotiated,
            Err(err) => {
                warn!(
                    name = %self.inner.debug_name,
                    peer = %peer,
                    error = %err,
                    "failed to open outbound stream"
                );
                return;
            }
        };
        let stream = self.add_peer(peer, &negotiated.protocol).await;
        stream.attach_outbound(negotiated.stream).await;
        trace!(name = %self.inner.debug_name, peer = %peer, "outbound stream attached");
    }

    /// A session ended. Unknown peers are a no-op; plain hang-ups are not
    /// worth a warning.
    pub async fn on_peer_disconnected(&self, peer: &PeerId, err: Option<anyhow::Error>) {
        if let Some(err) = &err {
            if err.to_string() != HANGUP_MESSAGE {
                warn!(name = %self.inner.debug_name, peer = %peer, error = %err, "peer disconnected");
            }
        }
        self.remove_peer(peer).await;
    }

    // ------------------------------------------------------------------
    // Shared policy helpers
    // ------------------------------------------------------------------

    /// Normalise an outgoing message and, when signing is on, sign it.
    pub fn build_message(&self, mut msg: Message) -> Message {
        msg.received_from = None;
        match (&self.inner.keypair, self.inner.sign_messages) {
            (Some(keypair), true) => sign_message(keypair, &msg),
            _ => msg,
        }
    }

    /// Check an inbound message against the signing policy: a missing
    /// signature fails under strict signing, a present signature must
    /// verify.
    pub fn validate(&self, msg: &Message) -> Result<()> {
        match &msg.signature {
            None if self.inner.strict_signing => Err(Error::MissingSignature),
            None => Ok(()),
            Some(_) => {
                if verify_message(msg)? {
                    Ok(())
                } else {
                    Err(Error::InvalidSignature)
                }
            }
        }
    }

    /// Base58 ids of the peers subscribed to `topic`.
    pub async fn get_subscribers(&self, topic: &str) -> Result<Vec<String>> {
        if !self.started().await {
            return Err(Error::NotStarted);
        }
        if topic.is_empty() {
            return Err(Error::InvalidTopic);
        }
        let topics = self.topic_index();
        Ok(topics
            .get(topic)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// The topic→subscribers index. The policy maintains the contents;
    /// the guard must not be held across awaits.
    pub fn topic_index(&self) -> std::sync::MutexGuard<'_, TopicIndex> {
        self.inner.topics.lock().expect("topic index lock poisoned")
    }

    /// Register a sink receiving every peer-stream event.
    pub async fn set_event_listener(&self, listener: mpsc::UnboundedSender<(PeerId, StreamEvent)>) {
        self.inner.state.lock().await.listener = Some(listener);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn peer_id(&self) -> &PeerId {
        &self.inner.peer_id
    }

    pub fn protocols(&self) -> &[String] {
        &self.inner.protocols
    }

    pub fn debug_name(&self) -> &str {
        &self.inner.debug_name
    }

    pub fn sign_messages(&self) -> bool {
        self.inner.sign_messages
    }

    pub fn strict_signing(&self) -> bool {
        self.inner.strict_signing
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.inner.debug_name)
            .field("peer", &self.inner.peer_id.to_base58())
            .field("protocols", &self.inner.protocols)
            .finish()
    }
}

async fn dispatch_events(
    weak: Weak<RouterInner>,
    mut events: mpsc::UnboundedReceiver<(PeerId, StreamEvent)>,
) {
    while let Some((peer, event)) = events.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        let router = Router { inner };

        let listener = router.inner.state.lock().await.listener.clone();
        if let Some(listener) = listener {
            let _ = listener.send((peer, event));
        }
        if event == StreamEvent::Closed {
            router.remove_closed_peer(&peer).await;
        }
    }
}

// ============================================================================
// Policy surface
// ============================================================================

/// The contract a routing policy implements on top of [`Router`].
///
/// The policy may read the peer registry, mutate the topic index, and
/// write to any peer stream; it must not add or remove peers itself. The
/// routing operations default to [`Error::NotImplemented`] so a policy
/// only overrides what it supports.
#[async_trait]
pub trait Pubsub: Send + Sync + 'static {
    /// The router this policy is bound to.
    fn router(&self) -> &Router;

    /// Publish payload bytes to a topic.
    async fn publish(&self, _topic: &str, _data: Bytes) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Start receiving messages for a topic.
    async fn subscribe(&self, _topic: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Stop receiving messages for a topic.
    async fn unsubscribe(&self, _topic: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Topics the local node is subscribed to.
    fn topics(&self) -> Result<Vec<String>> {
        Err(Error::NotImplemented)
    }

    /// Consume a peer's inbound frames. Runs once per attached inbound
    /// stream; the loop is expected to validate, drop bad messages, and
    /// continue until the reader ends.
    async fn process_messages(
        &self,
        peer: &str,
        frames: InboundFrames,
        stream: Arc<PeerStream>,
    ) -> Result<()> {
        let _ = (peer, frames, stream);
        Err(Error::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct NullRegistrar {
        handled: AtomicU64,
        registered: AtomicU64,
        unregistered: AtomicU64,
    }

    impl NullRegistrar {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                handled: AtomicU64::new(0),
                registered: AtomicU64::new(0),
                unregistered: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl Registrar for NullRegistrar {
        async fn handle(&self, _: &[String], _: StreamHandler) -> anyhow::Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn register(&self, _: Topology) -> anyhow::Result<RegistrationId> {
            Ok(RegistrationId(self.registered.fetch_add(1, Ordering::SeqCst)))
        }

        async fn unregister(&self, _: RegistrationId) -> anyhow::Result<()> {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BarePolicy {
        router: Router,
    }

    impl Pubsub for BarePolicy {
        fn router(&self) -> &Router {
            &self.router
        }
    }

    fn signed_config(registrar: Arc<dyn Registrar>) -> RouterConfig {
        let keypair = Keypair::generate_ed25519();
        RouterConfig::new(
            "test-router",
            vec!["/floodline/1.0.0".into()],
            keypair.peer_id(),
            registrar,
        )
        .with_keypair(keypair)
    }

    fn new_policy(config: RouterConfig) -> Arc<BarePolicy> {
        Arc::new(BarePolicy {
            router: Router::new(config).expect("valid config"),
        })
    }

    #[tokio::test]
    async fn config_requires_debug_name_and_protocols() {
        let registrar = NullRegistrar::new();
        let keypair = Keypair::generate_ed25519();

        let mut config = signed_config(registrar.clone());
        config.debug_name = String::new();
        assert_eq!(
            Router::new(config).expect_err("empty name").code(),
            "ERR_INVALID_CONFIG"
        );

        let config = RouterConfig::new("r", vec![], keypair.peer_id(), registrar)
            .with_keypair(keypair);
        assert_eq!(
            Router::new(config).expect_err("no protocols").code(),
            "ERR_INVALID_CONFIG"
        );
    }

    #[tokio::test]
    async fn config_requires_matching_keypair_for_signing() {
        let registrar = NullRegistrar::new();
        let keypair = Keypair::generate_ed25519();
        let other = Keypair::generate_ed25519();

        let config = RouterConfig::new(
            "r",
            vec!["/floodline/1.0.0".into()],
            keypair.peer_id(),
            registrar.clone(),
        );
        assert_eq!(
            Router::new(config).expect_err("signing without keypair").code(),
            "ERR_INVALID_CONFIG"
        );

        let config = RouterConfig::new(
            "r",
            vec!["/floodline/1.0.0".into()],
            keypair.peer_id(),
            registrar.clone(),
        )
        .with_keypair(other);
        assert_eq!(
            Router::new(config).expect_err("mismatched keypair").code(),
            "ERR_INVALID_CONFIG"
        );

        // Unsigned routers need no keypair at all.
        let config = RouterConfig::new(
            "r",
            vec!["/floodline/1.0.0".into()],
            keypair.peer_id(),
            registrar,
        )
        .with_sign_messages(false);
        assert!(Router::new(config).is_ok());
    }

    #[tokio::test]
    async fn build_message_signs_when_enabled() {
        let policy = new_policy(signed_config(NullRegistrar::new()));
        let router = policy.router();

        let msg = Message {
            from: Bytes::copy_from_slice(router.peer_id().as_bytes()),
            data: Bytes::from_static(b"payload"),
            seqno: crate::wire::random_seqno(),
            topics: vec!["t".into()],
            received_from: Some("neighbour".into()),
            ..Message::default()
        };
        let built = router.build_message(msg);
        assert!(built.signature.is_some());
        assert!(built.key.is_some());
        assert!(built.received_from.is_none());
        router.validate(&built).expect("own message validates");
    }

    #[tokio::test]
    async fn build_message_passthrough_when_signing_off() {
        let registrar = NullRegistrar::new();
        let keypair = Keypair::generate_ed25519();
        let config = RouterConfig::new(
            "r",
            vec!["/floodline/1.0.0".into()],
            keypair.peer_id(),
            registrar,
        )
        .with_sign_messages(false)
        .with_strict_signing(false);
        let policy = new_policy(config);

        let msg = Message {
            from: Bytes::copy_from_slice(keypair.peer_id().as_bytes()),
            data: Bytes::from_static(b"plain"),
            ..Message::default()
        };
        let built = policy.router().build_message(msg);
        assert!(built.signature.is_none());
        assert!(built.key.is_none());
    }

    #[tokio::test]
    async fn strict_signing_rejects_unsigned_messages() {
        let policy = new_policy(signed_config(NullRegistrar::new()));
        let msg = Message::default();
        let err = policy.router().validate(&msg).expect_err("unsigned");
        assert_eq!(err.code(), "ERR_MISSING_SIGNATURE");
    }

    #[tokio::test]
    async fn lenient_routers_accept_unsigned_but_not_bad_signatures() {
        let registrar = NullRegistrar::new();
        let keypair = Keypair::generate_ed25519();
        let config = RouterConfig::new(
            "r",
            vec!["/floodline/1.0.0".into()],
            keypair.peer_id(),
            registrar,
        )
        .with_keypair(keypair.clone())
        .with_strict_signing(false);
        let policy = new_policy(config);
        let router = policy.router();

        router.validate(&Message::default()).expect("unsigned is fine");

        let mut tampered = router.build_message(Message {
            from: Bytes::copy_from_slice(keypair.peer_id().as_bytes()),
            data: Bytes::from_static(b"original"),
            ..Message::default()
        });
        tampered.data = Bytes::from_static(b"tampered");
        let err = router.validate(&tampered).expect_err("signature is stale");
        assert_eq!(err.code(), "ERR_INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn get_subscribers_requires_start_and_valid_topic() {
        let policy = new_policy(signed_config(NullRegistrar::new()));
        let router = policy.router();

        let err = router.get_subscribers("t").await.expect_err("not started");
        assert_eq!(err.code(), "ERR_NOT_STARTED_YET");

        router.start(&policy).await.expect("start succeeds");
        let err = router.get_subscribers("").await.expect_err("empty topic");
        assert_eq!(err.code(), "ERR_NOT_VALID_TOPIC");

        assert!(router.get_subscribers("t").await.expect("no index entry").is_empty());

        {
            let mut index = router.topic_index();
            let subscribers = index.entry("t".into()).or_default();
            subscribers.insert("QmB".into());
            subscribers.insert("QmA".into());
        }
        assert_eq!(
            router.get_subscribers("t").await.expect("entry exists"),
            vec!["QmA".to_string(), "QmB".to_string()]
        );
    }

    #[tokio::test]
    async fn routing_operations_default_to_not_implemented() {
        let policy = new_policy(signed_config(NullRegistrar::new()));

        let err = policy.publish("t", Bytes::new()).await.expect_err("abstract");
        assert_eq!(err.code(), "ERR_NOT_IMPLEMENTED");
        let err = policy.subscribe("t").await.expect_err("abstract");
        assert_eq!(err.code(), "ERR_NOT_IMPLEMENTED");
        let err = policy.unsubscribe("t").await.expect_err("abstract");
        assert_eq!(err.code(), "ERR_NOT_IMPLEMENTED");
        let err = policy.topics().expect_err("abstract");
        assert_eq!(err.code(), "ERR_NOT_IMPLEMENTED");
    }

    #[tokio::test]
    async fn start_and_stop_touch_registrar_once_each() {
        let registrar = NullRegistrar::new();
        let policy = new_policy(signed_config(registrar.clone()));
        let router = policy.router();

        router.start(&policy).await.expect("first start");
        router.start(&policy).await.expect("second start is a no-op");
        assert_eq!(registrar.handled.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.registered.load(Ordering::SeqCst), 1);

        router.stop().await.expect("stop");
        router.stop().await.expect("second stop is a no-op");
        assert_eq!(registrar.unregistered.load(Ordering::SeqCst), 1);
        assert!(!router.started().await);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let registrar = NullRegistrar::new();
        let policy = new_policy(signed_config(registrar.clone()));
        policy.router().stop().await.expect("nothing to do");
        assert_eq!(registrar.unregistered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn add_peer_is_idempotent_and_remove_clears_entry() {
        let policy = new_policy(signed_config(NullRegistrar::new()));
        let router = policy.router();
        let peer = Keypair::generate_ed25519().peer_id();

        let first = router.add_peer(peer, "/floodline/1.0.0").await;
        let second = router.add_peer(peer, "/floodline/1.1.0").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.protocol(), "/floodline/1.0.0");
        assert_eq!(router.peer_count().await, 1);

        let removed = router.remove_peer(&peer).await.expect("entry existed");
        assert!(removed.is_closed());
        assert_eq!(router.peer_count().await, 0);
        assert!(router.remove_peer(&peer).await.is_none());
    }
}
