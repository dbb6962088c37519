//! # Peer Streams
//!
//! Per-peer stream state. Each connected peer owns at most one inbound
//! framed reader and one outbound write queue at a time:
//!
//! - **Inbound**: a raw stream the remote opened toward us, wrapped in the
//!   frame decoder behind a cancellation token. Replacing or closing the
//!   stream cancels the reader, which ends cleanly rather than erroring.
//! - **Outbound**: a raw stream we opened, fed by an unbounded queue that
//!   a writer task drains through the frame encoder. Replacement is quiet
//!   (no close event): the old queue is ended, its drain awaited, then the
//!   new stream installed.
//!
//! A stream becomes `Closed` exactly once, whether through [`PeerStream::close`],
//! an outbound write error, or the outbound queue terminating. Closed is
//! terminal: later attaches are no-ops and writes fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::framing::FrameCodec;
use crate::identity::PeerId;
use crate::registrar::BoxedStream;

/// Observable lifecycle events of a [`PeerStream`].
///
/// `InboundOpened` and `OutboundOpened` fire at most once per stream
/// instance, on the first successful attach of that direction; `Closed`
/// fires exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    InboundOpened,
    OutboundOpened,
    Closed,
}

/// Sink for stream events, tagged with the emitting peer.
pub type EventSender = mpsc::UnboundedSender<(PeerId, StreamEvent)>;

/// The cancellable, frame-decoded inbound half of a peer stream.
///
/// Yields `None` when the remote closes the stream *or* when the reader
/// is cancelled (replacement or close); cancellation is never an error.
pub struct InboundFrames {
    frames: FramedRead<BoxedStream, FrameCodec>,
    cancel: CancellationToken,
}

impl InboundFrames {
    /// Next frame, a decode error, or `None` on clean end.
    pub async fn next(&mut self) -> Option<Result<Bytes>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            frame = self.frames.next() => frame,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Outbound {
    queue: mpsc::UnboundedSender<Bytes>,
    /// Set before ending the queue to suppress the writer's close path
    /// (quiet replacement, or a close that emits the event itself).
    quiet: Arc<AtomicBool>,
    writer: JoinHandle<()>,
}

struct StreamState {
    inbound_cancel: Option<CancellationToken>,
    outbound: Option<Outbound>,
}

/// Stream state for one connected peer.
pub struct PeerStream {
    id: PeerId,
    protocol: String,
    max_frame_len: usize,
    /// Handle to ourselves for the writer task; never upgraded after the
    /// router drops the stream.
    weak: Weak<PeerStream>,
    state: Mutex<StreamState>,
    readable: AtomicBool,
    writable: AtomicBool,
    closed: AtomicBool,
    inbound_opened: AtomicBool,
    outbound_opened: AtomicBool,
    events: EventSender,
}

impl PeerStream {
    pub fn new(id: PeerId, protocol: &str, max_frame_len: usize, events: EventSender) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            protocol: protocol.to_string(),
            max_frame_len,
            weak: weak.clone(),
            state: Mutex::new(StreamState {
                inbound_cancel: None,
                outbound: None,
            }),
            readable: AtomicBool::new(false),
            writable: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            inbound_opened: AtomicBool::new(false),
            outbound_opened: AtomicBool::new(false),
            events,
        })
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn is_readable(&self) -> bool {
        self.readable.load(Ordering::SeqCst)
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Install `raw` as the inbound stream and return its framed reader.
    ///
    /// An existing reader is cancelled first and ends cleanly at its next
    /// suspension. On a closed stream the returned reader is already
    /// cancelled and yields nothing.
    pub async fn attach_inbound(&self, raw: BoxedStream) -> InboundFrames {
        let cancel = CancellationToken::new();
        let frames = FramedRead::new(raw, FrameCodec::new(self.max_frame_len));

        if self.is_closed() {
            cancel.cancel();
            return InboundFrames { frames, cancel };
        }

        let mut st = self.state.lock().await;
        if let Some(old) = st.inbound_cancel.take() {
            trace!(peer = %self.id, "replacing inbound stream");
            old.cancel();
        }
        st.inbound_cancel = Some(cancel.clone());
        self.readable.store(true, Ordering::SeqCst);
        drop(st);

        if !self.inbound_opened.swap(true, Ordering::SeqCst) {
            self.emit(StreamEvent::InboundOpened);
        }
        InboundFrames { frames, cancel }
    }

    /// Install `raw` as the outbound stream with a fresh write queue.
    ///
    /// An existing queue is ended quietly (no close event) and its drain
    /// awaited before the new stream takes over. No-op on a closed stream.
    pub async fn attach_outbound(&self, raw: BoxedStream) {
        if self.is_closed() {
            return;
        }

        let previous = self.state.lock().await.outbound.take();
        if let Some(prev) = previous {
            prev.quiet.store(true, Ordering::SeqCst);
            drop(prev.queue);
            if let Err(err) = prev.writer.await {
                debug!(peer = %self.id, error = %err, "previous outbound writer panicked");
            }
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let quiet = Arc::new(AtomicBool::new(false));
        let sink = FramedWrite::new(raw, FrameCodec::new(self.max_frame_len));
        let writer = tokio::spawn(outbound_writer(
            self.weak.clone(),
            queue_rx,
            sink,
            Arc::clone(&quiet),
        ));

        let mut st = self.state.lock().await;
        if self.is_closed() {
            // Lost the race against close(); let the fresh writer drain out.
            drop(st);
            quiet.store(true, Ordering::SeqCst);
            drop(queue_tx);
            let _ = writer.await;
            return;
        }
        st.outbound = Some(Outbound {
            queue: queue_tx,
            quiet,
            writer,
        });
        self.writable.store(true, Ordering::SeqCst);
        drop(st);

        if !self.outbound_opened.swap(true, Ordering::SeqCst) {
            self.emit(StreamEvent::OutboundOpened);
        }
    }

    /// Enqueue payload bytes for the peer. Framing happens in the writer,
    /// and enqueue order is delivery order.
    pub async fn write(&self, bytes: Bytes) -> Result<()> {
        let st = self.state.lock().await;
        let outbound = st.outbound.as_ref().ok_or(Error::NotWritable)?;
        outbound.queue.send(bytes).map_err(|_| Error::NotWritable)
    }

    /// Tear the stream down: cancel the inbound reader, end the outbound
    /// queue and await its drain, emit `Closed`. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outbound = self.take_streams().await;
        if let Some(outbound) = outbound {
            outbound.quiet.store(true, Ordering::SeqCst);
            drop(outbound.queue);
            if let Err(err) = outbound.writer.await {
                debug!(peer = %self.id, error = %err, "outbound writer panicked during close");
            }
        }
        self.emit(StreamEvent::Closed);
    }

    /// Close initiated by the writer task itself (stream error or drained
    /// queue): everything `close` does except joining the writer.
    async fn close_from_writer(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outbound = self.take_streams().await;
        if let Some(outbound) = outbound {
            outbound.quiet.store(true, Ordering::SeqCst);
            drop(outbound.queue);
        }
        self.emit(StreamEvent::Closed);
    }

    async fn take_streams(&self) -> Option<Outbound> {
        let mut st = self.state.lock().await;
        self.readable.store(false, Ordering::SeqCst);
        self.writable.store(false, Ordering::SeqCst);
        if let Some(cancel) = st.inbound_cancel.take() {
            cancel.cancel();
        }
        st.outbound.take()
    }

    fn emit(&self, event: StreamEvent) {
        trace!(peer = %self.id, ?event, "peer stream event");
        let _ = self.events.send((self.id, event));
    }
}

impl std::fmt::Debug for PeerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerStream")
            .field("peer", &self.id.to_base58())
            .field("protocol", &self.protocol)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn outbound_writer(
    peer: Weak<PeerStream>,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    mut sink: FramedWrite<BoxedStream, FrameCodec>,
    quiet: Arc<AtomicBool>,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(err) = sink.send(bytes).await {
            warn!(error = %err, "outbound stream error, tearing down");
            break;
        }
    }
    queue.close();
    // Best-effort reset of the raw stream.
    if let Err(err) = sink.get_mut().shutdown().await {
        trace!(error = %err, "outbound stream reset failed");
    }
    if !quiet.load(Ordering::SeqCst) {
        if let Some(peer) = peer.upgrade() {
            peer.close_from_writer().await;
        }
    }
}
