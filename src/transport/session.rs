//! Encrypted network sessions.
//!
//! A session owns one byte stream and the two rolling ciphers negotiated for it. Once
//! started it runs two tasks:
//!
//! - a **reader** that reassembles, validates and decrypts inbound frames and hands each
//!   payload to the [`SessionHandler`] inline, so packets are delivered in wire order;
//! - a **writer** that drains the outbound queue, encrypting and framing each payload in
//!   queue order.
//!
//! A session in the [`SessionRole::Server`] role queues its handshake before anything
//! else and is active immediately. One in the [`SessionRole::Client`] role waits for the
//! server's handshake, bounded by [`SessionOptions::handshake_timeout`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use game_protocol::config::NetworkConfig;
//! use game_protocol::core::reader::PacketReader;
//! use game_protocol::transport::session::{NetworkSession, PendingSession, SessionContext, SessionHandler};
//!
//! struct Echo;
//!
//! impl SessionHandler for Echo {
//!     fn on_packet(&self, session: &NetworkSession, mut reader: PacketReader) -> game_protocol::Result<()> {
//!         session.write(reader.read_remaining())
//!     }
//! }
//!
//! # async fn run(stream: tokio::net::TcpStream) -> game_protocol::Result<()> {
//! let config = NetworkConfig::default();
//! let context = SessionContext::from_config(&config);
//! let peer = stream.peer_addr()?;
//! let template = config.protocol.handshake_template();
//! let session = PendingSession::server(stream, peer, &template, context)?.start(Arc::new(Echo))?;
//! session.closed().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn, Instrument};

use crate::cipher::{AlgorithmRegistry, RollingCipher};
use crate::config::NetworkConfig;
use crate::core::codec::{InboundFrame, OutboundFrame, PacketDecoder, PacketEncoder};
use crate::core::reader::PacketReader;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{HandshakeInfo, HandshakeTemplate};
use crate::utils::metrics::Metrics;
use crate::utils::timeout;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Accepted connection; sends the handshake
    Server,
    /// Outbound connection; receives the handshake
    Client,
}

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    PendingHandshake = 0,
    Active = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::PendingHandshake,
            1 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close` was called locally
    Requested,
    /// The peer ended the stream
    PeerClosed,
    /// Socket error
    Transport(String),
    /// Malformed handshake, bad header, oversized frame
    Protocol(String),
    /// No handshake arrived in time
    HandshakeTimeout,
    /// A handler callback returned an error
    Handler(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed locally"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
            CloseReason::Protocol(e) => write!(f, "protocol error: {e}"),
            CloseReason::HandshakeTimeout => f.write_str("handshake timed out"),
            CloseReason::Handler(e) => write!(f, "handler error: {e}"),
        }
    }
}

impl CloseReason {
    fn from_error(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) if is_peer_disconnect(e) => CloseReason::PeerClosed,
            ProtocolError::Io(e) => CloseReason::Transport(e.to_string()),
            ProtocolError::HandshakeTimeout => CloseReason::HandshakeTimeout,
            other => CloseReason::Protocol(other.to_string()),
        }
    }
}

fn is_peer_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Callbacks driven by a session's reader task.
///
/// All three run inline on the reader, so they see packets in wire order and must not
/// block. Long work belongs on a spawned task.
pub trait SessionHandler: Send + Sync + 'static {
    /// The session became active. Server-role sessions call this before any packet.
    fn on_handshake(&self, _session: &NetworkSession, _info: &HandshakeInfo) -> Result<()> {
        Ok(())
    }

    /// One decrypted packet. Returning an error closes the session.
    fn on_packet(&self, session: &NetworkSession, reader: PacketReader) -> Result<()>;

    /// Called exactly once, from whichever task closes the session first.
    fn on_closing(&self, _session: &NetworkSession, _reason: &CloseReason) {}
}

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Largest payload accepted or sent
    pub max_payload_size: usize,
    /// Packets that may wait in the outbound queue before `write` reports backpressure
    pub outbound_queue: usize,
    /// Deadline for the server handshake in the client role
    pub handshake_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_payload_size: crate::config::MAX_PAYLOAD_SIZE,
            outbound_queue: 128,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl From<&NetworkConfig> for SessionOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            max_payload_size: config.protocol.max_payload_size,
            outbound_queue: config.server.backpressure_limit.max(1),
            handshake_timeout: config.client.handshake_timeout,
        }
    }
}

/// Everything a session borrows from its server: options, the cipher registry and
/// the metrics sink.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub options: SessionOptions,
    pub algorithms: Arc<AlgorithmRegistry>,
    pub metrics: Arc<Metrics>,
}

impl SessionContext {
    pub fn new(algorithms: Arc<AlgorithmRegistry>) -> Self {
        Self {
            options: SessionOptions::default(),
            algorithms,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Context with options and a stock registry derived from `config`.
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            options: SessionOptions::from(config),
            algorithms: Arc::new(config.protocol.algorithm_registry()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

enum PendingRole {
    Server(HandshakeInfo),
    Client,
}

/// A connected stream that has not started its tasks yet.
pub struct PendingSession<S> {
    stream: S,
    peer: SocketAddr,
    role: PendingRole,
    context: SessionContext,
}

impl<S> PendingSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Server-role session with freshly generated IVs.
    pub fn server(
        stream: S,
        peer: SocketAddr,
        template: &HandshakeTemplate,
        context: SessionContext,
    ) -> Result<Self> {
        let info = HandshakeInfo::generate(template)?;
        Ok(Self::server_with_info(stream, peer, info, context))
    }

    /// Server-role session that advertises a handshake decided elsewhere.
    pub fn server_with_info(
        stream: S,
        peer: SocketAddr,
        info: HandshakeInfo,
        context: SessionContext,
    ) -> Self {
        Self {
            stream,
            peer,
            role: PendingRole::Server(info),
            context,
        }
    }

    /// Client-role session; the server's handshake selects the ciphers.
    pub fn client(stream: S, peer: SocketAddr, context: SessionContext) -> Self {
        Self {
            stream,
            peer,
            role: PendingRole::Client,
            context,
        }
    }

    pub fn role(&self) -> SessionRole {
        match self.role {
            PendingRole::Server(_) => SessionRole::Server,
            PendingRole::Client => SessionRole::Client,
        }
    }

    /// Spawn the reader and writer tasks. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// `UnsupportedVersion` if a server-role handshake names a version missing from the
    /// registry.
    #[instrument(skip_all, fields(peer = %self.peer, role = ?self.role()))]
    pub fn start(self, handler: Arc<dyn SessionHandler>) -> Result<NetworkSession> {
        let PendingSession {
            stream,
            peer,
            role,
            context,
        } = self;
        let options = context.options.clone();
        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_queue.max(1));
        let (read_half, write_half) = tokio::io::split(stream);

        let (decoder, encoder, handshake_frame, info, session_role) = match role {
            PendingRole::Server(info) => {
                let algorithm = context.algorithms.resolve(info.version)?;
                let ciphers = info.server_ciphers(algorithm)?;
                let frame = info.encode()?;
                (
                    PacketDecoder::active(ciphers.decryptor, options.max_payload_size),
                    PacketEncoder::armed(ciphers.encryptor, options.max_payload_size),
                    Some(frame),
                    Some(info),
                    SessionRole::Server,
                )
            }
            PendingRole::Client => (
                PacketDecoder::awaiting_handshake(
                    Arc::clone(&context.algorithms),
                    options.max_payload_size,
                ),
                PacketEncoder::unarmed(options.max_payload_size),
                None,
                None,
                SessionRole::Client,
            ),
        };

        let session = NetworkSession {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                role: session_role,
                state: AtomicU8::new(SessionState::PendingHandshake as u8),
                outbound: outbound_tx,
                cancel: CancellationToken::new(),
                handler,
                handshake: OnceLock::new(),
                max_payload: options.max_payload_size,
                metrics: Arc::clone(&context.metrics),
            }),
        };
        context.metrics.connection_established();

        if let (Some(frame), Some(info)) = (handshake_frame, info) {
            // queue is fresh, so the handshake is first on the wire
            session
                .inner
                .outbound
                .try_send(Outbound::Frame(OutboundFrame::Handshake(frame)))
                .map_err(|_| ProtocolError::Custom(constants::ERR_SESSION_QUEUE_CLOSED.into()))?;
            let _ = session.inner.handshake.set(info);
            session.activate();
        }

        let span = tracing::info_span!("session", id = session.id(), peer = %peer);
        tokio::spawn(
            write_loop(session.clone(), FramedWrite::new(write_half, encoder), outbound_rx)
                .instrument(span.clone()),
        );
        tokio::spawn(
            read_loop(
                session.clone(),
                FramedRead::new(read_half, decoder),
                options.handshake_timeout,
            )
            .instrument(span),
        );

        info!(id = session.id(), "Session started");
        Ok(session)
    }
}

enum Outbound {
    Frame(OutboundFrame),
    Arm(RollingCipher),
}

struct SessionInner {
    id: u64,
    peer: SocketAddr,
    role: SessionRole,
    state: AtomicU8,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    handler: Arc<dyn SessionHandler>,
    handshake: OnceLock<HandshakeInfo>,
    max_payload: usize,
    metrics: Arc<Metrics>,
}

/// Handle to a running session. Cheap to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct NetworkSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for NetworkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkSession")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}

impl NetworkSession {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn role(&self) -> SessionRole {
        self.inner.role
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Negotiated handshake, once known
    pub fn handshake(&self) -> Option<&HandshakeInfo> {
        self.inner.handshake.get()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    fn activate(&self) -> bool {
        let switched = self
            .inner
            .state
            .compare_exchange(
                SessionState::PendingHandshake as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if switched {
            self.inner.metrics.handshake_success();
        }
        switched
    }

    fn check_writable(&self, len: usize) -> Result<()> {
        match self.state() {
            SessionState::PendingHandshake => return Err(ProtocolError::NotActive),
            SessionState::Closed => return Err(ProtocolError::ConnectionClosed),
            SessionState::Active => {}
        }
        if len > self.inner.max_payload {
            return Err(ProtocolError::OversizedPacket(len));
        }
        Ok(())
    }

    /// Queue a payload without waiting.
    ///
    /// # Errors
    /// - `NotActive` before the handshake completes
    /// - `ConnectionClosed` after close
    /// - `OversizedPacket` above the payload limit
    /// - `Backpressure` when the outbound queue is full
    pub fn write(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.check_writable(payload.len())?;
        self.inner
            .outbound
            .try_send(Outbound::Frame(OutboundFrame::Packet(payload)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    self.inner.metrics.backpressure_rejection();
                    ProtocolError::Backpressure
                }
                mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
            })
    }

    /// Queue a payload, waiting for room in the outbound queue.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.check_writable(payload.len())?;
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            sent = self.inner.outbound.send(Outbound::Frame(OutboundFrame::Packet(payload))) => {
                sent.map_err(|_| ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Close the session. Only the first call has any effect: it stops both tasks and
    /// notifies the handler.
    pub fn close(&self, reason: CloseReason) {
        let previous = SessionState::from_u8(
            self.inner
                .state
                .swap(SessionState::Closed as u8, Ordering::AcqRel),
        );
        if previous == SessionState::Closed {
            return;
        }

        self.inner.cancel.cancel();
        self.inner.metrics.connection_closed();
        if previous == SessionState::PendingHandshake {
            self.inner.metrics.handshake_failed();
        }

        match &reason {
            CloseReason::Requested | CloseReason::PeerClosed => {
                info!(id = self.id(), peer = %self.peer_addr(), %reason, "Session closed")
            }
            _ => warn!(id = self.id(), peer = %self.peer_addr(), %reason, "Session closed"),
        }
        self.inner.handler.on_closing(self, &reason);
    }

    /// Resolves once the session has closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }
}

fn record_error(metrics: &Metrics, err: &ProtocolError) {
    if err.is_protocol_fatal() {
        metrics.protocol_error();
    } else {
        metrics.connection_error();
    }
}

type Reader<S> = FramedRead<ReadHalf<S>, PacketDecoder>;
type Writer<S> = FramedWrite<WriteHalf<S>, PacketEncoder>;

async fn read_loop<S>(session: NetworkSession, mut framed: Reader<S>, handshake_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let deadline = tokio::time::sleep(handshake_timeout);
    tokio::pin!(deadline);

    if let Some(info) = session.handshake() {
        if let Err(e) = session.inner.handler.on_handshake(&session, info) {
            session.close(CloseReason::Handler(e.to_string()));
            return;
        }
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = session.inner.cancel.cancelled() => break,
            _ = &mut deadline, if session.state() == SessionState::PendingHandshake => {
                session.inner.metrics.protocol_error();
                session.close(CloseReason::HandshakeTimeout);
                break;
            }
            next = framed.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                record_error(&session.inner.metrics, &e);
                session.close(CloseReason::from_error(&e));
                break;
            }
            None => {
                session.close(CloseReason::PeerClosed);
                break;
            }
        };

        if let Err(e) = deliver(&session, frame).await {
            session.close(CloseReason::Handler(e.to_string()));
            break;
        }
    }
    debug!(id = session.id(), "Reader finished");
}

async fn deliver(session: &NetworkSession, frame: InboundFrame) -> Result<()> {
    match frame {
        InboundFrame::Handshake { info, encryptor } => {
            // arm goes through the queue so it lands before any packet written after activation
            session
                .inner
                .outbound
                .send(Outbound::Arm(encryptor))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            let info = session.inner.handshake.get_or_init(|| info);
            if session.activate() {
                info!(
                    id = session.id(),
                    version = info.version,
                    subversion = %info.subversion,
                    locale = info.locale,
                    "Handshake complete"
                );
                session.inner.handler.on_handshake(session, info)?;
            }
            Ok(())
        }
        InboundFrame::Packet(payload) => {
            if session.is_closed() {
                return Ok(());
            }
            session.inner.metrics.packet_received(payload.len() as u64);
            trace!(id = session.id(), len = payload.len(), "Packet received");
            session
                .inner
                .handler
                .on_packet(session, PacketReader::new(payload))
        }
    }
}

async fn write_loop<S>(
    session: NetworkSession,
    mut framed: Writer<S>,
    mut outbound: mpsc::Receiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let command = tokio::select! {
            biased;
            _ = session.inner.cancel.cancelled() => break,
            command = outbound.recv() => command,
        };

        match command {
            None => break,
            Some(Outbound::Arm(encryptor)) => framed.encoder_mut().arm(encryptor),
            Some(Outbound::Frame(frame)) => {
                let len = match &frame {
                    OutboundFrame::Packet(payload) => Some(payload.len() as u64),
                    OutboundFrame::Handshake(_) => None,
                };
                if let Err(e) = framed.send(frame).await {
                    record_error(&session.inner.metrics, &e);
                    session.close(CloseReason::from_error(&e));
                    break;
                }
                if let Some(len) = len {
                    session.inner.metrics.packet_sent(len);
                }
            }
        }
    }

    outbound.close();
    debug!(id = session.id(), "Writer finished");
}
