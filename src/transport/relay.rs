//! Man-in-the-middle relay between game clients and an upstream server.
//!
//! For every accepted client the relay opens an upstream connection and runs it in the
//! client role. When the upstream handshake arrives, the client-facing session is started
//! in the server role with the very same handshake, so both hops share versions and IVs.
//! Decrypted packets are re-encrypted for the other hop; closing either side closes its
//! pair.
//!
//! Forwarding never waits. If the target hop's outbound queue is full the packet cannot be
//! dropped without desynchronising the game, so the pair is torn down with `Backpressure`.
//! Size `server.backpressure_limit` for the burstiest traffic the relay carries.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::NetworkConfig;
use crate::core::builder::PacketBuilder;
use crate::core::reader::PacketReader;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::HandshakeInfo;
use crate::transport::acceptor::SocketAcceptor;
use crate::transport::session::{
    CloseReason, NetworkSession, PendingSession, SessionContext, SessionHandler,
};
use crate::utils::timeout::{self, with_timeout_error};

/// Relay listening for clients and forwarding to one upstream server.
pub struct RelayProxy {
    acceptor: SocketAcceptor,
    upstream: SocketAddr,
    context: SessionContext,
    connect_timeout: Duration,
}

impl RelayProxy {
    pub async fn bind<A: ToSocketAddrs>(
        listen: A,
        upstream: SocketAddr,
        context: SessionContext,
    ) -> Result<Self> {
        Ok(Self {
            acceptor: SocketAcceptor::bind(listen).await?,
            upstream,
            context,
            connect_timeout: timeout::DEFAULT_TIMEOUT,
        })
    }

    /// Listen on `server.address`, forward to `client.address`.
    pub async fn from_config(config: &NetworkConfig) -> Result<Self> {
        let upstream = config.client.address.parse::<SocketAddr>().map_err(|e| {
            ProtocolError::ConfigError(format!("Invalid upstream address: {e}"))
        })?;
        let mut relay =
            Self::bind(config.server.address.as_str(), upstream, SessionContext::from_config(config))
                .await?;
        relay.connect_timeout = config.client.connection_timeout;
        Ok(relay)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn upstream_addr(&self) -> SocketAddr {
        self.upstream
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Start accepting clients.
    pub fn start(&self) -> Result<()> {
        let upstream = self.upstream;
        let context = self.context.clone();
        let connect_timeout = self.connect_timeout;

        info!(listen = %self.local_addr(), %upstream, "Relay starting");
        self.acceptor.start(
            move |stream, peer| {
                let context = context.clone();
                let span = tracing::info_span!("relay", client = %peer);
                tokio::spawn(
                    async move {
                        if let Err(e) =
                            open_pair(stream, peer, upstream, context, connect_timeout).await
                        {
                            warn!(error = %e, "Relay connection failed");
                        }
                    }
                    .instrument(span),
                );
            },
            |e| debug!(error = %e, "Relay accept error"),
        )
    }

    /// Stop accepting clients and log the relay's counters. Open pairs keep running.
    pub fn stop(&self) {
        self.acceptor.stop();
        self.context.metrics.log_metrics();
    }
}

#[instrument(skip(client, context, connect_timeout))]
async fn open_pair(
    client: TcpStream,
    client_addr: SocketAddr,
    upstream: SocketAddr,
    context: SessionContext,
    connect_timeout: Duration,
) -> Result<NetworkSession> {
    let server = with_timeout_error(
        async { TcpStream::connect(upstream).await.map_err(ProtocolError::from) },
        connect_timeout,
    )
    .await?;
    server.set_nodelay(true)?;

    let handler = Arc::new(UpstreamHandler {
        pending_client: Mutex::new(Some((client, client_addr))),
        downstream: Mutex::new(None),
        context: context.clone(),
    });
    PendingSession::client(server, upstream, context).start(handler)
}

/// Re-frame a decrypted packet for the other hop.
///
/// # Errors
/// `Backpressure` when the target's outbound queue is full; the caller's session then
/// closes and takes its pair down with it.
fn forward(target: &NetworkSession, mut reader: PacketReader) -> Result<()> {
    let opcode = reader
        .try_safe(|r| r.read_u16())
        .ok_or_else(|| ProtocolError::Custom(constants::ERR_RELAY_SHORT_PACKET.into()))?;
    let body = reader.read_remaining();

    let mut builder = PacketBuilder::with_capacity(2 + body.len());
    builder.write_u16(opcode).write_bytes(&body);
    debug!(opcode, len = body.len(), to = %target.peer_addr(), "Forwarding packet");
    target.write(builder.finish())
}

/// Hooks on the upstream (client-role) session.
struct UpstreamHandler {
    pending_client: Mutex<Option<(TcpStream, SocketAddr)>>,
    downstream: Mutex<Option<NetworkSession>>,
    context: SessionContext,
}

impl UpstreamHandler {
    fn downstream(&self) -> Option<NetworkSession> {
        self.downstream.lock().ok().and_then(|slot| slot.clone())
    }

    fn close_downstream(&self, client: NetworkSession) {
        if let Ok(mut slot) = self.downstream.lock() {
            slot.take();
        }
        client.close(CloseReason::Requested);
    }
}

impl SessionHandler for UpstreamHandler {
    fn on_handshake(&self, session: &NetworkSession, info: &HandshakeInfo) -> Result<()> {
        let (stream, peer) = self
            .pending_client
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ACCEPTOR_LOCK.into()))?
            .take()
            .ok_or(ProtocolError::ConnectionClosed)?;

        let downstream_handler = Arc::new(DownstreamHandler {
            upstream: Mutex::new(Some(session.clone())),
        });
        let downstream =
            PendingSession::server_with_info(stream, peer, info.clone(), self.context.clone())
                .start(downstream_handler)?;

        info!(
            client = %peer,
            server = %session.peer_addr(),
            version = info.version,
            "Relay pair established"
        );
        *self
            .downstream
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ACCEPTOR_LOCK.into()))? =
            Some(downstream);

        // upstream may have closed before the slot was filled, with on_closing seeing it empty
        if session.is_closed() {
            if let Some(client) = self.downstream() {
                self.close_downstream(client);
            }
        }
        Ok(())
    }

    fn on_packet(&self, _session: &NetworkSession, reader: PacketReader) -> Result<()> {
        match self.downstream() {
            Some(client) => forward(&client, reader),
            None => Err(ProtocolError::NotActive),
        }
    }

    fn on_closing(&self, _session: &NetworkSession, _reason: &CloseReason) {
        // dropping an unused client stream disconnects it
        if let Ok(mut pending) = self.pending_client.lock() {
            pending.take();
        }
        let downstream = self.downstream.lock().ok().and_then(|mut slot| slot.take());
        if let Some(client) = downstream {
            client.close(CloseReason::Requested);
        }
    }
}

/// Hooks on the client-facing (server-role) session.
struct DownstreamHandler {
    upstream: Mutex<Option<NetworkSession>>,
}

impl SessionHandler for DownstreamHandler {
    fn on_packet(&self, _session: &NetworkSession, reader: PacketReader) -> Result<()> {
        let upstream = self.upstream.lock().ok().and_then(|slot| slot.clone());
        match upstream {
            Some(server) => forward(&server, reader),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn on_closing(&self, _session: &NetworkSession, _reason: &CloseReason) {
        let upstream = self.upstream.lock().ok().and_then(|mut slot| slot.take());
        if let Some(server) = upstream {
            server.close(CloseReason::Requested);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cipher::AlgorithmRegistry;
    use bytes::Bytes;
    use crate::protocol::handshake::HandshakeTemplate;
    use crate::transport::session::SessionOptions;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct Idle;

    impl SessionHandler for Idle {
        fn on_packet(&self, _session: &NetworkSession, _reader: PacketReader) -> Result<()> {
            Ok(())
        }
    }

    fn context() -> SessionContext {
        SessionContext::new(Arc::new(AlgorithmRegistry::standard([83])))
    }

    async fn tcp_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, peer) = accepted.unwrap();
        (client.unwrap(), server, peer)
    }

    #[tokio::test]
    async fn test_downstream_closed_when_upstream_closed_first() {
        let (mut game_client, accepted, peer) = tcp_pair().await;
        let handler = UpstreamHandler {
            pending_client: Mutex::new(Some((accepted, peer))),
            downstream: Mutex::new(None),
            context: context(),
        };

        // upstream already closed; its on_closing ran against an empty slot
        let (up_local, _up_remote) = tokio::io::duplex(1024);
        let upstream = PendingSession::client(up_local, peer, context())
            .start(Arc::new(Idle))
            .unwrap();
        upstream.close(CloseReason::PeerClosed);

        let info = HandshakeInfo::generate(&HandshakeTemplate::new(83, "1", 8)).unwrap();
        handler.on_handshake(&upstream, &info).unwrap();
        assert!(handler.downstream().is_none());

        let mut seen = Vec::new();
        let eof = tokio::time::timeout(
            Duration::from_secs(5),
            game_client.read_to_end(&mut seen),
        )
        .await;
        assert!(matches!(eof, Ok(Ok(_))), "client connection left open");
    }

    #[tokio::test]
    async fn test_forward_reports_backpressure() {
        // tiny duplex so the target's writer stalls
        let (local, _remote) = tokio::io::duplex(16);
        let ctx = context().with_options(SessionOptions {
            outbound_queue: 1,
            ..SessionOptions::default()
        });
        let template = HandshakeTemplate::new(83, "1", 8);
        let target = PendingSession::server(local, "127.0.0.1:1".parse().unwrap(), &template, ctx)
            .unwrap()
            .start(Arc::new(Idle))
            .unwrap();

        let mut saw_backpressure = false;
        for _ in 0..64 {
            let mut packet = PacketBuilder::with_opcode(0x0010);
            packet.write_zeroes(256);
            match forward(&target, PacketReader::new(packet.finish())) {
                Ok(()) => tokio::task::yield_now().await,
                Err(ProtocolError::Backpressure) => {
                    saw_backpressure = true;
                    break;
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(saw_backpressure);
        target.close(CloseReason::Requested);
    }

    #[tokio::test]
    async fn test_forward_rejects_short_packet() {
        let (local, _remote) = tokio::io::duplex(1024);
        let template = HandshakeTemplate::new(83, "1", 8);
        let target = PendingSession::server(local, "127.0.0.1:1".parse().unwrap(), &template, context())
            .unwrap()
            .start(Arc::new(Idle))
            .unwrap();
        assert!(forward(&target, PacketReader::new(Bytes::from_static(&[0x01]))).is_err());
        target.close(CloseReason::Requested);
    }
}
