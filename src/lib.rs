//! # Game Protocol
//!
//! Wire protocol, packet codec and async session layer for game server emulators that
//! speak the rolling-IV encrypted TCP protocol.
//!
//! Every connection starts with an unencrypted handshake from the server carrying the
//! protocol version and two 4-byte IVs. After that each packet is
//! `[Header(4)] [Encrypted Payload(N)]`, where the header both encodes the payload length
//! and proves the sender's cipher is in step with ours. After every packet the IV of that
//! direction is shuffled forward, so a single dropped or reordered packet desynchronizes
//! the stream and is detected at the next header.
//!
//! ## Layers
//! - [`cipher`]: shuffle, stream transforms, per-direction rolling state
//! - [`core`]: payload builder/reader and the Tokio codecs
//! - [`protocol`]: handshake and opcode dispatch
//! - [`transport`]: sessions, accept loop, relay
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use game_protocol::config::NetworkConfig;
//! use game_protocol::protocol::dispatcher::Dispatcher;
//! use game_protocol::transport::{PendingSession, SessionContext, SocketAcceptor};
//!
//! # async fn run() -> game_protocol::Result<()> {
//! let config = NetworkConfig::default();
//! game_protocol::utils::logging::init(&config.logging)?;
//!
//! let dispatcher = Arc::new(Dispatcher::new());
//! dispatcher.register(0x0001, |session, reader| {
//!     let name = reader.read_string()?;
//!     tracing::info!(id = session.id(), name, "Login");
//!     Ok(())
//! })?;
//!
//! let context = SessionContext::from_config(&config);
//! let template = config.protocol.handshake_template();
//! let acceptor = SocketAcceptor::bind(config.server.address.as_str()).await?;
//! acceptor.start(
//!     move |stream, peer| {
//!         let started = PendingSession::server(stream, peer, &template, context.clone())
//!             .and_then(|pending| pending.start(dispatcher.clone()));
//!         if let Err(e) = started {
//!             tracing::warn!(%peer, error = %e, "Session failed to start");
//!         }
//!     },
//!     |e| tracing::warn!(error = %e, "Accept error"),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
