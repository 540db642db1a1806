//! # Transport Layer
//!
//! Sessions, the accept loop and the relay, all over Tokio TCP streams.
//!
//! ## Components
//! - **Session**: per-connection reader/writer tasks around the packet codecs
//! - **Acceptor**: listening socket with a batched accept loop
//! - **Relay**: paired client/server sessions that forward packets between two hops
//!
//! Sessions are generic over `AsyncRead + AsyncWrite`, so tests can drive them over
//! `tokio::io::duplex` instead of real sockets.

pub mod acceptor;
pub mod relay;
pub mod session;

pub use acceptor::SocketAcceptor;
pub use relay::RelayProxy;
pub use session::{
    CloseReason, NetworkSession, PendingSession, SessionContext, SessionHandler, SessionOptions,
    SessionRole, SessionState,
};
