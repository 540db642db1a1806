//! # Error Types
//!
//! Comprehensive error handling for the game protocol.
//!
//! This module defines all error variants that can occur during protocol operations,
//! from low-level I/O errors to cipher desynchronization and contract violations.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and file system failures
//! - **Protocol Errors**: Invalid headers, oversized frames, malformed handshakes
//! - **Read Errors**: Buffer underruns and malformed strings in packet payloads
//! - **Contract Violations**: Wrong table/IV sizes, double starts, duplicate handlers
//! - **Session Errors**: Writes on closed or not-yet-active sessions, backpressure
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use game_protocol::core::reader::PacketReader;
//! use game_protocol::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn read_name(bytes: &'static [u8]) -> Result<String> {
//!     let mut reader = PacketReader::new(bytes);
//!     reader.read_string()
//! }
//!
//! match read_name(&[0x03]) {
//!     Ok(name) => info!(name, "Read name"),
//!     Err(ProtocolError::ReadUnderrun { needed, remaining }) => {
//!         error!(needed, remaining, "Truncated packet")
//!     }
//!     Err(e) => error!(error = %e, "Unexpected failure"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Acceptor-related error messages
    pub const ERR_ACCEPTOR_LOCK: &str = "Failed to acquire lock on acceptor state";

    /// Handshake-specific errors
    pub const ERR_HANDSHAKE_TRUNCATED: &str = "Handshake packet truncated or malformed";
    pub const ERR_HANDSHAKE_MAGIC: &str = "Handshake magic does not match subversion";
    pub const ERR_HANDSHAKE_TOO_LARGE: &str = "Handshake body exceeds maximum size";
    pub const ERR_HANDSHAKE_SUBVERSION: &str = "Handshake subversion too long";

    /// Session errors
    pub const ERR_SESSION_QUEUE_CLOSED: &str = "Session outbound queue closed";
    pub const ERR_ENCODER_NOT_ARMED: &str = "Outbound cipher not initialised before first packet";
    pub const ERR_RELAY_SHORT_PACKET: &str = "Relayed packet shorter than an opcode";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Cipher table must be exactly 256 bytes, got {0}")]
    InvalidTableLength(usize),

    #[error("IV must be exactly 4 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Read past end of packet: needed {needed} bytes, {remaining} remaining")]
    ReadUnderrun { needed: usize, remaining: usize },

    #[error("Malformed string in packet")]
    InvalidString,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("Handler already registered for opcode 0x{0:04X}")]
    DuplicateHandler(u16),

    #[error("Cipher algorithm already registered for version {0}")]
    DuplicateVersion(u16),

    #[error("Session is not active")]
    NotActive,

    #[error("Outbound queue is full")]
    Backpressure,

    #[error("Already started")]
    AlreadyStarted,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Handshake not completed in time")]
    HandshakeTimeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error means the cipher stream or framing can no longer be trusted.
    pub fn is_protocol_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidHeader
                | ProtocolError::OversizedPacket(_)
                | ProtocolError::HandshakeError(_)
                | ProtocolError::UnsupportedVersion(_)
                | ProtocolError::HandshakeTimeout
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
