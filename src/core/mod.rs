//! # Core Protocol Components
//!
//! Low-level packet handling: payload encoding and the encrypted stream codec.
//!
//! ## Components
//! - **Builder**: little-endian payload writer with length-prefixed strings
//! - **Reader**: payload cursor with unsafe (error) and safe (fallback) read modes
//! - **Codec**: Tokio codecs that frame, validate and en/decrypt packets over a byte stream
//!
//! ## Wire Format
//! ```text
//! [Header(4)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Headers are checked against the rolling cipher before the length is trusted
//! - Length is bounded by the configured maximum before any allocation
//! - Payloads are only decrypted once complete

pub mod builder;
pub mod codec;
pub mod reader;
