//! # Protocol Layer
//!
//! Connection handshake and opcode dispatch.
//!
//! ## Components
//! - **Handshake**: unencrypted hello carrying the version and both IVs
//! - **Dispatcher**: routes decrypted packets to handlers by their leading `u16` opcode

pub mod dispatcher;
pub mod handshake;

#[cfg(test)]
mod tests;
