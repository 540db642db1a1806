//! # Rolling Cipher
//!
//! Per-packet stream encryption with a 4-byte IV that evolves after every packet.
//!
//! ## Components
//! - **Table / Seed**: immutable shuffle parameters shared by every session of a version
//! - **Shuffle**: pure IV step function
//! - **AES-OFB / Legacy**: the stream transforms applied to payloads
//! - **Algorithm**: closed set of transform kinds and the version registry
//! - **Rolling**: per-direction mutable state, header construction and validation
//!
//! ## Ordering
//! Cipher state is a pure function of the ordered packet sequence. Sessions apply the
//! inbound and outbound ciphers on dedicated tasks so each direction is strictly serial.

pub mod aes_ofb;
pub mod algorithm;
pub mod legacy;
pub mod rolling;
pub mod shuffle;
pub mod table;

pub use algorithm::{AlgorithmRegistry, CipherAlgorithm, TransformKind};
pub use rolling::{
    client_header_version, server_header_version, CipherRole, RollingCipher, HEADER_LEN,
};
pub use shuffle::shuffle;
pub use table::{CipherTable, InitialSeed, Iv, IV_LEN, TABLE_LEN};
