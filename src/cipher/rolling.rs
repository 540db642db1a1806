//! Per-direction rolling cipher state.
//!
//! Each session owns two of these: one for bytes it receives and one for bytes it
//! sends. The IV advances after every packet, so both peers must apply
//! [`RollingCipher::transform`] to exactly the same packets in exactly the same order.
//! A skipped or reordered step desynchronises the direction for good; the only
//! recovery is to drop the connection.
//!
//! ## Header layout
//! ```text
//! a = u16le(iv[2], iv[3]) ^ header_version
//! b = a ^ payload_len
//! header = a.to_le_bytes() ++ b.to_le_bytes()
//! ```
//! Client-sent data carries `version` in the header, server-sent data `!version`.

use zeroize::Zeroize;

use super::algorithm::CipherAlgorithm;
use super::table::{iv_from_slice, Iv, IV_LEN};
use crate::error::{ProtocolError, Result};

/// Size of the obfuscated length header in front of every packet
pub const HEADER_LEN: usize = IV_LEN;

/// Largest payload a 16-bit header can describe
pub const MAX_HEADER_PAYLOAD: usize = u16::MAX as usize;

/// Which way a cipher transforms its payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherRole {
    Encrypt,
    Decrypt,
}

/// Header version used for packets sent by the client
#[inline]
pub const fn client_header_version(version: u16) -> u16 {
    version
}

/// Header version used for packets sent by the server
#[inline]
pub const fn server_header_version(version: u16) -> u16 {
    !version
}

/// Evolving cipher state for one direction of one connection.
pub struct RollingCipher {
    algorithm: CipherAlgorithm,
    iv: Iv,
    header_version: u16,
    role: CipherRole,
}

impl RollingCipher {
    /// # Errors
    /// `InvalidIvLength` unless `iv` is exactly 4 bytes.
    pub fn new(
        algorithm: CipherAlgorithm,
        iv: &[u8],
        header_version: u16,
        role: CipherRole,
    ) -> Result<Self> {
        Ok(Self {
            algorithm,
            iv: iv_from_slice(iv)?,
            header_version,
            role,
        })
    }

    pub fn encryptor(algorithm: CipherAlgorithm, iv: &[u8], header_version: u16) -> Result<Self> {
        Self::new(algorithm, iv, header_version, CipherRole::Encrypt)
    }

    pub fn decryptor(algorithm: CipherAlgorithm, iv: &[u8], header_version: u16) -> Result<Self> {
        Self::new(algorithm, iv, header_version, CipherRole::Decrypt)
    }

    /// Current IV
    pub fn iv(&self) -> Iv {
        self.iv
    }

    pub fn header_version(&self) -> u16 {
        self.header_version
    }

    pub fn role(&self) -> CipherRole {
        self.role
    }

    pub fn algorithm(&self) -> &CipherAlgorithm {
        &self.algorithm
    }

    /// Encrypt or decrypt `payload` in place with the current IV, then advance the IV.
    ///
    /// The buffer is a required `&mut [u8]`; there is no way to pass an absent one:
    ///
    /// ```compile_fail
    /// use game_protocol::cipher::{CipherAlgorithm, RollingCipher, TransformKind};
    ///
    /// let algorithm = CipherAlgorithm::standard(TransformKind::Aes);
    /// let mut cipher = RollingCipher::encryptor(algorithm, &[1, 2, 3, 4], 75).unwrap();
    /// cipher.transform(None);
    /// ```
    pub fn transform(&mut self, payload: &mut [u8]) {
        match self.role {
            CipherRole::Encrypt => self.algorithm.encrypt(&self.iv, payload),
            CipherRole::Decrypt => self.algorithm.decrypt(&self.iv, payload),
        }
        self.iv = self.algorithm.next_iv(&self.iv);
    }

    /// Build the 4-byte header announcing a payload of `len` bytes.
    ///
    /// # Errors
    /// `OversizedPacket` if `len` does not fit in 16 bits.
    pub fn construct_header(&self, len: usize) -> Result<[u8; HEADER_LEN]> {
        let len = u16::try_from(len).map_err(|_| ProtocolError::OversizedPacket(len))?;
        let a = u16::from_le_bytes([self.iv[2], self.iv[3]]) ^ self.header_version;
        let b = a ^ len;

        let [a0, a1] = a.to_le_bytes();
        let [b0, b1] = b.to_le_bytes();
        Ok([a0, a1, b0, b1])
    }

    /// Recover the payload length from a header. Does not check the header.
    #[inline]
    pub fn parse_header(header: &[u8; HEADER_LEN]) -> usize {
        let a = u16::from_le_bytes([header[0], header[1]]);
        let b = u16::from_le_bytes([header[2], header[3]]);
        usize::from(a ^ b)
    }

    /// Whether `header` was produced from this direction's current state.
    #[inline]
    pub fn validate_header(&self, header: &[u8; HEADER_LEN]) -> bool {
        let a = u16::from_le_bytes([header[0], header[1]]);
        a ^ u16::from_le_bytes([self.iv[2], self.iv[3]]) == self.header_version
    }
}

impl Drop for RollingCipher {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for RollingCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingCipher")
            .field("kind", &self.algorithm.kind())
            .field("role", &self.role)
            .field("header_version", &self.header_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cipher::algorithm::TransformKind;
    use crate::cipher::shuffle::shuffle;
    use crate::cipher::table::{DEFAULT_SEED, DEFAULT_TABLE};

    const VERSION: u16 = 75;

    fn pair(kind: TransformKind, iv: Iv) -> (RollingCipher, RollingCipher) {
        let algorithm = CipherAlgorithm::standard(kind);
        let header = client_header_version(VERSION);
        (
            RollingCipher::encryptor(algorithm.clone(), &iv, header).unwrap(),
            RollingCipher::decryptor(algorithm, &iv, header).unwrap(),
        )
    }

    #[test]
    fn test_iv_length_contract() {
        let algorithm = CipherAlgorithm::standard(TransformKind::Aes);
        assert!(matches!(
            RollingCipher::encryptor(algorithm.clone(), &[1, 2, 3], VERSION),
            Err(ProtocolError::InvalidIvLength(3))
        ));
        assert!(matches!(
            RollingCipher::decryptor(algorithm, &[1, 2, 3, 4, 5], VERSION),
            Err(ProtocolError::InvalidIvLength(5))
        ));
    }

    #[test]
    fn test_lockstep_roundtrip() {
        for kind in [TransformKind::Aes, TransformKind::AesWithLegacy] {
            let (mut tx, mut rx) = pair(kind, [0x11, 0x22, 0x33, 0x44]);
            for n in 0..20usize {
                let original: Vec<u8> = (0..n * 37).map(|i| (i ^ n) as u8).collect();
                let mut wire = original.clone();
                tx.transform(&mut wire);
                rx.transform(&mut wire);
                assert_eq!(wire, original);
                assert_eq!(tx.iv(), rx.iv());
            }
        }
    }

    #[test]
    fn test_state_matches_replayed_shuffle() {
        let start = [0x05, 0x06, 0x07, 0x08];
        let (mut tx, _) = pair(TransformKind::Aes, start);
        let mut expected = start;
        for _ in 0..5 {
            tx.transform(&mut [0u8; 3]);
            expected = shuffle(&DEFAULT_TABLE, &DEFAULT_SEED, &expected);
            assert_eq!(tx.iv(), expected);
        }
    }

    #[test]
    fn test_same_plaintext_differs_each_packet() {
        let (mut tx, _) = pair(TransformKind::Aes, [1, 1, 1, 1]);
        let mut first = *b"same";
        let mut second = *b"same";
        tx.transform(&mut first);
        tx.transform(&mut second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_skipped_step_desynchronises() {
        let (mut tx, mut rx) = pair(TransformKind::Aes, [9, 9, 9, 9]);
        let mut dropped = *b"lost";
        tx.transform(&mut dropped);

        let mut next = *b"next";
        tx.transform(&mut next);
        rx.transform(&mut next);
        assert_ne!(&next, b"next");
        assert_ne!(tx.iv(), rx.iv());
    }

    #[test]
    fn test_header_roundtrip() {
        let (tx, rx) = pair(TransformKind::Aes, [0xDE, 0xAD, 0xBE, 0xEF]);
        for len in [0usize, 1, 2, 255, 256, 1456, 1460, 40_000, MAX_HEADER_PAYLOAD] {
            let header = tx.construct_header(len).unwrap();
            assert_eq!(RollingCipher::parse_header(&header), len);
            assert!(rx.validate_header(&header));
        }
    }

    #[test]
    fn test_header_known_layout() {
        let (tx, _) = pair(TransformKind::Aes, [0x00, 0x00, 0x12, 0x34]);
        // a = 0x3412 ^ 0x004B = 0x3459, b = a ^ 0x0010 = 0x3449
        assert_eq!(tx.construct_header(16).unwrap(), [0x59, 0x34, 0x49, 0x34]);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let (tx, _) = pair(TransformKind::Aes, [1, 2, 3, 4]);
        assert!(matches!(
            tx.construct_header(MAX_HEADER_PAYLOAD + 1),
            Err(ProtocolError::OversizedPacket(65536))
        ));
    }

    #[test]
    fn test_validate_header_detects_desync() {
        let (mut tx, rx) = pair(TransformKind::Aes, [0x10, 0x20, 0x30, 0x40]);
        tx.transform(&mut [0u8; 8]);
        let header = tx.construct_header(8).unwrap();
        assert!(!rx.validate_header(&header));
    }

    #[test]
    fn test_validate_header_rejects_wrong_direction() {
        let algorithm = CipherAlgorithm::standard(TransformKind::Aes);
        let iv = [1, 2, 3, 4];
        let server_tx =
            RollingCipher::encryptor(algorithm.clone(), &iv, server_header_version(VERSION))
                .unwrap();
        let server_rx =
            RollingCipher::decryptor(algorithm, &iv, client_header_version(VERSION)).unwrap();
        let header = server_tx.construct_header(10).unwrap();
        assert!(!server_rx.validate_header(&header));
    }
}
