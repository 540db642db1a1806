//! Connection handshake.
//!
//! The server opens every connection with a single unencrypted packet carrying the
//! protocol version and the two IVs that seed the rolling ciphers:
//!
//! ```text
//! [Magic(2)] [Version(2)] [SubversionLen(2)] [Subversion(N)] [ClientIV(4)] [ServerIV(4)] [Locale(1)]
//! ```
//!
//! `Magic` is `0x0D` when the subversion is empty and `0x0E` otherwise, whatever the
//! subversion's length. The frame is therefore sized from `SubversionLen`, never from the
//! magic. All integers are little-endian.
//!
//! **Per-Session State**
//! Handshake values are generated and parsed per connection and turned straight into the
//! two [`RollingCipher`]s the session owns. Nothing is kept in global state, so
//! concurrent handshakes cannot trample each other.

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::cipher::{
    client_header_version, server_header_version, CipherAlgorithm, Iv, RollingCipher, IV_LEN,
};
use crate::core::builder::PacketBuilder;
use crate::core::reader::PacketReader;
use crate::error::{constants, ProtocolError, Result};

/// Size of the magic prefix
pub const MAGIC_LEN: usize = 2;

/// Magic of a handshake with an empty subversion
pub const MAGIC_NO_SUBVERSION: u16 = 0x0D;

/// Magic of a handshake carrying a subversion
pub const MAGIC_WITH_SUBVERSION: u16 = 0x0E;

/// Bytes needed before the subversion length is known
pub const PREFIX_LEN: usize = MAGIC_LEN + 2 + 2;

/// Body length with an empty subversion
pub const MIN_BODY_LEN: usize = 2 + 2 + IV_LEN + IV_LEN + 1;

/// Longest subversion accepted from a peer
pub const MAX_SUBVERSION_LEN: usize = 32;

/// Values negotiated once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub version: u16,
    pub subversion: String,
    pub client_iv: Iv,
    pub server_iv: Iv,
    pub locale: u8,
}

/// Server-side handshake settings; IVs are filled in per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeTemplate {
    pub version: u16,
    pub subversion: String,
    pub locale: u8,
}

/// The two cipher directions of one endpoint.
#[derive(Debug)]
pub struct SessionCiphers {
    /// Applied to everything this endpoint receives
    pub decryptor: RollingCipher,
    /// Applied to everything this endpoint sends
    pub encryptor: RollingCipher,
}

/// Magic a handshake must carry for a subversion of `subversion_len` bytes.
pub fn expected_magic(subversion_len: usize) -> u16 {
    if subversion_len == 0 {
        MAGIC_NO_SUBVERSION
    } else {
        MAGIC_WITH_SUBVERSION
    }
}

/// Total length of the handshake frame at the front of `buf`, once enough of it has
/// arrived to tell. `Ok(None)` means more bytes are needed.
///
/// # Errors
/// `HandshakeError` for an unknown magic, a magic that disagrees with the subversion
/// length, or a subversion longer than [`MAX_SUBVERSION_LEN`].
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < MAGIC_LEN {
        return Ok(None);
    }
    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != MAGIC_NO_SUBVERSION && magic != MAGIC_WITH_SUBVERSION {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_MAGIC.into(),
        ));
    }
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let subversion_len = usize::from(u16::from_le_bytes([buf[4], buf[5]]));
    if subversion_len > MAX_SUBVERSION_LEN {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_TOO_LARGE.into(),
        ));
    }
    if magic != expected_magic(subversion_len) {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_MAGIC.into(),
        ));
    }
    Ok(Some(MAGIC_LEN + MIN_BODY_LEN + subversion_len))
}

/// Generate a fresh IV from the OS random source.
pub fn generate_iv() -> Result<Iv> {
    let mut iv = [0u8; IV_LEN];
    getrandom::fill(&mut iv)
        .map_err(|e| ProtocolError::HandshakeError(format!("IV generation failed: {e}")))?;
    Ok(iv)
}

impl HandshakeInfo {
    /// Build the handshake for a newly accepted connection with random IVs.
    #[instrument(skip(template), fields(version = template.version))]
    pub fn generate(template: &HandshakeTemplate) -> Result<Self> {
        if template.subversion.len() > MAX_SUBVERSION_LEN {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_SUBVERSION.into(),
            ));
        }

        let info = Self {
            version: template.version,
            subversion: template.subversion.clone(),
            client_iv: generate_iv()?,
            server_iv: generate_iv()?,
            locale: template.locale,
        };

        debug!("Generated handshake");
        Ok(info)
    }

    /// Length of the body following the magic
    pub fn body_len(&self) -> usize {
        MIN_BODY_LEN + self.subversion.len()
    }

    /// Leading `u16`: `0x0D` without a subversion, `0x0E` with one
    pub fn header_magic(&self) -> u16 {
        expected_magic(self.subversion.len())
    }

    /// Serialize the full unencrypted handshake packet.
    ///
    /// # Errors
    /// `HandshakeError` if the subversion is longer than [`MAX_SUBVERSION_LEN`].
    pub fn encode(&self) -> Result<Bytes> {
        if self.subversion.len() > MAX_SUBVERSION_LEN {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_SUBVERSION.into(),
            ));
        }

        let mut builder = PacketBuilder::with_capacity(MAGIC_LEN + self.body_len());
        builder.write_u16(self.header_magic()).write_u16(self.version);
        builder.write_string(&self.subversion)?;
        builder
            .write_bytes(&self.client_iv)
            .write_bytes(&self.server_iv)
            .write_u8(self.locale);
        Ok(builder.finish())
    }

    /// Parse a complete handshake packet (magic included).
    ///
    /// Parsing runs in safe mode: any truncation or malformed field is reported as a
    /// single `HandshakeError`, as is a magic that disagrees with the subversion or
    /// trailing bytes after the locale.
    pub fn decode(frame: impl Into<Bytes>) -> Result<Self> {
        let mut reader = PacketReader::new(frame);

        let parsed = reader.try_safe(|r| {
            let magic = r.read_u16()?;
            let info = HandshakeInfo {
                version: r.read_u16()?,
                subversion: r.read_string()?,
                client_iv: r.read_array()?,
                server_iv: r.read_array()?,
                locale: r.read_u8()?,
            };
            Ok((magic, info))
        });

        let (magic, info) = parsed.ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_HANDSHAKE_TRUNCATED.into())
        })?;

        if magic != expected_magic(info.subversion.len()) || reader.remaining() != 0 {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_MAGIC.into(),
            ));
        }

        if info.subversion.len() > MAX_SUBVERSION_LEN {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_SUBVERSION.into(),
            ));
        }

        Ok(info)
    }

    /// Ciphers for the server end: receives with the client IV, sends with the server IV.
    pub fn server_ciphers(&self, algorithm: CipherAlgorithm) -> Result<SessionCiphers> {
        Ok(SessionCiphers {
            decryptor: RollingCipher::decryptor(
                algorithm.clone(),
                &self.client_iv,
                client_header_version(self.version),
            )?,
            encryptor: RollingCipher::encryptor(
                algorithm,
                &self.server_iv,
                server_header_version(self.version),
            )?,
        })
    }

    /// Ciphers for the client end: receives with the server IV, sends with the client IV.
    pub fn client_ciphers(&self, algorithm: CipherAlgorithm) -> Result<SessionCiphers> {
        Ok(SessionCiphers {
            decryptor: RollingCipher::decryptor(
                algorithm.clone(),
                &self.server_iv,
                server_header_version(self.version),
            )?,
            encryptor: RollingCipher::encryptor(
                algorithm,
                &self.client_iv,
                client_header_version(self.version),
            )?,
        })
    }
}

impl HandshakeTemplate {
    pub fn new(version: u16, subversion: impl Into<String>, locale: u8) -> Self {
        Self {
            version,
            subversion: subversion.into(),
            locale,
        }
    }
}

impl From<&HandshakeInfo> for HandshakeTemplate {
    fn from(info: &HandshakeInfo) -> Self {
        Self::new(info.version, info.subversion.clone(), info.locale)
    }
}
