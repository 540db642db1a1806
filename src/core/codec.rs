//! Streaming codecs for the encrypted wire format.
//!
//! [`PacketDecoder`] reassembles the inbound TCP byte stream: it waits for the 4-byte
//! header, validates it against the inbound cipher, waits for the whole payload and only
//! then decrypts it. A session in the client role starts the decoder in handshake mode,
//! where it buffers exactly one unencrypted handshake frame and arms itself from it.
//!
//! [`PacketEncoder`] does the reverse for the outbound direction: build the header from
//! the current outbound IV, then encrypt the payload (which advances the IV).
//!
//! ## Wire Format
//! ```text
//! [Header(4)] [Encrypted Payload(N)]
//! ```

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::cipher::{AlgorithmRegistry, RollingCipher, HEADER_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{self, HandshakeInfo, PREFIX_LEN};

/// Frames produced by [`PacketDecoder`]
#[derive(Debug)]
pub enum InboundFrame {
    /// Handshake received from the server, with the cipher for our outbound direction
    Handshake {
        info: HandshakeInfo,
        encryptor: RollingCipher,
    },
    /// Decrypted packet payload
    Packet(Bytes),
}

/// Frames accepted by [`PacketEncoder`]
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Pre-encoded handshake, written as-is
    Handshake(Bytes),
    /// Plaintext payload to encrypt and frame
    Packet(Bytes),
}

enum DecoderState {
    AwaitingHandshake(Arc<AlgorithmRegistry>),
    Active(RollingCipher),
}

/// Inbound reassembly and decryption.
pub struct PacketDecoder {
    state: DecoderState,
    max_payload: usize,
}

impl PacketDecoder {
    /// Decoder for a client-role session; the first frame must be the handshake.
    pub fn awaiting_handshake(registry: Arc<AlgorithmRegistry>, max_payload: usize) -> Self {
        Self {
            state: DecoderState::AwaitingHandshake(registry),
            max_payload,
        }
    }

    /// Decoder for a session whose inbound cipher is already known.
    pub fn active(decryptor: RollingCipher, max_payload: usize) -> Self {
        Self {
            state: DecoderState::Active(decryptor),
            max_payload,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DecoderState::Active(_))
    }

    fn decode_handshake(
        &mut self,
        registry: &AlgorithmRegistry,
        src: &mut BytesMut,
    ) -> Result<Option<InboundFrame>> {
        let frame_len = match handshake::frame_len(&src[..]) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(prefix = ?&src[..src.len().min(PREFIX_LEN)], "Rejecting malformed handshake");
                return Err(e);
            }
        };
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let info = HandshakeInfo::decode(src.split_to(frame_len).freeze())?;
        let algorithm = registry.resolve(info.version)?;
        let ciphers = info.client_ciphers(algorithm)?;

        debug!(
            version = info.version,
            subversion = %info.subversion,
            locale = info.locale,
            "Handshake decoded"
        );

        self.state = DecoderState::Active(ciphers.decryptor);
        Ok(Some(InboundFrame::Handshake {
            info,
            encryptor: ciphers.encryptor,
        }))
    }
}

impl Decoder for PacketDecoder {
    type Item = InboundFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let cipher = match &mut self.state {
            DecoderState::AwaitingHandshake(registry) => {
                let registry = Arc::clone(registry);
                return self.decode_handshake(&registry, src);
            }
            DecoderState::Active(cipher) => cipher,
        };

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = [src[0], src[1], src[2], src[3]];
        if !cipher.validate_header(&header) {
            warn!(header = ?header, "Header does not match inbound cipher state");
            return Err(ProtocolError::InvalidHeader);
        }

        let len = RollingCipher::parse_header(&header);
        if len > self.max_payload {
            return Err(ProtocolError::OversizedPacket(len));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut payload = src.split_to(len);
        cipher.transform(&mut payload);
        trace!(len, "Decoded packet");

        Ok(Some(InboundFrame::Packet(payload.freeze())))
    }
}

/// Outbound encryption and framing.
pub struct PacketEncoder {
    cipher: Option<RollingCipher>,
    max_payload: usize,
}

impl PacketEncoder {
    /// Encoder with no cipher yet; only handshake frames can be written until
    /// [`arm`](Self::arm) is called.
    pub fn unarmed(max_payload: usize) -> Self {
        Self {
            cipher: None,
            max_payload,
        }
    }

    pub fn armed(encryptor: RollingCipher, max_payload: usize) -> Self {
        Self {
            cipher: Some(encryptor),
            max_payload,
        }
    }

    pub fn arm(&mut self, encryptor: RollingCipher) {
        self.cipher = Some(encryptor);
    }

    pub fn is_armed(&self) -> bool {
        self.cipher.is_some()
    }
}

impl Encoder<OutboundFrame> for PacketEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<()> {
        match item {
            OutboundFrame::Handshake(bytes) => {
                dst.extend_from_slice(&bytes);
                Ok(())
            }
            OutboundFrame::Packet(payload) => {
                let cipher = self.cipher.as_mut().ok_or_else(|| {
                    ProtocolError::Custom(constants::ERR_ENCODER_NOT_ARMED.into())
                })?;

                if payload.len() > self.max_payload {
                    return Err(ProtocolError::OversizedPacket(payload.len()));
                }

                // header must come from the IV before transform advances it
                let header = cipher.construct_header(payload.len())?;
                dst.reserve(HEADER_LEN + payload.len());
                dst.put_slice(&header);

                let start = dst.len();
                dst.put_slice(&payload);
                cipher.transform(&mut dst[start..]);
                Ok(())
            }
        }
    }
}
