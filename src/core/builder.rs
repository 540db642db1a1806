//! Packet payload builder.
//!
//! Append-only little-endian writer. Strings are a `u16` byte length followed by the
//! raw bytes. [`PacketBuilder::finish`] freezes the buffer into an immutable `Bytes`
//! ready for [`NetworkSession::write`](crate::transport::session::NetworkSession::write).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Default capacity for freshly created builders
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    buf: BytesMut,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Start a packet with its opcode already written
    pub fn with_opcode(opcode: u16) -> Self {
        let mut builder = Self::new();
        builder.write_u16(opcode);
        builder
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.buf.put_i8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn write_zeroes(&mut self, count: usize) -> &mut Self {
        self.buf.put_bytes(0, count);
        self
    }

    /// Write a `u16` length-prefixed string.
    ///
    /// # Errors
    /// `OversizedPacket` if the string is longer than `u16::MAX` bytes.
    pub fn write_string(&mut self, value: &str) -> Result<&mut Self> {
        let len =
            u16::try_from(value.len()).map_err(|_| ProtocolError::OversizedPacket(value.len()))?;
        self.write_u16(len);
        Ok(self.write_bytes(value.as_bytes()))
    }

    /// Write `value` into a fixed `width` field, truncating or zero-padding.
    pub fn write_padded_string(&mut self, value: &str, width: usize) -> &mut Self {
        let bytes = value.as_bytes();
        let used = bytes.len().min(width);
        self.write_bytes(&bytes[..used]);
        self.write_zeroes(width - used)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freeze into an immutable payload
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl From<PacketBuilder> for Bytes {
    fn from(builder: PacketBuilder) -> Self {
        builder.finish()
    }
}
