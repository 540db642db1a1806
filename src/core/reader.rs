//! Packet payload reader.
//!
//! Sequential little-endian cursor over a decoded payload. Reads come in two modes:
//!
//! - **Unsafe**: every `read_*` returns an error as soon as the payload runs short or a
//!   string is malformed. Use it where the bounds are already trusted, or where the
//!   caller propagates with `?`.
//! - **Safe**: [`PacketReader::safe`] runs a block of unsafe reads and, if any of them
//!   fails, rewinds the cursor and returns a caller-supplied fallback instead. Use it for
//!   anything parsed straight from the peer.
//!
//! ```rust
//! use game_protocol::core::reader::PacketReader;
//!
//! let mut reader = PacketReader::new(vec![0x05u8]);
//! let name = reader.safe(|r| r.read_string(), String::from("unknown"));
//! assert_eq!(name, "unknown");
//! assert_eq!(reader.position(), 0);
//! ```

use bytes::Bytes;

use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone)]
pub struct PacketReader {
    data: Bytes,
    pos: usize,
}

impl PacketReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Cursor offset from the start of the payload
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Total payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole payload, ignoring the cursor
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ProtocolError::ReadUnderrun { needed, remaining });
        }
        Ok(())
    }

    /// Read a fixed-size byte array (IVs, MAC addresses, ...)
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Look at the next `u16` without moving the cursor
    pub fn peek_u16(&self) -> Result<u16> {
        self.ensure(2)?;
        Ok(u16::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
        ]))
    }

    /// Read `count` raw bytes without copying
    pub fn read_bytes(&mut self, count: usize) -> Result<Bytes> {
        self.ensure(count)?;
        let out = self.data.slice(self.pos..self.pos + count);
        self.pos += count;
        Ok(out)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.ensure(count)?;
        self.pos += count;
        Ok(())
    }

    /// Read a `u16` length-prefixed string.
    ///
    /// # Errors
    /// `ReadUnderrun` if the prefix or body is truncated, `InvalidString` if the body is
    /// not valid UTF-8. The cursor is not rewound on error; wrap in [`safe`](Self::safe)
    /// for that.
    pub fn read_string(&mut self) -> Result<String> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidString)
    }

    /// Read a fixed-width, zero-padded string.
    pub fn read_padded_string(&mut self, width: usize) -> Result<String> {
        let bytes = self.read_bytes(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..end].to_vec()).map_err(|_| ProtocolError::InvalidString)
    }

    /// Drain everything from the cursor to the end.
    pub fn read_remaining(&mut self) -> Bytes {
        let out = self.data.slice(self.pos..);
        self.pos = self.data.len();
        out
    }

    /// Run a block of reads; on any failure rewind and return `fallback`.
    pub fn safe<T, F>(&mut self, f: F, fallback: T) -> T
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.try_safe(f).unwrap_or(fallback)
    }

    /// Run a block of reads; on any failure rewind and return `None`.
    pub fn try_safe<T, F>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let start = self.pos;
        match f(self) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::trace!(error = %e, offset = start, "Safe read fell back");
                self.pos = start;
                None
            }
        }
    }
}
