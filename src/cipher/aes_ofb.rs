//! AES-256 output-feedback keystream.
//!
//! The 16-byte feedback register is the 4-byte IV repeated four times. It is reset at
//! the start of every chunk: the first chunk of a payload is 1456 bytes, every later
//! chunk 1460 bytes. Encryption and decryption are the same XOR.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;

use super::table::Iv;

/// Fixed user key baked into every supported client build.
pub const DEFAULT_AES_KEY: [u8; 32] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00, 0x00,
    0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00, 0x00,
];

const BLOCK_SIZE: usize = 16;
const FIRST_CHUNK_LEN: usize = 1456;
const CHUNK_LEN: usize = 1460;

/// Expanded AES key schedule; immutable and shareable across sessions.
#[derive(Clone)]
pub struct AesOfb {
    cipher: Aes256,
}

impl AesOfb {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key)),
        }
    }

    /// XOR the keystream derived from `iv` into `data` in place.
    pub fn apply(&self, iv: &Iv, data: &mut [u8]) {
        let mut start = 0;
        let mut chunk_len = FIRST_CHUNK_LEN;

        while start < data.len() {
            let end = usize::min(start + chunk_len, data.len());
            let mut register = GenericArray::clone_from_slice(&expand_iv(iv));

            for (i, byte) in data[start..end].iter_mut().enumerate() {
                let offset = i % BLOCK_SIZE;
                if offset == 0 {
                    self.cipher.encrypt_block(&mut register);
                }
                *byte ^= register[offset];
            }

            start = end;
            chunk_len = CHUNK_LEN;
        }
    }
}

impl Default for AesOfb {
    fn default() -> Self {
        Self::new(&DEFAULT_AES_KEY)
    }
}

impl std::fmt::Debug for AesOfb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesOfb { .. }")
    }
}

#[inline]
fn expand_iv(iv: &Iv) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    for chunk in block.chunks_exact_mut(iv.len()) {
        chunk.copy_from_slice(iv);
    }
    block
}
