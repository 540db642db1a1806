//! IV shuffle step.
//!
//! Every packet advances a direction's IV through [`shuffle`]. The arithmetic is
//! wrapping 8-bit and the final mix is a 32-bit rotate-left by 3; both must be
//! reproduced exactly to stay compatible with existing clients.

use super::table::{Iv, TABLE_LEN};

/// Derive the next IV from `input_iv`.
///
/// Starts from a copy of `seed` (not `input_iv`) and folds each input byte in order.
/// Pure: identical inputs always produce identical output.
pub fn shuffle(table: &[u8; TABLE_LEN], seed: &Iv, input_iv: &Iv) -> Iv {
    let mut w = *seed;

    for &b in input_iv {
        let t = table[b as usize];

        w[0] = w[0].wrapping_add(table[w[1] as usize].wrapping_sub(b));
        w[1] = w[1].wrapping_sub(w[2] ^ t);
        w[2] ^= table[w[3] as usize].wrapping_add(b);
        w[3] = w[3].wrapping_sub(w[0].wrapping_sub(t));

        w = u32::from_le_bytes(w).rotate_left(3).to_le_bytes();
    }

    w
}
