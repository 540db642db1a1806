//! Legacy byte-rotation cipher.
//!
//! Older client builds run this under the AES keystream. It is six passes over the
//! payload, alternating forward and backward, each byte mixed with a running value and
//! the count of bytes left in the pass. Unlike the keystream it is not an involution,
//! so encryption and decryption are separate routines.

const PASSES: usize = 6;

/// Encrypt `data` in place.
pub fn encrypt(data: &mut [u8]) {
    let len = data.len();

    for pass in 0..PASSES {
        let mut remember = 0u8;
        let mut remaining = len as u8;

        if pass % 2 == 0 {
            for byte in data.iter_mut() {
                let mut cur = byte.rotate_left(3);
                cur = cur.wrapping_add(remaining);
                cur ^= remember;
                remember = cur;
                cur = cur.rotate_right(u32::from(remaining) % 8);
                cur = (!cur).wrapping_add(0x48);
                remaining = remaining.wrapping_sub(1);
                *byte = cur;
            }
        } else {
            for byte in data.iter_mut().rev() {
                let mut cur = byte.rotate_left(4);
                cur = cur.wrapping_add(remaining);
                cur ^= remember;
                remember = cur;
                cur ^= 0x13;
                cur = cur.rotate_right(3);
                remaining = remaining.wrapping_sub(1);
                *byte = cur;
            }
        }
    }
}

/// Decrypt `data` in place; inverse of [`encrypt`].
pub fn decrypt(data: &mut [u8]) {
    let len = data.len();

    for pass in 1..=PASSES {
        let mut remember = 0u8;
        let mut remaining = len as u8;

        if pass % 2 == 0 {
            for byte in data.iter_mut() {
                let mut cur = byte.wrapping_sub(0x48);
                cur = !cur;
                cur = cur.rotate_left(u32::from(remaining) % 8);
                let next = cur;
                cur ^= remember;
                remember = next;
                cur = cur.wrapping_sub(remaining);
                cur = cur.rotate_right(3);
                remaining = remaining.wrapping_sub(1);
                *byte = cur;
            }
        } else {
            for byte in data.iter_mut().rev() {
                let mut cur = byte.rotate_left(3);
                cur ^= 0x13;
                let next = cur;
                cur ^= remember;
                remember = next;
                cur = cur.wrapping_sub(remaining);
                cur = cur.rotate_right(4);
                remaining = remaining.wrapping_sub(1);
                *byte = cur;
            }
        }
    }
}
