#![no_main]

use game_protocol::protocol::handshake::{self, HandshakeInfo};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz handshake parsing
    if let Ok(info) = HandshakeInfo::decode(data.to_vec()) {
        // the streaming framer must agree on where the frame ends
        assert_eq!(handshake::frame_len(data).ok().flatten(), Some(data.len()));
        // Anything that parses must re-encode to the same bytes
        if let Ok(encoded) = info.encode() {
            assert_eq!(encoded.as_ref(), data);
        }
    }
});
