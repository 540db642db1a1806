#![no_main]

use std::sync::Arc;

use bytes::BytesMut;
use game_protocol::cipher::AlgorithmRegistry;
use game_protocol::core::codec::PacketDecoder;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Client-side decoder fed an arbitrary stream: handshake first, then packets
    let registry = Arc::new(AlgorithmRegistry::standard([62, 83, 118]));
    let mut decoder = PacketDecoder::awaiting_handshake(registry, u16::MAX as usize);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = decoder.decode(&mut buf) {}
});
