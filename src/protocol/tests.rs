// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::cipher::{AlgorithmRegistry, CipherAlgorithm, TransformKind};
use crate::core::builder::PacketBuilder;
use crate::core::codec::{InboundFrame, OutboundFrame, PacketDecoder, PacketEncoder};
use crate::error::ProtocolError;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::*;
use crate::transport::session::{PendingSession, SessionContext};

const MAX: usize = u16::MAX as usize;

fn fixed_info(version: u16) -> HandshakeInfo {
    HandshakeInfo {
        version,
        subversion: "1".into(),
        client_iv: [0x46, 0x72, 0x7A, 0x52],
        server_iv: [0x11, 0x22, 0x33, 0x44],
        locale: 8,
    }
}

#[test]
fn test_server_and_client_ciphers_mirror() {
    for version in [75u16, 83, 118, 176] {
        let algorithm = CipherAlgorithm::standard(TransformKind::for_version(version));
        let info = fixed_info(version);
        let mut server = info.server_ciphers(algorithm.clone()).unwrap();
        let mut client = info.client_ciphers(algorithm).unwrap();

        for round in 0..5u8 {
            // client -> server
            let plain = vec![round; 40 + usize::from(round)];
            let mut wire = plain.clone();
            let header = client.encryptor.construct_header(wire.len()).unwrap();
            client.encryptor.transform(&mut wire);
            assert!(server.decryptor.validate_header(&header));
            server.decryptor.transform(&mut wire);
            assert_eq!(wire, plain, "version {version} round {round}");

            // server -> client
            let plain = b"server says hi".to_vec();
            let mut wire = plain.clone();
            let header = server.encryptor.construct_header(wire.len()).unwrap();
            server.encryptor.transform(&mut wire);
            assert!(client.decryptor.validate_header(&header));
            client.decryptor.transform(&mut wire);
            assert_eq!(wire, plain);
        }
    }
}

#[test]
fn test_directions_do_not_cross_validate() {
    let algorithm = CipherAlgorithm::standard(TransformKind::AesWithLegacy);
    let info = fixed_info(83);
    let mut server = info.server_ciphers(algorithm).unwrap();

    // a server-sent header must not validate against the client-sent stream
    let header = server.encryptor.construct_header(10).unwrap();
    assert!(!server.decryptor.validate_header(&header));
}

#[test]
fn test_codec_pair_over_handshake() {
    let registry = Arc::new(AlgorithmRegistry::standard([83]));
    let info = fixed_info(83);
    let server = info.server_ciphers(registry.resolve(83).unwrap()).unwrap();

    let mut server_enc = PacketEncoder::armed(server.encryptor, MAX);
    let mut server_dec = PacketDecoder::active(server.decryptor, MAX);
    let mut client_dec = PacketDecoder::awaiting_handshake(registry, MAX);

    let mut to_client = BytesMut::new();
    server_enc
        .encode(OutboundFrame::Handshake(info.encode().unwrap()), &mut to_client)
        .unwrap();

    let client_enc = match client_dec.decode(&mut to_client).unwrap() {
        Some(InboundFrame::Handshake { info: got, encryptor }) => {
            assert_eq!(got, info);
            encryptor
        }
        other => panic!("expected handshake, got {other:?}"),
    };
    let mut client_enc = PacketEncoder::armed(client_enc, MAX);

    let mut to_server = BytesMut::new();
    client_enc
        .encode(OutboundFrame::Packet(Bytes::from_static(b"login")), &mut to_server)
        .unwrap();
    match server_dec.decode(&mut to_server).unwrap() {
        Some(InboundFrame::Packet(p)) => assert_eq!(p.as_ref(), b"login"),
        other => panic!("expected packet, got {other:?}"),
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

/// Server-role dispatcher session on one end of a duplex; the other end is driven by
/// raw codecs playing the client.
async fn dispatcher_session(
    dispatcher: Arc<Dispatcher>,
) -> (
    FramedRead<tokio::io::ReadHalf<DuplexStream>, PacketDecoder>,
    FramedWrite<tokio::io::WriteHalf<DuplexStream>, PacketEncoder>,
) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let registry = Arc::new(AlgorithmRegistry::standard([83]));
    let context = SessionContext::new(Arc::clone(&registry));
    let template = HandshakeTemplate::new(83, "1", 8);
    PendingSession::server(local, peer(), &template, context)
        .unwrap()
        .start(dispatcher)
        .unwrap();

    let (read_half, write_half) = tokio::io::split(remote);
    let mut reader = FramedRead::new(read_half, PacketDecoder::awaiting_handshake(registry, MAX));
    let encryptor = match reader.next().await {
        Some(Ok(InboundFrame::Handshake { encryptor, .. })) => encryptor,
        other => panic!("expected handshake, got {other:?}"),
    };
    let writer = FramedWrite::new(write_half, PacketEncoder::armed(encryptor, MAX));
    (reader, writer)
}

#[tokio::test]
async fn test_dispatcher_routes_by_opcode() {
    let dispatcher = Arc::new(Dispatcher::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    dispatcher
        .register(0x0001, move |session, reader| {
            let name = reader.read_string()?;
            log.lock().unwrap().push(name.clone());
            let mut reply = PacketBuilder::with_opcode(0x0002);
            reply.write_string(&format!("hello {name}"))?;
            session.write(reply.finish())
        })
        .unwrap();

    let (mut reader, mut writer) = dispatcher_session(Arc::clone(&dispatcher)).await;

    // unknown opcode is ignored, session stays up
    let mut unknown = PacketBuilder::with_opcode(0x7777);
    unknown.write_u32(1);
    writer.send(OutboundFrame::Packet(unknown.finish())).await.unwrap();

    let mut login = PacketBuilder::with_opcode(0x0001);
    login.write_string("maple").unwrap();
    writer.send(OutboundFrame::Packet(login.finish())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .unwrap();
    match reply {
        Some(Ok(InboundFrame::Packet(p))) => {
            let mut r = crate::core::reader::PacketReader::new(p);
            assert_eq!(r.read_u16().unwrap(), 0x0002);
            assert_eq!(r.read_string().unwrap(), "hello maple");
        }
        other => panic!("expected reply, got {other:?}"),
    }
    assert_eq!(*seen.lock().unwrap(), vec!["maple".to_string()]);
}

#[tokio::test]
async fn test_corrupted_header_closes_session() {
    let dispatcher = Arc::new(Dispatcher::new());
    let (mut reader, writer) = dispatcher_session(dispatcher).await;

    let mut raw = writer.into_inner();
    raw.write_all(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00]).await.unwrap();

    // server drops the connection without dispatching anything
    let next = tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .unwrap();
    assert!(next.is_none() || matches!(next, Some(Err(ProtocolError::Io(_)))));
}

#[test]
fn test_duplicate_registration_rejected() {
    let dispatcher = Dispatcher::new();
    dispatcher.register(0x10, |_, _| Ok(())).unwrap();
    assert!(matches!(
        dispatcher.register(0x10, |_, _| Ok(())),
        Err(ProtocolError::DuplicateHandler(0x10))
    ));
    assert!(dispatcher.is_registered(0x10));
    assert!(!dispatcher.is_registered(0x11));
}
