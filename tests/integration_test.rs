//! Integration tests for ObfsTLS
//!
//! Tests the full client-server flow including:
//! - The fake TLS handshake and buffered early data
//! - Record framing under fragmented and coalesced delivery
//! - The async transport adapter over loopback TCP

use bytes::Bytes;
use obfs_tls::config::ObfsConfig;
use obfs_tls::obfuscation::{
    new_obfs, FixedClock, Obfs, ObfsError, ObfsTls, Role, ServerInfo, METHOD_TLS_TICKET_AUTH,
};
use obfs_tls::transport::{relay, ObfsConnection, TransportConfig, TransportError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const NOW: u32 = 1_700_000_000;

fn server_info() -> ServerInfo {
    ObfsConfig {
        password: "integration".to_string(),
        host: "0.0.0.0".to_string(),
        port: 3306,
        ..ObfsConfig::default()
    }
    .server_info()
    .unwrap()
}

fn pair() -> (ObfsTls, ObfsTls) {
    (
        ObfsTls::client(server_info()).with_clock(FixedClock(NOW)),
        ObfsTls::server(server_info()).with_clock(FixedClock(NOW)),
    )
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Feed `wire` to the server in pieces of `step` bytes
fn server_feed(server: &mut ObfsTls, wire: &[u8], step: usize) -> (Vec<u8>, bool) {
    let mut payload = Vec::new();
    let mut needs_reply = false;
    for chunk in wire.chunks(step) {
        let decoded = server.server_decode(chunk).unwrap();
        payload.extend_from_slice(&decoded.payload);
        needs_reply |= decoded.needs_reply;
    }
    (payload, needs_reply)
}

/// Feed `wire` to the client in pieces of `step` bytes
fn client_feed(client: &mut ObfsTls, wire: &[u8], step: usize) -> (Vec<u8>, bool) {
    let mut payload = Vec::new();
    let mut done = false;
    for chunk in wire.chunks(step) {
        let decoded = client.client_decode(chunk).unwrap();
        payload.extend_from_slice(&decoded.payload);
        done |= decoded.handshake_done;
    }
    (payload, done)
}

fn run_scenario(step: usize) {
    let (mut client, mut server) = pair();

    // ClientHello, with the first payload held back
    let hello = client.client_encode(&[1, 2, 3, 4]).unwrap();
    assert_eq!(hello.len(), 575);
    let (payload, needs_reply) = server_feed(&mut server, &hello, step);
    assert!(payload.is_empty());
    assert!(needs_reply);

    // ServerHello flight
    let flight = server.server_encode(&[]).unwrap();
    let (payload, done) = client_feed(&mut client, &flight, step);
    assert!(payload.is_empty());
    assert!(done);

    // Finished plus the buffered payload
    let finish = client.client_encode(&[]).unwrap();
    let (payload, _) = server_feed(&mut server, &finish, step);
    assert_eq!(payload, vec![1, 2, 3, 4]);
    assert!(server.is_established());

    let wire = client.client_encode(&[1, 2]).unwrap();
    assert_eq!(server_feed(&mut server, &wire, step).0, vec![1, 2]);
    let wire = server.server_encode(&[1, 2]).unwrap();
    assert_eq!(client_feed(&mut client, &wire, step).0, vec![1, 2]);

    let big = pattern(4096);
    let wire = client.client_encode(&big).unwrap();
    assert_eq!(server_feed(&mut server, &wire, step).0, big);
    let wire = server.server_encode(&big).unwrap();
    assert_eq!(client_feed(&mut client, &wire, step).0, big);
}

/// End-to-end exchange with every wire buffer delivered whole
#[test]
fn test_scenario_single_shot() {
    run_scenario(usize::MAX);
}

/// End-to-end exchange with every wire buffer delivered one byte at a time
#[test]
fn test_scenario_byte_at_a_time() {
    run_scenario(1);
}

/// Odd fragment sizes that straddle record headers
#[test]
fn test_scenario_uneven_fragments() {
    for step in [3, 5, 7, 1000] {
        run_scenario(step);
    }
}

/// Several encode outputs coalesced into one read
#[test]
fn test_coalesced_records() {
    let (mut client, mut server) = pair();

    let hello = client.client_encode(&[]).unwrap();
    server.server_decode(&hello).unwrap();
    let flight = server.server_encode(&[]).unwrap();
    client.client_decode(&flight).unwrap();

    let mut wire = client.client_encode(b"first").unwrap().to_vec();
    wire.extend_from_slice(&client.client_encode(b"").unwrap());
    wire.extend_from_slice(&client.client_encode(b"second").unwrap());

    let decoded = server.server_decode(&wire).unwrap();
    assert!(decoded.handshake_done);
    assert_eq!(&decoded.payload[..], b"firstsecond");
}

/// Every record on the wire fits the configured chunk size
#[test]
fn test_record_sizes_follow_mss() {
    let info = server_info().with_tcp_mss(600);
    let mut client = ObfsTls::client(info.clone()).with_clock(FixedClock(NOW));
    let mut server = ObfsTls::server(info.clone()).with_clock(FixedClock(NOW));

    let hello = client.client_encode(&[]).unwrap();
    server.server_decode(&hello).unwrap();
    let flight = server.server_encode(&[]).unwrap();
    client.client_decode(&flight).unwrap();
    server.server_decode(&client.client_encode(&[]).unwrap()).unwrap();

    let wire = server.server_encode(&pattern(5000)).unwrap();
    let mut offset = 0;
    while offset < wire.len() {
        assert_eq!(&wire[offset..offset + 3], &[0x17, 0x03, 0x03]);
        let len = u16::from_be_bytes([wire[offset + 3], wire[offset + 4]]) as usize;
        assert!(len <= info.max_chunk_len());
        offset += 5 + len;
    }
    assert_eq!(offset, wire.len());
}

/// A tag made with another key never authenticates
#[test]
fn test_wrong_password_rejected() {
    let mut client = ObfsTls::client(server_info());
    let other = ObfsConfig {
        password: "something else".to_string(),
        ..ObfsConfig::default()
    }
    .server_info()
    .unwrap();
    let mut server = ObfsTls::server(other);

    let hello = client.client_encode(&[]).unwrap();
    assert!(matches!(
        server.server_decode(&hello),
        Err(ObfsError::AuthMismatch)
    ));
}

/// A hello replayed outside the skew window is refused
#[test]
fn test_stale_hello_rejected() {
    let mut client = ObfsTls::client(server_info()).with_clock(FixedClock(NOW));
    let mut server = ObfsTls::server(server_info()).with_clock(FixedClock(NOW + 86_401));

    let hello = client.client_encode(&[]).unwrap();
    assert!(matches!(
        server.server_decode(&hello),
        Err(ObfsError::ReplayOrStale { .. })
    ));
}

/// The factory hands out working trait objects
#[test]
fn test_factory_sessions_interoperate() {
    let mut client: Box<dyn Obfs> =
        new_obfs(METHOD_TLS_TICKET_AUTH, Role::Client, server_info()).unwrap();
    let mut server: Box<dyn Obfs> =
        new_obfs(METHOD_TLS_TICKET_AUTH, Role::Server, server_info()).unwrap();

    let hello = client.client_encode(b"early").unwrap();
    assert!(server.server_decode(&hello).unwrap().needs_reply);
    let flight = server.server_encode(&[]).unwrap();
    assert!(client.client_decode(&flight).unwrap().handshake_done);

    let decoded = server.server_decode(&client.client_encode(&[]).unwrap()).unwrap();
    assert_eq!(decoded.payload, Bytes::from_static(b"early"));
    assert_eq!(client.overhead(), 5);
}

/// Echo through an obfuscated loopback TCP connection
#[tokio::test]
async fn test_loopback_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let obfs = Box::new(ObfsTls::server(server_info()));
        let mut conn = ObfsConnection::accept(stream, obfs, TransportConfig::default())
            .await
            .unwrap();

        let mut total = 0;
        while let Some(data) = conn.recv().await.unwrap() {
            total += data.len();
            conn.send(&data).await.unwrap();
        }
        total
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let obfs = Box::new(ObfsTls::client(server_info()));
    let mut conn = ObfsConnection::connect(stream, obfs, TransportConfig::default())
        .await
        .unwrap();

    let message = pattern(20_000);
    conn.send(&message).await.unwrap();

    let mut echoed = Vec::new();
    while echoed.len() < message.len() {
        let data = conn.recv().await.unwrap().unwrap();
        echoed.extend_from_slice(&data);
    }
    assert_eq!(echoed, message);

    conn.shutdown().await.unwrap();
    assert_eq!(server_handle.await.unwrap(), message.len());
}

/// Probing the server with a plain HTTP request fails the handshake
#[tokio::test]
async fn test_loopback_rejects_probe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let obfs = Box::new(ObfsTls::server(server_info()));
        ObfsConnection::accept(stream, obfs, TransportConfig::default())
            .await
            .map(|_| ())
    });

    let mut probe = TcpStream::connect(addr).await.unwrap();
    probe
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    assert!(matches!(
        server_handle.await.unwrap(),
        Err(TransportError::Obfs(ObfsError::InvalidRecord(_)))
    ));
}

/// Full path: plain client → obfs client relay → obfs server relay → upstream
#[tokio::test]
async fn test_relay_through_both_ends() {
    // Upstream echo service
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = upstream.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    // Obfuscating server
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = server.accept().await.unwrap();
        let obfs = Box::new(ObfsTls::server(server_info()));
        let mut conn = ObfsConnection::accept(stream, obfs, TransportConfig::default())
            .await
            .unwrap();
        let mut target = TcpStream::connect(upstream_addr).await.unwrap();
        relay(&mut conn, &mut target, 4096, Duration::from_secs(10)).await.unwrap();
    });

    // Obfuscating client, fed through an in-memory pipe
    let (mut app, mut local) = tokio::io::duplex(8192);
    tokio::spawn(async move {
        let stream = TcpStream::connect(server_addr).await.unwrap();
        let obfs = Box::new(ObfsTls::client(server_info()));
        let mut conn = ObfsConnection::connect(stream, obfs, TransportConfig::default())
            .await
            .unwrap();
        relay(&mut conn, &mut local, 4096, Duration::from_secs(10)).await.unwrap();
    });

    let message = pattern(10_000);
    app.write_all(&message).await.unwrap();

    let mut echoed = vec![0u8; message.len()];
    app.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, message);
}
