//! Robustness tests for the heartbeat server.
//!
//! Misbehaving peers must only ever cost their own session: the server
//! keeps accepting and other clients keep being pinged.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use rexd::config::{DaemonConfig, SessionConfig};
use rexd::registry::{spawn_default_registry, RegistryHandle};
use rexd::server::HeartbeatServer;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(200);
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

const REGISTER: &[u8] = b"REX REGISTER\r\n\r\n\r\n";
const ACK_LEN: usize = b"REX REGISTER xxxxxx\r\n\r\n\r\n".len();

async fn start_server() -> (SocketAddr, RegistryHandle, CancellationToken) {
    let config = DaemonConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        session: SessionConfig {
            ping_interval: Duration::from_millis(50),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            write_timeout: Duration::from_millis(500),
        },
    };
    let registry = spawn_default_registry();
    let token = CancellationToken::new();
    let server = HeartbeatServer::bind(config, registry.clone(), token.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, registry, token)
}

/// Connects and completes the handshake, returning the raw stream.
async fn registered_stream(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(REGISTER).await.unwrap();
    let mut ack = vec![0u8; ACK_LEN];
    timeout(EVENT_TIMEOUT, stream.read_exact(&mut ack))
        .await
        .unwrap()
        .unwrap();
    assert!(ack.starts_with(b"REX REGISTER "));
    stream
}

/// Reads and discards until EOF or reset.
async fn assert_closed_by_server(stream: &mut TcpStream) {
    let mut buf = [0u8; 256];
    timeout(EVENT_TIMEOUT, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await
    .expect("server closes the connection");
}

async fn wait_for_count(registry: &RegistryHandle, expected: usize) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while registry.count().await != expected {
        assert!(Instant::now() < deadline, "registry never reached {expected}");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_silent_connection_hits_handshake_timeout() {
    let (addr, registry, token) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let started = Instant::now();
    assert_closed_by_server(&mut stream).await;
    assert!(started.elapsed() >= HANDSHAKE_TIMEOUT - Duration::from_millis(20));
    assert_eq!(registry.count().await, 0);

    token.cancel();
}

#[tokio::test]
async fn test_connection_closed_before_handshake() {
    let (addr, registry, token) = start_server().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    drop(stream);

    // Partial frame then EOF: nothing is registered
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"REX REGISTER\r\n").await.unwrap();
    drop(stream);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.count().await, 0);

    // Server still accepts
    let _ok = registered_stream(addr).await;
    wait_for_count(&registry, 1).await;

    token.cancel();
}

#[tokio::test]
async fn test_empty_line_inside_body_closes_session() {
    let (addr, registry, token) = start_server().await;
    let mut stream = registered_stream(addr).await;
    wait_for_count(&registry, 1).await;

    stream
        .write_all(b"REX PONG\r\nline\r\n\r\nstray\r\n\r\n\r\n")
        .await
        .unwrap();

    assert_closed_by_server(&mut stream).await;
    wait_for_count(&registry, 0).await;

    token.cancel();
}

#[tokio::test]
async fn test_oversized_line_closes_session() {
    let (addr, registry, token) = start_server().await;
    let mut stream = registered_stream(addr).await;
    wait_for_count(&registry, 1).await;

    let huge = vec![b'x'; rex_protocol::MAX_LINE_LENGTH + 1024];
    // The server may reset before the whole write lands
    let _ = stream.write_all(&huge).await;

    assert_closed_by_server(&mut stream).await;
    wait_for_count(&registry, 0).await;

    token.cancel();
}

#[tokio::test]
async fn test_invalid_utf8_closes_session() {
    let (addr, registry, token) = start_server().await;
    let mut stream = registered_stream(addr).await;
    wait_for_count(&registry, 1).await;

    stream.write_all(b"REX \xff\xfe\r\n\r\n\r\n").await.unwrap();

    assert_closed_by_server(&mut stream).await;
    wait_for_count(&registry, 0).await;

    token.cancel();
}

#[tokio::test]
async fn test_bad_client_does_not_affect_others() {
    let (addr, registry, token) = start_server().await;

    let mut good = registered_stream(addr).await;
    let mut bad = registered_stream(addr).await;
    wait_for_count(&registry, 2).await;

    bad.write_all(b"REX PING\r\nx\r\n\r\ny\r\n\r\n\r\n")
        .await
        .unwrap();
    assert_closed_by_server(&mut bad).await;
    wait_for_count(&registry, 1).await;

    // The well-behaved client is still pinged
    let mut ping = [0u8; 14];
    timeout(EVENT_TIMEOUT, good.read_exact(&mut ping))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&ping, b"REX PING\r\n\r\n\r\n");

    token.cancel();
}

#[tokio::test]
async fn test_frame_split_across_writes_is_accepted() {
    let (addr, registry, token) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for chunk in [&b"REX REG"[..], b"ISTER\r", b"\n\r\n", b"\r\n"] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        sleep(Duration::from_millis(10)).await;
    }

    let mut ack = vec![0u8; ACK_LEN];
    timeout(EVENT_TIMEOUT, stream.read_exact(&mut ack))
        .await
        .unwrap()
        .unwrap();
    assert!(ack.starts_with(b"REX REGISTER "));
    wait_for_count(&registry, 1).await;

    token.cancel();
}

#[tokio::test]
async fn test_many_sequential_connections() {
    let (addr, registry, token) = start_server().await;

    for _ in 0..20 {
        let stream = registered_stream(addr).await;
        drop(stream);
    }

    wait_for_count(&registry, 0).await;
    let _still_serving = registered_stream(addr).await;
    wait_for_count(&registry, 1).await;

    token.cancel();
}
