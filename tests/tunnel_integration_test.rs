//! Integration tests for the tunnel data plane
//!
//! The session engines are driven over loopback UDP with channel-backed
//! virtual adapters: the channel the engine reads "adapter" packets from is
//! fed by the test, and the channel it writes inbound payloads to is
//! observed by the test. Scenarios covered:
//!
//! 1. Session registration and endpoint update on NAT rebind
//! 2. Inbound DATA delivery to the adapter
//! 3. Fan-out broadcast with per-session ids and distinct nonces
//! 4. Malformed datagrams are dropped without killing the server
//! 5. Reaping of idle sessions
//! 6. Client engine keep-alive, upstream and downstream data paths
//! 7. Cancellation stops all workers

use omail::client::Engine as ClientEngine;
use omail::codec::{Packet, PacketType};
use omail::crypto::TunnelCipher;
use omail::server::{Engine as ServerEngine, SessionTable};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn test_cipher() -> Arc<TunnelCipher> {
    Arc::new(TunnelCipher::from_password("integration-test"))
}

/// Builds a minimal IPv4 packet with destination 10.0.0.2
fn ipv4_packet(len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; len.max(20)];
    packet[0] = 0x45;
    packet[16..20].copy_from_slice(&[10, 0, 0, 2]);
    packet
}

/// Seals and sends one frame to the server
async fn send_packet(socket: &UdpSocket, cipher: &TunnelCipher, packet: Packet, dst: SocketAddr) {
    let datagram = cipher.seal(&packet.encode().expect("encode")).expect("seal");
    socket.send_to(&datagram, dst).await.expect("send");
}

/// Receives one datagram and returns the decoded frame plus the raw bytes
async fn recv_packet(socket: &UdpSocket, cipher: &TunnelCipher) -> (Packet, Vec<u8>) {
    let mut buf = vec![0u8; 2048];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .expect("recv");
    buf.truncate(len);
    let plaintext = cipher.open(&buf).expect("open");
    (Packet::decode(&plaintext).expect("decode"), buf)
}

struct TestServer {
    addr: SocketAddr,
    sessions: Arc<SessionTable>,
    /// Pretend-adapter input: packets the server believes it read from TUN
    inject_tx: mpsc::Sender<Vec<u8>>,
    /// Pretend-adapter output: payloads the server would write to TUN
    deliver_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

async fn spawn_server(
    cipher: Arc<TunnelCipher>,
    idle_ttl: Duration,
    reaper_period: Option<Duration>,
) -> TestServer {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind"));
    let addr = socket.local_addr().expect("local addr");
    let sessions = Arc::new(SessionTable::new(idle_ttl));
    let cancel = CancellationToken::new();

    let engine = ServerEngine::new(socket, cipher, sessions.clone(), cancel.clone());

    let (inject_tx, inject_rx) = mpsc::channel(64);
    let (deliver_tx, deliver_rx) = mpsc::channel(64);

    let mut workers = vec![
        engine.spawn_udp_reader(deliver_tx),
        engine.spawn_fanout(inject_rx),
    ];
    if let Some(period) = reaper_period {
        workers.push(engine.spawn_reaper(period));
    }

    TestServer {
        addr,
        sessions,
        inject_tx,
        deliver_rx,
        cancel,
        workers,
    }
}

/// Polls until the session exists with the expected remote endpoint
async fn wait_for_session(sessions: &SessionTable, id: u32, remote: SocketAddr) {
    timeout(Duration::from_secs(2), async {
        loop {
            if let Some(session) = sessions.get(id) {
                if session.remote() == remote {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not registered in time");
}

#[tokio::test]
async fn keepalive_registers_session_and_tracks_endpoint() {
    let cipher = test_cipher();
    let server = spawn_server(cipher.clone(), Duration::from_secs(60), None).await;

    let c1 = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    send_packet(&c1, &cipher, Packet::keepalive(1), server.addr).await;
    wait_for_session(&server.sessions, 1, c1.local_addr().unwrap()).await;
    assert_eq!(server.sessions.len(), 1);

    // same session id from a different endpoint: the table follows the move
    let c2 = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    send_packet(&c2, &cipher, Packet::keepalive(1), server.addr).await;
    wait_for_session(&server.sessions, 1, c2.local_addr().unwrap()).await;
    assert_eq!(server.sessions.len(), 1);
}

#[tokio::test]
async fn data_reaches_adapter_and_registers_session() {
    let cipher = test_cipher();
    let mut server = spawn_server(cipher.clone(), Duration::from_secs(60), None).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let payload = ipv4_packet(64);
    send_packet(&client, &cipher, Packet::data(7, payload.clone()), server.addr).await;

    let delivered = timeout(Duration::from_secs(2), server.deliver_rx.recv())
        .await
        .expect("timed out waiting for adapter write")
        .expect("channel closed");
    assert_eq!(delivered, payload);

    // a DATA frame registers the session just like a keep-alive
    wait_for_session(&server.sessions, 7, client.local_addr().unwrap()).await;
}

#[tokio::test]
async fn fanout_broadcasts_with_per_session_ids() {
    let cipher = test_cipher();
    let server = spawn_server(cipher.clone(), Duration::from_secs(60), None).await;

    let c1 = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let c2 = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    send_packet(&c1, &cipher, Packet::keepalive(0x0101), server.addr).await;
    send_packet(&c2, &cipher, Packet::keepalive(0x0202), server.addr).await;
    wait_for_session(&server.sessions, 0x0101, c1.local_addr().unwrap()).await;
    wait_for_session(&server.sessions, 0x0202, c2.local_addr().unwrap()).await;

    let packet = ipv4_packet(100);
    server.inject_tx.send(packet.clone()).await.expect("inject");

    // each client receives the packet wrapped with its own session id
    let (pkt1, raw1) = recv_packet(&c1, &cipher).await;
    assert_eq!(pkt1.kind, PacketType::Data);
    assert_eq!(pkt1.session_id, 0x0101);
    assert_eq!(pkt1.payload, packet);

    let (pkt2, raw2) = recv_packet(&c2, &cipher).await;
    assert_eq!(pkt2.kind, PacketType::Data);
    assert_eq!(pkt2.session_id, 0x0202);
    assert_eq!(pkt2.payload, packet);

    // independently drawn nonces
    assert_ne!(raw1[..12], raw2[..12]);
}

#[tokio::test]
async fn malformed_datagrams_are_dropped() {
    let cipher = test_cipher();
    let mut server = spawn_server(cipher.clone(), Duration::from_secs(60), None).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind");

    // not even a nonce
    client.send_to(&[0x01, 0x02], server.addr).await.expect("send");
    // random garbage that fails authentication
    client.send_to(&[0xAA; 64], server.addr).await.expect("send");
    // valid AEAD layer around an undecodable frame
    let datagram = cipher.seal(&[0x01, 0x00]).expect("seal");
    client.send_to(&datagram, server.addr).await.expect("send");

    // the reader is still alive and nothing reached the adapter
    send_packet(&client, &cipher, Packet::keepalive(3), server.addr).await;
    wait_for_session(&server.sessions, 3, client.local_addr().unwrap()).await;
    assert!(
        timeout(Duration::from_millis(200), server.deliver_rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn idle_sessions_are_reaped() {
    let cipher = test_cipher();
    let server = spawn_server(
        cipher.clone(),
        Duration::from_millis(300),
        Some(Duration::from_millis(100)),
    )
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    send_packet(&client, &cipher, Packet::keepalive(9), server.addr).await;
    wait_for_session(&server.sessions, 9, client.local_addr().unwrap()).await;

    // never refreshed: gone after ttl + one reaper period
    timeout(Duration::from_secs(2), async {
        while server.sessions.get(9).is_some() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session was not reaped in time");
}

#[tokio::test]
async fn client_engine_data_plane() {
    let cipher = test_cipher();

    // a bare socket stands in for the server
    let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let server_addr = server.local_addr().unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    socket.connect(server_addr).await.expect("connect");
    let client_addr = socket.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let engine = ClientEngine::new(Arc::new(socket), cipher.clone(), 0xDEADBEEF, cancel.clone());

    // registration keep-alive
    engine.send_keepalive().await.expect("keepalive");
    let (pkt, _) = recv_packet(&server, &cipher).await;
    assert_eq!(pkt.kind, PacketType::KeepAlive);
    assert_eq!(pkt.session_id, 0xDEADBEEF);
    assert!(pkt.payload.is_empty());

    let (va_in_tx, va_in_rx) = mpsc::channel(64);
    let (va_out_tx, mut va_out_rx) = mpsc::channel(64);
    let workers = vec![
        engine.spawn_va_to_udp(va_in_rx),
        engine.spawn_udp_to_va(va_out_tx),
    ];

    // adapter → server
    let upstream = ipv4_packet(80);
    va_in_tx.send(upstream.clone()).await.expect("send");
    let (pkt, _) = recv_packet(&server, &cipher).await;
    assert_eq!(pkt.kind, PacketType::Data);
    assert_eq!(pkt.session_id, 0xDEADBEEF);
    assert_eq!(pkt.payload, upstream);

    // server → adapter
    let downstream = ipv4_packet(120);
    let datagram = cipher
        .seal(&Packet::data(0xDEADBEEF, downstream.clone()).encode().unwrap())
        .expect("seal");
    server.send_to(&datagram, client_addr).await.expect("send");
    let delivered = timeout(Duration::from_secs(2), va_out_rx.recv())
        .await
        .expect("timed out waiting for adapter write")
        .expect("channel closed");
    assert_eq!(delivered, downstream);

    // keep-alive echoes never reach the adapter
    let datagram = cipher
        .seal(&Packet::keepalive(0xDEADBEEF).encode().unwrap())
        .expect("seal");
    server.send_to(&datagram, client_addr).await.expect("send");
    assert!(
        timeout(Duration::from_millis(200), va_out_rx.recv())
            .await
            .is_err()
    );

    cancel.cancel();
    for worker in workers {
        timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker did not stop")
            .expect("worker panicked");
    }
}

#[tokio::test]
async fn cancellation_stops_server_workers() {
    let cipher = test_cipher();
    let server = spawn_server(
        cipher.clone(),
        Duration::from_secs(60),
        Some(Duration::from_secs(30)),
    )
    .await;

    server.cancel.cancel();
    for worker in server.workers {
        timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker did not stop")
            .expect("worker panicked");
    }
}
