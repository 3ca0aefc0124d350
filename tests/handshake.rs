//! Integration tests for the 3-way handshake.
//!
//! The far end is a bare [`Socket`] driven by hand, so each test controls
//! exactly which segments the connection under test sees.

use std::net::SocketAddr;
use std::time::Duration;

use tcpend::{
    config::Config,
    connection::{ReceiverConnection, SenderConnection},
    error::TransferError,
    packet::{flags, Packet, SegmentKind},
    socket::Socket,
    state::ConnectionState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind socket")
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.handshake.attempt_timeout = Duration::from_millis(200);
    config
}

/// Receive one segment, failing the test after two seconds.
async fn expect_segment(socket: &Socket) -> (Packet, SocketAddr) {
    tokio::time::timeout(Duration::from_secs(2), socket.recv_from())
        .await
        .expect("timed out waiting for a segment")
        .expect("recv failed")
}

// ---------------------------------------------------------------------------
// Active open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sender_completes_handshake() {
    let peer = ephemeral().await;
    let peer_addr = peer.local_addr;

    let fake_receiver = tokio::spawn(async move {
        let (syn, from) = expect_segment(&peer).await;
        assert_eq!(syn.kind(), Some(SegmentKind::Syn));
        assert_eq!(syn.header.seq, 0);

        let syn_ack = Packet::control(0, 1, syn.header.timestamp, flags::SYN | flags::ACK);
        peer.send_to(&syn_ack, from).await.unwrap();

        let (ack, _) = expect_segment(&peer).await;
        assert_eq!(ack.kind(), Some(SegmentKind::Ack));
        assert_eq!(ack.header.seq, 1);
        assert_eq!(ack.header.ack, 1);
    });

    let conn = SenderConnection::connect(ephemeral().await, peer_addr, quick_config())
        .await
        .expect("connect");
    assert_eq!(conn.state().await, ConnectionState::Established);
    assert_eq!(conn.stats().await.handshakes, 1);

    fake_receiver.await.unwrap();
}

#[tokio::test]
async fn bad_syn_ack_restarts_handshake() {
    let peer = ephemeral().await;
    let peer_addr = peer.local_addr;

    let fake_receiver = tokio::spawn(async move {
        // First attempt: acknowledge the wrong number.
        let (syn, from) = expect_segment(&peer).await;
        let wrong = Packet::control(0, 7, syn.header.timestamp, flags::SYN | flags::ACK);
        peer.send_to(&wrong, from).await.unwrap();

        // The sender starts over with a fresh SYN.
        let (syn, from) = expect_segment(&peer).await;
        assert_eq!(syn.kind(), Some(SegmentKind::Syn));
        let right = Packet::control(0, 1, syn.header.timestamp, flags::SYN | flags::ACK);
        peer.send_to(&right, from).await.unwrap();

        let (ack, _) = expect_segment(&peer).await;
        assert_eq!(ack.header.ack, 1);
    });

    let conn = SenderConnection::connect(ephemeral().await, peer_addr, quick_config())
        .await
        .expect("connect");
    assert_eq!(conn.stats().await.handshakes, 2);

    fake_receiver.await.unwrap();
}

#[tokio::test]
async fn silent_peer_exhausts_handshake_attempts() {
    // Bind and drop so nothing listens on the port.
    let silent_addr = ephemeral().await.local_addr;

    let mut config = Config::default();
    config.handshake.attempt_timeout = Duration::from_millis(50);
    config.handshake.max_attempts = Some(3);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        SenderConnection::connect(ephemeral().await, silent_addr, config),
    )
    .await
    .expect("connect should give up on its own");

    assert!(
        matches!(result, Err(TransferError::HandshakeAttemptsExhausted(3))),
        "unexpected result: {:?}",
        result.err()
    );
}

// ---------------------------------------------------------------------------
// Passive open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receiver_ignores_syn_with_nonzero_seq() {
    let listener = ReceiverConnection::new(ephemeral().await, Config::default()).unwrap();
    let receiver_addr = listener.local_addr();
    let task = tokio::spawn(async move {
        let mut sink = Vec::new();
        listener.run(&mut sink).await
    });

    let client = ephemeral().await;
    client
        .send_to(&Packet::control(5, 0, 0, flags::SYN), receiver_addr)
        .await
        .unwrap();
    let silence =
        tokio::time::timeout(Duration::from_millis(200), client.recv_from()).await;
    assert!(silence.is_err(), "malformed SYN must not be answered");

    client
        .send_to(&Packet::control(0, 0, 99, flags::SYN), receiver_addr)
        .await
        .unwrap();
    let (syn_ack, _) = expect_segment(&client).await;
    assert_eq!(syn_ack.kind(), Some(SegmentKind::SynAck));
    assert_eq!(syn_ack.header.ack, 1);
    assert_eq!(syn_ack.header.timestamp, 99);

    task.abort();
}

#[tokio::test]
async fn receiver_answers_fin_and_reports_stats() {
    let listener = ReceiverConnection::new(ephemeral().await, Config::default()).unwrap();
    let receiver_addr = listener.local_addr();
    let task = tokio::spawn(async move {
        let mut sink = Vec::new();
        let stats = listener.run(&mut sink).await;
        (sink, stats)
    });

    let client = ephemeral().await;
    client
        .send_to(&Packet::control(0, 0, 0, flags::SYN), receiver_addr)
        .await
        .unwrap();
    expect_segment(&client).await;
    client
        .send_to(&Packet::control(1, 1, 0, flags::ACK), receiver_addr)
        .await
        .unwrap();
    client
        .send_to(&Packet::new(1, 1, 0, flags::ACK, b"abc".to_vec()), receiver_addr)
        .await
        .unwrap();
    let (ack, _) = expect_segment(&client).await;
    assert_eq!(ack.header.ack, 4);

    client
        .send_to(&Packet::control(4, 1, 0, flags::FIN), receiver_addr)
        .await
        .unwrap();
    let (fin_ack, _) = expect_segment(&client).await;
    assert_eq!(fin_ack.kind(), Some(SegmentKind::FinAck));
    assert_eq!(fin_ack.header.ack, 5);

    let (sink, stats) = task.await.unwrap();
    let stats = stats.expect("receiver run");
    assert_eq!(sink, b"abc");
    assert_eq!(stats.bytes_received, 3);
    assert_eq!(stats.handshakes, 1);
    assert_eq!(stats.teardowns, 1);
}
