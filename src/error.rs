//! Error types shared by the engines and the connection drivers.

use std::io;

use thiserror::Error;

use crate::packet::{PacketError, SegmentKind};
use crate::socket::SocketError;
use crate::state::ConnectionState;

/// A single handshake attempt went wrong.
///
/// Always recoverable: the sender starts the handshake over, the receiver
/// keeps waiting for a fresh SYN.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("expected {expected}, got {got:?}")]
    UnexpectedSegment {
        expected: SegmentKind,
        got: Option<SegmentKind>,
    },

    #[error("SYN carried sequence number {0}, expected 0")]
    NonZeroInitialSeq(u32),

    #[error("invalid ACK number: {expected} != {got}")]
    InvalidAckNumber { expected: u32, got: u32 },

    #[error("no reply within the handshake wait")]
    TimedOut,
}

/// Fatal conditions for one transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("handshake abandoned after {0} attempts")]
    HandshakeAttemptsExhausted(u32),

    #[error("segment seq={seq} abandoned after {attempts} retransmissions")]
    RetransmitLimit { seq: u32, attempts: u32 },

    #[error("operation not valid in state {0}")]
    BadState(ConnectionState),
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MTU {mtu} leaves no room for payload after the {header}-byte header")]
    MtuTooSmall { mtu: usize, header: usize },

    #[error("MTU {0} exceeds the largest encodable segment")]
    MtuTooLarge(usize),

    #[error("sliding window size must be at least 1")]
    ZeroWindow,

    #[error("minimum RTO exceeds maximum RTO")]
    InvertedRtoBounds,
}
