//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and the per-segment event lines:
//!
//! ```text
//! [snd] S - - - seq=0 len=0 ack=0
//! [rcv] S A - - seq=0 len=0 ack=1
//! [snd] - A - D seq=1 len=1000 ack=1
//! ```

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The datagram could not be decoded as a valid packet.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
}

impl SocketError {
    /// `true` for a datagram that arrived but failed validation; the caller
    /// drops it and keeps receiving.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, SocketError::Packet(_))
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared by the send, receive
/// and timer loops of one connection without locking.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        log_segment("snd", packet);
        Ok(())
    }

    /// Send every packet in order, stopping at the first failure.
    pub async fn send_all(&self, packets: &[Packet], dest: SocketAddr) -> Result<(), SocketError> {
        for packet in packets {
            self.send_to(packet, dest).await?;
        }
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`.  A datagram that fails checksum or
    /// length validation comes back as [`SocketError::Packet`]; the caller
    /// decides whether to count it and retry.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        match Packet::decode(&buf[..n]) {
            Ok(packet) => {
                log_segment("rcv", &packet);
                Ok((packet, addr))
            }
            Err(e) => {
                log::debug!("[rcv] dropping {n}-byte datagram from {addr}: {e}");
                Err(e.into())
            }
        }
    }
}

fn log_segment(dir: &str, packet: &Packet) {
    let h = &packet.header;
    log::debug!(
        "[{dir}] {} seq={} len={} ack={}",
        packet.flag_list(),
        h.seq,
        packet.payload.len(),
        h.ack
    );
}
