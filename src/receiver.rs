//! Receive-side engine: passive open, reassembly, teardown.
//!
//! [`Receiver`] accepts decoded segments one at a time and returns a
//! [`Reception`] describing what the caller must do: which reply to send,
//! which payloads to hand to the sink, and whether the peer has closed.
//!
//! Unlike a Go-Back-N receiver, segments that arrive ahead of the cumulative
//! pointer are **kept** (up to `window` of them) and delivered as soon as the
//! gap before them closes:
//!
//! ```text
//!  local_ack = 101          reorder buffer
//!      │                  ┌─────┬─────┐
//!  ────┤ gap [101,201)    │ 201 │ 301 │
//!      │                  └─────┴─────┘
//!  DATA seq=101 arrives → deliver 101, 201, 301 → local_ack = 401
//! ```
//!
//! The engine has a single owner (the receive loop), so no lock is needed.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::HandshakeError;
use crate::packet::{flags, Packet, SegmentKind};
use crate::state::ConnectionState;
use crate::stats::TransferStats;

/// Result of feeding one segment to the [`Receiver`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reception {
    /// Segment to send back to the peer, if any.
    pub reply: Option<Packet>,
    /// Payloads now contiguous with the delivered stream, in order.
    pub deliver: Vec<Vec<u8>>,
    /// The peer's FIN has been answered; the transfer is over.
    pub finished: bool,
    /// The segment broke the handshake and was ignored.
    pub rejected: Option<HandshakeError>,
}

impl Reception {
    fn reply(packet: Packet) -> Self {
        Self {
            reply: Some(packet),
            ..Self::default()
        }
    }

    fn rejected(err: HandshakeError) -> Self {
        Self {
            rejected: Some(err),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct Receiver {
    pub state: ConnectionState,

    /// Our own sequence number (0 for the SYN+ACK, 1 afterwards).
    pub local_seq: u32,

    /// Cumulative pointer: next byte expected from the peer.
    pub local_ack: u32,

    /// Out-of-order payloads keyed by sequence number.
    reorder: BTreeMap<u32, Vec<u8>>,
    window: usize,

    pub stats: TransferStats,
}

impl Receiver {
    pub fn new(config: &Config) -> Self {
        Self {
            state: ConnectionState::Closed,
            local_seq: 0,
            local_ack: 0,
            reorder: BTreeMap::new(),
            window: config.window,
            stats: TransferStats::default(),
        }
    }

    /// Process one decoded inbound segment.
    pub fn on_segment(&mut self, packet: Packet) -> Reception {
        self.stats.packets_received += 1;
        let kind = packet.kind();

        if kind == Some(SegmentKind::Syn) {
            return self.on_syn(&packet);
        }

        match self.state {
            ConnectionState::Closed => {
                return Reception::rejected(HandshakeError::UnexpectedSegment {
                    expected: SegmentKind::Syn,
                    got: kind,
                });
            }
            ConnectionState::SynReceived => {
                let expected = self.local_seq.wrapping_add(1);
                let h = &packet.header;
                match kind {
                    // Handshake ACK lost and the peer had nothing to send.
                    Some(SegmentKind::Fin) if h.seq == self.local_ack => {}
                    _ if h.flags & flags::ACK == 0 => {
                        return Reception::rejected(HandshakeError::UnexpectedSegment {
                            expected: SegmentKind::Ack,
                            got: kind,
                        });
                    }
                    _ if h.ack != expected => {
                        return Reception::rejected(HandshakeError::InvalidAckNumber {
                            expected,
                            got: h.ack,
                        });
                    }
                    // The handshake ACK or, if that was lost, the first DATA
                    // segment carrying the same acknowledgement.
                    _ => {}
                }
                self.local_seq = expected;
                self.state = ConnectionState::Established;
                log::info!("[rcv] connection established");
            }
            _ => {}
        }

        match kind {
            Some(SegmentKind::Data) => self.on_data(packet),
            Some(SegmentKind::Fin) => self.on_fin(&packet),
            // Replying to a bare ACK would start an ACK ping-pong.
            Some(SegmentKind::Ack) => Reception::default(),
            other => {
                log::debug!("[rcv] ignoring {other:?} in state {}", self.state);
                Reception::default()
            }
        }
    }

    /// Count a datagram that failed checksum or length validation.
    pub fn record_corrupt(&mut self) {
        self.stats.checksum_discards += 1;
    }

    /// Out-of-order segments currently buffered.
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state == ConnectionState::Closed && self.stats.teardowns > 0
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn on_syn(&mut self, packet: &Packet) -> Reception {
        let h = &packet.header;
        if h.seq != 0 {
            return Reception::rejected(HandshakeError::NonZeroInitialSeq(h.seq));
        }
        if self.state.is_synchronized() {
            log::debug!("[rcv] stray SYN in state {}", self.state);
            return Reception::default();
        }

        // First SYN, or a repeat because our SYN+ACK was lost.
        self.state = ConnectionState::SynReceived;
        self.local_seq = 0;
        self.local_ack = h.seq.wrapping_add(1);
        self.stats.handshakes += 1;
        Reception::reply(self.control(flags::SYN | flags::ACK, h.timestamp))
    }

    fn on_data(&mut self, packet: Packet) -> Reception {
        let seq = packet.header.seq;
        let echoed = packet.header.timestamp;
        let mut deliver = Vec::new();

        if seq == self.local_ack {
            self.advance(packet.payload, &mut deliver);
            while let Some(next) = self.reorder.remove(&self.local_ack) {
                self.advance(next, &mut deliver);
            }
            // Anything still keyed below the pointer can never be delivered.
            self.reorder = self.reorder.split_off(&self.local_ack);
        } else if seq > self.local_ack {
            self.stats.out_of_sequence += 1;
            if self.reorder.contains_key(&seq) {
                log::debug!("[rcv] seq={seq} already buffered");
            } else if self.reorder.len() < self.window {
                self.reorder.insert(seq, packet.payload);
            } else {
                log::debug!("[rcv] reorder buffer full, dropping seq={seq}");
            }
        } else {
            log::debug!("[rcv] duplicate seq={seq} below ack={}", self.local_ack);
        }

        Reception {
            reply: Some(self.control(flags::ACK, echoed)),
            deliver,
            ..Reception::default()
        }
    }

    fn on_fin(&mut self, packet: &Packet) -> Reception {
        let h = &packet.header;
        self.state = ConnectionState::FinReceived;
        self.local_ack = h.seq.wrapping_add(1);
        let reply = self.control(flags::FIN | flags::ACK, h.timestamp);
        self.stats.teardowns += 1;
        self.state = ConnectionState::Closed;
        Reception {
            reply: Some(reply),
            finished: true,
            ..Reception::default()
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn advance(&mut self, payload: Vec<u8>, deliver: &mut Vec<Vec<u8>>) {
        let len = payload.len() as u32;
        self.local_ack = self.local_ack.wrapping_add(len);
        self.stats.bytes_received += u64::from(len);
        deliver.push(payload);
    }

    /// Build a control segment echoing `echoed` for the peer's RTT sample.
    fn control(&mut self, flags: u8, echoed: u64) -> Packet {
        self.stats.packets_sent += 1;
        Packet::control(self.local_seq, self.local_ack, echoed, flags)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn established(window: usize) -> Receiver {
        let mut r = Receiver::new(&Config::new(1024, window).unwrap());
        r.on_segment(Packet::control(0, 0, 7, flags::SYN));
        r.on_segment(Packet::control(1, 1, 8, flags::ACK));
        assert_eq!(r.state, ConnectionState::Established);
        r
    }

    fn data(seq: u32, bytes: &[u8]) -> Packet {
        Packet::new(seq, 1, 42, flags::ACK, bytes.to_vec())
    }

    fn flat(chunks: &[Vec<u8>]) -> Vec<u8> {
        chunks.concat()
    }

    #[test]
    fn syn_gets_syn_ack_echoing_timestamp() {
        let mut r = Receiver::new(&Config::default());
        let out = r.on_segment(Packet::control(0, 0, 1234, flags::SYN));
        let reply = out.reply.unwrap();
        assert_eq!(reply.kind(), Some(SegmentKind::SynAck));
        assert_eq!(reply.header.seq, 0);
        assert_eq!(reply.header.ack, 1);
        assert_eq!(reply.header.timestamp, 1234);
        assert_eq!(r.state, ConnectionState::SynReceived);
        assert_eq!(r.stats.handshakes, 1);
    }

    #[test]
    fn syn_with_nonzero_seq_is_rejected() {
        let mut r = Receiver::new(&Config::default());
        let out = r.on_segment(Packet::control(5, 0, 0, flags::SYN));
        assert_eq!(out.rejected, Some(HandshakeError::NonZeroInitialSeq(5)));
        assert!(out.reply.is_none());
        assert_eq!(r.state, ConnectionState::Closed);
    }

    #[test]
    fn segment_before_syn_is_rejected() {
        let mut r = Receiver::new(&Config::default());
        let out = r.on_segment(data(1, b"early"));
        assert!(out.rejected.is_some());
        assert!(out.deliver.is_empty());
    }

    #[test]
    fn repeated_syn_is_answered_again() {
        let mut r = Receiver::new(&Config::default());
        r.on_segment(Packet::control(0, 0, 1, flags::SYN));
        let out = r.on_segment(Packet::control(0, 0, 2, flags::SYN));
        assert_eq!(out.reply.unwrap().header.timestamp, 2);
    }

    #[test]
    fn handshake_ack_with_wrong_number_is_rejected() {
        let mut r = Receiver::new(&Config::default());
        r.on_segment(Packet::control(0, 0, 0, flags::SYN));
        let out = r.on_segment(Packet::control(1, 9, 0, flags::ACK));
        assert_eq!(
            out.rejected,
            Some(HandshakeError::InvalidAckNumber { expected: 1, got: 9 })
        );
        assert_eq!(r.state, ConnectionState::SynReceived);
    }

    #[test]
    fn data_completes_handshake_when_ack_was_lost() {
        let mut r = Receiver::new(&Config::default());
        r.on_segment(Packet::control(0, 0, 0, flags::SYN));
        let out = r.on_segment(data(1, b"hello"));
        assert_eq!(r.state, ConnectionState::Established);
        assert_eq!(flat(&out.deliver), b"hello");
        assert_eq!(out.reply.unwrap().header.ack, 6);
    }

    #[test]
    fn fin_completes_handshake_when_ack_was_lost() {
        let mut r = Receiver::new(&Config::default());
        r.on_segment(Packet::control(0, 0, 0, flags::SYN));
        let out = r.on_segment(Packet::control(1, 1, 5, flags::FIN));
        assert_eq!(out.rejected, None);
        assert!(out.finished);
        let reply = out.reply.unwrap();
        assert_eq!(reply.kind(), Some(SegmentKind::FinAck));
        assert_eq!(reply.header.seq, 1);
        assert_eq!(reply.header.ack, 2);
        assert!(r.is_finished());
    }

    #[test]
    fn fin_out_of_place_during_handshake_is_rejected() {
        let mut r = Receiver::new(&Config::default());
        r.on_segment(Packet::control(0, 0, 0, flags::SYN));
        let out = r.on_segment(Packet::control(40, 1, 0, flags::FIN));
        assert_eq!(
            out.rejected,
            Some(HandshakeError::UnexpectedSegment {
                expected: SegmentKind::Ack,
                got: Some(SegmentKind::Fin),
            })
        );
        assert!(out.reply.is_none());
        assert_eq!(r.state, ConnectionState::SynReceived);
    }

    #[test]
    fn pure_ack_gets_no_reply() {
        let mut r = established(4);
        let out = r.on_segment(Packet::control(1, 1, 0, flags::ACK));
        assert_eq!(out, Reception::default());
    }

    #[test]
    fn duplicate_in_order_segment_delivered_once() {
        let mut r = established(4);
        let first = r.on_segment(data(1, &[1; 100]));
        assert_eq!(first.deliver.len(), 1);
        assert_eq!(r.local_ack, 101);

        let second = r.on_segment(data(1, &[1; 100]));
        assert!(second.deliver.is_empty());
        assert_eq!(r.local_ack, 101);
        assert_eq!(second.reply.unwrap().header.ack, 101);
        assert_eq!(r.stats.bytes_received, 100);
    }

    #[test]
    fn reorder_buffer_fills_gap() {
        let mut r = established(4);
        let bytes: Vec<u8> = (0..300u32).map(|i| i as u8).collect();

        let a = r.on_segment(data(1, &bytes[0..100]));
        let c = r.on_segment(data(201, &bytes[200..300]));
        assert!(c.deliver.is_empty());
        assert_eq!(c.reply.unwrap().header.ack, 101);
        assert_eq!(r.buffered(), 1);

        let b = r.on_segment(data(101, &bytes[100..200]));
        let mut got = flat(&a.deliver);
        got.extend(flat(&b.deliver));
        assert_eq!(got, bytes);
        assert_eq!(r.local_ack, 301);
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.stats.out_of_sequence, 1);
    }

    #[test]
    fn full_reorder_buffer_drops_segment() {
        let mut r = established(2);
        r.on_segment(data(101, &[0; 100]));
        r.on_segment(data(201, &[0; 100]));
        let out = r.on_segment(data(301, &[0; 100]));
        assert_eq!(r.buffered(), 2);
        assert_eq!(out.reply.unwrap().header.ack, 1);

        // Gap closes: only the buffered segments drain.
        let out = r.on_segment(data(1, &[0; 100]));
        assert_eq!(out.deliver.len(), 3);
        assert_eq!(r.local_ack, 301);
    }

    #[test]
    fn fin_is_answered_with_fin_ack() {
        let mut r = established(4);
        r.on_segment(data(1, &[0; 10]));
        let out = r.on_segment(Packet::control(11, 1, 99, flags::FIN));
        assert!(out.finished);
        let reply = out.reply.unwrap();
        assert_eq!(reply.kind(), Some(SegmentKind::FinAck));
        assert_eq!(reply.header.ack, 12);
        assert_eq!(reply.header.timestamp, 99);
        assert!(r.is_finished());
        assert_eq!(r.stats.teardowns, 1);
    }

    #[test]
    fn corrupt_datagrams_are_only_counted() {
        let mut r = established(4);
        r.record_corrupt();
        r.record_corrupt();
        assert_eq!(r.stats.checksum_discards, 2);
        assert_eq!(r.local_ack, 1);
    }
}
