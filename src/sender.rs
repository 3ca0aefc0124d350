//! Send-side engine: handshake, sliding window, retransmission, teardown.
//!
//! [`Sender`] is a pure state machine.  Every method takes the current
//! `Instant` and returns the packets the caller must put on the wire; it
//! never touches a socket.  [`crate::connection::SenderConnection`] wraps it
//! in a mutex and feeds it from three loops (source reads, inbound ACKs,
//! timer polls), doing the actual I/O after the lock is released.
//!
//! # Protocol contract
//!
//! - SYN carries sequence number 0 and consumes one number, so DATA starts
//!   at 1 and an N-byte stream is fully acknowledged by `ack = N + 1`.
//! - At most `window` segments sit in the [`SegmentStore`] awaiting an ACK;
//!   further segments queue FIFO and are admitted one per acknowledged
//!   segment.
//! - ACKs are **cumulative**: `ack = K` releases every stored segment whose
//!   sequence number is below `K`.
//! - The fourth ACK carrying the same non-advancing number (three
//!   duplicates) resends the oldest outstanding segment at once.
//! - Each segment has its own timer; an expiry resends just that segment.
//!   After `max_retransmits` resends the next expiry abandons it and the
//!   transfer fails.
//!
//! ```text
//!  oldest unacked          local_seq
//!      │                       │
//!  ────┼───────────────────────┼──────────────────▶ seq space
//!      │ <── store (≤ window) ─┤ <── pending ───▶ │
//! ```

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{HandshakeError, TransferError};
use crate::packet::{flags, Packet, PacketError, SegmentKind, MAX_PAYLOAD_LEN};
use crate::state::ConnectionState;
use crate::stats::TransferStats;
use crate::store::SegmentStore;
use crate::timer::{Clock, RetransmitTimer, RttEstimator};

/// ACK occurrences (original plus three duplicates) that trigger a fast
/// retransmit.
const FAST_RETRANSMIT_THRESHOLD: u32 = 4;

/// What the caller must do after feeding the engine an inbound segment.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Packets to transmit, in order.
    pub transmit: Vec<Packet>,
    /// The local FIN has been acknowledged; the connection is over.
    pub finished: bool,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct Sender {
    /// Current FSM state.
    pub state: ConnectionState,

    /// Sequence number assigned to the next new segment.
    pub local_seq: u32,

    /// Next sequence number expected from the peer (placed in `ack`).
    pub ack_number: u32,

    window: usize,
    max_retransmits: u32,
    store: SegmentStore,
    rtt: RttEstimator,
    clock: Clock,

    /// Highest cumulative ACK seen so far.
    highest_ack: u32,
    /// Times `highest_ack` has arrived since it last advanced.
    ack_repeats: u32,

    /// The source has been read to the end.
    stream_closed: bool,
    /// Sequence number of our FIN once it has been originated.
    fin_seq: Option<u32>,

    pub stats: TransferStats,
}

impl Sender {
    /// Create an engine whose clock starts at `epoch`.
    pub fn new(config: &Config, epoch: Instant) -> Self {
        Self {
            state: ConnectionState::Closed,
            local_seq: 0,
            ack_number: 0,
            window: config.window,
            max_retransmits: config.timer.max_retransmits,
            store: SegmentStore::new(),
            rtt: RttEstimator::new(&config.timer),
            clock: Clock::new(epoch),
            highest_ack: 0,
            ack_repeats: 0,
            stream_closed: false,
            fin_seq: None,
            stats: TransferStats::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Start (or restart) the handshake: returns the SYN to send.
    pub fn open(&mut self, now: Instant) -> Packet {
        self.state = ConnectionState::SynSent;
        self.local_seq = 0;
        self.stats.handshakes += 1;
        self.stats.packets_sent += 1;
        Packet::control(self.local_seq, 0, self.clock.stamp(now), flags::SYN)
    }

    /// Validate the peer's SYN+ACK and return the ACK completing the
    /// handshake.
    ///
    /// Any other segment, or a SYN+ACK acknowledging the wrong number, fails
    /// this attempt; the caller restarts with [`open`](Self::open).
    pub fn on_syn_ack(&mut self, packet: &Packet, now: Instant) -> Result<Packet, HandshakeError> {
        self.stats.packets_received += 1;
        let kind = packet.kind();
        if kind != Some(SegmentKind::SynAck) {
            return Err(HandshakeError::UnexpectedSegment {
                expected: SegmentKind::SynAck,
                got: kind,
            });
        }
        let expected = self.local_seq.wrapping_add(1);
        if packet.header.ack != expected {
            return Err(HandshakeError::InvalidAckNumber {
                expected,
                got: packet.header.ack,
            });
        }

        self.sample_rtt(packet.header.timestamp, now);
        self.local_seq = expected;
        self.ack_number = packet.header.seq.wrapping_add(1);
        self.highest_ack = packet.header.ack;
        self.ack_repeats = 1;
        self.state = ConnectionState::Established;
        Ok(self.make_ack(now))
    }

    // -----------------------------------------------------------------------
    // Outbound data
    // -----------------------------------------------------------------------

    /// Frame `payload` as a DATA segment at the current `local_seq`.
    ///
    /// Returns `Some(packet)` when the window admits it (the caller sends it
    /// now) or `None` when it was queued behind a full window.  `local_seq`
    /// advances either way.
    pub fn submit(&mut self, payload: Vec<u8>, now: Instant) -> Result<Option<Packet>, TransferError> {
        if self.state != ConnectionState::Established && self.state != ConnectionState::FinReceived {
            return Err(TransferError::BadState(self.state));
        }
        if self.stream_closed {
            return Err(TransferError::BadState(self.state));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(payload.len()).into());
        }

        let packet = Packet::new(self.local_seq, self.ack_number, 0, flags::ACK, payload);
        let len = packet.seq_len();
        self.local_seq = self.local_seq.wrapping_add(len);
        self.stats.bytes_sent += u64::from(len);

        if self.has_room() {
            Ok(Some(self.admit(packet, now)))
        } else {
            self.store.enqueue(packet);
            Ok(None)
        }
    }

    /// Mark the source exhausted.
    ///
    /// Returns the FIN if every byte is already acknowledged (including the
    /// empty-stream case); otherwise the FIN goes out with the final ACK.
    pub fn close_stream(&mut self, now: Instant) -> Option<Packet> {
        self.stream_closed = true;
        self.maybe_fin(now)
    }

    // -----------------------------------------------------------------------
    // Inbound segments
    // -----------------------------------------------------------------------

    /// Dispatch one decoded inbound segment.
    pub fn on_segment(&mut self, packet: &Packet, now: Instant) -> Outcome {
        self.stats.packets_received += 1;
        let h = &packet.header;

        match packet.kind() {
            Some(SegmentKind::Ack) | Some(SegmentKind::Data) => {
                self.on_ack(h.ack, h.timestamp, now)
            }
            Some(SegmentKind::FinAck) => {
                self.ack_number = h.seq.wrapping_add(1);
                let mut outcome = self.on_ack(h.ack, h.timestamp, now);
                if outcome.finished {
                    outcome.transmit.push(self.make_ack(now));
                }
                outcome
            }
            Some(SegmentKind::Fin) => {
                // Peer closes first: acknowledge, then send our own FIN once
                // everything we sent is acknowledged.
                self.ack_number = h.seq.wrapping_add(1);
                if self.state == ConnectionState::Established {
                    self.state = ConnectionState::FinReceived;
                }
                let ack = self.make_ack(now);
                let mut outcome = self.on_ack(h.ack, h.timestamp, now);
                outcome.transmit.insert(0, ack);
                outcome
            }
            Some(SegmentKind::SynAck) if self.state.is_synchronized() => {
                // Our handshake ACK was lost; repeat it.
                Outcome {
                    transmit: vec![self.make_ack(now)],
                    finished: false,
                }
            }
            other => {
                log::debug!("[snd] ignoring {other:?} in state {}", self.state);
                Outcome::default()
            }
        }
    }

    /// Process a cumulative acknowledgement.
    ///
    /// Releases every stored segment below `ack`, admits one pending segment
    /// per release, samples the RTT from `echoed`, counts duplicates for fast
    /// retransmit and originates the FIN once the stream is fully
    /// acknowledged.
    pub fn on_ack(&mut self, ack: u32, echoed: u64, now: Instant) -> Outcome {
        self.sample_rtt(echoed, now);

        let mut outcome = Outcome::default();
        let released = self.store.acknowledge(ack);

        if ack > self.highest_ack {
            self.highest_ack = ack;
            self.ack_repeats = 1;
        } else if ack == self.highest_ack && self.store.in_flight() > 0 {
            self.ack_repeats += 1;
            self.stats.duplicate_acks += 1;
            if self.ack_repeats == FAST_RETRANSMIT_THRESHOLD {
                self.ack_repeats = 0;
                if let Some(oldest) = self.store.oldest() {
                    log::debug!("[snd] fast retransmit seq={oldest} after duplicate ACKs");
                    outcome.transmit.extend(self.retransmit(oldest, now));
                }
            }
        }

        for _ in &released {
            match self.store.dequeue() {
                Some(next) => outcome.transmit.push(self.admit(next, now)),
                None => break,
            }
        }

        if let Some(fin_seq) = self.fin_seq {
            if released.iter().any(|s| s.packet.header.seq == fin_seq) {
                self.state = ConnectionState::Closed;
                outcome.finished = true;
                return outcome;
            }
        }

        outcome.transmit.extend(self.maybe_fin(now));
        outcome
    }

    /// Count a datagram that failed checksum or length validation.
    pub fn record_corrupt(&mut self) {
        self.stats.checksum_discards += 1;
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// One scan of the store: resend every segment whose timer expired.
    ///
    /// Fails with [`TransferError::RetransmitLimit`] as soon as a DATA
    /// segment exhausts its retransmissions.  An exhausted FIN instead ends
    /// the connection, reported through [`Outcome::finished`].
    pub fn poll_timers(&mut self, now: Instant) -> Result<Outcome, TransferError> {
        let mut outcome = Outcome::default();
        for seq in self.store.expired(now) {
            outcome.transmit.extend(self.on_timer_expiry(seq, now)?);
        }
        outcome.finished = self.is_finished();
        Ok(outcome)
    }

    /// Handle the expiry of the timer guarding `seq`.
    pub fn on_timer_expiry(&mut self, seq: u32, now: Instant) -> Result<Option<Packet>, TransferError> {
        let Some(entry) = self.store.get_mut(seq) else {
            return Ok(None);
        };
        if !entry.timer.alive {
            return Ok(None);
        }
        if entry.timer.attempts >= self.max_retransmits {
            entry.timer.mark_dead();
            let attempts = entry.timer.attempts;
            self.store.remove(seq);
            if self.fin_seq == Some(seq) {
                // Every byte was acknowledged; only the FIN+ACK went missing.
                log::warn!("[snd] FIN seq={seq} unanswered after {attempts} retransmissions, closing");
                self.state = ConnectionState::Closed;
                return Ok(None);
            }
            log::error!("[snd] seq={seq} unacknowledged after {attempts} retransmissions");
            return Err(TransferError::RetransmitLimit { seq, attempts });
        }
        log::debug!("[snd] timeout seq={seq}");
        Ok(self.retransmit(seq, now))
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Segments awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.store.in_flight()
    }

    /// Segments queued behind the full window.
    pub fn backlog(&self) -> usize {
        self.store.backlog()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Current retransmit timeout.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    pub fn is_finished(&self) -> bool {
        self.fin_seq.is_some() && self.state == ConnectionState::Closed
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn has_room(&self) -> bool {
        self.store.in_flight() < self.window && self.store.backlog() == 0
    }

    /// Stamp, store and arm a segment that is about to go out for the first
    /// time.
    fn admit(&mut self, mut packet: Packet, now: Instant) -> Packet {
        packet.header.timestamp = self.clock.stamp(now);
        self.count_sent(&packet);
        self.store
            .insert(packet.clone(), RetransmitTimer::start(now, self.rtt.rto()));
        packet
    }

    /// Refresh the timestamp of a stored segment, restart its timer and
    /// return the copy to resend.
    fn retransmit(&mut self, seq: u32, now: Instant) -> Option<Packet> {
        let rto = self.rtt.rto();
        let stamp = self.clock.stamp(now);
        let entry = self.store.get_mut(seq)?;
        entry.timer.restart(now, rto);
        entry.packet.header.timestamp = stamp;
        let packet = entry.packet.clone();
        self.stats.retransmissions += 1;
        self.count_sent(&packet);
        Some(packet)
    }

    fn maybe_fin(&mut self, now: Instant) -> Option<Packet> {
        let ready = self.stream_closed
            && self.fin_seq.is_none()
            && self.store.is_drained()
            && matches!(
                self.state,
                ConnectionState::Established | ConnectionState::FinReceived
            );
        if !ready {
            return None;
        }
        let fin = Packet::control(self.local_seq, self.ack_number, 0, flags::FIN);
        self.fin_seq = Some(self.local_seq);
        self.local_seq = self.local_seq.wrapping_add(fin.seq_len());
        self.state = ConnectionState::FinSent;
        self.stats.teardowns += 1;
        log::debug!("[snd] stream fully acknowledged, sending FIN seq={}", fin.header.seq);
        Some(self.admit(fin, now))
    }

    fn make_ack(&mut self, now: Instant) -> Packet {
        self.stats.packets_sent += 1;
        Packet::control(self.local_seq, self.ack_number, self.clock.stamp(now), flags::ACK)
    }

    fn count_sent(&mut self, packet: &Packet) {
        self.stats.packets_sent += 1;
        if !packet.payload.is_empty() {
            self.stats.data_segments_sent += 1;
        }
    }

    fn sample_rtt(&mut self, echoed: u64, now: Instant) {
        self.rtt.record_sample(self.clock.elapsed_since(echoed, now));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
