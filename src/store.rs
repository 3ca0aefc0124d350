//! Sender-side segment store.
//!
//! [`SegmentStore`] holds every segment that has been transmitted but not yet
//! cumulatively acknowledged, keyed by sequence number, together with its
//! [`RetransmitTimer`].  Segments that could not be admitted because the
//! window was full wait in a FIFO of pending packets.
//!
//! ```text
//!   in flight (≤ window)                     pending (FIFO)
//!  ┌──────┬──────┬──────┬──────┐           ┌──────┬──────┬────
//!  │ seq1 │ seq2 │ seq3 │ seq4 │  ◀─ ack ─ │ seq5 │ seq6 │ ...
//!  └──────┴──────┴──────┴──────┘           └──────┴──────┴────
//! ```
//!
//! This module only manages the collections; admission policy and I/O live in
//! [`crate::sender`].

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use crate::packet::Packet;
use crate::timer::RetransmitTimer;

/// A transmitted segment awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct StoredSegment {
    pub packet: Packet,
    pub timer: RetransmitTimer,
}

#[derive(Debug, Default)]
pub struct SegmentStore {
    in_flight: BTreeMap<u32, StoredSegment>,
    pending: VecDeque<Packet>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of segments queued behind a full window.
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    /// `true` when nothing is in flight and nothing is queued.
    pub fn is_drained(&self) -> bool {
        self.in_flight.is_empty() && self.pending.is_empty()
    }

    /// Record a transmitted segment under its sequence number.
    pub fn insert(&mut self, packet: Packet, timer: RetransmitTimer) {
        self.in_flight
            .insert(packet.header.seq, StoredSegment { packet, timer });
    }

    pub fn get_mut(&mut self, seq: u32) -> Option<&mut StoredSegment> {
        self.in_flight.get_mut(&seq)
    }

    pub fn remove(&mut self, seq: u32) -> Option<StoredSegment> {
        self.in_flight.remove(&seq)
    }

    /// Drop every in-flight segment whose sequence number is strictly below
    /// `ack` and return them oldest first.
    pub fn acknowledge(&mut self, ack: u32) -> Vec<StoredSegment> {
        let still_open = self.in_flight.split_off(&ack);
        let acked = std::mem::replace(&mut self.in_flight, still_open);
        acked.into_values().collect()
    }

    /// Sequence number of the oldest unacknowledged segment.
    pub fn oldest(&self) -> Option<u32> {
        self.in_flight.keys().next().copied()
    }

    /// Sequence numbers whose timers have fired at `now`, oldest first.
    pub fn expired(&self, now: Instant) -> Vec<u32> {
        self.in_flight
            .iter()
            .filter(|(_, seg)| seg.timer.has_expired(now))
            .map(|(&seq, _)| seq)
            .collect()
    }

    /// Queue a segment behind the full window.
    pub fn enqueue(&mut self, packet: Packet) {
        self.pending.push_back(packet);
    }

    /// Take the next queued segment, if any.
    pub fn dequeue(&mut self) -> Option<Packet> {
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;
    use std::time::Duration;

    fn segment(seq: u32, len: usize) -> Packet {
        Packet::new(seq, 1, 0, flags::ACK, vec![0u8; len])
    }

    fn store_with(seqs: &[u32], now: Instant) -> SegmentStore {
        let mut store = SegmentStore::new();
        for &seq in seqs {
            store.insert(segment(seq, 10), RetransmitTimer::start(now, Duration::from_millis(100)));
        }
        store
    }

    #[test]
    fn acknowledge_removes_strictly_below() {
        let now = Instant::now();
        let mut store = store_with(&[1, 11, 21], now);

        let acked = store.acknowledge(11);
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].packet.header.seq, 1);
        assert_eq!(store.in_flight(), 2);
        assert_eq!(store.oldest(), Some(11));
    }

    #[test]
    fn acknowledge_is_cumulative() {
        let now = Instant::now();
        let mut store = store_with(&[1, 11, 21], now);

        let acked: Vec<u32> = store
            .acknowledge(31)
            .into_iter()
            .map(|s| s.packet.header.seq)
            .collect();
        assert_eq!(acked, vec![1, 11, 21]);
        assert_eq!(store.in_flight(), 0);
    }

    #[test]
    fn stale_ack_removes_nothing() {
        let now = Instant::now();
        let mut store = store_with(&[11, 21], now);
        assert!(store.acknowledge(11).is_empty());
        assert_eq!(store.in_flight(), 2);
    }

    #[test]
    fn expired_lists_only_live_fired_timers() {
        let now = Instant::now();
        let mut store = store_with(&[1, 11], now);
        store.get_mut(1).unwrap().timer.mark_dead();
        store.get_mut(11).unwrap().timer.deadline = now;

        assert_eq!(store.expired(now), vec![11]);
        assert_eq!(store.expired(now + Duration::from_millis(100)), vec![11]);
    }

    #[test]
    fn pending_is_fifo() {
        let mut store = SegmentStore::new();
        store.enqueue(segment(1, 5));
        store.enqueue(segment(6, 5));
        assert_eq!(store.backlog(), 2);
        assert!(!store.is_drained());
        assert_eq!(store.dequeue().unwrap().header.seq, 1);
        assert_eq!(store.dequeue().unwrap().header.seq, 6);
        assert!(store.dequeue().is_none());
        assert!(store.is_drained());
    }
}
