//! Retransmission timers and RTT-driven timeout estimation.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RetransmitTimer`] — a plain `{deadline, attempts, alive}` value kept
//!   next to each stored segment.  No task or callback is attached; the
//!   connection's poll loop scans every timer once per tick.
//! - [`RttEstimator`] — derives the retransmit timeout (RTO) from echoed
//!   timestamps:
//!   - first sample:   `EstRTT = R`, `RTO = 2 × EstRTT`
//!   - later samples:  `EstRTT = α·EstRTT + (1−α)·R`,
//!                     `Dev    = β·Dev    + (1−β)·|R − EstRTT|`,
//!                     `RTO    = EstRTT + 4·Dev`
//!
//!   with α = 0.125 and β = 0.25, clamped to `[min_rto, max_rto]`.
//! - [`Clock`] — turns `Instant`s into the `u64` timestamps carried on the
//!   wire and back into RTT samples.

use std::time::{Duration, Instant};

// α = 1/8 and β = 1/4, kept as integer fractions so the arithmetic stays
// exact on `Duration`.
const ALPHA_DEN: u32 = 8;
const BETA_DEN: u32 = 4;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// RTO before any RTT sample is available.
    pub initial_rto: Duration,
    /// Lower clamp for the computed RTO.
    pub min_rto: Duration,
    /// Upper clamp for the computed RTO.
    pub max_rto: Duration,
    /// Retransmissions allowed for one segment before it is abandoned.
    pub max_retransmits: u32,
    /// Sleep between two scans of the segment store.
    pub poll_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(5000),
            min_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(60),
            max_retransmits: 16,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Expiry bookkeeping for one in-flight segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitTimer {
    /// Instant after which the segment counts as lost.
    pub deadline: Instant,
    /// Retransmissions performed so far (0 after the first send).
    pub attempts: u32,
    /// Cleared once the segment is abandoned; dead timers never fire.
    pub alive: bool,
}

impl RetransmitTimer {
    /// Arm a fresh timer at `now + rto`.
    pub fn start(now: Instant, rto: Duration) -> Self {
        Self {
            deadline: now + rto,
            attempts: 0,
            alive: true,
        }
    }

    /// Re-arm after a retransmission and count the attempt.
    pub fn restart(&mut self, now: Instant, rto: Duration) {
        self.deadline = now + rto;
        self.attempts += 1;
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        self.alive && now >= self.deadline
    }

    pub fn mark_dead(&mut self) {
        self.alive = false;
    }
}

/// Smoothed RTT / deviation tracker that yields the current RTO.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated: Option<Duration>,
    deviation: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            estimated: None,
            deviation: Duration::ZERO,
            rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
        }
    }

    /// Current retransmit timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Smoothed RTT, or `None` before the first sample.
    pub fn estimated_rtt(&self) -> Option<Duration> {
        self.estimated
    }

    pub fn deviation(&self) -> Duration {
        self.deviation
    }

    /// Fold one RTT measurement into the estimate and recompute the RTO.
    pub fn record_sample(&mut self, sample: Duration) {
        let rto = match self.estimated {
            None => {
                self.estimated = Some(sample);
                self.deviation = Duration::ZERO;
                sample * 2
            }
            Some(prev) => {
                let diff = sample.abs_diff(prev);
                let estimated = prev / ALPHA_DEN + sample * (ALPHA_DEN - 1) / ALPHA_DEN;
                self.deviation = self.deviation / BETA_DEN + diff * (BETA_DEN - 1) / BETA_DEN;
                self.estimated = Some(estimated);
                estimated + self.deviation * 4
            }
        };
        self.rto = rto.clamp(self.min_rto, self.max_rto);
    }
}

/// Monotonic clock that stamps outgoing segments.
///
/// Timestamps are nanoseconds since the clock was created, so they only mean
/// something to the endpoint that issued them; the peer merely echoes them.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new(epoch: Instant) -> Self {
        Self { epoch }
    }

    pub fn stamp(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    /// Time elapsed between an echoed stamp and `now`.
    ///
    /// Stamps from the future (a confused peer) read as zero.
    pub fn elapsed_since(&self, stamp: u64, now: Instant) -> Duration {
        Duration::from_nanos(self.stamp(now).saturating_sub(stamp))
    }
}
