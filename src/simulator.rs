//! Fault-injecting UDP relay for exercising loss recovery.
//!
//! Real networks drop and damage datagrams.  To exercise retransmission and
//! checksum handling without depending on actual network conditions, a
//! [`Simulator`] sits between the two endpoints and mangles traffic
//! according to a [`SimulatorConfig`]:
//!
//! ```text
//!  sender ──▶ ┌───────────┐ ──▶ receiver      forward: drop / corrupt
//!             │ Simulator │
//!  sender ◀── └───────────┘ ◀── receiver      reverse: drop
//! ```
//!
//! | Fault        | Trigger                                          |
//! |--------------|--------------------------------------------------|
//! | Drop         | every `drop_every`-th forward datagram           |
//! | Random loss  | probability `loss_rate`, from a seeded `StdRng`  |
//! | Corruption   | every `corrupt_every`-th forward datagram, one   |
//! |              | bit flipped at a random position                 |
//! | Reverse drop | every `drop_reverse_every`-th reverse datagram,  |
//! |              | plus the reverse datagrams listed in             |
//! |              | `drop_reverse`                                   |
//!
//! The sender talks to the relay's address as if it were the receiver; the
//! relay learns the sender's address from the first datagram that does not
//! come from upstream.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const MAX_DATAGRAM: usize = 65_535;

/// Fault model for both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Drop every Nth forward datagram (1-based count).
    pub drop_every: Option<usize>,
    /// Probability in `[0.0, 1.0]` that a forward datagram is dropped.
    pub loss_rate: f64,
    /// Flip one bit in every Nth forward datagram that was not dropped.
    pub corrupt_every: Option<usize>,
    /// Seed for the loss and corruption RNG.
    pub seed: u64,
    /// Drop every Nth reverse (receiver → sender) datagram.
    pub drop_reverse_every: Option<usize>,
    /// 1-based indices of individual reverse datagrams to drop.
    pub drop_reverse: Vec<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            drop_every: None,
            loss_rate: 0.0,
            corrupt_every: None,
            seed: 0,
            drop_reverse_every: None,
            drop_reverse: Vec::new(),
        }
    }
}

/// Counters kept by the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub returned: u64,
    pub dropped_reverse: u64,
}

/// Live counters, shared between the relay task and its handle.
#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    corrupted: AtomicU64,
    returned: AtomicU64,
    dropped_reverse: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SimulatorStats {
        SimulatorStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            dropped_reverse: self.dropped_reverse.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Deliver,
    Drop,
    Corrupt,
}

fn nth(every: Option<usize>, n: usize) -> bool {
    every.is_some_and(|k| k > 0 && n % k == 0)
}

/// Decides the fate of each datagram.
#[derive(Debug)]
struct FaultModel {
    config: SimulatorConfig,
    rng: StdRng,
    seen: usize,
    seen_reverse: usize,
}

impl FaultModel {
    fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            seen: 0,
            seen_reverse: 0,
        }
    }

    /// Fate of the next forward datagram.
    fn next(&mut self) -> Fault {
        self.seen += 1;
        if nth(self.config.drop_every, self.seen) {
            return Fault::Drop;
        }
        if self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate {
            return Fault::Drop;
        }
        if nth(self.config.corrupt_every, self.seen) {
            return Fault::Corrupt;
        }
        Fault::Deliver
    }

    /// Fate of the next reverse datagram; never corrupted.
    fn next_reverse(&mut self) -> Fault {
        self.seen_reverse += 1;
        let n = self.seen_reverse;
        if nth(self.config.drop_reverse_every, n) || self.config.drop_reverse.contains(&n) {
            return Fault::Drop;
        }
        Fault::Deliver
    }

    fn flip_bit(&mut self, datagram: &mut [u8]) {
        if datagram.is_empty() {
            return;
        }
        let byte = self.rng.random_range(0..datagram.len());
        let bit = self.rng.random_range(0..8u32);
        datagram[byte] ^= 1 << bit;
    }
}

/// A UDP relay in front of `upstream`.
#[derive(Debug)]
pub struct Simulator {
    socket: UdpSocket,
    upstream: SocketAddr,
    model: FaultModel,
    client: Option<SocketAddr>,
    counters: Arc<Counters>,
}

/// A relay running on a background task.
#[derive(Debug)]
pub struct SimulatorHandle {
    counters: Arc<Counters>,
    task: JoinHandle<io::Result<()>>,
}

impl SimulatorHandle {
    /// Counters so far; readable while the relay runs.
    pub fn stats(&self) -> SimulatorStats {
        self.counters.snapshot()
    }

    /// Stop the relay and return its final counters.
    pub fn abort(self) -> SimulatorStats {
        self.task.abort();
        self.counters.snapshot()
    }
}

impl Simulator {
    /// Bind the relay on `listen` in front of `upstream`.
    pub async fn bind(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: SimulatorConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        Ok(Self {
            socket,
            upstream,
            model: FaultModel::new(config),
            client: None,
            counters: Arc::default(),
        })
    }

    /// Address the sender should use as its peer.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> SimulatorStats {
        self.counters.snapshot()
    }

    /// Run the relay on a background task until it is aborted or the socket
    /// fails.
    pub fn spawn(self) -> SimulatorHandle {
        let counters = Arc::clone(&self.counters);
        SimulatorHandle {
            counters,
            task: tokio::spawn(self.run()),
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            let datagram = &mut buf[..n];

            if from == self.upstream {
                let Some(client) = self.client else {
                    continue;
                };
                if self.model.next_reverse() == Fault::Drop {
                    Counters::bump(&self.counters.dropped_reverse);
                    log::debug!("[sim] dropped reverse datagram #{}", self.model.seen_reverse);
                    continue;
                }
                self.socket.send_to(datagram, client).await?;
                Counters::bump(&self.counters.returned);
                continue;
            }

            self.client = Some(from);
            match self.model.next() {
                Fault::Drop => {
                    Counters::bump(&self.counters.dropped);
                    log::debug!("[sim] dropped {n}-byte datagram #{}", self.model.seen);
                    continue;
                }
                Fault::Corrupt => {
                    self.model.flip_bit(datagram);
                    Counters::bump(&self.counters.corrupted);
                    log::debug!("[sim] corrupted datagram #{}", self.model.seen);
                }
                Fault::Deliver => {}
            }
            self.socket.send_to(datagram, self.upstream).await?;
            Counters::bump(&self.counters.forwarded);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn faults(config: SimulatorConfig, count: usize) -> Vec<Fault> {
        let mut model = FaultModel::new(config);
        (0..count).map(|_| model.next()).collect()
    }

    #[test]
    fn default_is_pass_through() {
        assert!(faults(SimulatorConfig::default(), 100)
            .iter()
            .all(|f| *f == Fault::Deliver));
    }

    #[test]
    fn drops_every_nth() {
        let config = SimulatorConfig {
            drop_every: Some(5),
            ..SimulatorConfig::default()
        };
        let dropped: Vec<usize> = faults(config, 20)
            .iter()
            .enumerate()
            .filter(|(_, f)| **f == Fault::Drop)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(dropped, vec![5, 10, 15, 20]);
    }

    #[test]
    fn drop_takes_precedence_over_corruption() {
        let config = SimulatorConfig {
            drop_every: Some(2),
            corrupt_every: Some(3),
            ..SimulatorConfig::default()
        };
        let got = faults(config, 6);
        assert_eq!(got[1], Fault::Drop);
        assert_eq!(got[2], Fault::Corrupt);
        assert_eq!(got[5], Fault::Drop);
    }

    #[test]
    fn random_loss_is_reproducible() {
        let config = SimulatorConfig {
            loss_rate: 0.3,
            seed: 7,
            ..SimulatorConfig::default()
        };
        let a = faults(config.clone(), 200);
        let b = faults(config, 200);
        assert_eq!(a, b);
        let drops = a.iter().filter(|f| **f == Fault::Drop).count();
        assert!(drops > 20 && drops < 120, "drops = {drops}");
    }

    #[test]
    fn reverse_faults_are_counted_separately() {
        let config = SimulatorConfig {
            drop_every: Some(2),
            drop_reverse_every: Some(3),
            drop_reverse: vec![1],
            ..SimulatorConfig::default()
        };
        let mut model = FaultModel::new(config);
        let reverse: Vec<Fault> = (0..6).map(|_| model.next_reverse()).collect();
        assert_eq!(
            reverse,
            vec![
                Fault::Drop,
                Fault::Deliver,
                Fault::Drop,
                Fault::Deliver,
                Fault::Deliver,
                Fault::Drop,
            ]
        );
        // The forward count is untouched by reverse traffic.
        assert_eq!(model.next(), Fault::Deliver);
        assert_eq!(model.next(), Fault::Drop);
    }

    #[test]
    fn default_passes_reverse_traffic() {
        let mut model = FaultModel::new(SimulatorConfig::default());
        assert!((0..50).all(|_| model.next_reverse() == Fault::Deliver));
    }

    #[tokio::test]
    async fn handle_reports_counters_after_spawn() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = SimulatorConfig {
            drop_every: Some(2),
            ..SimulatorConfig::default()
        };
        let relay = Simulator::bind(
            "127.0.0.1:0".parse().unwrap(),
            upstream.local_addr().unwrap(),
            config,
        )
        .await
        .unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let handle = relay.spawn();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for i in 0..5u8 {
            client.send_to(&[i], relay_addr).await.unwrap();
        }
        let mut buf = [0u8; 8];
        for expected in [0u8, 2, 4] {
            let (n, _) = tokio::time::timeout(
                std::time::Duration::from_secs(2),
                upstream.recv_from(&mut buf),
            )
            .await
            .expect("relay forwarded nothing")
            .unwrap();
            assert_eq!(&buf[..n], &[expected]);
        }

        let stats = handle.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.forwarded, 3);
        assert_eq!(handle.abort().dropped, 2);
    }

    #[test]
    fn flip_bit_changes_exactly_one_bit() {
        let mut model = FaultModel::new(SimulatorConfig::default());
        let original = vec![0u8; 64];
        let mut damaged = original.clone();
        model.flip_bit(&mut damaged);
        let diff: u32 = original
            .iter()
            .zip(&damaged)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert_eq!(diff, 1);
    }
}
