//! Async connection drivers.
//!
//! The engines in [`crate::sender`] and [`crate::receiver`] are pure state
//! machines.  This module puts them on a [`Socket`] and runs them:
//!
//! ```text
//!                 SenderConnection (one task, three futures)
//!  ┌──────────────┐    ┌──────────────────────┐    ┌──────────────────┐
//!  │  feed loop   │    │  ack loop            │    │  timer loop      │
//!  │ source.read  │    │ socket.recv_from     │    │ sleep(poll)      │
//!  │ → submit()   │    │ → on_segment()       │    │ → poll_timers()  │
//!  └──────┬───────┘    └──────────┬───────────┘    └────────┬─────────┘
//!         │        lock, mutate, unlock, then send          │
//!         └──────────────▶ Mutex<Sender> ◀──────────────────┘
//! ```
//!
//! The three futures are multiplexed with `tokio::select!` on the calling
//! task.  The engine mutex is only held for the state transition itself and
//! is always released before the resulting packets hit the socket.
//!
//! [`ReceiverConnection`] needs no lock: one loop owns the engine.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout, MissedTickBehavior};

use crate::config::Config;
use crate::error::{HandshakeError, TransferError};
use crate::packet::Packet;
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::stats::TransferStats;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// One datagram off the wire.
enum Inbound {
    Segment(Packet, SocketAddr),
    /// Failed checksum or length validation.
    Corrupt,
}

async fn recv_inbound(socket: &Socket) -> Result<Inbound, SocketError> {
    match socket.recv_from().await {
        Ok((packet, from)) => Ok(Inbound::Segment(packet, from)),
        Err(e) if e.is_corrupt() => Ok(Inbound::Corrupt),
        Err(e) => Err(e),
    }
}

/// Fill `buf` from `source`, short only at end of stream.
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// SenderConnection
// ---------------------------------------------------------------------------

/// Active side of a transfer.
///
/// Obtain one with [`SenderConnection::connect`], then stream a source
/// through it with [`SenderConnection::transfer`].
pub struct SenderConnection {
    socket: Socket,
    peer: SocketAddr,
    config: Config,
    sender: Mutex<Sender>,
    /// Signalled whenever an ACK may have drained the pending queue.
    window_open: Notify,
}

impl SenderConnection {
    /// Run the three-way handshake with `peer`.
    ///
    /// Each attempt sends a fresh SYN and waits
    /// `config.handshake.attempt_timeout` for a valid SYN+ACK.  A wrong or
    /// missing reply starts the next attempt.  With
    /// `config.handshake.max_attempts` unset this retries forever.
    pub async fn connect(
        socket: Socket,
        peer: SocketAddr,
        config: Config,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let mut sender = Sender::new(&config, Instant::now());
        let mut attempt: u32 = 0;

        loop {
            if let Some(max) = config.handshake.max_attempts {
                if attempt >= max {
                    log::error!("[snd] no handshake with {peer} after {max} attempts");
                    return Err(TransferError::HandshakeAttemptsExhausted(max));
                }
            }
            attempt += 1;

            let syn = sender.open(Instant::now());
            socket.send_to(&syn, peer).await?;

            let reply = timeout(
                config.handshake.attempt_timeout,
                Self::await_reply(&socket, peer, &mut sender),
            )
            .await;

            let err = match reply {
                Ok(Ok(packet)) => match sender.on_syn_ack(&packet, Instant::now()) {
                    Ok(ack) => {
                        socket.send_to(&ack, peer).await?;
                        break;
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => HandshakeError::TimedOut,
            };
            log::warn!("[snd] handshake attempt {attempt} with {peer} failed: {err}");
        }

        log::info!("[snd] connected to {peer}, rto={:?}", sender.rto());
        Ok(Self {
            socket,
            peer,
            config,
            sender: Mutex::new(sender),
            window_open: Notify::new(),
        })
    }

    /// Next valid segment from `peer`; corrupt datagrams are counted and
    /// skipped.
    async fn await_reply(
        socket: &Socket,
        peer: SocketAddr,
        sender: &mut Sender,
    ) -> Result<Packet, SocketError> {
        loop {
            match recv_inbound(socket).await? {
                Inbound::Segment(packet, from) if from == peer => return Ok(packet),
                Inbound::Segment(_, from) => log::debug!("[snd] ignoring datagram from {from}"),
                Inbound::Corrupt => sender.record_corrupt(),
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub async fn state(&self) -> ConnectionState {
        self.sender.lock().await.state
    }

    /// Snapshot of the counters so far.
    pub async fn stats(&self) -> TransferStats {
        self.sender.lock().await.stats.clone()
    }

    /// Stream `source` to the peer, then tear the connection down.
    ///
    /// Resolves once our FIN has been acknowledged or has exhausted its
    /// retransmissions, or with the first fatal error (I/O failure or a
    /// DATA segment exhausting its retransmissions).
    pub async fn transfer<R: AsyncRead + Unpin>(
        self,
        mut source: R,
    ) -> Result<TransferStats, TransferError> {
        let result = {
            let feed = self.feed(&mut source);
            let acks = self.ack_loop();
            let timers = self.timer_loop();
            tokio::pin!(feed, acks, timers);

            let mut fed = false;
            loop {
                tokio::select! {
                    res = &mut feed, if !fed => match res {
                        Ok(()) => fed = true,
                        Err(e) => break Err(e),
                    },
                    res = &mut acks => break res,
                    res = &mut timers => break res,
                }
            }
        };

        let stats = self.sender.into_inner().stats;
        match result {
            Ok(()) => {
                log::info!("[snd] transfer to {} complete", self.peer);
                Ok(stats)
            }
            Err(e) => {
                log::error!("[snd] transfer to {} failed: {e}", self.peer);
                Err(e)
            }
        }
    }

    /// Read the source in payload-sized chunks and hand them to the engine.
    ///
    /// Pauses while a full window of segments is already queued.
    async fn feed<R: AsyncRead + Unpin>(&self, source: &mut R) -> Result<(), TransferError> {
        let mut buf = vec![0u8; self.config.max_payload()];
        loop {
            loop {
                {
                    let sender = self.sender.lock().await;
                    if sender.backlog() < sender.window() {
                        break;
                    }
                }
                self.window_open.notified().await;
            }

            let n = read_chunk(source, &mut buf).await?;
            if n == 0 {
                let fin = self.sender.lock().await.close_stream(Instant::now());
                if let Some(fin) = fin {
                    self.socket.send_to(&fin, self.peer).await?;
                }
                log::debug!("[snd] source exhausted");
                return Ok(());
            }

            let admitted = self
                .sender
                .lock()
                .await
                .submit(buf[..n].to_vec(), Instant::now())?;
            if let Some(packet) = admitted {
                self.socket.send_to(&packet, self.peer).await?;
            }
        }
    }

    /// Feed inbound segments to the engine until the FIN is acknowledged.
    async fn ack_loop(&self) -> Result<(), TransferError> {
        loop {
            let (packet, from) = match recv_inbound(&self.socket).await? {
                Inbound::Segment(packet, from) => (packet, from),
                Inbound::Corrupt => {
                    self.sender.lock().await.record_corrupt();
                    continue;
                }
            };
            if from != self.peer {
                log::debug!("[snd] ignoring datagram from {from}");
                continue;
            }

            let outcome = self.sender.lock().await.on_segment(&packet, Instant::now());
            self.window_open.notify_one();
            self.socket.send_all(&outcome.transmit, self.peer).await?;
            if outcome.finished {
                return Ok(());
            }
        }
    }

    /// Scan the segment store once per poll interval and resend what expired.
    ///
    /// Returns once an unanswered FIN has been given up on.
    async fn timer_loop(&self) -> Result<(), TransferError> {
        let mut ticker = tokio::time::interval(self.config.timer.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = self.sender.lock().await.poll_timers(Instant::now())?;
            if !outcome.transmit.is_empty() {
                log::debug!("[snd] timeout, resending {} segment(s)", outcome.transmit.len());
                self.socket.send_all(&outcome.transmit, self.peer).await?;
            }
            if outcome.finished {
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverConnection
// ---------------------------------------------------------------------------

/// Passive side of a transfer.
///
/// Waits for a SYN from any address, then serves that peer only until its
/// FIN arrives.
pub struct ReceiverConnection {
    socket: Socket,
    receiver: Receiver,
    peer: Option<SocketAddr>,
}

impl ReceiverConnection {
    pub fn new(socket: Socket, config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            socket,
            receiver: Receiver::new(&config),
            peer: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Accept one connection and write its byte stream to `sink`.
    ///
    /// Resolves with the final statistics once the peer's FIN has been
    /// answered and `sink` flushed.
    pub async fn run<W: AsyncWrite + Unpin>(
        mut self,
        sink: &mut W,
    ) -> Result<TransferStats, TransferError> {
        log::info!("[rcv] listening on {}", self.socket.local_addr);
        loop {
            let (packet, from) = match recv_inbound(&self.socket).await? {
                Inbound::Segment(packet, from) => (packet, from),
                Inbound::Corrupt => {
                    self.receiver.record_corrupt();
                    continue;
                }
            };
            if matches!(self.peer, Some(peer) if peer != from) {
                log::debug!("[rcv] ignoring datagram from {from}");
                continue;
            }

            let reception = self.receiver.on_segment(packet);
            if let Some(err) = &reception.rejected {
                log::warn!("[rcv] rejected segment from {from}: {err}");
                continue;
            }
            if self.peer.is_none() && self.receiver.state == ConnectionState::SynReceived {
                log::info!("[rcv] SYN from {from}");
                self.peer = Some(from);
            }

            for chunk in &reception.deliver {
                sink.write_all(chunk).await?;
            }
            if let Some(reply) = &reception.reply {
                self.socket.send_to(reply, from).await?;
            }
            if reception.finished {
                sink.flush().await?;
                log::info!(
                    "[rcv] transfer from {from} complete, {} bytes",
                    self.receiver.stats.bytes_received
                );
                return Ok(self.receiver.stats);
            }
        }
    }
}
