//! `tcpend` — reliable file transfer over UDP.
//!
//! A minimal TCP: three-way handshake, sliding-window transfer with
//! cumulative ACKs, out-of-order buffering at the receiver, per-segment
//! retransmission timers driven by a smoothed RTT estimate, fast retransmit,
//! and a FIN-based teardown.
//!
//! # Architecture
//!
//! ```text
//!  source ──▶ ┌──────────┐   DATA    ┌──────────┐ ──▶ sink
//!             │  Sender  │──────────▶│ Receiver │
//!             │  engine  │◀──────────│  engine  │
//!             └────┬─────┘   ACKs    └─────┬────┘
//!                  │ Mutex, 3 loops         │ single loop
//!  ┌───────────────▼────────────────────────▼──────────┐
//!  │                    connection                     │
//!  └───────────────┬────────────────────────┬──────────┘
//!                  │ Packet                 │ Packet
//!             ┌────▼─────┐             ┌────▼─────┐
//!             │  Socket  │◀── UDP ────▶│  Socket  │
//!             └──────────┘             └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — 24-byte wire header, flags, Internet checksum
//! - [`state`]      — connection phases
//! - [`timer`]      — retransmit timers, RTT estimator, timestamp clock
//! - [`store`]      — unacknowledged segments and the pending-send queue
//! - [`sender`]     — send-side engine (window, retransmission, teardown)
//! - [`receiver`]   — receive-side engine (reassembly, reorder buffer)
//! - [`connection`] — async drivers putting the engines on a socket
//! - [`socket`]     — async UDP socket speaking `Packet`s
//! - [`simulator`]  — lossy UDP relay for exercising recovery
//! - [`config`], [`stats`], [`error`] — settings, counters, error types

pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod store;
pub mod timer;
