//! Connection finite-state machine (FSM) phases.
//!
//! Both roles walk the same phase sequence; which handshake phase they pass
//! through depends on who opened:
//!
//! ```text
//!            active open (sender)           passive open (receiver)
//!  CLOSED ──SYN sent──▶ SYN_SENT      CLOSED ──SYN rcvd──▶ SYN_RECEIVED
//!                          │ SYN+ACK                           │ ACK
//!                          ▼                                   ▼
//!                     ESTABLISHED ◀────────────────────── ESTABLISHED
//!                          │ FIN sent                          │ FIN rcvd
//!                          ▼                                   ▼
//!                      FIN_SENT ──FIN+ACK──▶ CLOSED       FIN_RECEIVED ──FIN+ACK sent──▶ CLOSED
//! ```
//!
//! Transitions are driven by [`crate::sender::Sender`] and
//! [`crate::receiver::Receiver`]; this module only names the phases.

use std::fmt;

/// All possible phases of one endpoint's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and terminal state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received; SYN+ACK sent; waiting for ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for FIN+ACK.
    FinSent,
    /// Peer's FIN received; local FIN (or FIN+ACK) still to go out.
    FinReceived,
}

impl ConnectionState {
    /// `true` while data segments may flow.
    pub fn is_synchronized(self) -> bool {
        matches!(
            self,
            ConnectionState::Established | ConnectionState::FinSent | ConnectionState::FinReceived
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinSent => "FIN_SENT",
            ConnectionState::FinReceived => "FIN_RECEIVED",
        };
        f.write_str(name)
    }
}
