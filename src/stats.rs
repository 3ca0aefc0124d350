//! End-of-transfer counters.
//!
//! Purely observational: nothing in the engines branches on these values.

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Payload bytes put on the wire for the first time.
    pub bytes_sent: u64,
    /// Payload bytes delivered in order to the sink.
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// DATA segments transmitted, retransmissions included.
    pub data_segments_sent: u64,
    pub retransmissions: u64,
    /// DATA segments that arrived ahead of the cumulative ACK point.
    pub out_of_sequence: u64,
    pub checksum_discards: u64,
    pub duplicate_acks: u64,
    /// SYNs sent (sender) or answered (receiver).
    pub handshakes: u64,
    /// FINs originated (sender) or answered (receiver).
    pub teardowns: u64,
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Final statistics:")?;
        writeln!(f, "  Total Data Transferred:                   {} bytes", self.bytes_sent)?;
        writeln!(f, "  Total Data Received:                      {} bytes", self.bytes_received)?;
        writeln!(f, "  Total Packets Sent:                       {} packets", self.packets_sent)?;
        writeln!(f, "  Total Packets Received:                   {} packets", self.packets_received)?;
        writeln!(f, "  Total Out-of-Sequence Packets:            {} packets", self.out_of_sequence)?;
        writeln!(f, "  Total Packets Discarded Due To Checksum:  {} packets", self.checksum_discards)?;
        writeln!(f, "  Total Number of Retransmissions:          {} retransmits", self.retransmissions)?;
        write!(f, "  Total Duplicate Acknowledgements:         {} ACKs", self.duplicate_acks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_every_counter() {
        let stats = TransferStats {
            bytes_sent: 10_000,
            retransmissions: 3,
            checksum_discards: 2,
            ..TransferStats::default()
        };
        let report = stats.to_string();
        assert!(report.contains("10000 bytes"));
        assert!(report.contains("3 retransmits"));
        assert!(report.contains("Checksum:  2 packets"));
        assert_eq!(report.lines().count(), 9);
    }
}
