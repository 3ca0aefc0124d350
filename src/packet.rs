//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated or corrupted input.
//! - Classifying a decoded segment into a [`SegmentKind`] once, so handlers
//!   match on a closed set instead of re-testing flag bits.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                           Timestamp                           +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Payload Length                  |S|F|A|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Reserved (0)        |            Checksum           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.
//! seq(4) + ack(4) + timestamp(8) + length|flags(4) + reserved(2) + checksum(2)

use std::fmt;

use thiserror::Error;

/// Bit-flag constants for the low three bits of the length/flags word.
pub mod flags {
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b001;
    /// Finish — sender has no more data to send.
    pub const FIN: u8 = 0b010;
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b100;
    /// Every bit the flag field can hold.
    pub const MASK: u8 = 0b111;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Number of low bits of the length/flags word taken by [`flags`].
const FLAG_BITS: u32 = 3;

/// Largest payload the 29-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = (1 << (32 - FLAG_BITS)) - 1;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_TIMESTAMP: usize = 8;
const OFF_LEN_FLAGS: usize = 16;
const OFF_RESERVED: usize = 20;
const OFF_CHECKSUM: usize = 22;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of the first payload byte in this segment.
    pub seq: u32,
    /// Acknowledgement number (next expected sequence number from the peer).
    pub ack: u32,
    /// Sender clock reading at creation, echoed back by the peer.
    pub timestamp: u64,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Length of the payload in bytes.
    ///
    /// On encode this is computed from the actual payload length.
    /// On decode this is validated against the remaining buffer bytes.
    pub payload_len: u32,
    /// Internet checksum (RFC 1071) over the entire serialised packet.
    ///
    /// On encode this is computed and written last.
    /// On decode this is verified before the packet is returned.
    pub checksum: u16,
}

impl Header {
    /// Write the header (checksum field zeroed) into the first
    /// [`HEADER_LEN`] bytes of `buf`.
    fn write_to(&self, buf: &mut [u8], payload_len: u32) {
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8].copy_from_slice(&self.timestamp.to_be_bytes());
        let word = (payload_len << FLAG_BITS) | u32::from(self.flags & flags::MASK);
        buf[OFF_LEN_FLAGS..OFF_LEN_FLAGS + 4].copy_from_slice(&word.to_be_bytes());
        buf[OFF_RESERVED..OFF_RESERVED + 2].copy_from_slice(&0u16.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
    }

    /// Parse the fixed header fields from a buffer of at least
    /// [`HEADER_LEN`] bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }
        let word = read_u32(buf, OFF_LEN_FLAGS);
        Ok(Header {
            seq: read_u32(buf, OFF_SEQ),
            ack: read_u32(buf, OFF_ACK),
            timestamp: u64::from_be_bytes([
                buf[OFF_TIMESTAMP],
                buf[OFF_TIMESTAMP + 1],
                buf[OFF_TIMESTAMP + 2],
                buf[OFF_TIMESTAMP + 3],
                buf[OFF_TIMESTAMP + 4],
                buf[OFF_TIMESTAMP + 5],
                buf[OFF_TIMESTAMP + 6],
                buf[OFF_TIMESTAMP + 7],
            ]),
            flags: (word & u32::from(flags::MASK)) as u8,
            payload_len: word >> FLAG_BITS,
            checksum: u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]),
        })
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// The closed set of segment shapes the engines react to.
///
/// Decided once per inbound segment from its decoded flags and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Syn,
    SynAck,
    Fin,
    FinAck,
    /// Zero-length segment carrying only an acknowledgement.
    Ack,
    /// Segment carrying payload bytes (usually with ACK piggybacked).
    Data,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Syn => "SYN",
            SegmentKind::SynAck => "SYN+ACK",
            SegmentKind::Fin => "FIN",
            SegmentKind::FinAck => "FIN+ACK",
            SegmentKind::Ack => "ACK",
            SegmentKind::Data => "DATA",
        };
        f.write_str(name)
    }
}

impl Packet {
    /// Build a packet; `payload_len` and `checksum` are filled in on encode.
    pub fn new(seq: u32, ack: u32, timestamp: u64, flags: u8, payload: Vec<u8>) -> Self {
        Packet {
            header: Header {
                seq,
                ack,
                timestamp,
                flags,
                payload_len: 0,
                checksum: 0,
            },
            payload,
        }
    }

    /// Build a zero-length control segment.
    pub fn control(seq: u32, ack: u32, timestamp: u64, flags: u8) -> Self {
        Self::new(seq, ack, timestamp, flags, Vec::new())
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// `header.payload_len` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }
        let payload_len = self.payload.len() as u32;
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        // Checksum field is zero while computing the checksum.
        self.header.write_to(&mut buf, payload_len);
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the checksum does not verify, or
    /// - the length field disagrees with `buf.len()`.
    ///
    /// The checksum is checked before the length so that any corrupted bit,
    /// including one inside the length field, reports as
    /// [`PacketError::ChecksumFailed`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::parse(buf)?;

        if !verify_checksum(buf) {
            return Err(PacketError::ChecksumFailed);
        }
        if buf.len() != HEADER_LEN + header.payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }

        Ok(Packet {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Classify the segment by its flags and payload.
    ///
    /// Returns `None` for a zero-length segment with no flags set, which no
    /// peer ever emits.
    pub fn kind(&self) -> Option<SegmentKind> {
        let h = &self.header;
        let kind = if h.has(flags::SYN) {
            if h.has(flags::ACK) {
                SegmentKind::SynAck
            } else {
                SegmentKind::Syn
            }
        } else if h.has(flags::FIN) {
            if h.has(flags::ACK) {
                SegmentKind::FinAck
            } else {
                SegmentKind::Fin
            }
        } else if !self.payload.is_empty() {
            SegmentKind::Data
        } else if h.has(flags::ACK) {
            SegmentKind::Ack
        } else {
            return None;
        };
        Some(kind)
    }

    /// Flag columns in `S A F D` order, `-` for an absent flag.
    ///
    /// Used for the per-segment event lines.
    pub fn flag_list(&self) -> String {
        let h = &self.header;
        let col = |set: bool, c: char| if set { c } else { '-' };
        format!(
            "{} {} {} {}",
            col(h.has(flags::SYN), 'S'),
            col(h.has(flags::ACK), 'A'),
            col(h.has(flags::FIN), 'F'),
            col(!self.payload.is_empty(), 'D'),
        )
    }

    /// Number of sequence numbers this segment occupies.
    ///
    /// SYN and FIN each consume one; DATA consumes its payload length.
    pub fn seq_len(&self) -> u32 {
        if self.header.has(flags::SYN) || self.header.has(flags::FIN) {
            1
        } else {
            self.payload.len() as u32
        }
    }
}

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// Length field does not match the actual remaining bytes.
    #[error("length field does not match remaining bytes")]
    LengthMismatch,
    /// Checksum did not match recomputed value.
    #[error("checksum verification failed")]
    ChecksumFailed,
    /// Payload cannot be described by the 29-bit length field.
    #[error("payload of {0} bytes exceeds the length field")]
    PayloadTooLarge(usize),
}

/// Recompute the checksum of an encoded segment and compare it with the
/// stored one.
///
/// Works on a copy with the checksum field zeroed; `buf` is not modified.
/// Returns `false` for buffers shorter than the header.
pub fn verify_checksum(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LEN {
        return false;
    }
    let stored = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
    let mut scratch = buf.to_vec();
    scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
    internet_checksum(&scratch) == stored
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte — pad with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u64::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
