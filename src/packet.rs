//! Probe packet format with sequence numbers and send timestamps.
//!
//! Every probe datagram starts with a fixed 16-byte header followed by an
//! arbitrary payload:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬─────────────┐
//! │   Sequence   │  Send time   │  Send time   │ Payload len  │   Payload   │
//! │  (4 bytes)   │ sec (4 bytes)│ µs (4 bytes) │  (4 bytes)   │ (variable)  │
//! └──────────────┴──────────────┴──────────────┴──────────────┴─────────────┘
//! ```
//!
//! - **Sequence**: monotonically increasing packet number within a test run,
//!   used for loss detection. If the receiver sees sequences [0, 1, 3, 4] it
//!   knows packet 2 was lost.
//! - **Send time**: wall-clock send timestamp split into whole seconds and
//!   microseconds since the UNIX epoch, used for one-way latency on the
//!   receiver. Round-trip time never trusts this field; the sender keeps its
//!   own record of when each sequence left.
//! - **Payload len**: the payload size the sender intended to attach. The
//!   field is informational; byte accounting always uses the datagram length
//!   the socket actually reported.
//!
//! All integers are serialized big-endian, so mixed-architecture endpoints
//! interoperate.
//!
//! # Examples
//!
//! ```
//! use udprobe::packet::{decode, ProbeHeader};
//!
//! let payload = vec![0xAB; 64];
//! let header = ProbeHeader::new(7, payload.len() as u32);
//!
//! let mut wire = Vec::new();
//! header.encode_into(&payload, &mut wire);
//! assert_eq!(wire.len(), ProbeHeader::SIZE + 64);
//!
//! let (parsed, body) = decode(&wire).unwrap();
//! assert_eq!(parsed.sequence, 7);
//! assert_eq!(body, &payload[..]);
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Largest UDP datagram that fits a 16-bit IP total length after IPv4 and UDP
/// headers (65535 - 20 - 8).
pub const MAX_DATAGRAM: usize = 65507;

/// Largest payload a probe can carry alongside its header.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - ProbeHeader::SIZE;

/// Fixed-layout header prepended to every probe datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHeader {
    /// Packet sequence number (monotonically increasing per run)
    pub sequence: u32,
    /// Send time, whole seconds since the UNIX epoch
    pub timestamp_sec: u32,
    /// Send time, microsecond remainder (0..1_000_000)
    pub timestamp_usec: u32,
    /// Payload size the sender declared
    pub payload_len: u32,
}

impl ProbeHeader {
    /// Size of the serialized header in bytes
    pub const SIZE: usize = 16;

    /// Creates a header stamped with the current wall clock.
    pub fn new(sequence: u32, payload_len: u32) -> Self {
        Self::with_timestamp(sequence, wall_micros(), payload_len)
    }

    /// Creates a header with an explicit send timestamp in microseconds
    /// since the UNIX epoch.
    pub fn with_timestamp(sequence: u32, micros: u64, payload_len: u32) -> Self {
        Self {
            sequence,
            timestamp_sec: (micros / 1_000_000) as u32,
            timestamp_usec: (micros % 1_000_000) as u32,
            payload_len,
        }
    }

    /// The embedded send timestamp as microseconds since the UNIX epoch.
    pub fn timestamp_micros(&self) -> u64 {
        self.timestamp_sec as u64 * 1_000_000 + self.timestamp_usec as u64
    }

    /// Serializes the header to bytes (big-endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.timestamp_sec.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.timestamp_usec.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.payload_len.to_be_bytes());
        bytes
    }

    /// Deserializes a header from the front of a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPacket`] when fewer than
    /// [`ProbeHeader::SIZE`] bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::MalformedPacket { len: bytes.len() });
        }

        let field = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Ok(Self {
            sequence: field(0),
            timestamp_sec: field(4),
            timestamp_usec: field(8),
            payload_len: field(12),
        })
    }

    /// Serializes the header followed by `payload` into a caller-owned
    /// buffer. The buffer is cleared first and the codec never keeps a
    /// reference to it, so the same `Vec` can be reused for every send.
    pub fn encode_into(&self, payload: &[u8], out: &mut Vec<u8>) {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        out.clear();
        out.reserve(Self::SIZE + payload.len());
        out.extend_from_slice(&self.to_bytes());
        out.extend_from_slice(payload);
    }
}

/// Splits a received datagram into header and payload.
///
/// The payload slice is everything after the header, whatever the header's
/// declared length says; the actual transferred length is authoritative.
///
/// # Errors
///
/// Returns [`Error::MalformedPacket`] for datagrams shorter than the header.
pub fn decode(datagram: &[u8]) -> Result<(ProbeHeader, &[u8])> {
    let header = ProbeHeader::from_bytes(datagram)?;
    Ok((header, &datagram[ProbeHeader::SIZE..]))
}

/// Current wall-clock time in microseconds since the UNIX epoch.
///
/// Send stamps, receive stamps and latency math all use this one clock.
pub fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
