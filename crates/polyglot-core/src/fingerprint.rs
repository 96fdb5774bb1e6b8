//! Structural fingerprinting of raw frames.
//!
//! A fingerprint is the "protocol DNA" of a frame: transport kind, a
//! byte-length bucket, a hash over the leading payload bytes, and the
//! observed port. Fingerprinting is total and deterministic - the same
//! bytes always yield the same fingerprint, and frames that fit no known
//! shape land in the `Unknown` transport bucket instead of erroring.

use serde::{Deserialize, Serialize};

use crate::FINGERPRINT_PREFIX_LEN;

/// Transport layer a frame arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Stream transport
    Tcp,
    /// Datagram transport
    Udp,
    /// Capture layer could not tell
    Unknown,
}

/// Opaque flow identifier assigned by the capture collaborator
///
/// Derived upstream from the transport 4/5-tuple (or an explicit stream
/// id); the engine only needs equality and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u64);

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One raw frame as delivered by the capture collaborator
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Flow this frame belongs to (strict order within a flow)
    pub flow: FlowId,
    /// Transport the frame arrived on
    pub transport: TransportKind,
    /// Observed destination port
    pub port: u16,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Set on the last frame of a flow (explicit close)
    pub fin: bool,
}

/// Compact structural signature of a frame
///
/// Equality and hashing are structural; this is the key into the strategy
/// store and must stay cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Transport kind
    pub transport: TransportKind,
    /// log2 bucket of the payload length (0 for empty)
    pub len_bucket: u8,
    /// blake3 hash over the first [`FINGERPRINT_PREFIX_LEN`] payload bytes
    pub prefix_hash: u32,
    /// Observed destination port
    pub port: u16,
}

impl Fingerprint {
    /// Derive the fingerprint of a raw frame
    ///
    /// Pure function: no I/O, no clock, no randomness.
    pub fn of(frame: &RawFrame) -> Self {
        let payload = &frame.payload;
        let len_bucket = if payload.is_empty() {
            0
        } else {
            (usize::BITS - payload.len().leading_zeros()) as u8
        };
        let prefix = &payload[..payload.len().min(FINGERPRINT_PREFIX_LEN)];
        let digest = blake3::hash(prefix);
        let prefix_hash = u32::from_be_bytes(
            digest.as_bytes()[..4]
                .try_into()
                .unwrap_or([0u8; 4]),
        );
        Self {
            transport: frame.transport,
            len_bucket,
            prefix_hash,
            port: frame.port,
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/{}/{:08x}/{}",
            self.transport, self.len_bucket, self.prefix_hash, self.port
        )
    }
}

/// Protocols the engine can recognise in a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolId {
    /// HTTP/1.x request text
    Http,
    /// MQTT control packet
    Mqtt,
    /// Minimal chain-ledger transaction record
    Ledger,
    /// Raw TCP/IPv4 payload
    Tcp,
    /// No recognisable shape
    Unknown,
}

impl ProtocolId {
    /// Sniff the protocol from leading payload bytes
    ///
    /// Total and deterministic, like fingerprinting. Recognition is
    /// shape-based only - this is classification input, not validation.
    pub fn detect(payload: &[u8]) -> Self {
        if payload.is_empty() {
            return Self::Unknown;
        }
        if payload.starts_with(b"HTTP") || starts_with_http_method(payload) {
            return Self::Http;
        }
        match payload[0] {
            // MQTT CONNECT / PUBLISH (QoS 0-2) fixed headers
            0x10 | 0x30 | 0x32 | 0x34 => Self::Mqtt,
            0x02 => Self::Ledger,
            0x45 => Self::Tcp,
            _ => Self::Unknown,
        }
    }
}

fn starts_with_http_method(payload: &[u8]) -> bool {
    const METHODS: [&[u8]; 7] = [
        b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ",
    ];
    METHODS.iter().any(|m| payload.starts_with(m))
}
