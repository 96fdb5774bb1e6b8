//! Error types for the gossip subsystem.

use thiserror::Error;

/// Gossip-level errors
///
/// A decode failure discards the single offending datagram; it never
/// affects other deltas or local store state.
#[derive(Debug, Error)]
pub enum GossipError {
    /// Datagram did not parse as a knowledge delta
    #[error("gossip decode error: {0}")]
    Decode(String),

    /// Record-set digest did not match the payload
    #[error("gossip digest mismatch from origin {origin}")]
    DigestMismatch {
        /// Claimed origin of the corrupt delta
        origin: String,
    },

    /// Delta larger than the transport will carry
    #[error("delta too large: {size} bytes, cap {cap}")]
    DeltaTooLarge {
        /// Encoded size
        size: usize,
        /// Transport cap
        cap: usize,
    },

    /// Socket-level failure
    #[error("gossip socket error: {0}")]
    Io(#[from] std::io::Error),
}
