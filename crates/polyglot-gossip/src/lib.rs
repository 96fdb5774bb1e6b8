//! # Polyglot Gossip
//!
//! Best-effort knowledge sharing between polyglot nodes.
//!
//! Each node periodically serializes the strategy records changed since
//! its last round into a [`KnowledgeDelta`] and broadcasts it to a UDP
//! multicast group; a continuous listener merges inbound deltas into the
//! local strategy store. Delivery is unreliable and unordered - the merge
//! rule is idempotent per fingerprint, so duplicates and replays are
//! harmless by construction.
//!
//! This crate provides:
//! - The self-describing JSON delta wire format (unknown fields ignored)
//! - The multicast transport (periodic sender + listener tasks)
//! - Per-origin duplicate/out-of-order accounting
//!
//! Deliberately absent: delivery guarantees and cryptographic peer
//! authentication. The delta digest detects corruption, nothing more.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod transport;
pub mod wire;

pub use error::GossipError;
pub use transport::{GossipConfig, GossipHandle, GossipStats, GossipTransport};
pub use wire::KnowledgeDelta;

/// Largest datagram the transport will send or accept
pub const MAX_DATAGRAM: usize = 60 * 1024;
