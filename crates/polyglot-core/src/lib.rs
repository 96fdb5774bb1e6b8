//! # Polyglot Core
//!
//! Core translation engine for the polyglot protocol gateway.
//!
//! This crate provides:
//! - Structural fingerprinting of raw frames ("protocol DNA")
//! - The strategy store (fingerprint -> best-known translation strategy)
//! - The per-session translation state machine
//! - Per-pair protocol codecs (HTTP, MQTT, ledger wire, structured records)
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Session                                  │
//! │   (per-flow state machine driving one translation strategy)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Codecs                                   │
//! │   (explicit field mapping per supported protocol pair)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Strategy Store                              │
//! │   (shared, per-fingerprint atomic, gossip-mergeable)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convert;
pub mod error;
pub mod fingerprint;
pub mod session;
pub mod strategy;

pub use error::{FailKind, TranslateError};
pub use fingerprint::{Fingerprint, FlowId, ProtocolId, RawFrame, TransportKind};
pub use session::{Session, SessionId, SessionOutcome, SessionState};
pub use strategy::{
    MergeReport, NodeId, StoreConfig, StrategyRecord, StrategyStore, StrategyTag,
};

/// Learning rate for the exponential-moving-average confidence update
pub const LEARNING_RATE: f64 = 0.1;

/// Confidence required before a stored strategy is trusted over the default
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Confidence prior for a fingerprint never seen before (conservative: zero)
pub const NEW_FINGERPRINT_PRIOR: f64 = 0.0;

/// Default head-of-line buffer cap per session
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Number of leading payload bytes hashed into the fingerprint
pub const FINGERPRINT_PREFIX_LEN: usize = 8;
