//! Error types for the polyglot core engine.

use thiserror::Error;

use crate::fingerprint::ProtocolId;
use crate::strategy::StrategyTag;

/// Translation-engine errors
///
/// Every variant maps to exactly one terminal failure kind; per-session
/// errors never escape the session that raised them.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// Input does not parse as the protocol the bound strategy expects
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Head-of-line buffer cap reached before a complete message formed
    #[error("buffer limit exceeded: {buffered} bytes buffered, limit {limit}")]
    BufferLimitExceeded {
        /// Bytes buffered when the cap was hit
        buffered: usize,
        /// Configured cap
        limit: usize,
    },

    /// Bound strategy cannot consume the detected payload protocol
    #[error("unsupported conversion: strategy {tag} cannot consume {detected:?} payload")]
    UnsupportedConversion {
        /// The strategy bound to the session
        tag: StrategyTag,
        /// Protocol actually detected in the payload
        detected: ProtocolId,
    },

    /// Operation not valid in the session's current state
    #[error("invalid session state for operation: {0}")]
    InvalidState(&'static str),
}

impl TranslateError {
    /// Failure kind for terminal-outcome accounting
    pub fn fail_kind(&self) -> FailKind {
        match self {
            Self::MalformedFrame(_) => FailKind::Malformed,
            Self::BufferLimitExceeded { .. } => FailKind::BufferLimit,
            Self::UnsupportedConversion { .. } => FailKind::Unsupported,
            Self::InvalidState(_) => FailKind::Malformed,
        }
    }
}

/// Compact failure classification carried on session outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailKind {
    /// Malformed or truncated input
    Malformed,
    /// Buffer cap exceeded
    BufferLimit,
    /// Strategy/payload mismatch
    Unsupported,
    /// Idle timeout or explicit cancellation
    Cancelled,
}
