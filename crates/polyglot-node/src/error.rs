//! Node-level error types.

use thiserror::Error;

use polyglot_core::TranslateError;
use polyglot_gossip::GossipError;

/// Errors surfaced by the node runtime
#[derive(Debug, Error)]
pub enum NodeError {
    /// Load balancer refused to take the session
    #[error("admission rejected: {0}")]
    AdmissionRejected(&'static str),

    /// Translation-layer failure
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// Gossip subsystem failure during startup
    #[error(transparent)]
    Gossip(#[from] GossipError),

    /// Admin listener or storage I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration did not validate
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}
