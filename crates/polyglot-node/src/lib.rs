//! # Polyglot Node
//!
//! Runtime around the translation engine: strategy decisions, priority
//! admission onto a bounded worker pool, knowledge gossip wiring, outcome
//! storage, and a read-only admin query surface.
//!
//! ```text
//!  frames ──▶ Balancer ──▶ workers ──▶ converted output
//!                │            │
//!                ▼            ▼ outcomes
//!          DecisionAgent ◀────┘
//!                │
//!        StrategyStore ◀──▶ gossip peers
//! ```
//!
//! Construct a [`Node`] from a [`NodeConfig`] and an [`OutcomeStore`];
//! everything else is wired internally and torn down by
//! [`Node::shutdown`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod agent;
pub mod balance;
pub mod config;
pub mod error;
pub mod node;
pub mod storage;

pub use admin::{AdminContext, AdminServer};
pub use agent::{Decision, DecisionAgent};
pub use balance::{BalanceConfig, BalanceSnapshot, BalanceStats, Balancer, Translated};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::Node;
pub use storage::{JsonlStore, MemoryStore, OutcomeStore};
