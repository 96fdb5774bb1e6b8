//! Node configuration.
//!
//! Deserializes from the `[node]` / `[gossip]` / `[limits]` sections of a
//! TOML file; every field has a default so an empty file is a valid
//! configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;

use polyglot_core::{NodeId, StoreConfig, DEFAULT_MAX_BUFFER};
use polyglot_gossip::GossipConfig;

use crate::balance::BalanceConfig;
use crate::error::NodeError;

/// Top-level node configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity and surfaces
    pub node: NodeSection,
    /// Knowledge gossip
    pub gossip: GossipSection,
    /// Pool sizes, caps and learning tuning
    pub limits: LimitsSection,
}

/// `[node]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Fixed node id as 16 hex chars; random when absent
    pub id: Option<String>,
    /// Translation worker pool size
    pub workers: usize,
    /// Admin query listener address, empty string disables it
    pub admin_addr: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: None,
            workers: 4,
            admin_addr: "127.0.0.1:7070".to_string(),
        }
    }
}

/// `[gossip]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GossipSection {
    /// Whether to run the gossip tasks at all
    pub enabled: bool,
    /// Multicast group
    pub group: Ipv4Addr,
    /// Multicast port
    pub port: u16,
    /// Multicast TTL
    pub ttl: u32,
    /// Base send interval, seconds
    pub interval_secs: u64,
    /// Max random extra delay per round, seconds
    pub jitter_secs: u64,
}

impl Default for GossipSection {
    fn default() -> Self {
        let d = GossipConfig::default();
        Self {
            enabled: true,
            group: d.group,
            port: d.port,
            ttl: d.ttl,
            interval_secs: d.interval.as_secs(),
            jitter_secs: d.jitter.as_secs(),
        }
    }
}

/// `[limits]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Pending-session priority queue capacity
    pub queue_capacity: usize,
    /// Concurrent sessions allowed for never-seen fingerprints
    pub unknown_budget: usize,
    /// Per-session head-of-line buffer cap, bytes
    pub max_buffer: usize,
    /// Idle seconds before a session is cancelled
    pub idle_timeout_secs: u64,
    /// EMA learning rate
    pub learning_rate: f64,
    /// Confidence needed to trust a learned strategy over the default
    pub confidence_threshold: f64,
    /// Idle seconds before read-time confidence decay starts
    pub staleness_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            queue_capacity: 256,
            unknown_budget: 32,
            max_buffer: DEFAULT_MAX_BUFFER,
            idle_timeout_secs: 30,
            learning_rate: store.learning_rate,
            confidence_threshold: store.confidence_threshold,
            staleness_secs: store.staleness_window.as_secs(),
        }
    }
}

impl NodeConfig {
    /// Resolve the node id (configured or freshly random)
    pub fn node_id(&self) -> Result<NodeId, NodeError> {
        match &self.node.id {
            Some(hex) => {
                NodeId::from_hex(hex).ok_or(NodeError::Config("node.id must be 16 hex chars"))
            }
            None => Ok(NodeId::random()),
        }
    }

    /// Strategy store tuning derived from `[limits]`
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            learning_rate: self.limits.learning_rate,
            confidence_threshold: self.limits.confidence_threshold,
            staleness_window: Duration::from_secs(self.limits.staleness_secs.max(1)),
        }
    }

    /// Gossip transport settings derived from `[gossip]`
    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            group: self.gossip.group,
            port: self.gossip.port,
            ttl: self.gossip.ttl,
            interval: Duration::from_secs(self.gossip.interval_secs.max(1)),
            jitter: Duration::from_secs(self.gossip.jitter_secs),
        }
    }

    /// Load balancer settings derived from `[node]` and `[limits]`
    pub fn balance_config(&self) -> BalanceConfig {
        BalanceConfig {
            workers: self.node.workers.max(1),
            queue_capacity: self.limits.queue_capacity.max(1),
            unknown_budget: self.limits.unknown_budget,
            max_buffer: self.limits.max_buffer,
            idle_timeout: Duration::from_secs(self.limits.idle_timeout_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.node_id().is_ok());
        assert_eq!(config.balance_config().workers, 4);
        assert!(config.gossip.enabled);
    }

    #[test]
    fn test_bad_node_id_rejected() {
        let config = NodeConfig {
            node: NodeSection {
                id: Some("zz".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.node_id(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config = NodeConfig {
            node: NodeSection {
                workers: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.balance_config().workers, 1);
    }
}
