//! Strategy store: fingerprint -> best-known translation strategy.
//!
//! The store is the only shared mutable state between translation workers
//! and the gossip components. All mutation goes through per-fingerprint
//! atomic operations (dashmap entry API); there is no global ordering
//! across fingerprints and none is needed.
//!
//! Confidence follows an exponential moving average driven by session
//! outcomes, and decays at read time once a record sits unused past the
//! staleness window - decay is a read-side computation, never a
//! background sweep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, ProtocolId};
use crate::{CONFIDENCE_THRESHOLD, LEARNING_RATE, NEW_FINGERPRINT_PRIOR};

/// Unix milliseconds now
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Node identifier for knowledge provenance
///
/// Eight random bytes chosen at startup; rendered as hex on the wire and
/// in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; 8]);

impl NodeId {
    /// Generate a fresh random node id
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Parse from a 16-char hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid node id hex"))
    }
}

/// Closed set of supported translation strategies
///
/// New protocol pairs are added as new variants; dispatch is a match on
/// the tag, not dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    /// HTTP request -> MQTT PUBLISH
    HttpToMqtt,
    /// MQTT PUBLISH -> HTTP request
    MqttToHttp,
    /// HTTP request -> minimal chain-ledger record
    HttpToLedger,
    /// Raw TCP bytes -> structured JSON record
    TcpToRecord,
    /// Echo (default strategy for unclassified traffic)
    Passthrough,
}

impl StrategyTag {
    /// Protocol this strategy consumes
    pub fn source(&self) -> ProtocolId {
        match self {
            Self::HttpToMqtt | Self::HttpToLedger => ProtocolId::Http,
            Self::MqttToHttp => ProtocolId::Mqtt,
            Self::TcpToRecord => ProtocolId::Tcp,
            Self::Passthrough => ProtocolId::Unknown,
        }
    }

    /// Whether this strategy can consume a payload detected as `detected`
    ///
    /// Passthrough and the raw-record strategy accept anything; the others
    /// accept their source protocol plus payloads the sniffer could not
    /// classify (which then fail or succeed on their own merits).
    pub fn accepts(&self, detected: ProtocolId) -> bool {
        match self {
            Self::Passthrough | Self::TcpToRecord => true,
            _ => detected == self.source() || detected == ProtocolId::Unknown,
        }
    }

    /// Default strategy for a detected source protocol
    ///
    /// Mirrors the fallback routing table used before any knowledge has
    /// been learned: HTTP pairs with MQTT, MQTT with HTTP, ledger traffic
    /// is surfaced over HTTP, raw TCP becomes structured records.
    pub fn default_for(detected: ProtocolId) -> Self {
        match detected {
            ProtocolId::Http => Self::HttpToMqtt,
            ProtocolId::Mqtt => Self::MqttToHttp,
            ProtocolId::Ledger => Self::MqttToHttp,
            ProtocolId::Tcp => Self::TcpToRecord,
            ProtocolId::Unknown => Self::Passthrough,
        }
    }
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::HttpToMqtt => "http->mqtt",
            Self::MqttToHttp => "mqtt->http",
            Self::HttpToLedger => "http->ledger",
            Self::TcpToRecord => "tcp->record",
            Self::Passthrough => "passthrough",
        };
        f.write_str(s)
    }
}

/// One learned fingerprint-to-strategy mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    /// Fingerprint this record is keyed by
    pub fingerprint: Fingerprint,
    /// Best-known strategy for this fingerprint
    pub tag: StrategyTag,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Number of outcomes folded into the confidence
    pub samples: u64,
    /// Last update, unix milliseconds
    pub updated_at: u64,
    /// Node that produced the current values
    pub origin: NodeId,
}

impl StrategyRecord {
    fn fresh(fingerprint: Fingerprint, tag: StrategyTag, origin: NodeId) -> Self {
        Self {
            fingerprint,
            tag,
            confidence: NEW_FINGERPRINT_PRIOR,
            samples: 0,
            updated_at: now_ms(),
            origin,
        }
    }

    /// Pairwise merge rule: does `remote` beat `local`?
    ///
    /// Higher (confidence, samples) lexicographic wins; exact tie goes to
    /// the newer timestamp; full tie keeps the local record (stability
    /// bias, so repeated gossip of equivalent knowledge cannot oscillate).
    pub fn beats(remote: &Self, local: &Self) -> bool {
        match remote.confidence.total_cmp(&local.confidence) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => match remote.samples.cmp(&local.samples) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => remote.updated_at > local.updated_at,
            },
        }
    }
}

/// Result of merging one remote delta, for observability
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Records inserted (no local record existed)
    pub added: u64,
    /// Records where the remote copy replaced the local one
    pub updated: u64,
    /// Records where the local copy was retained
    pub rejected: u64,
}

/// Strategy store tuning
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// EMA learning rate for outcome recording
    pub learning_rate: f64,
    /// Confidence needed before a stored strategy beats the default
    pub confidence_threshold: f64,
    /// Idle window after which read-time decay starts
    pub staleness_window: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            learning_rate: LEARNING_RATE,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            staleness_window: Duration::from_secs(600),
        }
    }
}

/// In-memory mapping from fingerprint to best-known strategy
///
/// Safe for concurrent use from workers and the gossip tasks; state
/// transitions are atomic per fingerprint. The store never holds two
/// records for the same fingerprint.
pub struct StrategyStore {
    records: DashMap<Fingerprint, StrategyRecord>,
    dirty: DashSet<Fingerprint>,
    config: StoreConfig,
    node_id: NodeId,
}

impl StrategyStore {
    /// Create an empty store owned by `node_id`
    pub fn new(node_id: NodeId, config: StoreConfig) -> Self {
        Self {
            records: DashMap::new(),
            dirty: DashSet::new(),
            config,
            node_id,
        }
    }

    /// Local node id (origin stamped on locally learned records)
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Store tuning in effect
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of known fingerprints
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Non-blocking read with read-time staleness decay applied
    ///
    /// The stored record is not mutated; the returned copy carries the
    /// decayed confidence.
    pub fn lookup(&self, fp: &Fingerprint) -> Option<StrategyRecord> {
        self.records.get(fp).map(|r| {
            let mut rec = r.clone();
            rec.confidence = self.decayed_confidence(&rec);
            rec
        })
    }

    fn decayed_confidence(&self, rec: &StrategyRecord) -> f64 {
        let window_ms = self.config.staleness_window.as_millis().max(1) as u64;
        let idle = now_ms().saturating_sub(rec.updated_at);
        if idle <= window_ms {
            rec.confidence
        } else {
            // Halve once per idle staleness window beyond the first
            let windows = (idle - window_ms) as f64 / window_ms as f64;
            rec.confidence * 0.5f64.powf(windows)
        }
    }

    /// Fold one local session outcome into the record for `fp`
    ///
    /// EMA update: success moves confidence toward 1, failure toward 0,
    /// both by the configured learning rate. Creates the record at the
    /// conservative zero prior if this fingerprint is new. This is the
    /// only writer triggered by local traffic.
    pub fn record_outcome(&self, fp: Fingerprint, tag: StrategyTag, success: bool) {
        let rate = self.config.learning_rate;
        let node_id = self.node_id;
        let mut entry = self
            .records
            .entry(fp)
            .or_insert_with(|| StrategyRecord::fresh(fp, tag, node_id));
        if success {
            entry.confidence += rate * (1.0 - entry.confidence);
            // A success with this tag makes it the best-known strategy
            entry.tag = tag;
        } else {
            entry.confidence -= rate * entry.confidence;
        }
        entry.confidence = entry.confidence.clamp(0.0, 1.0);
        entry.samples += 1;
        entry.updated_at = now_ms();
        entry.origin = node_id;
        drop(entry);
        self.dirty.insert(fp);
    }

    /// Merge a batch of remote records under the pairwise conflict rule
    ///
    /// Idempotent: re-applying the same records is a no-op. Each record
    /// resolves independently and atomically; the uniqueness invariant
    /// (one record per fingerprint) holds by construction.
    pub fn merge_remote(&self, remote: &[StrategyRecord]) -> MergeReport {
        let mut report = MergeReport::default();
        for rec in remote {
            let mut changed = false;
            match self.records.entry(rec.fingerprint) {
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(rec.clone());
                    report.added += 1;
                    changed = true;
                }
                dashmap::mapref::entry::Entry::Occupied(mut o) => {
                    if rec == o.get() {
                        // Duplicate delivery; nothing to do
                        report.rejected += 1;
                    } else if StrategyRecord::beats(rec, o.get()) {
                        o.insert(rec.clone());
                        report.updated += 1;
                        changed = true;
                    } else {
                        report.rejected += 1;
                    }
                }
            }
            if changed {
                self.dirty.insert(rec.fingerprint);
            }
        }
        tracing::debug!(
            added = report.added,
            updated = report.updated,
            rejected = report.rejected,
            "merged remote knowledge"
        );
        report
    }

    /// Drain the records changed since the last call (for one gossip round)
    ///
    /// Best-effort: a write racing with the drain may be picked up next
    /// round instead, which the unreliable gossip channel tolerates.
    pub fn take_changed(&self) -> Vec<StrategyRecord> {
        let keys: Vec<Fingerprint> = self.dirty.iter().map(|k| *k).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            self.dirty.remove(&key);
            if let Some(rec) = self.records.get(&key) {
                out.push(rec.clone());
            }
        }
        out
    }

    /// Full copy of the store, for the admin surface and cold-start seeding
    pub fn snapshot(&self) -> Vec<StrategyRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }
}
