//! Knowledge delta wire format.
//!
//! Deltas are self-describing JSON so that receivers tolerate fields
//! they do not know (forward compatibility comes for free from serde's
//! default ignore-unknown behavior). A blake3 digest over the canonical
//! record serialization catches in-flight corruption; it is an integrity
//! check only, not authentication.

use serde::{Deserialize, Serialize};

use polyglot_core::{NodeId, StrategyRecord};

use crate::error::GossipError;

/// One gossip round's worth of changed strategy records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDelta {
    /// Node that produced this delta
    pub origin: NodeId,
    /// Per-origin monotonically increasing round number
    ///
    /// Used for duplicate/out-of-order accounting only; it carries no
    /// cross-node ordering meaning.
    pub seq: u64,
    /// Send time, unix milliseconds (informational)
    pub sent_at: u64,
    /// blake3 hex digest of the serialized record set
    pub digest: String,
    /// The records themselves
    pub records: Vec<StrategyRecord>,
}

impl KnowledgeDelta {
    /// Assemble and digest a delta
    pub fn new(origin: NodeId, seq: u64, records: Vec<StrategyRecord>) -> Self {
        let digest = record_digest(&records);
        Self {
            origin,
            seq,
            sent_at: unix_ms(),
            digest,
            records,
        }
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>, GossipError> {
        serde_json::to_vec(self).map_err(|e| GossipError::Decode(e.to_string()))
    }

    /// Decode and verify one datagram
    pub fn decode(buf: &[u8]) -> Result<Self, GossipError> {
        let delta: Self =
            serde_json::from_slice(buf).map_err(|e| GossipError::Decode(e.to_string()))?;
        if delta.digest != record_digest(&delta.records) {
            return Err(GossipError::DigestMismatch {
                origin: delta.origin.to_string(),
            });
        }
        Ok(delta)
    }
}

fn record_digest(records: &[StrategyRecord]) -> String {
    let canonical = serde_json::to_vec(records).unwrap_or_default();
    blake3::hash(&canonical).to_hex().to_string()
}

fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_core::{Fingerprint, StrategyTag, TransportKind};

    fn records() -> Vec<StrategyRecord> {
        vec![StrategyRecord {
            fingerprint: Fingerprint {
                transport: TransportKind::Tcp,
                len_bucket: 6,
                prefix_hash: 0xDEAD_BEEF,
                port: 80,
            },
            tag: StrategyTag::HttpToMqtt,
            confidence: 0.75,
            samples: 12,
            updated_at: 1_700_000_000_000,
            origin: NodeId::random(),
        }]
    }

    #[test]
    fn test_delta_roundtrip() {
        let origin = NodeId::random();
        let delta = KnowledgeDelta::new(origin, 3, records());
        let decoded = KnowledgeDelta::decode(&delta.encode().unwrap()).unwrap();
        assert_eq!(decoded.origin, origin);
        assert_eq!(decoded.seq, 3);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].samples, 12);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let delta = KnowledgeDelta::new(NodeId::random(), 1, records());
        let mut value: serde_json::Value =
            serde_json::from_slice(&delta.encode().unwrap()).unwrap();
        // A newer peer may send fields we do not know about
        value["compression"] = serde_json::json!("zstd");
        value["records"][0]["latency_ms"] = serde_json::json!(4.2);
        let raw = serde_json::to_vec(&value).unwrap();
        let decoded = KnowledgeDelta::decode(&raw).unwrap();
        assert_eq!(decoded.records.len(), 1);
    }

    #[test]
    fn test_corrupt_records_rejected() {
        let delta = KnowledgeDelta::new(NodeId::random(), 1, records());
        let mut value: serde_json::Value =
            serde_json::from_slice(&delta.encode().unwrap()).unwrap();
        value["records"][0]["confidence"] = serde_json::json!(0.99);
        let raw = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            KnowledgeDelta::decode(&raw),
            Err(GossipError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(
            KnowledgeDelta::decode(b"not json at all"),
            Err(GossipError::Decode(_))
        ));
    }
}
