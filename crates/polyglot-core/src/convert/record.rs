//! Raw bytes -> structured JSON record.
//!
//! Target of the TCP -> record pair: every inbound frame becomes one
//! self-describing JSON object. There is nothing to buffer and nothing
//! that can be unmapped - the whole frame is represented.

use serde::Serialize;

use crate::error::TranslateError;
use crate::fingerprint::TransportKind;

const PREFIX_LEN: usize = 16;

/// Structured representation of one raw frame
#[derive(Debug, Serialize)]
pub struct StructuredRecord {
    /// Transport the frame arrived on
    pub transport: TransportKind,
    /// Frame length in bytes
    pub length: usize,
    /// Hex of the first bytes (up to 16)
    pub prefix: String,
    /// Share of printable ASCII bytes, two decimal places
    pub printable_ratio: f64,
}

impl StructuredRecord {
    /// Build the record for one frame
    pub fn of(transport: TransportKind, payload: &[u8]) -> Self {
        let printable = payload
            .iter()
            .filter(|b| b.is_ascii_graphic() || **b == b' ')
            .count();
        let ratio = if payload.is_empty() {
            0.0
        } else {
            (printable as f64 / payload.len() as f64 * 100.0).round() / 100.0
        };
        Self {
            transport,
            length: payload.len(),
            prefix: hex::encode(&payload[..payload.len().min(PREFIX_LEN)]),
            printable_ratio: ratio,
        }
    }

    /// Serialize to the wire (JSON)
    pub fn encode(&self) -> Result<Vec<u8>, TranslateError> {
        serde_json::to_vec(self)
            .map_err(|e| TranslateError::MalformedFrame(format!("record encode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_shape() {
        let rec = StructuredRecord::of(TransportKind::Tcp, b"hello\x00world");
        assert_eq!(rec.length, 11);
        assert_eq!(rec.prefix, hex::encode(b"hello\x00world"));
        assert!(rec.printable_ratio > 0.8 && rec.printable_ratio < 1.0);

        let json: serde_json::Value =
            serde_json::from_slice(&rec.encode().unwrap()).unwrap();
        assert_eq!(json["transport"], "tcp");
        assert_eq!(json["length"], 11);
    }

    #[test]
    fn test_empty_frame_record() {
        let rec = StructuredRecord::of(TransportKind::Udp, b"");
        assert_eq!(rec.length, 0);
        assert_eq!(rec.printable_ratio, 0.0);
        assert!(rec.prefix.is_empty());
    }
}
