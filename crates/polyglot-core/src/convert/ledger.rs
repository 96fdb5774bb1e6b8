//! Minimal chain-ledger wire format.
//!
//! One-way target of the HTTP -> ledger pair. Layout, all integers
//! big-endian:
//!
//! ```text
//! 0x02 | 0x01 | memo_len: u16 | memo | body_len: u32 | blake3(body) | body
//! ```
//!
//! Field mapping: method + path -> memo, request body -> body. Headers
//! have no ledger representation and are dropped with a count.

use crate::error::TranslateError;

/// Ledger record magic byte (shared with the sniffer's 0x02 detection)
pub const LEDGER_MAGIC: u8 = 0x02;
/// Wire format version
pub const LEDGER_VERSION: u8 = 0x01;

const HASH_LEN: usize = 32;

/// Encode one ledger record
///
/// A memo longer than the u16 length field is refused rather than
/// truncated.
pub fn encode_record(memo: &str, body: &[u8]) -> Result<Vec<u8>, TranslateError> {
    if memo.len() > u16::MAX as usize {
        return Err(TranslateError::MalformedFrame(format!(
            "ledger memo too long: {} bytes, max {}",
            memo.len(),
            u16::MAX
        )));
    }
    let mut out = Vec::with_capacity(8 + memo.len() + HASH_LEN + body.len());
    out.push(LEDGER_MAGIC);
    out.push(LEDGER_VERSION);
    out.extend_from_slice(&(memo.len() as u16).to_be_bytes());
    out.extend_from_slice(memo.as_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(blake3::hash(body).as_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Decode and verify one ledger record
pub fn decode_record(buf: &[u8]) -> Result<(String, Vec<u8>), TranslateError> {
    let malformed = |what: &str| TranslateError::MalformedFrame(format!("ledger: {what}"));

    if buf.len() < 4 || buf[0] != LEDGER_MAGIC || buf[1] != LEDGER_VERSION {
        return Err(malformed("bad magic or version"));
    }
    let memo_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let rest = &buf[4..];
    if rest.len() < memo_len + 4 + HASH_LEN {
        return Err(malformed("truncated"));
    }
    let memo = std::str::from_utf8(&rest[..memo_len])
        .map_err(|_| malformed("non-utf8 memo"))?
        .to_string();
    let rest = &rest[memo_len..];
    let body_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    let rest = &rest[4..];
    if rest.len() < HASH_LEN + body_len {
        return Err(malformed("truncated body"));
    }
    let (hash, body) = rest.split_at(HASH_LEN);
    if blake3::hash(&body[..body_len]).as_bytes() != hash {
        return Err(malformed("body hash mismatch"));
    }
    Ok((memo, body[..body_len].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let encoded = encode_record("POST /api/data", b"{\"v\":1}").unwrap();
        assert_eq!(encoded[0], LEDGER_MAGIC);
        let (memo, body) = decode_record(&encoded).unwrap();
        assert_eq!(memo, "POST /api/data");
        assert_eq!(body, b"{\"v\":1}");
    }

    #[test]
    fn test_memo_beyond_u16_refused() {
        let memo = "m".repeat(70_000);
        assert!(matches!(
            encode_record(&memo, b"body"),
            Err(TranslateError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let mut encoded = encode_record("GET /", b"payload").unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            decode_record(&encoded),
            Err(TranslateError::MalformedFrame(_))
        ));
    }
}
