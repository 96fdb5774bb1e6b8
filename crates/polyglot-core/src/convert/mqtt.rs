//! MQTT 3.1.1 control packet encoding and decoding.
//!
//! Only the packets the translation pairs need: CONNECT (session
//! sub-state, produces no output) and PUBLISH. QoS 1/2 PUBLISH packets
//! are accepted on decode (the packet id is consumed and dropped);
//! encoded PUBLISH is always QoS 0.

use crate::error::TranslateError;

/// PUBLISH fixed header, QoS 0
pub const PUBLISH_HEADER: u8 = 0x30;
/// CONNECT fixed header
pub const CONNECT_HEADER: u8 = 0x10;

const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// A decoded MQTT control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttPacket {
    /// Client connect; carries the client identifier
    Connect {
        /// Client identifier from the CONNECT payload
        client_id: String,
    },
    /// Message publication
    Publish {
        /// Topic name
        topic: String,
        /// Application payload
        payload: Vec<u8>,
    },
    /// Any other packet type (by type nibble), consumed and ignored
    Other(u8),
}

/// Encode an MQTT PUBLISH (QoS 0) packet.
///
/// Field mapping for the HTTP -> MQTT pair: request path -> topic,
/// request body -> payload. A topic longer than the u16 length field can
/// carry is refused outright - truncating it would emit a packet whose
/// framing disagrees with its content.
pub fn encode_publish(topic: &str, payload: &[u8]) -> Result<Vec<u8>, TranslateError> {
    if topic.len() > u16::MAX as usize {
        return Err(TranslateError::MalformedFrame(format!(
            "mqtt topic too long: {} bytes, max {}",
            topic.len(),
            u16::MAX
        )));
    }
    let mut variable = Vec::with_capacity(2 + topic.len() + payload.len());
    variable.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    variable.extend_from_slice(topic.as_bytes());
    variable.extend_from_slice(payload);

    let mut out = Vec::with_capacity(variable.len() + 5);
    out.push(PUBLISH_HEADER);
    encode_remaining_length(variable.len(), &mut out);
    out.extend_from_slice(&variable);
    Ok(out)
}

/// Try to decode one complete packet from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn parse_packet(buf: &[u8]) -> Result<Option<(MqttPacket, usize)>, TranslateError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let first = buf[0];
    let packet_type = first >> 4;
    if packet_type == 0 {
        return Err(TranslateError::MalformedFrame(
            "reserved mqtt packet type 0".to_string(),
        ));
    }

    let Some((remaining, header_len)) = parse_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let total = 1 + header_len + remaining;
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[1 + header_len..total];

    let packet = match packet_type {
        1 => parse_connect(body)?,
        3 => parse_publish(first, body)?,
        t => MqttPacket::Other(t),
    };
    Ok(Some((packet, total)))
}

fn parse_connect(body: &[u8]) -> Result<MqttPacket, TranslateError> {
    // Variable header: protocol name (len-prefixed), level, flags, keepalive
    let (name, rest) = take_utf8_string(body, "connect protocol name")?;
    if name != "MQTT" && name != "MQIsdp" {
        return Err(TranslateError::MalformedFrame(format!(
            "unexpected mqtt protocol name: {name:?}"
        )));
    }
    if rest.len() < 4 {
        return Err(TranslateError::MalformedFrame(
            "truncated connect variable header".to_string(),
        ));
    }
    let (client_id, _) = take_utf8_string(&rest[4..], "connect client id")?;
    Ok(MqttPacket::Connect { client_id })
}

fn parse_publish(first: u8, body: &[u8]) -> Result<MqttPacket, TranslateError> {
    let qos = (first >> 1) & 0x03;
    if qos == 3 {
        return Err(TranslateError::MalformedFrame(
            "invalid publish qos 3".to_string(),
        ));
    }
    let (topic, rest) = take_utf8_string(body, "publish topic")?;
    let payload = if qos > 0 {
        // Packet identifier is unmapped in the MQTT -> HTTP pair
        if rest.len() < 2 {
            return Err(TranslateError::MalformedFrame(
                "truncated publish packet id".to_string(),
            ));
        }
        rest[2..].to_vec()
    } else {
        rest.to_vec()
    };
    Ok(MqttPacket::Publish { topic, payload })
}

fn take_utf8_string<'a>(
    buf: &'a [u8],
    what: &str,
) -> Result<(String, &'a [u8]), TranslateError> {
    if buf.len() < 2 {
        return Err(TranslateError::MalformedFrame(format!("truncated {what}")));
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return Err(TranslateError::MalformedFrame(format!("truncated {what}")));
    }
    let s = std::str::from_utf8(&buf[2..2 + len])
        .map_err(|_| TranslateError::MalformedFrame(format!("non-utf8 {what}")))?;
    Ok((s.to_string(), &buf[2 + len..]))
}

fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    debug_assert!(len <= MAX_REMAINING_LENGTH);
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode the variable-length remaining-length field.
///
/// Returns `Ok(None)` if the field itself is still incomplete.
fn parse_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, TranslateError> {
    let mut value = 0usize;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        shift += 7;
    }
    if buf.len() >= 4 {
        return Err(TranslateError::MalformedFrame(
            "mqtt remaining length overlong".to_string(),
        ));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_roundtrip() {
        let encoded = encode_publish("sensors/temp", b"21.5").unwrap();
        assert_eq!(encoded[0], PUBLISH_HEADER);
        let (packet, consumed) = parse_packet(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(
            packet,
            MqttPacket::Publish {
                topic: "sensors/temp".to_string(),
                payload: b"21.5".to_vec(),
            }
        );
    }

    #[test]
    fn test_truncated_publish_needs_more() {
        let encoded = encode_publish("t", b"payload").unwrap();
        assert!(parse_packet(&encoded[..3]).unwrap().is_none());
        assert!(parse_packet(&[]).unwrap().is_none());
    }

    #[test]
    fn test_qos1_packet_id_dropped() {
        // Hand-built QoS 1 PUBLISH: topic "a", packet id 7, payload "x"
        let mut raw = vec![0x32, 0x06, 0x00, 0x01, b'a', 0x00, 0x07, b'x'];
        let (packet, consumed) = parse_packet(&raw).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(
            packet,
            MqttPacket::Publish {
                topic: "a".to_string(),
                payload: b"x".to_vec(),
            }
        );
        // Invalid QoS 3 rejected
        raw[0] = 0x36;
        assert!(parse_packet(&raw).is_err());
    }

    #[test]
    fn test_connect_yields_client_id() {
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_be_bytes());
        body.extend_from_slice(b"MQTT");
        body.extend_from_slice(&[0x04, 0x02, 0x00, 0x3C]); // level, flags, keepalive
        body.extend_from_slice(&6u16.to_be_bytes());
        body.extend_from_slice(b"dev-42");
        let mut raw = vec![CONNECT_HEADER];
        encode_remaining_length(body.len(), &mut raw);
        raw.extend_from_slice(&body);

        let (packet, _) = parse_packet(&raw).unwrap().unwrap();
        assert_eq!(
            packet,
            MqttPacket::Connect {
                client_id: "dev-42".to_string()
            }
        );
    }

    #[test]
    fn test_large_payload_multibyte_length() {
        let payload = vec![0xA5u8; 300];
        let encoded = encode_publish("big", &payload).unwrap();
        let (packet, _) = parse_packet(&encoded).unwrap().unwrap();
        match packet {
            MqttPacket::Publish { payload: p, .. } => assert_eq!(p.len(), 300),
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[test]
    fn test_topic_beyond_u16_refused_not_truncated() {
        // 70_000 & 0xFFFF would frame a 4_464-byte topic and shove the
        // tail into the payload; the encoder must refuse instead
        let topic = "a".repeat(70_000);
        assert!(matches!(
            encode_publish(&topic, b"payload"),
            Err(TranslateError::MalformedFrame(_))
        ));
        // The boundary itself is fine
        let max = "a".repeat(u16::MAX as usize);
        let encoded = encode_publish(&max, b"").unwrap();
        let (packet, _) = parse_packet(&encoded).unwrap().unwrap();
        assert_eq!(
            packet,
            MqttPacket::Publish {
                topic: max,
                payload: Vec::new(),
            }
        );
    }
}
