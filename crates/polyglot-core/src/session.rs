//! Per-session translation state machine.
//!
//! A session owns the conversion of one logical flow:
//!
//! ```text
//! NEW ──▶ CLASSIFYING ──▶ TRANSLATING ──▶ COMPLETE
//!              │               │
//!              └───────────────┴────────▶ FAILED
//! ```
//!
//! Sessions are exclusively owned by one worker for their entire
//! lifetime. Frames are processed strictly in arrival order; multi-packet
//! messages are head-of-line buffered with a hard cap (exceeding it is a
//! FAILED transition, not silent truncation). The terminal outcome is
//! surfaced exactly once via [`Session::take_outcome`].
//!
//! Output already handed to the caller is at-least-once: a well-formed
//! converted message flushed before a later failure is not retracted. A
//! session that fails before producing any well-formed message emits
//! nothing.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::convert::{http, ledger, mqtt, record};
use crate::error::{FailKind, TranslateError};
use crate::fingerprint::{Fingerprint, ProtocolId};
use crate::strategy::StrategyTag;

/// Session identifier, unique within one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

/// Observable session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, first frame not yet classified
    New,
    /// Fingerprint computed, strategy being chosen
    Classifying,
    /// Strategy bound, converting frames
    Translating,
    /// Flow ended cleanly (terminal)
    Complete,
    /// Malformed input, buffer overrun, unsupported conversion, or
    /// cancellation (terminal)
    Failed,
}

/// Protocol-specific sub-state inside `Translating`
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubState {
    /// Accumulating bytes until a complete message parses (HTTP sources,
    /// MQTT source)
    Buffering {
        /// Client id from an MQTT CONNECT, mapped to `x-client-id`
        client_id: Option<String>,
    },
    /// Frame-at-a-time, nothing buffered (record/passthrough targets)
    Stateless,
}

/// Terminal summary of one session, reported exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// Session that terminated
    pub session: SessionId,
    /// Fingerprint of the flow
    pub fingerprint: Fingerprint,
    /// Strategy that was bound
    pub tag: StrategyTag,
    /// True iff the session reached `Complete`
    pub success: bool,
    /// Frames consumed
    pub frames: u64,
    /// Bytes consumed
    pub bytes_in: u64,
    /// Bytes emitted
    pub bytes_out: u64,
    /// Unmapped fields dropped during conversion
    pub dropped_fields: u64,
    /// Failure classification, `None` on success
    pub fail: Option<FailKind>,
}

/// Translation state machine for one flow
pub struct Session {
    id: SessionId,
    fingerprint: Fingerprint,
    tag: Option<StrategyTag>,
    state: SessionState,
    sub: SubState,
    buf: Vec<u8>,
    max_buffer: usize,
    priority: f64,
    compat_checked: bool,
    frames_seen: u64,
    bytes_in: u64,
    bytes_out: u64,
    dropped_fields: u64,
    fail_kind: Option<FailKind>,
    outcome_taken: bool,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    /// Create a session for the flow behind `fingerprint`
    pub fn new(id: SessionId, fingerprint: Fingerprint, max_buffer: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            fingerprint,
            tag: None,
            state: SessionState::New,
            sub: SubState::Stateless,
            buf: Vec::new(),
            max_buffer,
            priority: 0.0,
            compat_checked: false,
            frames_seen: 0,
            bytes_in: 0,
            bytes_out: 0,
            dropped_fields: 0,
            fail_kind: None,
            outcome_taken: false,
            created_at: now,
            last_activity: now,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Flow fingerprint
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Bound strategy, if any
    pub fn tag(&self) -> Option<StrategyTag> {
        self.tag
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Complete | SessionState::Failed)
    }

    /// Admission priority assigned by the load balancer
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Record the admission priority
    pub fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }

    /// Time since the last frame (or creation)
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Session age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Unmapped fields dropped so far
    pub fn dropped_fields(&self) -> u64 {
        self.dropped_fields
    }

    /// `New -> Classifying`: first frame seen, fingerprint in hand
    pub fn classify(&mut self) -> Result<(), TranslateError> {
        match self.state {
            SessionState::New => {
                self.state = SessionState::Classifying;
                Ok(())
            }
            _ => Err(TranslateError::InvalidState("classify")),
        }
    }

    /// `Classifying -> Translating`: strategy chosen by the decision agent
    pub fn bind(&mut self, tag: StrategyTag) -> Result<(), TranslateError> {
        match self.state {
            SessionState::Classifying => {
                self.tag = Some(tag);
                self.sub = match tag {
                    StrategyTag::TcpToRecord | StrategyTag::Passthrough => SubState::Stateless,
                    _ => SubState::Buffering { client_id: None },
                };
                self.state = SessionState::Translating;
                tracing::trace!(session = %self.id, %tag, "strategy bound");
                Ok(())
            }
            _ => Err(TranslateError::InvalidState("bind")),
        }
    }

    /// Feed one frame; returns zero or more converted messages.
    ///
    /// On error the session has already transitioned to `Failed` and must
    /// not be fed again.
    pub fn push_frame(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, TranslateError> {
        if self.state != SessionState::Translating {
            return Err(TranslateError::InvalidState("push_frame"));
        }
        let tag = self.tag.ok_or(TranslateError::InvalidState("no strategy"))?;
        self.last_activity = Instant::now();
        self.frames_seen += 1;
        self.bytes_in += payload.len() as u64;

        if !self.compat_checked && !payload.is_empty() {
            self.compat_checked = true;
            let detected = ProtocolId::detect(payload);
            if !tag.accepts(detected) {
                let err = TranslateError::UnsupportedConversion { tag, detected };
                self.fail(err.fail_kind());
                return Err(err);
            }
        }

        let result = match tag {
            StrategyTag::Passthrough => Ok(vec![payload.to_vec()]),
            StrategyTag::TcpToRecord => record::StructuredRecord::of(
                self.fingerprint.transport,
                payload,
            )
            .encode()
            .map(|out| vec![out]),
            _ => self.buffer_and_drain(tag, payload),
        };

        match result {
            Ok(outputs) => {
                for out in &outputs {
                    self.bytes_out += out.len() as u64;
                }
                Ok(outputs)
            }
            Err(err) => {
                self.fail(err.fail_kind());
                Err(err)
            }
        }
    }

    fn buffer_and_drain(
        &mut self,
        tag: StrategyTag,
        payload: &[u8],
    ) -> Result<Vec<Vec<u8>>, TranslateError> {
        if self.buf.len() + payload.len() > self.max_buffer {
            return Err(TranslateError::BufferLimitExceeded {
                buffered: self.buf.len() + payload.len(),
                limit: self.max_buffer,
            });
        }
        self.buf.extend_from_slice(payload);

        let mut outputs = Vec::new();
        loop {
            let step = match tag {
                StrategyTag::HttpToMqtt | StrategyTag::HttpToLedger => {
                    self.drain_http(tag)?
                }
                StrategyTag::MqttToHttp => self.drain_mqtt()?,
                _ => None,
            };
            match step {
                Some(Some(out)) => outputs.push(out),
                // Message consumed without output (MQTT CONNECT)
                Some(None) => {}
                None => break,
            }
        }
        Ok(outputs)
    }

    /// One parse attempt against the buffer for HTTP-sourced pairs.
    ///
    /// `None` = need more bytes; `Some(None)` = consumed, no output;
    /// `Some(Some(_))` = one converted message.
    fn drain_http(
        &mut self,
        tag: StrategyTag,
    ) -> Result<Option<Option<Vec<u8>>>, TranslateError> {
        let Some((req, consumed)) = http::parse_request(&self.buf)? else {
            return Ok(None);
        };
        self.buf.drain(..consumed);
        let out = match tag {
            StrategyTag::HttpToMqtt => {
                self.dropped_fields += req.unmapped_headers();
                let topic = req.path.trim_start_matches('/');
                let topic = if topic.is_empty() { "root" } else { topic };
                mqtt::encode_publish(topic, &req.body)?
            }
            _ => {
                // Ledger has no header representation at all
                self.dropped_fields += req.headers.len() as u64;
                let memo = format!("{} {}", req.method, req.path);
                ledger::encode_record(&memo, &req.body)?
            }
        };
        Ok(Some(Some(out)))
    }

    fn drain_mqtt(&mut self) -> Result<Option<Option<Vec<u8>>>, TranslateError> {
        let Some((packet, consumed)) = mqtt::parse_packet(&self.buf)? else {
            return Ok(None);
        };
        self.buf.drain(..consumed);
        match packet {
            mqtt::MqttPacket::Connect { client_id } => {
                // Flags and keepalive have no HTTP representation
                self.dropped_fields += 2;
                self.sub = SubState::Buffering {
                    client_id: Some(client_id),
                };
                Ok(Some(None))
            }
            mqtt::MqttPacket::Publish { topic, payload } => {
                let client = match &self.sub {
                    SubState::Buffering { client_id } => client_id.as_deref(),
                    SubState::Stateless => None,
                };
                Ok(Some(Some(http::build_request(&topic, &payload, client))))
            }
            mqtt::MqttPacket::Other(_) => Ok(Some(None)),
        }
    }

    /// End of flow (explicit close or FIN-tagged frame).
    ///
    /// A clean end with nothing half-buffered completes the session;
    /// leftover partial input is a malformed flow. Idempotent once
    /// terminal.
    pub fn close(&mut self) -> Result<(), TranslateError> {
        match self.state {
            SessionState::Complete | SessionState::Failed => Ok(()),
            SessionState::Translating if self.buf.is_empty() => {
                self.state = SessionState::Complete;
                Ok(())
            }
            SessionState::Translating => {
                let err = TranslateError::MalformedFrame(format!(
                    "flow ended with {} unparsed bytes",
                    self.buf.len()
                ));
                self.fail(err.fail_kind());
                Err(err)
            }
            // Closed before a strategy was ever bound
            SessionState::New | SessionState::Classifying => {
                self.fail(FailKind::Cancelled);
                Ok(())
            }
        }
    }

    /// Cancel from any state (idle timeout, shutdown)
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.fail(FailKind::Cancelled);
        }
    }

    fn fail(&mut self, kind: FailKind) {
        self.state = SessionState::Failed;
        self.fail_kind = Some(kind);
        self.buf.clear();
    }

    /// Take the terminal outcome; yields `Some` exactly once, and only
    /// after the session is terminal
    pub fn take_outcome(&mut self) -> Option<SessionOutcome> {
        if self.outcome_taken || !self.is_terminal() {
            return None;
        }
        self.outcome_taken = true;
        Some(SessionOutcome {
            session: self.id,
            fingerprint: self.fingerprint,
            tag: self.tag.unwrap_or(StrategyTag::Passthrough),
            success: self.state == SessionState::Complete,
            frames: self.frames_seen,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            dropped_fields: self.dropped_fields,
            fail: self.fail_kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FlowId, RawFrame, TransportKind};
    use crate::DEFAULT_MAX_BUFFER;

    fn http_fingerprint() -> Fingerprint {
        Fingerprint::of(&RawFrame {
            flow: FlowId(1),
            transport: TransportKind::Tcp,
            port: 80,
            payload: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            fin: false,
        })
    }

    fn bound_session(tag: StrategyTag) -> Session {
        let mut s = Session::new(SessionId(1), http_fingerprint(), DEFAULT_MAX_BUFFER);
        assert_eq!(s.state(), SessionState::New);
        s.classify().unwrap();
        assert_eq!(s.state(), SessionState::Classifying);
        s.bind(tag).unwrap();
        assert_eq!(s.state(), SessionState::Translating);
        s
    }

    #[test]
    fn test_http_to_mqtt_happy_path() {
        let mut s = bound_session(StrategyTag::HttpToMqtt);
        let outs = s
            .push_frame(b"GET /api/data HTTP/1.1\r\nHost: example.com\r\nx-extra: 1\r\n\r\n")
            .unwrap();
        assert_eq!(outs.len(), 1);
        // Syntactically valid MQTT PUBLISH
        let (packet, _) = mqtt::parse_packet(&outs[0]).unwrap().unwrap();
        assert_eq!(
            packet,
            mqtt::MqttPacket::Publish {
                topic: "api/data".to_string(),
                payload: Vec::new(),
            }
        );
        // x-extra had no mapping
        assert_eq!(s.dropped_fields(), 1);

        s.close().unwrap();
        assert_eq!(s.state(), SessionState::Complete);
        let outcome = s.take_outcome().unwrap();
        assert!(outcome.success);
        assert!(s.take_outcome().is_none(), "outcome reported exactly once");
    }

    #[test]
    fn test_multi_frame_request_buffers() {
        let mut s = bound_session(StrategyTag::HttpToMqtt);
        assert!(s.push_frame(b"POST /t HTTP/1.1\r\ncontent-le").unwrap().is_empty());
        assert!(s.push_frame(b"ngth: 5\r\n\r\nhel").unwrap().is_empty());
        let outs = s.push_frame(b"lo").unwrap();
        assert_eq!(outs.len(), 1);
        let (packet, _) = mqtt::parse_packet(&outs[0]).unwrap().unwrap();
        assert_eq!(
            packet,
            mqtt::MqttPacket::Publish {
                topic: "t".to_string(),
                payload: b"hello".to_vec(),
            }
        );
    }

    #[test]
    fn test_truncated_input_fails_malformed_on_close() {
        let mut s = bound_session(StrategyTag::HttpToMqtt);
        // A 3-byte fragment that can never become a request
        assert!(s.push_frame(b"HTT").unwrap().is_empty());
        let err = s.close().unwrap_err();
        assert!(matches!(err, TranslateError::MalformedFrame(_)));
        assert_eq!(s.state(), SessionState::Failed);
        let outcome = s.take_outcome().unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.fail, Some(FailKind::Malformed));
        assert_eq!(outcome.bytes_out, 0, "no partial output for a failed session");
    }

    #[test]
    fn test_buffer_limit_is_failed_not_truncated() {
        let mut s = Session::new(SessionId(2), http_fingerprint(), 64);
        s.classify().unwrap();
        s.bind(StrategyTag::HttpToMqtt).unwrap();
        s.push_frame(b"GET /a HTTP").unwrap();
        let err = s.push_frame(&[b'a'; 128]).unwrap_err();
        assert!(matches!(err, TranslateError::BufferLimitExceeded { .. }));
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(s.take_outcome().unwrap().fail, Some(FailKind::BufferLimit));
    }

    #[test]
    fn test_oversized_topic_fails_instead_of_corrupting() {
        // A buffer cap above 64 KiB lets a request through whose path
        // overflows the MQTT topic length field
        let mut s = Session::new(SessionId(4), http_fingerprint(), 256 * 1024);
        s.classify().unwrap();
        s.bind(StrategyTag::HttpToMqtt).unwrap();
        let request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(70_000));
        let err = s.push_frame(request.as_bytes()).unwrap_err();
        assert!(matches!(err, TranslateError::MalformedFrame(_)));
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(s.take_outcome().unwrap().bytes_out, 0);
    }

    #[test]
    fn test_unsupported_conversion_detected() {
        let mut s = bound_session(StrategyTag::MqttToHttp);
        let err = s.push_frame(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedConversion { .. }));
        assert_eq!(s.take_outcome().unwrap().fail, Some(FailKind::Unsupported));
    }

    #[test]
    fn test_mqtt_to_http_with_connect_state() {
        let mut s = bound_session(StrategyTag::MqttToHttp);
        // CONNECT first: consumed, no output, client id retained
        let mut connect = vec![0x10];
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_be_bytes());
        body.extend_from_slice(b"MQTT");
        body.extend_from_slice(&[0x04, 0x02, 0x00, 0x3C]);
        body.extend_from_slice(&3u16.to_be_bytes());
        body.extend_from_slice(b"c-1");
        connect.push(body.len() as u8);
        connect.extend_from_slice(&body);
        assert!(s.push_frame(&connect).unwrap().is_empty());

        let outs = s
            .push_frame(&mqtt::encode_publish("sensors/temp", b"21.5").unwrap())
            .unwrap();
        assert_eq!(outs.len(), 1);
        let (req, _) = http::parse_request(&outs[0]).unwrap().unwrap();
        assert_eq!(req.path, "/sensors/temp");
        assert_eq!(req.body, b"21.5");
        assert_eq!(req.header("x-client-id"), Some("c-1"));
    }

    #[test]
    fn test_http_to_ledger() {
        let mut s = bound_session(StrategyTag::HttpToLedger);
        let outs = s
            .push_frame(b"POST /tx HTTP/1.1\r\ncontent-length: 4\r\n\r\nabcd")
            .unwrap();
        let (memo, body) = ledger::decode_record(&outs[0]).unwrap();
        assert_eq!(memo, "POST /tx");
        assert_eq!(body, b"abcd");
        // Ledger drops every header
        assert_eq!(s.dropped_fields(), 1);
    }

    #[test]
    fn test_tcp_to_record_per_frame() {
        let mut s = bound_session(StrategyTag::TcpToRecord);
        let outs = s.push_frame(&[0x45, 0x00, 0x01, 0x02]).unwrap();
        assert_eq!(outs.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&outs[0]).unwrap();
        assert_eq!(json["length"], 4);
        // Second frame emits immediately too - nothing is buffered
        assert_eq!(s.push_frame(&[0x45, 0xFF]).unwrap().len(), 1);
    }

    #[test]
    fn test_passthrough_echoes() {
        let mut s = bound_session(StrategyTag::Passthrough);
        let outs = s.push_frame(&[1, 2, 3]).unwrap();
        assert_eq!(outs, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_cancel_releases_exactly_one_outcome() {
        let mut s = bound_session(StrategyTag::HttpToMqtt);
        s.cancel();
        assert_eq!(s.state(), SessionState::Failed);
        let outcome = s.take_outcome().unwrap();
        assert_eq!(outcome.fail, Some(FailKind::Cancelled));
        s.cancel(); // idempotent
        assert!(s.take_outcome().is_none());
    }

    #[test]
    fn test_push_before_bind_rejected() {
        let mut s = Session::new(SessionId(3), http_fingerprint(), DEFAULT_MAX_BUFFER);
        assert!(matches!(
            s.push_frame(b"x"),
            Err(TranslateError::InvalidState(_))
        ));
    }
}
