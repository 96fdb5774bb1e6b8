//! Per-pair protocol codecs.
//!
//! Each supported conversion pair defines its own explicit field mapping;
//! unmapped fields are dropped with a count surfaced on the session
//! outcome, never silently corrupted. Codecs are pure parse/encode
//! functions - all buffering and state lives in the session layer.
//!
//! Supported pairs:
//! - HTTP request  -> MQTT PUBLISH        ([`http`] + [`mqtt`])
//! - MQTT PUBLISH  -> HTTP request        ([`mqtt`] + [`http`])
//! - HTTP request  -> chain-ledger record ([`http`] + [`ledger`])
//! - raw TCP bytes -> structured record   ([`record`])

pub mod http;
pub mod ledger;
pub mod mqtt;
pub mod record;

pub use http::HttpRequest;
pub use mqtt::MqttPacket;
