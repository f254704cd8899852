//! Envelope decoding for event payloads
//!
//! Servers may wrap each event's payload in an envelope of the form
//! `{ "id": ..., "event": ..., "data": ... }`. Decoding is best effort:
//!
//! - data that is not JSON is handed back as a string payload with no envelope
//! - a JSON object with a `data` field yields that field as the payload and the
//!   whole object as the envelope
//! - any other JSON value is the payload itself, with no envelope

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::event::MessageEvent;

/// The decoded wrapper object around a payload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Envelope `id` field when it is a string
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Envelope `event` field when it is a string
    pub fn event(&self) -> Option<&str> {
        self.0.get("event").and_then(Value::as_str)
    }

    /// Raw `data` field
    pub fn data(&self) -> Option<&Value> {
        self.0.get("data")
    }

    /// Look up any other field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Result of decoding a raw event
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub payload: Value,
    pub envelope: Option<Envelope>,
    /// Event data as text
    pub raw: String,
}

impl DecodedEvent {
    /// Deserialize the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Decode a raw event into payload, optional envelope and raw text.
///
/// Never fails.
pub fn decode(event: &MessageEvent) -> DecodedEvent {
    decode_text(event.text())
}

/// Decode already-extracted event text
pub fn decode_text(raw: String) -> DecodedEvent {
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) if map.contains_key("data") => DecodedEvent {
            payload: map.get("data").cloned().unwrap_or(Value::Null),
            envelope: Some(Envelope(map)),
            raw,
        },
        Ok(value) => DecodedEvent {
            payload: value,
            envelope: None,
            raw,
        },
        Err(_) => DecodedEvent {
            payload: Value::String(raw.clone()),
            envelope: None,
            raw,
        },
    }
}
