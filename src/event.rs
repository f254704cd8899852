//! Event types delivered by a push-stream connection
//!
//! These are the values handed to subscriber callbacks: named message events
//! carrying raw data, and open/error signals from the connection itself.

use bytes::Bytes;

/// Connection state reported by a push-stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Connection is being (re)established
    Connecting,
    /// Connection is open and delivering events
    Open,
    /// Connection is closed and will not reconnect on its own
    Closed,
}

impl ReadyState {
    /// Numeric value used by the browser `EventSource` API
    pub fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closed => 2,
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "connecting"),
            ReadyState::Open => write!(f, "open"),
            ReadyState::Closed => write!(f, "closed"),
        }
    }
}

/// A named event received from the stream
///
/// Cheap to clone: the data is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Event name (`event:` field, `message` when absent)
    pub event: String,
    /// Raw event data
    pub data: Bytes,
    /// Last event ID reported by the server, if any
    pub last_event_id: Option<String>,
}

impl MessageEvent {
    /// Create a new event with the given name and data
    pub fn new(event: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            last_event_id: None,
        }
    }

    /// Set the last event ID
    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    /// Event data as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Kind of connection-level signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The connection was opened
    Open,
    /// The connection reported an error
    Error,
}

/// Connection-level open/error notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    pub kind: SignalKind,
    /// Human-readable detail supplied by the transport
    pub message: Option<String>,
}

impl SignalEvent {
    pub fn open() -> Self {
        Self {
            kind: SignalKind::Open,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Error,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_values() {
        assert_eq!(ReadyState::Connecting.as_u8(), 0);
        assert_eq!(ReadyState::Open.as_u8(), 1);
        assert_eq!(ReadyState::Closed.as_u8(), 2);
        assert_eq!(ReadyState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_message_text_lossy() {
        let event = MessageEvent::new("tick", Bytes::from_static(&[0x68, 0x69, 0xFF]));

        assert_eq!(event.text(), "hi\u{FFFD}");
        assert_eq!(event.last_event_id, None);
    }

    #[test]
    fn test_signal_constructors() {
        assert_eq!(SignalEvent::open().kind, SignalKind::Open);

        let error = SignalEvent::error("reset by peer");
        assert_eq!(error.kind, SignalKind::Error);
        assert_eq!(error.message.as_deref(), Some("reset by peer"));
    }
}
