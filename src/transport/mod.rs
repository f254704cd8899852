//! Push-stream transport boundary
//!
//! The registry never speaks HTTP itself. It opens connections through a
//! [`Transport`] and drives them through the [`Connection`] trait, which
//! mirrors the browser `EventSource` surface: named listeners, open/error
//! signals, `close()` and a ready state.
//!
//! Implementations must deliver events and signals asynchronously, never from
//! inside `connect`, `add_event_listener` or `on_signal` themselves.

pub mod memory;

use std::sync::Arc;

use crate::event::{MessageEvent, ReadyState, SignalEvent};

pub use memory::{MemoryConnection, MemoryTransport};

/// Identifier of a registered listener, unique within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback for named message events
pub type EventListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Callback for connection open/error signals
pub type SignalCallback = Arc<dyn Fn(&SignalEvent) + Send + Sync>;

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be created
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    /// Closing the connection failed
    #[error("failed to close connection: {0}")]
    Close(String),
}

/// Factory for push-stream connections
pub trait Transport: Send + Sync {
    /// Open a new connection to `url`
    fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// A single live push-stream connection
pub trait Connection: Send + Sync {
    /// Register a listener for a named event
    fn add_event_listener(&self, event: &str, id: ListenerId, listener: EventListener);

    /// Remove a listener previously added with the same event name and id
    fn remove_event_listener(&self, event: &str, id: ListenerId);

    /// Set the callback invoked on open and error signals, replacing any previous one
    fn on_signal(&self, callback: SignalCallback);

    /// Current connection state
    fn ready_state(&self) -> ReadyState;

    /// Close the connection
    fn close(&self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        (**self).connect(url)
    }
}
