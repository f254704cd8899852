//! In-process transport
//!
//! [`MemoryTransport`] hands out [`MemoryConnection`]s and remembers every one
//! it created, so a host (or a test) can push events and signals into them and
//! inspect whether they were closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::event::{MessageEvent, ReadyState, SignalEvent};
use crate::sync::lock;

use super::{Connection, EventListener, ListenerId, SignalCallback, Transport, TransportError};

/// Transport whose connections live entirely in memory
#[derive(Clone, Default)]
pub struct MemoryTransport {
    connections: Arc<Mutex<Vec<MemoryConnection>>>,
    refuse_connections: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect` calls fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::Relaxed);
    }

    /// All connections created so far, oldest first
    pub fn connections(&self) -> Vec<MemoryConnection> {
        lock(&self.connections).clone()
    }

    /// Number of connections created so far
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// The connection created at position `index`
    pub fn connection(&self, index: usize) -> Option<MemoryConnection> {
        lock(&self.connections).get(index).cloned()
    }

    /// The most recently created connection
    pub fn latest(&self) -> Option<MemoryConnection> {
        lock(&self.connections).last().cloned()
    }

    /// Connections that have not been closed
    pub fn open_connections(&self) -> Vec<MemoryConnection> {
        lock(&self.connections)
            .iter()
            .filter(|conn| !conn.is_closed())
            .cloned()
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        if self.refuse_connections.load(Ordering::Relaxed) {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }

        let conn = MemoryConnection::new(url);
        lock(&self.connections).push(conn.clone());
        Ok(Box::new(conn))
    }
}

struct ConnectionState {
    ready_state: ReadyState,
    listeners: Vec<(String, ListenerId, EventListener)>,
    signal: Option<SignalCallback>,
}

struct ConnectionInner {
    url: String,
    state: Mutex<ConnectionState>,
    fail_close: AtomicBool,
}

/// Handle to an in-memory connection
///
/// Clones share the same underlying connection.
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

impl MemoryConnection {
    fn new(url: &str) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                url: url.to_string(),
                state: Mutex::new(ConnectionState {
                    ready_state: ReadyState::Connecting,
                    listeners: Vec::new(),
                    signal: None,
                }),
                fail_close: AtomicBool::new(false),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).ready_state == ReadyState::Closed
    }

    /// Number of listeners registered for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.inner.state)
            .listeners
            .iter()
            .filter(|(name, _, _)| name == event)
            .count()
    }

    /// Make `close()` report an error (the connection still ends up closed)
    pub fn fail_on_close(&self, fail: bool) {
        self.inner.fail_close.store(fail, Ordering::Relaxed);
    }

    /// Deliver a named event to every listener registered for it.
    ///
    /// Returns the number of listeners invoked; closed connections deliver nothing.
    pub fn emit(&self, event: &str, data: impl Into<Bytes>) -> usize {
        self.dispatch(&MessageEvent::new(event, data))
    }

    /// Deliver a prepared event
    pub fn dispatch(&self, event: &MessageEvent) -> usize {
        let listeners: Vec<EventListener> = {
            let state = lock(&self.inner.state);
            if state.ready_state == ReadyState::Closed {
                return 0;
            }
            state
                .listeners
                .iter()
                .filter(|(name, _, _)| *name == event.event)
                .map(|(_, _, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    /// Mark the connection open and fire the open signal
    pub fn open(&self) {
        self.signal(ReadyState::Open, SignalEvent::open());
    }

    /// Fire the error signal; the connection falls back to connecting
    pub fn fail(&self, message: &str) {
        self.signal(ReadyState::Connecting, SignalEvent::error(message));
    }

    fn signal(&self, next: ReadyState, event: SignalEvent) {
        let callback = {
            let mut state = lock(&self.inner.state);
            if state.ready_state == ReadyState::Closed {
                return;
            }
            state.ready_state = next;
            state.signal.clone()
        };

        if let Some(callback) = callback {
            callback(&event);
        }
    }

    /// Fire a signal even if the connection was already closed
    pub fn force_signal(&self, event: SignalEvent) {
        let callback = lock(&self.inner.state).signal.clone();
        if let Some(callback) = callback {
            callback(&event);
        }
    }
}

impl Connection for MemoryConnection {
    fn add_event_listener(&self, event: &str, id: ListenerId, listener: EventListener) {
        let mut state = lock(&self.inner.state);
        if state
            .listeners
            .iter()
            .any(|(name, existing, _)| name == event && *existing == id)
        {
            return;
        }
        state.listeners.push((event.to_string(), id, listener));
    }

    fn remove_event_listener(&self, event: &str, id: ListenerId) {
        lock(&self.inner.state)
            .listeners
            .retain(|(name, existing, _)| !(name == event && *existing == id));
    }

    fn on_signal(&self, callback: SignalCallback) {
        lock(&self.inner.state).signal = Some(callback);
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.inner.state).ready_state
    }

    fn close(&self) -> Result<(), TransportError> {
        lock(&self.inner.state).ready_state = ReadyState::Closed;

        if self.inner.fail_close.load(Ordering::Relaxed) {
            return Err(TransportError::Close("simulated close failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::event::SignalKind;

    use super::*;

    #[test]
    fn test_connect_records_connection() {
        let transport = MemoryTransport::new();

        let conn = transport.connect("/sse/orders").unwrap();
        assert_eq!(conn.ready_state(), ReadyState::Connecting);
        assert_eq!(transport.connection_count(), 1);
        assert_eq!(transport.latest().unwrap().url(), "/sse/orders");
    }

    #[test]
    fn test_refuse_connections() {
        let transport = MemoryTransport::new();
        transport.refuse_connections(true);

        let err = transport.connect("/sse/orders").err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(transport.connection_count(), 0);
    }

    #[test]
    fn test_emit_by_name_and_remove() {
        let transport = MemoryTransport::new();
        let conn = transport.connect("/sse").unwrap();
        let handle = transport.latest().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        conn.add_event_listener(
            "tick",
            ListenerId(1),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(handle.emit("tick", "a"), 1);
        assert_eq!(handle.emit("other", "b"), 0);

        conn.remove_event_listener("tick", ListenerId(1));
        assert_eq!(handle.emit("tick", "c"), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_stops_delivery() {
        let transport = MemoryTransport::new();
        let conn = transport.connect("/sse").unwrap();
        let handle = transport.latest().unwrap();
        conn.add_event_listener("tick", ListenerId(1), Arc::new(|_| {}));

        handle.fail_on_close(true);
        assert!(conn.close().is_err());
        assert!(handle.is_closed());
        assert_eq!(handle.emit("tick", "a"), 0);
        assert!(transport.open_connections().is_empty());
    }

    #[test]
    fn test_signals_update_ready_state() {
        let transport = MemoryTransport::new();
        let conn = transport.connect("/sse").unwrap();
        let handle = transport.latest().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        conn.on_signal(Arc::new(move |event| lock(&sink).push(event.kind)));

        handle.open();
        assert_eq!(conn.ready_state(), ReadyState::Open);
        handle.fail("dropped");
        assert_eq!(conn.ready_state(), ReadyState::Connecting);

        assert_eq!(*lock(&seen), vec![SignalKind::Open, SignalKind::Error]);
    }
}
