//! Stream entry types
//!
//! This module defines the per-key state stored in the registry: the shared
//! connection, the subscriber count and every listener registered against the
//! stream. Listeners live on the entry rather than on the connection so they
//! survive a close/reopen cycle and can be replayed onto the next connection.

use std::time::{Duration, Instant};

use crate::event::{ReadyState, SignalKind};
use crate::transport::{
    Connection, EventListener, ListenerId, SignalCallback, Transport, TransportError,
};

/// Identifies one connection of one entry
///
/// Signals are routed back to the entry with this tag; a tag whose generation
/// no longer matches belongs to a connection that has since been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionTag {
    pub entry_id: u64,
    pub generation: u64,
}

/// A listener registered by a subscription, recorded so it can be undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Registration {
    Event { event: String, id: ListenerId },
    Open(ListenerId),
    Error(ListenerId),
}

/// A handler taken out of an entry
///
/// Handlers may own arbitrary caller state, so they are dropped only after the
/// registry lock is released.
#[allow(dead_code)]
pub(crate) enum RemovedHandler {
    Event(EventListener),
    Signal(SignalCallback),
}

struct NamedListener {
    event: String,
    id: ListenerId,
    listener: EventListener,
}

/// Entry for a single stream key in the registry
pub(crate) struct StreamEntry {
    id: u64,
    key: String,
    /// Bound for the lifetime of the entry
    url: String,
    connection: Option<Box<dyn Connection>>,
    /// Number of connections opened so far
    generation: u64,
    ref_count: usize,
    open_handlers: Vec<(ListenerId, SignalCallback)>,
    error_handlers: Vec<(ListenerId, SignalCallback)>,
    /// Named listeners in registration order
    event_listeners: Vec<NamedListener>,
    created_at: Instant,
}

impl StreamEntry {
    pub(crate) fn new(id: u64, key: String, url: String) -> Self {
        Self {
            id,
            key,
            url,
            connection: None,
            generation: 0,
            ref_count: 0,
            open_handlers: Vec::new(),
            error_handlers: Vec::new(),
            event_listeners: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// State of the live connection, if there is one
    pub fn connection_state(&self) -> Option<ReadyState> {
        self.connection.as_ref().map(|conn| conn.ready_state())
    }

    /// Whether `tag` refers to the connection currently attached
    pub(crate) fn is_current(&self, tag: ConnectionTag) -> bool {
        self.connection.is_some() && tag.entry_id == self.id && tag.generation == self.generation
    }

    pub(crate) fn retain(&mut self) -> usize {
        self.ref_count += 1;
        self.ref_count
    }

    /// Drop one reference, floored at zero
    pub(crate) fn release_ref(&mut self) -> usize {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    /// Open a connection if none is attached.
    ///
    /// The new connection's signals are routed through the callback built by
    /// `route_signals`, and every registered named listener is bound onto it.
    /// Returns `Ok(false)` when a connection was already attached.
    pub(crate) fn attach<R>(
        &mut self,
        transport: &dyn Transport,
        route_signals: R,
    ) -> Result<bool, TransportError>
    where
        R: FnOnce(ConnectionTag) -> SignalCallback,
    {
        if self.connection.is_some() {
            return Ok(false);
        }

        let conn = transport.connect(&self.url)?;
        self.generation += 1;
        conn.on_signal(route_signals(ConnectionTag {
            entry_id: self.id,
            generation: self.generation,
        }));
        self.bind_listeners(conn.as_ref());
        self.connection = Some(conn);

        tracing::debug!(
            stream = %self.key,
            url = %self.url,
            generation = self.generation,
            listeners = self.event_listeners.len(),
            "Connection attached"
        );

        Ok(true)
    }

    /// Bind every registered named listener onto `conn`, in registration order
    fn bind_listeners(&self, conn: &dyn Connection) {
        for named in &self.event_listeners {
            conn.add_event_listener(&named.event, named.id, named.listener.clone());
        }
    }

    /// Take the connection out of the entry.
    ///
    /// The caller closes it with [`close_quietly`] once no locks are held.
    pub(crate) fn detach(&mut self) -> Option<Box<dyn Connection>> {
        let conn = self.connection.take()?;
        tracing::debug!(stream = %self.key, generation = self.generation, "Connection detached");
        Some(conn)
    }

    pub(crate) fn add_event_listener(
        &mut self,
        event: &str,
        id: ListenerId,
        listener: EventListener,
    ) {
        if let Some(conn) = &self.connection {
            conn.add_event_listener(event, id, listener.clone());
        }
        self.event_listeners.push(NamedListener {
            event: event.to_string(),
            id,
            listener,
        });
    }

    pub(crate) fn remove_event_listener(
        &mut self,
        event: &str,
        id: ListenerId,
    ) -> Option<EventListener> {
        if let Some(conn) = &self.connection {
            conn.remove_event_listener(event, id);
        }
        let index = self
            .event_listeners
            .iter()
            .position(|named| named.id == id && named.event == event)?;
        Some(self.event_listeners.remove(index).listener)
    }

    pub(crate) fn add_signal_handler(
        &mut self,
        kind: SignalKind,
        id: ListenerId,
        handler: SignalCallback,
    ) {
        match kind {
            SignalKind::Open => self.open_handlers.push((id, handler)),
            SignalKind::Error => self.error_handlers.push((id, handler)),
        }
    }

    pub(crate) fn remove_signal_handler(
        &mut self,
        kind: SignalKind,
        id: ListenerId,
    ) -> Option<SignalCallback> {
        let handlers = match kind {
            SignalKind::Open => &mut self.open_handlers,
            SignalKind::Error => &mut self.error_handlers,
        };
        let index = handlers.iter().position(|(existing, _)| *existing == id)?;
        Some(handlers.remove(index).1)
    }

    /// Snapshot of the handlers for one signal kind, in registration order
    pub(crate) fn signal_handlers(&self, kind: SignalKind) -> Vec<SignalCallback> {
        let handlers = match kind {
            SignalKind::Open => &self.open_handlers,
            SignalKind::Error => &self.error_handlers,
        };
        handlers.iter().map(|(_, handler)| handler.clone()).collect()
    }

    /// Undo a registration made by a subscription
    ///
    /// Returns the removed handler so the caller can drop it after unlocking.
    pub(crate) fn unregister(&mut self, registration: &Registration) -> Option<RemovedHandler> {
        match registration {
            Registration::Event { event, id } => self
                .remove_event_listener(event, *id)
                .map(RemovedHandler::Event),
            Registration::Open(id) => self
                .remove_signal_handler(SignalKind::Open, *id)
                .map(RemovedHandler::Signal),
            Registration::Error(id) => self
                .remove_signal_handler(SignalKind::Error, *id)
                .map(RemovedHandler::Signal),
        }
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            url: self.url.clone(),
            ref_count: self.ref_count,
            connected: self.connection.is_some(),
            connection_state: self.connection_state(),
            connections_opened: self.generation,
            open_handlers: self.open_handlers.len(),
            error_handlers: self.error_handlers.len(),
            event_listeners: self.event_listeners.len(),
            age: self.created_at.elapsed(),
        }
    }
}

impl Drop for StreamEntry {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            close_quietly(&self.key, conn.as_ref());
        }
    }
}

/// Close a connection, discarding any error the close raises
pub(crate) fn close_quietly(key: &str, conn: &dyn Connection) {
    if let Err(e) = conn.close() {
        tracing::debug!(stream = %key, error = %e, "Ignoring connection close failure");
    }
}

/// Statistics for a stream entry
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub url: String,
    /// Number of unreleased subscriptions
    pub ref_count: usize,
    /// Whether a connection is currently attached
    pub connected: bool,
    /// State of the attached connection
    pub connection_state: Option<ReadyState>,
    /// Connections opened over the entry's lifetime
    pub connections_opened: u64,
    pub open_handlers: usize,
    pub error_handlers: usize,
    pub event_listeners: usize,
    /// Time since the entry was created
    pub age: Duration,
}
