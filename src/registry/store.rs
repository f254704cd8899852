//! Stream registry implementation
//!
//! The central registry that maps stream keys to shared connections and hands
//! out subscriptions against them.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;

use crate::event::{ReadyState, SignalEvent};
use crate::lifecycle::{LifecycleController, LifecycleSource, PageLifecycleEvent};
use crate::sync::lock;
use crate::transport::{Connection, ListenerId, SignalCallback, Transport};

use super::config::RegistryConfig;
use super::entry::{
    close_quietly, ConnectionTag, Registration, RemovedHandler, StreamEntry, StreamStats,
};
use super::error::RegistryError;
use super::listener;
use super::subscription::Subscription;

pub(crate) struct RegistryState {
    streams: HashMap<String, StreamEntry>,
    /// Set by `close_all`, cleared by `reconnect_all`
    suspended: bool,
    next_entry_id: u64,
}

impl RegistryState {
    /// Look up the entry for `key`, but only if it is still the entry `entry_id`
    pub(crate) fn entry_mut(&mut self, key: &str, entry_id: u64) -> Option<&mut StreamEntry> {
        self.streams
            .get_mut(key)
            .filter(|entry| entry.id() == entry_id)
    }
}

/// State shared between the registry handles, its subscriptions and the
/// callbacks installed on connections
pub(crate) struct RegistryShared {
    transport: Arc<dyn Transport>,
    state: Mutex<RegistryState>,
    next_listener_id: AtomicU64,
}

impl RegistryShared {
    pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        lock(&self.state)
    }

    pub(crate) fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Build the signal callback for a connection of entry `key`
    fn route_signals(self: &Arc<Self>, key: &str, tag: ConnectionTag) -> SignalCallback {
        let registry = Arc::downgrade(self);
        let key = key.to_string();

        Arc::new(move |event: &SignalEvent| {
            if let Some(registry) = registry.upgrade() {
                registry.dispatch_signal(&key, tag, event);
            }
        })
    }

    /// Fan a connection signal out to every open or error handler of the entry
    fn dispatch_signal(&self, key: &str, tag: ConnectionTag, event: &SignalEvent) {
        let handlers = {
            let state = self.state();
            match state.streams.get(key) {
                Some(entry) if entry.is_current(tag) => entry.signal_handlers(event.kind),
                _ => {
                    tracing::trace!(stream = %key, generation = tag.generation, "Ignoring stale connection signal");
                    return;
                }
            }
        };

        listener::fan_out(&handlers, event);
    }

    /// Undo a subscription's registrations and drop its reference.
    ///
    /// Removes the entry and closes its connection when the last reference goes.
    pub(crate) fn release(&self, key: &str, entry_id: u64, registrations: Vec<Registration>) {
        let (removed_handlers, removed_entry) = {
            let mut state = self.state();
            let Some(entry) = state.entry_mut(key, entry_id) else {
                return;
            };

            let handlers: Vec<RemovedHandler> = registrations
                .iter()
                .filter_map(|registration| entry.unregister(registration))
                .collect();

            let remaining = entry.release_ref();
            tracing::debug!(stream = %key, subscribers = remaining, "Subscriber removed");

            let removed_entry = if remaining == 0 {
                state.streams.remove(key)
            } else {
                None
            };
            (handlers, removed_entry)
        };
        drop(removed_handlers);

        if let Some(mut entry) = removed_entry {
            if let Some(conn) = entry.detach() {
                close_quietly(key, conn.as_ref());
            }
            tracing::info!(stream = %key, url = %entry.url(), "Stream removed");
        }
    }

    pub(crate) fn ready_state(&self, key: &str, entry_id: u64) -> ReadyState {
        let mut state = self.state();
        let suspended = state.suspended;

        match state.entry_mut(key, entry_id) {
            Some(entry) => match entry.connection_state() {
                Some(ready_state) => ready_state,
                None if suspended => ReadyState::Closed,
                None => ReadyState::Connecting,
            },
            None => ReadyState::Closed,
        }
    }

    fn close_all(&self) {
        let detached: Vec<(String, Box<dyn Connection>)> = {
            let mut state = self.state();
            state.suspended = true;
            state
                .streams
                .values_mut()
                .filter_map(|entry| entry.detach().map(|conn| (entry.key().to_string(), conn)))
                .collect()
        };

        tracing::debug!(closed = detached.len(), "All streams suspended");

        for (key, conn) in detached {
            close_quietly(&key, conn.as_ref());
        }
    }

    fn reconnect_all(self: &Arc<Self>) {
        let mut state = self.state();
        let mut reopened = 0usize;

        for entry in state.streams.values_mut() {
            if entry.ref_count() == 0 {
                continue;
            }
            if self.attach_entry(entry) {
                reopened += 1;
            }
        }
        state.suspended = false;

        tracing::debug!(reopened = reopened, "All streams resumed");
    }

    /// Attach a connection to `entry`, logging a failure instead of raising it.
    ///
    /// Returns whether a new connection was opened.
    fn attach_entry(self: &Arc<Self>, entry: &mut StreamEntry) -> bool {
        let key = entry.key().to_string();
        let url = entry.url().to_string();

        match entry.attach(self.transport.as_ref(), |tag| self.route_signals(&key, tag)) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(stream = %key, url = %url, error = %e, "Failed to open stream connection");
                false
            }
        }
    }
}

/// Central registry of shared streams
///
/// Cloning the registry yields another handle to the same streams. When the
/// last handle is dropped every entry is torn down and its connection closed;
/// outstanding subscriptions become inert.
#[derive(Clone)]
pub struct StreamRegistry {
    shared: Arc<RegistryShared>,
    config: RegistryConfig,
}

/// Non-owning handle to a [`StreamRegistry`]
#[derive(Clone)]
pub struct WeakStreamRegistry {
    shared: Weak<RegistryShared>,
    config: RegistryConfig,
}

impl WeakStreamRegistry {
    /// Get a registry handle if the registry is still alive
    pub fn upgrade(&self) -> Option<StreamRegistry> {
        self.shared.upgrade().map(|shared| StreamRegistry {
            shared,
            config: self.config.clone(),
        })
    }
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_config(RegistryConfig::default(), transport)
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config<T: Transport + 'static>(config: RegistryConfig, transport: T) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                transport: Arc::new(transport),
                state: Mutex::new(RegistryState {
                    streams: HashMap::new(),
                    suspended: false,
                    next_entry_id: 0,
                }),
                next_listener_id: AtomicU64::new(0),
            }),
            config,
        }
    }

    /// Create a registry and bind it to a page lifecycle source
    ///
    /// The binding is installed only when `config.auto_lifecycle` is set, and
    /// lasts for the lifetime of the registry.
    pub fn with_lifecycle<T, S>(config: RegistryConfig, transport: T, source: &S) -> Self
    where
        T: Transport + 'static,
        S: LifecycleSource + ?Sized,
    {
        let registry = Self::with_config(config, transport);
        if registry.config.auto_lifecycle {
            LifecycleController::new(&registry).install(source);
        }
        registry
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn downgrade(&self) -> WeakStreamRegistry {
        WeakStreamRegistry {
            shared: Arc::downgrade(&self.shared),
            config: self.config.clone(),
        }
    }

    /// Subscribe to the stream identified by `key`
    ///
    /// The first subscription for a key opens a connection to `url`; later ones
    /// share it. Returns `Ok(None)` if `key` or `url` is empty, and an error if
    /// `key` is already bound to a different URL.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Option<Subscription>, RegistryError> {
        let key = key.into();
        let url = url.into();
        if key.is_empty() || url.is_empty() {
            return Ok(None);
        }

        let mut state = self.shared.state();
        let suspended = state.suspended;
        let RegistryState {
            streams,
            next_entry_id,
            ..
        } = &mut *state;

        let entry = match streams.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.url() != url {
                    return Err(RegistryError::StreamKeyConflict {
                        key,
                        existing_url: entry.url().to_string(),
                        requested_url: url,
                    });
                }
                entry
            }
            Entry::Vacant(vacant) => {
                *next_entry_id += 1;
                tracing::info!(stream = %key, url = %url, "Stream created");
                vacant.insert(StreamEntry::new(*next_entry_id, key.clone(), url.clone()))
            }
        };

        if !suspended {
            self.shared.attach_entry(entry);
        }
        let subscribers = entry.retain();
        let entry_id = entry.id();
        drop(state);

        tracing::debug!(stream = %key, subscribers = subscribers, "Subscriber added");

        Ok(Some(Subscription::new(
            Arc::downgrade(&self.shared),
            key,
            url,
            entry_id,
        )))
    }

    /// Close every connection and mark the registry suspended
    ///
    /// Subscriptions and listeners stay registered; see [`reconnect_all`](Self::reconnect_all).
    pub fn close_all(&self) {
        self.shared.close_all();
    }

    /// Reopen a connection for every entry that still has subscribers
    ///
    /// All registered listeners are bound onto the new connections.
    pub fn reconnect_all(&self) {
        self.shared.reconnect_all();
    }

    /// Whether connections are currently suspended by `close_all`
    pub fn is_suspended(&self) -> bool {
        self.shared.state().suspended
    }

    /// Get total number of streams
    pub fn stream_count(&self) -> usize {
        self.shared.state().streams.len()
    }

    /// Get stream statistics
    pub fn stream_stats(&self, key: &str) -> Option<StreamStats> {
        self.shared.state().streams.get(key).map(StreamEntry::stats)
    }

    /// Drive the lifecycle controller from a channel of lifecycle events
    ///
    /// Returns `None` when `auto_lifecycle` is disabled. The task ends when the
    /// channel closes or the registry is dropped.
    pub fn spawn_lifecycle_task(
        &self,
        events: broadcast::Receiver<PageLifecycleEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.auto_lifecycle {
            return None;
        }
        Some(LifecycleController::new(self).spawn(events))
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("config", &self.config)
            .field("streams", &self.stream_count())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}
