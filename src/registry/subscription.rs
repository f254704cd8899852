//! Subscription handles
//!
//! A [`Subscription`] is one caller's interest in a shared stream. It records
//! only the listeners it registered itself, so releasing it unwinds exactly
//! those and leaves sibling subscriptions untouched.

use std::sync::{Mutex, Weak};

use serde_json::Value;

use crate::envelope::Envelope;
use crate::event::{MessageEvent, ReadyState, SignalEvent, SignalKind};
use crate::sync::lock;
use crate::transport::ListenerId;

use super::entry::{Registration, StreamEntry};
use super::listener;
use super::store::RegistryShared;

#[derive(Default)]
struct SubscriptionState {
    released: bool,
    registrations: Vec<Registration>,
}

/// Handle to a shared stream
///
/// Dropping the handle releases it.
pub struct Subscription {
    registry: Weak<RegistryShared>,
    key: String,
    url: String,
    entry_id: u64,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(
        registry: Weak<RegistryShared>,
        key: String,
        url: String,
        entry_id: u64,
    ) -> Self {
        Self {
            registry,
            key,
            url,
            entry_id,
            state: Mutex::new(SubscriptionState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    /// Listen for a named event and receive it undecoded
    ///
    /// Panics raised by `handler` are caught and discarded. No-op once released.
    pub fn add_event_listener<F>(&self, event: &str, handler: F)
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        let listener = listener::raw_listener(handler);
        self.register(|entry, id| {
            entry.add_event_listener(event, id, listener);
            Registration::Event {
                event: event.to_string(),
                id,
            }
        });
    }

    /// Listen for a named event and receive its decoded payload
    ///
    /// The handler gets the payload, the envelope it was wrapped in (if any)
    /// and the raw event.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value, Option<&Envelope>, &MessageEvent) + Send + Sync + 'static,
    {
        let listener = listener::decoded_listener(handler);
        self.register(|entry, id| {
            entry.add_event_listener(event, id, listener);
            Registration::Event {
                event: event.to_string(),
                id,
            }
        });
    }

    /// Called whenever the stream's connection opens, across reconnects
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        let handler = listener::signal_handler(handler);
        self.register(|entry, id| {
            entry.add_signal_handler(SignalKind::Open, id, handler);
            Registration::Open(id)
        });
    }

    /// Called whenever the stream's connection reports an error
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        let handler = listener::signal_handler(handler);
        self.register(|entry, id| {
            entry.add_signal_handler(SignalKind::Error, id, handler);
            Registration::Error(id)
        });
    }

    /// State of the shared connection
    ///
    /// With no live connection this is `Closed` while the registry is
    /// suspended and `Connecting` otherwise. A released subscription whose
    /// stream is gone reports `Closed`.
    pub fn ready_state(&self) -> ReadyState {
        match self.registry.upgrade() {
            Some(registry) => registry.ready_state(&self.key, self.entry_id),
            None => ReadyState::Closed,
        }
    }

    /// Remove this subscription's listeners and drop its reference
    ///
    /// The connection closes when the last subscription for the key is
    /// released. Calling this more than once has no further effect.
    pub fn release(&self) {
        let registrations = {
            let mut state = lock(&self.state);
            if state.released {
                return;
            }
            state.released = true;
            std::mem::take(&mut state.registrations)
        };

        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.key, self.entry_id, registrations);
        }
    }

    fn register<R>(&self, register: R)
    where
        R: FnOnce(&mut StreamEntry, ListenerId) -> Registration,
    {
        let mut state = lock(&self.state);
        if state.released {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let id = registry.next_listener_id();
        let registration = {
            let mut streams = registry.state();
            let Some(entry) = streams.entry_mut(&self.key, self.entry_id) else {
                return;
            };
            register(entry, id)
        };
        state.registrations.push(registration);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("url", &self.url)
            .field("released", &state.released)
            .field("registrations", &state.registrations.len())
            .finish()
    }
}
