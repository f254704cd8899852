//! Manually driven lifecycle source

use std::sync::Mutex;

use crate::sync::lock;

use super::{LifecycleListener, LifecycleSource, PageLifecycleEvent};

/// A [`LifecycleSource`] fed by the host
///
/// Bridge platform notifications (window events, app foreground/background
/// callbacks) into the registry by calling [`dispatch`](Self::dispatch).
#[derive(Default)]
pub struct LifecycleHub {
    listeners: Mutex<Vec<LifecycleListener>>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a notification to every registered listener, in registration order
    pub fn dispatch(&self, event: PageLifecycleEvent) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl LifecycleSource for LifecycleHub {
    fn add_listener(&self, listener: LifecycleListener) {
        lock(&self.listeners).push(listener);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_dispatch_reaches_listeners_in_order() {
        let hub = LifecycleHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let sink = Arc::clone(&seen);
            hub.add_listener(Arc::new(move |event: &PageLifecycleEvent| {
                lock(&sink).push((tag, *event));
            }));
        }

        hub.dispatch(PageLifecycleEvent::PageShow { persisted: true });

        assert_eq!(hub.listener_count(), 2);
        assert_eq!(
            *lock(&seen),
            vec![
                ("first", PageLifecycleEvent::PageShow { persisted: true }),
                ("second", PageLifecycleEvent::PageShow { persisted: true }),
            ]
        );
    }
}
