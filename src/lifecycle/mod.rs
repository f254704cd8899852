//! Page lifecycle handling
//!
//! A hidden or unloading page should not keep push-stream connections open,
//! and a page restored from the back/forward cache should pick its streams
//! back up. The [`LifecycleController`] maps lifecycle notifications onto
//! [`StreamRegistry::close_all`] and [`StreamRegistry::reconnect_all`]:
//!
//! | Notification                    | Action            |
//! |---------------------------------|-------------------|
//! | `PageHide`, `BeforeUnload`      | `close_all`       |
//! | `PageShow { persisted: true }`  | `reconnect_all`   |
//! | `PageShow { persisted: false }` | nothing           |
//!
//! Notifications reach the controller either through a [`LifecycleSource`]
//! (callback style, installed once when the registry is built) or through a
//! `tokio::sync::broadcast` channel drained by a spawned task.

mod hub;

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::registry::{StreamRegistry, WeakStreamRegistry};

pub use hub::LifecycleHub;

/// Page lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLifecycleEvent {
    /// The page is being hidden (navigated away from or discarded)
    PageHide,
    /// The page is about to unload
    BeforeUnload,
    /// The page is being shown
    PageShow {
        /// Whether the page was restored from a cached snapshot
        persisted: bool,
    },
}

/// Callback for lifecycle notifications
pub type LifecycleListener = Arc<dyn Fn(&PageLifecycleEvent) + Send + Sync>;

/// Source of page lifecycle notifications
pub trait LifecycleSource {
    /// Register a listener for every future notification
    fn add_listener(&self, listener: LifecycleListener);
}

/// What the controller does in response to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Suspend,
    Resume,
    Ignore,
}

impl LifecycleAction {
    pub fn for_event(event: &PageLifecycleEvent) -> Self {
        match event {
            PageLifecycleEvent::PageHide | PageLifecycleEvent::BeforeUnload => {
                LifecycleAction::Suspend
            }
            PageLifecycleEvent::PageShow { persisted: true } => LifecycleAction::Resume,
            PageLifecycleEvent::PageShow { persisted: false } => LifecycleAction::Ignore,
        }
    }
}

/// Drives registry-wide suspend/resume from lifecycle notifications
///
/// Holds the registry weakly, so a controller left installed on a long-lived
/// source does not keep the registry alive.
#[derive(Clone)]
pub struct LifecycleController {
    registry: WeakStreamRegistry,
}

impl LifecycleController {
    pub fn new(registry: &StreamRegistry) -> Self {
        Self {
            registry: registry.downgrade(),
        }
    }

    /// Apply a notification to the registry
    ///
    /// Returns the action taken; `Ignore` if the registry is gone.
    pub fn handle(&self, event: &PageLifecycleEvent) -> LifecycleAction {
        let Some(registry) = self.registry.upgrade() else {
            return LifecycleAction::Ignore;
        };

        let action = LifecycleAction::for_event(event);
        match action {
            LifecycleAction::Suspend => {
                tracing::debug!(event = ?event, "Suspending streams for page lifecycle");
                registry.close_all();
            }
            LifecycleAction::Resume => {
                tracing::debug!(event = ?event, "Resuming streams for page lifecycle");
                registry.reconnect_all();
            }
            LifecycleAction::Ignore => {}
        }
        action
    }

    /// Register this controller on `source`
    pub fn install<S: LifecycleSource + ?Sized>(self, source: &S) {
        source.add_listener(Arc::new(move |event: &PageLifecycleEvent| {
            self.handle(event);
        }));
    }

    /// Handle notifications from a broadcast channel on a tokio task
    ///
    /// The task exits when the channel closes or the registry is dropped.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<PageLifecycleEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if self.registry.upgrade().is_none() {
                            break;
                        }
                        self.handle(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Lifecycle notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Lifecycle task finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_ok, assert_pending};

    use crate::event::ReadyState;
    use crate::registry::RegistryConfig;
    use crate::transport::MemoryTransport;

    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_action_mapping() {
        assert_eq!(
            LifecycleAction::for_event(&PageLifecycleEvent::PageHide),
            LifecycleAction::Suspend
        );
        assert_eq!(
            LifecycleAction::for_event(&PageLifecycleEvent::BeforeUnload),
            LifecycleAction::Suspend
        );
        assert_eq!(
            LifecycleAction::for_event(&PageLifecycleEvent::PageShow { persisted: true }),
            LifecycleAction::Resume
        );
        assert_eq!(
            LifecycleAction::for_event(&PageLifecycleEvent::PageShow { persisted: false }),
            LifecycleAction::Ignore
        );
    }

    #[test]
    fn test_hide_and_restore_cycle() {
        let transport = MemoryTransport::new();
        let hub = LifecycleHub::new();
        let registry =
            StreamRegistry::with_lifecycle(RegistryConfig::default(), transport.clone(), &hub);
        let sub = registry.subscribe("orders", "/sse/orders").unwrap().unwrap();
        sub.add_event_listener("order.updated", |_| {});
        let first = transport.latest().unwrap();

        hub.dispatch(PageLifecycleEvent::PageHide);

        assert!(first.is_closed());
        assert!(registry.is_suspended());
        assert_eq!(sub.ready_state(), ReadyState::Closed);
        let stats = registry.stream_stats("orders").unwrap();
        assert_eq!(stats.ref_count, 1);
        assert_eq!(stats.event_listeners, 1);

        hub.dispatch(PageLifecycleEvent::PageShow { persisted: true });

        assert_eq!(transport.connection_count(), 2);
        let second = transport.connection(1).unwrap();
        assert!(!second.is_closed());
        assert_eq!(second.listener_count("order.updated"), 1);
        assert!(!registry.is_suspended());
        assert_eq!(registry.stream_stats("orders").unwrap().ref_count, 1);

        sub.release();
        assert!(second.is_closed());
    }

    #[test]
    fn test_before_unload_suspends() {
        let transport = MemoryTransport::new();
        let hub = LifecycleHub::new();
        let registry =
            StreamRegistry::with_lifecycle(RegistryConfig::default(), transport.clone(), &hub);
        let _sub = registry.subscribe("feed", "/sse/feed").unwrap().unwrap();

        hub.dispatch(PageLifecycleEvent::BeforeUnload);

        assert!(transport.latest().unwrap().is_closed());
        assert_eq!(registry.stream_count(), 1);
    }

    #[test]
    fn test_show_without_persisted_is_ignored() {
        let transport = MemoryTransport::new();
        let hub = LifecycleHub::new();
        let registry =
            StreamRegistry::with_lifecycle(RegistryConfig::default(), transport.clone(), &hub);
        let _sub = registry.subscribe("feed", "/sse/feed").unwrap().unwrap();

        hub.dispatch(PageLifecycleEvent::PageHide);
        hub.dispatch(PageLifecycleEvent::PageShow { persisted: false });

        assert_eq!(transport.connection_count(), 1);
        assert!(registry.is_suspended());
    }

    #[test]
    fn test_disabled_auto_lifecycle_installs_nothing() {
        let transport = MemoryTransport::new();
        let hub = LifecycleHub::new();
        let registry =
            StreamRegistry::with_lifecycle(RegistryConfig::manual(), transport.clone(), &hub);
        let _sub = registry.subscribe("feed", "/sse/feed").unwrap().unwrap();

        assert_eq!(hub.listener_count(), 0);
        hub.dispatch(PageLifecycleEvent::PageHide);

        assert!(!transport.latest().unwrap().is_closed());
        assert!(!registry.is_suspended());
    }

    #[test]
    fn test_controller_outlives_registry() {
        let hub = LifecycleHub::new();
        let registry =
            StreamRegistry::with_lifecycle(RegistryConfig::default(), MemoryTransport::new(), &hub);
        let controller = LifecycleController::new(&registry);

        drop(registry);

        assert_eq!(
            controller.handle(&PageLifecycleEvent::PageHide),
            LifecycleAction::Ignore
        );
        hub.dispatch(PageLifecycleEvent::PageShow { persisted: true });
    }

    #[tokio::test]
    async fn test_lifecycle_task_suspends_and_resumes() {
        init_tracing();
        let transport = MemoryTransport::new();
        let registry = StreamRegistry::new(transport.clone());
        let _sub = registry.subscribe("orders", "/sse/orders").unwrap().unwrap();
        let (tx, rx) = broadcast::channel(8);

        let handle = registry.spawn_lifecycle_task(rx).unwrap();

        assert_ok!(tx.send(PageLifecycleEvent::PageHide));
        wait_until(|| registry.is_suspended()).await;
        assert!(transport.connection(0).unwrap().is_closed());

        assert_ok!(tx.send(PageLifecycleEvent::PageShow { persisted: true }));
        wait_until(|| !registry.is_suspended()).await;
        assert_eq!(transport.connection_count(), 2);

        drop(tx);
        assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await));
    }

    #[tokio::test]
    async fn test_lifecycle_task_disabled() {
        let registry = StreamRegistry::with_config(RegistryConfig::manual(), MemoryTransport::new());
        let (_tx, rx) = broadcast::channel(8);

        assert!(registry.spawn_lifecycle_task(rx).is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_task_exits_after_registry_drop() {
        let registry = StreamRegistry::new(MemoryTransport::new());
        let (tx, rx) = broadcast::channel(8);
        let handle = registry.spawn_lifecycle_task(rx).unwrap();

        drop(registry);
        assert_ok!(tx.send(PageLifecycleEvent::PageHide));

        assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await));
    }

    #[test]
    fn test_lifecycle_task_waits_for_events() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let registry = StreamRegistry::new(MemoryTransport::new());
        let (_tx, rx) = broadcast::channel::<PageLifecycleEvent>(8);

        let _guard = runtime.enter();
        let mut handle = tokio_test::task::spawn(registry.spawn_lifecycle_task(rx).unwrap());

        assert_pending!(handle.poll());
        assert!(!registry.is_suspended());
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}
