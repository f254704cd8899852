//! Listener isolation
//!
//! Every caller-supplied handler runs behind [`isolate`]: a panic inside one
//! handler is caught and dropped so it cannot unwind into the transport's
//! dispatch loop or starve the handlers registered after it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::envelope::{self, Envelope};
use crate::event::{MessageEvent, SignalEvent};
use crate::transport::{EventListener, SignalCallback};

/// Run `f`, discarding any panic it raises
pub(crate) fn isolate<F: FnOnce()>(f: F) {
    let _ = catch_unwind(AssertUnwindSafe(f));
}

/// Wrap a raw event handler so its panics stay contained
pub(crate) fn raw_listener<F>(handler: F) -> EventListener
where
    F: Fn(&MessageEvent) + Send + Sync + 'static,
{
    Arc::new(move |event: &MessageEvent| isolate(|| handler(event)))
}

/// Wrap a decoded-payload handler: decode the envelope, then call the handler
pub(crate) fn decoded_listener<F>(handler: F) -> EventListener
where
    F: Fn(&Value, Option<&Envelope>, &MessageEvent) + Send + Sync + 'static,
{
    Arc::new(move |event: &MessageEvent| {
        let decoded = envelope::decode(event);
        isolate(|| handler(&decoded.payload, decoded.envelope.as_ref(), event));
    })
}

/// Box an open/error handler
pub(crate) fn signal_handler<F>(handler: F) -> SignalCallback
where
    F: Fn(&SignalEvent) + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Invoke every signal handler in order, isolating each one
pub(crate) fn fan_out(handlers: &[SignalCallback], event: &SignalEvent) {
    for handler in handlers {
        isolate(|| handler(event));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn test_isolate_swallows_panic() {
        let ran = AtomicUsize::new(0);

        isolate(|| panic!("boom"));
        isolate(|| {
            ran.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_raw_listener_contains_panic() {
        let listener = raw_listener(|_| panic!("handler failure"));

        listener(&MessageEvent::new("tick", "1"));
    }

    #[test]
    fn test_decoded_listener_passes_envelope() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let listener = decoded_listener(move |payload, envelope, raw| {
            *sink.lock().unwrap() = Some((
                payload.clone(),
                envelope.and_then(|e| e.id().map(str::to_string)),
                raw.event.clone(),
            ));
        });

        listener(&MessageEvent::new("order", r#"{"id":"evt-9","data":[1]}"#));

        let (payload, id, name) = seen.lock().unwrap().take().unwrap();
        assert_eq!(payload, json!([1]));
        assert_eq!(id.as_deref(), Some("evt-9"));
        assert_eq!(name, "order");
    }

    #[test]
    fn test_fan_out_continues_after_panic() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handlers = vec![
            signal_handler(|_| panic!("first")),
            signal_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ];

        fan_out(&handlers, &SignalEvent::open());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
