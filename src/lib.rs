//! Shared server-sent event streams
//!
//! `sse-mux` lets many independent call sites subscribe to the same push
//! stream by key while only one connection per key is ever open. It decodes
//! `{ id, event, data }` envelopes transparently and closes/reopens every
//! connection in step with the host page's lifecycle.
//!
//! # Example
//!
//! ```
//! use sse_mux::transport::MemoryTransport;
//! use sse_mux::{RegistryConfig, StreamRegistry};
//!
//! let transport = MemoryTransport::new();
//! let registry = StreamRegistry::with_config(RegistryConfig::manual(), transport.clone());
//!
//! let orders = registry.subscribe("orders", "/sse/orders").unwrap().unwrap();
//! orders.on("order.updated", |payload, envelope, _raw| {
//!     println!("{payload} (id {:?})", envelope.and_then(|e| e.id()));
//! });
//!
//! // A second subscriber shares the same connection
//! let audit = registry.subscribe("orders", "/sse/orders").unwrap().unwrap();
//! assert_eq!(transport.connection_count(), 1);
//!
//! transport
//!     .latest()
//!     .unwrap()
//!     .emit("order.updated", r#"{"id":"evt-1","data":{"id":42}}"#);
//!
//! orders.release();
//! audit.release();
//! assert_eq!(registry.stream_count(), 0);
//! ```
//!
//! The connection itself is supplied by a [`Transport`](transport::Transport)
//! implementation; page lifecycle notifications come from a
//! [`LifecycleSource`](lifecycle::LifecycleSource) or a tokio broadcast channel.

pub mod envelope;
pub mod event;
pub mod lifecycle;
pub mod registry;
mod sync;
pub mod transport;

pub use envelope::{DecodedEvent, Envelope};
pub use event::{MessageEvent, ReadyState, SignalEvent, SignalKind};
pub use lifecycle::{LifecycleController, LifecycleHub, LifecycleSource, PageLifecycleEvent};
pub use registry::{RegistryConfig, RegistryError, StreamRegistry, StreamStats, Subscription};
pub use transport::{Connection, Transport, TransportError};
